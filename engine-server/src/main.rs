mod config;

use crate::config::load_catalog;
use engine_core::registry::MatchRegistry;
use engine_core::results_store::InMemoryResultsStore;
use engine_core::router::{handle_private_request, handle_public_request, RouterContext};
use engine_core::sink::MessageSink;
use engine_protocol::{GroupId, UserId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Everything `init` needs: the admin list, the results-store connection
/// string, and the resource/game directory (§6's `init(option)`).
pub struct InitOptions {
    pub admins: Vec<UserId>,
    pub results_store_conn: String,
    pub resource_root: PathBuf,
    pub game_config_path: String,
}

/// The opaque context handle `init` returns and `release` destroys (§6).
pub struct EngineContext {
    pub router: RouterContext,
}

/// Builds the process-wide container: registry, results store, module
/// catalog and admin set. Returns `None` on unrecoverable setup failure
/// (mirroring §6's "returns an opaque context pointer or a null on
/// failure" — nothing here currently fails, since the in-memory results
/// store and console sink can't, but the signature is kept `Option` so a
/// future real results-store connection can report failure the same way).
pub async fn init(option: InitOptions) -> Option<EngineContext> {
    let sink: Arc<dyn MessageSink> = Arc::new(ConsoleSink);
    // `results_store_conn` names a durable backend connection string per §6;
    // this process wires the in-memory default in its place (see DESIGN.md
    // for why a real `tokio-postgres` backend wasn't attempted here).
    tracing::info!(conn = %option.results_store_conn, "results store connection (in-memory backend)");
    let results_store = Arc::new(InMemoryResultsStore::new());

    let modules: Vec<Arc<dyn engine_core::game_module::GameModule>> = vec![Arc::new(mahjong::MahjongModule)];
    let catalog = load_catalog(&option.game_config_path, modules).await;

    Some(EngineContext {
        router: RouterContext {
            registry: Arc::new(MatchRegistry::new()),
            catalog: Arc::new(catalog),
            sink,
            results_store,
            admins: option.admins.into_iter().collect::<HashSet<_>>(),
            resource_root: option.resource_root,
        },
    })
}

/// Destroys a context built by [`init`]. Every resource the context owns is
/// `Arc`-held and drops cooperatively; there is no in-flight work to cancel
/// (§5: "there is no cancellation of an in-progress request").
pub fn release(_context: EngineContext) {}

/// A console-printing [`MessageSink`], standing in for the real
/// message-rendering backend (out of scope per §1) purely to demonstrate the
/// egress callback surface end to end.
struct ConsoleSink;

impl MessageSink for ConsoleSink {
    fn tell_user(&self, user: UserId, text: &str) {
        println!("[tell {user}] {text}");
    }
    fn post_to_group(&self, group: GroupId, text: &str) {
        println!("[group {}] {text}", group.0);
    }
    fn at_mention(&self, _group: GroupId, user: UserId) -> String {
        format!("@{user}")
    }
}

#[tokio::main]
/// Activates structured tracing, builds the engine container, and wires a
/// stub console ingress (`user:group:message`, empty group meaning a private
/// message) line-by-line from stdin — the real ingress (the chat platform's
/// group/private channels) is out of scope per §1; this is here purely to
/// exercise `handle_public_request`/`handle_private_request` end to end the
/// way the teacher's `main` wires its websocket ingress end to end.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let Some(context) = init(InitOptions {
        admins: Vec::new(),
        results_store_conn: "memory".to_string(),
        resource_root: PathBuf::from("resources"),
        game_config_path: "GameConfig.json".to_string(),
    })
    .await
    else {
        tracing::error!("engine context failed to initialize");
        return;
    };

    tracing::info!("reading ingress lines as user:group:message (blank group = private)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some((user_part, rest)) = line.split_once(':') else {
            tracing::warn!(%line, "malformed ingress line, expected user:group:message");
            continue;
        };
        let Some((group_part, msg)) = rest.split_once(':') else {
            tracing::warn!(%line, "malformed ingress line, expected user:group:message");
            continue;
        };
        let Ok(uid) = user_part.trim().parse::<u64>() else {
            tracing::warn!(user = user_part, "malformed user id");
            continue;
        };
        let user_id = UserId(uid);
        let group_part = group_part.trim();

        let outcome = if group_part.is_empty() {
            handle_private_request(&context.router, user_id, msg).await
        } else {
            let Ok(gid) = group_part.parse::<u64>() else {
                tracing::warn!(group = group_part, "malformed group id");
                continue;
            };
            handle_public_request(&context.router, GroupId(gid), user_id, msg).await
        };
        tracing::info!(?outcome, "processed ingress line");
    }

    release(context);
}
