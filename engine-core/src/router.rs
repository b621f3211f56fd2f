//! Request router (§4.10): the single entry point that classifies an
//! incoming ingress request by the first non-whitespace character of its
//! first token and dispatches it to the meta command surface (§6), the
//! (reserved, out-of-scope per §1) admin vocabulary, or straight into the
//! stage tree of the match currently hosting the caller.

use crate::checker::{Checker, FreeString};
use crate::game_module::{GameModule, ModuleCatalog};
use crate::match_obj::{JoinError, Match, MatchEnv};
use crate::registry::{BindError, MatchHandleArc, MatchRegistry};
use crate::results_store::ResultsStore;
use crate::sink::MessageSink;
use engine_protocol::{GroupId, MatchId, RequestOutcome, UserId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// The container glue (§4.11): everything the router needs to resolve one
/// request, held once by `engine-server`'s hosting process and shared (via
/// `Arc`) across every ingress task.
pub struct RouterContext {
    pub registry: Arc<MatchRegistry>,
    pub catalog: Arc<ModuleCatalog>,
    pub sink: Arc<dyn MessageSink>,
    pub results_store: Arc<dyn ResultsStore>,
    pub admins: HashSet<UserId>,
    /// Base resource directory; each module gets its own subdirectory
    /// (§3 "resource directory path for the game module").
    pub resource_root: PathBuf,
}

impl RouterContext {
    fn build_env(&self, module: Arc<dyn GameModule>) -> Arc<MatchEnv> {
        let resource_root = self.resource_root.join(module.name());
        Arc::new(MatchEnv {
            module,
            sink: self.sink.clone(),
            results_store: self.results_store.clone(),
            resource_root,
            registry: self.registry.clone(),
        })
    }

    fn reply(&self, group_id: Option<GroupId>, uid: UserId, text: &str) {
        match group_id {
            Some(gid) => self.sink.post_to_group(gid, text),
            None => self.sink.tell_user(uid, text),
        }
    }
}

/// `handle_public_request` — §6 ingress callable surface.
pub async fn handle_public_request(
    ctx: &RouterContext,
    group_id: GroupId,
    user_id: UserId,
    msg: &str,
) -> RequestOutcome {
    dispatch(ctx, Some(group_id), user_id, msg).await
}

/// `handle_private_request` — §6 ingress callable surface.
pub async fn handle_private_request(ctx: &RouterContext, user_id: UserId, msg: &str) -> RequestOutcome {
    dispatch(ctx, None, user_id, msg).await
}

async fn dispatch(ctx: &RouterContext, group_id: Option<GroupId>, user_id: UserId, msg: &str) -> RequestOutcome {
    let trimmed = msg.trim();
    let Some(first) = trimmed.chars().next() else {
        return RequestOutcome::RequestEmpty;
    };
    match first {
        '#' => handle_meta(ctx, group_id, user_id, trimmed[1..].trim_start()).await,
        '%' => {
            if !ctx.admins.contains(&user_id) {
                RequestOutcome::RequestNotAdmin
            } else {
                // The admin vocabulary is reserved and specified only where
                // the core consumes it (§1); nothing is wired up here.
                RequestOutcome::GameRequestNotFound
            }
        }
        _ => handle_in_game(ctx, group_id, user_id, trimmed).await,
    }
}

async fn handle_in_game(ctx: &RouterContext, group_id: Option<GroupId>, user_id: UserId, msg: &str) -> RequestOutcome {
    let Some(handle) = ctx.registry.get_by_user(user_id).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let is_public = group_id.is_some();
    if is_public {
        let guard = handle.lock().await;
        if guard.group_id.is_some() && guard.group_id != group_id {
            return RequestOutcome::MatchNotThisGroup;
        }
    }
    let mut reader = crate::checker::TokenReader::new(msg);
    let outcome = {
        let mut guard = handle.lock().await;
        guard.request(user_id, is_public, &mut reader)
    };
    finalize(ctx, &handle).await;
    outcome
}

/// Deregisters a match that became `IS_OVER` as a result of the operation
/// just performed (§4.6's state machine: "terminal state unbinds from the
/// registry").
async fn finalize(ctx: &RouterContext, handle: &MatchHandleArc) {
    let (over, match_id, group_id) = {
        let guard = handle.lock().await;
        (guard.is_over(), guard.match_id, guard.group_id)
    };
    if over {
        ctx.registry.unbind_match(match_id, group_id).await;
    }
}

/// Returns whether `profile` clears the §3 multiple precondition:
/// `baseline_multi * multiple * 2` on both the zero-sum and top aggregates.
fn meets_multiple_precondition(
    profile: &crate::results_store::UserProfile,
    baseline_multi: i64,
    multiple: u32,
) -> bool {
    let threshold = baseline_multi * multiple as i64 * 2;
    profile.total_zero_sum_score >= threshold && profile.total_top_score >= threshold
}

/// Resolves whether `uid` clears the precondition for setting the multiple
/// to `candidate` on `module`, fetching the user's profile only when the
/// candidate actually exceeds the module's baseline (the precondition is
/// otherwise never consulted, per §3).
async fn precondition_check(
    ctx: &RouterContext,
    module: &Arc<dyn GameModule>,
    uid: UserId,
    candidate: u32,
) -> bool {
    if candidate <= module.baseline_multiple() {
        return true;
    }
    let profile = ctx.results_store.get_user_profile(uid).await;
    meets_multiple_precondition(&profile, module.scoring_constants().baseline_multi, candidate)
}

async fn handle_meta(ctx: &RouterContext, group_id: Option<GroupId>, user_id: UserId, rest: &str) -> RequestOutcome {
    let mut reader = crate::checker::TokenReader::new(rest);
    let Ok(verb_tok) = FreeString.check(&mut reader) else {
        return RequestOutcome::RequestEmpty;
    };
    let Some(verb) = parse_verb(&verb_tok) else {
        return RequestOutcome::GameRequestNotFound;
    };
    let rest_tokens: Vec<String> = reader.remaining().to_vec();

    match verb {
        MetaVerb::NewGame => meta_new_game(ctx, group_id, user_id, &rest_tokens).await,
        MetaVerb::Join => meta_join(ctx, group_id, user_id, &rest_tokens).await,
        MetaVerb::Start => meta_start(ctx, user_id).await,
        MetaVerb::Leave => meta_leave(ctx, user_id, &rest_tokens).await,
        MetaVerb::Info => meta_info(ctx, group_id, user_id).await,
        MetaVerb::Help => {
            ctx.reply(group_id, user_id, HELP_TEXT);
            RequestOutcome::Ok
        }
        MetaVerb::SetMultiple => meta_set_multiple(ctx, user_id, &rest_tokens).await,
        MetaVerb::SetBenchTo => meta_set_bench_to(ctx, user_id, &rest_tokens).await,
        MetaVerb::Terminate => meta_terminate(ctx, user_id).await,
        MetaVerb::SwitchHost => meta_switch_host(ctx, user_id).await,
    }
}

const HELP_TEXT: &str = "meta commands: #new-game <game>, #join [match-id], #start, #leave [force], \
#info, #help, #set-multiple <n>, #set-bench-to [n], #terminate, #switch-host";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MetaVerb {
    NewGame,
    Join,
    Start,
    Leave,
    Info,
    Help,
    SetMultiple,
    SetBenchTo,
    Terminate,
    SwitchHost,
}

/// Every alias a verb answers to. The Chinese aliases are the literal
/// vocabulary used by S1/S6 in §8 ("#新游戏 LIE", "#加入游戏", "#开始游戏",
/// "#退出 强制"); the English ones are the names §6 lists them under.
fn parse_verb(tok: &str) -> Option<MetaVerb> {
    match tok {
        "新游戏" | "newgame" | "new-game" => Some(MetaVerb::NewGame),
        "加入游戏" | "加入" | "join" => Some(MetaVerb::Join),
        "开始游戏" | "开始" | "start" => Some(MetaVerb::Start),
        "退出" | "离开" | "leave" => Some(MetaVerb::Leave),
        "信息" | "info" => Some(MetaVerb::Info),
        "帮助" | "help" => Some(MetaVerb::Help),
        "倍率" | "set-multiple" | "setmultiple" => Some(MetaVerb::SetMultiple),
        "人数" | "set-bench-to" | "setbenchto" => Some(MetaVerb::SetBenchTo),
        "终止" | "terminate" => Some(MetaVerb::Terminate),
        "换房主" | "switch-host" | "switchhost" => Some(MetaVerb::SwitchHost),
        _ => None,
    }
}

async fn meta_new_game(
    ctx: &RouterContext,
    group_id: Option<GroupId>,
    user_id: UserId,
    args: &[String],
) -> RequestOutcome {
    let Some(name) = args.first() else {
        return RequestOutcome::GameRequestNotFound;
    };
    let Some(module) = ctx.catalog.get(name) else {
        return RequestOutcome::GameRequestNotFound;
    };
    let env = ctx.build_env(module);
    let result = ctx
        .registry
        .new_match(user_id, group_id, move |mid| Match::new(mid, group_id, user_id, env))
        .await;
    match result {
        Ok(_) => RequestOutcome::Ok,
        Err(BindError::UserAlreadyInMatch) => RequestOutcome::MatchUserAlreadyInMatch,
        Err(BindError::GroupAlreadyHasMatch) => RequestOutcome::MatchUserAlreadyInOtherMatch,
    }
}

/// Resolves the target match for a bare `Join`: an explicit match id if one
/// was supplied, else (for a public request) the group's own match.
async fn join_target(ctx: &RouterContext, group_id: Option<GroupId>, args: &[String]) -> Option<MatchHandleArc> {
    if let Some(raw) = args.first() {
        if let Ok(mid) = raw.parse::<u64>() {
            return ctx.registry.get_by_id(MatchId(mid)).await;
        }
    }
    let gid = group_id?;
    ctx.registry.get_by_group(gid).await
}

async fn meta_join(ctx: &RouterContext, group_id: Option<GroupId>, user_id: UserId, args: &[String]) -> RequestOutcome {
    let Some(handle) = join_target(ctx, group_id, args).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let (module, multiple) = {
        let guard = handle.lock().await;
        (guard.module().clone(), guard.multiple())
    };
    let precondition_met = precondition_check(ctx, &module, user_id, multiple).await;
    let result = {
        let mut guard = handle.lock().await;
        guard.join(user_id, |_, _| precondition_met)
    };
    match result {
        Ok(()) => {
            ctx.registry.bind_user(user_id, handle.lock().await.match_id).await.ok();
            RequestOutcome::Ok
        }
        Err(JoinError::AlreadyBegin) => RequestOutcome::MatchAlreadyBegin,
        Err(JoinError::AlreadyInMatch) => RequestOutcome::MatchUserAlreadyInMatch,
        Err(JoinError::AchieveMaxPlayer) => RequestOutcome::MatchAchieveMaxPlayer,
        Err(JoinError::ScoreNotEnough) => RequestOutcome::MatchScoreNotEnough,
    }
}

async fn meta_start(ctx: &RouterContext, user_id: UserId) -> RequestOutcome {
    let Some(handle) = ctx.registry.get_by_user(user_id).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let outcome = {
        let mut guard = handle.lock().await;
        match guard.game_start(user_id) {
            Ok(()) => RequestOutcome::Ok,
            Err(e) => e,
        }
    };
    finalize(ctx, &handle).await;
    outcome
}

async fn meta_leave(ctx: &RouterContext, user_id: UserId, args: &[String]) -> RequestOutcome {
    let Some(handle) = ctx.registry.get_by_user(user_id).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let force = args.iter().any(|t| t == "force" || t == "强制");
    let result = {
        let mut guard = handle.lock().await;
        guard.leave(user_id, force)
    };
    ctx.registry.unbind_user(user_id).await;
    match result {
        Ok(terminated) => {
            if terminated {
                let (match_id, group_id) = {
                    let guard = handle.lock().await;
                    (guard.match_id, guard.group_id)
                };
                ctx.registry.unbind_match(match_id, group_id).await;
            } else {
                finalize(ctx, &handle).await;
            }
            RequestOutcome::Ok
        }
        Err(e) => e,
    }
}

async fn meta_info(ctx: &RouterContext, group_id: Option<GroupId>, user_id: UserId) -> RequestOutcome {
    let handle = match ctx.registry.get_by_user(user_id).await {
        Some(h) => Some(h),
        None => match group_id {
            Some(gid) => ctx.registry.get_by_group(gid).await,
            None => None,
        },
    };
    let Some(handle) = handle else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let info = handle.lock().await.show_info();
    ctx.reply(group_id, user_id, &info);
    RequestOutcome::Ok
}

async fn meta_set_multiple(ctx: &RouterContext, user_id: UserId, args: &[String]) -> RequestOutcome {
    let Some(raw) = args.first() else {
        return RequestOutcome::GameRequestNotFound;
    };
    let Ok(value) = raw.parse::<u32>() else {
        return RequestOutcome::GameRequestNotFound;
    };
    let Some(handle) = ctx.registry.get_by_user(user_id).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let module = handle.lock().await.module().clone();
    let precondition_met = precondition_check(ctx, &module, user_id, value).await;
    let mut guard = handle.lock().await;
    match guard.set_multiple(user_id, value, |_, _| precondition_met) {
        Ok(()) => RequestOutcome::Ok,
        Err(e) => e,
    }
}

async fn meta_set_bench_to(ctx: &RouterContext, user_id: UserId, args: &[String]) -> RequestOutcome {
    let Some(handle) = ctx.registry.get_by_user(user_id).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    // §6 lists the argument as optional; omitting it resets the bench back
    // down to the module's minimum seat count.
    let n = match args.first() {
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return RequestOutcome::GameRequestNotFound,
        },
        None => handle.lock().await.module().min_players(),
    };
    let mut guard = handle.lock().await;
    match guard.set_bench_to(user_id, n) {
        Ok(()) => RequestOutcome::Ok,
        Err(e) => e,
    }
}

async fn meta_terminate(ctx: &RouterContext, user_id: UserId) -> RequestOutcome {
    let Some(handle) = ctx.registry.get_by_user(user_id).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let result = {
        let mut guard = handle.lock().await;
        guard.terminate(user_id)
    };
    match result {
        Ok(()) => {
            let (match_id, group_id) = {
                let guard = handle.lock().await;
                (guard.match_id, guard.group_id)
            };
            ctx.registry.unbind_match(match_id, group_id).await;
            RequestOutcome::Ok
        }
        Err(e) => e,
    }
}

/// §9 Open Question — `SwitchHost`: pre-start reselects the earliest
/// remaining user as host; started and over are no-ops that still return
/// success if any user remains.
async fn meta_switch_host(ctx: &RouterContext, user_id: UserId) -> RequestOutcome {
    let Some(handle) = ctx.registry.get_by_user(user_id).await else {
        return RequestOutcome::MatchUserNotInMatch;
    };
    let mut guard = handle.lock().await;
    if guard.switch_host() {
        RequestOutcome::Ok
    } else {
        RequestOutcome::MatchUserNotInMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_module::{MainStageObj, ScoringConstants};
    use crate::results_store::InMemoryResultsStore;
    use crate::stage::{MainStageRoot, MatchHandle, StageResult};

    struct RecordingSink {
        tells: std::sync::Mutex<Vec<(UserId, String)>>,
        posts: std::sync::Mutex<Vec<(GroupId, String)>>,
    }
    impl Default for RecordingSink {
        fn default() -> Self {
            RecordingSink {
                tells: std::sync::Mutex::new(Vec::new()),
                posts: std::sync::Mutex::new(Vec::new()),
            }
        }
    }
    impl MessageSink for RecordingSink {
        fn tell_user(&self, user: UserId, text: &str) {
            self.tells.lock().unwrap().push((user, text.to_string()));
        }
        fn post_to_group(&self, group: GroupId, text: &str) {
            self.posts.lock().unwrap().push((group, text.to_string()));
        }
        fn at_mention(&self, _group: GroupId, user: UserId) -> String {
            format!("@{}", user.0)
        }
    }

    /// A trivial atomic-stage module: every player requesting "ready" sets
    /// readiness; once all seats are ready the one match stage checks out.
    struct ReadyLogic {
        scores: Vec<i64>,
    }
    impl crate::stage::AtomicLogic for ReadyLogic {
        fn name(&self) -> String {
            "ready".to_string()
        }
        fn commands(&self) -> crate::stage::CommandTable<Self> {
            let mut table = crate::stage::CommandTable::new();
            table.add("ready", "ready", |_reader, _pid, _logic, _reply| {
                crate::stage::CommandAttempt::Matched(StageResult::Ready)
            });
            table
        }
        fn on_stage_begin(&mut self, _handle: &dyn MatchHandle) -> Option<u64> {
            None
        }
        fn on_all_ready(&mut self, _handle: &dyn MatchHandle) -> StageResult {
            StageResult::Checkout
        }
        fn on_computer_act(&mut self, _pid: engine_protocol::PlayerId, _handle: &dyn MatchHandle) -> StageResult {
            StageResult::Ok
        }
    }

    struct TwoPlayerModule;
    impl GameModule for TwoPlayerModule {
        fn name(&self) -> &'static str {
            "DUEL"
        }
        fn min_players(&self) -> usize {
            2
        }
        fn max_players(&self) -> usize {
            2
        }
        fn baseline_multiple(&self) -> u32 {
            1
        }
        fn scoring_constants(&self) -> ScoringConstants {
            ScoringConstants {
                k_zss: 100,
                k_tss: 100,
                baseline_multi: 100,
            }
        }
        fn parse_options(&self, _raw: &serde_json::Value) -> Result<Box<dyn std::any::Any + Send>, String> {
            Ok(Box::new(()))
        }
        fn build_main_stage(&self, _options: Box<dyn std::any::Any + Send>, seat_count: usize) -> Box<dyn MainStageObj> {
            let root: MainStageRoot<crate::stage::AtomicStage<ReadyLogic>> = MainStageRoot::new(
                seat_count,
                |masker| {
                    crate::stage::AtomicStage::new(
                        ReadyLogic {
                            scores: vec![10, -10],
                        },
                        masker,
                    )
                },
                |child, pid| child.logic().scores[pid.0 as usize],
            );
            Box::new(root)
        }
    }

    fn ctx() -> RouterContext {
        let mut catalog = ModuleCatalog::new();
        catalog.register(Arc::new(TwoPlayerModule));
        RouterContext {
            registry: Arc::new(MatchRegistry::new()),
            catalog: Arc::new(catalog),
            sink: Arc::new(RecordingSink::default()),
            results_store: Arc::new(InMemoryResultsStore::new()),
            admins: HashSet::new(),
            resource_root: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let ctx = ctx();
        let outcome = handle_private_request(&ctx, UserId(1), "   ").await;
        assert_eq!(outcome, RequestOutcome::RequestEmpty);
    }

    #[tokio::test]
    async fn admin_prefix_from_non_admin_is_rejected() {
        let ctx = ctx();
        let outcome = handle_private_request(&ctx, UserId(1), "%kick 2").await;
        assert_eq!(outcome, RequestOutcome::RequestNotAdmin);
    }

    #[tokio::test]
    async fn in_game_request_without_a_match_is_rejected() {
        let ctx = ctx();
        let outcome = handle_private_request(&ctx, UserId(1), "ready").await;
        assert_eq!(outcome, RequestOutcome::MatchUserNotInMatch);
    }

    #[tokio::test]
    async fn full_lifecycle_new_game_join_start_and_play_to_checkout() {
        let ctx = ctx();
        let host = UserId(1);
        let guest = UserId(2);
        let group = GroupId(100);

        let outcome = handle_public_request(&ctx, group, host, "#new-game DUEL").await;
        assert_eq!(outcome, RequestOutcome::Ok);

        // A second new-game in the same group is rejected (§4.9 invariant).
        let outcome = handle_public_request(&ctx, group, UserId(3), "#new-game DUEL").await;
        assert_eq!(outcome, RequestOutcome::MatchUserAlreadyInOtherMatch);

        let outcome = handle_public_request(&ctx, group, guest, "#join").await;
        assert_eq!(outcome, RequestOutcome::Ok);

        let outcome = handle_public_request(&ctx, group, guest, "#start").await;
        assert_eq!(outcome, RequestOutcome::MatchNotHost);

        let outcome = handle_public_request(&ctx, group, host, "#start").await;
        assert_eq!(outcome, RequestOutcome::Ok);

        let outcome = handle_public_request(&ctx, group, host, "ready").await;
        assert_eq!(outcome, RequestOutcome::GameRequestOk);
        let outcome = handle_public_request(&ctx, group, guest, "ready").await;
        assert_eq!(outcome, RequestOutcome::GameRequestCheckout);

        // The match is gone from the registry once it reaches IS_OVER.
        assert!(ctx.registry.get_by_user(host).await.is_none());
        assert!(ctx.registry.get_by_group(group).await.is_none());
    }

    #[tokio::test]
    async fn group_mismatch_on_a_public_in_game_request_is_rejected() {
        let ctx = ctx();
        let host = UserId(1);
        let group_a = GroupId(1);
        let group_b = GroupId(2);
        handle_public_request(&ctx, group_a, host, "#new-game DUEL").await;
        let outcome = handle_public_request(&ctx, group_b, host, "ready").await;
        assert_eq!(outcome, RequestOutcome::MatchNotThisGroup);
    }

    #[tokio::test]
    async fn s6_force_leave_mid_game_then_routing_to_the_left_user_is_rejected() {
        let ctx = ctx();
        let a = UserId(1);
        let b = UserId(2);
        let group = GroupId(1);
        handle_public_request(&ctx, group, a, "#new-game DUEL").await;
        handle_public_request(&ctx, group, b, "#join").await;
        handle_public_request(&ctx, group, a, "#start").await;

        let outcome = handle_public_request(&ctx, group, b, "#退出 强制").await;
        assert_eq!(outcome, RequestOutcome::Ok);

        let outcome = handle_public_request(&ctx, group, b, "ready").await;
        assert_eq!(outcome, RequestOutcome::MatchUserNotInMatch);
    }

    #[tokio::test]
    async fn terminate_is_host_only_and_unbinds_the_match() {
        let ctx = ctx();
        let host = UserId(1);
        let guest = UserId(2);
        handle_private_request(&ctx, host, "#new-game DUEL").await;
        handle_private_request(&ctx, guest, "#join 1").await;

        let outcome = handle_private_request(&ctx, guest, "#terminate").await;
        assert_eq!(outcome, RequestOutcome::MatchNotHost);

        let outcome = handle_private_request(&ctx, host, "#terminate").await;
        assert_eq!(outcome, RequestOutcome::Ok);
        assert!(ctx.registry.get_by_user(host).await.is_none());
    }

    #[test]
    fn parse_verb_accepts_english_and_chinese_aliases() {
        assert_eq!(parse_verb("new-game"), Some(MetaVerb::NewGame));
        assert_eq!(parse_verb("新游戏"), Some(MetaVerb::NewGame));
        assert_eq!(parse_verb("退出"), Some(MetaVerb::Leave));
        assert_eq!(parse_verb("gibberish"), None);
    }

    /// A stage that starts a one-second timer on begin and otherwise never
    /// checks out by itself (§4.7: `on_timeout` defaults to `CHECKOUT`).
    /// Nobody ever sends a command.
    struct SilentLogic;
    impl crate::stage::AtomicLogic for SilentLogic {
        fn name(&self) -> String {
            "silent".to_string()
        }
        fn commands(&self) -> crate::stage::CommandTable<Self> {
            crate::stage::CommandTable::new()
        }
        fn on_stage_begin(&mut self, _handle: &dyn MatchHandle) -> Option<u64> {
            Some(1)
        }
        fn on_all_ready(&mut self, _handle: &dyn MatchHandle) -> StageResult {
            StageResult::Ok
        }
        fn on_computer_act(&mut self, _pid: engine_protocol::PlayerId, _handle: &dyn MatchHandle) -> StageResult {
            StageResult::Ok
        }
    }

    struct TimeoutModule;
    impl GameModule for TimeoutModule {
        fn name(&self) -> &'static str {
            "TIMEOUT"
        }
        fn min_players(&self) -> usize {
            2
        }
        fn max_players(&self) -> usize {
            2
        }
        fn baseline_multiple(&self) -> u32 {
            1
        }
        fn scoring_constants(&self) -> ScoringConstants {
            ScoringConstants {
                k_zss: 100,
                k_tss: 100,
                baseline_multi: 100,
            }
        }
        fn parse_options(&self, _raw: &serde_json::Value) -> Result<Box<dyn std::any::Any + Send>, String> {
            Ok(Box::new(()))
        }
        fn build_main_stage(&self, _options: Box<dyn std::any::Any + Send>, seat_count: usize) -> Box<dyn MainStageObj> {
            let root: MainStageRoot<crate::stage::AtomicStage<SilentLogic>> = MainStageRoot::new(
                seat_count,
                |masker| crate::stage::AtomicStage::new(SilentLogic, masker),
                |_child, _pid| 0,
            );
            Box::new(root)
        }
    }

    /// §4.5/§5: a terminal timeout fired entirely from the timer thread — no
    /// further request ever arrives — still checks the stage out, runs the
    /// scoring/recording path, and deregisters the match from the registry.
    #[tokio::test]
    async fn terminal_timeout_with_no_further_requests_still_deregisters_the_match() {
        let mut catalog = ModuleCatalog::new();
        catalog.register(Arc::new(TimeoutModule));
        let ctx = RouterContext {
            registry: Arc::new(MatchRegistry::new()),
            catalog: Arc::new(catalog),
            sink: Arc::new(RecordingSink::default()),
            results_store: Arc::new(InMemoryResultsStore::new()),
            admins: HashSet::new(),
            resource_root: PathBuf::from("."),
        };
        let host = UserId(1);
        let guest = UserId(2);
        handle_private_request(&ctx, host, "#new-game TIMEOUT").await;
        handle_private_request(&ctx, guest, "#join 1").await;
        handle_private_request(&ctx, host, "#start").await;
        assert!(ctx.registry.get_by_user(host).await.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;

        assert!(ctx.registry.get_by_user(host).await.is_none());
        assert!(ctx.registry.get_by_user(guest).await.is_none());
    }
}
