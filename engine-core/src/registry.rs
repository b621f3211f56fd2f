//! Match registry (§4.9): the process-wide index from user/group/match-id to
//! the match instance, with the lock-ordering discipline from §5 — the
//! registry mutex is always released before a caller reaches for a match's
//! own lock, never the reverse.

use crate::match_obj::Match;
use engine_protocol::{GroupId, MatchId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A shared handle to one hosted match. Every externally-callable `Match`
/// operation is reached through this lock, following the teacher's
/// `rooms: Mutex<HashMap<...>>` pattern of wrapping shared game state in a
/// `tokio::sync::Mutex` rather than a blocking one, since request handling
/// runs on the async ingress path.
pub type MatchHandleArc = Arc<Mutex<Match>>;

#[derive(Default)]
struct Maps {
    by_user: HashMap<UserId, MatchId>,
    by_group: HashMap<GroupId, MatchId>,
    by_id: HashMap<MatchId, MatchHandleArc>,
}

/// Rejections a bind can produce (§4.9 invariants).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BindError {
    UserAlreadyInMatch,
    GroupAlreadyHasMatch,
}

/// The process-wide registry. One instance is shared (behind an `Arc`) by
/// the router and every ingress task.
pub struct MatchRegistry {
    maps: Mutex<Maps>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchRegistry {
    pub fn new() -> Self {
        MatchRegistry {
            maps: Mutex::new(Maps::default()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn mint_id(&self) -> MatchId {
        MatchId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }

    /// Allocates a fresh match id, builds `handle` via `build` (given the
    /// minted id), and binds it under the host user (and, if public, the
    /// group) in one registry-locked step. Fails if the host is already
    /// bound to a match, or the group already hosts a public match.
    pub async fn new_match(
        &self,
        host_uid: UserId,
        group_id: Option<GroupId>,
        build: impl FnOnce(MatchId) -> Match,
    ) -> Result<MatchHandleArc, BindError> {
        let mut maps = self.maps.lock().await;
        if maps.by_user.contains_key(&host_uid) {
            return Err(BindError::UserAlreadyInMatch);
        }
        if let Some(gid) = group_id {
            if maps.by_group.contains_key(&gid) {
                return Err(BindError::GroupAlreadyHasMatch);
            }
        }
        let match_id = self.mint_id();
        let handle: MatchHandleArc = Arc::new(Mutex::new(build(match_id)));
        // `handle` is not yet visible to anyone else, so this never actually
        // contends; `try_lock` keeps it a synchronous step rather than an
        // await point while the registry mutex in `maps` is still held,
        // preserving §5's "registry mutex released before the match mutex"
        // ordering in spirit even though no other caller could race here.
        handle
            .try_lock()
            .expect("freshly constructed match cannot be locked elsewhere")
            .set_self_handle(Arc::downgrade(&handle));
        maps.by_user.insert(host_uid, match_id);
        if let Some(gid) = group_id {
            maps.by_group.insert(gid, match_id);
        }
        maps.by_id.insert(match_id, handle.clone());
        Ok(handle)
    }

    /// Binds an additional joiner's user id to an already-registered match.
    pub async fn bind_user(&self, uid: UserId, match_id: MatchId) -> Result<(), BindError> {
        let mut maps = self.maps.lock().await;
        if maps.by_user.contains_key(&uid) {
            return Err(BindError::UserAlreadyInMatch);
        }
        maps.by_user.insert(uid, match_id);
        Ok(())
    }

    pub async fn unbind_user(&self, uid: UserId) {
        self.maps.lock().await.by_user.remove(&uid);
    }

    /// Removes a match entirely: every map entry pointing at `match_id`.
    /// Called once a match reaches `IS_OVER` (§4.6's state machine: "terminal
    /// state unbinds from the registry").
    pub async fn unbind_match(&self, match_id: MatchId, group_id: Option<GroupId>) {
        let mut maps = self.maps.lock().await;
        maps.by_id.remove(&match_id);
        if let Some(gid) = group_id {
            maps.by_group.remove(&gid);
        }
        maps.by_user.retain(|_, mid| *mid != match_id);
    }

    pub async fn get_by_user(&self, uid: UserId) -> Option<MatchHandleArc> {
        let maps = self.maps.lock().await;
        let match_id = *maps.by_user.get(&uid)?;
        maps.by_id.get(&match_id).cloned()
    }

    pub async fn get_by_group(&self, gid: GroupId) -> Option<MatchHandleArc> {
        let maps = self.maps.lock().await;
        let match_id = *maps.by_group.get(&gid)?;
        maps.by_id.get(&match_id).cloned()
    }

    pub async fn get_by_id(&self, match_id: MatchId) -> Option<MatchHandleArc> {
        self.maps.lock().await.by_id.get(&match_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_module::GameModule;
    use crate::match_obj::MatchEnv;
    use crate::results_store::InMemoryResultsStore;
    use crate::sink::MessageSink;
    use crate::stage::MainStageObj;
    use std::path::PathBuf;

    struct NoopSink;
    impl MessageSink for NoopSink {
        fn tell_user(&self, _user: UserId, _text: &str) {}
        fn post_to_group(&self, _group: GroupId, _text: &str) {}
        fn at_mention(&self, _group: GroupId, _user: UserId) -> String {
            String::new()
        }
    }

    struct DummyModule;
    impl GameModule for DummyModule {
        fn name(&self) -> &'static str {
            "DUMMY"
        }
        fn min_players(&self) -> usize {
            1
        }
        fn max_players(&self) -> usize {
            4
        }
        fn baseline_multiple(&self) -> u32 {
            1
        }
        fn scoring_constants(&self) -> crate::game_module::ScoringConstants {
            crate::game_module::ScoringConstants {
                k_zss: 100,
                k_tss: 100,
                baseline_multi: 100,
            }
        }
        fn parse_options(
            &self,
            _raw: &serde_json::Value,
        ) -> Result<Box<dyn std::any::Any + Send>, String> {
            Ok(Box::new(()))
        }
        fn build_main_stage(
            &self,
            _options: Box<dyn std::any::Any + Send>,
            _seat_count: usize,
        ) -> Box<dyn MainStageObj> {
            unimplemented!()
        }
    }

    fn env(registry: &Arc<MatchRegistry>) -> Arc<MatchEnv> {
        Arc::new(MatchEnv {
            module: Arc::new(DummyModule),
            sink: Arc::new(NoopSink),
            results_store: Arc::new(InMemoryResultsStore::new()),
            resource_root: PathBuf::from("."),
            registry: registry.clone(),
        })
    }

    #[tokio::test]
    async fn one_match_per_user() {
        let registry = Arc::new(MatchRegistry::new());
        let e = env(&registry);
        let e2 = e.clone();
        registry
            .new_match(UserId(1), None, move |mid| Match::new(mid, None, UserId(1), e2))
            .await
            .unwrap();
        let err = registry
            .new_match(UserId(1), None, move |mid| Match::new(mid, None, UserId(1), e))
            .await
            .unwrap_err();
        assert_eq!(err, BindError::UserAlreadyInMatch);
    }

    #[tokio::test]
    async fn one_public_match_per_group() {
        let registry = Arc::new(MatchRegistry::new());
        let e = env(&registry);
        let e2 = e.clone();
        registry
            .new_match(UserId(1), Some(GroupId(7)), move |mid| {
                Match::new(mid, Some(GroupId(7)), UserId(1), e2)
            })
            .await
            .unwrap();
        let err = registry
            .new_match(UserId(2), Some(GroupId(7)), move |mid| {
                Match::new(mid, Some(GroupId(7)), UserId(2), e)
            })
            .await
            .unwrap_err();
        assert_eq!(err, BindError::GroupAlreadyHasMatch);
    }

    #[tokio::test]
    async fn lookup_by_user_group_and_id_agree() {
        let registry = Arc::new(MatchRegistry::new());
        let e = env(&registry);
        let handle = registry
            .new_match(UserId(5), Some(GroupId(9)), move |mid| {
                Match::new(mid, Some(GroupId(9)), UserId(5), e)
            })
            .await
            .unwrap();
        let match_id = handle.lock().await.match_id;

        assert!(registry.get_by_user(UserId(5)).await.is_some());
        assert!(registry.get_by_group(GroupId(9)).await.is_some());
        assert!(registry.get_by_id(match_id).await.is_some());

        registry.unbind_match(match_id, Some(GroupId(9))).await;
        assert!(registry.get_by_user(UserId(5)).await.is_none());
        assert!(registry.get_by_group(GroupId(9)).await.is_none());
        assert!(registry.get_by_id(match_id).await.is_none());
    }
}
