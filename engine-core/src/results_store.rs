//! Results store interface.
//!
//! The durable results store is out of scope (§1) — treated as an opaque
//! interface that records match outcomes and returns per-user historical
//! aggregates. The engine only ever calls the two operations below; both must
//! tolerate concurrent calls, so the match holds no store-wide lock of its
//! own.

use async_trait::async_trait;
use engine_protocol::UserId;

/// One participant's final standing, as computed by the match at game over
/// (see `match_obj::compute_scores`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreInfo {
    pub uid: UserId,
    pub raw_game_score: i64,
    pub zero_sum_score: i64,
    pub top_score: i64,
}

/// One row of a user's match history, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchSummary {
    pub game_name: String,
    pub user_count: u32,
    pub game_score: i64,
    pub zero_sum_score: i64,
    pub top_score: i64,
}

/// The aggregate a user's multiple precondition (§3) is checked against.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub match_count: u64,
    pub total_zero_sum_score: i64,
    pub total_top_score: i64,
    /// At most 10 entries, most recent match first.
    pub recent: Vec<MatchSummary>,
}

#[async_trait]
pub trait ResultsStore: Send + Sync {
    /// Atomically records one finished match's per-user scores. Returns
    /// whether the write succeeded; failures are reported to the group but
    /// never crash the match (§7).
    async fn record_match(
        &self,
        game_name: &str,
        group_id: Option<engine_protocol::GroupId>,
        host_uid: UserId,
        multiple: u32,
        scores: &[ScoreInfo],
    ) -> bool;

    /// Aggregates over every match the user has ever finished.
    async fn get_user_profile(&self, uid: UserId) -> UserProfile;
}

/// An in-process store for tests and for games run without durable history.
/// Mirrors the four-table shape from §6 (`match` / `user_with_match`) without
/// a real database behind it.
#[derive(Default)]
pub struct InMemoryResultsStore {
    by_user: tokio::sync::Mutex<std::collections::HashMap<UserId, Vec<MatchSummary>>>,
}

impl InMemoryResultsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn record_match(
        &self,
        game_name: &str,
        _group_id: Option<engine_protocol::GroupId>,
        _host_uid: UserId,
        _multiple: u32,
        scores: &[ScoreInfo],
    ) -> bool {
        let mut by_user = self.by_user.lock().await;
        for score in scores {
            by_user.entry(score.uid).or_default().insert(
                0,
                MatchSummary {
                    game_name: game_name.to_string(),
                    user_count: scores.len() as u32,
                    game_score: score.raw_game_score,
                    zero_sum_score: score.zero_sum_score,
                    top_score: score.top_score,
                },
            );
        }
        true
    }

    async fn get_user_profile(&self, uid: UserId) -> UserProfile {
        let by_user = self.by_user.lock().await;
        let Some(history) = by_user.get(&uid) else {
            return UserProfile::default();
        };
        UserProfile {
            match_count: history.len() as u64,
            total_zero_sum_score: history.iter().map(|m| m.zero_sum_score).sum(),
            total_top_score: history.iter().map(|m| m.top_score).sum(),
            recent: history.iter().take(10).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_protocol::GroupId;

    #[tokio::test]
    async fn records_and_aggregates_per_user() {
        let store = InMemoryResultsStore::new();
        let scores = vec![
            ScoreInfo {
                uid: UserId(1),
                raw_game_score: 10,
                zero_sum_score: 100,
                top_score: 50,
            },
            ScoreInfo {
                uid: UserId(2),
                raw_game_score: -10,
                zero_sum_score: -100,
                top_score: -50,
            },
        ];
        assert!(
            store
                .record_match("LIE", Some(GroupId(1)), UserId(1), 1, &scores)
                .await
        );
        let profile = store.get_user_profile(UserId(1)).await;
        assert_eq!(profile.match_count, 1);
        assert_eq!(profile.total_zero_sum_score, 100);
        assert_eq!(profile.recent.len(), 1);

        let absent = store.get_user_profile(UserId(99)).await;
        assert_eq!(absent.match_count, 0);
    }

    #[tokio::test]
    async fn recent_is_capped_at_ten_newest_first() {
        let store = InMemoryResultsStore::new();
        for i in 0..15i64 {
            let scores = vec![ScoreInfo {
                uid: UserId(1),
                raw_game_score: i,
                zero_sum_score: i,
                top_score: i,
            }];
            store
                .record_match("LIE", None, UserId(1), 1, &scores)
                .await;
        }
        let profile = store.get_user_profile(UserId(1)).await;
        assert_eq!(profile.match_count, 15);
        assert_eq!(profile.recent.len(), 10);
        assert_eq!(profile.recent[0].game_score, 14);
    }
}
