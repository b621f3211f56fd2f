//! Shared, wire-free vocabulary between the engine core and the hosting process:
//! the opaque identifiers that name users, groups, matches and in-match seats, and
//! the public error taxonomy every request is eventually translated into.
//!
//! Nothing here talks to a network or a database; those concerns are out of scope
//! (see the purpose and scope of the system) and are consumed through traits defined
//! in `engine-core`.

use serde::{Deserialize, Serialize};

/// Opaque 64-bit user identifier, supplied by the ingress.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Opaque 64-bit group identifier, supplied by the ingress. Its absence on a match
/// means the match is private.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct GroupId(pub u64);

/// Globally unique, monotonically increasing match identifier minted by the registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct MatchId(pub u64);

/// 0-based seat index, local to one match, assigned at game start.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct PlayerId(pub u16);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The public error taxonomy (names are contractual — the hosting process and any
/// client code may match on these directly). Every outward-facing handler ends up
/// returning one of these instead of panicking.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum RequestOutcome {
    /// Accepted.
    Ok,
    /// Empty or whitespace-only message.
    RequestEmpty,
    /// Admin prefix used by a non-admin user.
    RequestNotAdmin,
    MatchUserNotInMatch,
    MatchNotThisGroup,
    MatchUserAlreadyInMatch,
    MatchUserAlreadyInOtherMatch,
    MatchAchieveMaxPlayer,
    MatchNotHost,
    MatchAlreadyBegin,
    MatchAlreadyOver,
    MatchScoreNotEnough,
    MatchEliminated,
    MatchUnexpectedConfig,
    GameRequestOk,
    GameRequestCheckout,
    GameRequestFailed,
    GameRequestNotFound,
    GameRequestUnknown,
    /// The hosting context was never initialized (or was already released).
    NotInit,
}

impl RequestOutcome {
    /// True for every variant that represents a request the caller should treat as
    /// successfully processed (as opposed to rejected).
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RequestOutcome::Ok | RequestOutcome::GameRequestOk | RequestOutcome::GameRequestCheckout
        )
    }
}

impl std::fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
