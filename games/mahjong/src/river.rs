//! River (discard pile) and the per-round kiri-info snapshot used to detect
//! chi/pon/ron opportunities against the most recent discards.

use crate::tile::Tile;
use engine_protocol::PlayerId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KiriKind {
    /// A tile chosen from hand.
    Normal,
    /// The just-drawn tile discarded untouched (摸切).
    Tsumogiri,
    /// A kita (north) extraction, which still occupies a river slot for
    /// furiten bookkeeping purposes even though it cannot be ronned.
    North,
}

/// One tile in a player's river.
#[derive(Clone, Copy, Debug)]
pub struct RiverTile {
    pub tile: Tile,
    pub kiri_round: u32,
    pub is_riichi_declare: bool,
}

/// One discard event as tracked for chi/pon/ron eligibility this round.
#[derive(Clone, Copy, Debug)]
pub struct KiriTile {
    pub tile: Tile,
    pub kind: KiriKind,
    /// Whether this discard breaks a would-be ippatsu for its discarder (any
    /// nari having occurred since their own last discard).
    pub break_ippatsu: bool,
}

/// One player's discards made so far *this round* (kiri_round), used as the
/// chi/pon/ron source set other players react against.
#[derive(Clone, Debug, Default)]
pub struct PlayerKiriInfo {
    pub kiri_tiles: Vec<(PlayerId, KiriTile)>,
}

/// The full cross-player snapshot for the round currently in progress: every
/// discard made so far this round, available for chi/pon/ron claims until the
/// round closes and tiles move into permanent rivers.
#[derive(Clone, Debug, Default)]
pub struct KiriInfo {
    pub other_player_kiri_tiles: Vec<(PlayerId, Tile)>,
}

impl KiriInfo {
    pub fn clear(&mut self) {
        self.other_player_kiri_tiles.clear();
    }

    pub fn push(&mut self, pid: PlayerId, tile: Tile) {
        self.other_player_kiri_tiles.push((pid, tile));
    }

    /// Removes and returns one discard with the given tile face from `from`,
    /// if still present (a chi/pon claim that succeeds consumes it; a
    /// rejected later claim against an already-claimed tile correctly fails).
    pub fn take_from(&mut self, from: PlayerId, base: crate::tile::BaseTile) -> Option<Tile> {
        let idx = self
            .other_player_kiri_tiles
            .iter()
            .position(|(pid, t)| *pid == from && t.base == base)?;
        Some(self.other_player_kiri_tiles.remove(idx).1)
    }

    pub fn any_from(&self, from: PlayerId) -> bool {
        self.other_player_kiri_tiles.iter().any(|(pid, _)| *pid == from)
    }
}
