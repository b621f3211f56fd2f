//! Furu: exposed melds (chi/pon/kan/kita), up to four tiles with a
//! per-tile origin marker and the round they were called in.

use crate::tile::Tile;
use engine_protocol::PlayerId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FuruTileKind {
    /// A tile that came from the caller's own hand.
    Normal,
    /// The tile claimed from another player's discard.
    Nari,
}

#[derive(Clone, Copy, Debug)]
pub struct FuruTile {
    pub tile: Tile,
    pub kind: FuruTileKind,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FuruKind {
    Chi,
    Pon,
    /// 明杠: an open kan called directly off a discard.
    DaiminKan,
    /// 加杠: an existing pon upgraded to a kan by adding the fourth tile.
    Shouminkan,
    /// 暗杠: a concealed kan declared from hand alone.
    AnKan,
    /// 拔北, 3-player only: not really a meld but tracked alongside furu for
    /// display and dora/ron-eligibility bookkeeping, per the source.
    Kita,
}

#[derive(Clone, Debug)]
pub struct Furu {
    pub kind: FuruKind,
    pub tiles: Vec<FuruTile>,
    pub nari_round: u32,
    /// Who the called tile came from; `None` for ankan/kita.
    pub from: Option<PlayerId>,
    /// Whether a shouminkan's added tile was drawn (not from hand) — needed
    /// to recognize chankan (robbing the kan) against a *tsumo* add.
    pub is_tsumo_nari: bool,
}

impl Furu {
    pub fn is_dark_kan(&self) -> bool {
        self.kind == FuruKind::AnKan
    }

    pub fn is_kita(&self) -> bool {
        self.kind == FuruKind::Kita
    }

    pub fn is_kan(&self) -> bool {
        matches!(self.kind, FuruKind::DaiminKan | FuruKind::Shouminkan | FuruKind::AnKan)
    }
}
