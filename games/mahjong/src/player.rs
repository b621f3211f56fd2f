//! Per-seat mahjong state: hand, furu, river, and the seat's own slice of the
//! action state machine (§4.8).

use crate::action::{ActionState, AutoOptions};
use crate::furu::Furu;
use crate::river::{PlayerKiriInfo, RiverTile};
use crate::scoring::FuResult;
use crate::tile::{Tile, TileSet, Wind};
use engine_protocol::PlayerId;

pub struct PlayerState {
    pub seat: PlayerId,
    pub wind: Wind,
    pub hand: TileSet,
    pub furu: Vec<Furu>,
    pub river: Vec<RiverTile>,
    pub kiri_info: PlayerKiriInfo,
    pub state: ActionState,
    /// The tile just drawn, pending a discard/kan/tsumo/kita decision.
    pub tsumo: Option<Tile>,
    pub riichi_round: Option<u32>,
    pub is_riichi_furutin: bool,
    /// Cleared the instant any nari happens (this player's or anyone
    /// else's) since this player's own last discard.
    pub ippatsu_eligible: bool,
    pub point_variation: i64,
    pub auto: AutoOptions,
    /// Eligible-to-chi-from bitset (4-player only): bit `i` set means seat
    /// `i`'s river can still supply a chi tile to this player.
    pub chi_from: u32,
    pub kita_count: u32,
    pub fu_results: Vec<FuResult>,
    pub left: bool,
}

impl PlayerState {
    pub fn new(seat: PlayerId, wind: Wind, seat_count: usize) -> Self {
        let mut chi_from = 0u32;
        if seat_count == 4 {
            for i in 0..seat_count {
                if i != seat.0 as usize {
                    chi_from |= 1 << i;
                }
            }
        }
        PlayerState {
            seat,
            wind,
            hand: TileSet::new(),
            furu: Vec::new(),
            river: Vec::new(),
            kiri_info: PlayerKiriInfo::default(),
            state: ActionState::RoundBegin,
            tsumo: None,
            riichi_round: None,
            is_riichi_furutin: false,
            ippatsu_eligible: false,
            point_variation: 0,
            auto: AutoOptions::default(),
            chi_from,
            kita_count: 0,
            fu_results: Vec::new(),
            left: false,
        }
    }

    pub fn is_riichi(&self) -> bool {
        self.riichi_round.is_some()
    }

    /// Darkness of the hand: only ankan/kita furu allowed, the rest concealed.
    pub fn is_closed(&self) -> bool {
        self.furu.iter().all(|f| f.is_dark_kan() || f.is_kita())
    }

    pub fn concealed_count(&self) -> usize {
        self.hand.len() + self.tsumo.is_some() as usize
    }

    /// All 13/14 tiles that participate in shape decomposition, including
    /// the pending draw if any.
    pub fn shape_tiles(&self) -> Vec<Tile> {
        let mut tiles: Vec<Tile> = self.hand.as_slice().to_vec();
        if let Some(t) = self.tsumo {
            tiles.push(t);
        }
        tiles
    }
}
