//! The per-player action state machine (§4.8). Kept as a plain enum plus
//! pure predicates on the round snapshot, per the §9 design note rather than
//! the source's virtual-dispatch state objects.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ActionState {
    /// Waiting for their own draw, or to chi/pon/kan a just-made discard.
    RoundBegin,
    /// Just chi'd or pon'd; must discard.
    AfterChiPon,
    /// Just drew; may discard, riichi, kan, tsumo or kita.
    AfterGetTile,
    /// Just drew after a kan; may discard, kan again, or tsumo.
    AfterKan,
    /// As `AfterKan`, but reachable from a direct (called) kan — narikan
    /// legality (chankan exposure) still applies.
    AfterKanCanNari,
    /// Just discarded; may still ron a later player's discard this round.
    AfterKiri,
    /// This player's hand is settled for the round; passive.
    RoundOver,
    /// Another player's discard or kan makes ron legal against this hand.
    NotifiedRon,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AutoOption {
    /// Auto-declare tsumo/ron the instant it becomes legal.
    AutoFu,
    /// Auto-discard the just-drawn tile when no non-trivial action is legal.
    AutoKiri,
    /// Skip the `RoundBegin` chi/pon reaction window entirely.
    AutoGetTile,
}

/// Three independent booleans, one per [`AutoOption`].
#[derive(Clone, Copy, Default, Debug)]
pub struct AutoOptions {
    pub auto_fu: bool,
    pub auto_kiri: bool,
    pub auto_get_tile: bool,
}

impl AutoOptions {
    pub fn get(&self, option: AutoOption) -> bool {
        match option {
            AutoOption::AutoFu => self.auto_fu,
            AutoOption::AutoKiri => self.auto_kiri,
            AutoOption::AutoGetTile => self.auto_get_tile,
        }
    }

    pub fn set(&mut self, option: AutoOption, value: bool) {
        match option {
            AutoOption::AutoFu => self.auto_fu = value,
            AutoOption::AutoKiri => self.auto_kiri = value,
            AutoOption::AutoGetTile => self.auto_get_tile = value,
        }
    }
}
