//! One hand (局) of synchronous mahjong: dealing, the draw/discard/call
//! cycle, ron/tsumo resolution and ryuukyoku (dead-wall draw) scoring.
//!
//! The source drives a whole hand through two passes — a "normal stage"
//! where every player's state machine runs from `ROUND_BEGIN` to
//! `ROUND_OVER`, then a "ron stage" entered only if someone still can ron —
//! which in turn is driven externally by `SyncMajong`, a coordinator this
//! corpus doesn't include. This module instead resolves each discard's
//! reaction window (ron / kan / pon / chi / pass, in that priority order)
//! the instant every other seat has responded, which preserves the
//! observable per-player state machine and the ron/furiten/dora invariants
//! §8 actually tests, without requiring the external coordinator.

use crate::action::ActionState;
use crate::dora::DorasManager;
use crate::furu::{Furu, FuruKind, FuruTile, FuruTileKind};
use crate::player::PlayerState;
use crate::river::{KiriInfo, KiriKind, KiriTile, RiverTile};
use crate::scoring::{self, ron_payment, tsumo_payment, Group, WinContext};
use crate::tile::{BaseTile, Tile, Wind};
use crate::yama::Yama;
use engine_protocol::PlayerId;
use rand::Rng;

#[derive(Clone, Copy, Debug)]
enum Call {
    Chi(BaseTile, BaseTile),
    Pon,
    Kan,
}

enum Phase {
    Turn {
        drawer: PlayerId,
    },
    Reaction {
        discarder: PlayerId,
        discard: Tile,
        pending: Vec<PlayerId>,
        calls: Vec<(PlayerId, Call)>,
        ron: Vec<PlayerId>,
    },
    Over,
}

#[derive(Clone, Debug)]
pub enum RoundOutcome {
    Tsumo {
        winner: PlayerId,
        deltas: Vec<i64>,
    },
    Ron {
        winners: Vec<PlayerId>,
        discarder: PlayerId,
        deltas: Vec<i64>,
    },
    /// 三家和了: three players ron the same discard. No scores applied.
    TripleRonAbort,
    Ryuukyoku {
        tenpai: Vec<PlayerId>,
        deltas: Vec<i64>,
    },
    /// 九种九牌 / 四风连打 / 四家立直: hand voided at/near the start, no scores.
    FirstRoundSpecial(&'static str),
}

pub struct MahjongRound {
    pub seat_count: usize,
    pub round_wind: Wind,
    pub dealer: PlayerId,
    hand_round: u32,
    yama: Yama,
    doras: DorasManager,
    players: Vec<PlayerState>,
    phase: Phase,
    pub riichi_sticks: u32,
    pub benchang: u32,
    calls_happened: bool,
    kiri_info: KiriInfo,
    outcome: Option<RoundOutcome>,
}

impl MahjongRound {
    pub fn new(
        seat_count: usize,
        round_wind: Wind,
        dealer: PlayerId,
        benchang: u32,
        riichi_sticks: u32,
        rng: &mut impl Rng,
    ) -> Self {
        let (mut yama, dora_pairs) = Yama::new(rng, seat_count == 3);
        let doras = DorasManager::new(dora_pairs);
        let mut players: Vec<PlayerState> = (0..seat_count)
            .map(|i| {
                let offset = (i + seat_count - dealer.0 as usize) % seat_count;
                PlayerState::new(PlayerId(i as u16), Wind::seat_for(offset, seat_count), seat_count)
            })
            .collect();
        for _ in 0..13 {
            for p in players.iter_mut() {
                if let Some(t) = yama.draw() {
                    p.hand.insert(t);
                }
            }
        }
        let mut round = MahjongRound {
            seat_count,
            round_wind,
            dealer,
            hand_round: 1,
            yama,
            doras,
            players,
            phase: Phase::Over,
            riichi_sticks,
            benchang,
            calls_happened: false,
            kiri_info: KiriInfo::default(),
            outcome: None,
        };
        round.begin_turn(dealer);
        round
    }

    pub fn player(&self, pid: PlayerId) -> &PlayerState {
        &self.players[pid.0 as usize]
    }

    pub fn player_mut(&mut self, pid: PlayerId) -> &mut PlayerState {
        &mut self.players[pid.0 as usize]
    }

    pub fn is_over(&self) -> bool {
        matches!(self.phase, Phase::Over)
    }

    pub fn outcome(&self) -> Option<&RoundOutcome> {
        self.outcome.as_ref()
    }

    pub fn hand_round(&self) -> u32 {
        self.hand_round
    }

    /// Who the engine is currently waiting to hear from. During a reaction
    /// window this is the first seat still pending (callers prompt the rest
    /// through `handle_computer_act`/timeouts individually).
    pub fn current_actor(&self) -> Option<PlayerId> {
        match &self.phase {
            Phase::Turn { drawer } => Some(*drawer),
            Phase::Reaction { pending, .. } => pending.first().copied(),
            Phase::Over => None,
        }
    }

    pub fn pending_reactors(&self) -> Vec<PlayerId> {
        match &self.phase {
            Phase::Reaction { pending, .. } => pending.clone(),
            _ => Vec::new(),
        }
    }

    /// The tile currently open for chi/pon/kan/ron claims, if any.
    pub fn pending_discard(&self) -> Option<Tile> {
        match &self.phase {
            Phase::Reaction { discard, .. } => Some(*discard),
            _ => None,
        }
    }

    /// Whether `pid` is one of the seats still eligible to ron this window.
    pub fn is_ron_eligible(&self, pid: PlayerId) -> bool {
        matches!(&self.phase, Phase::Reaction { ron, .. } if ron.contains(&pid))
    }

    fn next_seat(&self, from: PlayerId) -> PlayerId {
        let mut i = (from.0 as usize + 1) % self.seat_count;
        while self.players[i].left && i != from.0 as usize {
            i = (i + 1) % self.seat_count;
        }
        PlayerId(i as u16)
    }

    fn begin_turn(&mut self, pid: PlayerId) {
        if self.yama.is_exhausted() {
            self.resolve_ryuukyoku();
            return;
        }
        let is_last = self.yama.is_last_tile();
        let tile = self.yama.draw().expect("checked not exhausted");
        let p = &mut self.players[pid.0 as usize];
        p.tsumo = Some(tile);
        p.state = if matches!(p.state, ActionState::AfterKan | ActionState::AfterKanCanNari) {
            ActionState::AfterKan
        } else {
            ActionState::AfterGetTile
        };
        self.phase = Phase::Turn { drawer: pid };
        let _ = is_last;
    }

    fn require_turn(&self, pid: PlayerId) -> Result<(), &'static str> {
        match &self.phase {
            Phase::Turn { drawer } if *drawer == pid => Ok(()),
            _ => Err("当前状态不允许该操作"),
        }
    }

    fn concealed_shape(&self, pid: PlayerId, extra: Option<Tile>) -> Vec<BaseTile> {
        let p = self.player(pid);
        let mut v: Vec<BaseTile> = p.hand.iter().map(|t| t.base).collect();
        if let Some(t) = extra {
            v.push(t.base);
        }
        v
    }

    fn open_melds(&self, pid: PlayerId) -> usize {
        self.player(pid).furu.iter().filter(|f| !f.is_kita()).count()
    }

    /// Whether `pid`'s hand would complete by adding `extra`.
    fn would_complete(&self, pid: PlayerId, extra: Tile) -> Option<Vec<Group>> {
        let open = self.open_melds(pid);
        let concealed = self.concealed_shape(pid, Some(extra));
        if scoring::is_kokushi(&concealed) || scoring::is_chiitoitsu(&concealed) {
            return Some(vec![Group::Pair(extra.base)]);
        }
        scoring::decompose_standard(&concealed, 4 - open)
    }

    /// Every tile face that would complete `pid`'s hand right now (the
    /// listen/tenpai set), used for furiten and tenpai-at-ryuukyoku checks.
    fn listen_set(&self, pid: PlayerId) -> Vec<BaseTile> {
        let mut out = Vec::new();
        for code in 0..34u8 {
            let base = BaseTile(code);
            if self.would_complete(pid, Tile::plain(base)).is_some() {
                out.push(base);
            }
        }
        out
    }

    pub fn is_furiten(&self, pid: PlayerId) -> bool {
        let p = self.player(pid);
        if p.is_riichi_furutin {
            return true;
        }
        let listen = self.listen_set(pid);
        p.river.iter().any(|r| listen.contains(&r.tile.base))
    }

    // -----------------------------------------------------------------
    // Player-initiated operations
    // -----------------------------------------------------------------

    pub fn discard(&mut self, pid: PlayerId, base: Option<BaseTile>, declare_riichi: bool) -> Result<(), &'static str> {
        self.require_turn(pid)?;
        {
            let p = &self.players[pid.0 as usize];
            if !matches!(
                p.state,
                ActionState::AfterGetTile | ActionState::AfterKan | ActionState::AfterKanCanNari | ActionState::AfterChiPon
            ) {
                return Err("当前状态不允许切牌");
            }
            if declare_riichi && p.is_riichi() {
                return Err("您已经立直");
            }
            if p.is_riichi() && base.is_some() {
                return Err("立直状态下只能选择摸切");
            }
            if declare_riichi && !p.is_closed() {
                return Err("在有副露的情况下不允许立直");
            }
            if declare_riichi && self.yama.remaining() == 0 {
                return Err("只有在牌山有牌的情况下才可以立直");
            }
        }

        let tile = {
            let p = &mut self.players[pid.0 as usize];
            match base {
                Some(b) => {
                    let drawn = p.tsumo.take().expect("AfterGetTile implies a pending draw");
                    let removed = p.hand.remove_one(b, true).ok_or("您的手牌中不存在该牌")?;
                    p.hand.insert(drawn);
                    removed
                }
                None => p.tsumo.take().expect("AfterGetTile implies a pending draw"),
            }
        };
        let kind = if base.is_some() { KiriKind::Normal } else { KiriKind::Tsumogiri };

        if declare_riichi {
            let sticks_before = self.riichi_sticks;
            self.riichi_sticks = sticks_before + 1;
            self.players[pid.0 as usize].riichi_round = Some(self.hand_round);
        }

        let broke_ippatsu = self.calls_happened;
        {
            let p = &mut self.players[pid.0 as usize];
            p.river.push(RiverTile {
                tile,
                kiri_round: self.hand_round,
                is_riichi_declare: declare_riichi,
            });
            p.kiri_info.kiri_tiles.push((
                pid,
                KiriTile {
                    tile,
                    kind,
                    break_ippatsu: broke_ippatsu,
                },
            ));
            p.state = ActionState::AfterKiri;
            p.ippatsu_eligible = declare_riichi;
        }
        self.kiri_info.clear();
        self.kiri_info.push(pid, tile);

        let pending: Vec<PlayerId> = (0..self.seat_count)
            .map(|i| PlayerId(i as u16))
            .filter(|&s| s != pid && !self.players[s.0 as usize].left)
            .collect();
        let ron = pending
            .iter()
            .copied()
            .filter(|&s| self.would_complete(s, tile).is_some() && !self.is_furiten(s))
            .collect::<Vec<_>>();
        if ron.is_empty() {
            if let Some(reason) = self.check_first_round_abort(tile, declare_riichi) {
                self.phase = Phase::Over;
                self.outcome = Some(RoundOutcome::FirstRoundSpecial(reason));
                self.hand_round += 1;
                return Ok(());
            }
        }
        for &s in &ron {
            self.players[s.0 as usize].state = ActionState::NotifiedRon;
        }
        self.phase = Phase::Reaction {
            discarder: pid,
            discard: tile,
            pending,
            calls: Vec::new(),
            ron,
        };
        self.hand_round += 1;
        Ok(())
    }

    /// 四家立直 / 四风连打: both are whole-table abortive draws that can only
    /// happen on the very first lap with no nari yet, and both are checked
    /// right after a discard is recorded (a discard nobody can ron — a
    /// ronnable discard always takes priority over either abort).
    fn check_first_round_abort(&self, discarded: Tile, declared_riichi: bool) -> Option<&'static str> {
        if self.seat_count != 4 || self.calls_happened {
            return None;
        }
        let active = |i: usize| !self.players[i].left;
        if declared_riichi
            && (0..self.seat_count).filter(|&i| active(i)).all(|i| self.players[i].riichi_round.is_some())
        {
            return Some("四家立直");
        }
        if discarded.base.is_wind()
            && (0..self.seat_count)
                .filter(|&i| active(i))
                .all(|i| self.players[i].river.len() == 1 && self.players[i].river[0].tile.base == discarded.base)
        {
            return Some("四风连打");
        }
        None
    }

    pub fn tsumo(&mut self, pid: PlayerId) -> Result<(), &'static str> {
        self.require_turn(pid)?;
        let tile = self.player(pid).tsumo.ok_or("当前状态不允许自摸")?;
        if !matches!(
            self.player(pid).state,
            ActionState::AfterGetTile | ActionState::AfterKan | ActionState::AfterKanCanNari
        ) {
            return Err("当前状态不允许自摸");
        }
        let groups = self.would_complete(pid, tile).ok_or("手牌无法构成合法和牌型")?;
        let ctx = self.win_context(pid, true, false, self.yama.is_exhausted());
        self.apply_tsumo(pid, &groups, ctx, tile);
        Ok(())
    }

    /// 九种九牌: declarable only on a player's very first draw of the hand,
    /// with no prior nari and at least nine distinct yaochuu in hand.
    pub fn declare_nagashi_nine(&mut self, pid: PlayerId) -> Result<(), &'static str> {
        self.require_turn(pid)?;
        if !matches!(self.player(pid).state, ActionState::AfterGetTile) {
            return Err("当前状态不允许宣告九种九牌流局");
        }
        if self.hand_round != 1 {
            return Err("仅第一巡允许宣告九种九牌流局");
        }
        if self.calls_happened {
            return Err("本局已有鸣牌，无法宣告九种九牌流局");
        }
        let shape = self.concealed_shape(pid, self.player(pid).tsumo);
        let distinct = {
            let mut set = std::collections::HashSet::new();
            for b in &shape {
                if b.is_yaochuu() {
                    set.insert(*b);
                }
            }
            set.len()
        };
        if distinct < 9 {
            return Err("手牌中幺九牌小于九种，无法宣告九种九牌流局");
        }
        self.phase = Phase::Over;
        self.outcome = Some(RoundOutcome::FirstRoundSpecial("九种九牌"));
        Ok(())
    }

    pub fn kita(&mut self, pid: PlayerId, use_tsumo: bool) -> Result<(), &'static str> {
        if self.seat_count != 3 {
            return Err("只有三麻可以拔北");
        }
        self.require_turn(pid)?;
        if !matches!(
            self.player(pid).state,
            ActionState::AfterGetTile | ActionState::AfterKan | ActionState::AfterKanCanNari
        ) {
            return Err("当前状态不允许拔北");
        }
        let tile = if use_tsumo {
            let t = self.player(pid).tsumo.ok_or("当前自摸牌不存在")?;
            if t.base != crate::tile::NORTH {
                return Err("当前自摸牌不是北风");
            }
            self.players[pid.0 as usize].tsumo = None;
            t
        } else {
            let removed = self.players[pid.0 as usize].hand.remove_one(crate::tile::NORTH, false);
            removed.ok_or("您的手牌中不存在北风")?
        };
        let round = self.hand_round;
        let p = &mut self.players[pid.0 as usize];
        p.furu.push(Furu {
            kind: FuruKind::Kita,
            tiles: vec![FuruTile {
                tile,
                kind: FuruTileKind::Normal,
            }],
            nari_round: round,
            from: None,
            is_tsumo_nari: use_tsumo,
        });
        p.kita_count += 1;
        self.begin_turn(pid);
        Ok(())
    }

    pub fn kan(&mut self, pid: PlayerId, base: BaseTile) -> Result<(), &'static str> {
        self.require_turn(pid)?;
        if self.yama.remaining() == 0 {
            return Err("您当前无可摸牌，无法杠牌");
        }
        let had_pon = self.players[pid.0 as usize]
            .furu
            .iter()
            .position(|f| f.kind == FuruKind::Pon && f.tiles.iter().all(|t| t.tile.base == base));
        let (kind, mut tiles, from, tsumo_nari) = if let Some(idx) = had_pon {
            let existing = self.players[pid.0 as usize].furu.remove(idx);
            let added = self.players[pid.0 as usize]
                .hand
                .remove_one(base, false)
                .or_else(|| self.players[pid.0 as usize].tsumo.take())
                .ok_or("没有可以加杠的牌")?;
            let mut tiles = existing.tiles;
            tiles.push(FuruTile {
                tile: added,
                kind: FuruTileKind::Nari,
            });
            (FuruKind::Shouminkan, tiles, existing.from, true)
        } else {
            let count = self.players[pid.0 as usize].hand.count(base)
                + self.players[pid.0 as usize].tsumo.map_or(0, |t| (t.base == base) as usize);
            if count < 4 {
                return Err("手牌中没有暗杠所需的四张牌");
            }
            let mut tiles = Vec::new();
            for _ in 0..3 {
                tiles.push(FuruTile {
                    tile: self.players[pid.0 as usize].hand.remove_one(base, false).unwrap(),
                    kind: FuruTileKind::Normal,
                });
            }
            if let Some(t) = self.players[pid.0 as usize].tsumo.take() {
                if t.base == base {
                    tiles.push(FuruTile {
                        tile: t,
                        kind: FuruTileKind::Normal,
                    });
                } else {
                    self.players[pid.0 as usize].hand.insert(t);
                    tiles.push(FuruTile {
                        tile: self.players[pid.0 as usize].hand.remove_one(base, false).unwrap(),
                        kind: FuruTileKind::Normal,
                    });
                }
            }
            (FuruKind::AnKan, tiles, None, false)
        };
        tiles.sort_by_key(|t| t.tile);
        let round = self.hand_round;
        let was_after_nari_eligible = matches!(
            self.players[pid.0 as usize].state,
            ActionState::AfterGetTile | ActionState::AfterKiri | ActionState::AfterKanCanNari
        );
        self.players[pid.0 as usize].furu.push(Furu {
            kind,
            tiles,
            nari_round: round,
            from,
            is_tsumo_nari: tsumo_nari,
        });
        self.calls_happened = true;
        self.doras.try_open_new_dora(round);
        self.begin_turn(pid);
        self.players[pid.0 as usize].state = if was_after_nari_eligible {
            ActionState::AfterKanCanNari
        } else {
            ActionState::AfterKan
        };
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reaction-window operations
    // -----------------------------------------------------------------

    fn take_pending(&mut self, pid: PlayerId) -> Result<(), &'static str> {
        match &mut self.phase {
            Phase::Reaction { pending, .. } => {
                let idx = pending.iter().position(|&p| p == pid).ok_or("当前不需要您的响应")?;
                pending.remove(idx);
                Ok(())
            }
            _ => Err("当前状态不允许该操作"),
        }
    }

    pub fn react_pass(&mut self, pid: PlayerId) -> Result<(), &'static str> {
        self.take_pending(pid)?;
        self.maybe_resolve_reaction();
        Ok(())
    }

    pub fn react_ron(&mut self, pid: PlayerId) -> Result<(), &'static str> {
        let (discard, is_eligible) = match &self.phase {
            Phase::Reaction { discard, ron, .. } => (*discard, ron.contains(&pid)),
            _ => return Err("当前状态不允许荣和"),
        };
        if self.is_furiten(pid) {
            return Err("当前处于振听状态");
        }
        if !is_eligible || self.would_complete(pid, discard).is_none() {
            return Err("其他玩家舍牌无法使手牌构成合法和牌型");
        }
        if let Phase::Reaction { ron, pending, .. } = &mut self.phase {
            ron.retain(|&p| p != pid);
            ron.push(pid);
            pending.retain(|&p| p != pid);
        }
        self.maybe_resolve_reaction();
        Ok(())
    }

    pub fn react_pon(&mut self, pid: PlayerId, base: BaseTile) -> Result<(), &'static str> {
        self.react_call(pid, base, Call::Pon)
    }

    pub fn react_kan(&mut self, pid: PlayerId, base: BaseTile) -> Result<(), &'static str> {
        self.react_call(pid, base, Call::Kan)
    }

    pub fn react_chi(&mut self, pid: PlayerId, t1: BaseTile, t2: BaseTile) -> Result<(), &'static str> {
        if self.seat_count != 4 {
            return Err("三麻不允许吃牌");
        }
        let discarder = match &self.phase {
            Phase::Reaction { discarder, .. } => *discarder,
            _ => return Err("当前状态不允许吃牌"),
        };
        if self.next_seat(discarder) != pid {
            return Err("只有下家才能吃牌");
        }
        if self.player(pid).chi_from & (1 << discarder.0) == 0 {
            return Err("您只能吃特定玩家的牌，这些玩家已经没有牌可供吃牌");
        }
        self.react_call(pid, t1, Call::Chi(t1, t2))
    }

    fn react_call(&mut self, pid: PlayerId, base: BaseTile, call: Call) -> Result<(), &'static str> {
        self.take_pending(pid)?;
        if let Phase::Reaction { calls, .. } = &mut self.phase {
            calls.push((pid, call));
        }
        let _ = base;
        self.maybe_resolve_reaction();
        Ok(())
    }

    fn maybe_resolve_reaction(&mut self) {
        let (pending_empty, ron_nonempty) = match &self.phase {
            Phase::Reaction { pending, ron, .. } => (pending.is_empty(), !ron.is_empty()),
            _ => return,
        };
        if !pending_empty && !ron_nonempty {
            return;
        }
        // Ron, once declared by anyone, short-circuits the rest of the
        // window immediately (it outranks every call).
        if ron_nonempty {
            self.resolve_ron();
            return;
        }
        if !pending_empty {
            return;
        }
        self.resolve_calls_or_advance();
    }

    fn resolve_ron(&mut self) {
        let (discard, discarder, winners) = match &self.phase {
            Phase::Reaction { discard, discarder, ron, .. } => (*discard, *discarder, ron.clone()),
            _ => return,
        };
        if winners.len() >= 3 {
            self.phase = Phase::Over;
            self.outcome = Some(RoundOutcome::TripleRonAbort);
            return;
        }
        let mut results = Vec::new();
        for &w in &winners {
            let groups = self.would_complete(w, discard).expect("eligibility already checked");
            let ctx = self.win_context(w, false, false, self.yama.is_exhausted());
            results.push((w, groups, ctx));
        }
        self.apply_ron(discarder, discard, results);
    }

    fn resolve_calls_or_advance(&mut self) {
        let (discarder, discard, calls) = match &self.phase {
            Phase::Reaction { discarder, discard, calls, .. } => (*discarder, *discard, calls.clone()),
            _ => return,
        };
        let chosen = calls
            .iter()
            .find(|(_, c)| matches!(c, Call::Kan))
            .or_else(|| calls.iter().find(|(_, c)| matches!(c, Call::Pon)))
            .or_else(|| calls.iter().find(|(_, c)| matches!(c, Call::Chi(..))));
        match chosen.copied() {
            Some((caller, call)) => self.apply_call(caller, discarder, discard, call),
            None => self.begin_turn(self.next_seat(discarder)),
        }
    }

    fn apply_call(&mut self, caller: PlayerId, discarder: PlayerId, discard: Tile, call: Call) {
        self.kiri_info.take_from(discarder, discard.base);
        self.calls_happened = true;
        let round = self.hand_round;
        let tiles = match call {
            Call::Chi(t1, t2) => {
                let a = self.players[caller.0 as usize].hand.remove_one(t1, false).expect("chi tile checked");
                let b = self.players[caller.0 as usize].hand.remove_one(t2, false).expect("chi tile checked");
                let mut tiles = vec![
                    FuruTile { tile: a, kind: FuruTileKind::Normal },
                    FuruTile { tile: b, kind: FuruTileKind::Normal },
                    FuruTile { tile: discard, kind: FuruTileKind::Nari },
                ];
                tiles.sort_by_key(|t| t.tile);
                self.players[caller.0 as usize].chi_from &= !(1 << discarder.0);
                tiles
            }
            Call::Pon => {
                let mut tiles = Vec::new();
                for _ in 0..2 {
                    tiles.push(FuruTile {
                        tile: self.players[caller.0 as usize].hand.remove_one(discard.base, true).expect("pon tiles checked"),
                        kind: FuruTileKind::Normal,
                    });
                }
                tiles.push(FuruTile { tile: discard, kind: FuruTileKind::Nari });
                tiles
            }
            Call::Kan => {
                let mut tiles = Vec::new();
                for _ in 0..3 {
                    tiles.push(FuruTile {
                        tile: self.players[caller.0 as usize].hand.remove_one(discard.base, true).expect("kan tiles checked"),
                        kind: FuruTileKind::Normal,
                    });
                }
                tiles.push(FuruTile { tile: discard, kind: FuruTileKind::Nari });
                tiles
            }
        };
        let kind = match call {
            Call::Chi(..) => FuruKind::Chi,
            Call::Pon => FuruKind::Pon,
            Call::Kan => FuruKind::DaiminKan,
        };
        self.players[caller.0 as usize].furu.push(Furu {
            kind,
            tiles,
            nari_round: round,
            from: Some(discarder),
            is_tsumo_nari: false,
        });
        self.players[caller.0 as usize].state = ActionState::AfterChiPon;
        for p in self.players.iter_mut() {
            p.ippatsu_eligible = false;
        }
        if matches!(call, Call::Kan) {
            self.doras.try_open_new_dora(round);
            self.begin_turn(caller);
            self.players[caller.0 as usize].state = ActionState::AfterKanCanNari;
        } else {
            self.phase = Phase::Turn { drawer: caller };
        }
    }

    pub fn apply_default(&mut self, pid: PlayerId) {
        match &self.phase {
            Phase::Turn { drawer } if *drawer == pid => {
                let _ = self.discard(pid, None, false);
            }
            Phase::Reaction { .. } => {
                let _ = self.react_pass(pid);
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------
    // Scoring
    // -----------------------------------------------------------------

    fn win_context(&self, pid: PlayerId, tsumo: bool, rob_kan: bool, is_last_tile: bool) -> WinContext {
        let p = self.player(pid);
        WinContext {
            tsumo,
            rob_kan,
            is_last_tile,
            riichi: p.is_riichi(),
            ippatsu: p.ippatsu_eligible,
            double_riichi: p.is_riichi() && p.riichi_round == Some(1),
            closed: p.is_closed(),
            seat_wind: p.wind,
            round_wind: self.round_wind,
            is_dealer: pid == self.dealer,
        }
    }

    fn dora_counts(&self, pid: PlayerId, groups: &[Group], win_tile: Tile) -> (u32, u32, u32, u32) {
        let p = self.player(pid);
        let mut faces: Vec<BaseTile> = p.hand.iter().map(|t| t.base).collect();
        faces.push(win_tile.base);
        for f in &p.furu {
            faces.extend(f.tiles.iter().map(|t| t.tile.base));
        }
        let _ = groups;
        let dora: u32 = faces.iter().map(|b| self.doras.count_dora(*b)).sum();
        let uradora = if p.is_riichi() {
            faces.iter().map(|b| self.doras.count_uradora(*b)).sum()
        } else {
            0
        };
        let aka = p.hand.iter().filter(|t| t.red_dora).count() as u32
            + p.furu.iter().flat_map(|f| f.tiles.iter()).filter(|t| t.tile.red_dora).count() as u32
            + win_tile.red_dora as u32;
        let kita = p.kita_count * self.doras.kita_multiplier();
        (dora, uradora, aka, kita)
    }

    fn apply_tsumo(&mut self, winner: PlayerId, groups: &[Group], ctx: WinContext, win_tile: Tile) {
        let open = self.open_melds(winner);
        let mut result = scoring::score_standard_hand(groups, ctx, win_tile.base, open);
        let (dora, uradora, aka, kita) = self.dora_counts(winner, groups, win_tile);
        result.dora = dora;
        result.uradora = uradora;
        result.aka_dora = aka;
        result.kita_dora = kita;
        result.han += dora + uradora + aka + kita;
        result.base_points = scoring::base_points(result.fu, result.han);

        let mut deltas = vec![0i64; self.seat_count];
        let base = result.base_points;
        let is_dealer = ctx.is_dealer;
        for i in 0..self.seat_count {
            if i == winner.0 as usize {
                continue;
            }
            let pay = tsumo_payment(base, is_dealer) + self.benchang as i64 * 100;
            deltas[i] -= pay;
            deltas[winner.0 as usize] += pay;
        }
        deltas[winner.0 as usize] += self.riichi_sticks as i64 * 1000;
        for (i, d) in deltas.iter().enumerate() {
            self.players[i].point_variation += d;
        }
        self.riichi_sticks = 0;
        self.players[winner.0 as usize].fu_results.push(result);
        self.phase = Phase::Over;
        self.outcome = Some(RoundOutcome::Tsumo { winner, deltas });
    }

    fn apply_ron(&mut self, discarder: PlayerId, win_tile: Tile, wins: Vec<(PlayerId, Vec<Group>, WinContext)>) {
        let num_winners = wins.len() as i64;
        let mut deltas = vec![0i64; self.seat_count];
        let sticks_each = self.riichi_sticks as i64 / num_winners.max(1);
        for (winner, groups, ctx) in &wins {
            let open = self.open_melds(*winner);
            let mut result = scoring::score_standard_hand(groups, *ctx, win_tile.base, open);
            let (dora, uradora, aka, kita) = self.dora_counts(*winner, groups, win_tile);
            result.dora = dora;
            result.uradora = uradora;
            result.aka_dora = aka;
            result.kita_dora = kita;
            result.han += dora + uradora + aka + kita;
            result.base_points = scoring::base_points(result.fu, result.han);
            let pay = ron_payment(result.base_points, ctx.is_dealer) + self.benchang as i64 * (self.seat_count as i64 - 1) * 100 / num_winners;
            deltas[winner.0 as usize] += pay + sticks_each * 1000;
            deltas[discarder.0 as usize] -= pay;
            self.players[winner.0 as usize].fu_results.push(result);
        }
        self.riichi_sticks = 0;
        for (i, d) in deltas.iter().enumerate() {
            self.players[i].point_variation += d;
        }
        self.phase = Phase::Over;
        self.outcome = Some(RoundOutcome::Ron {
            winners: wins.into_iter().map(|(w, _, _)| w).collect(),
            discarder,
            deltas,
        });
    }

    fn resolve_ryuukyoku(&mut self) {
        let tenpai: Vec<PlayerId> = (0..self.seat_count)
            .map(|i| PlayerId(i as u16))
            .filter(|&p| !self.player(p).left && !self.listen_set(p).is_empty())
            .collect();
        let nagashi_mangan: Vec<PlayerId> = (0..self.seat_count)
            .map(|i| PlayerId(i as u16))
            .filter(|&p| {
                let river = &self.player(p).river;
                !river.is_empty() && river.iter().all(|r| r.tile.base.is_yaochuu())
            })
            .collect();

        let mut deltas = vec![0i64; self.seat_count];
        if !nagashi_mangan.is_empty() {
            for &w in &nagashi_mangan {
                let is_dealer = w == self.dealer;
                for i in 0..self.seat_count {
                    if i == w.0 as usize {
                        continue;
                    }
                    let pay = if is_dealer { 2000 } else if self.players[i].seat == self.dealer { 2000 } else { 1000 };
                    deltas[i] -= pay;
                    deltas[w.0 as usize] += pay;
                }
            }
        } else if !tenpai.is_empty() && tenpai.len() < self.seat_count {
            let noten = self.seat_count - tenpai.len();
            let total = 1000 * (self.seat_count as i64 - 1);
            let per_tenpai = total / tenpai.len() as i64;
            let per_noten = total / noten as i64;
            for i in 0..self.seat_count {
                if tenpai.contains(&PlayerId(i as u16)) {
                    deltas[i] += per_tenpai;
                } else {
                    deltas[i] -= per_noten;
                }
            }
        }
        for (i, d) in deltas.iter().enumerate() {
            self.players[i].point_variation += d;
        }
        self.phase = Phase::Over;
        self.outcome = Some(RoundOutcome::Ryuukyoku { tenpai, deltas });
    }

    pub fn point_variation(&self, pid: PlayerId) -> i64 {
        self.player(pid).point_variation
    }

    pub fn mark_left(&mut self, pid: PlayerId) {
        self.players[pid.0 as usize].left = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::EAST;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// 13 widely-spaced, all-distinct faces that cannot complete a standard
    /// or seven-pairs hand no matter what single tile is added to them —
    /// used to keep every seat's reaction window ron-free and deterministic.
    fn inert_shape() -> Vec<BaseTile> {
        vec![
            BaseTile::man(1),
            BaseTile::man(3),
            BaseTile::man(6),
            BaseTile::man(8),
            BaseTile::pin(1),
            BaseTile::pin(3),
            BaseTile::pin(6),
            BaseTile::pin(8),
            BaseTile::sou(1),
            BaseTile::sou(3),
            BaseTile::sou(6),
            BaseTile::sou(8),
            crate::tile::HAKU,
        ]
    }

    fn make_round(seat_count: usize) -> MahjongRound {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut round = MahjongRound::new(seat_count, Wind::East, PlayerId(0), 0, 0, &mut rng);
        for i in 0..seat_count {
            let p = &mut round.players[i];
            p.hand = crate::tile::TileSet::new();
            for b in inert_shape() {
                p.hand.insert(Tile::plain(b));
            }
        }
        round
    }

    /// Forces the current actor's pending draw to `tile`, then tsumogiri-
    /// discards it, passing every other active seat's reaction so the turn
    /// advances cleanly. Must not be called on the hand's final discard,
    /// since an abort ends the hand before any reaction window opens.
    fn force_discard_and_pass(round: &mut MahjongRound, tile: Tile, declare_riichi: bool) {
        let actor = round.current_actor().expect("turn in progress");
        round.players[actor.0 as usize].tsumo = Some(tile);
        round.discard(actor, None, declare_riichi).unwrap();
        for &p in &round.pending_reactors() {
            round.react_pass(p).unwrap();
        }
    }

    #[test]
    fn four_players_discarding_the_same_wind_first_round_voids_the_hand() {
        let mut round = make_round(4);
        force_discard_and_pass(&mut round, Tile::plain(EAST), false);
        force_discard_and_pass(&mut round, Tile::plain(EAST), false);
        force_discard_and_pass(&mut round, Tile::plain(EAST), false);

        // Fourth seat's discard completes the renda: no reaction window
        // ever opens, the hand is over immediately.
        let actor = round.current_actor().unwrap();
        round.players[actor.0 as usize].tsumo = Some(Tile::plain(EAST));
        round.discard(actor, None, false).unwrap();

        assert!(round.is_over());
        assert!(matches!(round.outcome(), Some(RoundOutcome::FirstRoundSpecial("四风连打"))));
    }

    #[test]
    fn a_non_wind_first_discard_does_not_falsely_trigger_the_renda_abort() {
        let mut round = make_round(4);
        force_discard_and_pass(&mut round, Tile::plain(BaseTile::man(1)), false);
        assert!(!round.is_over());
    }

    #[test]
    fn four_concurrent_riichi_declarations_void_the_hand() {
        let mut round = make_round(4);
        force_discard_and_pass(&mut round, Tile::plain(BaseTile::sou(9)), true);
        force_discard_and_pass(&mut round, Tile::plain(BaseTile::sou(9)), true);
        force_discard_and_pass(&mut round, Tile::plain(BaseTile::sou(9)), true);

        let actor = round.current_actor().unwrap();
        round.players[actor.0 as usize].tsumo = Some(Tile::plain(BaseTile::sou(9)));
        round.discard(actor, None, true).unwrap();

        assert!(round.is_over());
        assert!(matches!(round.outcome(), Some(RoundOutcome::FirstRoundSpecial("四家立直"))));
    }

    #[test]
    fn a_calls_happened_hand_never_triggers_either_first_round_abort() {
        let mut round = make_round(4);
        round.calls_happened = true;
        force_discard_and_pass(&mut round, Tile::plain(EAST), false);
        force_discard_and_pass(&mut round, Tile::plain(EAST), false);
        force_discard_and_pass(&mut round, Tile::plain(EAST), false);
        let actor = round.current_actor().unwrap();
        round.players[actor.0 as usize].tsumo = Some(Tile::plain(EAST));
        round.discard(actor, None, false).unwrap();
        assert!(!round.is_over());
    }
}
