//! Wires [`round::MahjongRound`] (one hand) into the engine's stage
//! framework as a single atomic stage spanning a whole match: dealer
//! rotation, round-wind advancement, honba/riichi-stick carryover across
//! hands and the overall game-end condition live here, since `round` only
//! ever knows about the hand currently in progress.

use crate::action::{ActionState, AutoOption};
use crate::player::PlayerState;
use crate::round::{MahjongRound, RoundOutcome};
use crate::tile::{BaseTile, Wind};
use engine_core::checker::{BoolChecker, CheckError, Checker, FreeString, Keyword, TokenReader};
use engine_core::game_module::{GameModule, MainStageObj, ScoringConstants};
use engine_core::stage::{
    AtomicLogic, AtomicStage, CommandAttempt, CommandTable, MainStageRoot, MatchHandle, StageResult,
};
use engine_protocol::PlayerId;
use serde::Deserialize;

/// How many round winds a match plays through before ending. §9 open
/// question: the corpus doesn't specify a default length, so the shorter
/// 東風戦 (east-only) is the module default, with 半荘 (east+south) opt-in
/// through `{"length": "hanchan"}`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameLength {
    EastOnly,
    EastSouth,
}

#[derive(Clone, Copy)]
pub struct MahjongOptions {
    pub length: GameLength,
}

#[derive(Deserialize)]
struct RawOptions {
    #[serde(default)]
    length: Option<String>,
}

/// Parses one tile token in the `<rank><suit>` notation [`BaseTile::parse`]
/// accepts (`5p`, `0s`, `1z`, ...).
struct TileArg;

impl Checker<BaseTile> for TileArg {
    fn check(&self, reader: &mut TokenReader) -> Result<BaseTile, CheckError> {
        let pos = reader.position();
        let tok = FreeString.check(reader)?;
        BaseTile::parse(&tok)
            .map(|(base, _)| base)
            .ok_or_else(|| CheckError {
                position: pos,
                expected: "a tile like 5p, 0s or 1z".to_string(),
            })
    }

    fn hint(&self) -> String {
        "<tile>".to_string()
    }
}

/// One match's worth of hands. Owns the currently-live [`MahjongRound`] and
/// everything that must survive past it: dealer seat, round wind, honba and
/// riichi-stick carryover, and each seat's running point total.
pub struct MahjongLogic {
    seat_count: usize,
    length: GameLength,
    round: MahjongRound,
    round_wind: Wind,
    dealer_seat: PlayerId,
    hand_number: u32,
    totals: Vec<i64>,
    left: Vec<bool>,
    pending_announcement: Option<String>,
}

impl MahjongLogic {
    fn new(seat_count: usize, length: GameLength) -> Self {
        let mut rng = rand::rng();
        let round = MahjongRound::new(seat_count, Wind::East, PlayerId(0), 0, 0, &mut rng);
        MahjongLogic {
            seat_count,
            length,
            round,
            round_wind: Wind::East,
            dealer_seat: PlayerId(0),
            hand_number: 1,
            totals: vec![0; seat_count],
            left: vec![false; seat_count],
            pending_announcement: None,
        }
    }

    /// The raw game score `Match::compute_scores` draws from: the seat's
    /// running total plus whatever the hand in progress has already settled.
    pub fn cumulative_score(&self, pid: PlayerId) -> i64 {
        self.totals[pid.0 as usize] + self.round.point_variation(pid)
    }

    fn player_state(&self, pid: PlayerId) -> &PlayerState {
        self.round.player(pid)
    }

    /// Lets every seat with an applicable auto-option resolve its own action
    /// without a human round-trip, chaining for as long as doing so keeps
    /// making progress (so e.g. an `AutoKiri` draw can immediately open the
    /// next seat's `AutoGetTile` reaction window).
    fn drain_autoplay(&mut self) {
        loop {
            if self.round.is_over() {
                return;
            }
            let mut progressed = false;

            if let Some(actor) = self.round.current_actor() {
                let auto = self.player_state(actor).auto;
                let drawn = matches!(
                    self.player_state(actor).state,
                    ActionState::AfterGetTile | ActionState::AfterKan | ActionState::AfterKanCanNari
                );
                if drawn {
                    if auto.get(AutoOption::AutoFu) && self.round.tsumo(actor).is_ok() {
                        progressed = true;
                    } else if auto.get(AutoOption::AutoKiri) {
                        let _ = self.round.discard(actor, None, false);
                        progressed = true;
                    }
                }
            }

            if !progressed {
                for reactor in self.round.pending_reactors() {
                    let auto = self.player_state(reactor).auto;
                    if self.round.is_ron_eligible(reactor) && auto.get(AutoOption::AutoFu) {
                        let _ = self.round.react_ron(reactor);
                        progressed = true;
                        break;
                    }
                    if auto.get(AutoOption::AutoGetTile) {
                        let _ = self.round.react_pass(reactor);
                        progressed = true;
                        break;
                    }
                }
            }

            if !progressed {
                return;
            }
        }
    }

    fn describe_outcome(&self) -> String {
        match self.round.outcome() {
            Some(RoundOutcome::Tsumo { winner, deltas }) => {
                format!("hand {} — seat {} tsumo, deltas {:?}", self.hand_number, winner.0, deltas)
            }
            Some(RoundOutcome::Ron { winners, discarder, deltas }) => {
                let winners: Vec<u16> = winners.iter().map(|p| p.0).collect();
                format!(
                    "hand {} — seat {} discarded into {:?}, deltas {:?}",
                    self.hand_number, discarder.0, winners, deltas
                )
            }
            Some(RoundOutcome::TripleRonAbort) => {
                format!("hand {} — three-way ron, hand voided", self.hand_number)
            }
            Some(RoundOutcome::Ryuukyoku { tenpai, deltas }) => {
                let tenpai: Vec<u16> = tenpai.iter().map(|p| p.0).collect();
                format!(
                    "hand {} — ryuukyoku, tenpai seats {:?}, deltas {:?}",
                    self.hand_number, tenpai, deltas
                )
            }
            Some(RoundOutcome::FirstRoundSpecial(reason)) => {
                format!("hand {} — voided ({reason})", self.hand_number)
            }
            None => String::new(),
        }
    }

    /// Rolls the just-finished hand's deltas into the running totals, then
    /// either deals the next hand or ends the whole match, per the dealer
    /// repeat / round-wind advance rule described on [`GameLength`]. Returns
    /// whether the match is now over.
    fn advance_hand(&mut self) -> bool {
        self.pending_announcement = Some(self.describe_outcome());
        for i in 0..self.seat_count {
            self.totals[i] += self.round.point_variation(PlayerId(i as u16));
        }

        let dealer_repeats = match self.round.outcome() {
            Some(RoundOutcome::Tsumo { winner, .. }) => *winner == self.dealer_seat,
            Some(RoundOutcome::Ron { winners, .. }) => winners.contains(&self.dealer_seat),
            Some(RoundOutcome::Ryuukyoku { tenpai, .. }) => tenpai.contains(&self.dealer_seat),
            Some(RoundOutcome::TripleRonAbort) | Some(RoundOutcome::FirstRoundSpecial(_)) | None => true,
        };
        let is_draw = matches!(
            self.round.outcome(),
            Some(RoundOutcome::Ryuukyoku { .. })
                | Some(RoundOutcome::TripleRonAbort)
                | Some(RoundOutcome::FirstRoundSpecial(_))
        );
        let next_benchang = if dealer_repeats || is_draw { self.round.benchang + 1 } else { 0 };
        let next_riichi_sticks = self.round.riichi_sticks;

        let mut next_dealer = self.dealer_seat;
        let mut next_wind = self.round_wind;
        let mut game_over = false;
        if !dealer_repeats {
            let next_index = (self.dealer_seat.0 as usize + 1) % self.seat_count;
            next_dealer = PlayerId(next_index as u16);
            if next_index == 0 {
                match (self.round_wind, self.length) {
                    (Wind::East, GameLength::EastSouth) => next_wind = Wind::South,
                    _ => game_over = true,
                }
            }
        }

        if game_over {
            return true;
        }

        let mut rng = rand::rng();
        self.round = MahjongRound::new(self.seat_count, next_wind, next_dealer, next_benchang, next_riichi_sticks, &mut rng);
        self.round_wind = next_wind;
        self.dealer_seat = next_dealer;
        self.hand_number += 1;
        for (seat, left) in self.left.iter().enumerate() {
            if *left {
                self.round.mark_left(PlayerId(seat as u16));
            }
        }
        self.drain_autoplay();
        false
    }

    fn after_round_mutation(&mut self) -> StageResult {
        self.drain_autoplay();
        if self.round.is_over() {
            if self.advance_hand() {
                StageResult::Checkout
            } else {
                StageResult::Ok
            }
        } else {
            StageResult::Ok
        }
    }

    fn do_discard(&mut self, pid: PlayerId, base: Option<BaseTile>, riichi: bool) -> StageResult {
        match self.round.discard(pid, base, riichi) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_tsumo(&mut self, pid: PlayerId) -> StageResult {
        match self.round.tsumo(pid) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_ron(&mut self, pid: PlayerId) -> StageResult {
        match self.round.react_ron(pid) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_pon(&mut self, pid: PlayerId, base: BaseTile) -> StageResult {
        match self.round.react_pon(pid, base) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_chi(&mut self, pid: PlayerId, t1: BaseTile, t2: BaseTile) -> StageResult {
        match self.round.react_chi(pid, t1, t2) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_kan(&mut self, pid: PlayerId, base: BaseTile) -> StageResult {
        let result = if self.round.current_actor() == Some(pid) {
            self.round.kan(pid, base)
        } else {
            self.round.react_kan(pid, base)
        };
        match result {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_kita(&mut self, pid: PlayerId, use_tsumo: bool) -> StageResult {
        match self.round.kita(pid, use_tsumo) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_pass(&mut self, pid: PlayerId) -> StageResult {
        match self.round.react_pass(pid) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }

    fn do_kyuushuu(&mut self, pid: PlayerId) -> StageResult {
        match self.round.declare_nagashi_nine(pid) {
            Ok(()) => self.after_round_mutation(),
            Err(_) => StageResult::Failed,
        }
    }
}

impl AtomicLogic for MahjongLogic {
    fn name(&self) -> String {
        format!("mahjong — hand {}, {:?} {}", self.hand_number, self.round_wind, self.dealer_seat.0)
    }

    fn commands(&self) -> CommandTable<Self> {
        let mut table = CommandTable::new();
        table.add("discard", "discard <tile> — discard a tile from hand", |reader, pid, logic, _reply| {
            match TileArg.check(reader) {
                Ok(base) => CommandAttempt::Matched(logic.do_discard(pid, Some(base), false)),
                Err(e) => CommandAttempt::Mismatch(e),
            }
        });
        table.add("discard", "discard — discard the tile just drawn (tsumogiri)", |reader, pid, logic, _reply| {
            if !reader.is_exhausted() {
                return CommandAttempt::Mismatch(CheckError {
                    position: reader.position(),
                    expected: "end of command".to_string(),
                });
            }
            CommandAttempt::Matched(logic.do_discard(pid, None, false))
        });
        table.add("riichi", "riichi <tile> — declare riichi, discarding <tile>", |reader, pid, logic, _reply| {
            match TileArg.check(reader) {
                Ok(base) => CommandAttempt::Matched(logic.do_discard(pid, Some(base), true)),
                Err(e) => CommandAttempt::Mismatch(e),
            }
        });
        table.add("riichi", "riichi — declare riichi, discarding the tile just drawn", |reader, pid, logic, _reply| {
            if !reader.is_exhausted() {
                return CommandAttempt::Mismatch(CheckError {
                    position: reader.position(),
                    expected: "end of command".to_string(),
                });
            }
            CommandAttempt::Matched(logic.do_discard(pid, None, true))
        });
        table.add("tsumo", "tsumo — declare a self-draw win", |_reader, pid, logic, _reply| {
            CommandAttempt::Matched(logic.do_tsumo(pid))
        });
        table.add("ron", "ron — claim the open discard as a win", |_reader, pid, logic, _reply| {
            CommandAttempt::Matched(logic.do_ron(pid))
        });
        table.add("pon", "pon <tile> — claim the open discard as a triplet", |reader, pid, logic, _reply| {
            match TileArg.check(reader) {
                Ok(base) => CommandAttempt::Matched(logic.do_pon(pid, base)),
                Err(e) => CommandAttempt::Mismatch(e),
            }
        });
        table.add("kan", "kan <tile> — call or extend a kan on <tile>", |reader, pid, logic, _reply| {
            match TileArg.check(reader) {
                Ok(base) => CommandAttempt::Matched(logic.do_kan(pid, base)),
                Err(e) => CommandAttempt::Mismatch(e),
            }
        });
        table.add("chi", "chi <t1> <t2> — claim the open discard with <t1><t2>", |reader, pid, logic, _reply| {
            let t1 = match TileArg.check(reader) {
                Ok(b) => b,
                Err(e) => return CommandAttempt::Mismatch(e),
            };
            let t2 = match TileArg.check(reader) {
                Ok(b) => b,
                Err(e) => return CommandAttempt::Mismatch(e),
            };
            CommandAttempt::Matched(logic.do_chi(pid, t1, t2))
        });
        table.add("kita", "kita — extract the north tile just drawn", |_reader, pid, logic, _reply| {
            CommandAttempt::Matched(logic.do_kita(pid, true))
        });
        table.add("kita", "kita hand — extract a north tile from hand", |reader, pid, logic, _reply| {
            match Keyword("hand").check(reader) {
                Ok(()) => CommandAttempt::Matched(logic.do_kita(pid, false)),
                Err(e) => CommandAttempt::Mismatch(e),
            }
        });
        table.add("pass", "pass — decline to call or ron the open discard", |_reader, pid, logic, _reply| {
            CommandAttempt::Matched(logic.do_pass(pid))
        });
        table.add(
            "kyuushuu",
            "kyuushuu — void the hand on nine distinct terminals/honors in your opening draw",
            |_reader, pid, logic, _reply| CommandAttempt::Matched(logic.do_kyuushuu(pid)),
        );
        table.add(
            "auto",
            "auto <fu|kiri|gettile> <on|off> — toggle an autoplay option for your seat",
            |reader, pid, logic, _reply| {
                let pos = reader.position();
                let option = match FreeString.check(reader) {
                    Ok(tok) => match tok.as_str() {
                        "fu" => AutoOption::AutoFu,
                        "kiri" => AutoOption::AutoKiri,
                        "gettile" => AutoOption::AutoGetTile,
                        _ => {
                            return CommandAttempt::Mismatch(CheckError {
                                position: pos,
                                expected: "fu|kiri|gettile".to_string(),
                            })
                        }
                    },
                    Err(e) => return CommandAttempt::Mismatch(e),
                };
                match (BoolChecker { true_word: "on", false_word: "off" }).check(reader) {
                    Ok(value) => {
                        logic.round.player_mut(pid).auto.set(option, value);
                        CommandAttempt::Matched(StageResult::Ok)
                    }
                    Err(e) => CommandAttempt::Mismatch(e),
                }
            },
        );
        table
    }

    fn on_stage_begin(&mut self, _handle: &dyn MatchHandle) -> Option<u64> {
        self.drain_autoplay();
        None
    }

    fn on_all_ready(&mut self, _handle: &dyn MatchHandle) -> StageResult {
        StageResult::Ok
    }

    fn on_leave(&mut self, pid: PlayerId, _handle: &dyn MatchHandle) {
        self.left[pid.0 as usize] = true;
        self.round.mark_left(pid);
    }

    fn on_computer_act(&mut self, pid: PlayerId, _handle: &dyn MatchHandle) -> StageResult {
        let is_actor = self.round.current_actor() == Some(pid);
        let is_reactor = self.round.pending_reactors().contains(&pid);
        if !is_actor && !is_reactor {
            return StageResult::Ok;
        }
        self.round.apply_default(pid);
        self.after_round_mutation()
    }

    fn command_info(&self, _text_mode: bool) -> String {
        format!(
            "\n\nround wind {:?}, dealer seat {}, honba {}, riichi sticks {}",
            self.round_wind, self.dealer_seat.0, self.round.benchang, self.round.riichi_sticks
        )
    }

    fn on_after_command(&mut self, _result: StageResult, handle: &dyn MatchHandle) {
        if let Some(text) = self.pending_announcement.take() {
            let mut sender = handle.broadcast().scoped_at_all();
            sender.push_str(&text);
        }
    }
}

/// The [`GameModule`] installed into the engine's catalog under the name
/// `"mahjong"`.
pub struct MahjongModule;

impl GameModule for MahjongModule {
    fn name(&self) -> &'static str {
        "mahjong"
    }

    fn min_players(&self) -> usize {
        3
    }

    fn max_players(&self) -> usize {
        4
    }

    fn baseline_multiple(&self) -> u32 {
        1
    }

    fn scoring_constants(&self) -> ScoringConstants {
        ScoringConstants { k_zss: 100, k_tss: 100, baseline_multi: 100 }
    }

    fn parse_options(&self, raw: &serde_json::Value) -> Result<Box<dyn std::any::Any + Send>, String> {
        let raw: RawOptions = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
        let length = match raw.length.as_deref() {
            None | Some("east") | Some("tonpuusen") => GameLength::EastOnly,
            Some("hanchan") => GameLength::EastSouth,
            Some(other) => return Err(format!("unknown length option {other:?}")),
        };
        Ok(Box::new(MahjongOptions { length }))
    }

    fn build_main_stage(&self, options: Box<dyn std::any::Any + Send>, seat_count: usize) -> Box<dyn MainStageObj> {
        let options = *options
            .downcast::<MahjongOptions>()
            .expect("parse_options always produces MahjongOptions");
        let root: MainStageRoot<AtomicStage<MahjongLogic>> = MainStageRoot::new(
            seat_count,
            |masker| AtomicStage::new(MahjongLogic::new(seat_count, options.length), masker),
            |child, pid| child.logic().cumulative_score(pid),
        );
        Box::new(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::sink::{BroadcastSender, MessageSink};
    use engine_core::stage::Stage;
    use engine_core::timer::TimerEvent;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    struct NoopSink;
    impl MessageSink for NoopSink {
        fn tell_user(&self, _user: engine_protocol::UserId, _text: &str) {}
        fn post_to_group(&self, _group: engine_protocol::GroupId, _text: &str) {}
        fn at_mention(&self, _group: engine_protocol::GroupId, _user: engine_protocol::UserId) -> String {
            String::new()
        }
    }

    struct NullHandle {
        broadcast: BroadcastSender,
        dir: PathBuf,
        seats: usize,
    }
    impl MatchHandle for NullHandle {
        fn broadcast(&self) -> &BroadcastSender {
            &self.broadcast
        }
        fn user_of(&self, pid: PlayerId) -> Option<engine_protocol::UserId> {
            Some(engine_protocol::UserId(pid.0 as u64))
        }
        fn start_timer(&self, _total_secs: u64, _on_event: Arc<dyn Fn(TimerEvent) + Send + Sync>) {}
        fn stop_timer(&self) {}
        fn resource_dir(&self) -> &Path {
            &self.dir
        }
        fn seat_count(&self) -> usize {
            self.seats
        }
    }

    fn handle(seats: usize) -> NullHandle {
        NullHandle {
            broadcast: BroadcastSender::batched(Arc::new(NoopSink), || vec![]),
            dir: PathBuf::from("."),
            seats,
        }
    }

    fn send(stage: &mut AtomicStage<MahjongLogic>, pid: u16, text: &str, h: &NullHandle) -> StageResult {
        let mut reply = h.broadcast.scoped();
        stage.handle_request(&mut TokenReader::new(text), PlayerId(pid), false, &mut reply, h)
    }

    #[test]
    fn every_seat_passing_a_reaction_window_advances_the_turn() {
        let mut logic = MahjongLogic::new(4, GameLength::EastOnly);
        logic.drain_autoplay();
        let dealer = logic.round.current_actor().unwrap();
        assert_eq!(dealer, PlayerId(0));
        let hand_before = logic.hand_number;
        // Dealer tsumogiri-discards; every other seat passes the reaction.
        logic.do_discard(dealer, None, false);
        for seat in 0..4u16 {
            if seat == dealer.0 {
                continue;
            }
            logic.do_pass(PlayerId(seat));
        }
        assert_eq!(logic.hand_number, hand_before);
        assert_eq!(logic.round.current_actor(), Some(PlayerId(1)));
    }

    #[test]
    fn auto_kiri_lets_a_computer_seat_discard_without_an_explicit_command() {
        let mut logic = MahjongLogic::new(4, GameLength::EastOnly);
        logic.round.player_mut(PlayerId(0)).auto.set(AutoOption::AutoKiri, true);
        logic.drain_autoplay();
        let seat_zero_still_owes_a_move = logic.round.current_actor() == Some(PlayerId(0))
            || logic.round.pending_reactors().contains(&PlayerId(0));
        assert!(!seat_zero_still_owes_a_move);
    }

    #[test]
    fn unknown_command_is_not_found() {
        let masker = Arc::new(std::sync::Mutex::new(engine_core::masker::Masker::new(4)));
        let h = handle(4);
        let mut stage = AtomicStage::new(MahjongLogic::new(4, GameLength::EastOnly), masker);
        stage.handle_stage_begin(&h);
        let result = send(&mut stage, 0, "flibbertigibbet", &h);
        assert_eq!(result, StageResult::NotFound);
    }

    #[test]
    fn tile_arg_rejects_malformed_tokens() {
        let mut reader = TokenReader::new("9x");
        assert!(TileArg.check(&mut reader).is_err());
        let mut reader = TokenReader::new("5p");
        assert_eq!(TileArg.check(&mut reader).unwrap(), BaseTile::pin(5));
    }

    #[test]
    fn module_parses_length_option() {
        let module = MahjongModule;
        let opts = module
            .parse_options(&serde_json::json!({"length": "hanchan"}))
            .unwrap()
            .downcast::<MahjongOptions>()
            .unwrap();
        assert_eq!(opts.length, GameLength::EastSouth);
        assert!(module.parse_options(&serde_json::json!({"length": "nonsense"})).is_err());
    }
}
