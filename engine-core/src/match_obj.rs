//! The match object (§4.6): per-match state, join/leave/configuration,
//! the computer-driver loop, and scoring at game over.

use crate::game_module::{GameModule, MainStageObj};
use crate::registry::MatchRegistry;
use crate::results_store::{ResultsStore, ScoreInfo};
use crate::sink::{BroadcastSender, MessageSink};
use crate::stage::{MatchHandle, StageResult};
use crate::timer::{GraduatedTimer, TimerEvent};
use engine_protocol::{GroupId, MatchId, PlayerId, RequestOutcome, UserId};
use std::collections::HashMap;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MatchState {
    NotStarted,
    IsStarted,
    IsOver,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParticipantState {
    Active,
    Left,
}

/// One user's membership in the match (§3 "Participant").
#[derive(Clone, Debug)]
pub struct Participant {
    pub uid: UserId,
    pub state: ParticipantState,
    pub seats: Vec<PlayerId>,
    /// Whether this user opted to be ejected on `set_multiple` config changes.
    pub leave_on_config_change: bool,
    /// Monotonic join order, used to pick the next host when one leaves.
    join_order: u64,
}

/// One seat in the started match's players vector (§3 "Seat").
#[derive(Clone, Copy, Debug)]
pub enum Seat {
    User { uid: UserId, eliminated: bool },
    Computer { index: u32 },
}

impl Seat {
    pub fn uid(&self) -> Option<UserId> {
        match self {
            Seat::User { uid, .. } => Some(*uid),
            Seat::Computer { .. } => None,
        }
    }
}

/// Reasons `join` can reject, translated to [`RequestOutcome`] by callers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JoinError {
    AlreadyBegin,
    AlreadyInMatch,
    AchieveMaxPlayer,
    ScoreNotEnough,
}

/// The shared, immutable-after-construction pieces every match instance
/// needs: the game module, the outgoing sink, and the results store. Held
/// once in `engine-server`'s container and cloned (cheaply, via `Arc`) into
/// every `Match`.
pub struct MatchEnv {
    pub module: Arc<dyn GameModule>,
    pub sink: Arc<dyn MessageSink>,
    pub results_store: Arc<dyn ResultsStore>,
    pub resource_root: PathBuf,
    /// Handle back to the process-wide registry, used only to deregister a
    /// match that reaches `IS_OVER` purely from a timer firing (§5: "timer
    /// callbacks run on a timer thread ... this prevents a timeout from
    /// racing against a concurrently handled request"). Every other path to
    /// `IS_OVER` is reached from inside a router-driven request, which
    /// deregisters itself after the call returns.
    pub registry: Arc<MatchRegistry>,
}

/// One hosted game instance. Every externally callable operation takes
/// `&self` behind the caller's own `Mutex<Match>` (per §5, one mutex guards
/// each match); interior mutability here is for the pieces a `MatchHandle`
/// must hand out shared references to (the timer slot and the stage tree)
/// while the rest of the struct is mutated directly through `&mut self`
/// from the owning `Mutex` guard.
pub struct Match {
    pub match_id: MatchId,
    pub group_id: Option<GroupId>,
    pub host_uid: UserId,
    pub state: MatchState,
    participants: HashMap<UserId, Participant>,
    join_counter: u64,
    players: Vec<Seat>,
    bench_to: usize,
    multiple: u32,
    raw_options: serde_json::Value,
    main_stage: Mutex<Option<Box<dyn MainStageObj>>>,
    timer: Mutex<Option<GraduatedTimer>>,
    broadcast: BroadcastSender,
    /// The live active-participant list a [`BroadcastSender`] closure reads
    /// from. `BroadcastSender` cannot borrow `Match` itself (it is stored as
    /// one of its own fields), so the set is mirrored here and refreshed by
    /// [`Self::sync_active_uids`] on every membership change instead.
    active_uids: Arc<Mutex<Vec<UserId>>>,
    env: Arc<MatchEnv>,
    /// A weak handle back to the `Arc<tokio::sync::Mutex<Match>>` the
    /// registry stores this match behind, set once by
    /// [`MatchRegistry::new_match`] right after construction. Lets a
    /// timer-thread firing re-acquire the match's own lock (§5) to deliver
    /// `TimerEvent`s without `Match` otherwise needing to know it lives
    /// behind a shared pointer.
    self_handle: Mutex<Option<Weak<tokio::sync::Mutex<Match>>>>,
}

impl Match {
    pub fn new(match_id: MatchId, group_id: Option<GroupId>, host_uid: UserId, env: Arc<MatchEnv>) -> Self {
        let sink = env.sink.clone();
        let active_uids = Arc::new(Mutex::new(vec![host_uid]));
        let active_uids_for_broadcast = active_uids.clone();
        let broadcast = match group_id {
            Some(gid) => BroadcastSender::group_scoped(sink, gid, move || {
                active_uids_for_broadcast.lock().unwrap().clone()
            }),
            None => BroadcastSender::batched(sink, move || active_uids_for_broadcast.lock().unwrap().clone()),
        };
        let mut participants = HashMap::new();
        participants.insert(
            host_uid,
            Participant {
                uid: host_uid,
                state: ParticipantState::Active,
                seats: Vec::new(),
                leave_on_config_change: false,
                join_order: 0,
            },
        );
        Match {
            match_id,
            group_id,
            host_uid,
            state: MatchState::NotStarted,
            participants,
            join_counter: 1,
            players: Vec::new(),
            bench_to: env.module.min_players(),
            multiple: env.module.baseline_multiple(),
            raw_options: serde_json::Value::Null,
            main_stage: Mutex::new(None),
            timer: Mutex::new(None),
            broadcast,
            active_uids,
            env,
            self_handle: Mutex::new(None),
        }
    }

    /// Records the `Arc` this match instance lives behind so its own timer
    /// firings can re-acquire the match lock later. Called once by
    /// [`MatchRegistry::new_match`] immediately after construction.
    pub fn set_self_handle(&self, handle: Weak<tokio::sync::Mutex<Match>>) {
        *self.self_handle.lock().unwrap() = Some(handle);
    }

    fn sync_active_uids(&self) {
        let uids = self.active_participant_uids();
        *self.active_uids.lock().unwrap() = uids;
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn is_over(&self) -> bool {
        self.state == MatchState::IsOver
    }

    pub fn multiple(&self) -> u32 {
        self.multiple
    }

    pub fn module(&self) -> &Arc<dyn GameModule> {
        &self.env.module
    }

    /// Host-only immediate termination, regardless of state — the meta
    /// `Terminate` command (§6). Unlike a leave-driven end, this never
    /// records a result (the match may not even have reached `IS_STARTED`).
    pub fn terminate(&mut self, uid: UserId) -> Result<(), RequestOutcome> {
        if uid != self.host_uid {
            return Err(RequestOutcome::MatchNotHost);
        }
        self.state = MatchState::IsOver;
        Ok(())
    }

    fn active_participant_uids(&self) -> Vec<UserId> {
        self.participants
            .values()
            .filter(|p| p.state == ParticipantState::Active)
            .map(|p| p.uid)
            .collect()
    }

    // -----------------------------------------------------------------
    // join / leave / configuration
    // -----------------------------------------------------------------

    /// `profile_meets_precondition` is only consulted when the match's
    /// current multiple already exceeds the module's baseline (§3's
    /// "the user fails the multiple precondition").
    pub fn join(
        &mut self,
        uid: UserId,
        profile_meets_precondition: impl Fn(UserId, u32) -> bool,
    ) -> Result<(), JoinError> {
        if self.state != MatchState::NotStarted {
            return Err(JoinError::AlreadyBegin);
        }
        if self.participants.contains_key(&uid) {
            return Err(JoinError::AlreadyInMatch);
        }
        if self.participants.len() >= self.env.module.max_players() {
            return Err(JoinError::AchieveMaxPlayer);
        }
        if self.multiple > self.env.module.baseline_multiple()
            && !profile_meets_precondition(uid, self.multiple)
        {
            return Err(JoinError::ScoreNotEnough);
        }
        let join_order = self.join_counter;
        self.join_counter += 1;
        self.participants.insert(
            uid,
            Participant {
                uid,
                state: ParticipantState::Active,
                seats: Vec::new(),
                leave_on_config_change: false,
                join_order,
            },
        );
        self.sync_active_uids();
        Ok(())
    }

    /// Returns `true` if the match should be terminated (every participant
    /// left while started).
    pub fn leave(&mut self, uid: UserId, force: bool) -> Result<bool, RequestOutcome> {
        let Some(participant) = self.participants.get(&uid) else {
            return Err(RequestOutcome::MatchUserNotInMatch);
        };
        if self.state == MatchState::NotStarted {
            let was_host = uid == self.host_uid;
            self.participants.remove(&uid);
            if was_host && !self.participants.is_empty() {
                self.reassign_host();
                let mut sender = self.broadcast.scoped();
                let _ = write!(sender, "{} is now the host", self.host_uid);
            }
            self.sync_active_uids();
            return Ok(self.participants.is_empty());
        }
        if !force {
            return Err(RequestOutcome::MatchAlreadyBegin);
        }
        let seats = participant.seats.clone();
        if let Some(p) = self.participants.get_mut(&uid) {
            p.state = ParticipantState::Left;
        }
        self.sync_active_uids();
        {
            let mut guard = self.main_stage.lock().unwrap();
            if let Some(stage) = guard.as_mut() {
                for pid in seats {
                    stage.handle_leave(pid, self);
                }
            }
        }
        self.run_computer_driver();
        self.check_over_after_routine();
        if self.everyone_left() {
            self.state = MatchState::IsOver;
            return Ok(true);
        }
        Ok(false)
    }

    fn everyone_left(&self) -> bool {
        self.participants
            .values()
            .all(|p| p.state == ParticipantState::Left)
    }

    fn reassign_host(&mut self) {
        if let Some(next) = self
            .participants
            .values()
            .min_by_key(|p| p.join_order)
            .map(|p| p.uid)
        {
            self.host_uid = next;
        }
    }

    /// §4.6 `set_multiple`: host-only, rejects below the multiple precondition,
    /// kicks any non-host participant flagged "leave on config change".
    pub fn set_multiple(
        &mut self,
        uid: UserId,
        value: u32,
        profile_meets_precondition: impl Fn(UserId, u32) -> bool,
    ) -> Result<(), RequestOutcome> {
        if uid != self.host_uid {
            return Err(RequestOutcome::MatchNotHost);
        }
        if value > self.env.module.baseline_multiple() && !profile_meets_precondition(uid, value) {
            return Err(RequestOutcome::MatchScoreNotEnough);
        }
        self.multiple = value;
        let kicked: Vec<UserId> = self
            .participants
            .values()
            .filter(|p| p.uid != self.host_uid && p.leave_on_config_change)
            .map(|p| p.uid)
            .collect();
        for uid in kicked {
            self.participants.remove(&uid);
        }
        self.sync_active_uids();
        {
            let mut sender = self.broadcast.scoped();
            let _ = write!(sender, "multiple set to {value}");
        }
        Ok(())
    }

    /// §4.6 `set_bench_to`: host-only, clamps to the module's max.
    pub fn set_bench_to(&mut self, uid: UserId, n: usize) -> Result<(), RequestOutcome> {
        if uid != self.host_uid {
            return Err(RequestOutcome::MatchNotHost);
        }
        if self.state != MatchState::NotStarted {
            return Err(RequestOutcome::MatchAlreadyBegin);
        }
        self.bench_to = n.min(self.env.module.max_players());
        Ok(())
    }

    /// §4.6 `game_start`: host-only, pre-start only.
    pub fn game_start(&mut self, uid: UserId) -> Result<(), RequestOutcome> {
        if uid != self.host_uid {
            return Err(RequestOutcome::MatchNotHost);
        }
        if self.state != MatchState::NotStarted {
            return Err(RequestOutcome::MatchAlreadyBegin);
        }
        let user_count = self.participants.len();
        let seat_count = user_count.max(self.bench_to).max(self.env.module.min_players());

        let mut ordered_users: Vec<&Participant> = self.participants.values().collect();
        ordered_users.sort_by_key(|p| p.join_order);

        let mut players = Vec::with_capacity(seat_count);
        for p in &ordered_users {
            players.push(Seat::User {
                uid: p.uid,
                eliminated: false,
            });
        }
        for i in 0..(seat_count - user_count) {
            players.push(Seat::Computer { index: i as u32 });
        }
        for (pid, seat) in players.iter().enumerate() {
            if let Seat::User { uid, .. } = seat {
                if let Some(p) = self.participants.get_mut(uid) {
                    p.seats.push(PlayerId(pid as u16));
                }
            }
        }
        self.players = players;

        let options = self
            .env
            .module
            .parse_options(&self.raw_options)
            .map_err(|_| RequestOutcome::MatchUnexpectedConfig)?;
        let mut stage = self.env.module.build_main_stage(options, seat_count);
        stage.handle_stage_begin(self);
        *self.main_stage.lock().unwrap() = Some(stage);

        self.state = MatchState::IsStarted;
        {
            let mut sender = self.broadcast.scoped_at_all();
            sender.push_str("match started");
        }
        self.run_computer_driver();
        self.check_over_after_routine();
        Ok(())
    }

    /// §4.6 `request`.
    pub fn request(
        &mut self,
        uid: UserId,
        is_public: bool,
        reader: &mut crate::checker::TokenReader,
    ) -> RequestOutcome {
        let Some(participant) = self.participants.get(&uid) else {
            return RequestOutcome::MatchUserNotInMatch;
        };
        if participant.state == ParticipantState::Left {
            return RequestOutcome::MatchEliminated;
        }
        let Some(&pid) = participant.seats.first() else {
            return RequestOutcome::MatchUserNotInMatch;
        };

        let private_sender = BroadcastSender::batched(self.env.sink.clone(), move || vec![uid]);
        let mut reply = private_sender.scoped();

        // §4.6: "help" is intercepted before main-stage dispatch.
        if reader.remaining().first().map(|t| t.eq_ignore_ascii_case("help")) == Some(true) {
            let info = {
                let guard = self.main_stage.lock().unwrap();
                guard.as_ref().map(|s| s.command_info(true)).unwrap_or_default()
            };
            reply.push_str(&info);
            return RequestOutcome::GameRequestOk;
        }

        let result = {
            let mut guard = self.main_stage.lock().unwrap();
            let Some(stage) = guard.as_mut() else {
                return RequestOutcome::MatchUserNotInMatch;
            };
            stage.handle_request(reader, pid, is_public, &mut reply, self)
        };
        drop(reply);

        self.run_computer_driver();
        self.check_over_after_routine();

        match result {
            StageResult::Ok => RequestOutcome::GameRequestOk,
            StageResult::Ready => RequestOutcome::GameRequestOk,
            StageResult::Checkout => RequestOutcome::GameRequestCheckout,
            StageResult::Failed => RequestOutcome::GameRequestFailed,
            StageResult::NotFound => RequestOutcome::GameRequestNotFound,
            StageResult::Continue => RequestOutcome::GameRequestUnknown,
        }
    }

    /// §4.6 `show_info`.
    pub fn show_info(&self) -> String {
        let mut out = format!(
            "game: {}\noptions: {}\ncomputers: {}\nstate: {:?}\nhost: {}\ngroup: {}\nmax players: {}\n",
            self.env.module.name(),
            self.raw_options,
            self.computer_count(),
            self.state,
            self.host_uid,
            self.group_id
                .map(|g| g.0.to_string())
                .unwrap_or_else(|| "private".to_string()),
            self.env.module.max_players(),
        );
        if self.state == MatchState::NotStarted {
            out.push_str("signup:");
            let mut uids: Vec<UserId> = self.participants.keys().copied().collect();
            uids.sort_by_key(|u| u.0);
            for uid in uids {
                out.push_str(&format!(" {uid}"));
            }
        } else {
            out.push_str("seats:");
            for (pid, seat) in self.players.iter().enumerate() {
                match seat {
                    Seat::User { uid, .. } => out.push_str(&format!(" {pid}:{uid}")),
                    Seat::Computer { index } => out.push_str(&format!(" {pid}:cpu{index}")),
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------
    // Computer driver (§4.6)
    // -----------------------------------------------------------------

    fn computer_count(&self) -> usize {
        self.players
            .iter()
            .filter(|s| matches!(s, Seat::Computer { .. }))
            .count()
    }

    /// "While the main stage is not over, iterate computer indices modulo
    /// `computer_count`... the loop ends when `computer_count` consecutive
    /// calls return OK (no state change) or the stage reports over." Per the
    /// §9 Open Question, a `FAILED` act resets the consecutive-OK counter
    /// without ending the loop.
    fn run_computer_driver(&mut self) {
        let computer_count = self.computer_count();
        if computer_count == 0 {
            return;
        }
        let computer_pids: Vec<PlayerId> = self
            .players
            .iter()
            .enumerate()
            .filter_map(|(pid, s)| matches!(s, Seat::Computer { .. }).then_some(PlayerId(pid as u16)))
            .collect();

        let mut consecutive_ok = 0usize;
        let mut idx = 0usize;
        loop {
            let over = {
                let guard = self.main_stage.lock().unwrap();
                guard.as_ref().map(|s| s.is_over()).unwrap_or(true)
            };
            if over {
                break;
            }
            let pid = computer_pids[idx % computer_pids.len()];
            let result = {
                let mut guard = self.main_stage.lock().unwrap();
                let Some(stage) = guard.as_mut() else {
                    break;
                };
                stage.handle_computer_act(pid, self)
            };
            match result {
                StageResult::Ok => consecutive_ok += 1,
                _ => consecutive_ok = 0,
            }
            idx += 1;
            if consecutive_ok >= computer_count {
                break;
            }
        }
    }

    fn check_over_after_routine(&mut self) {
        if self.state != MatchState::IsStarted {
            return;
        }
        let over = {
            let guard = self.main_stage.lock().unwrap();
            guard.as_ref().map(|s| s.is_over()).unwrap_or(false)
        };
        if over {
            self.state = MatchState::IsOver;
            self.finish_game();
        }
    }

    // -----------------------------------------------------------------
    // Scoring (§4.6)
    // -----------------------------------------------------------------

    /// `compute_scores`: zero-sum and top/bottom tied-set scores, grounded
    /// in `original_source/bot_core/match.cc::CalScores_`.
    pub fn compute_scores(&self) -> Vec<ScoreInfo> {
        let consts = self.env.module.scoring_constants();
        let guard = self.main_stage.lock().unwrap();
        let Some(stage) = guard.as_ref() else {
            return Vec::new();
        };
        let user_seats: Vec<(UserId, PlayerId)> = self
            .players
            .iter()
            .enumerate()
            .filter_map(|(pid, s)| s.uid().map(|uid| (uid, PlayerId(pid as u16))))
            .collect();
        let u = user_seats.len() as i64;
        if u == 0 {
            return Vec::new();
        }
        let raws: Vec<(UserId, i64)> = user_seats
            .iter()
            .map(|(uid, pid)| (*uid, stage.player_score(*pid)))
            .collect();
        let sum: i64 = raws.iter().map(|(_, r)| *r).sum();
        let abs_dispersion: i64 = raws.iter().map(|(_, r)| (r * u - sum).abs()).sum();

        let max_raw = raws.iter().map(|(_, r)| *r).max().unwrap_or(0);
        let min_raw = raws.iter().map(|(_, r)| *r).min().unwrap_or(0);
        let max_tied_count = raws.iter().filter(|(_, r)| *r == max_raw).count() as i64;
        let min_tied_count = raws.iter().filter(|(_, r)| *r == min_raw).count() as i64;

        raws.into_iter()
            .map(|(uid, raw)| {
                let zero_sum = if abs_dispersion == 0 {
                    0
                } else {
                    (raw * u - sum) * u * consts.k_zss / abs_dispersion * self.multiple as i64
                };
                let mut top = 0;
                if raw == max_raw {
                    top += u * consts.k_tss / max_tied_count.max(1) * self.multiple as i64;
                }
                if raw == min_raw && max_raw != min_raw {
                    top -= u * consts.k_tss / min_tied_count.max(1) * self.multiple as i64;
                }
                ScoreInfo {
                    uid,
                    raw_game_score: raw,
                    zero_sum_score: zero_sum,
                    top_score: top,
                }
            })
            .collect()
    }

    fn finish_game(&mut self) {
        let user_count = self.players.iter().filter(|s| s.uid().is_some()).count();
        if user_count >= 2 && self.multiple > 0 {
            let scores = self.compute_scores();
            let env = self.env.clone();
            let game_name = env.module.name().to_string();
            let group_id = self.group_id;
            let host_uid = self.host_uid;
            let multiple = self.multiple;
            let sink = self.env.sink.clone();
            let active_uids = self.active_participant_uids();
            tokio::spawn(async move {
                let ok = env
                    .results_store
                    .record_match(&game_name, group_id, host_uid, multiple, &scores)
                    .await;
                if !ok {
                    // §7: database failures at match-over are reported to the
                    // group but must not crash the match — it has already
                    // reached IS_OVER by the time this future runs.
                    const MESSAGE: &str = "failed to record match result";
                    match group_id {
                        Some(gid) => sink.post_to_group(gid, MESSAGE),
                        None => {
                            for uid in active_uids {
                                sink.tell_user(uid, MESSAGE);
                            }
                        }
                    }
                }
            });
        }
    }

    /// Delivers one `TimerEvent` fired by this match's own `GraduatedTimer`
    /// (§4.5/§5). Runs under the match's own lock, re-acquired by the timer
    /// thread from [`MatchHandle::start_timer`]'s closure — this is the only
    /// place outside a router-driven request where the stage tree, the
    /// computer driver and the registry deregistration all need to be
    /// re-run, since nothing else observes a timeout-driven checkout.
    pub async fn process_timer_event(&mut self, event: TimerEvent) {
        if self.state != MatchState::IsStarted {
            return;
        }
        match event {
            TimerEvent::Alert { remaining_secs } => {
                let mut sender = self.broadcast.scoped();
                let _ = write!(sender, "{remaining_secs} seconds remaining");
            }
            TimerEvent::Timeout => {
                let result = {
                    let mut guard = self.main_stage.lock().unwrap();
                    match guard.as_mut() {
                        Some(stage) => stage.handle_timeout(self),
                        None => return,
                    }
                };
                let _ = result;
                self.run_computer_driver();
                self.check_over_after_routine();
                if self.is_over() {
                    let registry = self.env.registry.clone();
                    registry.unbind_match(self.match_id, self.group_id).await;
                }
            }
        }
    }

    /// §9 Open Question — `SwitchHost`: pre-start reselects the earliest
    /// remaining user as host; started and over are no-ops returning true if
    /// any user remains.
    pub fn switch_host(&mut self) -> bool {
        if self.participants.is_empty() {
            return true;
        }
        if self.state == MatchState::NotStarted {
            self.reassign_host();
        }
        true
    }
}

impl MatchHandle for Match {
    fn broadcast(&self) -> &BroadcastSender {
        &self.broadcast
    }

    fn user_of(&self, pid: PlayerId) -> Option<UserId> {
        self.players.get(pid.0 as usize).and_then(Seat::uid)
    }

    fn start_timer(&self, total_secs: u64, on_event: Arc<dyn Fn(TimerEvent) + Send + Sync>) {
        let weak = self.self_handle.lock().unwrap().clone();
        let timer = GraduatedTimer::start(total_secs, move |event| {
            on_event(event);
            // §5: the timer thread re-acquires the match's own lock before
            // touching match state, and only after re-checking the
            // "timer-over" flag (handled inside `GraduatedTimer` itself,
            // which never invokes this handler once stopped or fired).
            let Some(weak) = weak.clone() else { return };
            tokio::spawn(async move {
                if let Some(strong) = weak.upgrade() {
                    strong.lock().await.process_timer_event(event).await;
                }
            });
        });
        *self.timer.lock().unwrap() = Some(timer);
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap().as_ref() {
            timer.stop();
        }
    }

    fn resource_dir(&self) -> &std::path::Path {
        &self.env.resource_root
    }

    fn seat_count(&self) -> usize {
        self.players.len()
    }
}
