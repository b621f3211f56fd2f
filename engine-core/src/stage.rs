//! Stage framework: the atomic + composite stage abstraction, the checkout
//! protocol, the substage transition helper, and command dispatch.
//!
//! A stage tree is owned top-down: the main stage (the tree root) exclusively
//! owns the tree; a composite stage owns exactly one current substage and
//! replaces it in place on transition. The one piece of state every stage in
//! a tree needs to share is the readiness masker, which conceptually belongs
//! to the main stage (§3 data model) but is consulted by whichever substage
//! is currently active. The source threads this through a back-reference to
//! the main stage; we thread it instead as a `Arc<Mutex<Masker>>` handed
//! down the tree at construction time — the idiomatic Rust way to share one
//! piece of mutable state between a parent and the child it owns without
//! reaching back up through the ownership direction.

use crate::checker::{CheckError, Checker, Keyword, TokenReader};
use crate::masker::Masker;
use crate::sink::{BroadcastSender, ScopedSender};
use crate::timer::TimerEvent;
use engine_protocol::{PlayerId, UserId};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The return-code lattice every stage operation draws from. Handlers
/// restrict themselves to a documented subset per operation (see each
/// `handle_*` method below) rather than the full lattice; Rust has no cheap
/// way to express per-method result subsets without a combinatorial blow-up
/// of marker types, so the restriction is enforced by convention and by the
/// wrapper types in this module, not by the type system.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StageResult {
    Ok,
    Ready,
    Checkout,
    Failed,
    NotFound,
    Continue,
}

/// Why a composite stage's current substage just became over.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CheckoutReason {
    ByRequest,
    ByTimeout,
    ByLeave,
    Skip,
}

/// Everything a stage needs from its enclosing match, without depending on
/// `Match` directly (which would create a cycle between this module and
/// `match_obj`). Implemented by `crate::match_obj::Match`.
pub trait MatchHandle: Send + Sync {
    /// The match's broadcast discipline (group-scoped or batched).
    fn broadcast(&self) -> &BroadcastSender;
    /// The user bound to a seat, or `None` if it is a computer seat.
    fn user_of(&self, pid: PlayerId) -> Option<UserId>;
    /// Starts (superseding any previous) countdown on the match's timer slot.
    /// `on_event` is invoked under the match's own lock.
    fn start_timer(&self, total_secs: u64, on_event: Arc<dyn Fn(TimerEvent) + Send + Sync>);
    fn stop_timer(&self);
    /// Read-only resource directory for the game module (e.g. rule tables).
    fn resource_dir(&self) -> &Path;
    fn seat_count(&self) -> usize;
}

/// A node in the match's stage tree.
pub trait Stage: Send {
    fn stage_info(&self) -> String;
    fn command_info(&self, text_mode: bool) -> String;
    fn handle_stage_begin(&mut self, handle: &dyn MatchHandle);
    /// Returns `FAILED` or `CHECKOUT`.
    fn handle_timeout(&mut self, handle: &dyn MatchHandle) -> StageResult;
    /// Returns `READY`, `OK`, `FAILED`, `CHECKOUT` or `NOT_FOUND`.
    fn handle_request(
        &mut self,
        reader: &mut TokenReader,
        pid: PlayerId,
        is_public: bool,
        reply: &mut ScopedSender,
        handle: &dyn MatchHandle,
    ) -> StageResult;
    /// Returns `OK` or `CHECKOUT`.
    fn handle_leave(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult;
    /// Returns `OK`, `FAILED`, `READY` or `CHECKOUT`.
    fn handle_computer_act(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult;
    fn is_over(&self) -> bool;
}

/// The tree root. Additionally answers `player_score` at game over and owns
/// the canonical masker instance that descendants share.
pub trait MainStage: Stage {
    fn player_score(&self, pid: PlayerId) -> i64;
}

// ---------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------

/// The outcome of trying one command's checker chain against a request.
pub enum CommandAttempt {
    /// The checker chain consumed its tokens and the handler ran.
    Matched(StageResult),
    /// The checker chain rejected at the given position.
    Mismatch(CheckError),
}

struct CommandEntry<Ctx> {
    name: &'static str,
    help: &'static str,
    handler: Box<
        dyn Fn(&mut TokenReader, PlayerId, &mut Ctx, &mut ScopedSender) -> CommandAttempt
            + Send
            + Sync,
    >,
}

/// An ordered list of commands tried in registration order. The first whose
/// checker chain consumes every token executes and its result is returned;
/// otherwise dispatch returns `NOT_FOUND` carrying the most specific
/// (deepest-consuming) positional diagnostic.
pub struct CommandTable<Ctx> {
    entries: Vec<CommandEntry<Ctx>>,
}

impl<Ctx> Default for CommandTable<Ctx> {
    fn default() -> Self {
        CommandTable {
            entries: Vec::new(),
        }
    }
}

impl<Ctx> CommandTable<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: &'static str,
        help: &'static str,
        handler: impl Fn(&mut TokenReader, PlayerId, &mut Ctx, &mut ScopedSender) -> CommandAttempt
        + Send
        + Sync
        + 'static,
    ) -> &mut Self {
        self.entries.push(CommandEntry {
            name,
            help,
            handler: Box::new(handler),
        });
        self
    }

    /// Tries every command against `text`, in order: a command's own leading
    /// keyword (its `name`) is consumed here, before its handler ever runs,
    /// so a handler's checker chain only ever parses the command's
    /// arguments. Returns the result of the first exact match, or
    /// `(NotFound, diagnostic)`.
    pub fn dispatch(
        &self,
        text: &str,
        pid: PlayerId,
        ctx: &mut Ctx,
        reply: &mut ScopedSender,
    ) -> (StageResult, Option<CheckError>) {
        let mut best: Option<CheckError> = None;
        for entry in &self.entries {
            let mut reader = TokenReader::new(text);
            if let Err(err) = Keyword(entry.name).check(&mut reader) {
                Self::keep_best(&mut best, err);
                continue;
            }
            match (entry.handler)(&mut reader, pid, ctx, reply) {
                CommandAttempt::Matched(result) if reader.is_exhausted() => {
                    return (result, None);
                }
                CommandAttempt::Matched(_) => {
                    let err = CheckError {
                        position: reader.position(),
                        expected: "end of command".to_string(),
                    };
                    Self::keep_best(&mut best, err);
                }
                CommandAttempt::Mismatch(err) => {
                    Self::keep_best(&mut best, err);
                }
            }
        }
        (StageResult::NotFound, best)
    }

    fn keep_best(best: &mut Option<CheckError>, candidate: CheckError) {
        if best.as_ref().is_none_or(|b| candidate.position > b.position) {
            *best = Some(candidate);
        }
    }

    /// Renders a help listing, the way `StageBaseWrapper::CommandInfo` does.
    pub fn command_info(&self, stage_name: &str) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut out = format!("\n\n### commands — {stage_name}");
        for (i, entry) in self.entries.iter().enumerate() {
            out.push_str(&format!("\n{}. {} — {}", i + 1, entry.name, entry.help));
        }
        out
    }
}

// ---------------------------------------------------------------------
// Atomic stage
// ---------------------------------------------------------------------

/// Game-specific behavior behind an [`AtomicStage`]. The wrapper supplies the
/// command dispatch / masker / timer boilerplate described in §4.7; the game
/// module supplies everything else.
pub trait AtomicLogic: Send {
    fn name(&self) -> String;
    fn commands(&self) -> CommandTable<Self>
    where
        Self: Sized;
    /// Runs game-specific stage-begin logic, returning a timer duration in
    /// seconds to start (`0` or `None` for no timer).
    fn on_stage_begin(&mut self, handle: &dyn MatchHandle) -> Option<u64>;
    /// Invoked once the masker reports every non-pinned seat ready. Returns
    /// `OK` or `CHECKOUT`.
    fn on_all_ready(&mut self, handle: &dyn MatchHandle) -> StageResult;
    /// Returns `FAILED` or `CHECKOUT`. Defaults to `CHECKOUT`, matching the
    /// framework default described in §4.7.
    fn on_timeout(&mut self, handle: &dyn MatchHandle) -> StageResult {
        let _ = handle;
        StageResult::Checkout
    }
    fn on_leave(&mut self, pid: PlayerId, handle: &dyn MatchHandle) {
        let _ = (pid, handle);
    }
    /// Returns `OK`, `FAILED`, `READY` or `CHECKOUT`.
    fn on_computer_act(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult;
    fn command_info(&self, text_mode: bool) -> String {
        let _ = text_mode;
        String::new()
    }
    /// Runs after every dispatched command (and every computer act), once the
    /// handler's own private reply has already been written. A command's
    /// `reply` only reaches the player who issued it; logic that needs to
    /// tell the rest of the table what just happened (a discard, a call, a
    /// round result) does so here instead, through `handle.broadcast()`.
    /// Defaults to a no-op since most games have nothing to add.
    fn on_after_command(&mut self, result: StageResult, handle: &dyn MatchHandle) {
        let _ = (result, handle);
    }
}

/// Wraps an [`AtomicLogic`] implementation into a full [`Stage`]: owns the
/// stage's timer, forwards command dispatch, and implements the
/// ready-masker protocol from §4.7.
pub struct AtomicStage<L: AtomicLogic> {
    logic: L,
    commands: CommandTable<L>,
    masker: Arc<Mutex<Masker>>,
    is_over: bool,
}

impl<L: AtomicLogic> AtomicStage<L> {
    pub fn new(logic: L, masker: Arc<Mutex<Masker>>) -> Self {
        let commands = logic.commands();
        AtomicStage {
            logic,
            commands,
            masker,
            is_over: false,
        }
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut L {
        &mut self.logic
    }
}

impl<L: AtomicLogic> Stage for AtomicStage<L> {
    fn stage_info(&self) -> String {
        self.logic.name()
    }

    fn command_info(&self, text_mode: bool) -> String {
        let mut out = self.commands.command_info(&self.logic.name());
        out.push_str(&self.logic.command_info(text_mode));
        out
    }

    fn handle_stage_begin(&mut self, handle: &dyn MatchHandle) {
        if let Some(secs) = self.logic.on_stage_begin(handle) {
            // The actual GraduatedTimer lives on the Match (§3: one timer
            // slot per match, the only party that can safely re-acquire its
            // own lock from a spawned task); the stage only requests it be
            // (re)started, and a fresh start always supersedes whatever was
            // running before.
            handle.stop_timer();
            if secs > 0 {
                handle.start_timer(secs, Arc::new(|_event| {}));
            }
        }
    }

    fn handle_timeout(&mut self, handle: &dyn MatchHandle) -> StageResult {
        let result = self.logic.on_timeout(handle);
        if result == StageResult::Checkout {
            self.is_over = true;
        }
        result
    }

    fn handle_request(
        &mut self,
        reader: &mut TokenReader,
        pid: PlayerId,
        is_public: bool,
        reply: &mut ScopedSender,
        handle: &dyn MatchHandle,
    ) -> StageResult {
        let _ = is_public;
        let text = reader.remaining().join(" ");
        let (mut result, _diag) = self.commands.dispatch(&text, pid, &mut self.logic, reply);
        if result == StageResult::Ready {
            let ready = self.masker.lock().unwrap().set(pid.0 as usize);
            result = StageResult::Ok;
            if ready {
                let upgraded = self.logic.on_all_ready(handle);
                if upgraded == StageResult::Checkout {
                    result = StageResult::Checkout;
                }
            }
        }
        self.logic.on_after_command(result, handle);
        if result == StageResult::Checkout {
            self.is_over = true;
        }
        result
    }

    fn handle_leave(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult {
        self.masker.lock().unwrap().pin(pid.0 as usize);
        self.logic.on_leave(pid, handle);
        StageResult::Ok
    }

    fn handle_computer_act(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult {
        let mut result = self.logic.on_computer_act(pid, handle);
        if result == StageResult::Ready {
            let ready = self.masker.lock().unwrap().set(pid.0 as usize);
            result = StageResult::Ok;
            if ready {
                let upgraded = self.logic.on_all_ready(handle);
                if upgraded == StageResult::Checkout {
                    result = StageResult::Checkout;
                }
            }
        }
        self.logic.on_after_command(result, handle);
        if result == StageResult::Checkout {
            self.is_over = true;
        }
        result
    }

    fn is_over(&self) -> bool {
        self.is_over
    }
}

// ---------------------------------------------------------------------
// Composite stage
// ---------------------------------------------------------------------

/// Game-specific behavior behind a [`CompositeStage`]: decides the first
/// substage and, on every substage checkout, the next one. Implemented as a
/// variant-dispatched function rather than the source's inheritance-based
/// transition table, per the §9 design note.
pub trait CompositeLogic: Send {
    fn name(&self) -> String;
    /// Builds the first substage.
    fn first_substage(&mut self, masker: Arc<Mutex<Masker>>) -> Box<dyn Stage>;
    /// Builds the next substage given the one that just became over and why.
    /// `None` means the composite itself is now over.
    fn next_substage(
        &mut self,
        finished: &dyn Stage,
        reason: CheckoutReason,
        masker: Arc<Mutex<Masker>>,
    ) -> Option<Box<dyn Stage>>;
    /// Commands the composite itself answers before falling through to the
    /// current substage (empty by default). Per §4.7 these may only return
    /// `OK` or `FAILED` — a composite-level command never checks a substage
    /// out directly.
    fn commands(&self) -> CommandTable<Self>
    where
        Self: Sized,
    {
        CommandTable::new()
    }
    /// Called before delegating a leave to the current substage.
    fn on_player_leave(&mut self, pid: PlayerId, handle: &dyn MatchHandle) {
        let _ = (pid, handle);
    }
    /// Called before delegating a computer act to the current substage.
    fn on_computer_act(&mut self, pid: PlayerId, handle: &dyn MatchHandle) {
        let _ = (pid, handle);
    }
}

/// Wraps a [`CompositeLogic`] implementation into a full [`Stage`]: owns the
/// current substage and drives the transition loop (including `SKIP`
/// re-entry for a substage that is already over the instant it begins).
pub struct CompositeStage<L: CompositeLogic> {
    logic: L,
    commands: CommandTable<L>,
    masker: Arc<Mutex<Masker>>,
    current: Box<dyn Stage>,
    is_over: bool,
}

impl<L: CompositeLogic> CompositeStage<L> {
    pub fn new(mut logic: L, masker: Arc<Mutex<Masker>>) -> Self {
        let commands = logic.commands();
        let current = logic.first_substage(masker.clone());
        CompositeStage {
            logic,
            commands,
            masker,
            current,
            is_over: false,
        }
    }

    fn advance(&mut self, reason: CheckoutReason, handle: &dyn MatchHandle) {
        let mut reason = reason;
        loop {
            if !self.current.is_over() {
                return;
            }
            match self
                .logic
                .next_substage(self.current.as_ref(), reason, self.masker.clone())
            {
                Some(mut next) => {
                    next.handle_stage_begin(handle);
                    self.current = next;
                    if !self.current.is_over() {
                        return;
                    }
                    reason = CheckoutReason::Skip;
                }
                None => {
                    self.is_over = true;
                    return;
                }
            }
        }
    }
}

impl<L: CompositeLogic> Stage for CompositeStage<L> {
    fn stage_info(&self) -> String {
        format!("{} / {}", self.logic.name(), self.current.stage_info())
    }

    fn command_info(&self, text_mode: bool) -> String {
        self.current.command_info(text_mode)
    }

    fn handle_stage_begin(&mut self, handle: &dyn MatchHandle) {
        self.current.handle_stage_begin(handle);
        if self.current.is_over() {
            self.advance(CheckoutReason::Skip, handle);
        }
    }

    fn handle_timeout(&mut self, handle: &dyn MatchHandle) -> StageResult {
        let result = self.current.handle_timeout(handle);
        if self.current.is_over() {
            self.advance(CheckoutReason::ByTimeout, handle);
            if self.is_over {
                return StageResult::Checkout;
            }
        }
        result
    }

    fn handle_request(
        &mut self,
        reader: &mut TokenReader,
        pid: PlayerId,
        is_public: bool,
        reply: &mut ScopedSender,
        handle: &dyn MatchHandle,
    ) -> StageResult {
        let text = reader.remaining().join(" ");
        let (own_result, _diag) = self.commands.dispatch(&text, pid, &mut self.logic, reply);
        if own_result != StageResult::NotFound {
            return own_result;
        }
        let result = self
            .current
            .handle_request(reader, pid, is_public, reply, handle);
        if self.current.is_over() {
            self.advance(CheckoutReason::ByRequest, handle);
            if self.is_over {
                return StageResult::Checkout;
            }
        }
        result
    }

    fn handle_leave(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult {
        self.logic.on_player_leave(pid, handle);
        let result = self.current.handle_leave(pid, handle);
        if self.current.is_over() {
            self.advance(CheckoutReason::ByLeave, handle);
            if self.is_over {
                return StageResult::Checkout;
            }
        }
        result
    }

    fn handle_computer_act(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult {
        self.logic.on_computer_act(pid, handle);
        let result = self.current.handle_computer_act(pid, handle);
        if self.current.is_over() {
            self.advance(CheckoutReason::ByRequest, handle);
            if self.is_over {
                return StageResult::Checkout;
            }
        }
        result
    }

    fn is_over(&self) -> bool {
        self.is_over
    }
}

// ---------------------------------------------------------------------
// Main stage root
// ---------------------------------------------------------------------

/// Adapts any [`Stage`] into the tree root: owns the canonical masker the
/// whole tree shares and a function from the child stage to a seat's final
/// score.
pub struct MainStageRoot<S: Stage> {
    child: S,
    player_score: Box<dyn Fn(&S, PlayerId) -> i64 + Send>,
}

impl<S: Stage> MainStageRoot<S> {
    /// `build_child` receives the masker the whole tree will share.
    pub fn new(
        seat_count: usize,
        build_child: impl FnOnce(Arc<Mutex<Masker>>) -> S,
        player_score: impl Fn(&S, PlayerId) -> i64 + Send + 'static,
    ) -> Self {
        let masker = Arc::new(Mutex::new(Masker::new(seat_count)));
        MainStageRoot {
            child: build_child(masker),
            player_score: Box::new(player_score),
        }
    }

    pub fn child(&self) -> &S {
        &self.child
    }

    pub fn child_mut(&mut self) -> &mut S {
        &mut self.child
    }
}

impl<S: Stage> Stage for MainStageRoot<S> {
    fn stage_info(&self) -> String {
        self.child.stage_info()
    }

    fn command_info(&self, text_mode: bool) -> String {
        self.child.command_info(text_mode)
    }

    fn handle_stage_begin(&mut self, handle: &dyn MatchHandle) {
        self.child.handle_stage_begin(handle);
    }

    fn handle_timeout(&mut self, handle: &dyn MatchHandle) -> StageResult {
        self.child.handle_timeout(handle)
    }

    fn handle_request(
        &mut self,
        reader: &mut TokenReader,
        pid: PlayerId,
        is_public: bool,
        reply: &mut ScopedSender,
        handle: &dyn MatchHandle,
    ) -> StageResult {
        self.child
            .handle_request(reader, pid, is_public, reply, handle)
    }

    fn handle_leave(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult {
        self.child.handle_leave(pid, handle)
    }

    fn handle_computer_act(&mut self, pid: PlayerId, handle: &dyn MatchHandle) -> StageResult {
        self.child.handle_computer_act(pid, handle)
    }

    fn is_over(&self) -> bool {
        self.child.is_over()
    }
}

impl<S: Stage> MainStage for MainStageRoot<S> {
    fn player_score(&self, pid: PlayerId) -> i64 {
        (self.player_score)(&self.child, pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{BoundedInt, Checker};
    use std::path::PathBuf;

    struct NullHandle {
        broadcast: BroadcastSender,
        dir: PathBuf,
    }

    impl MatchHandle for NullHandle {
        fn broadcast(&self) -> &BroadcastSender {
            &self.broadcast
        }
        fn user_of(&self, pid: PlayerId) -> Option<UserId> {
            Some(UserId(pid.0 as u64))
        }
        fn start_timer(&self, _total_secs: u64, _on_event: Arc<dyn Fn(TimerEvent) + Send + Sync>) {}
        fn stop_timer(&self) {}
        fn resource_dir(&self) -> &Path {
            &self.dir
        }
        fn seat_count(&self) -> usize {
            2
        }
    }

    fn null_handle() -> NullHandle {
        struct NoopSink;
        impl crate::sink::MessageSink for NoopSink {
            fn tell_user(&self, _user: UserId, _text: &str) {}
            fn post_to_group(&self, _group: engine_protocol::GroupId, _text: &str) {}
            fn at_mention(&self, _group: engine_protocol::GroupId, _user: UserId) -> String {
                String::new()
            }
        }
        NullHandle {
            broadcast: BroadcastSender::batched(Arc::new(NoopSink), || vec![]),
            dir: PathBuf::from("."),
        }
    }

    /// A minimal "guess a number" atomic stage used to exercise the generic
    /// framework end to end.
    struct GuessLogic {
        target: i64,
        guessed: [bool; 2],
    }

    impl AtomicLogic for GuessLogic {
        fn name(&self) -> String {
            "guess".to_string()
        }

        fn commands(&self) -> CommandTable<Self> {
            let mut table = CommandTable::new();
            table.add(
                "guess",
                "guess <n>",
                |reader, _pid, logic: &mut GuessLogic, _reply| {
                    match (BoundedInt { min: 0, max: 10 }).check(reader) {
                        Ok(n) => {
                            if n == logic.target {
                                CommandAttempt::Matched(StageResult::Ready)
                            } else {
                                CommandAttempt::Matched(StageResult::Failed)
                            }
                        }
                        Err(e) => CommandAttempt::Mismatch(e),
                    }
                },
            );
            table
        }

        fn on_stage_begin(&mut self, _handle: &dyn MatchHandle) -> Option<u64> {
            None
        }

        fn on_all_ready(&mut self, _handle: &dyn MatchHandle) -> StageResult {
            StageResult::Checkout
        }

        fn on_computer_act(&mut self, pid: PlayerId, _handle: &dyn MatchHandle) -> StageResult {
            self.guessed[pid.0 as usize] = true;
            StageResult::Ready
        }
    }

    #[test]
    fn atomic_stage_checks_out_once_everyone_guesses_right() {
        let masker = Arc::new(Mutex::new(Masker::new(2)));
        let mut stage = AtomicStage::new(
            GuessLogic {
                target: 4,
                guessed: [false, false],
            },
            masker,
        );
        let handle = null_handle();
        let mut reply = BroadcastSender::batched(Arc::new(DummySink), || vec![]).scoped();
        let result = stage.handle_request(
            &mut TokenReader::new("guess 4"),
            PlayerId(0),
            false,
            &mut reply,
            &handle,
        );
        assert_eq!(result, StageResult::Ok);
        assert!(!stage.is_over());

        let result = stage.handle_request(
            &mut TokenReader::new("guess 4"),
            PlayerId(1),
            false,
            &mut reply,
            &handle,
        );
        assert_eq!(result, StageResult::Checkout);
        assert!(stage.is_over());
    }

    #[test]
    fn wrong_guess_is_failed_without_checkout() {
        let masker = Arc::new(Mutex::new(Masker::new(2)));
        let mut stage = AtomicStage::new(
            GuessLogic {
                target: 4,
                guessed: [false, false],
            },
            masker,
        );
        let handle = null_handle();
        let mut reply = BroadcastSender::batched(Arc::new(DummySink), || vec![]).scoped();
        let result = stage.handle_request(
            &mut TokenReader::new("guess 1"),
            PlayerId(0),
            false,
            &mut reply,
            &handle,
        );
        assert_eq!(result, StageResult::Failed);
        assert!(!stage.is_over());
    }

    #[test]
    fn unmatched_command_is_not_found() {
        let masker = Arc::new(Mutex::new(Masker::new(2)));
        let mut stage = AtomicStage::new(
            GuessLogic {
                target: 4,
                guessed: [false, false],
            },
            masker,
        );
        let handle = null_handle();
        let mut reply = BroadcastSender::batched(Arc::new(DummySink), || vec![]).scoped();
        let result = stage.handle_request(
            &mut TokenReader::new("nonsense"),
            PlayerId(0),
            false,
            &mut reply,
            &handle,
        );
        assert_eq!(result, StageResult::NotFound);
    }

    struct DummySink;
    impl crate::sink::MessageSink for DummySink {
        fn tell_user(&self, _user: UserId, _text: &str) {}
        fn post_to_group(&self, _group: engine_protocol::GroupId, _text: &str) {}
        fn at_mention(&self, _group: engine_protocol::GroupId, _user: UserId) -> String {
            String::new()
        }
    }

    #[test]
    fn leave_pins_the_seat_in_the_masker() {
        let masker = Arc::new(Mutex::new(Masker::new(2)));
        let mut stage = AtomicStage::new(
            GuessLogic {
                target: 4,
                guessed: [false, false],
            },
            masker.clone(),
        );
        let handle = null_handle();
        stage.handle_leave(PlayerId(0), &handle);
        // A pinned seat can never block readiness again.
        assert!(!masker.lock().unwrap().is_ready());
        masker.lock().unwrap().set(1);
        assert!(masker.lock().unwrap().is_ready());
    }

    #[test]
    fn dispatch_reports_deepest_positional_diagnostic() {
        let mut table: CommandTable<()> = CommandTable::new();
        table.add("go", "go", |_reader, _pid, _ctx, _reply| {
            CommandAttempt::Matched(StageResult::Ok)
        });
        table.add("start", "start <n>", |reader, _pid, _ctx, _reply| {
            match (BoundedInt { min: 0, max: 5 }).check(reader) {
                Ok(_) => CommandAttempt::Matched(StageResult::Ok),
                Err(e) => CommandAttempt::Mismatch(e),
            }
        });
        let mut reply = BroadcastSender::batched(Arc::new(DummySink), || vec![]).scoped();
        // "go" rejects at position 0 (its own name never matches "start"); "start"
        // consumes its name and only then fails to parse "nine" as an integer at
        // position 1, a strictly deeper rejection that wins as the diagnostic.
        let (result, diag) = table.dispatch("start nine", PlayerId(0), &mut (), &mut reply);
        assert_eq!(result, StageResult::NotFound);
        assert_eq!(diag.unwrap().position, 1);
    }

    /// A no-op atomic stage that checks out the instant it begins, used to
    /// exercise a composite's `SKIP` re-entry loop.
    struct ImmediateLogic;

    impl AtomicLogic for ImmediateLogic {
        fn name(&self) -> String {
            "immediate".to_string()
        }
        fn commands(&self) -> CommandTable<Self> {
            CommandTable::new()
        }
        fn on_stage_begin(&mut self, _handle: &dyn MatchHandle) -> Option<u64> {
            None
        }
        fn on_all_ready(&mut self, _handle: &dyn MatchHandle) -> StageResult {
            StageResult::Checkout
        }
        fn on_computer_act(&mut self, _pid: PlayerId, _handle: &dyn MatchHandle) -> StageResult {
            StageResult::Checkout
        }
        fn on_leave(&mut self, _pid: PlayerId, _handle: &dyn MatchHandle) {}
    }

    struct TwoRoundLogic {
        round: u32,
    }

    impl CompositeLogic for TwoRoundLogic {
        fn name(&self) -> String {
            "two-round".to_string()
        }

        fn first_substage(&mut self, masker: Arc<Mutex<Masker>>) -> Box<dyn Stage> {
            self.round = 1;
            let mut stage = AtomicStage::new(ImmediateLogic, masker);
            // An atomic stage that checks out on its very first computer act
            // simulates "already over" so the composite exercises SKIP.
            stage.is_over = true;
            Box::new(stage)
        }

        fn next_substage(
            &mut self,
            _finished: &dyn Stage,
            _reason: CheckoutReason,
            masker: Arc<Mutex<Masker>>,
        ) -> Option<Box<dyn Stage>> {
            if self.round == 1 {
                self.round = 2;
                Some(Box::new(AtomicStage::new(
                    GuessLogic {
                        target: 1,
                        guessed: [false, false],
                    },
                    masker,
                )))
            } else {
                None
            }
        }
    }

    #[test]
    fn composite_skips_an_already_over_substage_then_runs_the_next() {
        let masker = Arc::new(Mutex::new(Masker::new(2)));
        let mut composite = CompositeStage::new(TwoRoundLogic { round: 0 }, masker);
        let handle = null_handle();
        composite.handle_stage_begin(&handle);
        assert!(!composite.is_over());

        // Proves the second round's GuessLogic(target=1) is now live: a
        // correct guess from every seat checks the composite itself out.
        let mut reply = BroadcastSender::batched(Arc::new(DummySink), || vec![]).scoped();
        composite.handle_request(
            &mut TokenReader::new("guess 1"),
            PlayerId(0),
            false,
            &mut reply,
            &handle,
        );
        let result = composite.handle_request(
            &mut TokenReader::new("guess 1"),
            PlayerId(1),
            false,
            &mut reply,
            &handle,
        );
        assert_eq!(result, StageResult::Checkout);
        assert!(composite.is_over());
    }
}
