//! Per-game module abstraction: the options blob, scoring constants and the
//! factory a [`crate::match_obj::Match`] uses to build its stage tree without
//! depending on any concrete game crate.

use crate::stage::{MatchHandle, Stage};

/// Module-level scoring constants from §4.6 ("tuned so that one full round
/// of a canonical game yields scores in the hundreds"). Each game module
/// picks its own triple.
#[derive(Clone, Copy, Debug)]
pub struct ScoringConstants {
    pub k_zss: i64,
    pub k_tss: i64,
    /// The game's typical raw score magnitude at the baseline multiple,
    /// against which §3's multiple precondition is checked:
    /// `baseline_multi * multiple * 2`.
    pub baseline_multi: i64,
}

/// Everything a `Match` needs from a game module to host one instance of it,
/// without depending on the module's concrete stage/logic types.
pub trait GameModule: Send + Sync {
    fn name(&self) -> &'static str;
    /// Minimum and maximum seat count the module supports.
    fn min_players(&self) -> usize;
    fn max_players(&self) -> usize;
    /// The baseline multiple every user may set without a score precondition.
    fn baseline_multiple(&self) -> u32;
    fn scoring_constants(&self) -> ScoringConstants;
    /// Parses a game-specific options blob (already merged with defaults).
    /// Returns an error message on malformed options.
    fn parse_options(&self, raw: &serde_json::Value) -> Result<Box<dyn std::any::Any + Send>, String>;
    /// Builds the root stage for one match instance, given the finalized
    /// options and the seat count. Implementations allocate the tree's
    /// shared masker themselves via [`crate::stage::MainStageRoot::new`].
    fn build_main_stage(
        &self,
        options: Box<dyn std::any::Any + Send>,
        seat_count: usize,
    ) -> Box<dyn MainStageObj>;
}

/// Object-safe view of [`crate::stage::MainStage`] usable through a trait
/// object (the real trait is generic over the child stage type and cannot be
/// made into a trait object directly).
pub trait MainStageObj: Stage {
    fn player_score(&self, pid: engine_protocol::PlayerId) -> i64;
}

impl<S: Stage> MainStageObj for crate::stage::MainStageRoot<S> {
    fn player_score(&self, pid: engine_protocol::PlayerId) -> i64 {
        crate::stage::MainStage::player_score(self, pid)
    }
}

/// A registry of installed game modules, keyed by name (the loader
/// enumerating installed modules is out of scope per §1; this is the thin
/// in-process index the router/match_obj actually consult).
#[derive(Default)]
pub struct ModuleCatalog {
    modules: std::collections::HashMap<&'static str, std::sync::Arc<dyn GameModule>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: std::sync::Arc<dyn GameModule>) {
        self.modules.insert(module.name(), module);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn GameModule>> {
        self.modules.get(name).cloned()
    }
}

// `ModuleCatalog` lives inside `engine-server`'s container behind a
// `std::sync::Mutex`, the same way the teacher's `AppState` wraps `Room`
// lookups; modules are `Arc<dyn GameModule>` (not `Rc`) so the whole thing
// stays `Send`/`Sync` and can be shared across tokio tasks.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::TokenReader;
    use crate::sink::ScopedSender;
    use engine_protocol::PlayerId;

    struct NoopStage;
    impl Stage for NoopStage {
        fn stage_info(&self) -> String {
            "noop".to_string()
        }
        fn command_info(&self, _text_mode: bool) -> String {
            String::new()
        }
        fn handle_stage_begin(&mut self, _handle: &dyn MatchHandle) {}
        fn handle_timeout(&mut self, _handle: &dyn MatchHandle) -> crate::stage::StageResult {
            crate::stage::StageResult::Checkout
        }
        fn handle_request(
            &mut self,
            _reader: &mut TokenReader,
            _pid: PlayerId,
            _is_public: bool,
            _reply: &mut ScopedSender,
            _handle: &dyn MatchHandle,
        ) -> crate::stage::StageResult {
            crate::stage::StageResult::NotFound
        }
        fn handle_leave(&mut self, _pid: PlayerId, _handle: &dyn MatchHandle) -> crate::stage::StageResult {
            crate::stage::StageResult::Ok
        }
        fn handle_computer_act(
            &mut self,
            _pid: PlayerId,
            _handle: &dyn MatchHandle,
        ) -> crate::stage::StageResult {
            crate::stage::StageResult::Ok
        }
        fn is_over(&self) -> bool {
            false
        }
    }

    #[test]
    fn main_stage_root_exposes_player_score_through_the_object_safe_trait() {
        let root: crate::stage::MainStageRoot<NoopStage> = crate::stage::MainStageRoot::new(
            2,
            |_masker| NoopStage,
            |_child, pid| pid.0 as i64 * 10,
        );
        let boxed: Box<dyn MainStageObj> = Box::new(root);
        assert_eq!(boxed.player_score(PlayerId(3)), 30);
    }

    #[test]
    fn catalog_registers_and_looks_up_by_name() {
        struct DummyModule;
        impl GameModule for DummyModule {
            fn name(&self) -> &'static str {
                "DUMMY"
            }
            fn min_players(&self) -> usize {
                2
            }
            fn max_players(&self) -> usize {
                2
            }
            fn baseline_multiple(&self) -> u32 {
                1
            }
            fn scoring_constants(&self) -> ScoringConstants {
                ScoringConstants {
                    k_zss: 100,
                    k_tss: 100,
                    baseline_multi: 100,
                }
            }
            fn parse_options(
                &self,
                _raw: &serde_json::Value,
            ) -> Result<Box<dyn std::any::Any + Send>, String> {
                Ok(Box::new(()))
            }
            fn build_main_stage(
                &self,
                _options: Box<dyn std::any::Any + Send>,
                _seat_count: usize,
            ) -> Box<dyn MainStageObj> {
                unimplemented!()
            }
        }
        let mut catalog = ModuleCatalog::new();
        catalog.register(std::sync::Arc::new(DummyModule));
        assert!(catalog.get("DUMMY").is_some());
        assert!(catalog.get("MISSING").is_none());
    }
}
