//! Game catalogue hot-reloading (§6's loader that "enumerates installed
//! game modules" is out of scope as a concrete component, but the config
//! file it reads from is not: `GameConfig.json` still gates which of the
//! process's compiled-in [`GameModule`]s actually get registered into the
//! router's [`ModuleCatalog`], mirroring the teacher's `lobby::reload_config`
//! hot-reload of the same file).

use engine_core::game_module::{GameModule, ModuleCatalog};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One entry in `GameConfig.json`: a compiled-in module's name, kept
/// enabled or disabled without a rebuild.
#[derive(Serialize, Deserialize)]
pub struct GameEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

type EntryList = Vec<GameEntry>;

/// Builds the catalog from every compiled-in module whose name appears
/// enabled in `GameConfig.json`. A missing or unparsable file falls back to
/// enabling everything, so a fresh checkout works without hand-authoring the
/// config first.
pub async fn load_catalog(path: &str, modules: Vec<Arc<dyn GameModule>>) -> ModuleCatalog {
    let enabled = match tokio::fs::read_to_string(path).await {
        Ok(text) => match serde_json::from_str::<EntryList>(&text) {
            Ok(entries) => Some(entries),
            Err(e) => {
                tracing::warn!(error = %e, path, "GameConfig.json present but unparsable, enabling all modules");
                None
            }
        },
        Err(_) => {
            tracing::info!(path, "no GameConfig.json found, enabling all compiled-in modules");
            None
        }
    };

    let mut catalog = ModuleCatalog::new();
    for module in modules {
        let is_enabled = enabled
            .as_ref()
            .map(|list| list.iter().any(|e| e.name == module.name() && e.enabled))
            .unwrap_or(true);
        if is_enabled {
            tracing::info!(game = module.name(), "registering game module");
            catalog.register(module);
        } else {
            tracing::info!(game = module.name(), "game module disabled by config");
        }
    }
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::game_module::ScoringConstants;
    use engine_core::stage::MainStageObj;

    struct DummyModule(&'static str);
    impl GameModule for DummyModule {
        fn name(&self) -> &'static str {
            self.0
        }
        fn min_players(&self) -> usize {
            1
        }
        fn max_players(&self) -> usize {
            4
        }
        fn baseline_multiple(&self) -> u32 {
            1
        }
        fn scoring_constants(&self) -> ScoringConstants {
            ScoringConstants { k_zss: 1, k_tss: 1, baseline_multi: 1 }
        }
        fn parse_options(&self, _raw: &serde_json::Value) -> Result<Box<dyn std::any::Any + Send>, String> {
            Ok(Box::new(()))
        }
        fn build_main_stage(&self, _options: Box<dyn std::any::Any + Send>, _seat_count: usize) -> Box<dyn MainStageObj> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn missing_config_enables_everything() {
        let catalog = load_catalog("/nonexistent/GameConfig.json", vec![Arc::new(DummyModule("A"))]).await;
        assert!(catalog.get("A").is_some());
    }
}
