//! Application state: engine wiring from environment and TOML config.
//!
//! This module owns startup composition only: load the config, build the
//! riddle catalog (seeds + bank), pick the store, hand everything to the
//! engine. Request handlers never see anything but `AppState.engine`.

use std::sync::Arc;

use tracing::instrument;

use crate::catalog::RiddleCatalog;
use crate::config::load_game_config_from_env;
use crate::engine::Engine;
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Build state from env: load config, build the catalog, init the engine.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_game_config_from_env();
        let economy = cfg.as_ref().map(|c| c.economy.clone()).unwrap_or_default();
        let catalog = Arc::new(RiddleCatalog::from_config(cfg.as_ref()));
        // In-memory reference store; swap behind the PlayerStore trait for
        // anything durable.
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(Engine::new(store, catalog, economy));
        Self { engine }
    }
}
