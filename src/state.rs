// FILE: src/state.rs

use std::path::Path;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::config::Config;
use crate::error::Result;
use crate::oracle::{self, LocalRanker, Ranker};
use crate::storage::Store;

/// Shared handles for the CLI, the tagger and every watcher.
///
/// Holds no open connection: each logical operation opens its own through
/// [`Store::transact`]. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub ranker: Arc<dyn Ranker>,
}

impl AppState {
    /// Opens the store named by `config` and selects the ranker.
    pub fn open(config: Config) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        let ranker = oracle::select_ranker(&config, &store);
        Ok(Self { config, store, ranker })
    }

    /// Store-backed state with the local ranker and no service lookup.
    pub fn local(config: Config) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        let ranker: Arc<dyn Ranker> = Arc::new(LocalRanker::new(store.clone()));
        Ok(Self { config, store, ranker })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("ranker", &self.ranker.name())
            .finish()
    }
}

/// Result of a semantic search operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub abs_path: String,
    pub score: f32,
    pub filename: String,
}

impl SearchResult {
    pub fn new(abs_path: String, score: f32) -> Self {
        let filename = Path::new(&abs_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| abs_path.clone());
        Self { abs_path, score, filename }
    }
}
