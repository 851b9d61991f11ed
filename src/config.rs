//! Startup configuration.
//!
//! Process-level knobs are parsed once by the CLI (flags or their `TAGMOUNT_*`
//! environment variables) and handed over as a [`Config`]. Settings that must
//! be shared between the CLI and the daemon (mount root, ignore list) live in
//! the store's `meta` table instead, see [`crate::storage::Repository::mount_root`].

use std::path::PathBuf;
use std::time::Duration;

pub const APP_DIR: &str = "tagmount";
pub const DB_FILE: &str = "tagmount.db";
pub const MOUNT_DIR_NAME: &str = "TagMount";

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file backing the tag graph.
    pub db_path: PathBuf,
    /// Base URL of the embedding service. `None` selects the local ranker.
    pub ranker_url: Option<String>,
    /// Quiet window the watchers wait for before draining their event queue.
    pub debounce: Duration,
    /// Seed extension/group tags when files are added.
    pub type_tags: bool,
}

impl Config {
    /// Defaults, with the database at `db_path` or under the user config directory.
    pub fn new(db_path: Option<PathBuf>) -> Self {
        Self {
            db_path: db_path.unwrap_or_else(default_db_path),
            ranker_url: None,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            type_tags: true,
        }
    }

    pub fn with_ranker_url(mut self, url: Option<String>) -> Self {
        self.ranker_url = url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        self
    }

    /// Configuration rooted in an arbitrary directory (used by tests and embedding callers).
    pub fn in_dir(dir: &std::path::Path) -> Self {
        Self {
            db_path: dir.join(DB_FILE),
            ranker_url: None,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            type_tags: false,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join(DB_FILE)
}

/// Default location of the mounted tree when none has been configured.
pub fn default_mount_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(MOUNT_DIR_NAME)
}
