//! Error types for TagMount

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Ranker transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ranker error: {0}")]
    Ranker(String),

    #[error("Edge {parent} -> {child} would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TagError>;
