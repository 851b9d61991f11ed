// FILE: src/storage/mod.rs
pub mod connection;
pub mod text_extraction;
pub mod repository;

// Common exports
pub use repository::Repository;
pub use connection::Store;
pub use text_extraction::extract_text_from_file;

use serde::{Deserialize, Serialize};

// Data Types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: u64,
    pub name: String,
    pub path: String,
    pub indexed: bool,
}

impl std::fmt::Display for FileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (id: {})", self.path, self.file_id)
    }
}

/// A file seen through one tag's associations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedFile {
    pub file_id: u64,
    pub path: String,
    pub name: String,
    /// `false` when the association only exists because a descendant tag was applied.
    pub direct: bool,
}

/// A watched source directory feeding the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoImportDir {
    pub path: String,
    pub auto_index_images: bool,
    pub auto_index_texts: bool,
}
