//! TagMount: a tag graph mounted as a plain directory tree.
//!
//! Files carry tags, tags nest under other tags, and the whole graph is
//! rendered as directories of symlinks. The process is split into "organs":
//! - Tagger (graph mutations issued by the CLI)
//! - Mount engine (renders the graph under the mount root)
//! - Librarian (background watchers turning filesystem edits into graph edits)
//! - Oracle (text and image ranking behind the search folders)

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod librarian;
pub mod oracle;
pub mod state;
pub mod storage;
pub mod tagger;

pub use config::Config;
pub use error::{Result, TagError};
pub use librarian::{AutoImporter, FsEvent, Handled, Librarian, MountWatcher};
pub use oracle::{Ranker, SearchKind};
pub use state::{AppState, SearchResult};
pub use storage::{AutoImportDir, FileRecord, Repository, Store};
pub use tagger::{AddReport, ShowMode, Tagger};
