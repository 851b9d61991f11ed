// FILE: src/engine/mod.rs
pub mod fuzzy;
pub mod mount;
pub mod query;

pub use mount::{MountEngine, MountReport};
pub use query::{QueryEvaluator, QueryFolder, QueryOptions};
