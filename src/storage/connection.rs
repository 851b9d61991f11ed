//! Database connection management
//!
//! Every logical operation opens its own short-lived connection, runs inside one
//! transaction and commits before the connection is dropped. CLI processes and
//! the daemon therefore never observe each other's half-applied graph edits.

use std::path::{Path, PathBuf};
use std::time::Duration;
use rusqlite::Connection;
use crate::error::{Result, TagError};
use crate::storage::Repository;

/// Handle to the on-disk tag graph. Cheap to clone; holds no open connection.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Create the database (and its parent directory) if needed and bring the schema up to date.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let db_dir = db_path.parent()
            .ok_or_else(|| TagError::InvalidPath("Invalid database path".into()))?;

        std::fs::create_dir_all(db_dir)?;

        let store = Self { db_path };
        store.transact(|repo| repo.initialize())?;
        tracing::info!("[Store] Database ready at: {}", store.db_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;

        // Enable WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", WAL)?;
        conn.pragma_update(None, "foreign_keys", ON)?;
        conn.pragma_update(None, "synchronous", NORMAL)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(conn)
    }

    /// Run `op` inside a single transaction.
    ///
    /// Commits when `op` returns `Ok`; on `Err` the transaction is rolled back when
    /// it is dropped, so no partial graph state escapes.
    pub fn transact<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Repository<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let value = {
            let repo = Repository::new(&tx);
            op(&repo)?
        };
        tx.commit()?;
        Ok(value)
    }

    /// Read-only access; no explicit transaction.
    pub fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Repository<'_>) -> Result<T>,
    {
        let conn = self.connect()?;
        let repo = Repository::new(&conn);
        op(&repo)
    }
}

// SQL pragma constants
const WAL: &str = "WAL";
const ON: &str = "ON";
const NORMAL: &str = "NORMAL";
