// FILE: src/storage/repository.rs
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use rusqlite::{Connection, OptionalExtension, params};
use crate::error::{Result, TagError};
use crate::storage::{AutoImportDir, FileRecord, TaggedFile};

const META_MOUNT_ROOT: &str = "mount_root";
const META_IGNORE_LIST: &str = "ignore_list";
const DEFAULT_IGNORE_LIST: &str = "node_modules,__pycache__";

pub struct Repository<'a> {
    conn: &'a Connection,
}

impl<'a> Repository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn initialize(&self) -> Result<()> {
        // 1. Settings shared by CLI and daemon
        self.conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS meta (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL
            );
        "#)?;

        // 2. Files (The Warehouse)
        self.conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                extracted_text TEXT,
                indexed INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_files_name ON files(name COLLATE NOCASE);
        "#)?;

        // 3. Taxonomy: tag names are interned case-insensitively
        self.conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS tags (
                tag_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );
        "#)?;

        // 4. The Graph (File <-> Tag). `inherited` marks denormalized ancestor rows.
        self.conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS tags_files (
                tag_id INTEGER NOT NULL,
                file_id INTEGER NOT NULL,
                value TEXT,
                inherited INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tag_id, file_id),
                FOREIGN KEY (tag_id) REFERENCES tags(tag_id) ON DELETE CASCADE,
                FOREIGN KEY (file_id) REFERENCES files(file_id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_tags_files_file ON tags_files(file_id);
        "#)?;

        // 5. The DAG (Tag <-> Tag)
        self.conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS tags_tags (
                parent_tag_id INTEGER NOT NULL,
                children_tag_id INTEGER NOT NULL,
                PRIMARY KEY (parent_tag_id, children_tag_id),
                FOREIGN KEY (parent_tag_id) REFERENCES tags(tag_id) ON DELETE CASCADE,
                FOREIGN KEY (children_tag_id) REFERENCES tags(tag_id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_tags_tags_child ON tags_tags(children_tag_id);
        "#)?;

        // 6. Auto-import sources
        self.conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS auto_import_dirs (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                auto_index_images INTEGER NOT NULL DEFAULT 0,
                auto_index_texts INTEGER NOT NULL DEFAULT 0
            );
        "#)?;

        let default_root = crate::config::default_mount_root();
        self.conn.execute(
            "INSERT OR IGNORE INTO meta (name, value) VALUES (?1, ?2), (?3, ?4)",
            params![
                META_MOUNT_ROOT, default_root.to_string_lossy(),
                META_IGNORE_LIST, DEFAULT_IGNORE_LIST
            ],
        )?;

        Ok(())
    }

    // ---------------------------------------------------------------- meta

    fn get_meta(&self, name: &str) -> Result<Option<String>> {
        Ok(self.conn.query_row(
            "SELECT value FROM meta WHERE name = ?1",
            params![name],
            |r| r.get(0),
        ).optional()?)
    }

    fn set_meta(&self, name: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    pub fn mount_root(&self) -> Result<PathBuf> {
        Ok(self.get_meta(META_MOUNT_ROOT)?
            .map(PathBuf::from)
            .unwrap_or_else(crate::config::default_mount_root))
    }

    /// Stores `<dir>/TagMount` as the mount root.
    pub fn set_mount_root(&self, dir: &Path) -> Result<PathBuf> {
        let root = dir.join(crate::config::MOUNT_DIR_NAME);
        self.set_meta(META_MOUNT_ROOT, &root.to_string_lossy())?;
        Ok(root)
    }

    pub fn ignore_list(&self) -> Result<Vec<String>> {
        let raw = self.get_meta(META_IGNORE_LIST)?.unwrap_or_default();
        Ok(raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect())
    }

    // ---------------------------------------------------------------- files

    /// Registers a file. Returns `None` when the path is already known.
    pub fn add_file(&self, path: &Path) -> Result<Option<u64>> {
        let path_str = path.to_string_lossy();
        let name = file_name_of(path)?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO files (name, path) VALUES (?1, ?2)
             ON CONFLICT(path) DO NOTHING
             RETURNING file_id"
        )?;
        Ok(stmt.query_row(params![name, path_str], |row| row.get(0)).optional()?)
    }

    /// Returns the id of `path`, registering it first if needed.
    pub fn ensure_file(&self, path: &Path) -> Result<u64> {
        if let Some(id) = self.add_file(path)? {
            return Ok(id);
        }
        self.file_by_path(path)?
            .map(|f| f.file_id)
            .ok_or_else(|| TagError::State(format!("File vanished during upsert: {}", path.display())))
    }

    pub fn file_by_path(&self, path: &Path) -> Result<Option<FileRecord>> {
        Ok(self.conn.query_row(
            "SELECT file_id, name, path, indexed FROM files WHERE path = ?1",
            params![path.to_string_lossy()],
            file_record,
        ).optional()?)
    }

    pub fn file_by_id(&self, file_id: u64) -> Result<Option<FileRecord>> {
        Ok(self.conn.query_row(
            "SELECT file_id, name, path, indexed FROM files WHERE file_id = ?1",
            params![file_id],
            file_record,
        ).optional()?)
    }

    pub fn files_by_name(&self, name: &str) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_id, name, path, indexed FROM files
             WHERE name = ?1 COLLATE NOCASE ORDER BY file_id"
        )?;
        let rows = stmt.query_map(params![name], file_record)?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }

    /// Deletes a file and every association it carries.
    pub fn remove_file(&self, path: &Path) -> Result<bool> {
        let Some(record) = self.file_by_path(path)? else { return Ok(false) };
        self.conn.execute("DELETE FROM tags_files WHERE file_id = ?1", params![record.file_id])?;
        self.conn.execute("DELETE FROM files WHERE file_id = ?1", params![record.file_id])?;
        Ok(true)
    }

    /// Points a known file at its new location. Returns `false` if `old` is unknown.
    ///
    /// When `new` is already registered the two rows are folded: the old row's
    /// associations move onto the existing one and the old row is deleted.
    pub fn update_file_path(&self, old: &Path, new: &Path) -> Result<bool> {
        let Some(moved) = self.file_by_path(old)? else { return Ok(false) };
        if let Some(existing) = self.file_by_path(new)? {
            if existing.file_id != moved.file_id {
                self.conn.execute(
                    "UPDATE OR IGNORE tags_files SET file_id = ?1 WHERE file_id = ?2",
                    params![existing.file_id, moved.file_id],
                )?;
                self.conn.execute("DELETE FROM tags_files WHERE file_id = ?1", params![moved.file_id])?;
                self.conn.execute("DELETE FROM files WHERE file_id = ?1", params![moved.file_id])?;
            }
            return Ok(true);
        }
        let rows = self.conn.execute(
            "UPDATE files SET path = ?1, name = ?2 WHERE path = ?3",
            params![new.to_string_lossy(), file_name_of(new)?, old.to_string_lossy()],
        )?;
        Ok(rows > 0)
    }

    pub fn all_files(&self, show_path: bool) -> Result<Vec<String>> {
        let sql = if show_path {
            "SELECT path FROM files ORDER BY file_id"
        } else {
            "SELECT name FROM files ORDER BY file_id"
        };
        self.strings(sql, [])
    }

    pub fn indexed_files(&self, show_path: bool) -> Result<Vec<String>> {
        let sql = if show_path {
            "SELECT path FROM files WHERE indexed = 1 ORDER BY file_id"
        } else {
            "SELECT name FROM files WHERE indexed = 1 ORDER BY file_id"
        };
        self.strings(sql, [])
    }

    pub fn unindexed_file_paths(&self) -> Result<Vec<String>> {
        self.strings("SELECT path FROM files WHERE indexed = 0 ORDER BY file_id", [])
    }

    pub fn set_extracted_text(&self, path: &Path, text: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE files SET extracted_text = ?1, indexed = 1 WHERE path = ?2",
            params![text, path.to_string_lossy()],
        )?;
        Ok(rows > 0)
    }

    /// `(path, extracted_text)` for every indexed file.
    pub fn indexed_texts(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, extracted_text FROM files
             WHERE indexed = 1 AND extracted_text IS NOT NULL ORDER BY file_id"
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }

    // ---------------------------------------------------------------- tags

    /// Interns a tag name (case-insensitive) and returns its id.
    ///
    /// Names must be usable as a single directory name.
    pub fn add_tag(&self, name: &str) -> Result<u64> {
        if !is_valid_tag_name(name) {
            return Err(TagError::InvalidPath(format!("Invalid tag name: {:?}", name)));
        }
        self.conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![name])?;
        self.tag_id(name)?
            .ok_or_else(|| TagError::State(format!("Tag vanished during upsert: {}", name)))
    }

    pub fn tag_id(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.conn.query_row(
            "SELECT tag_id FROM tags WHERE name = ?1",
            params![name],
            |r| r.get(0),
        ).optional()?)
    }

    pub fn tag_name(&self, tag_id: u64) -> Result<Option<String>> {
        Ok(self.conn.query_row(
            "SELECT name FROM tags WHERE tag_id = ?1",
            params![tag_id],
            |r| r.get(0),
        ).optional()?)
    }

    pub fn all_tag_names(&self) -> Result<Vec<String>> {
        self.strings("SELECT name FROM tags ORDER BY tag_id", [])
    }

    pub fn all_tags(&self) -> Result<Vec<(u64, String)>> {
        self.id_names("SELECT tag_id, name FROM tags ORDER BY tag_id", [])
    }

    /// Deletes a tag with its edges and associations. Unknown names are a no-op.
    pub fn remove_tag(&self, name: &str) -> Result<bool> {
        let Some(tag_id) = self.tag_id(name)? else { return Ok(false) };
        self.conn.execute("DELETE FROM tags_files WHERE tag_id = ?1", params![tag_id])?;
        self.conn.execute(
            "DELETE FROM tags_tags WHERE parent_tag_id = ?1 OR children_tag_id = ?1",
            params![tag_id],
        )?;
        self.conn.execute("DELETE FROM tags WHERE tag_id = ?1", params![tag_id])?;
        Ok(true)
    }

    /// Folds every edge and association of `a` into `b`, then deletes `a`.
    pub fn merge_tag(&self, a: &str, b: &str) -> Result<bool> {
        let Some(a_id) = self.tag_id(a)? else { return Ok(false) };
        let b_id = self.add_tag(b)?;
        if a_id == b_id {
            return Ok(false);
        }

        // A direct row on `a` must stay direct after the fold
        self.conn.execute(
            "UPDATE tags_files SET inherited = 0
             WHERE tag_id = ?1 AND file_id IN
                (SELECT file_id FROM tags_files WHERE tag_id = ?2 AND inherited = 0)",
            params![b_id, a_id],
        )?;
        self.conn.execute(
            "UPDATE OR IGNORE tags_files SET tag_id = ?1 WHERE tag_id = ?2",
            params![b_id, a_id],
        )?;
        self.conn.execute(
            "UPDATE OR IGNORE tags_tags SET parent_tag_id = ?1 WHERE parent_tag_id = ?2",
            params![b_id, a_id],
        )?;
        self.conn.execute(
            "UPDATE OR IGNORE tags_tags SET children_tag_id = ?1 WHERE children_tag_id = ?2",
            params![b_id, a_id],
        )?;
        // An edge between a and b collapses into a self-loop
        self.conn.execute(
            "DELETE FROM tags_tags WHERE parent_tag_id = ?1 AND children_tag_id = ?1",
            params![b_id],
        )?;
        if let Some(name) = self.tag_name(a_id)? {
            self.remove_tag(&name)?;
        }
        Ok(true)
    }

    pub fn root_tags(&self) -> Result<Vec<(u64, String)>> {
        self.id_names(
            "SELECT tag_id, name FROM tags WHERE tag_id NOT IN
                (SELECT children_tag_id FROM tags_tags)
             ORDER BY tag_id",
            [],
        )
    }

    pub fn children_of(&self, tag_id: u64) -> Result<Vec<(u64, String)>> {
        self.id_names(
            "SELECT t.tag_id, t.name FROM tags t
             JOIN tags_tags tt ON t.tag_id = tt.children_tag_id
             WHERE tt.parent_tag_id = ?1
             ORDER BY t.tag_id",
            params![tag_id],
        )
    }

    pub fn parents_of(&self, tag_name: &str) -> Result<Vec<String>> {
        self.strings(
            "SELECT p.name FROM tags p
             JOIN tags_tags tt ON p.tag_id = tt.parent_tag_id
             JOIN tags c ON c.tag_id = tt.children_tag_id
             WHERE c.name = ?1
             ORDER BY p.tag_id",
            params![tag_name],
        )
    }

    pub fn leaf_tag_ids(&self) -> Result<HashSet<u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_id FROM tags WHERE tag_id NOT IN (SELECT parent_tag_id FROM tags_tags)"
        )?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        let mut ids = HashSet::new();
        for r in rows { ids.insert(r?); }
        Ok(ids)
    }

    /// Every transitive ancestor of `tag_id` (excluding itself unless a cycle exists).
    pub fn ancestors_of(&self, tag_id: u64) -> Result<Vec<u64>> {
        // UNION (not UNION ALL) terminates even on a corrupted, cyclic graph
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE ancestors(id) AS (
                SELECT parent_tag_id FROM tags_tags WHERE children_tag_id = ?1
                UNION
                SELECT tt.parent_tag_id FROM tags_tags tt
                JOIN ancestors a ON tt.children_tag_id = a.id
             )
             SELECT id FROM ancestors"
        )?;
        let rows = stmt.query_map(params![tag_id], |r| r.get(0))?;
        let mut ids = Vec::new();
        for r in rows { ids.push(r?); }
        Ok(ids)
    }

    /// Adds `parent -> child`, creating both tags if needed.
    ///
    /// Rejects self-edges and edges that would close a cycle.
    pub fn add_edge(&self, parent: &str, child: &str) -> Result<()> {
        let parent_id = self.add_tag(parent)?;
        let child_id = self.add_tag(child)?;
        if parent_id == child_id || self.ancestors_of(parent_id)?.contains(&child_id) {
            return Err(TagError::Cycle { parent: parent.to_string(), child: child.to_string() });
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO tags_tags (parent_tag_id, children_tag_id) VALUES (?1, ?2)",
            params![parent_id, child_id],
        )?;
        Ok(())
    }

    /// Detaches `child` from `parent`. Missing tags or edges are a no-op.
    pub fn remove_edge(&self, parent: &str, child: &str) -> Result<bool> {
        let (Some(parent_id), Some(child_id)) = (self.tag_id(parent)?, self.tag_id(child)?) else {
            return Ok(false);
        };
        let rows = self.conn.execute(
            "DELETE FROM tags_tags WHERE parent_tag_id = ?1 AND children_tag_id = ?2",
            params![parent_id, child_id],
        )?;
        Ok(rows > 0)
    }

    pub fn edge_exists(&self, parent: &str, child: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tags_tags tt
             JOIN tags p ON p.tag_id = tt.parent_tag_id
             JOIN tags c ON c.tag_id = tt.children_tag_id
             WHERE p.name = ?1 AND c.name = ?2",
            params![parent, child],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// `(parent, child)` names of every edge.
    pub fn all_edges(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name, c.name FROM tags_tags tt
             JOIN tags p ON p.tag_id = tt.parent_tag_id
             JOIN tags c ON c.tag_id = tt.children_tag_id
             ORDER BY tt.parent_tag_id, tt.children_tag_id"
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }

    // ---------------------------------------------------------------- associations

    /// Links a file to a tag. A direct link upgrades an existing inherited one, never the reverse.
    pub fn add_association(&self, tag_id: u64, file_id: u64, value: Option<&str>, inherited: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tags_files (tag_id, file_id, value, inherited) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tag_id, file_id) DO UPDATE SET
                 inherited = MIN(inherited, excluded.inherited),
                 value = COALESCE(excluded.value, value)",
            params![tag_id, file_id, value, inherited as i32],
        )?;
        Ok(())
    }

    /// Removes the link between `tag_name` and every file called `file_name`.
    /// Returns the paths of the files that lost the tag.
    pub fn remove_association(&self, tag_name: &str, file_name: &str) -> Result<Vec<String>> {
        let Some(tag_id) = self.tag_id(tag_name)? else { return Ok(Vec::new()) };
        let mut untagged = Vec::new();
        for file in self.files_tagged(tag_id)? {
            if file.name.eq_ignore_ascii_case(file_name) && self.remove_association_by_id(tag_id, file.file_id)? {
                untagged.push(file.path);
            }
        }
        Ok(untagged)
    }

    pub fn remove_association_by_id(&self, tag_id: u64, file_id: u64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM tags_files WHERE tag_id = ?1 AND file_id = ?2",
            params![tag_id, file_id],
        )?;
        Ok(rows > 0)
    }

    /// All files carrying `tag_id`, inherited links included, ordered by file id.
    pub fn files_tagged(&self, tag_id: u64) -> Result<Vec<TaggedFile>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.file_id, f.path, f.name, tf.inherited FROM files f
             JOIN tags_files tf ON f.file_id = tf.file_id
             WHERE tf.tag_id = ?1
             ORDER BY f.file_id"
        )?;
        let rows = stmt.query_map(params![tag_id], |row| {
            Ok(TaggedFile {
                file_id: row.get(0)?,
                path: row.get(1)?,
                name: row.get(2)?,
                direct: row.get::<_, i32>(3)? == 0,
            })
        })?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }

    /// Files tagged with exactly `tag_name`, optionally filtered by a `*`-wildcard value pattern.
    pub fn files_by_tag(&self, tag_name: &str, value_pattern: Option<&str>, show_path: bool) -> Result<Vec<String>> {
        let column = if show_path { "f.path" } else { "f.name" };
        match value_pattern {
            Some(pattern) => {
                let sql = format!(
                    "SELECT {column} FROM files f
                     JOIN tags_files tf ON f.file_id = tf.file_id
                     JOIN tags t ON t.tag_id = tf.tag_id
                     WHERE t.name = ?1 AND tf.value LIKE ?2 ESCAPE '\\'
                     ORDER BY f.file_id"
                );
                self.strings(&sql, params![tag_name, like_pattern(pattern)])
            }
            None => {
                let sql = format!(
                    "SELECT {column} FROM files f
                     JOIN tags_files tf ON f.file_id = tf.file_id
                     JOIN tags t ON t.tag_id = tf.tag_id
                     WHERE t.name = ?1
                     ORDER BY f.file_id"
                );
                self.strings(&sql, params![tag_name])
            }
        }
    }

    pub fn tags_of_file(&self, file_name: &str) -> Result<Vec<String>> {
        self.strings(
            "SELECT DISTINCT t.name FROM tags t
             JOIN tags_files tf ON t.tag_id = tf.tag_id
             JOIN files f ON f.file_id = tf.file_id
             WHERE f.name = ?1 COLLATE NOCASE
             ORDER BY t.tag_id",
            params![file_name],
        )
    }

    // ---------------------------------------------------------------- auto-import

    pub fn add_auto_import_dir(&self, dir: &AutoImportDir) -> Result<()> {
        self.conn.execute(
            "INSERT INTO auto_import_dirs (path, auto_index_images, auto_index_texts) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET
                 auto_index_images = excluded.auto_index_images,
                 auto_index_texts = excluded.auto_index_texts",
            params![dir.path, dir.auto_index_images as i32, dir.auto_index_texts as i32],
        )?;
        Ok(())
    }

    pub fn remove_auto_import_dir(&self, path: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM auto_import_dirs WHERE path = ?1", params![path])?;
        Ok(rows > 0)
    }

    pub fn auto_import_dirs(&self) -> Result<Vec<AutoImportDir>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, auto_index_images, auto_index_texts FROM auto_import_dirs ORDER BY id"
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AutoImportDir {
                path: row.get(0)?,
                auto_index_images: row.get::<_, i32>(1)? != 0,
                auto_index_texts: row.get::<_, i32>(2)? != 0,
            })
        })?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }

    // ---------------------------------------------------------------- helpers

    fn strings<P: rusqlite::Params>(&self, sql: &str, p: P) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(p, |r| r.get(0))?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }

    fn id_names<P: rusqlite::Params>(&self, sql: &str, p: P) -> Result<Vec<(u64, String)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(p, |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        Ok(results)
    }
}

fn file_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        indexed: row.get::<_, i32>(3)? != 0,
    })
}

fn is_valid_tag_name(name: &str) -> bool {
    !name.trim().is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TagError::InvalidPath(path.display().to_string()))
}

/// Turns a user value pattern into a LIKE pattern: `*` is the only wildcard.
fn like_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '\\' | '%' | '_' => { out.push('\\'); out.push(c); }
            '*' => out.push('%'),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("graph.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_tag_names_are_case_insensitive() {
        let (_dir, store) = store();
        store.transact(|repo| {
            let a = repo.add_tag("Work")?;
            let b = repo.add_tag("work")?;
            assert_eq!(a, b);
            assert_eq!(repo.all_tag_names()?, vec!["Work".to_string()]);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_duplicate_file_add_reports_none() {
        let (_dir, store) = store();
        store.transact(|repo| {
            assert!(repo.add_file(Path::new("/data/a.txt"))?.is_some());
            assert!(repo.add_file(Path::new("/data/a.txt"))?.is_none());
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_add_edge_rejects_cycles() {
        let (_dir, store) = store();
        store.transact(|repo| {
            repo.add_edge("A", "B")?;
            repo.add_edge("B", "C")?;
            assert!(matches!(repo.add_edge("C", "A"), Err(TagError::Cycle { .. })));
            assert!(matches!(repo.add_edge("A", "A"), Err(TagError::Cycle { .. })));
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_roots_and_leaves() {
        let (_dir, store) = store();
        store.transact(|repo| {
            repo.add_edge("2024", "Work")?;
            let names: Vec<String> = repo.root_tags()?.into_iter().map(|(_, n)| n).collect();
            assert_eq!(names, vec!["2024".to_string()]);
            let work = repo.tag_id("Work")?.unwrap();
            assert!(repo.leaf_tag_ids()?.contains(&work));
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_direct_link_upgrades_inherited() {
        let (_dir, store) = store();
        store.transact(|repo| {
            let tag = repo.add_tag("2024")?;
            let file = repo.ensure_file(Path::new("/data/report.pdf"))?;
            let direct = |repo: &Repository<'_>| -> Result<usize> {
                Ok(repo.files_tagged(tag)?.iter().filter(|f| f.direct).count())
            };
            repo.add_association(tag, file, None, true)?;
            assert_eq!(direct(repo)?, 0);
            repo.add_association(tag, file, None, false)?;
            assert_eq!(direct(repo)?, 1);
            repo.add_association(tag, file, None, true)?;
            assert_eq!(direct(repo)?, 1);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_value_pattern_wildcards() {
        let (_dir, store) = store();
        store.transact(|repo| {
            let tag = repo.add_tag("rating")?;
            let five = repo.ensure_file(Path::new("/data/five.jpg"))?;
            let four = repo.ensure_file(Path::new("/data/four.jpg"))?;
            let odd = repo.ensure_file(Path::new("/data/odd.jpg"))?;
            repo.add_association(tag, five, Some("5"), false)?;
            repo.add_association(tag, four, Some("4"), false)?;
            repo.add_association(tag, odd, Some("5%"), false)?;

            assert_eq!(repo.files_by_tag("rating", Some("5"), false)?, vec!["five.jpg".to_string()]);
            assert_eq!(repo.files_by_tag("rating", Some("*"), false)?.len(), 3);
            // `%` is literal, not a wildcard
            assert_eq!(repo.files_by_tag("rating", Some("5%"), false)?, vec!["odd.jpg".to_string()]);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_merge_folds_edges_and_files() {
        let (_dir, store) = store();
        store.transact(|repo| {
            let a = repo.add_tag("Job")?;
            let f = repo.ensure_file(Path::new("/data/cv.pdf"))?;
            repo.add_association(a, f, None, false)?;
            repo.add_edge("Life", "Job")?;
            repo.add_edge("Job", "Applications")?;

            assert!(repo.merge_tag("Job", "Work")?);
            assert!(repo.tag_id("Job")?.is_none());
            assert_eq!(repo.files_by_tag("Work", None, false)?, vec!["cv.pdf".to_string()]);
            assert!(repo.edge_exists("Life", "Work")?);
            assert!(repo.edge_exists("Work", "Applications")?);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_update_file_path_renames() {
        let (_dir, store) = store();
        store.transact(|repo| {
            repo.ensure_file(Path::new("/in/a.txt"))?;
            assert!(repo.update_file_path(Path::new("/in/a.txt"), Path::new("/in/sub/b.txt"))?);
            let moved = repo.file_by_path(Path::new("/in/sub/b.txt"))?.unwrap();
            assert_eq!(moved.name, "b.txt");
            assert!(!repo.update_file_path(Path::new("/nope"), Path::new("/x"))?);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_update_file_path_folds_into_known_file() {
        let (_dir, store) = store();
        store.transact(|repo| {
            let a = repo.ensure_file(Path::new("/in/a.txt"))?;
            let b = repo.ensure_file(Path::new("/in/b.txt"))?;
            let keep = repo.add_tag("Keep")?;
            let notes = repo.add_tag("Notes")?;
            repo.add_association(keep, a, None, false)?;
            repo.add_association(notes, a, None, false)?;
            repo.add_association(notes, b, None, false)?;

            assert!(repo.update_file_path(Path::new("/in/a.txt"), Path::new("/in/b.txt"))?);
            assert!(repo.file_by_path(Path::new("/in/a.txt"))?.is_none());
            assert_eq!(repo.all_files(true)?, vec!["/in/b.txt".to_string()]);
            assert_eq!(repo.tags_of_file("b.txt")?, vec!["Keep".to_string(), "Notes".to_string()]);
            assert_eq!(repo.files_tagged(notes)?.len(), 1);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_tag_names_must_be_directory_names() {
        let (_dir, store) = store();
        store.transact(|repo| {
            for bad in ["..", ".", "", "../victim", "/abs/path", "a/b"] {
                assert!(matches!(repo.add_tag(bad), Err(TagError::InvalidPath(_))), "{:?}", bad);
            }
            assert!(matches!(repo.add_edge("Parent", ".."), Err(TagError::InvalidPath(_))));
            assert!(repo.add_tag("rating=5").is_ok());
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_remove_association_by_file_name() {
        let (_dir, store) = store();
        store.transact(|repo| {
            let work = repo.add_tag("Work")?;
            let x = repo.ensure_file(Path::new("/x/a.txt"))?;
            let y = repo.ensure_file(Path::new("/y/A.TXT"))?;
            let z = repo.ensure_file(Path::new("/z/b.txt"))?;
            for f in [x, y, z] {
                repo.add_association(work, f, None, false)?;
            }
            let untagged = repo.remove_association("work", "a.txt")?;
            assert_eq!(untagged, vec!["/x/a.txt".to_string(), "/y/A.TXT".to_string()]);
            assert_eq!(repo.files_by_tag("Work", None, false)?, vec!["b.txt".to_string()]);
            assert!(repo.remove_association("Nope", "b.txt")?.is_empty());
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_mount_root_setting() {
        let (_dir, store) = store();
        let root = store.transact(|repo| repo.set_mount_root(Path::new("/srv"))).unwrap();
        assert_eq!(root, PathBuf::from("/srv/TagMount"));
        assert_eq!(store.read(|repo| repo.mount_root()).unwrap(), root);
        assert_eq!(
            store.read(|repo| repo.ignore_list()).unwrap(),
            vec!["node_modules".to_string(), "__pycache__".to_string()]
        );
    }
}
