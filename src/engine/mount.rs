//! MountEngine: projects the tag DAG onto a real directory/symlink tree.
//!
//! Layout:
//! - leaf tag:     `<Tag>/<links>`
//! - interior tag: `<Tag>/_files/<links>` plus one subdirectory per child tag
//!
//! A file shows up under `A/B/` only if it carries both `A` and `B`: every node
//! intersects its own files with the set inherited from its parent node.
//! Directories are created lazily, only for nodes with a non-empty set.
//!
//! The pass is additive. Stale links are removed by the librarian when the user
//! deletes them, never by a mount.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use crate::core::links::{self, LinkOutcome};
use crate::error::Result;
use crate::storage::{Repository, Store, TaggedFile};

pub const FILES_DIR: &str = "_files";
/// Prefix of system-generated directories; never read as queries.
pub const INTERNAL_MARKER: char = '_';

pub const SEARCH_TEXTS: &str = "Search Texts";
pub const SEARCH_IMAGES: &str = "Search Images";
pub const GRAPH_ARTIFACT: &str = "tag-graph.dot";

/// Top-level names that are structure, not tags.
pub const RESERVED_NAMES: &[&str] = &[GRAPH_ARTIFACT, SEARCH_TEXTS, SEARCH_IMAGES];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// What a pass changed on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MountReport {
    pub dirs_created: usize,
    pub links_created: usize,
    pub link_failures: usize,
    pub cycles_skipped: usize,
}

impl MountReport {
    pub fn is_noop(&self) -> bool {
        self.dirs_created == 0 && self.links_created == 0
    }
}

pub struct MountEngine<'r, 'c> {
    repo: &'r Repository<'c>,
    leaves: HashSet<u64>,
    report: MountReport,
}

impl<'r, 'c> MountEngine<'r, 'c> {
    pub fn new(repo: &'r Repository<'c>) -> Result<Self> {
        Ok(Self {
            repo,
            leaves: repo.leaf_tag_ids()?,
            report: MountReport::default(),
        })
    }

    /// Full top-level pass under `root`.
    pub fn mount(mut self, root: &Path) -> Result<MountReport> {
        self.mkdir(root)?;
        for reserved in [SEARCH_TEXTS, SEARCH_IMAGES] {
            self.mkdir(&root.join(reserved))?;
        }
        self.write_graph(&root.join(GRAPH_ARTIFACT))?;

        let mut visiting = Vec::new();
        for (tag_id, name) in self.repo.root_tags()? {
            if is_reserved(&name) {
                tracing::warn!("[Mount] Tag '{}' shadows a reserved name, not mounted", name);
                continue;
            }
            self.mount_tag(root, tag_id, &name, None, &mut visiting)?;
        }

        tracing::debug!("[Mount] Pass complete under {}: {:?}", root.display(), self.report);
        Ok(self.report)
    }

    fn mount_tag(
        &mut self,
        dir: &Path,
        tag_id: u64,
        name: &str,
        parent_files: Option<&HashSet<u64>>,
        visiting: &mut Vec<u64>,
    ) -> Result<()> {
        if visiting.contains(&tag_id) {
            tracing::warn!("[Mount] Cycle through tag '{}' detected, subtree skipped", name);
            self.report.cycles_skipped += 1;
            return Ok(());
        }
        if !is_mountable_name(name) {
            tracing::warn!("[Mount] Tag name '{}' cannot be a directory, skipped", name);
            return Ok(());
        }

        let effective: Vec<TaggedFile> = self.repo.files_tagged(tag_id)?
            .into_iter()
            .filter(|f| parent_files.map_or(true, |p| p.contains(&f.file_id)))
            .collect();
        if effective.is_empty() {
            return Ok(());
        }

        let tag_dir = dir.join(name);
        self.mkdir(&tag_dir)?;

        if self.leaves.contains(&tag_id) {
            for file in &effective {
                self.link(&tag_dir, file);
            }
            return Ok(());
        }

        let files_dir = tag_dir.join(FILES_DIR);
        self.mkdir(&files_dir)?;
        for file in effective.iter().filter(|f| f.direct) {
            self.link(&files_dir, file);
        }

        let ids: HashSet<u64> = effective.iter().map(|f| f.file_id).collect();
        visiting.push(tag_id);
        for (child_id, child_name) in self.repo.children_of(tag_id)? {
            self.mount_tag(&tag_dir, child_id, &child_name, Some(&ids), visiting)?;
        }
        visiting.pop();
        Ok(())
    }

    fn mkdir(&mut self, dir: &Path) -> Result<()> {
        if links::ensure_dir(dir)? {
            self.report.dirs_created += 1;
        }
        Ok(())
    }

    /// Per-file failures are logged and skipped; the pass continues.
    fn link(&mut self, dir: &Path, file: &TaggedFile) {
        match links::place_link(dir, &file.name, Path::new(&file.path)) {
            Ok(LinkOutcome::Created(name)) => {
                self.report.links_created += 1;
                if name != file.name {
                    tracing::debug!("[Mount] Name collision in {}: {} placed as {}", dir.display(), file.name, name);
                }
            }
            Ok(LinkOutcome::Present(_)) => {}
            Err(e) => {
                self.report.link_failures += 1;
                tracing::warn!("[Mount] Failed to link {} into {}: {}", file.path, dir.display(), e);
            }
        }
    }

    /// Graphviz rendering of the DAG, rewritten only when it changed.
    fn write_graph(&mut self, path: &Path) -> Result<()> {
        let mut dot = String::from("digraph tags {\n");
        for (_, name) in self.repo.all_tags()? {
            dot.push_str(&format!("    \"{}\";\n", escape_dot(&name)));
        }
        for (parent, child) in self.repo.all_edges()? {
            dot.push_str(&format!("    \"{}\" -> \"{}\";\n", escape_dot(&parent), escape_dot(&child)));
        }
        dot.push_str("}\n");

        if std::fs::read_to_string(path).map(|old| old == dot).unwrap_or(false) {
            return Ok(());
        }
        if let Err(e) = std::fs::write(path, dot) {
            tracing::warn!("[Mount] Failed to write graph artifact {}: {}", path.display(), e);
        }
        Ok(())
    }
}

/// Tag an entry of the mounted tree belongs to: its directory's name, or the
/// grandparent's when the directory is `_files`. `None` at the top level and
/// inside reserved directories.
pub fn owning_tag(root: &Path, entry: &Path) -> Option<String> {
    let mut dir = entry.parent()?;
    if dir.file_name().is_some_and(|n| n == FILES_DIR) {
        dir = dir.parent()?;
    }
    if dir == root || !dir.starts_with(root) {
        return None;
    }
    let name = dir.file_name()?.to_string_lossy().into_owned();
    (!is_reserved(&name)).then_some(name)
}

pub(crate) fn is_mountable_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && name != FILES_DIR && !name.contains('/')
}

fn escape_dot(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One full pass against the store, on a fresh connection.
pub fn mount(store: &Store, root: &Path) -> Result<MountReport> {
    store.read(|repo| MountEngine::new(repo)?.mount(root))
}

/// One full pass under the configured mount root.
pub fn mount_configured(store: &Store) -> Result<(PathBuf, MountReport)> {
    store.read(|repo| {
        let root = repo.mount_root()?;
        let report = MountEngine::new(repo)?.mount(&root)?;
        Ok((root, report))
    })
}
