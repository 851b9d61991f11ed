//! Tagger: the user-facing graph mutations.
//!
//! Each mutation runs inside one store transaction, commits, and then triggers
//! a full mount so the visible tree catches up with the graph. The CLI is a thin
//! layer over this type; the librarian reuses its free helpers for path-derived
//! tagging.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use crate::core::bouncer::Bouncer;
use crate::core::file_groups;
use crate::core::links;
use crate::engine::mount::{self, MountReport};
use crate::engine::query::{self, QueryOptions, Term};
use crate::error::{Result, TagError};
use crate::oracle::SearchKind;
use crate::state::{AppState, SearchResult};
use crate::storage::{AutoImportDir, Repository};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AddReport {
    pub added: usize,
    pub duplicates: usize,
    /// Paths that are not regular files or were filtered out.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowMode {
    Tags,
    Files,
    Index,
}

pub struct Tagger {
    state: AppState,
}

impl Tagger {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Full mount under the configured root.
    pub fn mount(&self) -> Result<MountReport> {
        let (root, report) = mount::mount_configured(&self.state.store)?;
        tracing::info!(
            "[Tagger] Mounted {}: {} dir(s), {} link(s) created",
            root.display(), report.dirs_created, report.links_created
        );
        Ok(report)
    }

    pub fn mount_root(&self) -> Result<PathBuf> {
        self.state.store.read(|repo| repo.mount_root())
    }

    /// Stores `<dir>/TagMount` as the new mount root and returns it.
    pub fn set_mount_root(&self, dir: &Path) -> Result<PathBuf> {
        let dir = absolute(dir)?;
        let root = self.state.store.transact(|repo| repo.set_mount_root(&dir))?;
        tracing::info!("[Tagger] Mount root set to {}", root.display());
        Ok(root)
    }

    /// Registers regular files. Known paths are counted as duplicates.
    pub fn add<P: AsRef<Path>>(&self, paths: &[P]) -> Result<AddReport> {
        let type_tags = self.state.config.type_tags;
        let report = self.state.store.transact(|repo| {
            let mut report = AddReport::default();
            for path in paths {
                let path = path.as_ref();
                if !path.is_file() {
                    tracing::warn!("[Tagger] Not a regular file, skipped: {}", path.display());
                    report.skipped += 1;
                    continue;
                }
                match add_file(repo, &absolute(path)?, type_tags)? {
                    Some(_) => report.added += 1,
                    None => report.duplicates += 1,
                }
            }
            Ok(report)
        })?;
        if type_tags && report.added > 0 {
            self.mount()?;
        }
        Ok(report)
    }

    /// Forgets files and removes their links from the mounted tree.
    pub fn remove<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        let paths: Vec<PathBuf> = paths.iter()
            .map(|p| absolute(p.as_ref()))
            .collect::<Result<_>>()?;
        let removed = self.state.store.transact(|repo| {
            let mut removed = Vec::new();
            for path in &paths {
                if repo.remove_file(path)? {
                    removed.push(path.clone());
                } else {
                    tracing::warn!("[Tagger] Unknown file: {}", path.display());
                }
            }
            Ok(removed)
        })?;

        let root = self.mount_root()?;
        for path in &removed {
            for link in links::links_to(&root, path) {
                links::remove_link(&link)?;
            }
        }
        Ok(removed.len())
    }

    /// Tags each file with each tag (and, by inheritance, every ancestor of
    /// each tag). Tags may carry a value: `rating=5`.
    pub fn tag<F: AsRef<str>, T: AsRef<str>>(&self, files: &[F], tags: &[T]) -> Result<usize> {
        let terms: Vec<Term> = tags.iter().map(|t| Term::parse(t.as_ref())).collect();
        let type_tags = self.state.config.type_tags;
        let tagged = self.state.store.transact(|repo| {
            let mut tagged = 0;
            for file in files {
                for file_id in resolve_files(repo, file.as_ref(), Some(type_tags))? {
                    apply_terms(repo, file_id, &terms)?;
                    tagged += 1;
                }
            }
            Ok(tagged)
        })?;
        tracing::info!("[Tagger] Tagged {} file(s) with {} tag(s)", tagged, terms.len());
        self.mount()?;
        Ok(tagged)
    }

    /// Removes the named direct associations.
    ///
    /// Ancestor associations added by inheritance are kept: untagging `Work`
    /// leaves the file under `2024` if `2024` is a parent of `Work`.
    pub fn untag<F: AsRef<str>, T: AsRef<str>>(&self, files: &[F], tags: &[T]) -> Result<usize> {
        let (removed, unlinked) = self.state.store.transact(|repo| {
            let mut removed = 0;
            let mut unlinked = Vec::new();
            for file in files {
                let arg = file.as_ref();
                if !Path::new(arg).is_file() {
                    for tag in tags {
                        for path in repo.remove_association(tag.as_ref(), file_name_arg(arg))? {
                            removed += 1;
                            unlinked.push((tag.as_ref().to_string(), path));
                        }
                    }
                    continue;
                }
                for file_id in resolve_files(repo, arg, None)? {
                    let Some(record) = repo.file_by_id(file_id)? else { continue };
                    for tag in tags {
                        let Some(tag_id) = repo.tag_id(tag.as_ref())? else { continue };
                        if repo.remove_association_by_id(tag_id, file_id)? {
                            removed += 1;
                            unlinked.push((tag.as_ref().to_string(), record.path.clone()));
                        }
                    }
                }
            }
            Ok((removed, unlinked))
        })?;

        let root = self.mount_root()?;
        for (tag, path) in &unlinked {
            for link in links::links_to(&root, Path::new(path)) {
                if mount::owning_tag(&root, &link).is_some_and(|owner| owner.eq_ignore_ascii_case(tag)) {
                    links::remove_link(&link)?;
                }
            }
        }
        if removed > 0 {
            tracing::debug!("[Tagger] Untag keeps inherited ancestor associations");
        }
        self.mount()?;
        Ok(removed)
    }

    /// Makes every tag in `tags` a child of every tag in `parents`.
    ///
    /// Fails without changes if any edge would close a cycle.
    pub fn metatag<T: AsRef<str>, P: AsRef<str>>(&self, tags: &[T], parents: &[P]) -> Result<usize> {
        let edges = self.state.store.transact(|repo| {
            let mut edges = 0;
            for tag in tags {
                for parent in parents {
                    repo.add_edge(parent.as_ref(), tag.as_ref())?;
                    edges += 1;
                }
                if let Some(tag_id) = repo.tag_id(tag.as_ref())? {
                    backfill_ancestors(repo, tag_id)?;
                }
            }
            Ok(edges)
        })?;

        // Both tags moved in the hierarchy; let the mount rebuild them
        let root = self.mount_root()?;
        for tag in tags {
            for parent in parents {
                links::remove_dirs_named(&root, parent.as_ref())?;
            }
            if mount::is_mountable_name(tag.as_ref()) {
                remove_dir_if_present(&root.join(tag.as_ref()))?;
            }
        }
        tracing::info!("[Tagger] Added {} edge(s)", edges);
        self.mount()?;
        Ok(edges)
    }

    /// Folds `a` into `b` and deletes `a`. Returns `false` when `a` is unknown.
    pub fn merge(&self, a: &str, b: &str) -> Result<bool> {
        let merged = self.state.store.transact(|repo| {
            if !repo.merge_tag(a, b)? {
                return Ok(false);
            }
            if let Some(b_id) = repo.tag_id(b)? {
                backfill_ancestors(repo, b_id)?;
                if repo.ancestors_of(b_id)?.contains(&b_id) {
                    tracing::warn!("[Tagger] Merging {} into {} closed a cycle through {}", a, b, b);
                }
            }
            Ok(true)
        })?;
        if !merged {
            tracing::warn!("[Tagger] Nothing to merge: unknown tag '{}'", a);
            return Ok(false);
        }

        links::remove_dirs_named(&self.mount_root()?, a)?;
        tracing::info!("[Tagger] Merged {} into {}", a, b);
        self.mount()?;
        Ok(true)
    }

    /// Adds every visible file below `dir`, tagged by the directories between
    /// `dir` and the file.
    pub fn import(&self, dir: &Path) -> Result<AddReport> {
        let dir = absolute(dir)?;
        if !dir.is_dir() {
            return Err(TagError::InvalidPath(format!("Not a directory: {}", dir.display())));
        }
        let type_tags = self.state.config.type_tags;
        let report = self.state.store.transact(|repo| {
            let bouncer = Bouncer::new(repo.ignore_list()?);
            let mut report = AddReport::default();
            for file in visible_files(&dir, &bouncer) {
                match import_file(repo, &dir, &file, type_tags)? {
                    true => report.added += 1,
                    false => report.duplicates += 1,
                }
            }
            Ok(report)
        })?;
        tracing::info!("[Tagger] Imported {} new file(s) from {}", report.added, dir.display());
        self.mount()?;
        Ok(report)
    }

    /// Registers `dir` as an auto-import source, or updates its indexing flags.
    pub fn add_auto_import(&self, dir: &Path, index_images: bool, index_texts: bool) -> Result<AutoImportDir> {
        if !dir.is_dir() {
            return Err(TagError::InvalidPath(format!("{} is not a directory", dir.display())));
        }
        let path = absolute(dir)?;
        let root = self.mount_root()?;
        if path.starts_with(&root) {
            return Err(TagError::InvalidPath(format!(
                "{} lies inside the mounted tree {}", path.display(), root.display()
            )));
        }
        let entry = AutoImportDir {
            path: path.to_string_lossy().into_owned(),
            auto_index_images: index_images,
            auto_index_texts: index_texts,
        };
        self.state.store.transact(|repo| repo.add_auto_import_dir(&entry))?;
        tracing::info!("[Tagger] Auto-importing from {}", entry.path);
        Ok(entry)
    }

    pub fn remove_auto_import(&self, dir: &Path) -> Result<bool> {
        let path = absolute(dir)?;
        self.state.store.transact(|repo| repo.remove_auto_import_dir(&path.to_string_lossy()))
    }

    pub fn auto_import_dirs(&self) -> Result<Vec<AutoImportDir>> {
        self.state.store.read(|repo| repo.auto_import_dirs())
    }

    /// Feeds unindexed (or, with `rebuild`, all) files to the ranker.
    pub fn index(&self, rebuild: bool) -> Result<usize> {
        let paths: Vec<PathBuf> = self.state.store
            .read(|repo| if rebuild { repo.all_files(true) } else { repo.unindexed_file_paths() })?
            .into_iter()
            .map(PathBuf::from)
            .collect();
        index_paths(&self.state, &paths, true, true)
    }

    pub fn query<S: AsRef<str>>(&self, words: &[S], opts: QueryOptions) -> Result<BTreeSet<String>> {
        self.state.store.read(|repo| query::query(repo, words, opts))
    }

    pub fn search(&self, text: &str, kind: SearchKind, top_k: usize) -> Result<Vec<SearchResult>> {
        self.state.ranker.search(text, kind, top_k)
    }

    pub fn tags_of<S: AsRef<str>>(&self, files: &[S]) -> Result<BTreeSet<String>> {
        self.state.store.read(|repo| {
            let mut tags = BTreeSet::new();
            for file in files {
                tags.extend(repo.tags_of_file(file_name_arg(file.as_ref()))?);
            }
            Ok(tags)
        })
    }

    pub fn metatags_of<S: AsRef<str>>(&self, tags: &[S]) -> Result<BTreeSet<String>> {
        self.state.store.read(|repo| {
            let mut parents = BTreeSet::new();
            for tag in tags {
                parents.extend(repo.parents_of(tag.as_ref())?);
            }
            Ok(parents)
        })
    }

    pub fn show(&self, mode: ShowMode, show_path: bool) -> Result<Vec<String>> {
        self.state.store.read(|repo| match mode {
            ShowMode::Tags => repo.all_tag_names(),
            ShowMode::Files => repo.all_files(show_path),
            ShowMode::Index => repo.indexed_files(show_path),
        })
    }
}

// ------------------------------------------------------------------- shared helpers

/// Tags `file_id` with each term and every ancestor of each term's tag.
pub(crate) fn apply_terms(repo: &Repository<'_>, file_id: u64, terms: &[Term]) -> Result<()> {
    for term in terms {
        let tag_id = repo.add_tag(&term.tag)?;
        repo.add_association(tag_id, file_id, term.value.as_deref(), false)?;
        for ancestor in repo.ancestors_of(tag_id)? {
            if ancestor != tag_id {
                repo.add_association(ancestor, file_id, None, true)?;
            }
        }
    }
    Ok(())
}

/// Re-applies every ancestor of `tag_id` onto each file carrying it.
pub(crate) fn backfill_ancestors(repo: &Repository<'_>, tag_id: u64) -> Result<()> {
    let ancestors = repo.ancestors_of(tag_id)?;
    for file in repo.files_tagged(tag_id)? {
        for &ancestor in &ancestors {
            if ancestor != tag_id {
                repo.add_association(ancestor, file.file_id, None, true)?;
            }
        }
    }
    Ok(())
}

/// `add_edge` for derived hierarchies: a cycle is logged and skipped.
pub(crate) fn link_tags(repo: &Repository<'_>, parent: &str, child: &str) -> Result<bool> {
    match repo.add_edge(parent, child) {
        Ok(()) => Ok(true),
        Err(TagError::Cycle { parent, child }) => {
            tracing::warn!("[Tagger] Skipped edge {} -> {}: it would close a cycle", parent, child);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Registers `path`. New files optionally get extension tags below their group.
fn add_file(repo: &Repository<'_>, path: &Path, type_tags: bool) -> Result<Option<u64>> {
    let added = repo.add_file(path)?;
    if let (Some(file_id), true) = (added, type_tags) {
        let (group, file_type) = file_groups::default_tags(path);
        if let Some(file_type) = file_type {
            if let Some(group) = group {
                link_tags(repo, group, &file_type)?;
            }
            apply_terms(repo, file_id, &[Term { tag: file_type, value: None }])?;
        }
    }
    Ok(added)
}

/// Directory names between `root` and `file`, outermost first.
pub(crate) fn path_tags(root: &Path, file: &Path) -> Vec<String> {
    let Some(parent) = file.strip_prefix(root).ok().and_then(Path::parent) else {
        return Vec::new();
    };
    parent.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Registers `file` and tags it from its location below `root`: every
/// directory becomes a tag, chained parent -> child from the outermost one.
/// Returns `true` if the file was new.
pub(crate) fn import_file(repo: &Repository<'_>, root: &Path, file: &Path, type_tags: bool) -> Result<bool> {
    let added = add_file(repo, file, type_tags)?;
    let file_id = match added {
        Some(id) => id,
        None => repo.ensure_file(file)?,
    };
    let tags = path_tags(root, file);
    for pair in tags.windows(2) {
        link_tags(repo, &pair[0], &pair[1])?;
    }
    let terms: Vec<Term> = tags.into_iter().map(|tag| Term { tag, value: None }).collect();
    apply_terms(repo, file_id, &terms)?;
    Ok(added.is_some())
}

/// Regular files below `dir` that the bouncer lets through.
pub(crate) fn visible_files(dir: &Path, bouncer: &Bouncer) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.path().strip_prefix(dir).map_or(true, |rel| !bouncer.is_ignored(rel))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !Bouncer::is_partial_download(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Indexes the text and/or image files among `paths`. Failures are logged.
pub(crate) fn index_paths(state: &AppState, paths: &[PathBuf], texts: bool, images: bool) -> Result<usize> {
    let mut indexed = 0;
    let batches = [
        (SearchKind::Text, texts, file_groups::is_text as fn(&Path) -> bool),
        (SearchKind::Image, images, file_groups::is_image as fn(&Path) -> bool),
    ];
    for (kind, enabled, wanted) in batches {
        if !enabled {
            continue;
        }
        let batch: Vec<PathBuf> = paths.iter().filter(|p| wanted(p)).cloned().collect();
        if batch.is_empty() {
            continue;
        }
        match state.ranker.index(&batch, kind) {
            Ok(n) => {
                tracing::info!("[Tagger] Indexed {} {} file(s) with {} ranker", n, kind.as_str(), state.ranker.name());
                indexed += n;
            }
            Err(e) => tracing::warn!("[Tagger] Indexing {} files failed: {}", kind.as_str(), e),
        }
    }
    Ok(indexed)
}

/// Files an argument refers to: an existing path (registered on the fly when
/// `add_with_types` is set) or a stored file name.
fn resolve_files(repo: &Repository<'_>, arg: &str, add_with_types: Option<bool>) -> Result<Vec<u64>> {
    let path = Path::new(arg);
    if path.is_file() {
        let path = absolute(path)?;
        let id = match add_with_types {
            Some(type_tags) => match add_file(repo, &path, type_tags)? {
                Some(id) => Some(id),
                None => repo.file_by_path(&path)?.map(|f| f.file_id),
            },
            None => repo.file_by_path(&path)?.map(|f| f.file_id),
        };
        if let Some(id) = id {
            return Ok(vec![id]);
        }
    }
    let ids: Vec<u64> = repo.files_by_name(file_name_arg(arg))?
        .into_iter()
        .map(|f| f.file_id)
        .collect();
    if ids.is_empty() {
        tracing::warn!("[Tagger] Unknown file: {}", arg);
    }
    Ok(ids)
}

/// Last path component of a CLI file argument.
fn file_name_arg(arg: &str) -> &str {
    arg.rsplit('/').find(|s| !s.is_empty()).unwrap_or(arg)
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Absolute form of `path`; symlinks are resolved when the path exists.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(std::fs::canonicalize(path)?);
    }
    Ok(std::path::absolute(path)?)
}
