// FILE: src/librarian.rs
//! The Librarian: keeps the graph and the mounted tree in step with the disk.
//!
//! Two watcher roles share one debounced event loop:
//! - [`MountWatcher`] reads user edits to the mounted tree as graph mutations
//!   (new folder = query, deleted folder = detached edge, deleted link = untag).
//! - [`AutoImporter`] registers files appearing in a configured source
//!   directory, tagged by the directories they sit in.
//!
//! Each root is Idle until a debounced batch arrives, then handles its events
//! one at a time. Every applied event ends with a full mount.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use crate::core::bouncer::Bouncer;
use crate::core::links;
use crate::engine::mount::{self, FILES_DIR, INTERNAL_MARKER, SEARCH_IMAGES, SEARCH_TEXTS};
use crate::engine::query::{self, QueryFolder, QueryOptions, Term};
use crate::error::Result;
use crate::oracle::SearchKind;
use crate::state::AppState;
use crate::storage::AutoImportDir;
use crate::tagger;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Filesystem events as the handlers understand them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    DirCreated(PathBuf),
    DirDeleted(PathBuf),
    /// A symlink (or regular file) went away.
    LinkDeleted(PathBuf),
    /// Something went away and the backend did not say what it was.
    Removed(PathBuf),
    Moved { from: PathBuf, to: PathBuf, is_dir: bool },
    FileCreated(PathBuf),
    Modified(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Applied,
    Skipped(&'static str),
}

impl Handled {
    fn or(self, other: Handled) -> Handled {
        if self == Handled::Applied || other != Handled::Applied { self } else { other }
    }
}

pub trait EventHandler: Send + 'static {
    fn label(&self) -> String;
    fn root(&self) -> &Path;
    fn handle(&self, event: &FsEvent) -> Result<Handled>;
}

// ------------------------------------------------------------------- mounted tree

pub struct MountWatcher {
    state: AppState,
    root: PathBuf,
}

impl MountWatcher {
    /// Watches the mount root configured in the store.
    pub fn new(state: AppState) -> Result<Self> {
        let root = state.store.read(|repo| repo.mount_root())?;
        Ok(Self { state, root })
    }

    fn remount(&self) -> Result<()> {
        let report = mount::mount(&self.state.store, &self.root)?;
        tracing::debug!("[Librarian] Remounted: {:?}", report);
        Ok(())
    }

    fn dir_created(&self, path: &Path) -> Result<Handled> {
        let Some((parent, name)) = self.split(path) else {
            return Ok(Handled::Skipped("outside the mounted tree"));
        };
        if !path.is_dir() {
            return Ok(Handled::Skipped("directory is gone"));
        }
        if name.starts_with(INTERNAL_MARKER) || name.starts_with('.') || self.in_internal_dir(parent) {
            return Ok(Handled::Skipped("internal directory"));
        }
        if parent == self.root && mount::is_reserved(&name) {
            return Ok(Handled::Skipped("reserved directory"));
        }
        if Bouncer::is_placeholder_folder(&name) {
            return Ok(Handled::Skipped("placeholder folder"));
        }

        let search = match dir_name(parent) {
            Some(p) if parent.parent() == Some(self.root.as_path()) && p == SEARCH_TEXTS => Some(SearchKind::Text),
            Some(p) if parent.parent() == Some(self.root.as_path()) && p == SEARCH_IMAGES => Some(SearchKind::Image),
            _ => None,
        };
        if search.is_none() && self.is_tag_node(parent, &name)? {
            return Ok(Handled::Skipped("materialized tag directory"));
        }

        let folder = QueryFolder::parse(&name);
        let targets: Vec<PathBuf> = match search {
            Some(kind) => self.state.ranker
                .search(&folder.text(), kind, folder.top_k)?
                .into_iter()
                .map(|hit| PathBuf::from(hit.abs_path))
                .collect(),
            None => {
                let opts = QueryOptions { show_path: true, fuzzy: true };
                self.state.store
                    .read(|repo| query::query(repo, &folder.words, opts))?
                    .into_iter()
                    .map(PathBuf::from)
                    .collect()
            }
        };

        tracing::info!("[Librarian] Query folder '{}' matched {} file(s)", name, targets.len());
        for target in &targets {
            let Some(link_name) = dir_name(target) else { continue };
            if let Err(e) = links::place_link(path, &link_name, target) {
                tracing::warn!("[Librarian] Failed to link {} into '{}': {}", target.display(), name, e);
            }
        }
        Ok(Handled::Applied)
    }

    /// True if `parent/name` is where the mount puts tag `name`.
    fn is_tag_node(&self, parent: &Path, name: &str) -> Result<bool> {
        if parent == self.root {
            return self.state.store.read(|repo| {
                Ok(repo.tag_id(name)?.is_some() && repo.parents_of(name)?.is_empty())
            });
        }
        match self.tag_of_dir(parent) {
            Some(parent_tag) => self.state.store.read(|repo| repo.edge_exists(&parent_tag, name)),
            None => Ok(false),
        }
    }

    fn dir_deleted(&self, path: &Path) -> Result<Handled> {
        if path.symlink_metadata().is_ok() {
            return Ok(Handled::Skipped("directory was recreated"));
        }
        let Some((parent, name)) = self.split(path) else {
            return Ok(Handled::Skipped("outside the mounted tree"));
        };
        if parent == self.root {
            return Ok(Handled::Skipped("top-level directory"));
        }
        if !parent.is_dir() {
            return Ok(Handled::Skipped("inside a removed directory"));
        }
        if name.starts_with(INTERNAL_MARKER) {
            return Ok(Handled::Skipped("internal directory"));
        }
        let Some(parent_tag) = self.tag_of_dir(parent) else {
            return Ok(Handled::Skipped("parent is not a tag directory"));
        };

        if !self.state.store.transact(|repo| repo.remove_edge(&parent_tag, &name))? {
            return Ok(Handled::Skipped("no such edge"));
        }
        tracing::info!("[Librarian] Detached tag {} from parent {}", name, parent_tag);
        Ok(Handled::Applied)
    }

    fn link_deleted(&self, path: &Path) -> Result<Handled> {
        if path.symlink_metadata().is_ok() {
            return Ok(Handled::Skipped("link was recreated"));
        }
        let Some((parent, name)) = self.split(path) else {
            return Ok(Handled::Skipped("outside the mounted tree"));
        };
        if !parent.is_dir() {
            return Ok(Handled::Skipped("inside a removed directory"));
        }
        let Some(tag) = mount::owning_tag(&self.root, path) else {
            return Ok(Handled::Skipped("not inside a tag directory"));
        };

        // Files still linked from this directory keep the tag; this matters
        // when several files share the deleted link's name.
        let remaining: HashSet<PathBuf> = std::fs::read_dir(parent)?
            .filter_map(|e| e.ok())
            .filter_map(|e| std::fs::read_link(e.path()).ok())
            .collect();
        let stripped = links::strip_collision_prefix(&name);

        let removed = self.state.store.transact(|repo| {
            let Some(tag_id) = repo.tag_id(&tag)? else { return Ok(0) };
            let mut removed = 0;
            for file in repo.files_tagged(tag_id)? {
                let named = file.name.eq_ignore_ascii_case(&name)
                    || stripped.is_some_and(|s| file.name.eq_ignore_ascii_case(s));
                if !named || remaining.contains(Path::new(&file.path)) {
                    continue;
                }
                if repo.remove_association_by_id(tag_id, file.file_id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })?;

        if removed == 0 {
            return Ok(Handled::Skipped("no matching association"));
        }
        tracing::info!("[Librarian] Removed tag {} from {} file(s) named {}", tag, removed, name);
        Ok(Handled::Applied)
    }

    fn link_moved(&self, from: &Path, to: &Path) -> Result<Handled> {
        if !to.starts_with(&self.root) {
            return Ok(Handled::Skipped("moved out of the mounted tree"));
        }
        let Ok(target) = std::fs::read_link(to) else {
            return Ok(Handled::Skipped("not a symlink"));
        };
        let old_tag = mount::owning_tag(&self.root, from);
        let new_tag = mount::owning_tag(&self.root, to).filter(|t| !t.starts_with(INTERNAL_MARKER));
        if let (Some(old), Some(new)) = (&old_tag, &new_tag) {
            if old.eq_ignore_ascii_case(new) {
                return Ok(Handled::Skipped("renamed in place"));
            }
        }

        let moved = self.state.store.transact(|repo| {
            let Some(file) = repo.file_by_path(&target)? else { return Ok(false) };
            if let Some(old) = &old_tag {
                if let Some(tag_id) = repo.tag_id(old)? {
                    repo.remove_association_by_id(tag_id, file.file_id)?;
                }
            }
            if let Some(new) = &new_tag {
                tagger::apply_terms(repo, file.file_id, &[Term { tag: new.clone(), value: None }])?;
            }
            Ok(true)
        })?;
        if !moved {
            return Ok(Handled::Skipped("link target is not a known file"));
        }
        tracing::info!(
            "[Librarian] Moved {} from tag {:?} to tag {:?}",
            target.display(), old_tag, new_tag
        );
        Ok(Handled::Applied)
    }

    fn dir_moved(&self, from: &Path, to: &Path) -> Result<Handled> {
        let (Some(old_name), Some(new_name)) = (dir_name(from), dir_name(to)) else {
            return Ok(Handled::Skipped("unnamed directory"));
        };
        if !old_name.eq_ignore_ascii_case(&new_name) {
            // A renamed tag folder is the old folder deleted plus a new one created
            let deleted = self.dir_deleted(from)?;
            let created = self.dir_created(to)?;
            return Ok(deleted.or(created));
        }
        if old_name.starts_with(INTERNAL_MARKER) || !to.starts_with(&self.root) {
            return Ok(Handled::Skipped("not a tag directory move"));
        }

        let old_parent = from.parent().and_then(|p| self.tag_of_dir(p));
        let new_parent = to.parent().and_then(|p| self.tag_of_dir(p));
        let changed = self.state.store.transact(|repo| {
            let mut changed = false;
            if let Some(parent) = &old_parent {
                changed |= repo.remove_edge(parent, &old_name)?;
            }
            if let Some(parent) = &new_parent {
                if tagger::link_tags(repo, parent, &old_name)? {
                    if let Some(tag_id) = repo.tag_id(&old_name)? {
                        tagger::backfill_ancestors(repo, tag_id)?;
                    }
                    changed = true;
                }
            }
            Ok(changed)
        })?;
        if !changed {
            return Ok(Handled::Skipped("hierarchy unchanged"));
        }
        tracing::info!("[Librarian] Re-parented {} from {:?} to {:?}", old_name, old_parent, new_parent);
        Ok(Handled::Applied)
    }

    /// `(parent, name)` for paths strictly below the mount root.
    fn split<'p>(&self, path: &'p Path) -> Option<(&'p Path, String)> {
        if path == self.root || !path.starts_with(&self.root) {
            return None;
        }
        Some((path.parent()?, dir_name(path)?))
    }

    fn in_internal_dir(&self, dir: &Path) -> bool {
        dir.strip_prefix(&self.root).is_ok_and(|rel| {
            rel.components().any(|c| c.as_os_str().to_string_lossy().starts_with(INTERNAL_MARKER))
        })
    }

    /// The tag a directory of the mounted tree stands for.
    fn tag_of_dir(&self, dir: &Path) -> Option<String> {
        if dir == self.root || !dir.starts_with(&self.root) {
            return None;
        }
        let name = dir_name(dir)?;
        if name.starts_with(INTERNAL_MARKER) || name == FILES_DIR || mount::is_reserved(&name) {
            return None;
        }
        Some(name)
    }
}

impl EventHandler for MountWatcher {
    fn label(&self) -> String {
        format!("mount {}", self.root.display())
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn handle(&self, event: &FsEvent) -> Result<Handled> {
        let handled = match event {
            FsEvent::DirCreated(path) => self.dir_created(path)?,
            FsEvent::DirDeleted(path) => self.dir_deleted(path)?,
            FsEvent::LinkDeleted(path) => self.link_deleted(path)?,
            FsEvent::Removed(path) => match self.dir_deleted(path)? {
                Handled::Applied => Handled::Applied,
                _ => self.link_deleted(path)?,
            },
            FsEvent::Moved { from, to, is_dir: true } => self.dir_moved(from, to)?,
            FsEvent::Moved { from, to, is_dir: false } => self.link_moved(from, to)?,
            FsEvent::FileCreated(_) => Handled::Skipped("link creation"),
            FsEvent::Modified(_) => Handled::Skipped("modification"),
        };
        if handled == Handled::Applied {
            self.remount()?;
        }
        Ok(handled)
    }
}

// ------------------------------------------------------------------- auto-import

pub struct AutoImporter {
    state: AppState,
    source: AutoImportDir,
    root: PathBuf,
    mount_root: PathBuf,
    bouncer: Bouncer,
}

impl AutoImporter {
    pub fn new(state: AppState, source: AutoImportDir) -> Result<Self> {
        let (mount_root, ignore_list) = state.store.read(|repo| Ok((repo.mount_root()?, repo.ignore_list()?)))?;
        Ok(Self {
            root: PathBuf::from(&source.path),
            state,
            source,
            mount_root,
            bouncer: Bouncer::new(ignore_list),
        })
    }

    /// Regular, visible, complete files inside the source (and not in the mounted tree).
    fn accepts(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else { return false };
        !path.starts_with(&self.mount_root)
            && !self.bouncer.is_ignored(rel)
            && !Bouncer::is_partial_download(path)
            && path.symlink_metadata().is_ok_and(|m| m.is_file())
    }

    fn files_below(&self, dir: &Path) -> Vec<PathBuf> {
        tagger::visible_files(dir, &self.bouncer)
            .into_iter()
            .filter(|p| self.accepts(p))
            .collect()
    }

    /// `(old, new)` pairs: known files are moved, the rest imported.
    fn import(&self, moves: Vec<(Option<PathBuf>, PathBuf)>) -> Result<Handled> {
        let moves: Vec<(Option<PathBuf>, PathBuf)> = moves.into_iter()
            .filter(|(_, new)| self.accepts(new))
            .collect();
        if moves.is_empty() {
            return Ok(Handled::Skipped("nothing to import"));
        }

        let type_tags = self.state.config.type_tags;
        let (fresh, relocated) = self.state.store.transact(|repo| {
            let mut fresh = Vec::new();
            let mut relocated = Vec::new();
            for (old, new) in &moves {
                if let Some(old) = old.as_ref().filter(|old| *old != new) {
                    if repo.update_file_path(old, new)? {
                        relocated.push((old.clone(), new.clone()));
                    }
                }
                // Re-deriving is additive: tags from the old location stay
                if tagger::import_file(repo, &self.root, new, type_tags)? {
                    fresh.push(new.clone());
                }
            }
            Ok((fresh, relocated))
        })?;

        for (old, new) in &relocated {
            let repaired = links::repair_links(&self.mount_root, old, new)?;
            tracing::info!("[Importer] {} moved to {} ({} link(s) repaired)", old.display(), new.display(), repaired);
        }
        tracing::info!("[Importer] Imported {} new file(s) from {}", fresh.len(), self.root.display());

        let report = mount::mount(&self.state.store, &self.mount_root)?;
        tracing::debug!("[Importer] Remounted: {:?}", report);

        if self.source.auto_index_texts || self.source.auto_index_images {
            tagger::index_paths(&self.state, &fresh, self.source.auto_index_texts, self.source.auto_index_images)?;
        }
        Ok(Handled::Applied)
    }
}

impl EventHandler for AutoImporter {
    fn label(&self) -> String {
        format!("import {}", self.root.display())
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn handle(&self, event: &FsEvent) -> Result<Handled> {
        match event {
            FsEvent::FileCreated(path) => self.import(vec![(None, path.clone())]),
            FsEvent::DirCreated(path) => {
                self.import(self.files_below(path).into_iter().map(|p| (None, p)).collect())
            }
            FsEvent::Moved { to, .. } if !to.starts_with(&self.root) => {
                Ok(Handled::Skipped("moved out of the source"))
            }
            FsEvent::Moved { from, to, is_dir: false } => self.import(vec![(Some(from.clone()), to.clone())]),
            FsEvent::Moved { from, to, is_dir: true } => {
                let moves = self.files_below(to)
                    .into_iter()
                    .map(|new| {
                        let old = new.strip_prefix(to).ok().map(|rel| from.join(rel));
                        (old, new)
                    })
                    .collect();
                self.import(moves)
            }
            FsEvent::DirDeleted(path) | FsEvent::LinkDeleted(path) | FsEvent::Removed(path) => {
                tracing::debug!("[Importer] {} removed from source; graph left unchanged", path.display());
                Ok(Handled::Skipped("deletions are not tracked"))
            }
            FsEvent::Modified(_) => Ok(Handled::Skipped("modification")),
        }
    }
}

// ------------------------------------------------------------------- event loop

/// Domain events for one notify event.
///
/// `From`/`To` halves of a rename whose tracker appears in `paired` are dropped:
/// the combined `Both` event carries them.
fn translate(event: &Event, paired: &HashSet<usize>) -> Vec<FsEvent> {
    let is_dir = |p: &Path| p.symlink_metadata().is_ok_and(|m| m.is_dir());
    let created = |p: &PathBuf| {
        if is_dir(p) { FsEvent::DirCreated(p.clone()) } else { FsEvent::FileCreated(p.clone()) }
    };
    let half_of_pair = event.tracker().is_some_and(|t| paired.contains(&t));

    match &event.kind {
        EventKind::Create(CreateKind::Folder) => event.paths.iter().cloned().map(FsEvent::DirCreated).collect(),
        EventKind::Create(CreateKind::File) => event.paths.iter().cloned().map(FsEvent::FileCreated).collect(),
        EventKind::Create(_) => event.paths.iter().map(created).collect(),
        EventKind::Remove(RemoveKind::Folder) => event.paths.iter().cloned().map(FsEvent::DirDeleted).collect(),
        EventKind::Remove(RemoveKind::File) => event.paths.iter().cloned().map(FsEvent::LinkDeleted).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(FsEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let (from, to) = (event.paths[0].clone(), event.paths[1].clone());
            let is_dir = is_dir(&to);
            vec![FsEvent::Moved { from, to, is_dir }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) if !half_of_pair => {
            event.paths.iter().map(created).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) => Vec::new(),
        EventKind::Modify(_) => event.paths.iter().cloned().map(FsEvent::Modified).collect(),
        _ => Vec::new(),
    }
}

/// Translates one debounced batch, keeping arrival order.
pub fn drain(batch: &[Event]) -> Vec<FsEvent> {
    let paired: HashSet<usize> = batch.iter()
        .filter(|e| matches!(e.kind, EventKind::Modify(ModifyKind::Name(RenameMode::Both))))
        .filter_map(|e| e.tracker())
        .collect();
    batch.iter().flat_map(|e| translate(e, &paired)).collect()
}

fn dispatch<H: EventHandler>(handler: &H, event: &FsEvent) {
    tracing::debug!("[Librarian] {}: Idle -> Handling({:?})", handler.label(), event);
    match handler.handle(event) {
        Ok(Handled::Applied) => tracing::debug!("[Librarian] {}: applied -> Idle", handler.label()),
        Ok(Handled::Skipped(reason)) => tracing::debug!("[Librarian] {}: skipped ({}) -> Idle", handler.label(), reason),
        Err(e) => tracing::error!("[Librarian] {}: failed to handle {:?}: {}", handler.label(), event, e),
    }
}

/// Watches `handler.root()` until `stop` is raised, draining events after a
/// quiet window of `debounce`.
pub fn run_loop<H: EventHandler>(handler: H, debounce: Duration, stop: Arc<AtomicBool>) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
    watcher.watch(handler.root(), RecursiveMode::Recursive)?;
    tracing::info!("[Librarian] Watching {}", handler.label());

    let mut queue: Vec<Event> = Vec::new();
    let mut last_activity = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    queue.push(event);
                    last_activity = Instant::now();
                }
            }
            Ok(Err(e)) => tracing::warn!("[Librarian] {}: watch error: {}", handler.label(), e),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !queue.is_empty() && last_activity.elapsed() >= debounce {
                    let batch = std::mem::take(&mut queue);
                    for event in drain(&batch) {
                        dispatch(&handler, &event);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!("[Librarian] Stopped watching {}", handler.label());
    Ok(())
}

/// Hosts one watcher thread for the mounted tree and one per auto-import directory.
pub struct Librarian {
    state: AppState,
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Librarian {
    pub fn new(state: AppState) -> Self {
        Self { state, stop: Arc::new(AtomicBool::new(false)), handles: Vec::new() }
    }

    pub fn start(&mut self) -> Result<()> {
        // The mount root has to exist before it can be watched
        let (mount_root, report) = mount::mount_configured(&self.state.store)?;
        tracing::info!("[Librarian] Initial mount of {}: {:?}", mount_root.display(), report);

        self.spawn(MountWatcher::new(self.state.clone())?);

        for source in self.state.store.read(|repo| repo.auto_import_dirs())? {
            let source_path = PathBuf::from(&source.path);
            if source_path.starts_with(&mount_root) {
                tracing::error!(
                    "[Librarian] Refusing to import from {}: it lies inside the mounted tree",
                    source_path.display()
                );
                continue;
            }
            if mount_root.starts_with(&source_path) {
                tracing::warn!(
                    "[Librarian] Mount root {} lies inside import source {}; its events are ignored",
                    mount_root.display(), source_path.display()
                );
            }
            if !source_path.is_dir() {
                tracing::warn!("[Librarian] Import source {} does not exist, skipped", source_path.display());
                continue;
            }
            self.spawn(AutoImporter::new(self.state.clone(), source)?);
        }
        Ok(())
    }

    fn spawn<H: EventHandler>(&mut self, handler: H) {
        let debounce = self.state.config.debounce;
        let stop = Arc::clone(&self.stop);
        self.handles.push(thread::spawn(move || {
            let label = handler.label();
            if let Err(e) = run_loop(handler, debounce, stop) {
                tracing::error!("[Librarian] Watcher for {} died: {}", label, e);
            }
        }));
    }

    pub fn watcher_count(&self) -> usize {
        self.handles.len()
    }

    /// Raises the stop flag and waits for every watcher thread.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::config::Config;
    use crate::tagger::Tagger;

    struct Fixture {
        _dir: tempfile::TempDir,
        base: PathBuf,
        root: PathBuf,
        tagger: Tagger,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let base = std::fs::canonicalize(dir.path()).unwrap();
            let tagger = Tagger::new(AppState::local(Config::in_dir(&base)).unwrap());
            let root = tagger.set_mount_root(&base).unwrap();
            std::fs::create_dir_all(&root).unwrap();
            Self { _dir: dir, base, root, tagger }
        }

        fn file(&self, rel: &str, body: &str) -> PathBuf {
            let path = self.base.join("files").join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, body).unwrap();
            path
        }

        fn tag(&self, file: &Path, tags: &[&str]) {
            self.tagger.tag(&[file.to_string_lossy()], tags).unwrap();
        }

        fn watcher(&self) -> MountWatcher {
            MountWatcher::new(self.tagger.state().clone()).unwrap()
        }

        fn importer(&self, source: &Path) -> AutoImporter {
            let dir = AutoImportDir {
                path: source.to_string_lossy().into_owned(),
                auto_index_images: false,
                auto_index_texts: false,
            };
            AutoImporter::new(self.tagger.state().clone(), dir).unwrap()
        }

        fn tags_of(&self, name: &str) -> BTreeSet<String> {
            self.tagger.tags_of(&[name]).unwrap()
        }
    }

    fn entries(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_query_folder_is_filled_with_matches() {
        let fx = Fixture::new();
        let a = fx.file("a.txt", "a");
        let b = fx.file("b.txt", "b");
        let c = fx.file("c.txt", "c");
        fx.tag(&a, &["Work"]);
        fx.tag(&b, &["Work", "Urgent"]);
        fx.tag(&c, &["Urgent"]);

        let folder = fx.root.join("Work and Urgent");
        std::fs::create_dir(&folder).unwrap();
        let handled = fx.watcher().handle(&FsEvent::DirCreated(folder.clone())).unwrap();

        assert_eq!(handled, Handled::Applied);
        assert_eq!(entries(&folder), set(&["b.txt"]));
        assert_eq!(std::fs::read_link(folder.join("b.txt")).unwrap(), b);
    }

    #[test]
    fn test_materialized_and_noise_folders_are_not_queries() {
        let fx = Fixture::new();
        let a = fx.file("a.txt", "a");
        fx.tag(&a, &["Work"]);
        let watcher = fx.watcher();

        let tag_dir = fx.root.join("Work");
        assert_eq!(
            watcher.handle(&FsEvent::DirCreated(tag_dir.clone())).unwrap(),
            Handled::Skipped("materialized tag directory")
        );
        assert_eq!(entries(&tag_dir), set(&["a.txt"]));

        let placeholder = fx.root.join("New Folder");
        std::fs::create_dir(&placeholder).unwrap();
        assert_eq!(
            watcher.handle(&FsEvent::DirCreated(placeholder.clone())).unwrap(),
            Handled::Skipped("placeholder folder")
        );
        assert!(entries(&placeholder).is_empty());

        let internal = fx.root.join("Work/_files/Work");
        std::fs::create_dir_all(&internal).unwrap();
        assert_eq!(
            watcher.handle(&FsEvent::DirCreated(internal)).unwrap(),
            Handled::Skipped("internal directory")
        );
    }

    #[test]
    fn test_deleting_link_removes_tag() {
        let fx = Fixture::new();
        let report = fx.file("report.pdf", "pdf");
        fx.tag(&report, &["Work"]);
        let link = fx.root.join("Work/report.pdf");
        assert!(link.symlink_metadata().is_ok());

        std::fs::remove_file(&link).unwrap();
        let handled = fx.watcher().handle(&FsEvent::LinkDeleted(link.clone())).unwrap();

        assert_eq!(handled, Handled::Applied);
        assert!(fx.tags_of("report.pdf").is_empty());
        assert!(link.symlink_metadata().is_err());
    }

    #[test]
    fn test_deleting_collision_link_untags_only_its_file() {
        let fx = Fixture::new();
        let first = fx.file("x/a.txt", "x");
        let second = fx.file("y/a.txt", "y");
        fx.tag(&first, &["Notes"]);
        fx.tag(&second, &["Notes"]);

        let link = fx.root.join("Notes/2-a.txt");
        let target = std::fs::read_link(&link).unwrap();
        let kept = if target == first { &second } else { &first };
        std::fs::remove_file(&link).unwrap();
        assert_eq!(fx.watcher().handle(&FsEvent::LinkDeleted(link)).unwrap(), Handled::Applied);

        let opts = QueryOptions { show_path: true, fuzzy: false };
        let remaining = fx.tagger.query(&["Notes"], opts).unwrap();
        assert_eq!(remaining, set(&[kept.to_str().unwrap()]));
    }

    #[test]
    fn test_deleting_nested_folder_detaches_edge() {
        let fx = Fixture::new();
        let report = fx.file("report.pdf", "pdf");
        fx.tag(&report, &["Work"]);
        fx.tagger.metatag(&["Work"], &["2024"]).unwrap();
        let nested = fx.root.join("2024/Work");
        assert!(nested.join("report.pdf").symlink_metadata().is_ok());

        std::fs::remove_dir_all(&nested).unwrap();
        let watcher = fx.watcher();
        assert_eq!(
            watcher.handle(&FsEvent::LinkDeleted(nested.join("report.pdf"))).unwrap(),
            Handled::Skipped("inside a removed directory")
        );
        assert_eq!(watcher.handle(&FsEvent::DirDeleted(nested)).unwrap(), Handled::Applied);

        assert!(fx.tagger.metatags_of(&["Work"]).unwrap().is_empty());
        assert!(fx.tags_of("report.pdf").contains("Work"));
        assert!(fx.root.join("Work/report.pdf").symlink_metadata().is_ok());
    }

    #[test]
    fn test_top_level_deletion_is_ignored() {
        let fx = Fixture::new();
        let a = fx.file("a.txt", "a");
        fx.tag(&a, &["Work"]);
        let dir = fx.root.join("Work");
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(
            fx.watcher().handle(&FsEvent::DirDeleted(dir)).unwrap(),
            Handled::Skipped("top-level directory")
        );
        assert_eq!(fx.tags_of("a.txt"), set(&["Work"]));
    }

    #[test]
    fn test_search_texts_folder_uses_ranker() {
        let fx = Fixture::new();
        fx.file("budget.md", "the budget for the budget review");
        fx.file("recipe.md", "flour and sugar");
        let added = fx.tagger.add(&[fx.base.join("files/budget.md"), fx.base.join("files/recipe.md")]).unwrap();
        assert_eq!(added.added, 2);
        assert_eq!(fx.tagger.index(false).unwrap(), 2);

        let folder = fx.root.join(SEARCH_TEXTS).join("budget top_k=1");
        std::fs::create_dir_all(&folder).unwrap();
        assert_eq!(fx.watcher().handle(&FsEvent::DirCreated(folder.clone())).unwrap(), Handled::Applied);
        assert_eq!(entries(&folder), set(&["budget.md"]));
    }

    #[test]
    fn test_moving_link_retags_file() {
        let fx = Fixture::new();
        let a = fx.file("a.txt", "a");
        let b = fx.file("b.txt", "b");
        fx.tag(&a, &["Work"]);
        fx.tag(&b, &["Home"]);

        let from = fx.root.join("Work/a.txt");
        let to = fx.root.join("Home/a.txt");
        std::fs::rename(&from, &to).unwrap();
        let event = FsEvent::Moved { from, to, is_dir: false };
        assert_eq!(fx.watcher().handle(&event).unwrap(), Handled::Applied);
        assert_eq!(fx.tags_of("a.txt"), set(&["Home"]));
    }

    #[test]
    fn test_moving_folder_reparents_tag() {
        let fx = Fixture::new();
        let f = fx.file("f.txt", "f");
        let g = fx.file("g.txt", "g");
        fx.tagger.metatag(&["B"], &["A"]).unwrap();
        fx.tag(&f, &["B"]);
        fx.tag(&g, &["C"]);

        let from = fx.root.join("A/B");
        let to = fx.root.join("C/B");
        assert!(from.join("f.txt").symlink_metadata().is_ok());
        std::fs::rename(&from, &to).unwrap();
        let event = FsEvent::Moved { from, to: to.clone(), is_dir: true };
        assert_eq!(fx.watcher().handle(&event).unwrap(), Handled::Applied);

        assert_eq!(fx.tagger.metatags_of(&["B"]).unwrap(), set(&["C"]));
        assert_eq!(fx.tags_of("f.txt"), set(&["A", "B", "C"]));
        assert!(to.join("f.txt").symlink_metadata().is_ok());
    }

    #[test]
    fn test_auto_import_tags_from_location() {
        let fx = Fixture::new();
        let source = fx.base.join("inbox");
        let bill = source.join("Inbox/Invoices/bill.pdf");
        std::fs::create_dir_all(bill.parent().unwrap()).unwrap();
        std::fs::write(&bill, "pdf").unwrap();
        let partial = source.join("movie.mkv.part");
        std::fs::write(&partial, "").unwrap();

        let importer = fx.importer(&source);
        assert_eq!(importer.handle(&FsEvent::FileCreated(bill.clone())).unwrap(), Handled::Applied);
        assert_eq!(
            importer.handle(&FsEvent::FileCreated(partial)).unwrap(),
            Handled::Skipped("nothing to import")
        );

        assert_eq!(fx.tags_of("bill.pdf"), set(&["Inbox", "Invoices"]));
        assert_eq!(fx.tagger.metatags_of(&["Invoices"]).unwrap(), set(&["Inbox"]));
        assert_eq!(std::fs::read_link(fx.root.join("Inbox/Invoices/bill.pdf")).unwrap(), bill);
        assert_eq!(fx.tagger.show(crate::tagger::ShowMode::Files, false).unwrap(), vec!["bill.pdf"]);
    }

    #[test]
    fn test_auto_import_move_repairs_links() {
        let fx = Fixture::new();
        let source = fx.base.join("inbox");
        let old = source.join("Inbox/bill.pdf");
        std::fs::create_dir_all(old.parent().unwrap()).unwrap();
        std::fs::write(&old, "pdf").unwrap();
        let importer = fx.importer(&source);
        importer.handle(&FsEvent::FileCreated(old.clone())).unwrap();

        let new = source.join("Archive/bill.pdf");
        std::fs::create_dir_all(new.parent().unwrap()).unwrap();
        std::fs::rename(&old, &new).unwrap();
        let event = FsEvent::Moved { from: old, to: new.clone(), is_dir: false };
        assert_eq!(importer.handle(&event).unwrap(), Handled::Applied);

        assert_eq!(fx.tags_of("bill.pdf"), set(&["Archive", "Inbox"]));
        assert_eq!(std::fs::read_link(fx.root.join("Inbox/bill.pdf")).unwrap(), new);
        assert_eq!(std::fs::read_link(fx.root.join("Archive/bill.pdf")).unwrap(), new);
        assert_eq!(fx.tagger.show(crate::tagger::ShowMode::Files, true).unwrap(), vec![new.to_string_lossy()]);
    }

    #[test]
    fn test_untyped_removal_is_resolved_by_the_tree() {
        let fx = Fixture::new();
        let report = fx.file("report.pdf", "pdf");
        let memo = fx.file("memo.txt", "memo");
        fx.tag(&report, &["Work"]);
        fx.tag(&memo, &["Home"]);
        fx.tagger.metatag(&["Work"], &["2024"]).unwrap();
        let watcher = fx.watcher();

        let nested = fx.root.join("2024/Work");
        std::fs::remove_dir_all(&nested).unwrap();
        assert_eq!(watcher.handle(&FsEvent::Removed(nested)).unwrap(), Handled::Applied);
        assert!(fx.tagger.metatags_of(&["Work"]).unwrap().is_empty());

        let link = fx.root.join("Home/memo.txt");
        std::fs::remove_file(&link).unwrap();
        assert_eq!(watcher.handle(&FsEvent::Removed(link)).unwrap(), Handled::Applied);
        assert!(fx.tags_of("memo.txt").is_empty());
    }

    #[test]
    fn test_freed_collision_slot_keeps_single_link() {
        let fx = Fixture::new();
        let first = fx.file("x/a.txt", "x");
        let second = fx.file("y/a.txt", "y");
        fx.tag(&first, &["Notes"]);
        fx.tag(&second, &["Notes"]);

        let link = fx.root.join("Notes/a.txt");
        let removed_target = std::fs::read_link(&link).unwrap();
        let kept = if removed_target == first { second } else { first };
        std::fs::remove_file(&link).unwrap();
        assert_eq!(fx.watcher().handle(&FsEvent::LinkDeleted(link)).unwrap(), Handled::Applied);

        let notes = fx.root.join("Notes");
        assert_eq!(entries(&notes), set(&["2-a.txt"]));
        assert_eq!(std::fs::read_link(notes.join("2-a.txt")).unwrap(), kept);
    }

    #[test]
    fn test_auto_import_move_onto_known_file() {
        let fx = Fixture::new();
        let source = fx.base.join("inbox");
        let a = source.join("Notes/a.txt");
        let b = source.join("Notes/b.txt");
        std::fs::create_dir_all(a.parent().unwrap()).unwrap();
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        let importer = fx.importer(&source);
        importer.handle(&FsEvent::FileCreated(a.clone())).unwrap();
        importer.handle(&FsEvent::FileCreated(b.clone())).unwrap();
        fx.tag(&a, &["Keep"]);

        std::fs::rename(&a, &b).unwrap();
        let event = FsEvent::Moved { from: a, to: b.clone(), is_dir: false };
        assert_eq!(importer.handle(&event).unwrap(), Handled::Applied);

        assert_eq!(fx.tagger.show(crate::tagger::ShowMode::Files, true).unwrap(), vec![b.to_string_lossy()]);
        assert_eq!(fx.tags_of("b.txt"), set(&["Keep", "Notes"]));
        assert_eq!(entries(&fx.root.join("Notes")), set(&["b.txt"]));
        assert_eq!(std::fs::read_link(fx.root.join("Keep/b.txt")).unwrap(), b);
        assert!(std::fs::symlink_metadata(fx.root.join("Keep/a.txt")).is_err());
    }

    #[test]
    fn test_rename_triple_becomes_one_move() {
        let from = PathBuf::from("/nonexistent/a.txt");
        let to = PathBuf::from("/nonexistent/b.txt");
        let gone = PathBuf::from("/nonexistent/c.txt");
        let rename = |mode| EventKind::Modify(ModifyKind::Name(mode));
        let batch = vec![
            Event::new(rename(RenameMode::From)).add_path(from.clone()).set_tracker(7),
            Event::new(rename(RenameMode::To)).add_path(to.clone()).set_tracker(7),
            Event::new(rename(RenameMode::Both)).add_path(from.clone()).add_path(to.clone()).set_tracker(7),
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(gone.clone()),
            Event::new(EventKind::Remove(RemoveKind::Any)).add_path(gone.clone()),
            Event::new(rename(RenameMode::To)).add_path(to.clone()).set_tracker(9),
        ];

        assert_eq!(drain(&batch), vec![
            FsEvent::Moved { from, to: to.clone(), is_dir: false },
            FsEvent::LinkDeleted(gone.clone()),
            FsEvent::Removed(gone),
            FsEvent::FileCreated(to),
        ]);
    }
}
