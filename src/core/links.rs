//! Idempotent filesystem primitives for the mounted tree.
//!
//! Every mutation here tolerates its own earlier effects: an existing directory
//! or an existing link to the same target is success, an already removed entry
//! is success. Concurrent mount passes and watcher edits can therefore race
//! without failing each other.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::error::Result;

/// Upper bound on `<n>-<name>` candidates tried in one directory.
const MAX_COLLISIONS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new link was created under this name.
    Created(String),
    /// A link with this name already pointed at the target.
    Present(String),
}

/// Creates `dir` (and parents). Returns `true` if it did not exist before.
pub fn ensure_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Name used for the `n`-th distinct target competing for `name` (1-based).
pub fn collision_name(name: &str, n: usize) -> String {
    if n <= 1 { name.to_string() } else { format!("{}-{}", n, name) }
}

/// Inverse of [`collision_name`] for `n >= 2`.
pub fn strip_collision_prefix(name: &str) -> Option<&str> {
    let (prefix, rest) = name.split_once('-')?;
    let n: usize = prefix.parse().ok()?;
    (n >= 2 && !rest.is_empty()).then_some(rest)
}

/// Places a symlink to `target` named `name` inside `dir`.
///
/// A link to `target` under `name` or any `<n>-name` already in `dir` wins.
/// Otherwise `name`, `2-name`, `3-name`, ... are tried until a free slot is found.
pub fn place_link(dir: &Path, name: &str, target: &Path) -> Result<LinkOutcome> {
    if let Some(existing) = existing_link(dir, name, target) {
        return Ok(LinkOutcome::Present(existing));
    }
    for n in 1..=MAX_COLLISIONS {
        let candidate = collision_name(name, n);
        let link = dir.join(&candidate);
        match std::os::unix::fs::symlink(target, &link) {
            Ok(()) => return Ok(LinkOutcome::Created(candidate)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if points_to(&link, target) {
                    return Ok(LinkOutcome::Present(candidate));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(crate::error::TagError::State(format!(
        "Too many colliding names for {} in {}", name, dir.display()
    )))
}

/// Name of an entry in `dir` that is `name` or one of its collision names and
/// points at `target`. Earlier slots may have been freed, so every entry is checked.
fn existing_link(dir: &Path, name: &str, target: &Path) -> Option<String> {
    std::fs::read_dir(dir).ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|entry| entry == name || strip_collision_prefix(entry) == Some(name))
        .find(|entry| points_to(&dir.join(entry), target))
}

fn points_to(link: &Path, target: &Path) -> bool {
    std::fs::read_link(link).map(|t| t == target).unwrap_or(false)
}

/// Removes every directory called `name` (case-insensitive) below `root`.
pub fn remove_dirs_named(root: &Path, name: &str) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }
    let wanted = name.to_lowercase();
    let doomed: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.file_name().to_string_lossy().to_lowercase() == wanted)
        .map(|e| e.into_path())
        .collect();

    let mut removed = 0;
    // Walk order is parent-first, so nested matches may already be gone
    for dir in doomed {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[Links] Failed to remove {}: {}", dir.display(), e),
        }
    }
    Ok(removed)
}

/// Every symlink below `root` pointing at `target`.
pub fn links_to(root: &Path, target: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path_is_symlink())
        .filter(|e| points_to(e.path(), target))
        .map(|e| e.into_path())
        .collect()
}

/// Re-points every link to `old_target` at `new_target`.
///
/// A link keeping its name is swapped atomically (fresh temp link renamed over
/// it); a link whose file was renamed is re-placed under the new file name.
pub fn repair_links(root: &Path, old_target: &Path, new_target: &Path) -> Result<usize> {
    let new_name = new_target.file_name().map(|n| n.to_string_lossy().into_owned());
    let old_name = old_target.file_name().map(|n| n.to_string_lossy().into_owned());
    let mut repaired = 0;

    for link in links_to(root, old_target) {
        let Some(dir) = link.parent() else { continue };
        let link_name = link.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        // The directory already links the new target: the old link is redundant
        if let Some(name) = &new_name {
            if existing_link(dir, name, new_target).is_some() {
                remove_link(&link)?;
                repaired += 1;
                continue;
            }
        }

        let renamed = new_name != old_name;
        if let (true, Some(name)) = (renamed && old_name.as_ref() == Some(&link_name), &new_name) {
            place_link(dir, name, new_target)?;
            remove_link(&link)?;
        } else {
            let temp = dir.join(format!("_tmp{}", link_name));
            remove_link(&temp)?;
            std::os::unix::fs::symlink(new_target, &temp)?;
            std::fs::rename(&temp, &link)?;
        }
        repaired += 1;
    }
    Ok(repaired)
}

/// Removes one link; a link that is already gone is fine.
pub fn remove_link(link: &Path) -> Result<bool> {
    match std::fs::remove_file(link) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_link_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.txt");
        std::fs::write(&target, "a").unwrap();

        let first = place_link(dir.path(), "link.txt", &target).unwrap();
        let second = place_link(dir.path(), "link.txt", &target).unwrap();
        assert_eq!(first, LinkOutcome::Created("link.txt".into()));
        assert_eq!(second, LinkOutcome::Present("link.txt".into()));
    }

    #[test]
    fn test_collisions_get_counter_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let links = dir.path().join("links");
        std::fs::create_dir(&links).unwrap();
        let a = dir.path().join("one").join("a.txt");
        let b = dir.path().join("two").join("a.txt");

        assert_eq!(place_link(&links, "a.txt", &a).unwrap(), LinkOutcome::Created("a.txt".into()));
        assert_eq!(place_link(&links, "a.txt", &b).unwrap(), LinkOutcome::Created("2-a.txt".into()));
        assert_eq!(place_link(&links, "a.txt", &b).unwrap(), LinkOutcome::Present("2-a.txt".into()));
        assert_eq!(std::fs::read_link(links.join("2-a.txt")).unwrap(), b);
    }

    #[test]
    fn test_freed_slot_does_not_duplicate_link() {
        let dir = tempfile::tempdir().unwrap();
        let links = dir.path().join("links");
        std::fs::create_dir(&links).unwrap();
        let one = dir.path().join("one").join("a.txt");
        let two = dir.path().join("two").join("a.txt");
        place_link(&links, "a.txt", &one).unwrap();
        place_link(&links, "a.txt", &two).unwrap();

        remove_link(&links.join("a.txt")).unwrap();
        assert_eq!(place_link(&links, "a.txt", &two).unwrap(), LinkOutcome::Present("2-a.txt".into()));

        let names: Vec<String> = std::fs::read_dir(&links)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2-a.txt".to_string()]);
    }

    #[test]
    fn test_repair_links_drops_redundant_link() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mnt");
        std::fs::create_dir_all(root.join("Notes")).unwrap();
        let old = dir.path().join("src/a.txt");
        let new = dir.path().join("src/b.txt");
        std::os::unix::fs::symlink(&old, root.join("Notes/a.txt")).unwrap();
        std::os::unix::fs::symlink(&new, root.join("Notes/b.txt")).unwrap();

        assert_eq!(repair_links(&root, &old, &new).unwrap(), 1);
        assert!(std::fs::symlink_metadata(root.join("Notes/a.txt")).is_err());
        assert!(std::fs::symlink_metadata(root.join("Notes/2-b.txt")).is_err());
        assert_eq!(std::fs::read_link(root.join("Notes/b.txt")).unwrap(), new);
    }

    #[test]
    fn test_strip_collision_prefix() {
        assert_eq!(strip_collision_prefix("2-a.txt"), Some("a.txt"));
        assert_eq!(strip_collision_prefix("13-my-file.md"), Some("my-file.md"));
        assert_eq!(strip_collision_prefix("1-a.txt"), None);
        assert_eq!(strip_collision_prefix("my-file.md"), None);
    }

    #[test]
    fn test_remove_dirs_named_all_levels() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Work/_files")).unwrap();
        std::fs::create_dir_all(dir.path().join("2024/work")).unwrap();
        std::fs::create_dir_all(dir.path().join("2024/Home")).unwrap();

        assert_eq!(remove_dirs_named(dir.path(), "Work").unwrap(), 2);
        assert!(!dir.path().join("Work").exists());
        assert!(!dir.path().join("2024/work").exists());
        assert!(dir.path().join("2024/Home").exists());
    }

    #[test]
    fn test_repair_links_follows_move() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mnt");
        std::fs::create_dir_all(root.join("Work")).unwrap();
        let old = dir.path().join("src/report.pdf");
        let new = dir.path().join("src/archive/report.pdf");
        std::os::unix::fs::symlink(&old, root.join("Work/report.pdf")).unwrap();

        assert_eq!(repair_links(&root, &old, &new).unwrap(), 1);
        assert_eq!(std::fs::read_link(root.join("Work/report.pdf")).unwrap(), new);
        assert!(!root.join("Work/_tmpreport.pdf").exists());
    }

    #[test]
    fn test_repair_links_follows_rename() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mnt");
        std::fs::create_dir_all(root.join("Work")).unwrap();
        let old = dir.path().join("src/draft.md");
        let new = dir.path().join("src/final.md");
        std::os::unix::fs::symlink(&old, root.join("Work/draft.md")).unwrap();

        repair_links(&root, &old, &new).unwrap();
        assert!(std::fs::symlink_metadata(root.join("Work/draft.md")).is_err());
        assert_eq!(std::fs::read_link(root.join("Work/final.md")).unwrap(), new);
    }
}
