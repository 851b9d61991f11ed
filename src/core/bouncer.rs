// FILE: src/core/bouncer.rs
//! The Bouncer: Distinguishes between Human Intent and System Noise.
//!
//! System Noise is defined as:
//! 1. Hidden files and directories (start with .)
//! 2. Components listed in the store's ignore list (node_modules, __pycache__, ...)
//! 3. Partial downloads that will be renamed once complete
//! 4. Placeholder folders GUIs create before the user types a name

use std::path::Path;

const PARTIAL_EXTENSIONS: &[&str] = &[
    "part", "crdownload", "download", "partial", "tmp", "swp",
];

const PLACEHOLDER_FOLDERS: &[&str] = &[
    "new folder",
    "untitled folder",
];

pub struct Bouncer {
    ignore_list: Vec<String>,
}

impl Bouncer {
    pub fn new(ignore_list: Vec<String>) -> Self {
        Self { ignore_list }
    }

    /// True if any component of `relative` is hidden or on the ignore list.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        relative.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            name.starts_with('.') || self.ignore_list.iter().any(|rule| rule == name.as_ref())
        })
    }

    /// Browser/downloader sentinels: the real file shows up later via a rename.
    pub fn is_partial_download(path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
        if name.ends_with('~') {
            return true;
        }
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| PARTIAL_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Decides if a freshly created folder name is a query or GUI noise.
    pub fn is_placeholder_folder(name: &str) -> bool {
        let lower = name.trim().to_lowercase();
        PLACEHOLDER_FOLDERS.iter().any(|p| lower.starts_with(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_and_listed_components() {
        let bouncer = Bouncer::new(vec!["node_modules".into()]);
        assert!(bouncer.is_ignored(Path::new("proj/.git/config")));
        assert!(bouncer.is_ignored(Path::new("web/node_modules/x.js")));
        assert!(!bouncer.is_ignored(Path::new("docs/report.pdf")));
    }

    #[test]
    fn test_partial_downloads() {
        assert!(Bouncer::is_partial_download(Path::new("/dl/movie.mkv.part")));
        assert!(Bouncer::is_partial_download(Path::new("/dl/setup.CRDOWNLOAD")));
        assert!(Bouncer::is_partial_download(Path::new("/dl/notes.txt~")));
        assert!(!Bouncer::is_partial_download(Path::new("/dl/movie.mkv")));
    }

    #[test]
    fn test_placeholder_folders() {
        assert!(Bouncer::is_placeholder_folder("New Folder"));
        assert!(Bouncer::is_placeholder_folder("untitled folder 2"));
        assert!(!Bouncer::is_placeholder_folder("Work and Urgent"));
    }
}
