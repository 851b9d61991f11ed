//! Extension based default tags.
//!
//! Newly added files get their extension as a tag, and the extension tag sits
//! below a group tag (`Documents/pdf`, `Images/png`, ...).

use std::path::Path;

pub const IMAGES: &str = "Images";
pub const DOCUMENTS: &str = "Documents";
pub const SOURCE_CODE: &str = "Source Code";

pub const FILE_GROUPS: &[(&str, &[&str])] = &[
    (IMAGES, &["jpg", "jpeg", "png", "svg", "tif", "ico", "icns", "webp", "gif"]),
    ("Videos", &["mp4", "webm", "avi", "mkv", "mov"]),
    (DOCUMENTS, &["txt", "md", "rst", "pdf", "epub", "doc", "docx"]),
    (SOURCE_CODE, &[
        "sh", "py", "pyx", "ipynb", "c", "h", "cpp", "rs", "erl", "ex",
        "js", "ts", "css", "html", "sql",
    ]),
    ("Configs", &["yml", "yaml", "xml", "conf", "ini", "toml", "json", "lock"]),
    ("Archives", &["zip", "gz", "xz", "z", "sz", "lz", "bz2", "tar", "iso", "7z", "rar"]),
    ("Blobs", &["bin", "pyc", "so", "o", "ar", "a", "lib", "rmeta", "jar", "exe"]),
];

/// Lowercased extension, if it looks like a real one.
pub fn file_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    (!ext.is_empty() && ext.len() < 7).then_some(ext)
}

pub fn group_of(file_type: &str) -> Option<&'static str> {
    FILE_GROUPS.iter()
        .find(|(_, types)| types.contains(&file_type))
        .map(|(group, _)| *group)
}

/// `(group, type)` tags for a path. Either part may be absent.
pub fn default_tags(path: &Path) -> (Option<&'static str>, Option<String>) {
    match file_type(path) {
        Some(ft) => (group_of(&ft), Some(ft)),
        None => (None, None),
    }
}

pub fn is_image(path: &Path) -> bool {
    file_type(path).is_some_and(|ft| group_of(&ft) == Some(IMAGES))
}

pub fn is_text(path: &Path) -> bool {
    file_type(path).is_some_and(|ft| matches!(group_of(&ft), Some(DOCUMENTS) | Some(SOURCE_CODE)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tags() {
        assert_eq!(default_tags(Path::new("/a/Report.PDF")), (Some(DOCUMENTS), Some("pdf".into())));
        assert_eq!(default_tags(Path::new("/a/data.weird")), (None, Some("weird".into())));
        assert_eq!(default_tags(Path::new("/a/Makefile")), (None, None));
        assert_eq!(default_tags(Path::new("/a/archive.verylongext")), (None, None));
    }

    #[test]
    fn test_kinds() {
        assert!(is_image(Path::new("cat.png")));
        assert!(is_text(Path::new("main.rs")));
        assert!(!is_text(Path::new("cat.png")));
    }
}
