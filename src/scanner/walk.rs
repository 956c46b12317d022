use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file found by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub path: PathBuf,
    pub size: u64,
}

impl WalkedFile {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Lazily walk `root` and yield every regular file below it.
///
/// Directories, symlinks and special files are skipped. An unreadable entry
/// is logged and its branch is abandoned; the rest of the walk continues.
/// Order is whatever the filesystem returns.
pub fn walk(root: &Path) -> impl Iterator<Item = WalkedFile> + use<> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| match entry.metadata() {
            Ok(meta) => Some(WalkedFile {
                path: entry.into_path(),
                size: meta.len(),
            }),
            Err(e) => {
                log::warn!("Skipping {}: {}", entry.path().display(), e);
                None
            }
        })
}
