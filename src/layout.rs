use crate::compilation::CompilationIndex;
use crate::db::models::FileRecord;
use std::path::{Path, PathBuf};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const COMPILATION: &str = "Compilation";

/// Two-level target directory for a music file: `<artist>/<album>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDir {
    pub artist: String,
    pub album: String,
}

impl TargetDir {
    /// `root/<artist>/<album>` with each component made safe for a path.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(sanitize_component(&self.artist))
            .join(sanitize_component(&self.album))
    }
}

/// Choose the artist and album directory for a record. Always returns two
/// non-empty components.
///
/// The album artist wins over the track artist. With neither, the album is
/// filed under "Compilation" when the index says so, else "Unknown Artist".
pub fn derive_directory(record: &FileRecord, compilations: &CompilationIndex) -> TargetDir {
    let album_artist = record.album_artist.trim();
    let artist = record.artist.trim();
    let album = record.album.trim();

    let artist = if !album_artist.is_empty() {
        album_artist.to_string()
    } else if !artist.is_empty() {
        artist.to_string()
    } else if !album.is_empty() && compilations.is_compilation(album) {
        COMPILATION.to_string()
    } else {
        UNKNOWN_ARTIST.to_string()
    };

    let album = if album.is_empty() {
        UNKNOWN_ALBUM.to_string()
    } else {
        album.to_string()
    };

    TargetDir { artist, album }
}

/// Make a tag value usable as one directory name: no separators, no NUL,
/// no `.`/`..`.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    match cleaned {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned.to_string(),
    }
}
