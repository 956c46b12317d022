use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Width of a content digest in bytes (SHA-256).
pub const HASH_LEN: usize = 32;

/// Digest of a file's full content. Stored as a fixed-width blob; a missing
/// value (NULL) means the hash has not been computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; HASH_LEN]);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl ToSql for ContentHash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for ContentHash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; HASH_LEN] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: HASH_LEN,
            blob_size: blob.len(),
        })?;
        Ok(Self(bytes))
    }
}

/// One row of the `files` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    pub path: String,
    pub size: i64,
    pub content_hash: Option<ContentHash>,
    pub extension: String,
    pub filename: String,
    pub deleted: bool,
    pub tag_scanned: bool,
    pub tag_hash: String,
    pub artist: String,
    pub album_artist: String,
    pub album: String,
    pub title: String,
    pub composer: String,
}

impl FileRecord {
    pub fn is_music(&self) -> bool {
        crate::MUSIC_EXTENSIONS.contains(&self.extension.as_str())
    }
}

/// Data for inserting a file seen for the first time.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: Uuid,
    pub path: String,
    pub size: i64,
    pub extension: String,
    pub filename: String,
}

impl NewFile {
    /// Build an insert for `path` with a fresh identifier and the name parts
    /// derived from the path.
    pub fn new(path: &str, size: i64) -> Self {
        let (filename, extension) = split_name(path);
        Self {
            id: Uuid::new_v4(),
            path: path.to_string(),
            size,
            extension,
            filename,
        }
    }
}

/// Split a path into (base name without extension, lower-cased extension).
/// A leading dot (".bashrc") is part of the name, not an extension.
pub fn split_name(path: &str) -> (String, String) {
    let p = Path::new(path);
    let extension = p
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let filename = p
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    (filename, extension)
}

/// Tag values persisted by the tag scanner. Empty strings when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFields {
    pub album: String,
    pub album_artist: String,
    pub artist: String,
    pub title: String,
    pub composer: String,
    pub tag_hash: String,
}

/// A record reported as a duplicate of an earlier record with the same hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub path: String,
    pub original: String,
    pub hash: ContentHash,
}

/// Library statistics.
#[derive(Debug, Clone, Default)]
pub struct LibraryStats {
    pub total_files: i64,
    pub deleted_files: i64,
    pub music_files: i64,
    pub tag_scanned: i64,
    pub hashed_files: i64,
    pub duplicate_groups: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name_lowercases_extension_only() {
        assert_eq!(
            split_name("/music/Artist/01 Intro.MP3"),
            ("01 Intro".to_string(), "mp3".to_string())
        );
    }

    #[test]
    fn test_split_name_without_extension() {
        assert_eq!(split_name("/tmp/README"), ("README".to_string(), String::new()));
        assert_eq!(split_name("/home/u/.bashrc"), (".bashrc".to_string(), String::new()));
    }

    #[test]
    fn test_split_name_multiple_dots() {
        assert_eq!(
            split_name("/a/archive.tar.GZ"),
            ("archive.tar".to_string(), "gz".to_string())
        );
    }

    #[test]
    fn test_content_hash_display_is_hex() {
        let mut bytes = [0u8; HASH_LEN];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let s = ContentHash(bytes).to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("ab00"));
        assert!(s.ends_with("01"));
    }

    #[test]
    fn test_new_file_ids_are_unique() {
        let a = NewFile::new("/x/a.mp3", 1);
        let b = NewFile::new("/x/a.mp3", 1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.extension, "mp3");
        assert_eq!(a.filename, "a");
    }
}
