use crate::db::models::{FileRecord, TagFields};
use crate::pool::StorePool;
use crate::scanner::ScanError;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::tag::{ItemValue, Tag};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tag decode error: {0}")]
    Decode(String),
}

/// Reads embedded tags from a music file.
pub trait TagDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<TagFields, TagError>;
}

/// Tag decoding through lofty (ID3, Vorbis comments, MP4 atoms).
pub struct LoftyDecoder;

impl TagDecoder for LoftyDecoder {
    fn decode(&self, path: &Path) -> Result<TagFields, TagError> {
        // Missing or unreadable files are reported apart from bad tags
        std::fs::metadata(path)?;

        let tagged_file =
            lofty::read_from_path(path).map_err(|e| TagError::Decode(e.to_string()))?;

        // Try primary tag, then fall back
        let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            Some(t) => t,
            None => return Ok(TagFields::default()),
        };

        let text = |key: ItemKey| tag.get_string(&key).unwrap_or_default().to_string();
        Ok(TagFields {
            album: tag.album().map(|s| s.to_string()).unwrap_or_default(),
            album_artist: text(ItemKey::AlbumArtist),
            artist: tag.artist().map(|s| s.to_string()).unwrap_or_default(),
            title: tag.title().map(|s| s.to_string()).unwrap_or_default(),
            composer: text(ItemKey::Composer),
            tag_hash: tag_digest(tag),
        })
    }
}

/// SHA-256 over every tag item and embedded picture, hex encoded.
fn tag_digest(tag: &Tag) -> String {
    let mut hasher = Sha256::new();
    for item in tag.items() {
        hasher.update(format!("{:?}", item.key()).as_bytes());
        hasher.update([0u8]);
        match item.value() {
            ItemValue::Text(s) | ItemValue::Locator(s) => hasher.update(s.as_bytes()),
            ItemValue::Binary(b) => hasher.update(b),
        }
        hasher.update([0u8]);
    }
    for picture in tag.pictures() {
        hasher.update(picture.data());
    }
    format!("{:x}", hasher.finalize())
}

/// Every raw tag item of a file as a JSON object, for inspection.
pub fn read_raw(path: &Path) -> Result<serde_json::Value, TagError> {
    let tagged_file = lofty::read_from_path(path).map_err(|e| TagError::Decode(e.to_string()))?;
    let mut items = serde_json::Map::new();
    for tag in tagged_file.tags() {
        for item in tag.items() {
            let value = match item.value() {
                ItemValue::Text(s) | ItemValue::Locator(s) => s.clone(),
                ItemValue::Binary(b) => format!("<{} bytes>", b.len()),
            };
            items.insert(format!("{:?}", item.key()), serde_json::Value::String(value));
        }
    }
    Ok(serde_json::Value::Object(items))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    AlreadyScanned,
    NotMusic,
    Scanned,
    /// Tags could not be decoded; the file is marked scanned with empty fields.
    DecodeFailed,
    /// The file could not be opened; left unscanned for a later run.
    Unreadable,
}

pub struct TagScanner {
    decoder: Box<dyn TagDecoder>,
}

impl Default for TagScanner {
    fn default() -> Self {
        Self::new(LoftyDecoder)
    }
}

impl TagScanner {
    pub fn new(decoder: impl TagDecoder + 'static) -> Self {
        Self {
            decoder: Box::new(decoder),
        }
    }

    /// Decode and persist the tags of a music file that has not been scanned.
    pub fn scan_tags(
        &self,
        pool: &StorePool,
        mut record: FileRecord,
    ) -> Result<(FileRecord, TagOutcome), ScanError> {
        if record.tag_scanned {
            return Ok((record, TagOutcome::AlreadyScanned));
        }
        if !record.is_music() {
            return Ok((record, TagOutcome::NotMusic));
        }

        let (fields, outcome) = match self.decoder.decode(Path::new(&record.path)) {
            Ok(fields) => (fields, TagOutcome::Scanned),
            Err(TagError::Io(e)) => {
                log::warn!("Error loading {}: {}", record.path, e);
                return Ok((record, TagOutcome::Unreadable));
            }
            Err(TagError::Decode(message)) => {
                log::warn!("Error reading tags of {}: {}", record.path, message);
                (TagFields::default(), TagOutcome::DecodeFailed)
            }
        };

        pool.acquire()?.store_tags(record.id, &fields)?;

        record.album = fields.album;
        record.album_artist = fields.album_artist;
        record.artist = fields.artist;
        record.title = fields.title;
        record.composer = fields.composer;
        record.tag_hash = fields.tag_hash;
        record.tag_scanned = true;
        Ok((record, outcome))
    }
}
