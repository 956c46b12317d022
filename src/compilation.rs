//! Compilation-album detection.
//!
//! An album is a compilation when its music files carry more than one
//! distinct artist. Some common album names ("Greatest Hits", "Live") collide
//! across unrelated artists and are pinned to "not a compilation".

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::db::{Database, Result};

/// Album names (lower-cased) that are never treated as compilations.
pub const DEFAULT_OVERRIDES: &[&str] = &[
    "greatest hits",
    "the greatest hits",
    "best of",
    "the best of",
    "the very best of",
    "essential",
    "the essential",
    "gold",
    "hits",
    "live",
    "unplugged",
    "mtv unplugged",
    "anthology",
    "the singles",
    "demo",
    "untitled",
];

/// Normalized album name used on both sides of the index.
pub fn album_key(album: &str) -> String {
    album.trim().to_lowercase()
}

/// Album → compilation classification, keyed by [`album_key`].
#[derive(Debug, Clone, Default)]
pub struct CompilationIndex {
    albums: HashMap<String, bool>,
}

impl CompilationIndex {
    /// Classify from (album, artist) rows, then apply the overrides. Albums
    /// are grouped by [`album_key`]; artists by their trimmed value.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (String, String)>,
        overrides: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut artists: HashMap<String, HashSet<String>> = HashMap::new();
        for (album, artist) in pairs {
            let (album, artist) = (album_key(&album), artist.trim().to_string());
            if album.is_empty() || artist.is_empty() {
                continue;
            }
            artists.entry(album).or_default().insert(artist);
        }

        let mut albums: HashMap<String, bool> = artists
            .into_iter()
            .map(|(album, artists)| (album, artists.len() > 1))
            .collect();
        for name in overrides {
            if let Some(flag) = albums.get_mut(&album_key(name)) {
                *flag = false;
            }
        }
        Self { albums }
    }

    pub fn is_compilation(&self, album: &str) -> bool {
        self.albums
            .get(&album_key(album))
            .copied()
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.albums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }
}

/// Lazily built, process-wide [`CompilationIndex`].
///
/// The first caller builds the index while holding the lock; concurrent
/// callers wait and then share the finished index. A failed build leaves
/// the cache empty so the next caller retries.
pub struct CompilationCache {
    overrides: HashSet<String>,
    slot: Mutex<Option<Arc<CompilationIndex>>>,
}

impl Default for CompilationCache {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl CompilationCache {
    /// A cache using the default overrides plus `extra` album names.
    pub fn new(extra: &[String]) -> Self {
        let overrides = DEFAULT_OVERRIDES
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().map(|s| album_key(s)))
            .collect();
        Self {
            overrides,
            slot: Mutex::new(None),
        }
    }

    /// The index, building it from `db` on first use.
    pub fn index(&self, db: &Database) -> Result<Arc<CompilationIndex>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }

        let pairs = db.album_artist_pairs()?;
        let index = Arc::new(CompilationIndex::from_pairs(
            pairs,
            self.overrides.iter().map(String::as_str),
        ));
        log::info!(
            "Built compilation index over {} albums",
            index.len()
        );
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Whether `album` is a compilation, building the index on first use.
    pub fn get(&self, album: &str, db: &Database) -> Result<bool> {
        Ok(self.index(db)?.is_compilation(album))
    }

    /// The index if it has already been built. Never touches the store.
    pub fn built(&self) -> Option<Arc<CompilationIndex>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_built(&self) -> bool {
        self.built().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewFile, TagFields};

    fn add(db: &Database, path: &str, album: &str, artist: &str) {
        let f = NewFile::new(path, 1);
        db.insert_file_if_absent(&f).unwrap();
        let tags = TagFields {
            album: album.into(),
            artist: artist.into(),
            ..Default::default()
        };
        db.store_tags(f.id, &tags).unwrap();
    }

    #[test]
    fn test_multiple_artists_make_a_compilation() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "/m/x1.mp3", "X", "Artist One");
        add(&db, "/m/x2.mp3", "X", "Artist Two");
        add(&db, "/m/y1.mp3", "Y", "Solo");
        add(&db, "/m/y2.mp3", "Y", "Solo");

        let cache = CompilationCache::default();
        assert!(cache.get("X", &db).unwrap());
        assert!(cache.get("x", &db).unwrap());
        assert!(!cache.get("Y", &db).unwrap());
        assert!(!cache.get("Never Seen", &db).unwrap());
    }

    #[test]
    fn test_override_wins_over_aggregate() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "/m/a.mp3", "Live", "Band A");
        add(&db, "/m/b.mp3", "Live", "Band B");
        add(&db, "/m/c.mp3", "Split EP", "Band A");
        add(&db, "/m/d.mp3", "Split EP", "Band B");

        let cache = CompilationCache::new(&["  Split EP ".to_string()]);
        assert!(!cache.get("live", &db).unwrap());
        assert!(!cache.get("Split EP", &db).unwrap());
    }

    #[test]
    fn test_non_music_and_empty_fields_are_ignored() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "/m/a.flac", "Z", "One");
        add(&db, "/m/b.txt", "Z", "Two");
        add(&db, "/m/c.mp3", "Z", "");
        add(&db, "/m/d.mp3", "Z", "Three");

        let cache = CompilationCache::default();
        assert!(!cache.get("Z", &db).unwrap());
    }

    #[test]
    fn test_non_ascii_album_names_fold_together() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "/m/a.mp3", "ÉTÉ", "One");
        add(&db, "/m/b.mp3", "été", "Two");
        add(&db, "/m/c.mp3", "Ça Va", "Solo");

        let cache = CompilationCache::default();
        assert!(cache.get("ÉTÉ", &db).unwrap());
        assert!(cache.get("Été", &db).unwrap());
        assert!(!cache.get("ÇA VA", &db).unwrap());
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "/m/a.mp3", "Now 42 ", "One");
        add(&db, "/m/b.mp3", " now 42", "Two");
        add(&db, "/m/c.mp3", "Live ", "Three");
        add(&db, "/m/d.mp3", "Live", "Four");

        let cache = CompilationCache::default();
        assert!(cache.get("Now 42", &db).unwrap());
        assert!(cache.get("  NOW 42  ", &db).unwrap());
        assert!(!cache.get("live", &db).unwrap());
    }

    #[test]
    fn test_index_is_built_once() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "/m/a.mp3", "X", "One");
        add(&db, "/m/b.mp3", "X", "Two");

        let cache = CompilationCache::default();
        assert!(!cache.is_built());
        let first = cache.index(&db).unwrap();
        assert!(cache.is_built());

        // Later data does not change an already-built index
        add(&db, "/m/c.mp3", "W", "One");
        add(&db, "/m/d.mp3", "W", "Two");
        let second = cache.index(&db).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!second.is_compilation("W"));
    }

    #[test]
    fn test_concurrent_callers_share_one_index() {
        let (_dir, pool) = crate::pool::test_pool(4);
        {
            let db = pool.acquire().unwrap();
            add(&db, "/m/a.mp3", "X", "One");
            add(&db, "/m/b.mp3", "X", "Two");
        }
        let cache = CompilationCache::default();

        let indexes: Vec<Arc<CompilationIndex>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.index(&pool.acquire().unwrap()).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(indexes.iter().all(|i| Arc::ptr_eq(i, &indexes[0])));
        assert!(indexes[0].is_compilation("x"));
    }
}
