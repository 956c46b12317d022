use crate::db::models::{ContentHash, FileRecord, HASH_LEN};
use crate::pool::StorePool;
use crate::scanner::ScanError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Reads a file's content and digests it.
pub trait ContentReader: Send + Sync {
    fn digest(&self, path: &Path) -> io::Result<ContentHash>;
}

/// SHA-256 over the file, read in 1 MiB chunks.
pub struct FileContentReader;

impl ContentReader for FileContentReader {
    fn digest(&self, path: &Path) -> io::Result<ContentHash> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&hasher.finalize());
        Ok(ContentHash(bytes))
    }
}

/// When to pay for reading a file's full content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashPolicy {
    /// Only files sharing their size with another stored file. Files of
    /// different sizes cannot be identical, so nothing else needs a hash.
    #[default]
    SizeCollision,
    /// Every file.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOutcome {
    AlreadyHashed,
    UniqueSize,
    Hashed,
    Unreadable,
}

pub struct ContentHasher {
    policy: HashPolicy,
    reader: Box<dyn ContentReader>,
}

impl ContentHasher {
    pub fn new(policy: HashPolicy) -> Self {
        Self::with_reader(policy, FileContentReader)
    }

    pub fn with_reader(policy: HashPolicy, reader: impl ContentReader + 'static) -> Self {
        Self {
            policy,
            reader: Box::new(reader),
        }
    }

    pub fn policy(&self) -> HashPolicy {
        self.policy
    }

    /// Give `record` a content hash if it needs one.
    ///
    /// Under [`HashPolicy::SizeCollision`] a hash is computed only when
    /// another non-deleted file has the same size; the other unhashed files
    /// of that size are hashed too, so a colliding set is complete no matter
    /// which member was stored first. An unreadable file is logged and comes
    /// back without a hash.
    pub fn ensure_hash(
        &self,
        pool: &StorePool,
        mut record: FileRecord,
    ) -> Result<(FileRecord, HashOutcome), ScanError> {
        if record.content_hash.is_some() {
            return Ok((record, HashOutcome::AlreadyHashed));
        }

        if self.policy == HashPolicy::SizeCollision {
            let same_size = pool.acquire()?.count_files_with_size(record.size)?;
            if same_size <= 1 {
                return Ok((record, HashOutcome::UniqueSize));
            }
        }

        let outcome = match self.hash_one(pool, &record)? {
            Some(hash) => {
                record.content_hash = Some(hash);
                HashOutcome::Hashed
            }
            None => HashOutcome::Unreadable,
        };

        if self.policy == HashPolicy::SizeCollision {
            let peers = pool
                .acquire()?
                .unhashed_files_with_size(record.size, record.id)?;
            for peer in &peers {
                self.hash_one(pool, peer)?;
            }
        }

        Ok((record, outcome))
    }

    fn hash_one(&self, pool: &StorePool, record: &FileRecord) -> Result<Option<ContentHash>, ScanError> {
        log::debug!("Hashing {}", record.path);
        let hash = match self.reader.digest(Path::new(&record.path)) {
            Ok(hash) => hash,
            Err(e) => {
                log::warn!("Error reading {}: {}", record.path, e);
                return Ok(None);
            }
        };
        // No-op if a concurrent worker stored it first
        pool.acquire()?.set_content_hash(record.id, &hash)?;
        Ok(Some(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_pool;
    use crate::scanner::reconcile::reconcile;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReader {
        reads: Arc<AtomicUsize>,
    }

    impl ContentReader for CountingReader {
        fn digest(&self, path: &Path) -> io::Result<ContentHash> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            FileContentReader.digest(path)
        }
    }

    fn counting(policy: HashPolicy) -> (ContentHasher, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let hasher = ContentHasher::with_reader(policy, CountingReader { reads: Arc::clone(&reads) });
        (hasher, reads)
    }

    fn store(pool: &StorePool, path: &Path) -> FileRecord {
        let size = fs::metadata(path).unwrap().len();
        reconcile(&pool.acquire().unwrap(), &path.to_string_lossy(), size)
            .unwrap()
            .record
    }

    #[test]
    fn test_distinct_sizes_are_never_read() {
        let (dir, pool) = test_pool(2);
        let (hasher, reads) = counting(HashPolicy::SizeCollision);
        let mut records = Vec::new();
        for (name, len) in [("a", 1), ("b", 2), ("c", 3)] {
            let path = dir.path().join(name);
            fs::write(&path, vec![b'x'; len]).unwrap();
            records.push(store(&pool, &path));
        }

        for r in records {
            let (r, outcome) = hasher.ensure_hash(&pool, r).unwrap();
            assert_eq!(outcome, HashOutcome::UniqueSize);
            assert!(r.content_hash.is_none());
        }
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_size_files_are_both_hashed() {
        let (dir, pool) = test_pool(2);
        let (hasher, _) = counting(HashPolicy::SizeCollision);
        let a_path = dir.path().join("a");
        let b_path = dir.path().join("b");
        fs::write(&a_path, b"0123456789").unwrap();
        fs::write(&b_path, b"abcdefghij").unwrap();

        // `a` checks before `b` is stored: no collision yet
        let a = store(&pool, &a_path);
        let (a, outcome) = hasher.ensure_hash(&pool, a).unwrap();
        assert_eq!(outcome, HashOutcome::UniqueSize);
        assert!(a.content_hash.is_none());

        // `b` sees the collision and hashes `a` as well
        let b = store(&pool, &b_path);
        let (b, outcome) = hasher.ensure_hash(&pool, b).unwrap();
        assert_eq!(outcome, HashOutcome::Hashed);

        let a = pool.acquire().unwrap().file_by_id(a.id).unwrap().unwrap();
        assert!(a.content_hash.is_some());
        assert!(b.content_hash.is_some());
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_identical_content_gives_equal_hashes() {
        let (dir, pool) = test_pool(2);
        let hasher = ContentHasher::new(HashPolicy::SizeCollision);
        let a_path = dir.path().join("a");
        let b_path = dir.path().join("b");
        fs::write(&a_path, b"same bytes").unwrap();
        fs::write(&b_path, b"same bytes").unwrap();
        let a = store(&pool, &a_path);
        let b = store(&pool, &b_path);

        let (a, _) = hasher.ensure_hash(&pool, a).unwrap();
        let b = pool.acquire().unwrap().file_by_id(b.id).unwrap().unwrap();
        let (b, outcome) = hasher.ensure_hash(&pool, b).unwrap();
        assert_eq!(outcome, HashOutcome::AlreadyHashed);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_existing_hash_is_not_recomputed() {
        let (dir, pool) = test_pool(1);
        let (hasher, reads) = counting(HashPolicy::Always);
        let path = dir.path().join("a");
        fs::write(&path, b"abc").unwrap();
        let r = store(&pool, &path);

        let (r, outcome) = hasher.ensure_hash(&pool, r).unwrap();
        assert_eq!(outcome, HashOutcome::Hashed);
        let (_, outcome) = hasher.ensure_hash(&pool, r).unwrap();
        assert_eq!(outcome, HashOutcome::AlreadyHashed);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unreadable_file_keeps_hash_unset() {
        let (dir, pool) = test_pool(1);
        let hasher = ContentHasher::new(HashPolicy::Always);
        let path = dir.path().join("gone");
        fs::write(&path, b"abc").unwrap();
        let r = store(&pool, &path);
        fs::remove_file(&path).unwrap();

        let (r, outcome) = hasher.ensure_hash(&pool, r).unwrap();
        assert_eq!(outcome, HashOutcome::Unreadable);
        assert!(r.content_hash.is_none());
        let stored = pool.acquire().unwrap().file_by_id(r.id).unwrap().unwrap();
        assert!(stored.content_hash.is_none());
    }

    #[test]
    fn test_sha256_of_known_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        let hash = FileContentReader.digest(&path).unwrap();
        assert_eq!(
            hash.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
