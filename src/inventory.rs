//! The reconciliation pipeline.
//!
//! A folder scan walks the tree on the calling thread and hands every file to
//! a bounded worker that reconciles it, hashes it if its size collides, and
//! optionally reads its tags. Tag scans and deletion scans start from a
//! store query instead of a walk. All store access goes through the pool.

use crate::compilation::CompilationCache;
use crate::config::{AppConfig, WorkerConfig};
use crate::db::models::{Duplicate, FileRecord, LibraryStats};
use crate::layout::{self, TargetDir};
use crate::pool::{Pool, SqliteConnector, StorePool};
use crate::schedule::BoundedScheduler;
use crate::scanner::hash::{ContentHasher, HashOutcome};
use crate::scanner::reconcile::reconcile;
use crate::scanner::tags::{TagOutcome, TagScanner};
use crate::scanner::walk::{WalkedFile, walk};
use crate::scanner::{ScanError, ScanReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a folder scan does to each file after reconciling it.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub hash: bool,
    pub tags: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { hash: true, tags: false }
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    new: AtomicU64,
    hashed: AtomicU64,
    tagged: AtomicU64,
    deleted: AtomicU64,
    hash_failures: AtomicU64,
    tag_failures: AtomicU64,
    errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn report(&self) -> ScanReport {
        ScanReport {
            processed: self.processed.load(Ordering::Relaxed),
            new: self.new.load(Ordering::Relaxed),
            hashed: self.hashed.load(Ordering::Relaxed),
            tagged: self.tagged.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            hash_failures: self.hash_failures.load(Ordering::Relaxed),
            tag_failures: self.tag_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Filesystem existence check used by the deletion scan.
pub trait ExistenceCheck: Send + Sync {
    fn exists(&self, path: &Path) -> io::Result<bool>;
}

pub struct FsExistence;

impl ExistenceCheck for FsExistence {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }
}

pub struct Inventory {
    pool: StorePool,
    hasher: ContentHasher,
    tagger: TagScanner,
    existence: Box<dyn ExistenceCheck>,
    compilations: CompilationCache,
    workers: WorkerConfig,
    progress: bool,
}

impl Inventory {
    pub fn new(pool: StorePool) -> Self {
        Self {
            pool,
            hasher: ContentHasher::new(Default::default()),
            tagger: TagScanner::default(),
            existence: Box::new(FsExistence),
            compilations: CompilationCache::default(),
            workers: WorkerConfig::default(),
            progress: false,
        }
    }

    /// Open the database at `db_path` and configure the pipeline from `config`.
    pub fn from_config(config: &AppConfig, db_path: &Path) -> Result<Self, ScanError> {
        let connector = SqliteConnector::new(db_path)?;
        Ok(Self::new(Pool::new(connector, config.pool_size))
            .with_hasher(ContentHasher::new(config.hash_policy))
            .with_compilations(CompilationCache::new(&config.compilation_overrides))
            .with_workers(config.workers.clone()))
    }

    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_tag_scanner(mut self, tagger: TagScanner) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn with_existence_check(mut self, existence: impl ExistenceCheck + 'static) -> Self {
        self.existence = Box::new(existence);
        self
    }

    pub fn with_compilations(mut self, compilations: CompilationCache) -> Self {
        self.compilations = compilations;
        self
    }

    pub fn with_workers(mut self, workers: WorkerConfig) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    pub fn workers(&self) -> &WorkerConfig {
        &self.workers
    }

    /// Insert-if-new for one observed path.
    pub fn reconcile(&self, path: &str, observed_size: u64) -> Result<FileRecord, ScanError> {
        let db = self.pool.acquire()?;
        Ok(reconcile(&db, path, observed_size)?.record)
    }

    pub fn ensure_hash(&self, record: FileRecord) -> Result<FileRecord, ScanError> {
        Ok(self.hasher.ensure_hash(&self.pool, record)?.0)
    }

    pub fn scan_tags(&self, record: FileRecord) -> Result<FileRecord, ScanError> {
        Ok(self.tagger.scan_tags(&self.pool, record)?.0)
    }

    /// Walk `root` and bring every regular file below it into the inventory.
    /// Returns once every file has been processed.
    pub fn scan_folder(&self, root: &Path, options: ScanOptions) -> Result<ScanReport, ScanError> {
        let root = std::path::absolute(root)?;
        log::info!("Scanning {}", root.display());

        let counters = Counters::default();
        let pb = self.progress_bar(None);
        pb.set_message("Scanning...");

        self.fan_out(self.workers.scan, walk(&root), &counters, &pb, |file| {
            self.process_walked(file, options, &counters)
        })?;

        let report = counters.report();
        pb.finish_with_message(format!(
            "Done: {} new, {} hashed, {} errors",
            report.new, report.hashed, report.errors
        ));
        Ok(report)
    }

    fn process_walked(
        &self,
        file: WalkedFile,
        options: ScanOptions,
        counters: &Counters,
    ) -> Result<(), ScanError> {
        let path = file.path_string();
        let reconciled = {
            let db = self.pool.acquire()?;
            reconcile(&db, &path, file.size)?
        };
        if reconciled.created {
            bump(&counters.new);
        }
        let mut record = reconciled.record;
        if record.deleted {
            log::debug!("Skipping soft-deleted {}", record.path);
            return Ok(());
        }

        if options.hash {
            let (hashed, outcome) = self.hasher.ensure_hash(&self.pool, record)?;
            self.count_hash(outcome, counters);
            record = hashed;
        }
        if options.tags {
            let (_, outcome) = self.tagger.scan_tags(&self.pool, record)?;
            self.count_tags(outcome, counters);
        }
        Ok(())
    }

    /// Read tags of every stored, not yet scanned music file under `prefix`.
    pub fn scan_tags_under(&self, prefix: &str) -> Result<ScanReport, ScanError> {
        let files = self.pool.acquire()?.unscanned_music_under(prefix)?;
        log::info!("Scanning tags of {} files", files.len());

        let counters = Counters::default();
        let pb = self.progress_bar(Some(files.len() as u64));
        self.fan_out(self.workers.tags, files, &counters, &pb, |record| {
            let (_, outcome) = self.tagger.scan_tags(&self.pool, record)?;
            self.count_tags(outcome, &counters);
            Ok(())
        })?;

        let report = counters.report();
        pb.finish_with_message(format!(
            "Done: {} tagged, {} failed",
            report.tagged, report.tag_failures
        ));
        Ok(report)
    }

    /// Soft-delete every active record under `prefix` whose file is gone.
    pub fn deletion_scan(&self, prefix: &str) -> Result<ScanReport, ScanError> {
        let files = self.pool.acquire()?.active_files_under(prefix)?;
        log::info!("Checking {} files for deletion", files.len());

        let counters = Counters::default();
        let pb = self.progress_bar(Some(files.len() as u64));
        self.fan_out(self.workers.check, files, &counters, &pb, |record| {
            if self.still_exists(Path::new(&record.path)) {
                return Ok(());
            }
            log::info!("Does not exist: {}", record.path);
            if self.pool.acquire()?.mark_deleted(record.id)? {
                bump(&counters.deleted);
            }
            Ok(())
        })?;

        let report = counters.report();
        pb.finish_with_message(format!("Done: {} deleted", report.deleted));
        Ok(report)
    }

    /// Every record under `prefix` that repeats the content of an earlier one.
    pub fn find_duplicates(&self, prefix: &str) -> Result<Vec<Duplicate>, ScanError> {
        Ok(self.pool.acquire()?.duplicates_under(prefix)?)
    }

    /// The `<artist>/<album>` directory a record belongs in.
    pub fn derive_directory(&self, record: &FileRecord) -> Result<TargetDir, ScanError> {
        let index = match self.compilations.built() {
            Some(index) => index,
            None => {
                let db = self.pool.acquire()?;
                self.compilations.index(&db)?
            }
        };
        Ok(layout::derive_directory(record, &index))
    }

    pub fn file_by_path(&self, path: &str) -> Result<Option<FileRecord>, ScanError> {
        Ok(self.pool.acquire()?.file_by_path(path)?)
    }

    pub fn stats(&self) -> Result<LibraryStats, ScanError> {
        Ok(self.pool.acquire()?.stats()?)
    }

    /// Run `work` over `items` with at most `workers` in flight. Recoverable
    /// failures are logged and counted; the first fatal one stops admission
    /// and is returned once in-flight work has drained.
    fn fan_out<I, F>(
        &self,
        workers: usize,
        items: I,
        counters: &Counters,
        pb: &ProgressBar,
        work: F,
    ) -> Result<(), ScanError>
    where
        I: IntoIterator,
        I::Item: Send,
        F: Fn(I::Item) -> Result<(), ScanError> + Sync,
    {
        let scheduler = BoundedScheduler::new(workers);
        let fatal: Mutex<Option<ScanError>> = Mutex::new(None);

        scheduler.run(items, |item| {
            bump(&counters.processed);
            match work(item) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    log::error!("{}", e);
                    scheduler.stop();
                    let mut slot = fatal.lock().unwrap_or_else(|p| p.into_inner());
                    slot.get_or_insert(e);
                }
                Err(e) => {
                    log::warn!("{}", e);
                    bump(&counters.errors);
                }
            }
            pb.inc(1);
        });

        match fatal.into_inner().unwrap_or_else(|p| p.into_inner()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn count_hash(&self, outcome: HashOutcome, counters: &Counters) {
        match outcome {
            HashOutcome::Hashed => bump(&counters.hashed),
            HashOutcome::Unreadable => bump(&counters.hash_failures),
            HashOutcome::AlreadyHashed | HashOutcome::UniqueSize => {}
        }
    }

    fn count_tags(&self, outcome: TagOutcome, counters: &Counters) {
        match outcome {
            TagOutcome::Scanned => bump(&counters.tagged),
            TagOutcome::DecodeFailed | TagOutcome::Unreadable => bump(&counters.tag_failures),
            TagOutcome::AlreadyScanned | TagOutcome::NotMusic => {}
        }
    }

    /// Anything other than a definite "not there" counts as present.
    fn still_exists(&self, path: &Path) -> bool {
        match self.existence.exists(path) {
            Ok(exists) => exists,
            Err(e) => {
                log::debug!("Cannot check {}: {}", path.display(), e);
                true
            }
        }
    }

    pub(crate) fn progress_bar(&self, len: Option<u64>) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        match len {
            Some(len) => {
                let pb = ProgressBar::new(len);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template("{spinner:.green} {pos} files ({per_sec}) {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb
            }
        }
    }
}
