//! Actions applied to a list of paths, one per line.
//!
//! Moves never overwrite an existing file or a path the db already knows.
//! A move whose db update fails is renamed back. A target directory that
//! cannot be created stops the whole run.

use crate::db::DbError;
use crate::inventory::Inventory;
use crate::layout::{TargetDir, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use crate::pool::PoolError;
use crate::schedule::BoundedScheduler;
use crate::scanner::ScanError;
use crate::scanner::tags::{self, TagError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Tags(#[from] TagError),
    #[error("Error creating directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("No target root configured for moves")]
    NoTargetRoot,
}

impl ActionError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Pool(_) | Self::CreateDir { .. } | Self::NoTargetRoot => true,
            Self::Scan(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Echo the path.
    Print,
    /// Remove the file.
    Unlink,
    /// Move into `<root>/<artist>/<album>/` derived from the file's tags.
    MoveTags,
    /// Move into `<root>/<grandparent>/<parent>/` taken from the current path.
    MovePath,
    /// Print raw tags as JSON.
    Read,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub dry_run: bool,
    pub target_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteReport {
    pub processed: u64,
    pub done: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Done,
    Skipped,
}

/// Read a list file: one path per line, surrounding whitespace trimmed,
/// blank lines ignored.
pub fn read_list(path: &Path) -> io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Apply `action` to every path with at most `workers` in flight.
pub fn execute(
    inventory: &Inventory,
    paths: Vec<String>,
    action: Action,
    options: &ExecuteOptions,
    workers: usize,
) -> Result<ExecuteReport, ActionError> {
    let pb = inventory.progress_bar(Some(paths.len() as u64));
    let scheduler = BoundedScheduler::new(workers);
    let fatal: Mutex<Option<ActionError>> = Mutex::new(None);
    let processed = AtomicU64::new(0);
    let done = AtomicU64::new(0);
    let skipped = AtomicU64::new(0);
    let errors = AtomicU64::new(0);

    scheduler.run(paths, |path| {
        processed.fetch_add(1, Ordering::Relaxed);
        match apply(inventory, &path, action, options) {
            Ok(Outcome::Done) => {
                done.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Outcome::Skipped) => {
                skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_fatal() => {
                log::error!("{}: {}", path, e);
                scheduler.stop();
                let mut slot = fatal.lock().unwrap_or_else(|p| p.into_inner());
                slot.get_or_insert(e);
            }
            Err(e) => {
                log::warn!("{}: {}", path, e);
                errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        pb.inc(1);
    });
    pb.finish_and_clear();

    if let Some(e) = fatal.into_inner().unwrap_or_else(|p| p.into_inner()) {
        return Err(e);
    }
    Ok(ExecuteReport {
        processed: processed.into_inner(),
        done: done.into_inner(),
        skipped: skipped.into_inner(),
        errors: errors.into_inner(),
    })
}

fn apply(
    inventory: &Inventory,
    path: &str,
    action: Action,
    options: &ExecuteOptions,
) -> Result<Outcome, ActionError> {
    match action {
        Action::Print => {
            println!("{path}");
            Ok(Outcome::Done)
        }
        Action::Unlink => unlink(path, options.dry_run),
        Action::MoveTags => move_file(inventory, path, true, options),
        Action::MovePath => move_file(inventory, path, false, options),
        Action::Read => {
            let raw = tags::read_raw(Path::new(path))?;
            let pretty = serde_json::to_string_pretty(&raw).map_err(io::Error::other)?;
            println!("{pretty}");
            Ok(Outcome::Done)
        }
    }
}

fn unlink(path: &str, dry_run: bool) -> Result<Outcome, ActionError> {
    if dry_run {
        println!("Removing {path}");
        return Ok(Outcome::Done);
    }
    fs::remove_file(path)?;
    log::debug!("Removed {}", path);
    Ok(Outcome::Done)
}

/// `<grandparent>/<parent>` of the file's current location.
fn path_directory(path: &Path) -> TargetDir {
    let name = |p: Option<&Path>| {
        p.and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
    };
    let parent = path.parent();
    TargetDir {
        artist: name(parent.and_then(Path::parent)).unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        album: name(parent).unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
    }
}

fn move_file(
    inventory: &Inventory,
    path: &str,
    by_tags: bool,
    options: &ExecuteOptions,
) -> Result<Outcome, ActionError> {
    let record = match inventory.file_by_path(path)? {
        Some(record) if !record.deleted => record,
        _ => {
            log::warn!("Cannot find in db: {}", path);
            return Ok(Outcome::Skipped);
        }
    };
    let root = options.target_root.as_deref().ok_or(ActionError::NoTargetRoot)?;

    let directory = if by_tags {
        inventory.derive_directory(&record)?
    } else {
        path_directory(Path::new(path))
    }
    .under(root);

    let file_name = if record.extension.is_empty() {
        record.filename.clone()
    } else {
        format!("{}.{}", record.filename, record.extension)
    };
    let target = directory.join(file_name);

    if Path::new(path) == target {
        log::info!("Nothing to do, already at {}", target.display());
        return Ok(Outcome::Skipped);
    }
    if options.dry_run {
        println!("Moving {} to {}", path, target.display());
        return Ok(Outcome::Done);
    }

    let target_str = target.to_string_lossy().to_string();
    if inventory.file_by_path(&target_str)?.is_some() {
        log::warn!("Not moving {}: {} is already in the db", path, target_str);
        return Ok(Outcome::Skipped);
    }

    fs::create_dir_all(&directory).map_err(|source| ActionError::CreateDir {
        path: directory.clone(),
        source,
    })?;
    if !move_no_replace(Path::new(path), &target)? {
        log::warn!("Not moving {}: {} already exists", path, target_str);
        return Ok(Outcome::Skipped);
    }

    let updated = inventory
        .pool()
        .acquire()
        .map_err(ActionError::from)
        .and_then(|db| Ok(db.update_path(record.id, &target_str)?));
    if let Err(e) = updated {
        // Keep disk and db in step: put the file back where the record says
        if let Err(undo) = fs::rename(&target, path) {
            log::error!("Could not move {} back to {}: {}", target_str, path, undo);
        }
        return Err(e);
    }
    log::debug!("Moved {} to {}", path, target_str);
    Ok(Outcome::Done)
}

/// Rename `from` to `to` unless `to` exists. The target name is claimed with
/// `create_new` first so concurrent movers cannot replace each other's files.
/// Returns false when the target was already taken.
fn move_no_replace(from: &Path, to: &Path) -> io::Result<bool> {
    match fs::OpenOptions::new().write(true).create_new(true).open(to) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    }
    if let Err(e) = fs::rename(from, to) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TagFields;
    use crate::inventory::ScanOptions;
    use crate::pool::test_pool;

    struct Setup {
        _dir: tempfile::TempDir,
        inventory: Inventory,
        source: PathBuf,
        target: PathBuf,
    }

    fn setup() -> Setup {
        let (dir, pool) = test_pool(2);
        let source = dir.path().join("incoming/Some Band/Some Album");
        let target = dir.path().join("sorted");
        fs::create_dir_all(&source).unwrap();
        Setup {
            inventory: Inventory::new(pool),
            source,
            target,
            _dir: dir,
        }
    }

    fn options(s: &Setup, dry_run: bool) -> ExecuteOptions {
        ExecuteOptions {
            dry_run,
            target_root: Some(s.target.clone()),
        }
    }

    fn add(s: &Setup, name: &str) -> String {
        let path = s.source.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        s.inventory
            .scan_folder(&s.source, ScanOptions::default())
            .unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_read_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        fs::write(&list, "/a/b.mp3\n\n  /c/d.mp3  \n").unwrap();
        assert_eq!(read_list(&list).unwrap(), vec!["/a/b.mp3", "/c/d.mp3"]);
    }

    #[test]
    fn test_move_by_tags_updates_record() {
        let s = setup();
        let path = add(&s, "01 Track.MP3");
        let record = s.inventory.file_by_path(&path).unwrap().unwrap();
        let tags = TagFields {
            album: "Record".into(),
            artist: "AC/DC".into(),
            ..Default::default()
        };
        s.inventory.pool().acquire().unwrap().store_tags(record.id, &tags).unwrap();

        let report = execute(&s.inventory, vec![path.clone()], Action::MoveTags, &options(&s, false), 4)
            .unwrap();
        assert_eq!(report.done, 1);

        let expected = s.target.join("AC_DC/Record/01 Track.mp3");
        assert!(expected.exists());
        assert!(!Path::new(&path).exists());
        let moved = s.inventory.file_by_path(&expected.to_string_lossy()).unwrap().unwrap();
        assert_eq!(moved.id, record.id);
    }

    #[test]
    fn test_move_by_path_uses_parent_directories() {
        let s = setup();
        let path = add(&s, "song.ogg");

        execute(&s.inventory, vec![path], Action::MovePath, &options(&s, false), 1).unwrap();
        assert!(s.target.join("Some Band/Some Album/song.ogg").exists());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let s = setup();
        let path = add(&s, "a.mp3");

        let report = execute(&s.inventory, vec![path.clone()], Action::MovePath, &options(&s, true), 1)
            .unwrap();
        assert_eq!(report.done, 1);
        assert!(Path::new(&path).exists());
        assert!(!s.target.exists());

        execute(&s.inventory, vec![path.clone()], Action::Unlink, &options(&s, true), 1).unwrap();
        assert!(Path::new(&path).exists());
    }

    #[test]
    fn test_unknown_and_deleted_paths_are_skipped() {
        let s = setup();
        let path = add(&s, "a.mp3");
        let record = s.inventory.file_by_path(&path).unwrap().unwrap();
        s.inventory.pool().acquire().unwrap().mark_deleted(record.id).unwrap();

        let report = execute(
            &s.inventory,
            vec![path, "/not/in/db.mp3".to_string()],
            Action::MoveTags,
            &options(&s, false),
            2,
        )
        .unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.done, 0);
    }

    #[test]
    fn test_existing_target_is_not_overwritten() {
        let s = setup();
        let path = add(&s, "a.mp3");
        let occupied = s.target.join("Some Band/Some Album");
        fs::create_dir_all(&occupied).unwrap();
        fs::write(occupied.join("a.mp3"), b"other").unwrap();

        let report = execute(&s.inventory, vec![path.clone()], Action::MovePath, &options(&s, false), 1)
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(Path::new(&path).exists());
        assert_eq!(fs::read(occupied.join("a.mp3")).unwrap(), b"other");
    }

    #[test]
    fn test_target_owned_by_deleted_record_is_skipped() {
        let s = setup();
        let path = add(&s, "a.mp3");
        let target = s.target.join("Some Band/Some Album/a.mp3");
        {
            let db = s.inventory.pool().acquire().unwrap();
            let stale = crate::scanner::reconcile::reconcile(&db, &target.to_string_lossy(), 1)
                .unwrap()
                .record;
            db.mark_deleted(stale.id).unwrap();
        }

        let report = execute(&s.inventory, vec![path.clone()], Action::MovePath, &options(&s, false), 1)
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors, 0);
        assert!(Path::new(&path).exists());
        assert!(!target.exists());
        let record = s.inventory.file_by_path(&path).unwrap().unwrap();
        assert!(!record.deleted);
    }

    #[test]
    fn test_concurrent_moves_to_same_target_keep_both_files() {
        let s = setup();
        let first = add(&s, "a.mp3");
        let other_dir = s._dir.path().join("elsewhere/Some Band/Some Album");
        fs::create_dir_all(&other_dir).unwrap();
        fs::write(other_dir.join("a.mp3"), b"second copy").unwrap();
        s.inventory.scan_folder(&other_dir, ScanOptions::default()).unwrap();
        let second = other_dir.join("a.mp3").to_string_lossy().to_string();

        let report = execute(
            &s.inventory,
            vec![first.clone(), second.clone()],
            Action::MovePath,
            &options(&s, false),
            2,
        )
        .unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(report.skipped, 1);

        let target = s.target.join("Some Band/Some Album/a.mp3");
        let (moved, left_behind, moved_contents) = if Path::new(&first).exists() {
            (&second, &first, &b"second copy"[..])
        } else {
            (&first, &second, &b"a.mp3"[..])
        };
        assert!(Path::new(left_behind).exists());
        assert!(!Path::new(moved).exists());
        assert_eq!(fs::read(&target).unwrap(), moved_contents);

        let record = s.inventory.file_by_path(&target.to_string_lossy()).unwrap().unwrap();
        assert!(!record.deleted);
        assert!(s.inventory.file_by_path(moved).unwrap().is_none());
        assert!(s.inventory.file_by_path(left_behind).unwrap().is_some());
    }

    #[test]
    fn test_move_no_replace_leaves_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let (from, to) = (dir.path().join("from"), dir.path().join("to"));
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();

        assert!(!move_no_replace(&from, &to).unwrap());
        assert_eq!(fs::read(&to).unwrap(), b"old");

        fs::remove_file(&to).unwrap();
        assert!(move_no_replace(&from, &to).unwrap());
        assert_eq!(fs::read(&to).unwrap(), b"new");
        assert!(!from.exists());
    }

    #[test]
    fn test_move_no_replace_cleans_up_failed_rename() {
        let dir = tempfile::tempdir().unwrap();
        let (from, to) = (dir.path().join("missing"), dir.path().join("to"));
        assert!(move_no_replace(&from, &to).is_err());
        assert!(!to.exists());
    }

    #[test]
    fn test_missing_target_root_is_fatal() {
        let s = setup();
        let path = add(&s, "a.mp3");
        let result = execute(&s.inventory, vec![path], Action::MovePath, &ExecuteOptions::default(), 1);
        assert!(matches!(result, Err(ActionError::NoTargetRoot)));
    }

    #[test]
    fn test_unlink_removes_file_and_counts_failures() {
        let s = setup();
        let path = add(&s, "a.mp3");
        let report = execute(
            &s.inventory,
            vec![path.clone(), "/definitely/not/here".to_string()],
            Action::Unlink,
            &options(&s, false),
            2,
        )
        .unwrap();
        assert_eq!(report.done, 1);
        assert_eq!(report.errors, 1);
        assert!(!Path::new(&path).exists());
    }

    #[test]
    fn test_path_directory_fallbacks() {
        assert_eq!(
            path_directory(Path::new("/a/b/c.mp3")),
            TargetDir { artist: "a".into(), album: "b".into() }
        );
        assert_eq!(path_directory(Path::new("/c.mp3")).artist, UNKNOWN_ARTIST);
    }
}
