use crate::db::models::{FileRecord, NewFile};
use crate::db::{Database, DbError, Result};

/// Outcome of reconciling one observed path.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub record: FileRecord,
    pub created: bool,
}

/// Make sure `path` has a record, inserting one on first sighting.
///
/// Known paths are returned untouched: the size is not refreshed and a
/// soft-deleted record stays deleted. Running this any number of times for
/// the same path leaves exactly one row.
pub fn reconcile(db: &Database, path: &str, observed_size: u64) -> Result<Reconciled> {
    if let Some(record) = db.file_by_path(path)? {
        return Ok(Reconciled { record, created: false });
    }

    let size = i64::try_from(observed_size).unwrap_or(i64::MAX);
    let new_file = NewFile::new(path, size);
    let created = db.insert_file_if_absent(&new_file)?;
    if created {
        log::debug!("New {} with {}", path, new_file.id);
    }

    // Another worker may have won the insert race; either way the stored row
    // is the one to return.
    let record = db.file_by_path(path)?.ok_or_else(|| {
        DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows)
    })?;
    Ok(Reconciled { record, created })
}
