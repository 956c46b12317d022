use super::models::{ContentHash, Duplicate, FileRecord, LibraryStats, NewFile, TagFields};
use super::{Database, Result};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, path, size, content_hash, extension, filename, deleted,
    tag_scanned, tag_hash, artist, album_artist, album, title, composer";

/// Exact byte-prefix match on `path`. LIKE would be case-insensitive and
/// treat `%`/`_` in directory names as wildcards.
const UNDER_PREFIX: &str = "substr(path, 1, length(?1)) = ?1";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(FileRecord {
        id,
        path: row.get(1)?,
        size: row.get(2)?,
        content_hash: row.get(3)?,
        extension: row.get(4)?,
        filename: row.get(5)?,
        deleted: row.get(6)?,
        tag_scanned: row.get(7)?,
        tag_hash: row.get(8)?,
        artist: row.get(9)?,
        album_artist: row.get(10)?,
        album: row.get(11)?,
        title: row.get(12)?,
        composer: row.get(13)?,
    })
}

impl Database {
    /// Insert a file unless its path is already known. Never updates an
    /// existing row. Returns true if a row was inserted.
    pub fn insert_file_if_absent(&self, f: &NewFile) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO files (id, path, size, extension, filename)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO NOTHING",
            params![f.id.to_string(), f.path, f.size, f.extension, f.filename],
        )?;
        Ok(inserted == 1)
    }

    pub fn file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1");
        let record = self
            .conn
            .query_row(&sql, params![path], row_to_record)
            .optional()?;
        Ok(record)
    }

    pub fn file_by_id(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1");
        let record = self
            .conn
            .query_row(&sql, params![id.to_string()], row_to_record)
            .optional()?;
        Ok(record)
    }

    /// All non-deleted files whose path starts with `prefix`.
    pub fn active_files_under(&self, prefix: &str) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE NOT deleted AND {UNDER_PREFIX} ORDER BY path"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![prefix], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Music files under `prefix` whose tags have not been scanned yet.
    pub fn unscanned_music_under(&self, prefix: &str) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM music_files
             WHERE NOT tag_scanned AND {UNDER_PREFIX} ORDER BY path"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![prefix], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Number of non-deleted files with exactly this size.
    pub fn count_files_with_size(&self, size: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM files WHERE size = ?1 AND NOT deleted",
            params![size],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Other non-deleted files of the same size that still lack a hash.
    pub fn unhashed_files_with_size(&self, size: i64, exclude: Uuid) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE size = ?1 AND id != ?2 AND NOT deleted AND content_hash IS NULL"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![size, exclude.to_string()], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Store a content hash if none is set yet. Returns true if the row changed.
    pub fn set_content_hash(&self, id: Uuid, hash: &ContentHash) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE files SET content_hash = ?1 WHERE id = ?2 AND content_hash IS NULL",
            params![hash, id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// Persist decoded tags and mark the file as tag-scanned.
    pub fn store_tags(&self, id: Uuid, tags: &TagFields) -> Result<()> {
        self.conn.execute(
            "UPDATE files SET
                album = ?1, album_artist = ?2, artist = ?3, title = ?4, composer = ?5,
                tag_hash = ?6, tag_scanned = 1
             WHERE id = ?7",
            params![
                tags.album, tags.album_artist, tags.artist, tags.title, tags.composer,
                tags.tag_hash, id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Soft-delete a file. Returns true if it was not already deleted.
    pub fn mark_deleted(&self, id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE files SET deleted = 1 WHERE id = ?1 AND NOT deleted",
            params![id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// Record the new location of a moved file.
    pub fn update_path(&self, id: Uuid, path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE files SET path = ?1 WHERE id = ?2",
            params![path, id.to_string()],
        )?;
        Ok(())
    }

    /// Duplicates under `prefix`: rows are grouped by hash, the first row of
    /// each group is kept as the original and every later row is reported.
    pub fn duplicates_under(&self, prefix: &str) -> Result<Vec<Duplicate>> {
        let sql = format!(
            "SELECT path, content_hash FROM files
             WHERE NOT deleted AND content_hash IS NOT NULL AND {UNDER_PREFIX}
               AND content_hash IN (
                   SELECT content_hash FROM files
                   WHERE NOT deleted AND content_hash IS NOT NULL AND {UNDER_PREFIX}
                   GROUP BY content_hash HAVING COUNT(*) > 1
               )
             ORDER BY content_hash, rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, ContentHash>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut duplicates = Vec::new();
        let mut current: Option<(ContentHash, String)> = None;
        for (path, hash) in rows {
            match &current {
                Some((kept_hash, original)) if *kept_hash == hash => {
                    duplicates.push(Duplicate {
                        path,
                        original: original.clone(),
                        hash,
                    });
                }
                _ => current = Some((hash, path)),
            }
        }
        Ok(duplicates)
    }

    /// Distinct (album, artist) pairs over music files, both non-empty.
    /// Case folding is left to the caller.
    pub fn album_artist_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT album, artist FROM music_files
             WHERE trim(album) != '' AND trim(artist) != ''",
        )?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let (total_files, deleted_files, tag_scanned, hashed_files) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(deleted), 0),
                    COALESCE(SUM(CASE WHEN NOT deleted AND tag_scanned THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN NOT deleted AND content_hash IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let music_files = self
            .conn
            .query_row("SELECT COUNT(*) FROM music_files", [], |row| row.get(0))?;
        let duplicate_groups = self.conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT content_hash FROM files
                WHERE NOT deleted AND content_hash IS NOT NULL
                GROUP BY content_hash HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get(0),
        )?;

        Ok(LibraryStats {
            total_files,
            deleted_files,
            music_files,
            tag_scanned,
            hashed_files,
            duplicate_groups,
        })
    }
}
