pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// How long a connection waits on a locked database before giving up.
/// Many pooled writers share one file, so this needs to be generous.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    /// Open the database and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Self::connect(path)?;
        db.conn.pragma_update(None, "journal_mode", "WAL")?;
        db.migrate()?;
        Ok(db)
    }

    /// Open a connection to an already-migrated database. Used by the
    /// connection pool, which migrates exactly once up front.
    pub fn connect(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: files table plus the music_files view
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                id              TEXT PRIMARY KEY,
                path            TEXT NOT NULL UNIQUE,
                size            INTEGER NOT NULL DEFAULT 0,
                content_hash    BLOB,
                extension       TEXT NOT NULL DEFAULT '',
                filename        TEXT NOT NULL DEFAULT '',
                deleted         INTEGER NOT NULL DEFAULT 0,

                -- Embedded music tags
                album           TEXT NOT NULL DEFAULT '',
                album_artist    TEXT NOT NULL DEFAULT '',
                title           TEXT NOT NULL DEFAULT '',
                artist          TEXT NOT NULL DEFAULT '',
                composer        TEXT NOT NULL DEFAULT '',
                tag_scanned     INTEGER NOT NULL DEFAULT 0,
                tag_hash        TEXT NOT NULL DEFAULT '',

                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_files_size ON files(size);
            CREATE INDEX IF NOT EXISTS idx_files_content_hash ON files(content_hash);
            CREATE INDEX IF NOT EXISTS idx_files_extension ON files(extension);

            CREATE VIEW IF NOT EXISTS music_files AS
                SELECT * FROM files
                WHERE NOT deleted
                  AND extension IN ('mp3', 'ogg', 'm4a', 'm4b', 'm4p');
            ",
        )?;
        Ok(())
    }
}
