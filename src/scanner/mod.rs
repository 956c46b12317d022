pub mod hash;
pub mod reconcile;
pub mod tags;
pub mod walk;

use crate::db::DbError;
use crate::pool::PoolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ScanError {
    /// Without a store connection the pipeline cannot make progress.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Pool(_))
    }
}

/// Counts gathered by one batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub processed: u64,
    pub new: u64,
    pub hashed: u64,
    pub tagged: u64,
    pub deleted: u64,
    pub hash_failures: u64,
    pub tag_failures: u64,
    pub errors: u64,
}
