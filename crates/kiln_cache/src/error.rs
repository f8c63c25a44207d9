//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur while writing cache entries or the hash store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred on a cache file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A cache entry could not be serialized or deserialized.
    #[error("cache serialization error: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },

    /// A database operation failed while writing or rehydrating an entry.
    #[error("cache database error: {0}")]
    Db(#[from] kiln_db::DbError),
}

impl From<std::io::Error> for CacheError {
    fn from(source: std::io::Error) -> Self {
        CacheError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
