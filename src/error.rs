//! Crate-wide error type.
//!
//! Request-facing paths ([`record`](crate::HitCounter::record),
//! [`live_count`](crate::HitCounter::live_count)) never surface these errors;
//! they log and degrade. Errors reach callers only from setup
//! (config, opening a store) and from explicit flushes.

use thiserror::Error;

/// Errors produced by the counting core and its storage backends.
#[derive(Debug, Error)]
pub enum Error {
    /// A site identifier failed validation.
    #[error("invalid site id {id:?}: {reason}")]
    InvalidSiteId { id: String, reason: &'static str },

    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// The configuration parsed but holds an unusable value.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A buffer, dedup, or store backend reported a failure.
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    /// A blocking or background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[cfg(feature = "redb")]
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[cfg(feature = "redb")]
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[cfg(feature = "redb")]
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[cfg(feature = "redb")]
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[cfg(feature = "redb")]
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

impl Error {
    /// Shorthand for [`Error::Backend`].
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Error::Backend {
            backend,
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
