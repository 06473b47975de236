use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced while constructing or persisting shared state.
#[derive(Debug, Error)]
pub enum Error {
    /// A middleware refused to install. Construction is aborted.
    #[error("middleware `{name}` failed to install: {reason}")]
    Middleware { name: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Convenience constructor for middleware authors.
    pub fn middleware(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::Middleware {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors produced by a [`KeyValueStore`](crate::persist::KeyValueStore) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is unavailable")]
    Unavailable,

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}
