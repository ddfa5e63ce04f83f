use thiserror::Error;

/// Errors that can occur within the debounce queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A payload could not be encoded or decoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The caller passed something the store cannot accept (e.g. an empty id).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store could not be reached (poisoned lock, blocking task lost).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Whether the worker loop should back off and try again.
    ///
    /// Busy/locked databases and unreachable stores clear up on their own;
    /// everything else points at bad input or a bug.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Unavailable(_) => true,
            QueueError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_database_is_transient() {
        let err = QueueError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn not_found_is_permanent() {
        let err = QueueError::JobNotFound { id: "A".into() };
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Job not found: A");
    }
}
