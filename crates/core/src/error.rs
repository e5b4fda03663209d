/// The shared error taxonomy used across the cache core, the job engine, the
/// scheduler, and the HTTP boundary. Every component that can fail reduces
/// its failure down to one of these kinds; nothing upstream of this enum
/// should have to match on library-specific error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream blocked by interception/challenge page")]
    UpstreamBlocked,

    #[error("upstream rate limited, retry after {retry_after_secs}s")]
    UpstreamRateLimited { retry_after_secs: u64 },

    #[error("upstream response invalid: {0}")]
    UpstreamInvalid(String),

    #[error("store busy, transient contention: {0}")]
    StoreBusy(String),

    #[error("store fatal: {0}")]
    StoreFatal(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    /// Whether a read-path caller should treat this as something it can
    /// still recover from by falling back to a staler tier (memory -> store
    /// -> error).
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamUnreachable(_)
                | CoreError::UpstreamBlocked
                | CoreError::UpstreamRateLimited { .. }
                | CoreError::UpstreamInvalid(_)
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CoreError::UpstreamRateLimited { retry_after_secs } => Some(*retry_after_secs),
            CoreError::UpstreamBlocked => Some(60),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref sqlite_err, _)
                if sqlite_err.code == rusqlite::ErrorCode::DatabaseBusy
                    || sqlite_err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                CoreError::StoreBusy(err.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound("row absent".to_string()),
            other => CoreError::StoreFatal(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for CoreError {
    fn from(err: r2d2::Error) -> Self {
        CoreError::StoreBusy(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            CoreError::UpstreamUnreachable(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                CoreError::UpstreamRateLimited {
                    retry_after_secs: 1,
                }
            } else if status.is_server_error() {
                CoreError::UpstreamUnreachable(err.to_string())
            } else {
                CoreError::UpstreamInvalid(err.to_string())
            }
        } else {
            CoreError::UpstreamUnreachable(err.to_string())
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
