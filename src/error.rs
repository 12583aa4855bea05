// Error taxonomy for the store, the metrics source and the periodic jobs.

use chrono::TimeDelta;
use thiserror::Error;

/// Caller errors. Reported synchronously, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("start_time cannot be after end_time")]
    StartAfterEnd,

    #[error("time range too wide: {} minutes requested, at most {} allowed", .span.num_minutes(), .max.num_minutes())]
    SpanTooWide { span: TimeDelta, max: TimeDelta },

    #[error("start_time and end_time must be given together")]
    IncompleteWindow,

    #[error("unable to parse {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("metrics source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A periodic tick panicked; the payload message is kept.
    #[error("tick panicked: {0}")]
    TickPanicked(String),
}

// SQLite primary result codes that mean the file itself is unusable.
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

impl MetricsError {
    /// True when retrying cannot help: the database is corrupt, not a database, or the pool is closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            MetricsError::Storage(sqlx::Error::PoolClosed) => true,
            MetricsError::Storage(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, SQLITE_CORRUPT | SQLITE_NOTADB)),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, MetricsError::Validation(_))
    }
}
