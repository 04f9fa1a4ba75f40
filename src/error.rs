use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CcdbError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Stale handle: {0}")]
    StaleHandle(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Parse error: {message}")]
    Parse { message: String, position: Option<usize> },
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CcdbError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    Conflict,
    Connection,
    Timeout,
    Cancelled,
    StaleHandle,
    Config,
    Parse,
    Internal,
}

impl CcdbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::StaleHandle(_) => ErrorKind::StaleHandle,
            Self::Config(_) => ErrorKind::Config,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
    /// Stable numeric code, used when the error is recorded in an [`ErrorLog`].
    pub fn code(&self) -> i32 {
        match self.kind() {
            ErrorKind::NotFound => 10,
            ErrorKind::ValidationFailed => 20,
            ErrorKind::Conflict => 30,
            ErrorKind::Connection => 40,
            ErrorKind::Timeout => 41,
            ErrorKind::Cancelled => 42,
            ErrorKind::StaleHandle => 50,
            ErrorKind::Config => 60,
            ErrorKind::Parse => 70,
            ErrorKind::Internal => 90,
        }
    }
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
    pub fn invalid(what: impl fmt::Display) -> Self {
        Self::ValidationFailed(what.to_string())
    }
    pub fn conflict(what: impl fmt::Display) -> Self {
        Self::Conflict(what.to_string())
    }
}

// Helper conversions
impl From<rusqlite::Error> for CcdbError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == rusqlite::ErrorCode::CannotOpen
                    || failure.code == rusqlite::ErrorCode::NotADatabase =>
            {
                Self::Connection(e.to_string())
            }
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(e.to_string())
            }
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Self::Timeout(e.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}
impl From<config::ConfigError> for CcdbError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

// ------------- Error log -------------
pub const DEFAULT_ERROR_CAPACITY: usize = 100;

/// One entry of the error log: what failed, where, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    code: i32,
    module: String,
    message: String,
}
impl ErrorRecord {
    pub fn new(code: i32, module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            module: module.into(),
            message: message.into(),
        }
    }
    pub fn code(&self) -> i32 {
        self.code
    }
    pub fn module(&self) -> &str {
        &self.module
    }
    pub fn message(&self) -> &str {
        &self.message
    }
}
impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.module, self.message)
    }
}

/// Bounded ring buffer of the errors raised by the most recent operation.
/// Oldest entries are dropped once the capacity is reached.
#[derive(Debug)]
pub struct ErrorLog {
    capacity: usize,
    records: VecDeque<ErrorRecord>,
}
impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }
    pub fn record(&mut self, module: &str, error: &CcdbError) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records
            .push_back(ErrorRecord::new(error.code(), module, error.to_string()));
    }
    pub fn clear(&mut self) {
        self.records.clear();
    }
    pub fn last(&self) -> Option<&ErrorRecord> {
        self.records.back()
    }
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.iter().cloned().collect()
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CAPACITY)
    }
}
