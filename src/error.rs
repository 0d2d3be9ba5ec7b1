use std::sync::PoisonError;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Read error: {0}")]
    Read(#[source] rusqlite::Error),
    #[error("Write error: {0}")]
    Write(#[source] rusqlite::Error),
    #[error("Attribute type error: {0}")]
    AttributeType(String),
    #[error("Attribute value error: {0}")]
    AttributeValue(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Illegal request: {0}")]
    IllegalRequest(String),
    #[error("System inconsistency: {0}")]
    SystemInconsistency(String),
    #[error("Unknown {kind} code: {code}")]
    UnknownEnumeration { kind: &'static str, code: i64 },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Busy and locked are what SQLite reports where other engines raise
    /// serialization failures or deadlocks. Only these are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Read(e) | Self::Write(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Write(e)
    }
}
impl From<config::ConfigError> for RepoError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<PoisonError<T>> for RepoError {
    fn from(e: PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
