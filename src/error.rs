//! Application-wide error types.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing required environment variable {0}")]
    ConfigurationMissing(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("remote store error: {0}")]
    Remote(#[from] StoreError),

    #[error("failed to create {resource} after {attempts} attempts: {last}")]
    RetryExhausted {
        resource: &'static str,
        attempts: u32,
        last: StoreError,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
