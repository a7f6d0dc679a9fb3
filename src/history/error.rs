// ABOUTME: Error types for execution history store operations
// ABOUTME: Covers append/read failures and malformed event streams

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Corrupt event stream for run {run_id}: {message}")]
    CorruptStream { run_id: String, message: String },
}

pub type Result<T> = std::result::Result<T, HistoryError>;
