// ABOUTME: Error types for the coordination layer entry points
// ABOUTME: Framework and infrastructure faults only; domain failures are outcomes, not errors

use thiserror::Error;

use crate::history::{HistoryError, StepKey};
use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Step not found in execution plan: {step_key}")]
    StepNotInPlan { step_key: StepKey },

    #[error("History store error: {0}")]
    History(#[from] HistoryError),

    #[error("Remote launch error: {0}")]
    Launch(#[from] RemoteError),

    #[error("Failed to serialize known execution state: {0}")]
    StateSerialization(#[from] serde_json::Error),
}

impl CoordinationError {
    /// Timeouts are framework-level failures but carry distinct context.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordinationError::Launch(err) if err.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
