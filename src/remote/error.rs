// ABOUTME: Error types for remote job dispatch and lifecycle monitoring
// ABOUTME: Distinguishes timeouts per launch phase from substrate and job failures

use std::time::Duration;
use thiserror::Error;

/// Phase of the launch state machine, carried in timeout errors so the
/// caller knows which wait exceeded the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    Scheduling,
    WaitingForRunning,
    LogStream,
    Terminal,
}

impl std::fmt::Display for LaunchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchPhase::Scheduling => write!(f, "scheduling"),
            LaunchPhase::WaitingForRunning => write!(f, "waiting_for_running"),
            LaunchPhase::LogStream => write!(f, "log_stream"),
            LaunchPhase::Terminal => write!(f, "terminal"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Failed to submit job {job_name}: {message}")]
    SubmitFailed { job_name: String, message: String },

    #[error("Substrate API error: {message}")]
    Substrate { message: String },

    #[error("No backing unit was created for job {job_name}")]
    NoBackingUnit { job_name: String },

    #[error("Job {job_name} timed out during {phase} (budget {timeout:?})")]
    Timeout {
        job_name: String,
        phase: LaunchPhase,
        timeout: Duration,
    },

    #[error("Job {job_name} failed: {message}")]
    JobFailed { job_name: String, message: String },
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
