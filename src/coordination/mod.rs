// ABOUTME: Execution coordination layer for workflow runs
// ABOUTME: Retry verification, cross-process state, dispatch, and status aggregation

pub mod error;
pub mod local;
pub mod retry;
pub mod runner;
pub mod state;
pub mod status;

pub use error::{CoordinationError, Result};
pub use local::{execute_step, LocalExecution};
pub use retry::{verify_execution, RetryState};
pub use runner::{CoordinatorOptions, DispatchTarget, StepCoordinator, StepOutcome};
pub use state::{KnownExecutionState, KNOWN_STATE_ENV_VAR};
pub use status::{run_status, step_status, RunStatus, StepStatus};
