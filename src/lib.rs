// ABOUTME: Main library module for the helmsman execution coordination layer
// ABOUTME: Exports the history, plan, coordination, and remote dispatch modules

pub mod coordination;
pub mod history;
pub mod plan;
pub mod remote;

// Re-export commonly used types
pub use coordination::{
    DispatchTarget, KnownExecutionState, RetryState, RunStatus, StepCoordinator, StepOutcome,
    StepStatus,
};
pub use history::{new_run_id, Event, HistoryStore, InMemoryHistoryStore, OutputRef, StepKey};
pub use plan::{PlanProvider, StaticPlan, StepSpec};
pub use remote::{ContainerContext, RemoteJobSpec, RemoteLauncher, SubstrateClient};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
