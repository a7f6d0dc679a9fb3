// ABOUTME: Remote dispatch onto an external container-orchestration substrate
// ABOUTME: Exposes the substrate client seam, job spec model, and the launcher

pub mod client;
pub mod error;
pub mod job;
pub mod launcher;

pub use client::{
    BackingUnit, JobHandle, JobPhase, LogStream, LogStreamProducer, SubstrateClient, UnitPhase,
};
pub use error::{LaunchPhase, RemoteError, Result};
pub use job::{ContainerContext, RemoteJobSpec, DEFAULT_JOB_PARALLELISM};
pub use launcher::{RemoteLauncher, DEFAULT_POLL_INTERVAL};
