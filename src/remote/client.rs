// ABOUTME: Substrate client abstraction for container-orchestration clusters
// ABOUTME: Defines job/unit lifecycle queries and a cancellable log stream

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::error::Result;
use super::job::RemoteJobSpec;

/// Reference to a submitted job on the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_name: String,
    pub namespace: String,
}

/// Job-level lifecycle phase as reported by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Active,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }
}

/// The substrate-level execution container/process backing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingUnit {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl UnitPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitPhase::Succeeded | UnitPhase::Failed)
    }
}

impl std::fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitPhase::Pending => write!(f, "pending"),
            UnitPhase::Running => write!(f, "running"),
            UnitPhase::Succeeded => write!(f, "succeeded"),
            UnitPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Consumer half of a cancellable log stream. The producer stops feeding
/// lines once `stop` is signalled; dropping the stream also signals stop so
/// no network stream outlives the call that opened it.
pub struct LogStream {
    lines: mpsc::Receiver<String>,
    stop: watch::Sender<bool>,
}

/// Producer half handed to client implementations.
pub struct LogStreamProducer {
    lines: mpsc::Sender<String>,
    stop: watch::Receiver<bool>,
}

impl LogStream {
    /// Create a connected stream/producer pair.
    pub fn pair(capacity: usize) -> (LogStream, LogStreamProducer) {
        let (lines_tx, lines_rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            LogStream {
                lines: lines_rx,
                stop: stop_tx,
            },
            LogStreamProducer {
                lines: lines_tx,
                stop: stop_rx,
            },
        )
    }

    /// Next line, or None when the producer has finished.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Signal the producer to stop. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

impl LogStreamProducer {
    /// Send one line. Returns false when the stream was cancelled or the
    /// consumer went away; producers should stop on false.
    pub async fn send(&self, line: String) -> bool {
        if *self.stop.borrow() {
            return false;
        }
        self.lines.send(line).await.is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Wait until the consumer signals stop.
    pub async fn stopped(&mut self) {
        while !*self.stop.borrow() {
            if self.stop.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Narrow interface to the external execution substrate. Implementations
/// translate these calls onto the cluster API; the launcher drives the
/// lifecycle and never retries transient failures itself.
#[async_trait]
pub trait SubstrateClient: Send + Sync {
    async fn submit(&self, spec: &RemoteJobSpec) -> Result<JobHandle>;

    async fn job_phase(&self, handle: &JobHandle) -> Result<JobPhase>;

    async fn list_backing_units(&self, handle: &JobHandle) -> Result<Vec<BackingUnit>>;

    async fn unit_phase(&self, handle: &JobHandle, unit: &BackingUnit) -> Result<UnitPhase>;

    async fn stream_logs(&self, handle: &JobHandle, unit: &BackingUnit) -> Result<LogStream>;

    /// Best-effort stop signal for the job and its backing units.
    async fn stop(&self, handle: &JobHandle) -> Result<()>;
}
