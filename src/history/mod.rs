// ABOUTME: Execution history store with an append-only, per-run sequenced event log
// ABOUTME: Owns attempt records derived from events and provides the HistoryStore trait

pub mod error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub use error::{HistoryError, Result};

/// Generate a fresh run identifier.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Opaque identifier of one unit of work within a run's graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKey(String);

impl StepKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for StepKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a completed step's output, addressable by downstream steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub name: String,
    pub uri: String,
}

impl OutputRef {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// A record appended to the execution history store. Append-only; never
/// mutated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Coordination-level message, including framework errors. Not a step
    /// outcome.
    EngineEvent {
        message: String,
        step_key: Option<StepKey>,
    },
    StepStart {
        step_key: StepKey,
    },
    StepSuccess {
        step_key: StepKey,
        #[serde(default)]
        outputs: Vec<OutputRef>,
    },
    StepFailure {
        step_key: StepKey,
        error: String,
    },
    RunSuccess,
    RunFailure {
        error: String,
    },
}

impl Event {
    /// The step this event belongs to, if any.
    pub fn step_key(&self) -> Option<&StepKey> {
        match self {
            Event::EngineEvent { step_key, .. } => step_key.as_ref(),
            Event::StepStart { step_key }
            | Event::StepSuccess { step_key, .. }
            | Event::StepFailure { step_key, .. } => Some(step_key),
            Event::RunSuccess | Event::RunFailure { .. } => None,
        }
    }
}

/// An event plus its position in the run's log. Ordering is by `sequence`,
/// which is monotonic per run; wall-clock timestamps are informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// One execution try of a step. Owned exclusively by the history store and
/// immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub step_key: StepKey,
    /// 1-based, monotonic per step key.
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Pending)
    }
}

/// Durable, queryable record of past attempts per (run, step). The event log
/// is the sole cross-process source of truth; processes coordinate through
/// appends and reads, never shared memory.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append an event to the run's log, assigning the next sequence number.
    async fn append(&self, run_id: &str, event: Event) -> Result<SequencedEvent>;

    /// Read the run's events in sequence order, optionally filtered to one
    /// step. Unknown runs read as empty, not as an error.
    async fn read(&self, run_id: &str, step_key: Option<&StepKey>) -> Result<Vec<SequencedEvent>>;

    /// Number of attempts ever started for the step in this run.
    async fn attempt_count(&self, run_id: &str, step_key: &StepKey) -> Result<u32>;

    /// The most recent attempt for the step, if any was ever started.
    async fn last_attempt(&self, run_id: &str, step_key: &StepKey) -> Result<Option<Attempt>>;
}

#[derive(Default)]
struct RunLog {
    next_sequence: u64,
    events: Vec<SequencedEvent>,
    attempts: HashMap<StepKey, Vec<Attempt>>,
}

impl RunLog {
    /// Fold an event into the attempt records. A terminal event with no
    /// pending attempt synthesizes one, so logs written without explicit
    /// StepStart markers still count attempts correctly.
    fn record_attempt(&mut self, event: &Event, at: DateTime<Utc>) {
        match event {
            Event::StepStart { step_key } => {
                let attempts = self.attempts.entry(step_key.clone()).or_default();
                attempts.push(Attempt {
                    step_key: step_key.clone(),
                    attempt_number: attempts.len() as u32 + 1,
                    outcome: AttemptOutcome::Pending,
                    started_at: at,
                    ended_at: None,
                });
            }
            Event::StepSuccess { step_key, .. } | Event::StepFailure { step_key, .. } => {
                let outcome = match event {
                    Event::StepSuccess { .. } => AttemptOutcome::Succeeded,
                    _ => AttemptOutcome::Failed,
                };
                let attempts = self.attempts.entry(step_key.clone()).or_default();
                match attempts.last_mut() {
                    Some(attempt) if !attempt.is_terminal() => {
                        attempt.outcome = outcome;
                        attempt.ended_at = Some(at);
                    }
                    _ => {
                        attempts.push(Attempt {
                            step_key: step_key.clone(),
                            attempt_number: attempts.len() as u32 + 1,
                            outcome,
                            started_at: at,
                            ended_at: Some(at),
                        });
                    }
                }
            }
            _ => {}
        }
    }
}

/// In-memory history store. Tolerates concurrent appends from independent
/// step executors for the same run; ordering comes from the per-run
/// sequence counter taken under the write lock.
#[derive(Default, Clone)]
pub struct InMemoryHistoryStore {
    runs: Arc<RwLock<HashMap<String, RunLog>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, run_id: &str, event: Event) -> Result<SequencedEvent> {
        let mut runs = self.runs.write().await;
        let log = runs.entry(run_id.to_string()).or_default();

        let sequenced = SequencedEvent {
            sequence: log.next_sequence,
            timestamp: Utc::now(),
            event,
        };
        log.next_sequence += 1;
        log.record_attempt(&sequenced.event, sequenced.timestamp);

        debug!(
            "Appended event {} to run {}: {:?}",
            sequenced.sequence, run_id, sequenced.event
        );

        log.events.push(sequenced.clone());
        Ok(sequenced)
    }

    async fn read(&self, run_id: &str, step_key: Option<&StepKey>) -> Result<Vec<SequencedEvent>> {
        let runs = self.runs.read().await;
        let Some(log) = runs.get(run_id) else {
            return Ok(Vec::new());
        };

        let events = log
            .events
            .iter()
            .filter(|e| match step_key {
                Some(key) => e.event.step_key() == Some(key),
                None => true,
            })
            .cloned()
            .collect();

        Ok(events)
    }

    async fn attempt_count(&self, run_id: &str, step_key: &StepKey) -> Result<u32> {
        let runs = self.runs.read().await;
        let count = runs
            .get(run_id)
            .and_then(|log| log.attempts.get(step_key))
            .map(|attempts| attempts.len() as u32)
            .unwrap_or(0);
        Ok(count)
    }

    async fn last_attempt(&self, run_id: &str, step_key: &StepKey) -> Result<Option<Attempt>> {
        let runs = self.runs.read().await;
        let attempt = runs
            .get(run_id)
            .and_then(|log| log.attempts.get(step_key))
            .and_then(|attempts| attempts.last())
            .cloned();
        Ok(attempt)
    }
}
