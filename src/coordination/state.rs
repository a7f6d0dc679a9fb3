// ABOUTME: Known execution state snapshot passed across process boundaries
// ABOUTME: Immutable, serialized by value; absence of an entry is a valid state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::Result;
use crate::history::{Event, HistoryStore, OutputRef, StepKey};

/// Environment variable carrying the serialized snapshot into a spawned
/// executor process or container.
pub const KNOWN_STATE_ENV_VAR: &str = "HELMSMAN_KNOWN_STATE";

/// Snapshot of prior attempt counts and upstream output references, built
/// once per execution and passed by value to spawned executors. The
/// receiving process treats it as read-only input; new facts are emitted
/// only as new events, never by mutating this value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnownExecutionState {
    #[serde(default)]
    retry_counts: BTreeMap<StepKey, u32>,

    #[serde(default)]
    output_handles: BTreeMap<StepKey, Vec<OutputRef>>,
}

impl KnownExecutionState {
    pub fn new(
        retry_counts: BTreeMap<StepKey, u32>,
        output_handles: BTreeMap<StepKey, Vec<OutputRef>>,
    ) -> Self {
        Self {
            retry_counts,
            output_handles,
        }
    }

    /// Fold the history store's attempt counts and completed-step outputs
    /// for every step *not* in the current execution set.
    pub async fn for_execution<H>(
        history: &H,
        run_id: &str,
        all_steps: &[StepKey],
        current_steps: &[StepKey],
    ) -> Result<Self>
    where
        H: HistoryStore + ?Sized,
    {
        let mut retry_counts = BTreeMap::new();
        let mut output_handles = BTreeMap::new();

        for step_key in all_steps {
            if current_steps.contains(step_key) {
                continue;
            }

            let count = history.attempt_count(run_id, step_key).await?;
            if count > 0 {
                retry_counts.insert(step_key.clone(), count);
            }

            // The latest success holds the authoritative output handles.
            let events = history.read(run_id, Some(step_key)).await?;
            let outputs = events.iter().rev().find_map(|e| match &e.event {
                Event::StepSuccess { outputs, .. } => Some(outputs.clone()),
                _ => None,
            });
            if let Some(outputs) = outputs {
                if !outputs.is_empty() {
                    output_handles.insert(step_key.clone(), outputs);
                }
            }
        }

        Ok(Self {
            retry_counts,
            output_handles,
        })
    }

    /// Prior attempts for the step; zero when never attempted. Absence is
    /// a common, valid state rather than malformed input.
    pub fn retry_count(&self, step_key: &StepKey) -> u32 {
        self.retry_counts.get(step_key).copied().unwrap_or(0)
    }

    /// Output handles from the step's latest success; empty when none.
    pub fn outputs(&self, step_key: &StepKey) -> &[OutputRef] {
        self.output_handles
            .get(step_key)
            .map(|refs| refs.as_slice())
            .unwrap_or(&[])
    }

    pub fn retry_counts(&self) -> &BTreeMap<StepKey, u32> {
        &self.retry_counts
    }

    pub fn output_handles(&self) -> &BTreeMap<StepKey, Vec<OutputRef>> {
        &self.output_handles
    }

    /// Serialize to the opaque blob form used at process boundaries.
    pub fn to_blob(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_blob(blob: &str) -> Result<Self> {
        Ok(serde_json::from_str(blob)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Event, InMemoryHistoryStore};

    fn sample_state() -> KnownExecutionState {
        let mut retry_counts = BTreeMap::new();
        retry_counts.insert(StepKey::from("extract"), 2);
        retry_counts.insert(StepKey::from("transform"), 1);

        let mut output_handles = BTreeMap::new();
        output_handles.insert(
            StepKey::from("extract"),
            vec![
                OutputRef::new("rows", "s3://bucket/run_1/extract/rows"),
                OutputRef::new("schema", "s3://bucket/run_1/extract/schema"),
            ],
        );

        KnownExecutionState::new(retry_counts, output_handles)
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let state = sample_state();

        let blob = state.to_blob().unwrap();
        let restored = KnownExecutionState::from_blob(&blob).unwrap();

        assert_eq!(state, restored);
        assert_eq!(restored.retry_count(&"extract".into()), 2);
        assert_eq!(restored.outputs(&"extract".into()).len(), 2);
    }

    #[test]
    fn test_absent_steps_read_as_empty() {
        let state = sample_state();

        assert_eq!(state.retry_count(&"never_ran".into()), 0);
        assert!(state.outputs(&"never_ran".into()).is_empty());

        // Absent entries survive a round trip as absent, not as errors
        let restored = KnownExecutionState::from_blob(&state.to_blob().unwrap()).unwrap();
        assert_eq!(restored.retry_count(&"never_ran".into()), 0);
        assert!(restored.outputs(&"never_ran".into()).is_empty());
    }

    #[test]
    fn test_empty_state_round_trips() {
        let state = KnownExecutionState::default();
        let restored = KnownExecutionState::from_blob(&state.to_blob().unwrap()).unwrap();
        assert_eq!(state, restored);
    }

    #[tokio::test]
    async fn test_for_execution_skips_current_steps() {
        let store = InMemoryHistoryStore::new();

        for key in ["extract", "transform"] {
            store
                .append("run_1", Event::StepStart { step_key: key.into() })
                .await
                .unwrap();
        }
        store
            .append(
                "run_1",
                Event::StepSuccess {
                    step_key: "extract".into(),
                    outputs: vec![OutputRef::new("rows", "mem://run_1/extract")],
                },
            )
            .await
            .unwrap();
        store
            .append(
                "run_1",
                Event::StepFailure {
                    step_key: "transform".into(),
                    error: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        let all: Vec<StepKey> = vec!["extract".into(), "transform".into(), "load".into()];
        let current: Vec<StepKey> = vec!["transform".into()];

        let state = KnownExecutionState::for_execution(&store, "run_1", &all, &current)
            .await
            .unwrap();

        // The step being executed now is excluded
        assert_eq!(state.retry_count(&"transform".into()), 0);
        // Completed upstream step carries its count and outputs
        assert_eq!(state.retry_count(&"extract".into()), 1);
        assert_eq!(state.outputs(&"extract".into())[0].name, "rows");
        // Never-attempted steps simply have no entries
        assert_eq!(state.retry_count(&"load".into()), 0);
    }
}
