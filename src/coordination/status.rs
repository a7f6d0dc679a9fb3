// ABOUTME: Event-sourced status aggregation for steps and runs
// ABOUTME: Pure reads over the event log; never a cached flag from the dispatching process

use serde::{Deserialize, Serialize};

use super::error::Result;
use crate::history::{Event, HistoryStore, StepKey};

/// Observable outcome of a step derived from the event log. `Incomplete`
/// means no terminal event exists yet; it is never conflated with failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Incomplete,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Status of one step: the last terminal event for its key wins. The
/// process that ran the step may have already exited, so the log is the
/// only trustworthy channel.
pub async fn step_status<H>(history: &H, run_id: &str, step_key: &StepKey) -> Result<StepStatus>
where
    H: HistoryStore + ?Sized,
{
    let events = history.read(run_id, Some(step_key)).await?;

    let status = events
        .iter()
        .rev()
        .find_map(|e| match &e.event {
            Event::StepSuccess { .. } => Some(StepStatus::Succeeded),
            Event::StepFailure { .. } => Some(StepStatus::Failed),
            _ => None,
        })
        .unwrap_or(StepStatus::Incomplete);

    Ok(status)
}

/// Status of the whole run: the last run-level terminal event wins; a run
/// with neither is incomplete, not failed.
pub async fn run_status<H>(history: &H, run_id: &str) -> Result<RunStatus>
where
    H: HistoryStore + ?Sized,
{
    let events = history.read(run_id, None).await?;

    let status = events
        .iter()
        .rev()
        .find_map(|e| match &e.event {
            Event::RunSuccess => Some(RunStatus::Succeeded),
            Event::RunFailure { .. } => Some(RunStatus::Failed),
            _ => None,
        })
        .unwrap_or(RunStatus::Incomplete);

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistoryStore;

    #[tokio::test]
    async fn test_last_terminal_event_wins() {
        let store = InMemoryHistoryStore::new();
        let key = StepKey::from("transform");

        store
            .append(
                "run_1",
                Event::StepFailure {
                    step_key: key.clone(),
                    error: "transient".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .append(
                "run_1",
                Event::StepSuccess {
                    step_key: key.clone(),
                    outputs: vec![],
                },
            )
            .await
            .unwrap();

        // Failure followed by success for the same key reports succeeded
        assert_eq!(
            step_status(&store, "run_1", &key).await.unwrap(),
            StepStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_no_terminal_event_is_incomplete() {
        let store = InMemoryHistoryStore::new();
        let key = StepKey::from("transform");

        store
            .append("run_1", Event::StepStart { step_key: key.clone() })
            .await
            .unwrap();
        store
            .append(
                "run_1",
                Event::EngineEvent {
                    message: "still waiting".to_string(),
                    step_key: Some(key.clone()),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            step_status(&store, "run_1", &key).await.unwrap(),
            StepStatus::Incomplete
        );
        assert_eq!(
            run_status(&store, "run_1").await.unwrap(),
            RunStatus::Incomplete
        );
    }

    #[tokio::test]
    async fn test_run_status_from_run_level_events() {
        let store = InMemoryHistoryStore::new();

        store
            .append(
                "run_1",
                Event::RunFailure {
                    error: "first pass failed".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            run_status(&store, "run_1").await.unwrap(),
            RunStatus::Failed
        );

        // A later re-execution can supersede the failure
        store.append("run_1", Event::RunSuccess).await.unwrap();
        assert_eq!(
            run_status(&store, "run_1").await.unwrap(),
            RunStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_step_statuses_are_independent() {
        let store = InMemoryHistoryStore::new();

        store
            .append(
                "run_1",
                Event::StepSuccess {
                    step_key: "a".into(),
                    outputs: vec![],
                },
            )
            .await
            .unwrap();
        store
            .append(
                "run_1",
                Event::StepFailure {
                    step_key: "b".into(),
                    error: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            step_status(&store, "run_1", &"a".into()).await.unwrap(),
            StepStatus::Succeeded
        );
        assert_eq!(
            step_status(&store, "run_1", &"b".into()).await.unwrap(),
            StepStatus::Failed
        );
        assert_eq!(
            step_status(&store, "run_1", &"c".into()).await.unwrap(),
            StepStatus::Incomplete
        );
    }
}
