// ABOUTME: Retry state tally and the retry verification engine
// ABOUTME: Pure decision comparing caller-claimed attempts against persisted history

use std::collections::HashMap;
use tracing::{debug, warn};

use super::error::Result;
use crate::history::{AttemptOutcome, HistoryStore, StepKey};

/// Attempts the current caller has recorded as started in this coordination
/// session. Built fresh per invocation and never persisted: it represents
/// intent, while the history store represents fact.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: HashMap<StepKey, u32>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more attempt for the step and return its number.
    pub fn mark_attempt(&mut self, step_key: impl Into<StepKey>) -> u32 {
        let count = self.attempts.entry(step_key.into()).or_insert(0);
        *count += 1;
        *count
    }

    /// Highest attempt number recorded for the step this session, if any.
    pub fn attempt_number(&self, step_key: &StepKey) -> Option<u32> {
        self.attempts.get(step_key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Decide whether the requested (re)execution of `step_keys` is legitimate
/// given persisted history. Read-only; verification is performed against a
/// point-in-time snapshot of the store, which must be read-after-write
/// consistent for the run being checked.
///
/// The result is conjunctive: any single rejection fails the whole set.
/// Rejection is a clean refusal, not an error; the caller decides whether
/// refusal is fatal.
pub async fn verify_execution<H>(
    history: &H,
    run_id: &str,
    retry_state: &RetryState,
    step_keys: &[StepKey],
) -> Result<bool>
where
    H: HistoryStore + ?Sized,
{
    for step_key in step_keys {
        let persisted = history.attempt_count(run_id, step_key).await?;
        let claimed = retry_state.attempt_number(step_key);

        let allowed = match (persisted, claimed) {
            // Never attempted, nothing claimed: fresh execution.
            (0, None) => true,

            // Claims a retry but history shows nothing was ever attempted:
            // stale or forged retry request.
            (0, Some(claimed)) => {
                warn!(
                    "Rejecting step {}: retry claims attempt {} but no attempt is persisted",
                    step_key, claimed
                );
                false
            }

            (persisted, claimed) => {
                match history.last_attempt(run_id, step_key).await? {
                    Some(attempt) if attempt.outcome == AttemptOutcome::Succeeded => {
                        warn!(
                            "Rejecting step {}: already completed successfully, \
                             re-running would duplicate side effects",
                            step_key
                        );
                        false
                    }
                    Some(attempt) if attempt.outcome == AttemptOutcome::Failed => {
                        // Legitimate retry only when the caller's tally
                        // matches the persisted count exactly.
                        if claimed == Some(persisted) {
                            true
                        } else {
                            warn!(
                                "Rejecting step {}: retry state claims attempt {:?} \
                                 but history has {} attempts",
                                step_key, claimed, persisted
                            );
                            false
                        }
                    }
                    // Pending attempt or missing record: the caller is out
                    // of sync with history either way.
                    _ => {
                        warn!(
                            "Rejecting step {}: last persisted attempt is not terminal",
                            step_key
                        );
                        false
                    }
                }
            }
        };

        if !allowed {
            return Ok(false);
        }

        debug!("Step {} passed retry verification", step_key);
    }

    Ok(true)
}
