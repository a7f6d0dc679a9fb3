// ABOUTME: Step coordinator composing retry verification, dispatch, and event recording
// ABOUTME: Splits domain failures from framework faults and exposes run_step / verify_and_run

use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::{CoordinationError, Result};
use super::local;
use super::retry::{verify_execution, RetryState};
use super::state::{KnownExecutionState, KNOWN_STATE_ENV_VAR};
use super::status::{run_status, step_status, RunStatus, StepStatus};
use crate::history::{Event, HistoryStore, StepKey};
use crate::plan::{PlanProvider, ResourceSpec};
use crate::remote::{
    ContainerContext, RemoteError, RemoteJobSpec, RemoteLauncher, SubstrateClient,
};

/// Appended as an engine event when the coordinator itself faults, so the
/// event stream never conflates coordinator bugs with user-code failures.
const FRAMEWORK_ERROR_MESSAGE: &str = "An exception was thrown during step execution that is \
     likely a framework error, rather than an error in user code.";

/// Where an approved step executes.
#[derive(Debug, Clone)]
pub enum DispatchTarget {
    Local,
    Remote {
        spec: RemoteJobSpec,
        /// Per-dispatch container overrides, merged over the coordinator's
        /// default context before submission.
        context: ContainerContext,
    },
}

impl DispatchTarget {
    /// Remote dispatch with no per-dispatch context overrides.
    pub fn remote(spec: RemoteJobSpec) -> Self {
        DispatchTarget::Remote {
            spec,
            context: ContainerContext::default(),
        }
    }
}

/// Outcome of one coordinated step execution. `Rejected` is the
/// verification engine's clean refusal, not an error; framework faults
/// surface as `Err(CoordinationError)` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded,
    Failed { error: String },
    Rejected,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    /// When set, domain failures count against the process exit signal.
    /// Off by default so batch orchestration can continue past recorded
    /// failures.
    pub propagate_failure_exit: bool,
}

/// Single coordination entry point for one run. All observable side effects
/// are history appends and substrate job creation/log reads.
pub struct StepCoordinator<H, P, C> {
    run_id: String,
    history: Arc<H>,
    plan: Arc<P>,
    launcher: RemoteLauncher<C>,
    container_context: ContainerContext,
    options: CoordinatorOptions,
}

impl<H, P, C> StepCoordinator<H, P, C>
where
    H: HistoryStore,
    P: PlanProvider,
    C: SubstrateClient,
{
    pub fn new(
        run_id: impl Into<String>,
        history: Arc<H>,
        plan: Arc<P>,
        launcher: RemoteLauncher<C>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            history,
            plan,
            launcher,
            container_context: ContainerContext::default(),
            options: CoordinatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Default container context every remote dispatch starts from.
    pub fn with_container_context(mut self, context: ContainerContext) -> Self {
        self.container_context = context;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn launcher(&self) -> &RemoteLauncher<C> {
        &self.launcher
    }

    /// Verify the requested steps against persisted history, then execute
    /// each approved step. A rejection refuses the whole set with no
    /// partial approval and no events appended.
    pub async fn verify_and_run(
        &self,
        step_keys: Option<&[StepKey]>,
        retry_state: &mut RetryState,
        known_state: &KnownExecutionState,
        target: &DispatchTarget,
    ) -> Result<Vec<(StepKey, StepOutcome)>> {
        let keys: Vec<StepKey> = match step_keys {
            Some(keys) => keys.to_vec(),
            None => self.plan.step_keys(),
        };

        let allowed =
            match verify_execution(self.history.as_ref(), &self.run_id, retry_state, &keys).await {
                Ok(allowed) => allowed,
                Err(err) => {
                    self.record_framework_error(&err, None).await;
                    return Err(err);
                }
            };

        if !allowed {
            info!(
                "Retry verification rejected execution of {} step(s) for run {}",
                keys.len(),
                self.run_id
            );
            return Ok(keys
                .into_iter()
                .map(|key| (key, StepOutcome::Rejected))
                .collect());
        }

        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self
                .run_step(&key, retry_state, known_state, target)
                .await?;
            outcomes.push((key, outcome));
        }
        Ok(outcomes)
    }

    /// Execute one step on the chosen target, recording start and terminal
    /// events. Domain failures are recorded verbatim and returned as
    /// outcomes; framework faults are appended as engine events and raised.
    pub async fn run_step(
        &self,
        step_key: &StepKey,
        retry_state: &mut RetryState,
        known_state: &KnownExecutionState,
        target: &DispatchTarget,
    ) -> Result<StepOutcome> {
        let spec = match self.plan.step_spec(step_key) {
            Some(spec) => spec,
            None => {
                let err = CoordinationError::StepNotInPlan {
                    step_key: step_key.clone(),
                };
                self.record_framework_error(&err, Some(step_key)).await;
                return Err(err);
            }
        };

        let blob = match known_state.to_blob() {
            Ok(blob) => blob,
            Err(err) => {
                self.record_framework_error(&err, Some(step_key)).await;
                return Err(err);
            }
        };

        let attempt_number = retry_state.mark_attempt(step_key.clone());
        self.history
            .append(
                &self.run_id,
                Event::StepStart {
                    step_key: step_key.clone(),
                },
            )
            .await?;

        match target {
            DispatchTarget::Local => {
                let result = local::execute_step(
                    step_key,
                    &spec,
                    &[(KNOWN_STATE_ENV_VAR.to_string(), blob)],
                )
                .await;

                if result.succeeded {
                    self.history
                        .append(
                            &self.run_id,
                            Event::StepSuccess {
                                step_key: step_key.clone(),
                                outputs: vec![],
                            },
                        )
                        .await?;
                    Ok(StepOutcome::Succeeded)
                } else {
                    let error = result
                        .error
                        .unwrap_or_else(|| "step failed without detail".to_string());
                    error!("Step {} failed: {}", step_key, error);
                    self.history
                        .append(
                            &self.run_id,
                            Event::StepFailure {
                                step_key: step_key.clone(),
                                error: error.clone(),
                            },
                        )
                        .await?;
                    Ok(StepOutcome::Failed { error })
                }
            }

            DispatchTarget::Remote {
                spec: base,
                context: overrides,
            } => {
                // Coordinator defaults, then per-dispatch overrides, then
                // the step's own contribution; the spec-level fields set on
                // `base` stay authoritative over all of them.
                let step_context = ContainerContext {
                    env: spec.env.clone(),
                    resources: if spec.resources == ResourceSpec::default() {
                        None
                    } else {
                        Some(spec.resources.clone())
                    },
                    ..ContainerContext::default()
                };
                let context = self
                    .container_context
                    .merge(overrides)
                    .merge(&step_context);

                let mut job_spec = base.clone().apply_context(&context);
                job_spec.job_name = format!("{}-{}", base.job_name, step_key);
                if attempt_number > 1 {
                    job_spec.job_name =
                        format!("{}-{}", job_spec.job_name, attempt_number - 1);
                }
                if job_spec.command.is_empty() {
                    job_spec.command = vec![spec.command.clone()];
                    job_spec.args = spec.args.clone();
                }
                job_spec
                    .env
                    .insert(KNOWN_STATE_ENV_VAR.to_string(), blob);

                let key = step_key.clone();
                let launch = self
                    .launcher
                    .launch(&job_spec, |line| info!("{}: {}", key, line))
                    .await;

                match launch {
                    Ok(()) => {
                        self.history
                            .append(
                                &self.run_id,
                                Event::StepSuccess {
                                    step_key: step_key.clone(),
                                    outputs: vec![],
                                },
                            )
                            .await?;
                        Ok(StepOutcome::Succeeded)
                    }
                    Err(RemoteError::JobFailed { message, .. }) => {
                        error!("Step {} failed on substrate: {}", step_key, message);
                        self.history
                            .append(
                                &self.run_id,
                                Event::StepFailure {
                                    step_key: step_key.clone(),
                                    error: message.clone(),
                                },
                            )
                            .await?;
                        Ok(StepOutcome::Failed { error: message })
                    }
                    Err(err) => {
                        let err = CoordinationError::from(err);
                        self.record_framework_error(&err, Some(step_key)).await;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Fold per-step statuses into a run-level terminal event. Appends
    /// nothing while any step is still incomplete.
    pub async fn record_run_outcome(&self) -> Result<RunStatus> {
        let mut any_failed = false;
        let mut all_succeeded = true;

        for key in self.plan.step_keys() {
            match step_status(self.history.as_ref(), &self.run_id, &key).await? {
                StepStatus::Failed => {
                    any_failed = true;
                    all_succeeded = false;
                }
                StepStatus::Incomplete => all_succeeded = false,
                StepStatus::Succeeded => {}
            }
        }

        if any_failed {
            self.history
                .append(
                    &self.run_id,
                    Event::RunFailure {
                        error: "one or more steps failed".to_string(),
                    },
                )
                .await?;
            Ok(RunStatus::Failed)
        } else if all_succeeded {
            self.history.append(&self.run_id, Event::RunSuccess).await?;
            Ok(RunStatus::Succeeded)
        } else {
            Ok(RunStatus::Incomplete)
        }
    }

    /// Current run status as derived purely from the event log.
    pub async fn run_status(&self) -> Result<RunStatus> {
        run_status(self.history.as_ref(), &self.run_id).await
    }

    /// Exit signal for a batch of outcomes. Domain failures map to zero
    /// unless the caller asked for exit-code propagation; rejections are
    /// the caller's call. Framework errors never reach here, they surface
    /// as `Err` and are always non-zero for the process.
    pub fn exit_code(&self, outcomes: &[(StepKey, StepOutcome)]) -> i32 {
        let failed = outcomes
            .iter()
            .any(|(_, outcome)| matches!(outcome, StepOutcome::Failed { .. }));

        if failed && self.options.propagate_failure_exit {
            1
        } else {
            0
        }
    }

    async fn record_framework_error(&self, err: &CoordinationError, step_key: Option<&StepKey>) {
        error!("Framework error in run {}: {}", self.run_id, err);
        let event = Event::EngineEvent {
            message: format!("{} {}", FRAMEWORK_ERROR_MESSAGE, err),
            step_key: step_key.cloned(),
        };
        if let Err(append_err) = self.history.append(&self.run_id, event).await {
            warn!(
                "Failed to record framework error for run {}: {}",
                self.run_id, append_err
            );
        }
    }
}
