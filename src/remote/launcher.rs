// ABOUTME: Remote execution launcher driving a submitted job to a terminal phase
// ABOUTME: One wall-clock deadline covers scheduling, running, log streaming, and terminal waits

use futures::future::join_all;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::client::{BackingUnit, JobHandle, JobPhase, SubstrateClient, UnitPhase};
use super::error::{LaunchPhase, RemoteError, Result};
use super::job::RemoteJobSpec;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Submits a job to the substrate and monitors it through
/// `Submitted -> PodsPending -> PodRunning -> terminal`. The deadline is
/// computed once from the submit instant plus the spec's timeout; every
/// subsequent wait spends from the same budget rather than resetting it.
pub struct RemoteLauncher<C> {
    client: C,
    poll_interval: Duration,
}

impl<C: SubstrateClient> RemoteLauncher<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run the full launch state machine, forwarding each log line to
    /// `line_sink` as it arrives. A timeout anywhere sends a best-effort
    /// stop to the substrate before returning.
    pub async fn launch<F>(&self, spec: &RemoteJobSpec, mut line_sink: F) -> Result<()>
    where
        F: FnMut(String),
    {
        let handle = self.client.submit(spec).await?;
        let start = Instant::now();
        let deadline = if spec.timeout.is_zero() {
            None
        } else {
            Some(start + spec.timeout)
        };

        info!(
            "Created remote job {} in namespace {} (timeout: {:?})",
            handle.job_name, handle.namespace, spec.timeout
        );

        let result = self.drive(&handle, spec, deadline, &mut line_sink).await;

        if let Err(ref err) = result {
            if err.is_timeout() {
                if let Err(stop_err) = self.client.stop(&handle).await {
                    warn!(
                        "Failed to stop job {} after timeout: {}",
                        handle.job_name, stop_err
                    );
                }
            }
        }

        result
    }

    async fn drive<F>(
        &self,
        handle: &JobHandle,
        spec: &RemoteJobSpec,
        deadline: Option<Instant>,
        line_sink: &mut F,
    ) -> Result<()>
    where
        F: FnMut(String),
    {
        let unit = self.wait_for_backing_unit(handle, spec, deadline).await?;
        info!("Job {} scheduled backing unit {}", handle.job_name, unit.name);

        self.wait_for_unit_running(handle, spec, &unit, deadline).await?;
        debug!("Backing unit {} is past pending", unit.name);

        self.stream_unit_logs(handle, spec, &unit, deadline, line_sink)
            .await?;

        self.wait_for_terminal(handle, spec, deadline).await?;
        info!("Job {} completed successfully", handle.job_name);
        Ok(())
    }

    /// Poll until at least one backing unit exists. A job that reaches a
    /// terminal phase with zero units never scheduled anything; that is a
    /// configuration or scheduling failure, surfaced immediately and
    /// distinct from a timeout.
    async fn wait_for_backing_unit(
        &self,
        handle: &JobHandle,
        spec: &RemoteJobSpec,
        deadline: Option<Instant>,
    ) -> Result<BackingUnit> {
        loop {
            let mut units = self.client.list_backing_units(handle).await?;
            if !units.is_empty() {
                return Ok(units.remove(0));
            }

            if self.client.job_phase(handle).await?.is_terminal() {
                return Err(RemoteError::NoBackingUnit {
                    job_name: handle.job_name.clone(),
                });
            }

            self.pause(spec, deadline, LaunchPhase::Scheduling).await?;
        }
    }

    async fn wait_for_unit_running(
        &self,
        handle: &JobHandle,
        spec: &RemoteJobSpec,
        unit: &BackingUnit,
        deadline: Option<Instant>,
    ) -> Result<()> {
        loop {
            let phase = self.client.unit_phase(handle, unit).await?;
            // A unit that is already terminal still gets its logs read and
            // its outcome resolved by the terminal wait.
            if phase != UnitPhase::Pending {
                return Ok(());
            }
            self.pause(spec, deadline, LaunchPhase::WaitingForRunning)
                .await?;
        }
    }

    /// Forward log lines until the stream ends. The wait for each line is
    /// capped at the poll interval so a silent or stalled stream cannot
    /// drift past the deadline; expiry stops the stream before returning.
    async fn stream_unit_logs<F>(
        &self,
        handle: &JobHandle,
        spec: &RemoteJobSpec,
        unit: &BackingUnit,
        deadline: Option<Instant>,
        line_sink: &mut F,
    ) -> Result<()>
    where
        F: FnMut(String),
    {
        let mut stream = self.client.stream_logs(handle, unit).await?;

        loop {
            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        stream.stop();
                        return Err(self.timeout_error(handle, spec, LaunchPhase::LogStream));
                    }
                    self.poll_interval.min(d - now)
                }
                None => self.poll_interval,
            };

            match timeout(wait, stream.next_line()).await {
                Ok(Some(line)) => line_sink(line),
                Ok(None) => return Ok(()),
                // Interval elapsed with no line; loop to re-check the deadline.
                Err(_) => {}
            }
        }
    }

    /// Poll until the expected number of backing units (the job's declared
    /// parallelism) report a terminal phase.
    async fn wait_for_terminal(
        &self,
        handle: &JobHandle,
        spec: &RemoteJobSpec,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let expected = spec.parallelism.max(1) as usize;

        loop {
            let units = self.client.list_backing_units(handle).await?;
            let phases = join_all(
                units
                    .iter()
                    .map(|unit| self.client.unit_phase(handle, unit)),
            )
            .await;

            let mut terminal = 0;
            let mut failed = Vec::new();
            for (unit, phase) in units.iter().zip(phases) {
                match phase? {
                    UnitPhase::Succeeded => terminal += 1,
                    UnitPhase::Failed => {
                        terminal += 1;
                        failed.push(unit.name.clone());
                    }
                    UnitPhase::Pending | UnitPhase::Running => {}
                }
            }

            if terminal >= expected {
                if failed.is_empty() {
                    return Ok(());
                }
                return Err(RemoteError::JobFailed {
                    job_name: handle.job_name.clone(),
                    message: format!("backing units failed: {}", failed.join(", ")),
                });
            }

            debug!(
                "Job {}: {}/{} backing units terminal",
                handle.job_name, terminal, expected
            );
            self.pause(spec, deadline, LaunchPhase::Terminal).await?;
        }
    }

    /// Sleep one poll interval, spending from the shared deadline. Fails
    /// with a phase-tagged timeout once the budget is exhausted.
    async fn pause(
        &self,
        spec: &RemoteJobSpec,
        deadline: Option<Instant>,
        phase: LaunchPhase,
    ) -> Result<()> {
        match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Err(self.timeout_error_named(&spec.job_name, spec, phase));
                }
                sleep(self.poll_interval.min(d - now)).await;
                Ok(())
            }
            None => {
                sleep(self.poll_interval).await;
                Ok(())
            }
        }
    }

    fn timeout_error(
        &self,
        handle: &JobHandle,
        spec: &RemoteJobSpec,
        phase: LaunchPhase,
    ) -> RemoteError {
        self.timeout_error_named(&handle.job_name, spec, phase)
    }

    fn timeout_error_named(
        &self,
        job_name: &str,
        spec: &RemoteJobSpec,
        phase: LaunchPhase,
    ) -> RemoteError {
        warn!(
            "Job {} exceeded its {:?} budget during {}",
            job_name, spec.timeout, phase
        );
        RemoteError::Timeout {
            job_name: job_name.to_string(),
            phase,
            timeout: spec.timeout,
        }
    }
}
