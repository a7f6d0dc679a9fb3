// ABOUTME: Shared test helpers for integration tests
// ABOUTME: Provides a scripted in-memory substrate and logging setup

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use helmsman::history::{
    Attempt, Event, HistoryError, HistoryStore, SequencedEvent, StepKey,
};
use helmsman::remote::{
    BackingUnit, JobHandle, JobPhase, LogStream, RemoteError, RemoteJobSpec, SubstrateClient,
    UnitPhase,
};

/// Initialize tracing output for tests (safe to call repeatedly)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// History store whose backing service is gone: appends and counts fail as
/// unavailable, reads report a corrupt log. Exercises the error seam that
/// the in-memory store never hits.
pub struct BrokenHistoryStore;

#[async_trait]
impl HistoryStore for BrokenHistoryStore {
    async fn append(&self, _: &str, _: Event) -> Result<SequencedEvent, HistoryError> {
        Err(HistoryError::StoreUnavailable {
            message: "history service connection refused".to_string(),
        })
    }

    async fn read(
        &self,
        run_id: &str,
        _: Option<&StepKey>,
    ) -> Result<Vec<SequencedEvent>, HistoryError> {
        Err(HistoryError::CorruptStream {
            run_id: run_id.to_string(),
            message: "truncated event record".to_string(),
        })
    }

    async fn attempt_count(&self, _: &str, _: &StepKey) -> Result<u32, HistoryError> {
        Err(HistoryError::StoreUnavailable {
            message: "history service connection refused".to_string(),
        })
    }

    async fn last_attempt(&self, _: &str, _: &StepKey) -> Result<Option<Attempt>, HistoryError> {
        Err(HistoryError::StoreUnavailable {
            message: "history service connection refused".to_string(),
        })
    }
}

#[derive(Default)]
struct SubstrateScript {
    job_phase: Option<JobPhase>,
    units: Vec<(BackingUnit, UnitPhase)>,
    log_lines: Vec<String>,
    endless_stream: bool,
    submitted: Vec<RemoteJobSpec>,
}

/// Scripted substrate standing in for a real cluster API. The test decides
/// up front what the cluster reports; the launcher and coordinator are
/// exercised against that script.
#[derive(Default)]
pub struct FakeSubstrate {
    script: Mutex<SubstrateScript>,
    stop_calls: AtomicUsize,
    stream_saw_stop: Arc<AtomicBool>,
}

impl FakeSubstrate {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(SubstrateScript {
                job_phase: Some(JobPhase::Active),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// One backing unit that already succeeded; the common happy path.
    pub fn succeeded() -> Self {
        Self::new()
            .with_job_phase(JobPhase::Succeeded)
            .with_unit("unit-0", UnitPhase::Succeeded)
    }

    pub fn with_job_phase(self, phase: JobPhase) -> Self {
        self.script.lock().unwrap().job_phase = Some(phase);
        self
    }

    pub fn with_unit(self, name: &str, phase: UnitPhase) -> Self {
        self.script.lock().unwrap().units.push((
            BackingUnit {
                name: name.to_string(),
            },
            phase,
        ));
        self
    }

    pub fn with_log_lines(self, lines: &[&str]) -> Self {
        self.script.lock().unwrap().log_lines = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Stream that keeps the connection open forever after its scripted
    /// lines, like a container that went silent without exiting.
    pub fn with_endless_stream(self) -> Self {
        self.script.lock().unwrap().endless_stream = true;
        self
    }

    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Whether a log-stream producer observed the consumer's stop signal.
    pub fn stream_saw_stop(&self) -> bool {
        self.stream_saw_stop.load(Ordering::SeqCst)
    }

    pub fn submitted_specs(&self) -> Vec<RemoteJobSpec> {
        self.script.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl SubstrateClient for FakeSubstrate {
    async fn submit(&self, spec: &RemoteJobSpec) -> Result<JobHandle, RemoteError> {
        let mut script = self.script.lock().unwrap();
        script.submitted.push(spec.clone());
        Ok(JobHandle {
            job_name: spec.job_name.clone(),
            namespace: spec.namespace.clone(),
        })
    }

    async fn job_phase(&self, handle: &JobHandle) -> Result<JobPhase, RemoteError> {
        self.script
            .lock()
            .unwrap()
            .job_phase
            .ok_or_else(|| RemoteError::Substrate {
                message: format!("job {} not found", handle.job_name),
            })
    }

    async fn list_backing_units(&self, _: &JobHandle) -> Result<Vec<BackingUnit>, RemoteError> {
        let script = self.script.lock().unwrap();
        Ok(script.units.iter().map(|(unit, _)| unit.clone()).collect())
    }

    async fn unit_phase(
        &self,
        handle: &JobHandle,
        unit: &BackingUnit,
    ) -> Result<UnitPhase, RemoteError> {
        let script = self.script.lock().unwrap();
        script
            .units
            .iter()
            .find(|(u, _)| u.name == unit.name)
            .map(|(_, phase)| *phase)
            .ok_or_else(|| RemoteError::Substrate {
                message: format!("unit {} not found for job {}", unit.name, handle.job_name),
            })
    }

    async fn stream_logs(
        &self,
        _: &JobHandle,
        _: &BackingUnit,
    ) -> Result<LogStream, RemoteError> {
        let (lines, endless) = {
            let script = self.script.lock().unwrap();
            (script.log_lines.clone(), script.endless_stream)
        };
        let saw_stop = self.stream_saw_stop.clone();

        let (stream, mut producer) = LogStream::pair(16);
        tokio::spawn(async move {
            for line in lines {
                if !producer.send(line).await {
                    saw_stop.store(true, Ordering::SeqCst);
                    return;
                }
            }
            if endless {
                producer.stopped().await;
                saw_stop.store(true, Ordering::SeqCst);
            }
        });

        Ok(stream)
    }

    async fn stop(&self, _: &JobHandle) -> Result<(), RemoteError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
