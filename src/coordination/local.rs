// ABOUTME: Local process dispatch for a single step
// ABOUTME: Spawns the step's command as a child process and captures its output

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::history::StepKey;
use crate::plan::StepSpec;

/// Result of running a step as a local child process. Failure to spawn and
/// a non-zero exit are both domain failures: they belong to the unit of
/// work, not the coordinator.
#[derive(Debug)]
pub struct LocalExecution {
    pub succeeded: bool,
    pub output: String,
    pub error: Option<String>,
}

/// Run the step's command locally, with the serialized known-state blob
/// injected through the environment like any other spawned executor.
pub async fn execute_step(
    step_key: &StepKey,
    spec: &StepSpec,
    extra_env: &[(String, String)],
) -> LocalExecution {
    info!("Executing step {} locally: {}", step_key, spec.command);

    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) => {
            return LocalExecution {
                succeeded: false,
                output: String::new(),
                error: Some(format!("Failed to execute {}: {}", spec.command, e)),
            };
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    debug!("Step {} exited with code {}", step_key, exit_code);

    let combined = if !stdout.is_empty() && !stderr.is_empty() {
        format!("STDOUT:\n{}\nSTDERR:\n{}", stdout, stderr)
    } else if !stderr.is_empty() {
        stderr.clone()
    } else {
        stdout
    };

    // Forward captured output the same way remote dispatch forwards its
    // log stream
    for line in combined.lines() {
        info!("{}: {}", step_key, line);
    }

    if output.status.success() {
        LocalExecution {
            succeeded: true,
            output: combined,
            error: None,
        }
    } else {
        LocalExecution {
            succeeded: false,
            output: combined,
            error: Some(format!(
                "Step {} exited with code {}: {}",
                step_key,
                exit_code,
                stderr.trim()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        let spec = StepSpec::new("echo").with_args(vec!["hello".to_string()]);

        let result = execute_step(&"greet".into(), &spec, &[]).await;

        assert!(result.succeeded);
        assert!(result.output.contains("hello"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_failing_command_is_domain_failure() {
        let spec = StepSpec::new("bash").with_args(vec!["-c".to_string(), "exit 3".to_string()]);

        let result = execute_step(&"flaky".into(), &spec, &[]).await;

        assert!(!result.succeeded);
        assert!(result.error.unwrap().contains("code 3"));
    }

    #[tokio::test]
    async fn test_missing_command_is_domain_failure() {
        let spec = StepSpec::new("definitely-not-a-real-binary");

        let result = execute_step(&"broken".into(), &spec, &[]).await;

        assert!(!result.succeeded);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_captured_output_is_logged() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct Capture(Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for Capture {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = Capture(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let spec = StepSpec::new("echo").with_args(vec!["marker from child".to_string()]);
        let result = execute_step(&"greet".into(), &spec, &[]).await;
        assert!(result.succeeded);

        let logged = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("marker from child"));
    }

    #[tokio::test]
    async fn test_extra_env_reaches_child() {
        let spec = StepSpec::new("bash")
            .with_args(vec!["-c".to_string(), "echo state=$TEST_STATE".to_string()]);

        let result = execute_step(
            &"env_check".into(),
            &spec,
            &[("TEST_STATE".to_string(), "blob".to_string())],
        )
        .await;

        assert!(result.succeeded);
        assert!(result.output.contains("state=blob"));
    }
}
