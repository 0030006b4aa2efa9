// crates/deployer-engines/src/process_runner.rs
// ============================================================================
// Module: Process Runner
// Description: Spawns a prepared `Command` as a real subprocess, capturing
// stdout/stderr to a per-step log file and reading `output.json` back from
// the step's cache directory once it exits.
// Purpose: The only place in the workspace that touches
// `tokio::process::Command`; every other subsystem works with the
// engine-agnostic `Command` descriptor.
// Dependencies: deployer_core, tokio::process, tokio::io
// ============================================================================

//! ## Overview
//! Subprocess IPC is file-based: `input.json` is written into the cache
//! directory by the engine's `prepare` before this runner is invoked;
//! `output.json` is read back from the same directory once the process
//! exits zero. Stdout/stderr are captured concurrently to a log file,
//! truncated past [`MAX_LOGGED_BYTES`] to avoid a runaway process filling
//! disk.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use deployer_core::Command;
use deployer_core::ProcessRunner;
use deployer_core::StepError;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;

/// Output file name read from the cache directory after a command exits.
const OUTPUT_FILE_NAME: &str = "output.json";
/// Log file name written into the cache directory during execution.
const LOG_FILE_NAME: &str = "step.log";
/// Maximum bytes of combined stdout/stderr persisted to the step log.
const MAX_LOGGED_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Executes a [`Command`] with `tokio::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &Command) -> Result<Vec<u8>, StepError> {
        let mut process = TokioCommand::new(&command.program);
        process.args(&command.args).current_dir(&command.working_dir).stdout(Stdio::piped()).stderr(Stdio::piped());
        for (name, value) in &command.env {
            process.env(name, value_to_env_string(value));
        }

        tracing::debug!(program = %command.program, cache_dir = %command.cache_dir, "spawning engine subprocess");
        let mut child = process.spawn().map_err(|err| StepError::EngineFailure(format!("failed to spawn {}: {err}", command.program)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let log_path = Path::new(&command.cache_dir).join(LOG_FILE_NAME);
        let (stdout_bytes, stderr_bytes) = tokio::join!(drain(stdout), drain(stderr));
        tracing::debug!(
            program = %command.program,
            stdout_bytes = stdout_bytes.len(),
            stderr_bytes = stderr_bytes.len(),
            logged_stdout_bytes = stdout_bytes.len().min(MAX_LOGGED_BYTES),
            logged_stderr_bytes = stderr_bytes.len().min(MAX_LOGGED_BYTES),
            "captured engine subprocess output"
        );

        if let Err(err) = write_log(&log_path, &stdout_bytes, &stderr_bytes).await {
            tracing::debug!(error = %err, path = %log_path.display(), "failed to write step log");
        }

        let status = child.wait().await.map_err(|err| StepError::EngineFailure(format!("failed to wait on {}: {err}", command.program)))?;
        if !status.success() {
            return Err(StepError::EngineFailure(format!("{} exited with {status}", command.program)));
        }

        let output_path = Path::new(&command.cache_dir).join(OUTPUT_FILE_NAME);
        tokio::fs::read(&output_path).await.map_err(|err| StepError::EngineFailure(format!("failed to read {}: {err}", output_path.display())))
    }
}

/// Reads a child process pipe to completion, returning an empty buffer if it was never captured.
async fn drain(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };
    let mut buffer = Vec::new();
    let _ = pipe.read_to_end(&mut buffer).await;
    buffer
}

/// Writes a step's captured stdout/stderr to `path`, truncated to [`MAX_LOGGED_BYTES`] each.
async fn write_log(path: &Path, stdout: &[u8], stderr: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(b"--- stdout ---\n").await?;
    file.write_all(&stdout[.. stdout.len().min(MAX_LOGGED_BYTES)]).await?;
    file.write_all(b"\n--- stderr ---\n").await?;
    file.write_all(&stderr[.. stderr.len().min(MAX_LOGGED_BYTES)]).await?;
    file.flush().await
}

/// Renders a variable value as an environment-variable string: strings pass through unquoted.
fn value_to_env_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
