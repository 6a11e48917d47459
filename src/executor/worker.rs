//! Worker wire protocol (§4.2 Worker contract, §4.2.1 stdio JSON handshake).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{Cloud, ErrorType, Policy};
use crate::error::ExecutorError;

use super::launcher::{ProcessLauncher, WorkerSpec};

#[derive(Debug, Serialize)]
pub struct WorkerRequest {
    pub policies: Vec<Policy>,
    pub work_dir: String,
    pub cloud: Cloud,
    pub region: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkerFailure {
    pub policy: String,
    pub location: String,
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default)]
    pub trace: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerResult {
    pub n_successful: u32,
    pub failed: Vec<WorkerFailure>,
}

/// Run one worker invocation to completion: spawn, write the request line
/// to stdin, read one response line from stdout, then await exit status.
///
/// A non-zero exit status means the worker itself could not start — the
/// caller must treat every planned rule in that region as `INTERNAL`
/// (§4.2's handshake rule), which is why this returns `ExecutorError`
/// rather than a partial `WorkerResult` on that path.
pub async fn run_worker(
    launcher: &dyn ProcessLauncher,
    program: &str,
    args: &[String],
    env: HashMap<String, String>,
    work_dir: std::path::PathBuf,
    request: &WorkerRequest,
) -> Result<WorkerResult, ExecutorError> {
    let spec = WorkerSpec {
        program: program.to_string(),
        args: args.to_vec(),
        env,
        work_dir,
    };

    let mut child = launcher
        .spawn(&spec)
        .await
        .map_err(|source| ExecutorError::SpawnFailed {
            region: request.region.clone(),
            source,
        })?;

    let mut stdin = child.stdin.take().expect("worker stdin must be piped");
    let stdout = child.stdout.take().expect("worker stdout must be piped");

    let payload = serde_json::to_vec(request).expect("WorkerRequest always serializes");
    stdin
        .write_all(&payload)
        .await
        .map_err(|source| ExecutorError::SpawnFailed {
            region: request.region.clone(),
            source,
        })?;
    stdin.write_all(b"\n").await.ok();
    drop(stdin);

    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    reader.read_line(&mut line).await.ok();

    let status = child.wait().await.map_err(|source| ExecutorError::SpawnFailed {
        region: request.region.clone(),
        source,
    })?;

    if !status.success() {
        return Err(ExecutorError::WorkerStartFailed {
            region: request.region.clone(),
            status: status.code().unwrap_or(-1),
        });
    }

    if line.trim().is_empty() {
        return Err(ExecutorError::WorkerProtocolViolation {
            region: request.region.clone(),
        });
    }

    serde_json::from_str(line.trim()).map_err(|_| ExecutorError::WorkerProtocolViolation {
        region: request.region.clone(),
    })
}
