//! `ProcessLauncher` abstraction (§4.2.3, §9 Design Notes).
//!
//! Abstracts "start this worker command with this environment" from the
//! concrete spawn mechanism so the controller can, in principle, run
//! inside a managed worker pool that forbids a bare `fork()`. This
//! binary's own `main.rs` only ever uses [`NativeProcessLauncher`].

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

/// Everything needed to start one worker invocation. Environment is
/// always an explicit map passed to the child only — the parent's own
/// environment is never mutated (§5 Shared resource policy).
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub work_dir: std::path::PathBuf,
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, spec: &WorkerSpec) -> std::io::Result<Child>;
}

/// Direct `tokio::process::Command::spawn`. The default and only
/// production implementation.
#[derive(Debug, Default)]
pub struct NativeProcessLauncher;

#[async_trait]
impl ProcessLauncher for NativeProcessLauncher {
    async fn spawn(&self, spec: &WorkerSpec) -> std::io::Result<Child> {
        Command::new(&spec.program)
            .args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Fork-capable spawn path.
///
/// The original system ran inside a task framework that installs a
/// daemonic worker process and forbids that worker from calling the
/// default `fork()` start method, so it substituted a fork-capable
/// multiprocessing backend. This binary is not itself typically invoked
/// from inside such a managed pool, and Rust has no equivalent
/// daemonic-child restriction to work around, so this is kept as a
/// documented pass-through rather than a fabricated second backend.
#[derive(Debug, Default)]
pub struct ForkCapableProcessLauncher {
    inner: NativeProcessLauncher,
}

#[async_trait]
impl ProcessLauncher for ForkCapableProcessLauncher {
    async fn spawn(&self, spec: &WorkerSpec) -> std::io::Result<Child> {
        self.inner.spawn(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn native_launcher_spawns_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let spec = WorkerSpec {
            program: "echo".into(),
            args: vec!["hello".into()],
            env: HashMap::new(),
            work_dir: dir.path().to_path_buf(),
        };
        let launcher = NativeProcessLauncher;
        let child = launcher.spawn(&spec).await.unwrap();
        let output = child.wait_with_output().await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }
}
