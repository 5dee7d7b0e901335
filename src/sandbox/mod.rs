//! Code sandbox — isolated subprocess execution for job payloads.
//!
//! The executor only depends on the [`Sandbox`] capability surface:
//! spawn the entry unit of a prepared workspace with both output streams
//! piped, and let the caller terminate it. The concrete isolation
//! technology is swappable without touching the executor's control logic.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

use crate::executor::workspace::{CONTEXT_FILE, ENTRY_FILE, RESULT_FILE};

/// Capability surface required of an isolation backend.
///
/// Contract: the spawned process runs with the workspace as its working
/// directory, write access limited to the result file, network access
/// allowed, and no ambient environment visible to the job code — every
/// environment value a job sees travels through the workspace's context
/// file instead.
pub trait Sandbox: Send + Sync {
    /// Spawns the workspace's entry unit with stdout/stderr piped.
    fn spawn(&self, workspace: &Path) -> Result<Child>;
}

/// Deno-based sandbox.
///
/// Deno's permission flags carry the whole isolation policy: reads are
/// limited to the context file, writes to the result file, and without
/// `--allow-env` the job cannot observe the runner's environment.
pub struct DenoSandbox {
    deno_path: PathBuf,
}

impl DenoSandbox {
    pub fn new(deno_path: impl Into<PathBuf>) -> Self {
        Self {
            deno_path: deno_path.into(),
        }
    }
}

impl Sandbox for DenoSandbox {
    fn spawn(&self, workspace: &Path) -> Result<Child> {
        Command::new(&self.deno_path)
            .current_dir(workspace)
            .arg("run")
            .arg("--no-prompt")
            .arg(format!("--allow-read={CONTEXT_FILE}"))
            .arg(format!("--allow-write={RESULT_FILE}"))
            .arg("--allow-net")
            .arg(ENTRY_FILE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.deno_path.display()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_is_object_safe() {
        fn _assert_object_safe(_: &dyn Sandbox) {}
    }

    #[tokio::test]
    async fn test_shell_sandbox_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = testing::ShellSandbox::new("touch marker");
        let mut child = sandbox.spawn(dir.path()).unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
        assert!(dir.path().join("marker").exists());
    }
}
