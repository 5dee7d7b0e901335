//! Per-job execution lifecycle.
//!
//! The executor materializes an ephemeral workspace, spawns the job
//! through the configured [`Sandbox`], relays its output streams, and
//! races natural exit against cancellation and a wall-clock timeout.
//! Whichever kill cause is recorded first — not any signal the process
//! itself observed — classifies the outcome at actual exit time.

pub mod logs;
pub mod workspace;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::Job;
use crate::sandbox::Sandbox;

use logs::LogReceiver;
use workspace::{ExecutionContext, Workspace};

/// Terminal classification of one execution attempt. Exactly one per job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    Success { result: serde_json::Value },
    Error { message: String },
    TimeoutError,
    Cancel,
}

impl ExecuteResult {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            ExecuteResult::Success { .. } => "success",
            ExecuteResult::Error { .. } => "error",
            ExecuteResult::TimeoutError => "timeout",
            ExecuteResult::Cancel => "cancel",
        }
    }
}

/// A live execution: the relayed log sequence plus the future outcome.
pub struct Execution {
    pub logs: LogReceiver,
    pub outcome: JoinHandle<ExecuteResult>,
}

impl Execution {
    /// Immediate error outcome with an empty, already-closed log
    /// sequence. Used for failures before the subprocess exists.
    fn failed(message: String) -> Self {
        Self {
            logs: logs::closed(),
            outcome: tokio::spawn(async move { ExecuteResult::Error { message } }),
        }
    }
}

enum KillCause {
    Timeout,
    Cancel,
}

/// Spawns and supervises one sandboxed subprocess per job.
pub struct Executor {
    sandbox: Arc<dyn Sandbox>,
    timeout: Duration,
}

impl Executor {
    pub fn new(sandbox: Arc<dyn Sandbox>, timeout: Duration) -> Self {
        Self { sandbox, timeout }
    }

    /// Starts executing a job. Never fails: setup errors resolve to an
    /// immediate error outcome so the caller sees a uniform shape.
    pub async fn execute(&self, job: &Job, cancel: CancellationToken) -> Execution {
        let context = ExecutionContext::from_job(job);
        match self.start(&job.code, &context, cancel).await {
            Ok(execution) => execution,
            Err(e) => Execution::failed(format!("failed to prepare execution: {e:#}")),
        }
    }

    async fn start(
        &self,
        code: &str,
        context: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<Execution> {
        let workspace = Workspace::create(code, context).await?;
        let mut child = self.sandbox.spawn(workspace.path())?;

        let stdout = child.stdout.take().context("child stdout not piped")?;
        let stderr = child.stderr.take().context("child stderr not piped")?;
        let logs = logs::relay(stdout, stderr);

        let timeout = self.timeout;
        let outcome =
            tokio::spawn(async move { resolve(child, workspace, cancel, timeout).await });

        Ok(Execution { logs, outcome })
    }
}

/// Races natural exit against cancellation and timeout, then classifies.
/// Owns the workspace so it is removed exactly when the outcome resolves,
/// on every path.
async fn resolve(
    mut child: Child,
    workspace: Workspace,
    cancel: CancellationToken,
    timeout: Duration,
) -> ExecuteResult {
    enum Waited {
        Exited(std::io::Result<std::process::ExitStatus>),
        Killed(KillCause),
    }

    let first = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = cancel.cancelled() => Waited::Killed(KillCause::Cancel),
        _ = tokio::time::sleep(timeout) => Waited::Killed(KillCause::Timeout),
    };

    let (status, kill_cause) = match first {
        Waited::Exited(status) => (status, None),
        Waited::Killed(cause) => {
            // The process may have exited in the meantime; a failed kill
            // is fine either way.
            let _ = child.start_kill();
            (child.wait().await, Some(cause))
        }
    };

    let result = match kill_cause {
        Some(KillCause::Timeout) => ExecuteResult::TimeoutError,
        Some(KillCause::Cancel) => ExecuteResult::Cancel,
        None => match status {
            Ok(status) if status.success() => match workspace.read_result().await {
                Ok(result) => ExecuteResult::Success { result },
                Err(e) => ExecuteResult::Error {
                    message: format!("{e:#}"),
                },
            },
            Ok(status) => ExecuteResult::Error {
                message: match status.code() {
                    Some(code) => format!("process exited with code {code}"),
                    None => format!("process terminated abnormally ({status})"),
                },
            },
            Err(e) => ExecuteResult::Error {
                message: format!("failed to await process exit: {e}"),
            },
        },
    };

    debug!("execution resolved: {}", result.label());
    result
    // workspace dropped here → removed recursively
}
