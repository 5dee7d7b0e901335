//! Run loop — polls the control plane for pending jobs, drives each
//! one through the execution state machine, and reports terminal
//! status.
//!
//! Jobs are processed strictly one at a time: at most one execution is
//! in flight per runner process. A job-level failure never takes the
//! loop down; it is logged, best-effort reported as Error, and the loop
//! moves on. An independent fixed-cadence task sends liveness pings for
//! the runner identity; its failures are logged only.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{ControlPlane, Job, JobStatus, JobUpdate, RunnerIdentity};
use crate::config::Config;
use crate::executor::{ExecuteResult, Executor};
use crate::sandbox::Sandbox;
use crate::supervisor::supervise;

/// Cadence of the liveness ping, independent of the poll interval.
const ACTIVATE_INTERVAL: Duration = Duration::from_secs(30);

impl ExecuteResult {
    /// Maps an outcome to its terminal job update:
    /// success → Done + result, error → Error + reason,
    /// timeout → Timeout, cancel → CancelDone.
    fn into_update(self, job_id: &str) -> JobUpdate {
        match self {
            ExecuteResult::Success { result } => JobUpdate::done(job_id, result),
            ExecuteResult::Error { message } => JobUpdate::failed(job_id, message),
            ExecuteResult::TimeoutError => JobUpdate::status(job_id, JobStatus::Timeout),
            ExecuteResult::Cancel => JobUpdate::status(job_id, JobStatus::CancelDone),
        }
    }
}

pub struct Runner {
    api: Arc<dyn ControlPlane>,
    executor: Executor,
    identity: RunnerIdentity,
    poll_interval: Duration,
}

impl Runner {
    /// Resolves the runner's identity and builds the loop. An identity
    /// failure is the one unrecoverable startup error: without it the
    /// runner cannot claim jobs, so the process should exit.
    pub async fn start(
        api: Arc<dyn ControlPlane>,
        sandbox: Arc<dyn Sandbox>,
        config: &Config,
    ) -> Result<Self> {
        let identity = api
            .current_runner()
            .await
            .context("failed to resolve runner identity")?;

        info!("Runner id: {}", identity.id);
        info!("Runner name: {}", identity.name);
        info!("Organization: {}", identity.organization_id);

        Ok(Self {
            api,
            executor: Executor::new(sandbox, config.timeout),
            identity,
            poll_interval: config.poll_interval,
        })
    }

    pub fn identity(&self) -> &RunnerIdentity {
        &self.identity
    }

    /// Runs indefinitely: liveness pings in the background, job polling
    /// in the foreground.
    pub async fn run(&self) -> Result<()> {
        let _activation = self.spawn_activation_loop();

        info!("Waiting for jobs...");
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Independent liveness-ping loop. Failures never affect the main
    /// loop. The handle aborts the task when the runner is dropped.
    fn spawn_activation_loop(&self) -> AbortOnDrop {
        let api = self.api.clone();
        let runner_id = self.identity.id.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(ACTIVATE_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(e) = api.activate_runner(&runner_id).await {
                    warn!("failed to activate runner {runner_id}: {e:#}");
                }
            }
        });
        AbortOnDrop(handle)
    }

    /// One poll cycle: list pending jobs and process them sequentially.
    /// Listing failures are logged and retried on the next cycle.
    pub async fn poll_once(&self) {
        let jobs = match self.api.pending_jobs(&self.identity.id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("failed to list pending jobs: {e:#}");
                return;
            }
        };

        if !jobs.is_empty() {
            info!(
                "Jobs found: {}",
                jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>().join(", ")
            );
        }

        for job in jobs {
            if let Err(e) = self.process_job(&job).await {
                error!("job {} failed: {e:#}", job.id);
                // Best-effort terminal report; if even this fails there is
                // nothing left to do but log it.
                let report = JobUpdate::failed(&job.id, format!("{e:#}"));
                if let Err(e) = self.api.update_job(&report).await {
                    error!("failed to report failure of job {}: {e:#}", job.id);
                }
            }
        }
    }

    /// Drives one job Pending → Running → terminal.
    async fn process_job(&self, job: &Job) -> Result<()> {
        info!("Job {} started", job.id);
        self.api
            .update_job(&JobUpdate::status(&job.id, JobStatus::Running))
            .await?;

        // Deterministic early failure: report Error rather than relying on
        // whatever state a throw would have left behind.
        if job.code.trim().is_empty() {
            self.api
                .update_job(&JobUpdate::failed(&job.id, "no executable code"))
                .await?;
            info!("Job {} finished: error (no executable code)", job.id);
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let execution = self.executor.execute(job, cancel.clone()).await;

        // Drain logs / watch for cancellation until the relay ends, which
        // happens once the subprocess has exited and its pipes are dry.
        supervise(self.api.as_ref(), &job.id, execution.logs, &cancel).await;

        let outcome = execution.outcome.await.unwrap_or_else(|e| ExecuteResult::Error {
            message: format!("execution task failed: {e}"),
        });
        info!("Job {} finished: {}", job.id, outcome.label());

        let update = outcome.into_update(&job.id);
        debug_assert!(update.status.is_some_and(JobStatus::is_terminal));
        self.api.update_job(&update).await?;
        Ok(())
    }
}

/// Join handle that aborts its task on drop, so the activation loop
/// never outlives the runner.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
