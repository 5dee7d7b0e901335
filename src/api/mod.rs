//! Control-plane wire types and the `ControlPlane` trait.
//!
//! The runner talks to a single remote service that owns job and runner
//! state. Everything crossing that boundary is defined here; the concrete
//! HTTP implementation lives in [`client`].

pub mod client;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::ApiClient;

/// The runner's own identity, fetched once at startup and immutable after.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerIdentity {
    pub id: String,
    pub name: String,
    pub organization_id: String,
}

/// One unit of user-submitted executable code plus its trigger context.
///
/// Held only for the duration of one execution; the runner never persists
/// job state locally.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub environment_variables: Vec<EnvVar>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub http_request: Option<HttpRequest>,
    #[serde(default)]
    pub form_values: Option<Vec<FormValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trigger {
    pub name: String,
}

/// Descriptor of the HTTP request that triggered a job, forwarded verbatim
/// into the job's execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub search_params: Vec<SearchParam>,
    pub headers: HashMap<String, String>,
    pub json_body: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParam {
    pub key: String,
    pub value: String,
}

/// A submitted form field. `field_type` distinguishes date-like values so
/// the entry unit can revive them as `Date` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormValue {
    pub code: String,
    pub field_type: String,
    pub value: serde_json::Value,
}

/// Remote job status. Transitions are monotonic:
/// Pending → Running → exactly one of {Done, Error, Timeout, CancelDone}.
/// `CancelPending` is only ever *read* from the control plane, as the signal
/// that a user requested cancellation of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
    Timeout,
    CancelDone,
    CancelPending,
}

impl JobStatus {
    /// True for states a job can never leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Timeout | JobStatus::CancelDone
        )
    }
}

/// Which of the subprocess's output streams a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::Stdout => write!(f, "stdout"),
            LogSource::Stderr => write!(f, "stderr"),
        }
    }
}

/// One decoded chunk of subprocess output.
///
/// Wire shape: `{"source":"Stdout","loggedAt":"<ISO-8601>","text":"..."}`.
/// Ordering is guaranteed within a source, not across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub source: LogSource,
    pub logged_at: DateTime<Utc>,
    pub text: String,
}

impl LogRecord {
    /// Builds a record stamped with the current time.
    pub fn now(source: LogSource, text: String) -> Self {
        Self {
            source,
            logged_at: Utc::now(),
            text,
        }
    }
}

/// Partial update of one job. Absent fields are omitted from the wire body
/// and left untouched server-side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogRecord>>,
}

impl JobUpdate {
    fn empty(job_id: &str) -> Self {
        Self {
            id: job_id.to_string(),
            status: None,
            error_reason: None,
            result: None,
            logs: None,
        }
    }

    /// Status-only transition (e.g. Pending → Running).
    pub fn status(job_id: &str, status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::empty(job_id)
        }
    }

    /// Terminal success with the job's result payload.
    pub fn done(job_id: &str, result: serde_json::Value) -> Self {
        Self {
            status: Some(JobStatus::Done),
            result: Some(result),
            ..Self::empty(job_id)
        }
    }

    /// Terminal failure with a diagnostic reason.
    pub fn failed(job_id: &str, reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error_reason: Some(reason.into()),
            ..Self::empty(job_id)
        }
    }

    /// Log upload without a status change.
    pub fn logs(job_id: &str, logs: Vec<LogRecord>) -> Self {
        Self {
            logs: Some(logs),
            ..Self::empty(job_id)
        }
    }
}

/// Abstraction over the control plane.
///
/// The HTTP client implements this; tests drive the run loop and the
/// supervisor against scripted implementations instead of a live server.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetches the identity of the runner owning the configured key.
    async fn current_runner(&self) -> Result<RunnerIdentity>;

    /// Sends a liveness signal for this runner. Failure is non-fatal and
    /// handled by the caller.
    async fn activate_runner(&self, runner_id: &str) -> Result<()>;

    /// Lists jobs assigned to this runner that are still Pending.
    async fn pending_jobs(&self, runner_id: &str) -> Result<Vec<Job>>;

    /// Lightweight status read of one job (Running | CancelPending).
    async fn job_status(&self, job_id: &str) -> Result<JobStatus>;

    /// Applies a partial update and returns the job's current status,
    /// which doubles as the cancellation-detection channel.
    async fn update_job(&self, update: &JobUpdate) -> Result<JobStatus>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted `ControlPlane` used by supervisor and run-loop tests.

    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::{ControlPlane, Job, JobStatus, JobUpdate, RunnerIdentity};

    /// Records every call and answers from a mutable script.
    pub struct MockControlPlane {
        /// Every `update_job` call, in order.
        pub updates: Mutex<Vec<JobUpdate>>,
        /// Job ids passed to `job_status`, in order.
        pub status_reads: Mutex<Vec<String>>,
        /// Status returned by `update_job` and `job_status`.
        pub poll_status: Mutex<JobStatus>,
        /// Queue of `pending_jobs` answers; empty once drained.
        pub pending: Mutex<Vec<Vec<Job>>>,
        /// When set, `update_job` fails with this message.
        pub fail_updates: Mutex<Option<String>>,
        /// When set, `pending_jobs` fails with this message.
        pub fail_pending: Mutex<Option<String>>,
        /// When set, `activate_runner` fails with this message (attempts
        /// are still counted).
        pub fail_activations: Mutex<Option<String>>,
        pub activations: Mutex<u32>,
    }

    impl MockControlPlane {
        pub fn new() -> Self {
            Self {
                updates: Mutex::new(Vec::new()),
                status_reads: Mutex::new(Vec::new()),
                poll_status: Mutex::new(JobStatus::Running),
                pending: Mutex::new(Vec::new()),
                fail_updates: Mutex::new(None),
                fail_pending: Mutex::new(None),
                fail_activations: Mutex::new(None),
                activations: Mutex::new(0),
            }
        }

        pub fn set_poll_status(&self, status: JobStatus) {
            *self.poll_status.lock().unwrap() = status;
        }

        pub fn push_pending(&self, jobs: Vec<Job>) {
            self.pending.lock().unwrap().push(jobs);
        }

        pub fn recorded_statuses(&self) -> Vec<Option<JobStatus>> {
            self.updates.lock().unwrap().iter().map(|u| u.status).collect()
        }
    }

    #[async_trait]
    impl ControlPlane for MockControlPlane {
        async fn current_runner(&self) -> Result<RunnerIdentity> {
            Ok(RunnerIdentity {
                id: "runner-1".to_string(),
                name: "test runner".to_string(),
                organization_id: "org-1".to_string(),
            })
        }

        async fn activate_runner(&self, _runner_id: &str) -> Result<()> {
            *self.activations.lock().unwrap() += 1;
            if let Some(msg) = self.fail_activations.lock().unwrap().clone() {
                return Err(anyhow!(msg));
            }
            Ok(())
        }

        async fn pending_jobs(&self, _runner_id: &str) -> Result<Vec<Job>> {
            if let Some(msg) = self.fail_pending.lock().unwrap().clone() {
                return Err(anyhow!(msg));
            }
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(pending.remove(0))
            }
        }

        async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
            self.status_reads.lock().unwrap().push(job_id.to_string());
            Ok(*self.poll_status.lock().unwrap())
        }

        async fn update_job(&self, update: &JobUpdate) -> Result<JobStatus> {
            if let Some(msg) = self.fail_updates.lock().unwrap().clone() {
                return Err(anyhow!(msg));
            }
            self.updates.lock().unwrap().push(update.clone());
            Ok(*self.poll_status.lock().unwrap())
        }
    }

    /// Minimal job fixture with the given code payload.
    pub fn job_with_code(id: &str, code: &str) -> Job {
        Job {
            id: id.to_string(),
            status: Some(JobStatus::Pending),
            code: code.to_string(),
            environment_variables: Vec::new(),
            trigger: None,
            http_request: None,
            form_values: None,
        }
    }
}
