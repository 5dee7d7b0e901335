//! HTTP implementation of [`ControlPlane`].
//!
//! Thin `reqwest` wrapper: every request carries the runner key in the
//! `X-RUNNER-Key` header, non-2xx responses become errors carrying the
//! status and body text. No retry policy here — the run loop's next cycle
//! is the retry.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use url::Url;

use super::{ControlPlane, Job, JobStatus, JobUpdate, RunnerIdentity};

/// Per-request timeout. Generous because log uploads can carry the whole
/// accumulated buffer of a chatty job.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const RUNNER_KEY_HEADER: &str = "X-RUNNER-Key";

/// Control-plane HTTP client, authenticated via a runner key.
pub struct ApiClient {
    client: Client,
    base_url: Url,
    runner_key: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct JobPage {
    data: Vec<Job>,
}

impl ApiClient {
    pub fn new(base_url: Url, runner_key: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url,
            runner_key,
        }
    }

    /// Joins a relative endpoint path onto the base URL.
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| anyhow!("invalid endpoint {path}: {e}"))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(RUNNER_KEY_HEADER, &self.runner_key)
    }

    /// Sends a request and turns non-2xx responses into errors carrying
    /// the status and body text.
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self.authed(builder).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("control plane returned {status}: {body}");
        }
        Ok(response)
    }
}

#[async_trait]
impl ControlPlane for ApiClient {
    async fn current_runner(&self) -> Result<RunnerIdentity> {
        let url = self.endpoint("runners/current")?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn activate_runner(&self, runner_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("runners/{runner_id}/activate"))?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }

    async fn pending_jobs(&self, runner_id: &str) -> Result<Vec<Job>> {
        let url = self.endpoint("runner-jobs")?;
        let filter = serde_json::json!({
            "runnerId": {"eq": runner_id},
            "status": {"eq": "Pending"},
        });
        let request = self
            .client
            .get(url)
            .query(&[("filter", filter.to_string())]);
        let response = self.send(request).await?;
        let page: JobPage = response.json().await?;
        Ok(page.data)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let url = self.endpoint(&format!("runner-jobs/{job_id}"))?;
        let response = self.send(self.client.get(url)).await?;
        let status: StatusResponse = response.json().await?;
        Ok(status.status)
    }

    async fn update_job(&self, update: &JobUpdate) -> Result<JobStatus> {
        let url = self.endpoint(&format!("runner-jobs/{}", update.id))?;
        let response = self.send(self.client.put(url).json(update)).await?;
        let status: StatusResponse = response.json().await?;
        Ok(status.status)
    }
}
