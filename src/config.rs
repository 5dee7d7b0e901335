//! Runtime configuration, built from command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use url::Url;

/// Jobs polling interval when `--interval` is absent.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Per-job execution timeout when `--timeout` is absent.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Runner key, sent as the `X-RUNNER-Key` header on every request.
    pub runner_key: String,
    /// Control-plane base address. Always ends with a slash so endpoint
    /// paths join under it instead of replacing its last segment.
    pub api_url: Url,
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Deno binary used by the sandbox.
    pub deno_path: PathBuf,
}

impl Config {
    /// Parses `--runner-key`, `--api-url`, `--interval <ms>`,
    /// `--timeout <ms>` and `--deno-path` from an argument list.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut runner_key: Option<String> = None;
        let mut api_url: Option<String> = None;
        let mut interval_ms = DEFAULT_POLL_INTERVAL_MS;
        let mut timeout_ms = DEFAULT_TIMEOUT_MS;
        let mut deno_path = PathBuf::from("deno");

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| -> Result<String> {
                args.next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
            };
            match arg.as_str() {
                "--runner-key" => runner_key = Some(value("--runner-key")?),
                "--api-url" => api_url = Some(value("--api-url")?),
                "--interval" => interval_ms = value("--interval")?.parse()?,
                "--timeout" => timeout_ms = value("--timeout")?.parse()?,
                "--deno-path" => deno_path = PathBuf::from(value("--deno-path")?),
                other => bail!("unknown argument: {other}"),
            }
        }

        let Some(runner_key) = runner_key else {
            bail!("--runner-key is required");
        };
        let Some(api_url) = api_url else {
            bail!("--api-url is required");
        };

        Ok(Self {
            runner_key,
            api_url: parse_base_url(&api_url)?,
            poll_interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            deno_path,
        })
    }
}

/// Parses the base URL and guarantees a trailing slash, so
/// `Url::join("runner-jobs")` lands under the base path rather than
/// replacing its last segment.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}
