//! Ephemeral per-execution workspace.
//!
//! Each execution owns a temp directory holding the job's code
//! (`main.ts`), a generated entry unit (`entry.ts`), the structured
//! execution context (`context.json`) and — after a successful run —
//! the serialized result (`result.json`). The directory is removed
//! recursively when the [`Workspace`] is dropped, which covers every
//! exit path including setup failures before the subprocess spawns.
//!
//! All I/O here uses `tokio::fs` to avoid blocking the async runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::TempDir;

use crate::api::{FormValue, HttpRequest, Job};

pub const MAIN_FILE: &str = "main.ts";
pub const ENTRY_FILE: &str = "entry.ts";
pub const CONTEXT_FILE: &str = "context.json";
pub const RESULT_FILE: &str = "result.json";

/// The entry unit. A constant template: every job-specific value travels
/// through `context.json`, so no user-controlled text is ever spliced
/// into generated source. Date-typed form fields are revived as `Date`
/// objects, the HTTP trigger request as `URLSearchParams` / `Headers`.
const ENTRY_SOURCE: &str = r#"import { main } from "./main.ts";

const context = JSON.parse(await Deno.readTextFile("./context.json"));

function reviveTrigger(raw) {
  if (raw === null || raw === undefined) {
    return undefined;
  }
  const trigger = { name: raw.name };
  if (raw.request) {
    trigger.request = {
      searchParams: new URLSearchParams(
        raw.request.searchParams.map((p) => [p.key, p.value]),
      ),
      headers: new Headers(raw.request.headers),
      jsonBody: raw.request.jsonBody,
    };
  }
  if (raw.formValues) {
    trigger.formValues = Object.fromEntries(raw.formValues.map((f) => [
      f.code,
      f.fieldType === "Date" || f.fieldType === "DateTime"
        ? new Date(f.value)
        : f.value,
    ]));
  }
  return trigger;
}

const result = await main({
  env: context.env,
  trigger: reviveTrigger(context.trigger),
});

await Deno.writeTextFile("./result.json", JSON.stringify(result));
"#;

/// Structured execution context handed to the entry unit via
/// `context.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub env: BTreeMap<String, String>,
    pub trigger: Option<TriggerContext>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<HttpRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_values: Option<Vec<FormValue>>,
}

impl ExecutionContext {
    /// Builds the context a job's entry function will receive. With no
    /// trigger name the trigger is absent entirely, matching what job
    /// code expects for manually started runs.
    pub fn from_job(job: &Job) -> Self {
        let env = job
            .environment_variables
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect();

        let trigger = job.trigger.as_ref().map(|t| TriggerContext {
            name: t.name.clone(),
            request: job.http_request.clone(),
            form_values: job.form_values.clone(),
        });

        Self { env, trigger }
    }
}

/// Temp directory exclusively owned by one execution.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Materializes the workspace: job code, context file, entry unit.
    pub async fn create(code: &str, context: &ExecutionContext) -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create workspace directory")?;

        let context_json =
            serde_json::to_vec(context).context("failed to serialize execution context")?;

        tokio::fs::write(dir.path().join(MAIN_FILE), code)
            .await
            .context("failed to write job code")?;
        tokio::fs::write(dir.path().join(CONTEXT_FILE), context_json)
            .await
            .context("failed to write execution context")?;
        tokio::fs::write(dir.path().join(ENTRY_FILE), ENTRY_SOURCE)
            .await
            .context("failed to write entry unit")?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.path().join(RESULT_FILE)
    }

    /// Reads and parses the result file written by the entry unit.
    pub async fn read_result(&self) -> Result<serde_json::Value> {
        let text = tokio::fs::read_to_string(self.result_path())
            .await
            .context("failed to read result file")?;
        serde_json::from_str(&text).context("failed to parse result file")
    }
}
