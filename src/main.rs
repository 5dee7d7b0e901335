mod api;
mod config;
mod executor;
mod runner;
mod sandbox;
mod supervisor;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::config::Config;
use crate::runner::Runner;
use crate::sandbox::DenoSandbox;

fn print_help() {
    println!(
        "\
runnerd v{}

A remote job-execution agent. Polls the control plane for pending jobs,
runs each one in an isolated Deno subprocess, streams its logs back and
reports a terminal status.

USAGE:
    runnerd --runner-key <KEY> --api-url <URL> [OPTIONS]

OPTIONS:
    --runner-key <KEY>    Runner key (required)
    --api-url <URL>       Control-plane API base URL (required)
    --interval <MS>       Jobs polling interval in ms [default: 30000]
    --timeout <MS>        Per-job execution timeout in ms [default: 300000]
    --deno-path <PATH>    Deno binary used for execution [default: deno]
    -h, --help            Print this help message and exit
    -V, --version         Print version and exit

ENVIRONMENT VARIABLES:
    RUST_LOG              Log level filter for tracing
                          (e.g. debug, runnerd=debug,warn)

EXAMPLES:
    runnerd --runner-key abc123 --api-url https://api.example.com/api
    RUST_LOG=debug runnerd --runner-key abc123 --api-url http://localhost:8080",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("runnerd v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("runnerd=info")),
        )
        .init();

    let config = Config::from_args(std::env::args().skip(1))?;

    info!("runnerd v{}", env!("CARGO_PKG_VERSION"));
    info!("Control plane: {}", config.api_url);
    info!(
        "Poll interval: {}ms, execution timeout: {}ms",
        config.poll_interval.as_millis(),
        config.timeout.as_millis()
    );

    let api = Arc::new(ApiClient::new(
        config.api_url.clone(),
        config.runner_key.clone(),
    ));
    let sandbox = Arc::new(DenoSandbox::new(config.deno_path.clone()));

    // Identity resolution is the one unrecoverable startup failure.
    let runner = Runner::start(api, sandbox, &config).await?;
    info!(
        "Runner console: {}",
        config
            .api_url
            .join(&format!(
                "/o/{}/runners/{}",
                runner.identity().organization_id,
                runner.identity().id
            ))
            .map(|u| u.to_string())
            .unwrap_or_default()
    );

    tokio::select! {
        result = runner.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
            Ok(())
        }
    }
}
