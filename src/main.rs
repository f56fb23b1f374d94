//! CLI entry point: load a scenario file, run it, download the reports.

use clap::Parser;
use lrc_runner::{ApiClient, AuthGuard, Credentials, Result, Runner, config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lrc-runner", version, about = "Run cloud load tests and collect their reports")]
struct Cli {
    /// Scenario configuration file (Taurus YAML)
    #[arg(short = 'r', long = "run", env = "LRC_TEST_CONFIG", value_name = "FILE")]
    run: PathBuf,

    /// Service URL; overrides the configuration file
    #[arg(short = 'u', long = "url", value_name = "URL")]
    url: Option<String>,

    /// API access client id
    #[arg(short = 'i', long = "client-id", env = "LRC_CLIENT_ID")]
    client_id: String,

    /// API access client secret
    #[arg(
        short = 's',
        long = "client-secret",
        env = "LRC_CLIENT_SECRET",
        hide_env_values = true
    )]
    client_secret: String,

    /// Directory report artifacts are written to
    #[arg(
        long = "artifacts-folder",
        env = "LRC_ARTIFACTS_FOLDER",
        default_value = "./results",
        value_name = "DIR"
    )]
    artifacts_folder: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<Vec<PathBuf>> {
    let raw = config::load(&cli.run)?;
    let (connection, plan) = raw.resolve(cli.url.as_deref())?;
    tracing::info!(
        "scenario \"{}\" against {} (tenant {})",
        plan.scenario,
        connection.url,
        connection.tenant
    );

    tokio::fs::create_dir_all(&cli.artifacts_folder).await?;

    let api = ApiClient::new(
        connection.url.clone(),
        connection.tenant.clone(),
        connection.proxy.as_deref(),
    )?;
    let guard = AuthGuard::new(Credentials {
        client_id: cli.client_id,
        client_secret: cli.client_secret,
    });
    guard.login(&api).await?;

    let mut runner = Runner::new(api, guard, connection, plan, cli.artifacts_folder);
    runner.execute().await
}
