//! # lrc-runner
//!
//! Client library and CLI for driving load tests on a LoadRunner-style
//! cloud service: start a run (creating the test from scripts first if
//! needed), poll it to completion, and collect its report artifacts.
//!
//! The monitoring core is built around three guarantees:
//! - **Bounded waiting** - transitional run states, report generation and
//!   downloads are all guarded by watchdog deadlines
//! - **Bounded re-auth** - expired bearer tokens are refreshed and the
//!   interrupted sequence replayed, up to a consecutive-failure budget
//! - **Confirmed termination** - a run only counts as finished once the
//!   service's run record settles, so reports are requested exactly when
//!   they can exist
//!
//! ## Quick Start
//!
//! ```no_run
//! use lrc_runner::{ApiClient, AuthGuard, Credentials, Runner, config};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let raw = config::load(Path::new("scenario.yml"))?;
//!     let (connection, plan) = raw.resolve(None)?;
//!
//!     let api = ApiClient::new(
//!         connection.url.clone(),
//!         connection.tenant.clone(),
//!         connection.proxy.as_deref(),
//!     )?;
//!     let guard = AuthGuard::new(Credentials {
//!         client_id: "id".into(),
//!         client_secret: "secret".into(),
//!     });
//!     guard.login(&api).await?;
//!
//!     let mut runner = Runner::new(api, guard, connection, plan, "./results".into());
//!     let artifacts = runner.execute().await?;
//!     println!("downloaded: {artifacts:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Token lifecycle and transparent re-authentication
pub mod auth;
/// HTTP client for the service REST API
pub mod client;
/// Taurus-style YAML configuration
pub mod config;
/// Streaming artifact download with an absolute deadline
pub mod download;
/// Error types
pub mod error;
/// Run status polling state machine
pub mod poller;
/// Report generation and retrieval pipeline
pub mod report;
/// Run orchestrator
pub mod runner;
/// Core wire types
pub mod types;

// Re-export commonly used types
pub use auth::{AuthGuard, MAX_AUTH_RETRIES};
pub use client::{ApiClient, ByteStream, LoadTestApi};
pub use config::{Connection, TaurusConfig, TestPlan};
pub use error::{Error, Result};
pub use poller::PollSettings;
pub use report::ReportSettings;
pub use runner::Runner;
pub use types::{
    Credentials, DetailedStatus, ReportId, ReportType, RunId, RunStatus, TestId,
};
