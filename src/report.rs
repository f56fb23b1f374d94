//! Report generation and retrieval pipeline
//!
//! For each requested report type: ask the service to generate the report,
//! poll its readiness, then stream the finished artifact to disk. Report
//! generation is guarded by its own watchdog, armed on the first
//! "In progress" observation; the download has a separate absolute deadline
//! (see [`crate::download`]).
//!
//! A run for which the service declines to produce a given report type is a
//! soft failure: it is logged and skipped, the run itself still succeeds.

use crate::client::LoadTestApi;
use crate::download::download_to_file;
use crate::error::{Error, Result};
use crate::types::{ReportId, ReportType, RunId};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Default wait between report readiness checks
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(15);
/// Default report generation watchdog limit
pub const DEFAULT_GENERATION_LIMIT: Duration = Duration::from_secs(600);
/// Default absolute download deadline
pub const DEFAULT_DOWNLOAD_LIMIT: Duration = Duration::from_secs(600);

/// Tunable intervals and limits for [`fetch_report`]
#[derive(Clone, Debug)]
pub struct ReportSettings {
    /// Wait between readiness checks
    pub poll_interval: Duration,
    /// Watchdog limit on report generation
    pub generation_limit: Duration,
    /// Absolute deadline on the artifact download
    pub download_limit: Duration,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_REPORT_INTERVAL,
            generation_limit: DEFAULT_GENERATION_LIMIT,
            download_limit: DEFAULT_DOWNLOAD_LIMIT,
        }
    }
}

/// Generate, await and download one report for a finished run.
///
/// Returns the path of the downloaded artifact, or `None` when the service
/// cannot produce this report type for the run (soft skip).
pub async fn fetch_report<A: LoadTestApi + ?Sized>(
    api: &A,
    run_id: RunId,
    report_type: ReportType,
    destination: &Path,
    settings: &ReportSettings,
) -> Result<Option<PathBuf>> {
    tracing::info!("preparing report ({report_type}) ...");

    let Some(report_id) = api.create_report(run_id, report_type).await? else {
        tracing::info!("report ({report_type}) is not available");
        return Ok(None);
    };

    let mut generation_deadline: Option<Instant> = None;
    loop {
        if let Some(deadline) = generation_deadline
            && deadline <= Instant::now() + settings.poll_interval
        {
            tokio::time::sleep_until(deadline).await;
            return Err(Error::ReportTimeout {
                report_id: report_id.0,
                limit: settings.generation_limit,
            });
        }
        tokio::time::sleep(settings.poll_interval).await;

        let status = api.report_status(report_id).await?;
        if status.is_in_progress() {
            // Armed once, on the first pending observation
            if generation_deadline.is_none() {
                generation_deadline = Some(Instant::now() + settings.generation_limit);
            }
            tracing::info!("report ({report_id}) is not yet ready");
            continue;
        }

        tracing::info!("report is ready, going to download it");
        let stream = api.open_report_stream(report_id).await?;
        download_to_file(stream, destination, settings.download_limit).await?;
        return Ok(Some(destination.to_path_buf()));
    }
}
