//! Run status polling state machine
//!
//! Converts the fire-and-forget "run started" signal into a reliable "run
//! finished" outcome:
//!
//! - adaptive interval: polls tighten to a minimal wait while the run is
//!   actively RUNNING and relax back to the base interval otherwise
//! - stuck-state watchdog: INITIALIZING and STOPPING are known to sometimes
//!   hang on the service side; a single deadline is armed the first time one
//!   of them repeats and disarmed as soon as the run moves on
//! - no-result short circuit: SYSTEM_ERROR/HALTED/ABORTED fail immediately
//! - termination confirmation: the service can report "finished" before its
//!   backing record settles, so the poller re-reads the full run record a
//!   bounded number of times before declaring the run report-ready
//!
//! Status polls for a run are strictly sequential; the next fetch is only
//! issued after the previous response was processed and the wait elapsed.

use crate::client::LoadTestApi;
use crate::error::{Error, Result};
use crate::types::{DetailedStatus, RunId, RunStatus};
use std::time::Duration;
use tokio::time::Instant;

/// Default wait between status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);
/// Default near-continuous wait while the run is actively RUNNING
pub const DEFAULT_ACTIVE_INTERVAL: Duration = Duration::from_millis(10);
/// Default stuck-state watchdog limit
pub const DEFAULT_STUCK_LIMIT: Duration = Duration::from_secs(600);
/// Default number of termination-confirmation retries after the first check
pub const DEFAULT_CONFIRM_RETRIES: u32 = 3;

/// Tunable intervals and limits for [`poll_until_done`]
#[derive(Clone, Debug)]
pub struct PollSettings {
    /// Wait between polls while the run is not actively RUNNING
    pub base_interval: Duration,
    /// Wait between polls while the run is actively RUNNING
    pub active_interval: Duration,
    /// Watchdog limit for INITIALIZING/STOPPING
    pub stuck_limit: Duration,
    /// Termination-confirmation retries after the initial check
    pub confirm_retries: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_POLL_INTERVAL,
            active_interval: DEFAULT_ACTIVE_INTERVAL,
            stuck_limit: DEFAULT_STUCK_LIMIT,
            confirm_retries: DEFAULT_CONFIRM_RETRIES,
        }
    }
}

/// Poll a run until it leaves its in-progress phase and its termination is
/// confirmed, returning the final status snapshot.
pub async fn poll_until_done<A: LoadTestApi + ?Sized>(
    api: &A,
    run_id: RunId,
    settings: &PollSettings,
) -> Result<RunStatus> {
    let mut interval = settings.base_interval;
    let mut last_status: Option<DetailedStatus> = None;
    let mut same_status_count: u32 = 0;
    let mut watchdog: Option<(Instant, DetailedStatus)> = None;

    let final_status = loop {
        wait_for_next_poll(interval, watchdog, settings.stuck_limit).await?;

        let current = api.run_status(run_id).await?;
        interval = if current.detailed_status == DetailedStatus::Running {
            settings.active_interval
        } else {
            settings.base_interval
        };

        if current.detailed_status == DetailedStatus::Running {
            tracing::info!("RUNNING - {}", current.statistics());
        } else if current.detailed_status.is_no_result() {
            return Err(Error::RunFailed(current.detailed_status));
        } else {
            tracing::info!("{}", current.detailed_status);
        }

        if last_status == Some(current.detailed_status) {
            same_status_count += 1;
        } else {
            same_status_count = 0;
        }
        last_status = Some(current.detailed_status);

        if !current.is_in_progress() {
            break current;
        }

        if current.detailed_status.needs_watchdog() {
            // Armed once per stretch of the same state, on its first repeat
            if same_status_count == 1 {
                watchdog = Some((
                    Instant::now() + settings.stuck_limit,
                    current.detailed_status,
                ));
            }
        } else {
            watchdog = None;
        }
    };

    confirm_termination(api, run_id, &final_status, settings).await?;
    Ok(final_status)
}

/// Sleep until the next poll is due, failing instead if the stuck-state
/// watchdog would fire first. Failing here guarantees no further request is
/// issued after the watchdog cancels the poll loop.
async fn wait_for_next_poll(
    interval: Duration,
    watchdog: Option<(Instant, DetailedStatus)>,
    limit: Duration,
) -> Result<()> {
    if let Some((deadline, status)) = watchdog
        && deadline <= Instant::now() + interval
    {
        tokio::time::sleep_until(deadline).await;
        return Err(Error::StuckState { status, limit });
    }
    tokio::time::sleep(interval).await;
    Ok(())
}

/// The service can answer "finished" before the run record is settled.
/// Re-read the record a bounded number of times; the run only counts as
/// terminated when the flag is set AND the final status is one that carries
/// a report.
async fn confirm_termination<A: LoadTestApi + ?Sized>(
    api: &A,
    run_id: RunId,
    final_status: &RunStatus,
    settings: &PollSettings,
) -> Result<()> {
    let mut attempts = 0;
    loop {
        let record = api.run_record(run_id).await?;
        attempts += 1;

        if final_status.detailed_status.has_report() && record.is_terminated {
            return Ok(());
        }
        if attempts > settings.confirm_retries {
            return Err(Error::NoReport);
        }
        tokio::time::sleep(settings.base_interval).await;
    }
}
