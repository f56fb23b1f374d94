//! Core types for lrc-runner
//!
//! Wire types mirror the JSON shapes the load-testing service produces
//! (camelCase field names), so they deserialize straight from responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a test run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a load test
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(pub i64);

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TestId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a generated run report
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub i64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ReportId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Fine-grained run phase reported by the service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailedStatus {
    /// Load generators are being provisioned
    Initializing,
    /// Virtual users are actively running
    Running,
    /// The run is winding down
    Stopping,
    /// Finished, SLA criteria not met
    Failed,
    /// Finished, SLA criteria met
    Passed,
    /// Stopped by a user
    Stopped,
    /// Service-side failure, no results were produced
    SystemError,
    /// Halted by the service, no results were produced
    Halted,
    /// Aborted before producing results
    Aborted,
}

impl DetailedStatus {
    /// States that terminate the run without any results; polling fails
    /// immediately when one of these is observed.
    pub fn is_no_result(&self) -> bool {
        matches!(
            self,
            DetailedStatus::SystemError | DetailedStatus::Halted | DetailedStatus::Aborted
        )
    }

    /// Transitional states known to sometimes hang; only these are guarded
    /// by the stuck-state watchdog.
    pub fn needs_watchdog(&self) -> bool {
        matches!(self, DetailedStatus::Initializing | DetailedStatus::Stopping)
    }

    /// Terminal states for which the service produces a downloadable report.
    pub fn has_report(&self) -> bool {
        matches!(
            self,
            DetailedStatus::Failed | DetailedStatus::Passed | DetailedStatus::Stopped
        )
    }
}

impl fmt::Display for DetailedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetailedStatus::Initializing => "INITIALIZING",
            DetailedStatus::Running => "RUNNING",
            DetailedStatus::Stopping => "STOPPING",
            DetailedStatus::Failed => "FAILED",
            DetailedStatus::Passed => "PASSED",
            DetailedStatus::Stopped => "STOPPED",
            DetailedStatus::SystemError => "SYSTEM_ERROR",
            DetailedStatus::Halted => "HALTED",
            DetailedStatus::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Snapshot of a run's state, produced by each status fetch
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    /// Coarse phase: "in-progress" while the run is live, anything else is terminal
    pub status: String,
    /// Fine-grained run phase
    pub detailed_status: DetailedStatus,
    /// Currently running virtual users
    #[serde(default)]
    pub running_vusers: Option<i64>,
    /// Passed transactions so far
    #[serde(default)]
    pub passed_trx: Option<i64>,
    /// Failed transactions so far
    #[serde(default)]
    pub failed_trx: Option<i64>,
    /// Transactions per second (the service spells this field both ways)
    #[serde(default, alias = "TrxPerSec")]
    pub trx_per_sec: Option<f64>,
    /// Hits per second
    #[serde(default)]
    pub hits_per_sec: Option<f64>,
}

impl RunStatus {
    /// Whether the run is still in its in-progress phase
    pub fn is_in_progress(&self) -> bool {
        self.status == "in-progress"
    }

    /// One-line statistics summary for progress logging
    pub fn statistics(&self) -> String {
        format!(
            "Vusers: {}, Passed TX: {}, Failed TX: {}, TPS: {}, Hits/s: {}",
            display_or_na(self.running_vusers),
            display_or_na(self.passed_trx),
            display_or_na(self.failed_trx),
            display_or_na(self.trx_per_sec),
            display_or_na(self.hits_per_sec),
        )
    }
}

fn display_or_na<T: fmt::Display>(value: Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "N/A".to_string(),
    }
}

/// Full run record; only the termination flag matters to the poller
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Whether the service has fully settled the run's backing record
    #[serde(default)]
    pub is_terminated: bool,
}

/// Response to a report-creation request. A missing `report_id` means the
/// service cannot produce this report type for the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTicket {
    /// Identifier of the report being generated, when available
    #[serde(default)]
    pub report_id: Option<i64>,
}

/// Report readiness, re-fetched each poll
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReportStatus {
    /// "In progress" while generating; anything else means ready
    #[serde(default)]
    pub message: Option<String>,
}

impl ReportStatus {
    /// Whether the report is still being generated
    pub fn is_in_progress(&self) -> bool {
        self.message.as_deref() == Some("In progress")
    }
}

/// Report artifact formats the service can generate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    /// PDF summary report
    Pdf,
    /// Word document report
    Docx,
    /// Raw results as CSV
    Csv,
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportType::Pdf => "pdf",
            ReportType::Docx => "docx",
            ReportType::Csv => "csv",
        };
        f.write_str(name)
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(ReportType::Pdf),
            "docx" => Ok(ReportType::Docx),
            "csv" => Ok(ReportType::Csv),
            other => Err(format!("invalid reportType: {other}")),
        }
    }
}

/// API access keys used to obtain a bearer token
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credentials {
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

/// Successful authentication response
#[derive(Clone, Debug, Deserialize)]
pub struct AuthToken {
    /// Short-lived bearer token
    pub token: String,
}

/// A load test as the service describes it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadTest {
    /// Test identifier
    pub id: TestId,
    /// Test name
    #[serde(default)]
    pub name: String,
}

/// Response to a run-test request
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTicket {
    /// Identifier of the started run
    pub run_id: RunId,
}

/// An uploaded script
#[derive(Clone, Debug, Deserialize)]
pub struct Script {
    /// Script identifier
    pub id: i64,
}

/// A vuser distribution location attached to a test
#[derive(Clone, Debug, Deserialize)]
pub struct Location {
    /// Location identifier
    pub id: i64,
    /// Location name, matched against the configuration
    pub name: String,
}

/// An on-premise load generator registered in the project
#[derive(Clone, Debug, Deserialize)]
pub struct LoadGenerator {
    /// Load generator identifier
    pub id: i64,
    /// Load generator key, matched against the configuration
    #[serde(default)]
    pub key: String,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_parses_service_json() {
        let json = r#"{
            "status": "in-progress",
            "detailedStatus": "RUNNING",
            "runningVusers": 50,
            "passedTrx": 1200,
            "failedTrx": 3,
            "trxPerSec": 14.5,
            "hitsPerSec": 220.0
        }"#;
        let status: RunStatus = serde_json::from_str(json).unwrap();
        assert!(status.is_in_progress());
        assert_eq!(status.detailed_status, DetailedStatus::Running);
        assert_eq!(status.running_vusers, Some(50));
        assert_eq!(status.trx_per_sec, Some(14.5));
    }

    #[test]
    fn run_status_accepts_legacy_tps_spelling() {
        let json = r#"{"status": "in-progress", "detailedStatus": "RUNNING", "TrxPerSec": 7.0}"#;
        let status: RunStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.trx_per_sec, Some(7.0));
    }

    #[test]
    fn statistics_substitutes_na_for_missing_rates() {
        let status = RunStatus {
            status: "in-progress".into(),
            detailed_status: DetailedStatus::Running,
            running_vusers: Some(10),
            passed_trx: Some(100),
            failed_trx: Some(0),
            trx_per_sec: None,
            hits_per_sec: None,
        };
        let line = status.statistics();
        assert_eq!(
            line,
            "Vusers: 10, Passed TX: 100, Failed TX: 0, TPS: N/A, Hits/s: N/A"
        );
    }

    #[test]
    fn detailed_status_classification_sets_are_disjoint() {
        let all = [
            DetailedStatus::Initializing,
            DetailedStatus::Running,
            DetailedStatus::Stopping,
            DetailedStatus::Failed,
            DetailedStatus::Passed,
            DetailedStatus::Stopped,
            DetailedStatus::SystemError,
            DetailedStatus::Halted,
            DetailedStatus::Aborted,
        ];
        for status in all {
            let memberships = [
                status.is_no_result(),
                status.needs_watchdog(),
                status.has_report(),
            ];
            assert!(
                memberships.iter().filter(|m| **m).count() <= 1,
                "{status} belongs to more than one classification set"
            );
        }
        assert!(DetailedStatus::SystemError.is_no_result());
        assert!(DetailedStatus::Initializing.needs_watchdog());
        assert!(DetailedStatus::Stopping.needs_watchdog());
        assert!(DetailedStatus::Passed.has_report());
        assert!(!DetailedStatus::Running.needs_watchdog());
    }

    #[test]
    fn detailed_status_round_trips_screaming_snake_case() {
        let parsed: DetailedStatus = serde_json::from_str("\"SYSTEM_ERROR\"").unwrap();
        assert_eq!(parsed, DetailedStatus::SystemError);
        assert_eq!(
            serde_json::to_string(&DetailedStatus::SystemError).unwrap(),
            "\"SYSTEM_ERROR\""
        );
        assert_eq!(parsed.to_string(), "SYSTEM_ERROR");
    }

    #[test]
    fn report_status_in_progress_detection() {
        let pending = ReportStatus {
            message: Some("In progress".into()),
        };
        assert!(pending.is_in_progress());

        let ready = ReportStatus {
            message: Some("done".into()),
        };
        assert!(!ready.is_in_progress());

        let empty = ReportStatus { message: None };
        assert!(!empty.is_in_progress());
    }

    #[test]
    fn report_type_parses_and_rejects() {
        assert_eq!("pdf".parse::<ReportType>().unwrap(), ReportType::Pdf);
        assert_eq!("docx".parse::<ReportType>().unwrap(), ReportType::Docx);
        assert_eq!("csv".parse::<ReportType>().unwrap(), ReportType::Csv);
        assert!("xlsx".parse::<ReportType>().is_err());
    }

    #[test]
    fn report_ticket_with_missing_id_parses_to_none() {
        let ticket: ReportTicket = serde_json::from_str("{}").unwrap();
        assert!(ticket.report_id.is_none());

        let ticket: ReportTicket = serde_json::from_str(r#"{"reportId": 8}"#).unwrap();
        assert_eq!(ticket.report_id, Some(8));
    }
}
