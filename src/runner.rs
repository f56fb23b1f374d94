//! Run orchestrator
//!
//! Drives one scenario end to end: run an existing test (or create one from
//! scripts first), then monitor the run to completion and collect its
//! reports. The monitoring sequence runs under the auth guard, so an expired
//! token anywhere inside it re-authenticates and replays the sequence.

use crate::auth::AuthGuard;
use crate::client::{ApiClient, LoadTestApi};
use crate::config::{self, Connection, ScriptEntry, TestPlan};
use crate::error::{Error, Result};
use crate::poller::{self, PollSettings};
use crate::report::{self, ReportSettings};
use crate::types::{ReportType, RunId, TestId};
use std::path::{Path, PathBuf};

/// Orchestrates one scenario against the service.
pub struct Runner {
    api: ApiClient,
    guard: AuthGuard,
    connection: Connection,
    plan: TestPlan,
    artifacts: PathBuf,
    poll: PollSettings,
    report: ReportSettings,
}

impl Runner {
    /// Create a runner for one validated scenario.
    pub fn new(
        api: ApiClient,
        guard: AuthGuard,
        connection: Connection,
        plan: TestPlan,
        artifacts: PathBuf,
    ) -> Self {
        Self {
            api,
            guard,
            connection,
            plan,
            artifacts,
            poll: PollSettings::default(),
            report: ReportSettings::default(),
        }
    }

    /// Run the scenario to completion. Returns the paths of the downloaded
    /// report artifacts (empty when the scenario detaches, declines the run
    /// or declines the download).
    pub async fn execute(&mut self) -> Result<Vec<PathBuf>> {
        let test_id = match self.plan.test_id {
            Some(test_id) => {
                let test = self.api.get_test(self.plan.project_id, test_id).await?;
                tracing::info!("running test \"{}\" (id {})", test.name, test.id);
                test.id
            }
            None => self.create_test().await?,
        };

        if self.plan.test_id.is_none() && !self.plan.run_test {
            tracing::info!("test {test_id} created, not running it");
            return Ok(Vec::new());
        }

        let ticket = self.api.run_test(self.plan.project_id, test_id).await?;
        let run_id = ticket.run_id;
        tracing::info!("run {run_id} started");
        tracing::info!(
            "dashboard: {}",
            config::dashboard_url(&self.connection.url, &self.connection.tenant, run_id)
        );

        if self.plan.detach {
            tracing::info!("detaching, run {run_id} continues on the service");
            return Ok(Vec::new());
        }

        let api = &self.api;
        let plan = &self.plan;
        let artifacts = self.artifacts.as_path();
        let poll = &self.poll;
        let report = &self.report;
        self.guard
            .with_retry(api, || {
                collect_run_results(api, run_id, plan, artifacts, poll, report)
            })
            .await
    }

    /// Create a new test from the scenario: test record, settings, scripts,
    /// distributions and load generators.
    async fn create_test(&self) -> Result<TestId> {
        let project_id = self.plan.project_id;
        let name = self.plan.name.as_deref().unwrap_or_default();

        let test = self.api.create_test(project_id, name).await?;
        tracing::info!("created test \"{}\" (id {})", test.name, test.id);

        if let Some(overrides) = &self.plan.settings {
            let mut settings = self.api.get_test_settings(project_id, test.id).await?;
            deep_merge(&mut settings, overrides);
            self.api
                .update_test_settings(project_id, test.id, &settings)
                .await?;
        }

        for entry in &self.plan.scripts {
            self.attach_script(test.id, entry).await?;
        }

        let has_cloud_script = self.plan.scripts.iter().any(|s| !s.is_on_premise());
        if has_cloud_script && !self.plan.distributions.is_empty() {
            self.apply_distributions(test.id).await?;
        }

        let has_on_premise_script = self.plan.scripts.iter().any(ScriptEntry::is_on_premise);
        if has_on_premise_script && !self.plan.load_generators.is_empty() {
            self.assign_load_generators(test.id).await?;
        }

        Ok(test.id)
    }

    /// Upload one script, attach it to the test and apply the scenario's
    /// per-script settings on top of the attached defaults.
    async fn attach_script(&self, test_id: TestId, entry: &ScriptEntry) -> Result<()> {
        let project_id = self.plan.project_id;
        let script = self.api.upload_script(project_id, &entry.path).await?;
        tracing::info!("uploaded script {} (id {})", entry.path.display(), script.id);

        let attached = self
            .api
            .add_test_script(project_id, test_id, script.id)
            .await?;

        let mut merged = attached;
        // The update endpoint keys scripts by loadTestScriptId, which the
        // attach response only reports as id
        if let Some(object) = merged.as_object_mut()
            && let Some(id) = object.get("id").cloned()
        {
            object.insert("loadTestScriptId".to_string(), id);
        }
        let overrides = serde_json::to_value(entry)?;
        deep_merge(&mut merged, &overrides);
        self.api
            .update_test_script(project_id, test_id, &merged)
            .await?;
        Ok(())
    }

    /// Set the vuser percentage of each configured distribution location.
    async fn apply_distributions(&self, test_id: TestId) -> Result<()> {
        let project_id = self.plan.project_id;
        let locations = self.api.distribution_locations(project_id, test_id).await?;
        for distribution in &self.plan.distributions {
            let location = locations
                .iter()
                .find(|l| l.name == distribution.location_name)
                .ok_or_else(|| {
                    Error::api(format!(
                        "location \"{}\" does not exist",
                        distribution.location_name
                    ))
                })?;
            self.api
                .update_distribution_location(
                    project_id,
                    test_id,
                    location.id,
                    distribution.vusers_percent,
                )
                .await?;
        }
        Ok(())
    }

    /// Assign each configured on-premise load generator, matched by key.
    async fn assign_load_generators(&self, test_id: TestId) -> Result<()> {
        let project_id = self.plan.project_id;
        let available = self.api.load_generators(project_id).await?;
        for key in &self.plan.load_generators {
            let generator = available.iter().find(|g| &g.key == key).ok_or_else(|| {
                Error::api(format!("load generator \"{key}\" does not exist"))
            })?;
            self.api
                .assign_load_generator(project_id, test_id, generator.id)
                .await?;
        }
        Ok(())
    }
}

/// Monitor a started run to completion and download its reports.
///
/// This is the auth guard's retry unit: kept as one sequence so a token
/// expiry at any point replays from the (idempotent) status poll.
pub async fn collect_run_results<A: LoadTestApi + ?Sized>(
    api: &A,
    run_id: RunId,
    plan: &TestPlan,
    artifacts: &Path,
    poll: &PollSettings,
    report: &ReportSettings,
) -> Result<Vec<PathBuf>> {
    let final_status = poller::poll_until_done(api, run_id, poll).await?;
    tracing::info!("run {run_id} finished: {}", final_status.detailed_status);

    if !plan.download_report {
        return Ok(Vec::new());
    }

    let mut downloaded = Vec::new();
    for report_type in &plan.report_types {
        let destination = report_destination(artifacts, run_id, *report_type);
        if let Some(path) =
            report::fetch_report(api, run_id, *report_type, &destination, report).await?
        {
            downloaded.push(path);
        }
    }
    Ok(downloaded)
}

/// Artifact path for one report of a run, `results_run_<id>.<type>`.
pub fn report_destination(artifacts: &Path, run_id: RunId, report_type: ReportType) -> PathBuf {
    artifacts.join(format!("results_run_{run_id}.{report_type}"))
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// scalars, arrays and nulls in `overlay` replace the value in `base`.
pub fn deep_merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                deep_merge(
                    base_map.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ByteStream;
    use crate::types::{
        Credentials, DetailedStatus, ReportId, ReportStatus, RunRecord, RunStatus,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn report_destination_follows_the_results_naming() {
        let path = report_destination(Path::new("/tmp/results"), RunId(42), ReportType::Docx);
        assert_eq!(path, PathBuf::from("/tmp/results/results_run_42.docx"));
    }

    #[test]
    fn deep_merge_merges_nested_objects_and_replaces_scalars() {
        let mut base = json!({
            "name": "default",
            "duration": 300,
            "emails": ["a@example.com"],
            "schedule": { "rampUp": 60, "tearDown": 30 }
        });
        deep_merge(
            &mut base,
            &json!({
                "duration": 900,
                "emails": ["b@example.com"],
                "schedule": { "rampUp": 120 },
                "isNew": true
            }),
        );
        assert_eq!(
            base,
            json!({
                "name": "default",
                "duration": 900,
                "emails": ["b@example.com"],
                "schedule": { "rampUp": 120, "tearDown": 30 },
                "isNew": true
            })
        );
    }

    #[test]
    fn deep_merge_inserts_objects_missing_from_the_base() {
        let mut base = json!({});
        deep_merge(&mut base, &json!({ "a": { "b": 1 } }));
        assert_eq!(base, json!({ "a": { "b": 1 } }));
    }

    /// Fake API for the monitoring sequence: scripted statuses, settled run
    /// record, reports that are ready on the first check.
    struct ScriptedApi {
        statuses: Mutex<VecDeque<RunStatus>>,
        report_creations: AtomicU32,
        downloads: AtomicU32,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<RunStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                report_creations: AtomicU32::new(0),
                downloads: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LoadTestApi for ScriptedApi {
        async fn authenticate(&self, _credentials: &Credentials) -> Result<()> {
            Ok(())
        }

        async fn run_status(&self, _run_id: RunId) -> Result<RunStatus> {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap())
            } else {
                Ok(statuses.front().cloned().expect("script must not be empty"))
            }
        }

        async fn run_record(&self, _run_id: RunId) -> Result<RunRecord> {
            Ok(RunRecord { is_terminated: true })
        }

        async fn create_report(
            &self,
            _run_id: RunId,
            _report_type: ReportType,
        ) -> Result<Option<ReportId>> {
            let n = self.report_creations.fetch_add(1, Ordering::SeqCst);
            Ok(Some(ReportId(i64::from(n) + 1)))
        }

        async fn report_status(&self, _report_id: ReportId) -> Result<ReportStatus> {
            Ok(ReportStatus { message: None })
        }

        async fn open_report_stream(&self, _report_id: ReportId) -> Result<ByteStream> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(
                b"artifact",
            ))])))
        }
    }

    fn snapshot(phase: &str, detailed: DetailedStatus) -> RunStatus {
        RunStatus {
            status: phase.into(),
            detailed_status: detailed,
            running_vusers: None,
            passed_trx: None,
            failed_trx: None,
            trx_per_sec: None,
            hits_per_sec: None,
        }
    }

    fn plan(report_types: Vec<ReportType>, download_report: bool) -> TestPlan {
        TestPlan {
            scenario: "s".into(),
            project_id: 1,
            test_id: Some(TestId(5)),
            name: None,
            scripts: Vec::new(),
            run_test: true,
            detach: false,
            download_report,
            report_types,
            settings: None,
            distributions: Vec::new(),
            load_generators: Vec::new(),
        }
    }

    fn fast_poll() -> PollSettings {
        PollSettings {
            base_interval: Duration::from_millis(2),
            active_interval: Duration::from_millis(1),
            stuck_limit: Duration::from_millis(200),
            confirm_retries: 1,
        }
    }

    fn fast_report() -> ReportSettings {
        ReportSettings {
            poll_interval: Duration::from_millis(2),
            generation_limit: Duration::from_millis(200),
            download_limit: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn finished_run_downloads_one_artifact_per_report_type() {
        let api = ScriptedApi::new(vec![
            snapshot("in-progress", DetailedStatus::Running),
            snapshot("completed", DetailedStatus::Passed),
        ]);
        let dir = tempfile::tempdir().unwrap();

        let downloaded = collect_run_results(
            &api,
            RunId(11),
            &plan(vec![ReportType::Pdf, ReportType::Csv], true),
            dir.path(),
            &fast_poll(),
            &fast_report(),
        )
        .await
        .unwrap();

        assert_eq!(
            downloaded,
            vec![
                dir.path().join("results_run_11.pdf"),
                dir.path().join("results_run_11.csv"),
            ]
        );
        assert_eq!(api.downloads.load(Ordering::SeqCst), 2);
        for path in &downloaded {
            assert_eq!(std::fs::read(path).unwrap(), b"artifact");
        }
    }

    #[tokio::test]
    async fn download_report_false_skips_the_report_pipeline() {
        let api = ScriptedApi::new(vec![snapshot("completed", DetailedStatus::Passed)]);
        let dir = tempfile::tempdir().unwrap();

        let downloaded = collect_run_results(
            &api,
            RunId(11),
            &plan(vec![ReportType::Pdf], false),
            dir.path(),
            &fast_poll(),
            &fast_report(),
        )
        .await
        .unwrap();

        assert!(downloaded.is_empty());
        assert_eq!(api.report_creations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_run_skips_reports_and_propagates() {
        let api = ScriptedApi::new(vec![snapshot("in-progress", DetailedStatus::Halted)]);
        let dir = tempfile::tempdir().unwrap();

        let err = collect_run_results(
            &api,
            RunId(11),
            &plan(vec![ReportType::Pdf], true),
            dir.path(),
            &fast_poll(),
            &fast_report(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::RunFailed(DetailedStatus::Halted)));
        assert_eq!(api.report_creations.load(Ordering::SeqCst), 0);
    }
}
