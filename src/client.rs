//! HTTP client for the load-testing service REST API
//!
//! [`ApiClient`] is the only module that touches the network. The polling,
//! report and download engines consume the [`LoadTestApi`] trait instead, so
//! they can be exercised against scripted fakes in tests.
//!
//! Every request carries the tenant as a `TENANTID` query parameter and, once
//! authenticated, a bearer token. Error responses are mapped to
//! [`Error::Api`] with the service's `message` field when the body is JSON,
//! the raw body otherwise. A success response whose body is the corporate
//! sign-in HTML page instead of JSON is remapped to a 401, which lets the
//! auth guard treat silent session expiry like an explicit one.

use crate::error::{Error, Result};
use crate::types::{
    AuthToken, Credentials, LoadGenerator, LoadTest, Location, ReportId, ReportStatus,
    ReportTicket, ReportType, RunId, RunRecord, RunStatus, RunTicket, Script, TestId,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::pin::Pin;
use std::sync::RwLock;
use url::Url;

/// Stream of downloaded report bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// The service operations the run-monitoring core depends on.
///
/// The CRUD passthroughs (create test, upload script, ...) live directly on
/// [`ApiClient`]; only the operations the polling/report/download engines
/// need are behind this seam.
#[async_trait]
pub trait LoadTestApi: Send + Sync {
    /// Exchange credentials for a bearer token and make it current
    async fn authenticate(&self, credentials: &Credentials) -> Result<()>;

    /// Fetch the current status snapshot of a run
    async fn run_status(&self, run_id: RunId) -> Result<RunStatus>;

    /// Fetch the full run record (termination flag)
    async fn run_record(&self, run_id: RunId) -> Result<RunRecord>;

    /// Request generation of a report; `None` when the service cannot
    /// produce this report type for the run
    async fn create_report(&self, run_id: RunId, report_type: ReportType)
    -> Result<Option<ReportId>>;

    /// Fetch the readiness of a report being generated
    async fn report_status(&self, report_id: ReportId) -> Result<ReportStatus>;

    /// Open a streaming read of a finished report artifact
    async fn open_report_stream(&self, report_id: ReportId) -> Result<ByteStream>;
}

/// reqwest-backed client for the load-testing service
pub struct ApiClient {
    base: Url,
    tenant: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a client for the given service URL and tenant, with an
    /// optional HTTP proxy address.
    pub fn new(mut base: Url, tenant: impl Into<String>, proxy: Option<&str>) -> Result<Self> {
        // Url::join drops the last path segment without a trailing slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(address) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(address)?);
        }
        let http = builder.build()?;

        Ok(Self {
            base,
            tenant: tenant.into(),
            http,
            token: RwLock::new(None),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|e| Error::api(format!("invalid request url '{path}': {e}")))?;
        let mut builder = self
            .http
            .request(method, url)
            .query(&[("TENANTID", &self.tenant)]);
        let token = self.token.read().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// Send a request and decode its JSON body.
    async fn execute<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Api {
                message: extract_message(&body),
                status_code: Some(status.as_u16()),
            });
        }

        match serde_json::from_str::<T>(&body) {
            Ok(value) => Ok(value),
            Err(_) if is_sign_in_page(&body) => Err(Error::Api {
                message: "Unauthorized".to_string(),
                status_code: Some(401),
            }),
            Err(e) => Err(Error::Serialization(e)),
        }
    }

    /// Send a request whose response body we do not care about.
    async fn execute_ok(&self, builder: reqwest::RequestBuilder) -> Result<()> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Api {
                message: extract_message(&body),
                status_code: Some(status.as_u16()),
            });
        }
        if is_sign_in_page(&body) {
            return Err(Error::Api {
                message: "Unauthorized".to_string(),
                status_code: Some(401),
            });
        }
        Ok(())
    }

    /// Fetch a load test by id
    pub async fn get_test(&self, project_id: i64, test_id: TestId) -> Result<LoadTest> {
        let builder = self.request(
            Method::GET,
            &format!("v1/projects/{project_id}/load-tests/{test_id}"),
        )?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("failed to get test"))
    }

    /// Create a new load test
    pub async fn create_test(&self, project_id: i64, name: &str) -> Result<LoadTest> {
        let builder = self
            .request(Method::POST, &format!("v1/projects/{project_id}/load-tests"))?
            .json(&json!({ "name": name }));
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("creating test failed"))
    }

    /// Start a run of a test
    pub async fn run_test(&self, project_id: i64, test_id: TestId) -> Result<RunTicket> {
        let builder = self.request(
            Method::POST,
            &format!("v1/projects/{project_id}/load-tests/{test_id}/runs"),
        )?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("running test failed"))
    }

    /// Fetch the settings of a test
    pub async fn get_test_settings(
        &self,
        project_id: i64,
        test_id: TestId,
    ) -> Result<serde_json::Value> {
        let builder = self.request(
            Method::GET,
            &format!("v1/projects/{project_id}/load-tests/{test_id}/settings"),
        )?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("getting test settings failed"))
    }

    /// Replace the settings of a test
    pub async fn update_test_settings(
        &self,
        project_id: i64,
        test_id: TestId,
        settings: &serde_json::Value,
    ) -> Result<()> {
        let builder = self
            .request(
                Method::PUT,
                &format!("v1/projects/{project_id}/load-tests/{test_id}/settings"),
            )?
            .json(settings);
        self.execute_ok(builder)
            .await
            .map_err(|e| e.with_operation("updating test settings failed"))
    }

    /// Upload a script file into the project
    pub async fn upload_script(&self, project_id: i64, path: &Path) -> Result<Script> {
        let bytes = tokio::fs::read(path).await.map_err(|_| Error::Api {
            message: format!("file '{}' does not exist", path.display()),
            status_code: Some(400),
        })?;
        if bytes.is_empty() {
            return Err(Error::Api {
                message: format!("file '{}' does not exist", path.display()),
                status_code: Some(400),
            });
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("script.zip")
            .to_string();
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let builder = self
            .request(Method::POST, &format!("v1/projects/{project_id}/scripts"))?
            .multipart(form);
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("uploading script failed"))
    }

    /// Attach an uploaded script to a test
    pub async fn add_test_script(
        &self,
        project_id: i64,
        test_id: TestId,
        script_id: i64,
    ) -> Result<serde_json::Value> {
        let builder = self
            .request(
                Method::POST,
                &format!("v1/projects/{project_id}/load-tests/{test_id}/scripts"),
            )?
            .json(&json!({ "scriptId": script_id }));
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("adding test script failed"))
    }

    /// Update the settings of a script attached to a test. The service takes
    /// and returns a list; the first element is the updated script.
    pub async fn update_test_script(
        &self,
        project_id: i64,
        test_id: TestId,
        script: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let builder = self
            .request(
                Method::PUT,
                &format!("v1/projects/{project_id}/load-tests/{test_id}/scripts"),
            )?
            .json(&json!([script]));
        let updated: Vec<serde_json::Value> = self
            .execute(builder)
            .await
            .map_err(|e| e.with_operation("updating test script failed"))?;
        Ok(updated.into_iter().next().unwrap_or(json!({})))
    }

    /// List the vuser distribution locations of a test
    pub async fn distribution_locations(
        &self,
        project_id: i64,
        test_id: TestId,
    ) -> Result<Vec<Location>> {
        let builder = self.request(
            Method::GET,
            &format!("v1/projects/{project_id}/load-tests/{test_id}/locations"),
        )?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("getting test locations failed"))
    }

    /// Set the vuser percentage of one distribution location
    pub async fn update_distribution_location(
        &self,
        project_id: i64,
        test_id: TestId,
        location_id: i64,
        vusers_percent: f64,
    ) -> Result<()> {
        let builder = self
            .request(
                Method::PUT,
                &format!("v1/projects/{project_id}/load-tests/{test_id}/locations/{location_id}"),
            )?
            .json(&json!({ "vusersPercent": vusers_percent }));
        self.execute_ok(builder)
            .await
            .map_err(|e| e.with_operation("updating test script location failed"))
    }

    /// List the on-premise load generators registered in the project
    pub async fn load_generators(&self, project_id: i64) -> Result<Vec<LoadGenerator>> {
        let builder = self.request(
            Method::GET,
            &format!("v1/projects/{project_id}/load-generators"),
        )?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("getting load generators failed"))
    }

    /// Assign a load generator to a test
    pub async fn assign_load_generator(
        &self,
        project_id: i64,
        test_id: TestId,
        load_generator_id: i64,
    ) -> Result<()> {
        let builder = self.request(
            Method::PUT,
            &format!(
                "v1/projects/{project_id}/load-tests/{test_id}/load-generators/{load_generator_id}"
            ),
        )?;
        self.execute_ok(builder)
            .await
            .map_err(|e| e.with_operation("assigning load generator to test failed"))
    }
}

#[async_trait]
impl LoadTestApi for ApiClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        let builder = self
            .request(Method::POST, "v1/auth-client")?
            .json(credentials);
        let auth: AuthToken = self
            .execute(builder)
            .await
            .map_err(|e| e.with_operation("authentication failed"))?;
        let mut token = self.token.write().unwrap_or_else(|e| e.into_inner());
        *token = Some(auth.token);
        Ok(())
    }

    async fn run_status(&self, run_id: RunId) -> Result<RunStatus> {
        let builder = self.request(Method::GET, &format!("v1/test-runs/{run_id}/status"))?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("getting run status failed"))
    }

    async fn run_record(&self, run_id: RunId) -> Result<RunRecord> {
        let builder = self.request(Method::GET, &format!("v1/test-runs/{run_id}"))?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("getting run result failed"))
    }

    async fn create_report(
        &self,
        run_id: RunId,
        report_type: ReportType,
    ) -> Result<Option<ReportId>> {
        let builder = self
            .request(Method::POST, &format!("v1/test-runs/{run_id}/reports"))?
            .json(&json!({ "reportType": report_type }));
        let ticket: ReportTicket = self
            .execute(builder)
            .await
            .map_err(|e| e.with_operation("creating run report failed"))?;
        Ok(ticket.report_id.map(ReportId))
    }

    async fn report_status(&self, report_id: ReportId) -> Result<ReportStatus> {
        let builder = self.request(Method::GET, &format!("v1/test-runs/reports/{report_id}"))?;
        self.execute(builder)
            .await
            .map_err(|e| e.with_operation("checking run report failed"))
    }

    async fn open_report_stream(&self, report_id: ReportId) -> Result<ByteStream> {
        let builder = self.request(Method::GET, &format!("v1/test-runs/reports/{report_id}"))?;
        let response = builder
            .send()
            .await
            .map_err(|e| Error::from(e).with_operation("downloading report failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                message: extract_message(&body),
                status_code: Some(status.as_u16()),
            }
            .with_operation("downloading report failed"));
        }
        Ok(Box::pin(response.bytes_stream().map_err(Error::from)))
    }
}

/// Pull the `message` field out of a JSON error body, falling back to the
/// raw body text.
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Some deployments answer expired sessions with the corporate sign-in HTML
/// page and a 200 instead of a 401.
fn is_sign_in_page(body: &str) -> bool {
    body.contains("Sign in with corporate credentials")
        && body.contains("Submit your email address")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_message_prefers_json_message_field() {
        assert_eq!(
            extract_message(r#"{"message": "tenant not found"}"#),
            "tenant not found"
        );
        assert_eq!(extract_message("plain text failure\n"), "plain text failure");
        assert_eq!(extract_message(r#"{"error": "x"}"#), r#"{"error": "x"}"#);
    }

    #[test]
    fn sign_in_page_requires_both_markers() {
        let page = "<html>Sign in with corporate credentials ... \
                    Submit your email address</html>";
        assert!(is_sign_in_page(page));
        assert!(!is_sign_in_page("Sign in with corporate credentials"));
        assert!(!is_sign_in_page("Submit your email address"));
        assert!(!is_sign_in_page(r#"{"status": "ok"}"#));
    }

    #[test]
    fn base_url_keeps_its_path_prefix() {
        let client = ApiClient::new(
            Url::parse("https://example.com/lrc").unwrap(),
            "42",
            None,
        )
        .unwrap();
        let url = client.base.join("v1/test-runs/1/status").unwrap();
        assert_eq!(url.as_str(), "https://example.com/lrc/v1/test-runs/1/status");
    }
}
