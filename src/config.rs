//! Taurus-style YAML configuration
//!
//! The runner consumes the same configuration shape the Taurus `lrc`
//! executor uses: an `lrc` module block (service URL + tenant), an
//! `execution` entry naming the scenario, and the scenario itself with
//! either an existing `testId` or the material to create a new test
//! (name, scripts, distributions, load generators).
//!
//! [`TaurusConfig::resolve`] validates the raw file into a [`Connection`]
//! and a [`TestPlan`]; every error names the offending key.

use crate::error::{Error, Result};
use crate::types::{ReportType, RunId, TestId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Service URL used when neither the CLI nor the config provides one
pub const DEFAULT_SERVICE_URL: &str = "https://loadrunner-cloud.saas.microfocus.com";
/// Project used when the scenario does not name one
pub const DEFAULT_PROJECT_ID: i64 = 1;

/// Raw configuration file as parsed from YAML
#[derive(Debug, Default, Deserialize)]
pub struct TaurusConfig {
    /// Module blocks; only `lrc` is meaningful here
    #[serde(default)]
    pub modules: Modules,
    /// Execution entries; the first one selects the scenario
    #[serde(default)]
    pub execution: Vec<Execution>,
    /// Scenario definitions by name
    #[serde(default)]
    pub scenarios: HashMap<String, Scenario>,
    /// Global settings (proxy)
    #[serde(default)]
    pub settings: Option<GlobalSettings>,
}

/// Module blocks of the configuration file
#[derive(Debug, Default, Deserialize)]
pub struct Modules {
    /// The load-testing service module
    #[serde(default)]
    pub lrc: Option<LrcModule>,
}

/// Connection block for the load-testing service
#[derive(Debug, Default, Deserialize)]
pub struct LrcModule {
    /// Service URL; defaults to [`DEFAULT_SERVICE_URL`]
    #[serde(default)]
    pub url: Option<String>,
    /// Tenant identifier, written as a number or a string in YAML
    #[serde(default)]
    pub tenant: Option<Tenant>,
}

/// Tenant identifier; YAML files write it as either a number or a string
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Tenant {
    /// Numeric tenant id
    Number(i64),
    /// String tenant id
    Name(String),
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tenant::Number(n) => write!(f, "{n}"),
            Tenant::Name(s) => f.write_str(s),
        }
    }
}

/// One execution entry
#[derive(Debug, Default, Deserialize)]
pub struct Execution {
    /// Executor name; must be "lrc"
    #[serde(default)]
    pub executor: Option<String>,
    /// Name of the scenario to run
    #[serde(default)]
    pub scenario: Option<String>,
}

/// Global settings block
#[derive(Debug, Default, Deserialize)]
pub struct GlobalSettings {
    /// Outbound proxy settings
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
}

/// Outbound proxy settings
#[derive(Debug, Default, Deserialize)]
pub struct ProxySettings {
    /// Proxy address, e.g. `http://proxy.corp:8080`
    #[serde(default)]
    pub address: Option<String>,
}

/// One scenario definition
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Project the test lives in (default 1)
    #[serde(default)]
    pub project_id: Option<i64>,
    /// Existing test to run; mutually exclusive with creating by `name`
    #[serde(default)]
    pub test_id: Option<i64>,
    /// Name for a test to create
    #[serde(default, alias = "testName")]
    pub name: Option<String>,
    /// Scripts to upload into a newly created test
    #[serde(default, alias = "script")]
    pub scripts: Option<Vec<ScriptEntry>>,
    /// Whether to start a run after creating the test (default true)
    #[serde(default)]
    pub run_test: Option<bool>,
    /// Exit right after starting the run instead of monitoring it
    #[serde(default)]
    pub detach: Option<bool>,
    /// Whether to download reports once the run finishes (default true)
    #[serde(default)]
    pub download_report: Option<bool>,
    /// Report format(s) to download; a single value or a list (default pdf)
    #[serde(default)]
    pub report_type: Option<ReportTypeSpec>,
    /// Test settings merged over the service's defaults
    #[serde(default, alias = "testSettings")]
    pub settings: Option<serde_json::Value>,
    /// Cloud vuser distributions by location name
    #[serde(default)]
    pub distributions: Vec<Distribution>,
    /// On-premise load generator keys to assign
    #[serde(default)]
    pub load_generators: Vec<String>,
}

/// `reportType` accepts a single value or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReportTypeSpec {
    /// A single report type
    One(String),
    /// A list of report types
    Many(Vec<String>),
}

/// One script to upload and attach to a created test
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptEntry {
    /// Path of the script archive on disk
    pub path: PathBuf,
    /// 0 = cloud, 1 = on-premise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_type: Option<i64>,
    /// Remaining script settings, merged into the attached test script
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScriptEntry {
    /// Whether this script runs on an on-premise load generator
    pub fn is_on_premise(&self) -> bool {
        self.location_type == Some(1)
    }
}

/// One cloud vuser distribution
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Name of the distribution location
    pub location_name: String,
    /// Percentage of vusers to place there
    pub vusers_percent: f64,
}

/// Validated connection parameters
#[derive(Clone, Debug)]
pub struct Connection {
    /// Service URL
    pub url: Url,
    /// Tenant identifier
    pub tenant: String,
    /// Outbound proxy address, if any
    pub proxy: Option<String>,
}

/// Validated scenario, ready for the orchestrator
#[derive(Clone, Debug)]
pub struct TestPlan {
    /// Name of the scenario this plan came from
    pub scenario: String,
    /// Project the test lives in
    pub project_id: i64,
    /// Existing test to run, if any
    pub test_id: Option<TestId>,
    /// Name for a test to create, when `test_id` is absent
    pub name: Option<String>,
    /// Scripts to upload into a created test
    pub scripts: Vec<ScriptEntry>,
    /// Whether to start a run after creating the test
    pub run_test: bool,
    /// Exit right after starting the run
    pub detach: bool,
    /// Whether to download reports once the run finishes
    pub download_report: bool,
    /// Report formats to download, deduplicated, in order
    pub report_types: Vec<ReportType>,
    /// Test settings merged over the service's defaults
    pub settings: Option<serde_json::Value>,
    /// Cloud vuser distributions
    pub distributions: Vec<Distribution>,
    /// On-premise load generator keys
    pub load_generators: Vec<String>,
}

/// Read and parse a configuration file
pub fn load(path: &Path) -> Result<TaurusConfig> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&data)?)
}

impl TaurusConfig {
    /// Validate the raw configuration into connection parameters and a test
    /// plan. `url_override` (from the CLI) wins over the config file.
    pub fn resolve(self, url_override: Option<&str>) -> Result<(Connection, TestPlan)> {
        let lrc = self
            .modules
            .lrc
            .ok_or_else(|| Error::config("lrc module is missing", "modules.lrc"))?;

        let execution = self
            .execution
            .first()
            .filter(|e| e.executor.as_deref() == Some("lrc"))
            .ok_or_else(|| Error::config("lrc executor is missing", "execution"))?;

        let scenario_name = execution
            .scenario
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("scenario is missing", "execution.scenario"))?;

        let scenario = self.scenarios.get(&scenario_name).ok_or_else(|| {
            Error::config(
                format!("no information for scenario: {scenario_name}"),
                "scenarios",
            )
        })?;

        let raw_url = url_override
            .map(String::from)
            .or_else(|| lrc.url.clone().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
        let url = Url::parse(&raw_url)
            .map_err(|_| Error::config("invalid LRC url", "modules.lrc.url"))?;

        let tenant = lrc
            .tenant
            .as_ref()
            .map(Tenant::to_string)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::config("tenant is missing", "modules.lrc.tenant"))?;

        let proxy = self
            .settings
            .as_ref()
            .and_then(|s| s.proxy.as_ref())
            .and_then(|p| p.address.clone());

        let connection = Connection { url, tenant, proxy };
        let plan = resolve_scenario(&scenario_name, scenario)?;
        Ok((connection, plan))
    }
}

fn resolve_scenario(name: &str, scenario: &Scenario) -> Result<TestPlan> {
    let project_id = scenario.project_id.unwrap_or(DEFAULT_PROJECT_ID);
    if project_id < 1 {
        return Err(Error::config("invalid projectId", "projectId"));
    }

    let test_id = match scenario.test_id {
        Some(id) if id < 1 => return Err(Error::config("invalid testId", "testId")),
        Some(id) => Some(TestId(id)),
        None => None,
    };

    let test_name = scenario.name.clone().filter(|n| !n.is_empty());
    if test_id.is_none() && test_name.is_none() {
        return Err(Error::config("test name is missing", "name"));
    }

    let report_types = resolve_report_types(scenario.report_type.as_ref())?;

    let scripts = scenario.scripts.clone().unwrap_or_default();
    if test_id.is_none() && scripts.is_empty() {
        return Err(Error::config("script is required", "scripts"));
    }

    Ok(TestPlan {
        scenario: name.to_string(),
        project_id,
        test_id,
        name: test_name,
        scripts,
        run_test: scenario.run_test.unwrap_or(true),
        detach: scenario.detach.unwrap_or(false),
        download_report: scenario.download_report.unwrap_or(true),
        report_types,
        settings: scenario.settings.clone(),
        distributions: scenario.distributions.clone(),
        load_generators: scenario.load_generators.clone(),
    })
}

fn resolve_report_types(spec: Option<&ReportTypeSpec>) -> Result<Vec<ReportType>> {
    let raw: Vec<String> = match spec {
        None => vec!["pdf".to_string()],
        Some(ReportTypeSpec::One(value)) => vec![value.clone()],
        Some(ReportTypeSpec::Many(values)) => values.clone(),
    };

    let mut types = Vec::new();
    for value in raw {
        let parsed: ReportType = value
            .parse()
            .map_err(|_| Error::config("invalid reportType", "reportType"))?;
        if !types.contains(&parsed) {
            types.push(parsed);
        }
    }
    Ok(types)
}

/// Dashboard URL of a run, for operator-facing log output
pub fn dashboard_url(service_url: &Url, tenant: &str, run_id: RunId) -> String {
    let mut url = service_url.clone();
    url.set_path(&format!("/run-overview/{run_id}/dashboard/"));
    url.set_query(Some(&format!("TENANTID={tenant}")));
    url.to_string()
}
