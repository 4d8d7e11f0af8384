//! Suite runner: scenarios × device projects, with retries and a worker limit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::checkout::{CheckoutFlow, CheckoutReport, StepResult};
use crate::clock::{Clock, TokioClock};
use crate::config::{DeviceProfile, SuiteConfig};
use crate::driver::DriverFactory;
use crate::error::{E2eError, E2eResult};
use crate::fixtures::FixtureCatalog;
use crate::playwright::PlaywrightLauncher;
use crate::poll::PollPolicy;
use crate::site::SiteCheck;
use crate::spec::{ResolvedScenario, Scenario};

const PREFLIGHT_INTERVAL: Duration = Duration::from_secs(2);
const PREFLIGHT_DEADLINE: Duration = Duration::from_secs(30);

/// Result of running a scenario on one device project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub project: String,
    pub success: bool,
    /// Runs used, including retries
    pub attempts: u32,
    pub duration_ms: u64,
    pub order_id: Option<String>,
    pub otp_required: bool,
    pub pay_attempts: Option<u32>,
    pub status_checks: Option<u32>,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

impl TestResult {
    fn from_report(
        scenario: &str,
        device: &DeviceProfile,
        attempts: u32,
        duration_ms: u64,
        report: CheckoutReport,
    ) -> Self {
        Self {
            name: scenario.to_string(),
            project: device.name.clone(),
            success: report.success(),
            attempts,
            duration_ms,
            order_id: report.order_id,
            otp_required: report.otp_required,
            pay_attempts: report.pay_attempts,
            status_checks: report.status_checks,
            steps: report.steps,
            error: report.error,
        }
    }

    fn failed(scenario: &str, device: &DeviceProfile, error: &E2eError) -> Self {
        Self {
            name: scenario.to_string(),
            project: device.name.clone(),
            success: false,
            attempts: 0,
            duration_ms: 0,
            order_id: None,
            otp_required: false,
            pay_attempts: None,
            status_checks: None,
            steps: vec![],
            error: Some(error.to_string()),
        }
    }
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub started_at: DateTime<Utc>,
    pub base_url: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Scenario/project pairs excluded by the scenario's device list
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

/// Main E2E test runner
pub struct TestRunner {
    config: SuiteConfig,
    catalog: FixtureCatalog,
    factory: Arc<dyn DriverFactory>,
    clock: Arc<dyn Clock>,
}

impl TestRunner {
    /// Runner driving real browsers through Playwright
    pub fn new(config: SuiteConfig) -> E2eResult<Self> {
        config.validate()?;
        let catalog = FixtureCatalog::load(config.fixtures_path.as_deref())?;
        let launcher = PlaywrightLauncher::new(config.clone())?;
        Ok(Self::with_factory(config, catalog, Arc::new(launcher)))
    }

    /// Runner with a custom browser factory
    pub fn with_factory(
        config: SuiteConfig,
        catalog: FixtureCatalog,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        Self {
            config,
            catalog,
            factory,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Fail fast when the storefront does not answer
    pub async fn preflight(&self) -> E2eResult<()> {
        if !self.config.preflight {
            debug!("Preflight disabled");
            return Ok(());
        }
        SiteCheck::new(
            self.config.base_url.clone(),
            PollPolicy::new(PREFLIGHT_INTERVAL, PREFLIGHT_DEADLINE),
        )?
        .with_clock(self.clock.clone())
        .ensure_reachable()
        .await?;
        Ok(())
    }

    /// Run all scenarios in the specs directory
    pub async fn run_all(&self) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.config.specs_dir)?;
        self.run_scenarios(&scenarios).await
    }

    /// Run scenarios matching a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.config.specs_dir)?;
        let filtered: Vec<Scenario> = Scenario::filter_by_tag(&scenarios, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_scenarios(&filtered).await
    }

    /// Run a specific scenario by name on each of its projects
    pub async fn run_test(&self, name: &str) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.config.specs_dir)?;
        let scenario = scenarios
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Test not found: {}", name)))?;
        self.run_scenarios(std::slice::from_ref(&scenario)).await
    }

    /// Run every scenario on every device project it selects
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> E2eResult<TestSuiteResult> {
        let started_at = Utc::now();
        let start = self.clock.now();

        let jobs: Vec<(&Scenario, &DeviceProfile)> = scenarios
            .iter()
            .flat_map(|s| {
                self.config
                    .devices
                    .iter()
                    .filter(move |d| s.runs_on(&d.name))
                    .map(move |d| (s, d))
            })
            .collect();
        let skipped = scenarios.len() * self.config.devices.len() - jobs.len();

        if !jobs.is_empty() {
            self.preflight().await?;
        }

        info!(
            "Running {} test(s) on {} worker(s)...",
            jobs.len(),
            self.config.workers
        );

        let mut results: Vec<TestResult> = stream::iter(jobs)
            .map(|(scenario, device)| self.run_job(scenario, device))
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| (&a.name, &a.project).cmp(&(&b.name, &b.project)));

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = self.clock.elapsed_since(start).as_millis() as u64;

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        Ok(TestSuiteResult {
            started_at,
            base_url: self.config.base_url.clone(),
            total: results.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        })
    }

    /// Run one scenario on one project, retrying failed runs
    async fn run_job(&self, scenario: &Scenario, device: &DeviceProfile) -> TestResult {
        let resolved = match scenario.resolve(&self.catalog) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("✗ {} [{}] - {}", scenario.name, device.name, e);
                return TestResult::failed(&scenario.name, device, &e);
            }
        };

        let max_runs = self.config.retries + 1;
        let start = self.clock.now();
        let mut run = 1;
        loop {
            let report = self.run_bounded(&resolved, device, run).await;
            let success = report.success();

            if success || run >= max_runs {
                let duration_ms = self.clock.elapsed_since(start).as_millis() as u64;
                let result = TestResult::from_report(&scenario.name, device, run, duration_ms, report);
                if success {
                    info!("✓ {} [{}] ({} ms)", result.name, result.project, duration_ms);
                } else {
                    error!(
                        "✗ {} [{}] - {}",
                        result.name,
                        result.project,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
                return result;
            }

            warn!(
                "{} [{}] failed on run {}/{}, retrying",
                scenario.name, device.name, run, max_runs
            );
            run += 1;
        }
    }

    /// One run under the per-test timeout. Only the checkout itself is
    /// bounded; the browser is closed whichever way it ends.
    async fn run_bounded(&self, scenario: &ResolvedScenario, device: &DeviceProfile, run: u32) -> CheckoutReport {
        debug!("Running {} on {} (run {})", scenario.name, device.name, run);
        let mut report = CheckoutReport::default();
        let driver = match self.factory.open(device).await {
            Ok(driver) => driver,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        };

        match CheckoutFlow::new(driver.clone(), &self.config) {
            Ok(flow) => {
                let flow = flow
                    .with_clock(self.clock.clone())
                    .with_label(format!("{}-{}-run{}-", scenario.name, device.name, run));
                let budget = self.config.timeouts.test();
                let finished = tokio::select! {
                    _ = flow.execute(scenario, &mut report) => true,
                    _ = self.clock.sleep(budget) => false,
                };
                if !finished {
                    warn!("{} [{}] exceeded {:?}", scenario.name, device.name, budget);
                    let reason = E2eError::Timeout(format!("test exceeded {:?}", budget));
                    flow.interrupt(&mut report, reason).await;
                }
            }
            Err(e) => report.error = Some(e.to_string()),
        }

        if let Err(e) = driver.close().await {
            warn!("Closing browser for {} failed: {}", device.name, e);
        }
        report
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
