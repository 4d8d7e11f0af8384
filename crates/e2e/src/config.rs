//! Suite configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::playwright::Browser;
use crate::poll::PollPolicy;
use crate::retry::RetryPolicy;

/// Suite configuration, loaded from TOML and overridden by CLI flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Storefront under test
    pub base_url: String,

    /// Scenario directory
    pub specs_dir: PathBuf,

    /// Optional YAML file overriding the built-in fixtures
    pub fixtures_path: Option<PathBuf>,

    /// Output directory for results and screenshots
    pub output_dir: PathBuf,

    /// Concurrent test jobs
    pub workers: usize,

    /// Extra runs for a failed job
    pub retries: u32,

    /// Check the storefront answers over HTTP before launching browsers
    pub preflight: bool,

    pub browser: BrowserConfig,

    pub timeouts: Timeouts,

    /// Budget for the "Bayar Sekarang" click
    pub pay_retry: RetryPolicy,

    /// Pacing for the order status wait
    pub status_poll: PollPolicy,

    /// Device projects every scenario runs on
    pub devices: Vec<DeviceProfile>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stg.sfshop.id".to_string(),
            specs_dir: PathBuf::from("crates/e2e/scenarios"),
            fixtures_path: None,
            output_dir: PathBuf::from("test-results"),
            workers: 1,
            retries: 0,
            preflight: true,
            browser: BrowserConfig::default(),
            timeouts: Timeouts::default(),
            pay_retry: RetryPolicy::default(),
            status_poll: PollPolicy::default(),
            devices: vec![DeviceProfile::mobile_chromium(), DeviceProfile::desktop_chromium()],
        }
    }
}

impl SuiteConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.workers == 0 {
            return Err(E2eError::Config("workers must be at least 1".to_string()));
        }
        if self.devices.is_empty() {
            return Err(E2eError::Config("at least one device project is required".to_string()));
        }
        if self.status_poll.interval_ms == 0 {
            return Err(E2eError::Config("status_poll.interval_ms must be positive".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(E2eError::Config(format!("base_url is not an http(s) URL: {}", self.base_url)));
        }
        Ok(())
    }

    /// Find a device project by name
    pub fn device(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.output_dir.join("screenshots")
    }
}

/// Browser session settings shared by every device project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,

    pub locale: String,

    pub timezone_id: String,

    /// Directory holding the `node_modules` with `playwright`
    pub node_project_dir: PathBuf,

    /// Bridge startup budget
    pub launch_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            locale: "id-ID".to_string(),
            timezone_id: "Asia/Jakarta".to_string(),
            node_project_dir: PathBuf::from("."),
            launch_timeout_ms: 60_000,
        }
    }
}

/// Centralised timeout values in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Elements that appear quickly
    pub short_ms: u64,
    /// Interactions
    pub medium_ms: u64,
    /// Page loads
    pub long_ms: u64,
    /// Payment processing
    pub very_long_ms: u64,
    /// Redirect to the OTP or order page after paying
    pub redirect_ms: u64,
    /// Polled assertions such as "OTP inputs rendered"
    pub expect_ms: u64,
    /// Final confirming check after a polling loop
    pub confirm_ms: u64,
    /// Default for Playwright actions such as click and fill
    pub action_ms: u64,
    /// Default for Playwright navigations
    pub navigation_ms: u64,
    /// Whole test job
    pub test_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            short_ms: 5_000,
            medium_ms: 15_000,
            long_ms: 60_000,
            very_long_ms: 120_000,
            redirect_ms: 90_000,
            expect_ms: 30_000,
            confirm_ms: 10_000,
            action_ms: 15_000,
            navigation_ms: 60_000,
            test_ms: 180_000,
        }
    }
}

impl Timeouts {
    pub fn short(&self) -> Duration {
        Duration::from_millis(self.short_ms)
    }

    pub fn medium(&self) -> Duration {
        Duration::from_millis(self.medium_ms)
    }

    pub fn long(&self) -> Duration {
        Duration::from_millis(self.long_ms)
    }

    pub fn very_long(&self) -> Duration {
        Duration::from_millis(self.very_long_ms)
    }

    pub fn redirect(&self) -> Duration {
        Duration::from_millis(self.redirect_ms)
    }

    pub fn expect(&self) -> Duration {
        Duration::from_millis(self.expect_ms)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_millis(self.confirm_ms)
    }

    pub fn test(&self) -> Duration {
        Duration::from_millis(self.test_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A device project: Playwright device descriptor plus overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,

    #[serde(default)]
    pub browser: Browser,

    /// Name in Playwright's `devices` registry, e.g. "Galaxy Note 20"
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default)]
    pub viewport: Option<Viewport>,
}

impl DeviceProfile {
    pub fn mobile_chromium() -> Self {
        Self {
            name: "mobile-chromium".to_string(),
            browser: Browser::Chromium,
            device: Some("Galaxy Note 20".to_string()),
            viewport: None,
        }
    }

    pub fn desktop_chromium() -> Self {
        Self {
            name: "desktop-chromium".to_string(),
            browser: Browser::Chromium,
            device: Some("Desktop Chrome".to_string()),
            viewport: Some(Viewport {
                width: 1920,
                height: 1080,
            }),
        }
    }
}
