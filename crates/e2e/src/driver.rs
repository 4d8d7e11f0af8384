//! Browser-driving boundary and the conditions built on top of it

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::condition::{Action, Check, Probe, SuccessCondition, TerminalCondition};
use crate::config::DeviceProfile;
use crate::error::E2eResult;

/// How an element is found on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// CSS (or Playwright pseudo-class) selector
    Css { selector: String },

    /// ARIA role with accessible name. Unless `exact`, `name` is a
    /// case-insensitive regular expression.
    Role {
        role: String,
        name: String,
        #[serde(default)]
        exact: bool,
    },

    /// `data-testid` attribute
    TestId { id: String },

    /// Visible text
    Text { text: String },

    /// The `index`-th match of another locator
    Nth { of: Box<Locator>, index: usize },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css { selector: selector.into() }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
            exact: false,
        }
    }

    pub fn role_exact(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
            exact: true,
        }
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId { id: id.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn nth(&self, index: usize) -> Self {
        Self::Nth {
            of: Box::new(self.clone()),
            index,
        }
    }

    pub fn first(&self) -> Self {
        self.nth(0)
    }

    /// Short label used in condition identifiers and logs.
    pub fn label(&self) -> String {
        match self {
            Locator::Css { selector } => selector.clone(),
            Locator::Role { name, .. } => name.clone(),
            Locator::TestId { id } => id.clone(),
            Locator::Text { text } => text.clone(),
            Locator::Nth { of, index } => format!("{}[{}]", of.label(), index),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css { selector } => write!(f, "css={}", selector),
            Locator::Role { role, name, .. } => write!(f, "role={}[name={}]", role, name),
            Locator::TestId { id } => write!(f, "testid={}", id),
            Locator::Text { text } => write!(f, "text={}", text),
            Locator::Nth { of, index } => write!(f, "{} >> nth={}", of, index),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClickOptions {
    /// Skip actionability checks
    #[serde(default)]
    pub force: bool,

    /// Scroll into view and dispatch a DOM `click()` instead of a pointer click
    #[serde(default)]
    pub dom: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ClickOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    pub fn dom() -> Self {
        Self {
            dom: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    #[default]
    DomContentLoaded,
    NetworkIdle,
}

/// Capabilities the suite needs from a browser session.
///
/// The `wait_for_*` methods return `Ok(false)` on timeout; `Err` is reserved
/// for driver malfunction.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate to `url`, relative to the session base URL.
    async fn goto(&self, url: &str) -> E2eResult<()>;

    async fn click(&self, locator: &Locator, options: ClickOptions) -> E2eResult<()>;

    async fn fill(&self, locator: &Locator, value: &str) -> E2eResult<()>;

    async fn is_visible(&self, locator: &Locator) -> E2eResult<bool>;

    async fn count(&self, locator: &Locator) -> E2eResult<usize>;

    async fn text_content(&self, locator: &Locator) -> E2eResult<Option<String>>;

    async fn current_url(&self) -> E2eResult<String>;

    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> E2eResult<bool>;

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> E2eResult<bool>;

    async fn wait_for_enabled(&self, locator: &Locator, timeout: Duration) -> E2eResult<bool>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> E2eResult<bool>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()>;

    async fn close(&self) -> E2eResult<()> {
        Ok(())
    }
}

/// Opens one isolated browser session per test job.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open(&self, device: &DeviceProfile) -> E2eResult<Arc<dyn BrowserDriver>>;
}

/// Wait on `fut` unless `cancel` fires first, in which case the branch
/// reports [`Check::NotYet`].
async fn cancellable<F>(cancel: &CancellationToken, fut: F) -> Check
where
    F: std::future::Future<Output = E2eResult<bool>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Check::NotYet,
        result = fut => Check::from_result(result),
    }
}

/// Page URL matches a pattern.
pub struct UrlMatches {
    driver: Arc<dyn BrowserDriver>,
    pattern: Regex,
    timeout: Option<Duration>,
}

impl UrlMatches {
    pub fn new(driver: Arc<dyn BrowserDriver>, pattern: Regex) -> Self {
        Self {
            driver,
            pattern,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl SuccessCondition for UrlMatches {
    fn name(&self) -> String {
        format!("urlMatches(/{}/)", self.pattern.as_str())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn wait(&self, timeout: Duration, cancel: CancellationToken) -> Check {
        cancellable(&cancel, self.driver.wait_for_url(&self.pattern, timeout)).await
    }
}

#[async_trait]
impl TerminalCondition for UrlMatches {
    fn name(&self) -> String {
        SuccessCondition::name(self)
    }

    async fn check(&self) -> Check {
        match self.driver.current_url().await {
            Ok(url) => {
                if self.pattern.is_match(&url) {
                    Check::Met
                } else {
                    Check::NotYet
                }
            }
            Err(e) => Check::Failed(e.to_string()),
        }
    }
}

/// Element is visible.
pub struct ElementVisible {
    driver: Arc<dyn BrowserDriver>,
    locator: Locator,
    timeout: Option<Duration>,
}

impl ElementVisible {
    pub fn new(driver: Arc<dyn BrowserDriver>, locator: Locator) -> Self {
        Self {
            driver,
            locator,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl SuccessCondition for ElementVisible {
    fn name(&self) -> String {
        format!("elementVisible({})", self.locator.label())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn wait(&self, timeout: Duration, cancel: CancellationToken) -> Check {
        cancellable(&cancel, self.driver.wait_for_visible(&self.locator, timeout)).await
    }
}

#[async_trait]
impl TerminalCondition for ElementVisible {
    fn name(&self) -> String {
        SuccessCondition::name(self)
    }

    async fn check(&self) -> Check {
        Check::from_result(self.driver.is_visible(&self.locator).await)
    }
}

/// Click on a located element.
pub struct ClickAction {
    driver: Arc<dyn BrowserDriver>,
    locator: Locator,
    options: ClickOptions,
}

impl ClickAction {
    pub fn new(driver: Arc<dyn BrowserDriver>, locator: Locator, options: ClickOptions) -> Self {
        Self {
            driver,
            locator,
            options,
        }
    }
}

#[async_trait]
impl Action for ClickAction {
    fn name(&self) -> String {
        format!("click {}", self.locator.label())
    }

    async fn perform(&self) -> E2eResult<()> {
        self.driver.click(&self.locator, self.options.clone()).await
    }
}

/// Force-clicks a control whenever it is visible, e.g. "Cek Status".
pub struct VisibleProbe {
    driver: Arc<dyn BrowserDriver>,
    locator: Locator,
}

impl VisibleProbe {
    pub fn new(driver: Arc<dyn BrowserDriver>, locator: Locator) -> Self {
        Self { driver, locator }
    }
}

#[async_trait]
impl Probe for VisibleProbe {
    fn name(&self) -> String {
        format!("click {}", self.locator.label())
    }

    async fn is_available(&self) -> Check {
        Check::from_result(self.driver.is_visible(&self.locator).await)
    }

    async fn fire(&self) -> E2eResult<()> {
        self.driver.click(&self.locator, ClickOptions::forced()).await
    }
}

/// Count of matches reaches a minimum, e.g. "at least one OTP input".
pub struct CountAtLeast {
    driver: Arc<dyn BrowserDriver>,
    locator: Locator,
    min: usize,
}

impl CountAtLeast {
    pub fn new(driver: Arc<dyn BrowserDriver>, locator: Locator, min: usize) -> Self {
        Self { driver, locator, min }
    }
}

#[async_trait]
impl TerminalCondition for CountAtLeast {
    fn name(&self) -> String {
        format!("count({}) >= {}", self.locator.label(), self.min)
    }

    async fn check(&self) -> Check {
        match self.driver.count(&self.locator).await {
            Ok(n) if n >= self.min => Check::Met,
            Ok(_) => Check::NotYet,
            Err(e) => Check::Failed(e.to_string()),
        }
    }
}

/// Return the first candidate that becomes visible within `per_candidate`,
/// trying candidates in order. Driver errors count as "not this one".
pub async fn first_visible(
    driver: &dyn BrowserDriver,
    candidates: &[Locator],
    per_candidate: Duration,
) -> Option<Locator> {
    for candidate in candidates {
        match driver.wait_for_visible(candidate, per_candidate).await {
            Ok(true) => return Some(candidate.clone()),
            Ok(false) => debug!("Candidate {} not visible", candidate),
            Err(e) => debug!("Candidate {} failed: {}", candidate, e),
        }
    }
    None
}
