//! Playwright browser automation over a persistent node bridge
//!
//! Each session spawns `node` on an embedded bridge script that owns one
//! browser context and page. Requests and replies are JSON lines on the
//! child's stdin and stdout:
//!
//! ```text
//! -> {"id":7,"cmd":"wait_for_url","pattern":"order/","timeout_ms":15000}
//! <- {"id":7,"ok":true,"value":true}
//! ```
//!
//! Reply id 0 is the ready handshake sent once the page exists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DeviceProfile, SuiteConfig, Viewport};
use crate::driver::{BrowserDriver, ClickOptions, DriverFactory, LoadState, Locator};
use crate::error::{E2eError, E2eResult};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Slack on top of a command's own timeout before its reply is given up on
const REPLY_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser: {}", other))),
        }
    }
}

/// Configuration for one Playwright session
#[derive(Debug, Clone, Serialize)]
pub struct PlaywrightConfig {
    pub base_url: String,
    pub browser: Browser,
    pub headless: bool,
    pub device: Option<String>,
    pub viewport: Option<Viewport>,
    pub locale: String,
    pub timezone_id: String,
    pub action_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    #[serde(skip)]
    pub node_project_dir: PathBuf,
    #[serde(skip)]
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self::for_device(&SuiteConfig::default(), &DeviceProfile::desktop_chromium())
    }
}

impl PlaywrightConfig {
    pub fn for_device(suite: &SuiteConfig, device: &DeviceProfile) -> Self {
        Self {
            base_url: suite.base_url.clone(),
            browser: device.browser,
            headless: suite.browser.headless,
            device: device.device.clone(),
            viewport: device.viewport,
            locale: suite.browser.locale.clone(),
            timezone_id: suite.browser.timezone_id.clone(),
            action_timeout_ms: suite.timeouts.action_ms,
            navigation_timeout_ms: suite.timeouts.navigation_ms,
            node_project_dir: suite.browser.node_project_dir.clone(),
            launch_timeout: Duration::from_millis(suite.browser.launch_timeout_ms),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Goto {
        url: &'a str,
    },
    Click {
        locator: &'a Locator,
        force: bool,
        dom: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Fill {
        locator: &'a Locator,
        value: &'a str,
    },
    IsVisible {
        locator: &'a Locator,
    },
    Count {
        locator: &'a Locator,
    },
    TextContent {
        locator: &'a Locator,
    },
    Url,
    WaitForUrl {
        pattern: &'a str,
        timeout_ms: u64,
    },
    WaitForVisible {
        locator: &'a Locator,
        timeout_ms: u64,
    },
    WaitForEnabled {
        locator: &'a Locator,
        timeout_ms: u64,
    },
    WaitForLoadState {
        state: LoadState,
        timeout_ms: u64,
    },
    Screenshot {
        path: String,
        full_page: bool,
    },
}

impl BridgeCommand<'_> {
    /// The Playwright-side timeout of the command, if it carries one
    fn timeout_ms(&self) -> Option<u64> {
        match self {
            BridgeCommand::Click { timeout_ms, .. } => *timeout_ms,
            BridgeCommand::WaitForUrl { timeout_ms, .. }
            | BridgeCommand::WaitForVisible { timeout_ms, .. }
            | BridgeCommand::WaitForEnabled { timeout_ms, .. }
            | BridgeCommand::WaitForLoadState { timeout_ms, .. } => Some(*timeout_ms),
            _ => None,
        }
    }

    /// How long to wait for the reply before the bridge counts as stuck
    fn reply_budget(&self, action_timeout_ms: u64, navigation_timeout_ms: u64) -> Duration {
        let own = self.timeout_ms().unwrap_or(match self {
            BridgeCommand::Goto { .. } => navigation_timeout_ms,
            _ => action_timeout_ms,
        });
        Duration::from_millis(own) + REPLY_GRACE
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    command: BridgeCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Removes an in-flight request when its caller stops waiting, so replies
/// to abandoned condition branches are discarded by the reader.
struct PendingGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// A live browser page driven through the node bridge
pub struct PlaywrightSession {
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    action_timeout_ms: u64,
    navigation_timeout_ms: u64,
    reader: JoinHandle<()>,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightSession {
    /// Spawn the bridge and wait for its ready handshake
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let settings = serde_json::to_string(&config)?;
        debug!("Launching Playwright bridge: {}", script_path.display());

        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .arg(&settings)
            .env("NODE_PATH", config.node_project_dir.join("node_modules"))
            .current_dir(&config.node_project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("Failed to spawn node: {}", e)))?;

        let stdin = child.stdin.take().ok_or(E2eError::BridgeClosed)?;
        let stdout = child.stdout.take().ok_or(E2eError::BridgeClosed)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("[bridge] {}", line);
                }
            });
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        pending.lock().insert(0, ready_tx);

        let reader = {
            let pending = pending.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match serde_json::from_str::<Reply>(&line) {
                        Ok(reply) => {
                            let waiter = pending.lock().remove(&reply.id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(reply);
                                }
                                None => debug!("Discarding reply to abandoned request {}", reply.id),
                            }
                        }
                        Err(_) => debug!("[bridge] {}", line),
                    }
                }
                // Dropping the senders fails every waiter with BridgeClosed
                pending.lock().clear();
            })
        };

        let session = Self {
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            action_timeout_ms: config.action_timeout_ms,
            navigation_timeout_ms: config.navigation_timeout_ms,
            reader,
            _script_dir: script_dir,
        };

        let ready = tokio::time::timeout(config.launch_timeout, ready_rx)
            .await
            .map_err(|_| E2eError::Timeout(format!("Playwright bridge startup ({:?})", config.launch_timeout)))?
            .map_err(|_| E2eError::BridgeClosed)?;
        if !ready.ok {
            return Err(E2eError::Playwright(
                ready.error.unwrap_or_else(|| "bridge failed to start".to_string()),
            ));
        }

        info!(
            "Playwright session ready ({}, device: {})",
            config.browser.as_str(),
            config.device.as_deref().unwrap_or("none")
        );
        Ok(session)
    }

    async fn call(&self, command: BridgeCommand<'_>) -> E2eResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };

        let budget = command.reply_budget(self.action_timeout_ms, self.navigation_timeout_ms);
        let mut line = serde_json::to_string(&Request { id, command })?;
        line.push('\n');
        {
            let mut stdin = self.stdin.lock().await;
            let stdin = stdin.as_mut().ok_or(E2eError::BridgeClosed)?;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }

        let reply = tokio::time::timeout(budget, rx)
            .await
            .map_err(|_| E2eError::Timeout(format!("bridge reply to request {} within {:?}", id, budget)))?
            .map_err(|_| E2eError::BridgeClosed)?;
        if reply.ok {
            Ok(reply.value)
        } else {
            Err(E2eError::Playwright(
                reply.error.unwrap_or_else(|| "unknown bridge error".to_string()),
            ))
        }
    }

    async fn call_bool(&self, command: BridgeCommand<'_>) -> E2eResult<bool> {
        Ok(serde_json::from_value(self.call(command).await?)?)
    }

    /// Close stdin so the bridge closes the browser, then reap the child
    async fn shutdown(&self) -> E2eResult<()> {
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
            Ok(status) => {
                debug!("Playwright bridge exited: {:?}", status?);
            }
            Err(_) => {
                warn!("Playwright bridge did not exit, terminating");
                #[cfg(unix)]
                {
                    use nix::sys::signal::{kill, Signal};
                    use nix::unistd::Pid;

                    if let Some(pid) = child.id() {
                        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
                let _ = child.kill().await;
            }
        }
        Ok(())
    }
}

impl Drop for PlaywrightSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightSession {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        self.call(BridgeCommand::Goto { url }).await.map(|_| ())
    }

    async fn click(&self, locator: &Locator, options: ClickOptions) -> E2eResult<()> {
        self.call(BridgeCommand::Click {
            locator,
            force: options.force,
            dom: options.dom,
            timeout_ms: options.timeout_ms,
        })
        .await
        .map(|_| ())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> E2eResult<()> {
        self.call(BridgeCommand::Fill { locator, value }).await.map(|_| ())
    }

    async fn is_visible(&self, locator: &Locator) -> E2eResult<bool> {
        self.call_bool(BridgeCommand::IsVisible { locator }).await
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        Ok(serde_json::from_value(self.call(BridgeCommand::Count { locator }).await?)?)
    }

    async fn text_content(&self, locator: &Locator) -> E2eResult<Option<String>> {
        Ok(serde_json::from_value(self.call(BridgeCommand::TextContent { locator }).await?)?)
    }

    async fn current_url(&self) -> E2eResult<String> {
        Ok(serde_json::from_value(self.call(BridgeCommand::Url).await?)?)
    }

    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> E2eResult<bool> {
        self.call_bool(BridgeCommand::WaitForUrl {
            pattern: pattern.as_str(),
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> E2eResult<bool> {
        self.call_bool(BridgeCommand::WaitForVisible {
            locator,
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
    }

    async fn wait_for_enabled(&self, locator: &Locator, timeout: Duration) -> E2eResult<bool> {
        self.call_bool(BridgeCommand::WaitForEnabled {
            locator,
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> E2eResult<bool> {
        self.call_bool(BridgeCommand::WaitForLoadState {
            state,
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.call(BridgeCommand::Screenshot {
            path: path.to_string_lossy().to_string(),
            full_page,
        })
        .await
        .map(|_| ())
    }

    async fn close(&self) -> E2eResult<()> {
        self.shutdown().await
    }
}

/// Opens a fresh [`PlaywrightSession`] per test job
pub struct PlaywrightLauncher {
    suite: SuiteConfig,
}

impl PlaywrightLauncher {
    /// Create a launcher after verifying Playwright is installed
    pub fn new(suite: SuiteConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&suite.browser.node_project_dir)?;
        Ok(Self { suite })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed(project_dir: &Path) -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl DriverFactory for PlaywrightLauncher {
    async fn open(&self, device: &DeviceProfile) -> E2eResult<Arc<dyn BrowserDriver>> {
        let config = PlaywrightConfig::for_device(&self.suite, device);
        let session = PlaywrightSession::launch(config).await?;
        Ok(Arc::new(session))
    }
}
