//! In-memory storefront standing in for a Playwright session

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use sfshop_e2e::checkout::selectors;
use sfshop_e2e::config::DeviceProfile;
use sfshop_e2e::driver::{ClickOptions, LoadState};
use sfshop_e2e::{BrowserDriver, DriverFactory, E2eError, E2eResult, Locator};

pub const BASE_URL: &str = "https://stg.sfshop.id";
const TICK: Duration = Duration::from_millis(50);

/// How the fake storefront reacts
#[derive(Debug, Clone)]
pub struct SiteScript {
    /// Pay clicks swallowed before the page reacts
    pub ignored_pay_clicks: u32,
    /// Pay click opens the Konfirmasi modal instead of navigating
    pub confirm_modal: bool,
    /// Payment goes through the OTP page
    pub otp: bool,
    /// Payment goes through the QRIS simulator
    pub simulator: bool,
    /// An instruction page with "Lanjutkan Pembayaran" precedes the simulator
    pub instruction_page: bool,
    /// "Cek Status" clicks before the order completes; `None` never completes
    pub status_checks_needed: Option<u32>,
    pub order_id: String,
}

impl Default for SiteScript {
    fn default() -> Self {
        Self {
            ignored_pay_clicks: 0,
            confirm_modal: false,
            otp: false,
            simulator: false,
            instruction_page: false,
            status_checks_needed: Some(0),
            order_id: "SF24A7".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Blank,
    Home,
    Product,
    Review,
    Otp,
    Instruction,
    Qris,
    Order,
}

#[derive(Debug)]
struct SiteState {
    page: Page,
    url: String,
    payment_selected: bool,
    confirm_visible: bool,
    pay_clicks: u32,
    status_clicks: u32,
    otp_digits: Vec<String>,
    filled: Vec<(String, String)>,
    screenshots: Vec<PathBuf>,
    closed: bool,
}

pub struct FakeSite {
    script: SiteScript,
    state: Mutex<SiteState>,
}

impl FakeSite {
    pub fn new(script: SiteScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            state: Mutex::new(SiteState {
                page: Page::Blank,
                url: "about:blank".to_string(),
                payment_selected: false,
                confirm_visible: false,
                pay_clicks: 0,
                status_clicks: 0,
                otp_digits: vec![String::new(); 4],
                filled: Vec::new(),
                screenshots: Vec::new(),
                closed: false,
            }),
        })
    }

    pub fn pay_clicks(&self) -> u32 {
        self.state.lock().pay_clicks
    }

    pub fn status_clicks(&self) -> u32 {
        self.state.lock().status_clicks
    }

    pub fn filled(&self, locator: &Locator) -> Option<String> {
        let key = locator.to_string();
        self.state
            .lock()
            .filled
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn otp_entered(&self) -> String {
        self.state.lock().otp_digits.concat()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.state.lock().screenshots.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().closed
    }

    fn navigate(state: &mut SiteState, page: Page, path: &str) {
        state.page = page;
        state.url = format!("{}{}", BASE_URL, path);
        state.confirm_visible = false;
    }

    fn order_path(&self) -> String {
        format!("/order/{}", self.script.order_id)
    }

    fn order_complete(&self, state: &SiteState) -> bool {
        state.page == Page::Order
            && self
                .script
                .status_checks_needed
                .is_some_and(|needed| state.status_clicks >= needed)
    }

    fn visible(&self, state: &SiteState, locator: &Locator) -> bool {
        let otp_inputs = selectors::otp_inputs();
        match state.page {
            Page::Product => {
                *locator == selectors::product_image(r"25\+3 Diamonds")
                    || [
                        selectors::player_id(),
                        selectors::zone_id(),
                        selectors::email(),
                        selectors::phone(),
                    ]
                    .contains(locator)
                    || locator.to_string().contains("img[alt*=")
                    || (state.payment_selected && *locator == selectors::continue_button())
            }
            Page::Review => {
                *locator == selectors::pay_now()
                    || (state.confirm_visible
                        && (*locator == selectors::confirm_button()
                            || *locator == selectors::confirm_marker()))
            }
            Page::Otp => {
                *locator == otp_inputs
                    || matches!(locator, Locator::Nth { of, index } if **of == otp_inputs && *index < 4)
                    || *locator == selectors::confirm_button()
            }
            Page::Instruction => *locator == selectors::continue_payment_candidates()[0],
            Page::Qris => self.script.simulator && *locator == selectors::simulate_candidates()[1],
            Page::Order => {
                if self.order_complete(state) {
                    *locator == selectors::back_home()
                } else {
                    *locator == selectors::check_status()
                }
            }
            Page::Home => *locator == selectors::product_link("Mobile Legends"),
            Page::Blank => false,
        }
    }

    fn pay_reaction(&self, state: &mut SiteState) {
        if self.script.confirm_modal {
            state.confirm_visible = true;
        } else {
            self.after_confirm(state);
        }
    }

    fn after_confirm(&self, state: &mut SiteState) {
        if self.script.otp {
            Self::navigate(state, Page::Otp, "/payment/otp");
        } else if self.script.simulator && self.script.instruction_page {
            Self::navigate(state, Page::Instruction, "/payment/instruction");
        } else if self.script.simulator {
            Self::navigate(state, Page::Qris, "/payment/qris");
        } else {
            let path = self.order_path();
            Self::navigate(state, Page::Order, &path);
        }
    }

    async fn poll_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&SiteState) -> bool,
    {
        let start = tokio::time::Instant::now();
        loop {
            let done = predicate(&self.state.lock());
            if done {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(TICK.min(timeout)).await;
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeSite {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        match url {
            "/" => Self::navigate(&mut state, Page::Home, "/"),
            other => return Err(E2eError::Playwright(format!("net::ERR_NAME_NOT_RESOLVED at {}", other))),
        }
        Ok(())
    }

    async fn click(&self, locator: &Locator, options: ClickOptions) -> E2eResult<()> {
        let mut state = self.state.lock();
        if !options.force && !options.dom && !self.visible(&state, locator) {
            return Err(E2eError::Playwright(format!(
                "Timeout 15000ms exceeded waiting for {}",
                locator
            )));
        }

        match state.page {
            Page::Home if *locator == selectors::product_link("Mobile Legends") => {
                Self::navigate(&mut state, Page::Product, "/mobile-legends");
            }
            Page::Product if locator.to_string().contains("img[alt*=") => {
                state.payment_selected = true;
            }
            Page::Product if *locator == selectors::continue_button() => {
                Self::navigate(&mut state, Page::Review, "/mobile-legends/checkout");
            }
            Page::Review if *locator == selectors::pay_now() => {
                state.pay_clicks += 1;
                if state.pay_clicks > self.script.ignored_pay_clicks {
                    self.pay_reaction(&mut state);
                }
            }
            Page::Review if state.confirm_visible && *locator == selectors::confirm_button() => {
                self.after_confirm(&mut state);
            }
            Page::Otp if *locator == selectors::confirm_button() => {
                if state.otp_digits.concat().len() == 4 {
                    let path = self.order_path();
                    Self::navigate(&mut state, Page::Order, &path);
                }
            }
            Page::Instruction if *locator == selectors::continue_payment_candidates()[0] => {
                Self::navigate(&mut state, Page::Qris, "/payment/qris");
            }
            Page::Qris if *locator == selectors::simulate_candidates()[1] => {
                let path = self.order_path();
                Self::navigate(&mut state, Page::Order, &path);
            }
            Page::Order if *locator == selectors::check_status() => {
                state.status_clicks += 1;
            }
            Page::Order if *locator == selectors::back_home() && self.order_complete(&state) => {
                Self::navigate(&mut state, Page::Home, "/");
            }
            _ => {}
        }
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> E2eResult<()> {
        let mut state = self.state.lock();
        if !self.visible(&state, locator) {
            return Err(E2eError::Playwright(format!("no element for {}", locator)));
        }
        if let Locator::Nth { index, .. } = locator {
            let index = *index;
            state.otp_digits[index] = value.to_string();
        }
        state.filled.push((locator.to_string(), value.to_string()));
        Ok(())
    }

    async fn is_visible(&self, locator: &Locator) -> E2eResult<bool> {
        let state = self.state.lock();
        Ok(self.visible(&state, locator))
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        let state = self.state.lock();
        if state.page == Page::Otp && *locator == selectors::otp_inputs() {
            Ok(4)
        } else {
            Ok(usize::from(self.visible(&state, locator)))
        }
    }

    async fn text_content(&self, _locator: &Locator) -> E2eResult<Option<String>> {
        let state = self.state.lock();
        Ok(Some(format!("{:?} page", state.page)))
    }

    async fn current_url(&self) -> E2eResult<String> {
        Ok(self.state.lock().url.clone())
    }

    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> E2eResult<bool> {
        Ok(self.poll_until(timeout, |s| pattern.is_match(&s.url)).await)
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> E2eResult<bool> {
        Ok(self.poll_until(timeout, |s| self.visible(s, locator)).await)
    }

    async fn wait_for_enabled(&self, locator: &Locator, timeout: Duration) -> E2eResult<bool> {
        self.wait_for_visible(locator, timeout).await
    }

    async fn wait_for_load_state(&self, _state: LoadState, _timeout: Duration) -> E2eResult<bool> {
        Ok(true)
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> E2eResult<()> {
        self.state.lock().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Hands out a fresh [`FakeSite`] per session and remembers each one
pub struct FakeFactory {
    script: SiteScript,
    pub sessions: Mutex<Vec<(String, Arc<FakeSite>)>>,
}

impl FakeFactory {
    pub fn new(script: SiteScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn open(&self, device: &DeviceProfile) -> E2eResult<Arc<dyn BrowserDriver>> {
        let site = FakeSite::new(self.script.clone());
        self.sessions.lock().push((device.name.clone(), site.clone()));
        Ok(site)
    }
}
