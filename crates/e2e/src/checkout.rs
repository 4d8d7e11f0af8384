//! The staging checkout flow: product page to order completion

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::condition::{Probe, SuccessCondition};
use crate::config::{SuiteConfig, Timeouts};
use crate::driver::{
    first_visible, BrowserDriver, ClickAction, ClickOptions, CountAtLeast, ElementVisible,
    LoadState, UrlMatches, VisibleProbe,
};
use crate::error::{E2eError, E2eResult};
use crate::fixtures::{CustomerData, PaymentMethod, Product};
use crate::poll::{PollOutcome, PollPolicy, StatusPoller};
use crate::retry::{race, ActionRetrier, RetryOutcome, RetryPolicy};
use crate::spec::ResolvedScenario;

/// Locators and URL patterns of the storefront
pub mod selectors {
    use crate::driver::Locator;

    /// Any page the pay click can land on
    pub const PAY_TRIGGERED: &str = r"payment|otp|order/";
    pub const OTP_PAGE: &str = r"payment/otp";
    pub const ORDER_PAGE: &str = r"order/";
    pub const ORDER_ID: &str = r"/order/([a-zA-Z0-9]+)";

    pub fn product_link(name: &str) -> Locator {
        Locator::role("link", name)
    }

    pub fn product_image(alt: &str) -> Locator {
        Locator::role("img", alt)
    }

    pub fn promo_modal() -> Locator {
        Locator::css("reach-portal > div > div").first()
    }

    pub fn player_id() -> Locator {
        Locator::css("#playerID input")
    }

    pub fn zone_id() -> Locator {
        Locator::css("#zoneID input")
    }

    pub fn email() -> Locator {
        Locator::css("#email input")
    }

    pub fn phone() -> Locator {
        Locator::css("#phone input")
    }

    pub fn payment_option(selector: &str) -> Locator {
        Locator::css(selector)
    }

    /// Expands the collapsed payment list on some layouts
    pub fn expand_arrow() -> Locator {
        Locator::css("i.icon-00387_02_arrow_down_thin_filled")
    }

    pub fn continue_button() -> Locator {
        Locator::role_exact("button", "Lanjutkan")
    }

    pub fn pay_now() -> Locator {
        Locator::role_exact("button", "Bayar Sekarang")
    }

    /// Alternate confirmation state shown instead of a redirect
    pub fn confirm_marker() -> Locator {
        Locator::css(r#"button:has-text("Konfirmasi")"#)
    }

    pub fn confirm_button() -> Locator {
        Locator::role("button", "konfirmasi")
    }

    pub fn simulate_candidates() -> Vec<Locator> {
        vec![
            Locator::test_id("simulate-button"),
            Locator::css(r#"button:has-text("Simulate")"#),
            Locator::css(r#"[data-testid*="simulate"]"#),
            Locator::css(r#"button[class*="simulate"]"#),
        ]
    }

    /// "Lanjutkan Pembayaran" on the payment instruction page
    pub fn continue_payment_candidates() -> Vec<Locator> {
        vec![
            Locator::role("button", "lanjutkan pembayaran"),
            Locator::text("Lanjutkan Pembayaran"),
        ]
    }

    pub fn otp_inputs() -> Locator {
        Locator::css(r#"input[type="text"], input[type="tel"], input:not([type])"#)
    }

    pub fn check_status() -> Locator {
        Locator::role("button", "cek status")
    }

    pub fn back_home() -> Locator {
        Locator::role("button", "kembali ke beranda")
    }

    pub fn body() -> Locator {
        Locator::css("body")
    }
}

const PAYMENT_SELECTION_SETTLE: Duration = Duration::from_secs(2);
const NETWORK_IDLE_BUDGET: Duration = Duration::from_secs(30);
const INSTRUCTION_SETTLE: Duration = Duration::from_secs(3);
const SIMULATION_SETTLE: Duration = Duration::from_secs(5);
const OTP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const BODY_PREVIEW_CHARS: usize = 500;

/// Result of a single checkout step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// Everything a checkout run observed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutReport {
    pub order_id: Option<String>,
    pub otp_required: bool,
    /// Attempts the pay click needed
    pub pay_attempts: Option<u32>,
    /// Condition that confirmed the pay click
    pub pay_confirmed_by: Option<String>,
    /// "Cek Status" clicks before the order completed
    pub status_checks: Option<u32>,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
    /// Step in flight and when it started
    #[serde(skip)]
    pub current_step: Option<(String, tokio::time::Instant)>,
}

impl CheckoutReport {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

struct Patterns {
    pay_triggered: Regex,
    otp_page: Regex,
    order_page: Regex,
    order_id: Regex,
    home: Regex,
}

impl Patterns {
    fn new(base_url: &str) -> E2eResult<Self> {
        let home = format!("{}/?$", regex::escape(base_url.trim_end_matches('/')));
        Ok(Self {
            pay_triggered: Regex::new(selectors::PAY_TRIGGERED)?,
            otp_page: Regex::new(selectors::OTP_PAGE)?,
            order_page: Regex::new(selectors::ORDER_PAGE)?,
            order_id: Regex::new(selectors::ORDER_ID)?,
            home: Regex::new(&home)?,
        })
    }
}

/// Drives one purchase through the storefront
pub struct CheckoutFlow {
    driver: Arc<dyn BrowserDriver>,
    clock: Arc<dyn Clock>,
    timeouts: Timeouts,
    pay_retry: RetryPolicy,
    status_poll: PollPolicy,
    screenshot_dir: PathBuf,
    /// Prefix for debug screenshots, keeps parallel jobs apart
    label: String,
    patterns: Patterns,
}

impl CheckoutFlow {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: &SuiteConfig) -> E2eResult<Self> {
        Ok(Self {
            driver,
            clock: Arc::new(TokioClock),
            timeouts: config.timeouts.clone(),
            pay_retry: config.pay_retry.clone(),
            status_poll: config.status_poll.clone(),
            screenshot_dir: config.screenshot_dir(),
            label: String::new(),
            patterns: Patterns::new(&config.base_url)?,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run every step, stopping at the first failure
    pub async fn run(&self, scenario: &ResolvedScenario) -> CheckoutReport {
        let mut report = CheckoutReport::default();
        self.execute(scenario, &mut report).await;
        report
    }

    /// Same as [`run`](Self::run), recording into `report` as steps finish.
    /// A caller that drops this future keeps every finished step and can
    /// hand the report to [`interrupt`](Self::interrupt).
    pub async fn execute(&self, scenario: &ResolvedScenario, report: &mut CheckoutReport) {
        info!(
            "Checkout: {} via {} ({})",
            scenario.product.name, scenario.payment.name, scenario.name
        );
        if let Err(e) = self.run_steps(scenario, report).await {
            report.error = Some(e.to_string());
        }
    }

    /// Fail the step that was in flight when an [`execute`](Self::execute)
    /// run was cut short by `reason`
    pub async fn interrupt(&self, report: &mut CheckoutReport, reason: E2eError) {
        let location = self.location().await;
        let reason = format!("{} at {}", reason, location);

        let error = match report.current_step.take() {
            Some((name, start)) => {
                let index = report.steps.len() + 1;
                let duration_ms = self.clock.elapsed_since(start).as_millis() as u64;
                let screenshot_path = self.capture_failure(index, &name).await;
                report.steps.push(StepResult {
                    success: false,
                    step_name: name.clone(),
                    duration_ms,
                    error: Some(reason.clone()),
                    screenshot_path,
                });
                E2eError::StepFailed { step: name, reason }
            }
            None => E2eError::AssertionFailed(reason),
        };
        report.error = Some(error.to_string());
    }

    async fn run_steps(&self, scenario: &ResolvedScenario, report: &mut CheckoutReport) -> E2eResult<()> {
        self.step(report, "open-product", self.open_product(&scenario.product))
            .await?;
        self.step(report, "fill-customer", self.fill_customer(&scenario.customer))
            .await?;
        self.step(report, "select-payment", self.select_payment(&scenario.payment))
            .await?;

        let pay = self.step(report, "pay-now", self.pay_now()).await?;
        report.pay_attempts = Some(pay.attempts);
        report.pay_confirmed_by = pay.matched_condition;

        self.step(report, "confirm", self.confirm_if_present()).await?;

        let simulated = scenario.payment.requires_simulation;
        if simulated {
            self.step(report, "continue-payment", self.continue_payment_if_present())
                .await?;
            self.step(report, "simulate-payment", self.simulate_payment())
                .await?;
        }

        let on_otp_page = self
            .step(report, "await-redirect", self.await_redirect(simulated))
            .await?;
        if on_otp_page != scenario.payment.requires_otp {
            warn!(
                "{}: OTP page {} although requires_otp is {}",
                scenario.payment.name,
                if on_otp_page { "shown" } else { "skipped" },
                scenario.payment.requires_otp
            );
        }
        if on_otp_page {
            report.otp_required = true;
            self.step(report, "enter-otp", self.enter_otp(&scenario.otp))
                .await?;
        }

        let order_id = self.step(report, "order-page", self.order_page()).await?;
        report.order_id = Some(order_id);

        let status = self.step(report, "poll-status", self.poll_status()).await?;
        report.status_checks = Some(status.probe_count);

        self.step(report, "return-home", self.return_home()).await?;
        Ok(())
    }

    /// Time a step and record it; a failure gets a debug screenshot
    async fn step<T>(
        &self,
        report: &mut CheckoutReport,
        name: &str,
        fut: impl Future<Output = E2eResult<T>>,
    ) -> E2eResult<T> {
        let index = report.steps.len() + 1;
        info!("STEP {}: {}", index, name);
        let start = self.clock.now();
        report.current_step = Some((name.to_string(), start));
        let result = fut.await;
        report.current_step = None;
        let duration_ms = self.clock.elapsed_since(start).as_millis() as u64;

        match result {
            Ok(value) => {
                report.steps.push(StepResult {
                    success: true,
                    step_name: name.to_string(),
                    duration_ms,
                    error: None,
                    screenshot_path: None,
                });
                Ok(value)
            }
            Err(e) => {
                let screenshot_path = self.capture_failure(index, name).await;
                report.steps.push(StepResult {
                    success: false,
                    step_name: name.to_string(),
                    duration_ms,
                    error: Some(e.to_string()),
                    screenshot_path,
                });
                Err(E2eError::StepFailed {
                    step: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn capture_failure(&self, index: usize, name: &str) -> Option<PathBuf> {
        let url = self.location().await;
        warn!("Step {} ({}) failed at {}", index, name, url);

        if let Ok(Some(body)) = self.driver.text_content(&selectors::body()).await {
            let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
            debug!("Page content: {}", preview);
        }

        if let Err(e) = std::fs::create_dir_all(&self.screenshot_dir) {
            warn!("Cannot create {}: {}", self.screenshot_dir.display(), e);
            return None;
        }
        let path = self
            .screenshot_dir
            .join(format!("{}debug-step{}-{}.png", self.label, index, name));
        match self.driver.screenshot(&path, true).await {
            Ok(()) => {
                info!("Screenshot saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        }
    }

    async fn location(&self) -> String {
        self.driver
            .current_url()
            .await
            .unwrap_or_else(|e| format!("<unknown: {}>", e))
    }

    async fn open_product(&self, product: &Product) -> E2eResult<()> {
        self.driver.goto("/").await?;
        self.dismiss_modal().await;
        self.driver
            .click(&selectors::product_link(&product.name), ClickOptions::default())
            .await?;
        self.driver
            .click(&selectors::product_image(&product.image_alt), ClickOptions::default())
            .await?;
        Ok(())
    }

    /// Close the promotional overlay if the homepage shows one
    async fn dismiss_modal(&self) {
        let modal = selectors::promo_modal();
        if self.driver.is_visible(&modal).await.unwrap_or(false) {
            match self.driver.click(&modal, ClickOptions::forced()).await {
                Ok(()) => debug!("Promo modal closed"),
                Err(e) => debug!("Promo modal did not close: {}", e),
            }
        }
    }

    async fn fill_customer(&self, customer: &CustomerData) -> E2eResult<()> {
        self.driver.fill(&selectors::player_id(), &customer.player_id).await?;
        self.driver.fill(&selectors::zone_id(), &customer.zone_id).await?;
        self.driver.fill(&selectors::email(), &customer.email).await?;
        self.driver.fill(&selectors::phone(), &customer.phone).await?;
        Ok(())
    }

    async fn select_payment(&self, payment: &PaymentMethod) -> E2eResult<()> {
        let option = selectors::payment_option(&payment.selector);
        if !self
            .driver
            .wait_for_visible(&option, self.timeouts.confirm())
            .await?
        {
            return Err(E2eError::AssertionFailed(format!(
                "payment option {} not visible",
                payment.name
            )));
        }
        self.driver.click(&option, ClickOptions::default()).await?;

        let arrow = selectors::expand_arrow();
        if self.driver.is_visible(&arrow).await.unwrap_or(false) {
            self.driver.click(&arrow, ClickOptions::default()).await?;
        }

        self.driver
            .click(&selectors::continue_button(), ClickOptions::default())
            .await?;

        self.settle_network().await;
        self.clock.sleep(PAYMENT_SELECTION_SETTLE).await;
        Ok(())
    }

    /// Best-effort wait for network idle
    async fn settle_network(&self) {
        match self
            .driver
            .wait_for_load_state(LoadState::NetworkIdle, NETWORK_IDLE_BUDGET)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Network never went idle, continuing"),
            Err(e) => debug!("Load state wait failed: {}", e),
        }
    }

    /// Click "Bayar Sekarang" until the page reacts
    async fn pay_now(&self) -> E2eResult<RetryOutcome> {
        let button = selectors::pay_now();
        if !self
            .driver
            .wait_for_visible(&button, self.timeouts.long())
            .await?
        {
            return Err(E2eError::AssertionFailed(
                "Bayar Sekarang button not visible".to_string(),
            ));
        }

        let action = ClickAction::new(self.driver.clone(), button, ClickOptions::forced());
        let conditions: Vec<Box<dyn SuccessCondition>> = vec![
            Box::new(UrlMatches::new(
                self.driver.clone(),
                self.patterns.pay_triggered.clone(),
            )),
            Box::new(ElementVisible::new(
                self.driver.clone(),
                selectors::confirm_marker(),
            )),
        ];

        let retrier = ActionRetrier::with_clock(self.pay_retry.clone(), self.clock.clone());
        let outcome = retrier.run(&action, &conditions).await;
        let location = self.location().await;
        outcome.ensure_succeeded("click Bayar Sekarang", location)
    }

    async fn confirm_if_present(&self) -> E2eResult<()> {
        let confirm = selectors::confirm_button();
        if !self.driver.is_visible(&confirm).await.unwrap_or(false) {
            info!("No Konfirmasi button, continuing");
            return Ok(());
        }

        if !self
            .driver
            .wait_for_enabled(&confirm, self.timeouts.medium())
            .await?
        {
            return Err(E2eError::AssertionFailed(
                "Konfirmasi button never became enabled".to_string(),
            ));
        }

        if let Err(e) = self.driver.click(&confirm, ClickOptions::dom()).await {
            debug!("DOM click on Konfirmasi failed ({}), forcing", e);
            self.driver.click(&confirm, ClickOptions::forced()).await?;
        }
        info!("Konfirmasi clicked");
        Ok(())
    }

    /// Leave the payment instruction page if the storefront shows one
    async fn continue_payment_if_present(&self) -> E2eResult<()> {
        for candidate in selectors::continue_payment_candidates() {
            if self.driver.is_visible(&candidate).await.unwrap_or(false) {
                info!("Instruction page, clicking {}", candidate);
                self.driver.click(&candidate, ClickOptions::default()).await?;
                self.clock.sleep(INSTRUCTION_SETTLE).await;
                self.settle_network().await;
                return Ok(());
            }
        }
        debug!("No instruction page");
        Ok(())
    }

    /// Settle a QRIS payment through the staging simulator
    async fn simulate_payment(&self) -> E2eResult<()> {
        let candidates = selectors::simulate_candidates();
        match first_visible(self.driver.as_ref(), &candidates, self.timeouts.short()).await {
            Some(button) => {
                info!("Simulating payment via {}", button);
                self.driver.click(&button, ClickOptions::forced()).await?;
                self.clock.sleep(SIMULATION_SETTLE).await;
            }
            None => {
                let location = self.location().await;
                warn!("No simulate button at {}, continuing", location);
            }
        }
        Ok(())
    }

    /// Wait for the OTP page or the order page, whichever comes first.
    /// After a simulated payment the order page may also show up as its
    /// status buttons before the URL settles. Returns true on the OTP page.
    async fn await_redirect(&self, simulated: bool) -> E2eResult<bool> {
        let mut conditions: Vec<Box<dyn SuccessCondition>> = vec![
            Box::new(UrlMatches::new(self.driver.clone(), self.patterns.otp_page.clone())),
            Box::new(UrlMatches::new(self.driver.clone(), self.patterns.order_page.clone())),
        ];
        if simulated {
            conditions.push(Box::new(ElementVisible::new(
                self.driver.clone(),
                selectors::check_status(),
            )));
            conditions.push(Box::new(ElementVisible::new(
                self.driver.clone(),
                selectors::back_home(),
            )));
        }
        let budget = self.timeouts.redirect();
        let result = race(self.clock.as_ref(), &conditions, budget).await;

        let location = self.location().await;
        match result.winner {
            Some(winner) => {
                debug!("Redirect confirmed by {}", winner);
                Ok(self.patterns.otp_page.is_match(&location))
            }
            None => Err(E2eError::Timeout(format!(
                "no OTP or order page within {:?}, at {}",
                budget, location
            ))),
        }
    }

    async fn enter_otp(&self, digits: &[String]) -> E2eResult<()> {
        let inputs = selectors::otp_inputs();
        let terminal = CountAtLeast::new(self.driver.clone(), inputs.clone(), 1);
        let poller = StatusPoller::with_clock(
            PollPolicy::new(OTP_POLL_INTERVAL, self.timeouts.expect()),
            self.clock.clone(),
        );
        let outcome = poller.run(None, &terminal).await;
        self.require(outcome, "OTP inputs").await?;

        let count = self.driver.count(&inputs).await?;
        info!("Entering OTP into {} input(s)", count);
        for (index, digit) in digits.iter().enumerate().take(count) {
            self.driver.fill(&inputs.nth(index), digit).await?;
        }

        let confirm = selectors::confirm_button();
        if self.driver.is_visible(&confirm).await.unwrap_or(false)
            && self
                .driver
                .wait_for_enabled(&confirm, self.timeouts.confirm())
                .await?
        {
            self.driver.click(&confirm, ClickOptions::forced()).await?;
        }
        Ok(())
    }

    async fn order_page(&self) -> E2eResult<String> {
        if !self
            .driver
            .wait_for_url(&self.patterns.order_id, self.timeouts.very_long())
            .await?
        {
            let location = self.location().await;
            return Err(E2eError::Timeout(format!("order page not reached, at {}", location)));
        }

        let url = self.driver.current_url().await?;
        let order_id = self
            .patterns
            .order_id
            .captures(&url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| E2eError::AssertionFailed(format!("no order id in {}", url)))?;
        info!("ORDER ID: {}", order_id);
        Ok(order_id)
    }

    /// Press "Cek Status" until "Kembali Ke Beranda" shows up
    async fn poll_status(&self) -> E2eResult<PollOutcome> {
        let probe = VisibleProbe::new(self.driver.clone(), selectors::check_status());
        let terminal = ElementVisible::new(self.driver.clone(), selectors::back_home());
        let poller = StatusPoller::with_clock(self.status_poll.clone(), self.clock.clone());

        let outcome = poller.run(Some(&probe as &dyn Probe), &terminal).await;
        if !outcome.completed {
            warn!(
                "Order not completed after {} status check(s), confirming once more",
                outcome.probe_count
            );
        }

        let confirmed = self
            .driver
            .wait_for_visible(&selectors::back_home(), self.timeouts.confirm())
            .await?;
        if confirmed {
            return Ok(outcome);
        }
        let outcome = self.require(outcome, "order completion").await?;
        Err(E2eError::AssertionFailed(format!(
            "Kembali Ke Beranda disappeared after {} status check(s)",
            outcome.probe_count
        )))
    }

    async fn return_home(&self) -> E2eResult<()> {
        self.driver
            .click(&selectors::back_home(), ClickOptions::forced())
            .await?;
        if !self
            .driver
            .wait_for_url(&self.patterns.home, self.timeouts.medium())
            .await?
        {
            let location = self.location().await;
            return Err(E2eError::AssertionFailed(format!(
                "expected the homepage, at {}",
                location
            )));
        }
        Ok(())
    }

    async fn require(&self, outcome: PollOutcome, what: &str) -> E2eResult<PollOutcome> {
        if outcome.completed {
            return Ok(outcome);
        }
        let location = self.location().await;
        outcome.into_result(what, location)
    }
}
