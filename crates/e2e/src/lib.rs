//! SFShop E2E Checkout Suite
//!
//! This crate drives real purchases through the SFShop staging storefront:
//! - Controls Playwright through a persistent node bridge
//! - Parses declarative YAML checkout scenarios
//! - Retries flaky UI actions until a success condition confirms them
//! - Polls asynchronous order status up to a deadline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  E2E Suite Runner (Rust)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── preflight() -> SiteCheck over HTTP                   │
//! │    ├── DriverFactory::open(device) -> BrowserDriver         │
//! │    └── run_job(scenario, device) -> TestResult              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CheckoutFlow                                               │
//! │    ├── open product, fill customer, select payment          │
//! │    ├── ActionRetrier: "Bayar Sekarang" until URL/confirm    │
//! │    ├── race(): OTP page vs order page                       │
//! │    └── StatusPoller: "Cek Status" until order completes     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── name, description, tags                              │
//! │    ├── product, customer, payment (fixture keys)            │
//! │    └── otp, devices                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod checkout;
pub mod clock;
pub mod condition;
pub mod config;
pub mod driver;
pub mod error;
pub mod fixtures;
pub mod playwright;
pub mod poll;
pub mod retry;
pub mod runner;
pub mod site;
pub mod spec;

pub use checkout::{CheckoutFlow, CheckoutReport, StepResult};
pub use clock::{Clock, TokioClock};
pub use condition::{Action, Check, Probe, SuccessCondition, TerminalCondition};
pub use config::SuiteConfig;
pub use driver::{BrowserDriver, DriverFactory, Locator};
pub use error::{E2eError, E2eResult};
pub use poll::{PollOutcome, PollPolicy, StatusPoller};
pub use retry::{ActionRetrier, RetryOutcome, RetryPolicy};
pub use runner::{TestResult, TestRunner, TestSuiteResult};
pub use spec::Scenario;
