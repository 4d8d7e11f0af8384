//! Actions, conditions and probes consumed by the retry and polling loops
//!
//! Every check reports a three-valued [`Check`] instead of swallowing driver
//! errors, so logs can tell "still waiting" apart from "driver malfunction".
//! Both loops treat [`Check::Failed`] as [`Check::NotYet`] for the current
//! cycle and never propagate it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{E2eError, E2eResult};

/// Outcome of evaluating a single condition once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Met,
    NotYet,
    /// The evaluation itself failed (driver error, detached element).
    Failed(String),
}

impl Check {
    pub fn is_met(&self) -> bool {
        matches!(self, Check::Met)
    }

    /// Map a driver boolean result: `Ok(true)` is met, `Ok(false)` not yet,
    /// any error becomes [`Check::Failed`].
    pub fn from_result(result: E2eResult<bool>) -> Self {
        match result {
            Ok(true) => Check::Met,
            Ok(false) => Check::NotYet,
            Err(e) => Check::Failed(e.to_string()),
        }
    }

    /// Surface a failed evaluation as an error value for logging.
    pub fn evaluation_error(&self, condition: &str) -> Option<E2eError> {
        match self {
            Check::Failed(reason) => Some(E2eError::ConditionEvaluation {
                condition: condition.to_string(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// A retryable, idempotent UI operation such as "click Bayar Sekarang".
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> String;

    async fn perform(&self) -> E2eResult<()>;
}

/// An awaitable predicate raced after each action attempt.
#[async_trait]
pub trait SuccessCondition: Send + Sync {
    /// Identifier reported back as the matched condition.
    fn name(&self) -> String;

    /// Own timeout; the per-attempt timeout applies when `None` or shorter.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Wait up to `timeout` for the predicate to hold. Implementations
    /// should return promptly once `cancel` fires.
    async fn wait(&self, timeout: Duration, cancel: CancellationToken) -> Check;
}

/// An instantaneous predicate checked once per polling cycle.
#[async_trait]
pub trait TerminalCondition: Send + Sync {
    fn name(&self) -> String;

    async fn check(&self) -> Check;
}

/// Side-effecting nudge fired on each polling cycle when its trigger is present.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> String;

    /// Whether the trigger is currently present. Absence is not an error.
    async fn is_available(&self) -> Check;

    async fn fire(&self) -> E2eResult<()>;
}

/// [`Action`] built from a closure.
pub struct ActionFn<F> {
    name: String,
    f: F,
}

pub fn action_fn<F, Fut>(name: impl Into<String>, f: F) -> ActionFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = E2eResult<()>> + Send,
{
    ActionFn { name: name.into(), f }
}

#[async_trait]
impl<F, Fut> Action for ActionFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = E2eResult<()>> + Send,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn perform(&self) -> E2eResult<()> {
        (self.f)().await
    }
}

/// [`SuccessCondition`] built from a closure taking the effective timeout
/// and a cancellation token.
pub struct ConditionFn<F> {
    name: String,
    timeout: Option<Duration>,
    f: F,
}

pub fn condition_fn<F, Fut>(name: impl Into<String>, f: F) -> ConditionFn<F>
where
    F: Fn(Duration, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Check> + Send,
{
    ConditionFn {
        name: name.into(),
        timeout: None,
        f,
    }
}

impl<F> ConditionFn<F> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl<F, Fut> SuccessCondition for ConditionFn<F>
where
    F: Fn(Duration, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Check> + Send,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn wait(&self, timeout: Duration, cancel: CancellationToken) -> Check {
        (self.f)(timeout, cancel).await
    }
}

/// [`TerminalCondition`] built from a closure.
pub struct CheckFn<F> {
    name: String,
    f: F,
}

pub fn check_fn<F, Fut>(name: impl Into<String>, f: F) -> CheckFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Check> + Send,
{
    CheckFn { name: name.into(), f }
}

#[async_trait]
impl<F, Fut> TerminalCondition for CheckFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Check> + Send,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn check(&self) -> Check {
        (self.f)().await
    }
}

/// [`Probe`] built from an availability closure and a fire closure.
pub struct ProbeFn<A, F> {
    name: String,
    available: A,
    fire: F,
}

pub fn probe_fn<A, AFut, F, FFut>(name: impl Into<String>, available: A, fire: F) -> ProbeFn<A, F>
where
    A: Fn() -> AFut + Send + Sync,
    AFut: Future<Output = Check> + Send,
    F: Fn() -> FFut + Send + Sync,
    FFut: Future<Output = E2eResult<()>> + Send,
{
    ProbeFn {
        name: name.into(),
        available,
        fire,
    }
}

#[async_trait]
impl<A, AFut, F, FFut> Probe for ProbeFn<A, F>
where
    A: Fn() -> AFut + Send + Sync,
    AFut: Future<Output = Check> + Send,
    F: Fn() -> FFut + Send + Sync,
    FFut: Future<Output = E2eResult<()>> + Send,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn is_available(&self) -> Check {
        (self.available)().await
    }

    async fn fire(&self) -> E2eResult<()> {
        (self.fire)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_from_result() {
        assert_eq!(Check::from_result(Ok(true)), Check::Met);
        assert_eq!(Check::from_result(Ok(false)), Check::NotYet);
        let failed = Check::from_result(Err(E2eError::BridgeClosed));
        assert!(matches!(failed, Check::Failed(ref r) if r.contains("bridge closed")));
    }

    #[test]
    fn test_evaluation_error_only_for_failed() {
        assert!(Check::Met.evaluation_error("x").is_none());
        assert!(Check::NotYet.evaluation_error("x").is_none());
        let err = Check::Failed("boom".into()).evaluation_error("elementVisible(Konfirmasi)");
        assert!(matches!(
            err,
            Some(E2eError::ConditionEvaluation { ref condition, .. }) if condition == "elementVisible(Konfirmasi)"
        ));
    }

    #[tokio::test]
    async fn test_closure_adapters() {
        let action = action_fn("noop", || async { Ok(()) });
        assert_eq!(action.name(), "noop");
        assert!(action.perform().await.is_ok());

        let cond = condition_fn("always", |_t, _c| async { Check::Met })
            .with_timeout(Duration::from_secs(1));
        assert_eq!(cond.timeout(), Some(Duration::from_secs(1)));
        assert!(cond.wait(Duration::from_secs(1), CancellationToken::new()).await.is_met());

        let terminal = check_fn("never", || async { Check::NotYet });
        assert_eq!(terminal.check().await, Check::NotYet);

        let probe = probe_fn("refresh", || async { Check::Met }, || async { Ok(()) });
        assert!(probe.is_available().await.is_met());
        assert!(probe.fire().await.is_ok());
    }
}
