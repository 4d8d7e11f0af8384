//! Bounded retry of a UI action confirmed by racing success conditions

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::condition::{Action, Check, SuccessCondition};
use crate::error::{E2eError, E2eResult};

/// Retry budget for an [`ActionRetrier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of times the action is performed (at least 1)
    pub max_attempts: u32,

    /// Budget for the action itself and for the condition race after it
    pub per_attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout_ms: 15_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, per_attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            per_attempt_timeout_ms: per_attempt_timeout.as_millis() as u64,
        }
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Result of one [`ActionRetrier::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOutcome {
    /// Attempts actually performed, `1..=max_attempts`
    pub attempts: u32,
    pub succeeded: bool,
    /// Set whenever `succeeded` is true
    pub matched_condition: Option<String>,
    pub elapsed_ms: u64,
    /// Last action error or condition evaluation error, if any
    pub last_error: Option<String>,
}

impl RetryOutcome {
    /// Turn an exhausted run into [`E2eError::ActionExhausted`].
    pub fn ensure_succeeded(self, action: &str, location: impl Into<String>) -> E2eResult<Self> {
        if self.succeeded {
            Ok(self)
        } else {
            Err(E2eError::ActionExhausted {
                action: action.to_string(),
                attempts: self.attempts,
                elapsed_ms: self.elapsed_ms,
                location: location.into(),
                last_error: self.last_error,
            })
        }
    }
}

/// Result of racing a set of success conditions once.
#[derive(Debug, Default)]
pub struct RaceResult {
    pub winner: Option<String>,
    /// [`E2eError::ConditionEvaluation`] for each branch whose check failed
    pub failures: Vec<E2eError>,
}

/// Race `conditions` for at most `budget`. The first condition reporting
/// [`Check::Met`] wins; `NotYet` and `Failed` branches drop out of the race
/// without ending it. Losing branches see their token cancelled and get one
/// last poll before they are dropped.
pub async fn race(
    clock: &dyn Clock,
    conditions: &[Box<dyn SuccessCondition>],
    budget: Duration,
) -> RaceResult {
    let cancel = CancellationToken::new();
    let mut failures = Vec::new();

    let mut pending: FuturesUnordered<_> = conditions
        .iter()
        .map(|condition| {
            let timeout = condition
                .timeout()
                .map_or(budget, |own| own.min(budget));
            let token = cancel.child_token();
            async move { (condition.name(), condition.wait(timeout, token).await) }
        })
        .collect();

    let winner = {
        let first_met = async {
            while let Some((name, check)) = pending.next().await {
                match check {
                    Check::Met => return Some(name),
                    Check::NotYet => debug!("Condition {} not met", name),
                    failed => {
                        if let Some(err) = failed.evaluation_error(&name) {
                            warn!("{}", err);
                            failures.push(err);
                        }
                    }
                }
            }
            None
        };

        tokio::select! {
            winner = first_met => winner,
            _ = clock.sleep(budget) => None,
        }
    };

    cancel.cancel();
    while let Some(Some((name, _))) = pending.next().now_or_never() {
        debug!("Condition {} released after cancellation", name);
    }
    RaceResult { winner, failures }
}

/// Performs an action up to `max_attempts` times, racing the success
/// conditions after each attempt and stopping at the first that holds.
pub struct ActionRetrier {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ActionRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_clock(policy, Arc::new(TokioClock))
    }

    pub fn with_clock(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run(
        &self,
        action: &dyn Action,
        conditions: &[Box<dyn SuccessCondition>],
    ) -> RetryOutcome {
        let start = self.clock.now();
        let max_attempts = self.policy.attempts();
        let budget = self.policy.per_attempt_timeout();
        let action_name = action.name();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!("Attempt {}/{}: {}", attempt, max_attempts, action_name);

            let performed = tokio::select! {
                result = action.perform() => result,
                _ = self.clock.sleep(budget) => Err(E2eError::Timeout(format!(
                    "'{}' did not return within {:?}",
                    action_name, budget
                ))),
            };
            if let Err(e) = performed {
                warn!("Attempt {} of '{}' failed: {}", attempt, action_name, e);
                last_error = Some(e.to_string());
                continue;
            }

            let result = race(self.clock.as_ref(), conditions, budget).await;
            if let Some(err) = result.failures.last() {
                last_error = Some(err.to_string());
            }

            if let Some(matched) = result.winner {
                info!("'{}' confirmed by {} on attempt {}", action_name, matched, attempt);
                return RetryOutcome {
                    attempts: attempt,
                    succeeded: true,
                    matched_condition: Some(matched),
                    elapsed_ms: self.clock.elapsed_since(start).as_millis() as u64,
                    last_error,
                };
            }

            warn!("Attempt {} of '{}' not confirmed within {:?}", attempt, action_name, budget);
        }

        RetryOutcome {
            attempts: max_attempts,
            succeeded: false,
            matched_condition: None,
            elapsed_ms: self.clock.elapsed_since(start).as_millis() as u64,
            last_error,
        }
    }
}
