//! Deadline-bounded polling until a terminal marker appears

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::condition::{Check, Probe, TerminalCondition};
use crate::error::{E2eError, E2eResult};

/// Pacing for a [`StatusPoller`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Fixed delay between cycles
    pub interval_ms: u64,

    /// Wall-clock budget for the whole run
    pub deadline_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            deadline_ms: 120_000,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            deadline_ms: deadline.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Terminal state of a polling run. A run is `Running` only inside
/// [`StatusPoller::run`]; callers only ever observe the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Completed,
    TimedOut,
}

/// Result of one [`StatusPoller::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub elapsed_ms: u64,
    /// Times the probe was fired
    pub probe_count: u32,
    pub completed: bool,
    /// Terminal or probe evaluations that failed and were treated as not-yet
    pub evaluation_errors: u32,
}

impl PollOutcome {
    pub fn state(&self) -> PollState {
        if self.completed {
            PollState::Completed
        } else {
            PollState::TimedOut
        }
    }

    /// Turn a timed-out run into [`E2eError::DeadlineExceeded`].
    pub fn into_result(self, what: &str, location: impl Into<String>) -> E2eResult<Self> {
        match self.state() {
            PollState::Completed => Ok(self),
            PollState::TimedOut => Err(E2eError::DeadlineExceeded {
                what: what.to_string(),
                elapsed_ms: self.elapsed_ms,
                probes: self.probe_count,
                location: location.into(),
            }),
        }
    }
}

/// Repeatedly checks a terminal condition and nudges the page with an
/// optional probe until the condition holds or the deadline elapses.
///
/// Each cycle checks the terminal condition before the probe, so a probe is
/// never fired once the terminal state has been reached. Every await in a
/// cycle is bounded by the remaining budget.
pub struct StatusPoller {
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
}

impl StatusPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self::with_clock(policy, Arc::new(TokioClock))
    }

    pub fn with_clock(policy: PollPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub async fn run(
        &self,
        probe: Option<&dyn Probe>,
        terminal: &dyn TerminalCondition,
    ) -> PollOutcome {
        let start = self.clock.now();
        let deadline = self.policy.deadline();
        let interval = self.policy.interval();
        let terminal_name = terminal.name();

        let mut probe_count = 0;
        let mut evaluation_errors = 0;

        let outcome = |completed: bool, probe_count: u32, evaluation_errors: u32| PollOutcome {
            elapsed_ms: self.clock.elapsed_since(start).as_millis() as u64,
            probe_count,
            completed,
            evaluation_errors,
        };

        loop {
            let Some(remaining) = deadline.checked_sub(self.clock.elapsed_since(start)).filter(|r| !r.is_zero())
            else {
                break;
            };

            match self.bounded(remaining, terminal.check()).await {
                Some(Check::Met) => {
                    info!(
                        "{} reached after {} probe(s) ({} ms)",
                        terminal_name,
                        probe_count,
                        self.clock.elapsed_since(start).as_millis()
                    );
                    return outcome(true, probe_count, evaluation_errors);
                }
                Some(Check::NotYet) => {}
                Some(failed) => {
                    evaluation_errors += 1;
                    if let Some(err) = failed.evaluation_error(&terminal_name) {
                        warn!("{}", err);
                    }
                }
                None => break,
            }

            if let Some(probe) = probe {
                let remaining = self.remaining(start, deadline);
                match self.bounded(remaining, probe.is_available()).await {
                    Some(Check::Met) => {
                        let remaining = self.remaining(start, deadline);
                        match self.bounded(remaining, probe.fire()).await {
                            Some(Ok(())) => {
                                probe_count += 1;
                                debug!("Probe #{}: {}", probe_count, probe.name());
                            }
                            Some(Err(e)) => {
                                evaluation_errors += 1;
                                warn!("Probe {} failed: {}", probe.name(), e);
                            }
                            None => break,
                        }
                    }
                    Some(Check::NotYet) => debug!("Probe {} not present", probe.name()),
                    Some(failed) => {
                        evaluation_errors += 1;
                        if let Some(err) = failed.evaluation_error(&probe.name()) {
                            debug!("{}", err);
                        }
                    }
                    None => break,
                }
            }

            let remaining = self.remaining(start, deadline);
            if remaining.is_zero() {
                break;
            }
            self.clock.sleep(interval.min(remaining)).await;
        }

        warn!(
            "{} not reached within {:?} ({} probe(s))",
            terminal_name, deadline, probe_count
        );
        outcome(false, probe_count, evaluation_errors)
    }

    fn remaining(&self, start: tokio::time::Instant, deadline: Duration) -> Duration {
        deadline.saturating_sub(self.clock.elapsed_since(start))
    }

    /// Run `fut` unless `budget` elapses first.
    async fn bounded<F: Future>(&self, budget: Duration, fut: F) -> Option<F::Output> {
        tokio::select! {
            out = fut => Some(out),
            _ = self.clock.sleep(budget) => None,
        }
    }
}
