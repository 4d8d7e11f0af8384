//! Storefront reachability check run before any browser is launched

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::{Clock, TokioClock};
use crate::condition::{check_fn, Check};
use crate::error::{E2eError, E2eResult};
use crate::poll::{PollPolicy, StatusPoller};

/// Polls the storefront homepage over HTTP until it answers
pub struct SiteCheck {
    base_url: String,
    client: reqwest::Client,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
}

impl SiteCheck {
    pub fn new(base_url: impl Into<String>, policy: PollPolicy) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            policy,
            clock: Arc::new(TokioClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wait until the homepage returns a success status. Returns the number
    /// of requests made.
    pub async fn ensure_reachable(&self) -> E2eResult<u32> {
        let attempts = Arc::new(AtomicU32::new(0));
        let url = self.base_url.clone();

        let terminal = check_fn(format!("reachable({})", url), {
            let attempts = attempts.clone();
            let client = self.client.clone();
            move || {
                let attempts = attempts.clone();
                let client = client.clone();
                let url = url.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    match client.get(&url).send().await {
                        Ok(resp) if resp.status().is_success() => Check::Met,
                        Ok(resp) => {
                            warn!("{} returned {}", url, resp.status());
                            Check::NotYet
                        }
                        Err(e) if e.is_connect() || e.is_timeout() => {
                            if n == 1 {
                                info!("Waiting for {} to answer...", url);
                            }
                            Check::NotYet
                        }
                        Err(e) => Check::Failed(e.to_string()),
                    }
                }
            }
        });

        let poller = StatusPoller::with_clock(self.policy.clone(), self.clock.clone());
        let outcome = poller.run(None, &terminal).await;
        let attempts = attempts.load(Ordering::SeqCst);

        if outcome.completed {
            info!("{} is reachable ({} request(s))", self.base_url, attempts);
            Ok(attempts)
        } else {
            Err(E2eError::SiteUnreachable {
                url: self.base_url.clone(),
                attempts,
            })
        }
    }
}
