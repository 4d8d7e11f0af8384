use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sfshop_e2e::condition::{action_fn, condition_fn};
use sfshop_e2e::{ActionRetrier, Check, E2eError, RetryPolicy, SuccessCondition};
use test_case::test_case;

const BUDGET: Duration = Duration::from_millis(200);

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

/// Condition that holds once `calls` has reached `threshold`, otherwise waits
/// out its whole timeout.
fn met_after(name: &str, calls: Arc<AtomicU32>, threshold: u32) -> Box<dyn SuccessCondition> {
    Box::new(condition_fn(name, move |timeout, _cancel| {
        let calls = calls.clone();
        async move {
            if calls.load(Ordering::SeqCst) >= threshold {
                Check::Met
            } else {
                tokio::time::sleep(timeout).await;
                Check::NotYet
            }
        }
    }))
}

fn never(name: &str) -> Box<dyn SuccessCondition> {
    met_after(name, counter(), u32::MAX)
}

#[test_case(1 ; "single attempt")]
#[test_case(3 ; "default budget")]
#[test_case(5 ; "larger budget")]
#[tokio::test(start_paused = true)]
async fn exhausts_after_exactly_max_attempts(max_attempts: u32) {
    let calls = counter();
    let action = action_fn("click", {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });

    let retrier = ActionRetrier::new(RetryPolicy::new(max_attempts, BUDGET));
    let outcome = retrier.run(&action, &[never("url"), never("modal")]).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.attempts, max_attempts);
    assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
    assert!(outcome.matched_condition.is_none());
    assert_eq!(outcome.elapsed_ms, BUDGET.as_millis() as u64 * max_attempts as u64);

    let err = outcome.ensure_succeeded("click", "https://stg.sfshop.id/checkout").unwrap_err();
    assert!(matches!(err, E2eError::ActionExhausted { attempts, .. } if attempts == max_attempts));
}

#[test_case(1 ; "first attempt")]
#[test_case(2 ; "second attempt")]
#[test_case(3 ; "last attempt")]
#[tokio::test(start_paused = true)]
async fn stops_at_first_confirmed_attempt(confirmed_on: u32) {
    let calls = counter();
    let action = action_fn("click", {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });

    let conditions = vec![never("url"), met_after("modal", calls.clone(), confirmed_on)];
    let retrier = ActionRetrier::new(RetryPolicy::new(3, BUDGET));
    let outcome = retrier.run(&action, &conditions).await;

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, confirmed_on);
    assert_eq!(calls.load(Ordering::SeqCst), confirmed_on);
    assert_eq!(outcome.matched_condition.as_deref(), Some("modal"));
}

#[tokio::test(start_paused = true)]
async fn already_satisfied_condition_succeeds_on_first_attempt() {
    let retrier = ActionRetrier::new(RetryPolicy::default());
    let noop = action_fn("noop", || async { Ok(()) });
    let always = met_after("already-there", counter(), 0);

    let outcome = retrier.run(&noop, &[always]).await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.elapsed_ms, 0);
}

#[tokio::test(start_paused = true)]
async fn action_errors_count_as_failed_attempts() {
    let calls = counter();
    let waits = counter();
    let action = action_fn("click detached", {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(E2eError::Playwright("element is detached from the DOM".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    });
    let condition: Box<dyn SuccessCondition> = Box::new(condition_fn("reacted", {
        let waits = waits.clone();
        move |_timeout, _cancel| {
            let waits = waits.clone();
            async move {
                waits.fetch_add(1, Ordering::SeqCst);
                Check::Met
            }
        }
    }));

    let retrier = ActionRetrier::new(RetryPolicy::new(3, BUDGET));
    let outcome = retrier.run(&action, &[condition]).await;

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 3);
    // conditions are only raced after an attempt that did not error
    assert_eq!(waits.load(Ordering::SeqCst), 1);
    assert!(outcome
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("detached")));
}

#[tokio::test(start_paused = true)]
async fn action_error_on_every_attempt_is_reported() {
    let action = action_fn("click", || async {
        Err(E2eError::Playwright("Timeout 15000ms exceeded".to_string()))
    });
    let retrier = ActionRetrier::new(RetryPolicy::new(2, BUDGET));
    let outcome = retrier.run(&action, &[never("url")]).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.attempts, 2);
    let err = outcome.ensure_succeeded("click", "about:blank").unwrap_err();
    assert!(err.to_string().contains("Timeout 15000ms exceeded"));
}

#[tokio::test(start_paused = true)]
async fn failing_condition_does_not_end_the_race() {
    let broken: Box<dyn SuccessCondition> = Box::new(condition_fn("broken", |_t, _c| async {
        Check::Failed("Target closed".to_string())
    }));
    let late: Box<dyn SuccessCondition> = Box::new(condition_fn("late", |_t, _c| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Check::Met
    }));

    let retrier = ActionRetrier::new(RetryPolicy::new(3, BUDGET));
    let noop = action_fn("noop", || async { Ok(()) });
    let outcome = retrier.run(&noop, &[broken, late]).await;

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.matched_condition.as_deref(), Some("late"));
    assert_eq!(
        outcome.last_error.as_deref(),
        Some("Condition 'broken' could not be evaluated: Target closed")
    );
}

#[tokio::test(start_paused = true)]
async fn hung_action_is_bounded_by_attempt_budget() {
    let calls = counter();
    let action = action_fn("click Bayar Sekarang", {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    });
    let waits = counter();
    let condition = met_after("url", waits, 0);

    let retrier = ActionRetrier::new(RetryPolicy::new(3, BUDGET));
    let outcome = retrier.run(&action, &[condition]).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.elapsed_ms, 600);
    assert!(outcome
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("did not return within")));
}

#[tokio::test(start_paused = true)]
async fn empty_condition_set_never_succeeds() {
    let retrier = ActionRetrier::new(RetryPolicy::new(2, BUDGET));
    let noop = action_fn("noop", || async { Ok(()) });
    let outcome = retrier.run(&noop, &[]).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.attempts, 2);
}

/// Pay-now style run: the first click does nothing, the second opens the
/// confirmation modal instead of navigating.
#[tokio::test(start_paused = true)]
async fn second_click_confirmed_by_alternate_ui_state() {
    let clicks = counter();
    let action = action_fn("click Bayar Sekarang", {
        let clicks = clicks.clone();
        move || {
            let clicks = clicks.clone();
            async move {
                clicks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    });
    let conditions = vec![
        never(r"urlMatches(/payment|otp|order\//)"),
        met_after("elementVisible(Confirm)", clicks.clone(), 2),
    ];

    let retrier = ActionRetrier::new(RetryPolicy::new(3, Duration::from_secs(15)));
    let outcome = retrier.run(&action, &conditions).await;

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.matched_condition.as_deref(), Some("elementVisible(Confirm)"));
    assert_eq!(outcome.elapsed_ms, 15_000);
}
