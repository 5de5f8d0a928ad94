use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use ssobroker::error::BrokerError;
use ssobroker::util::retry::RetryPolicy;

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
        ..RetryPolicy::default()
    }
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_exhaust_the_budget() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;

    let err = policy(3)
        .execute(move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(BrokerError::Network(format!("attempt {n}")))
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(matches!(err, BrokerError::Network(ref msg) if msg == "attempt 4"));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_returns_immediately() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;

    let err = policy(3)
        .execute(move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(BrokerError::Validation("bad input".to_string()))
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(err, BrokerError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_transient_failures() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;

    let value = policy(3)
        .execute(move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BrokerError::Server {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn none_policy_makes_a_single_attempt() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;

    let result = RetryPolicy::none()
        .execute(move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(BrokerError::Network("down".to_string()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_hint_raises_the_delay() {
    let started = tokio::time::Instant::now();
    let counter = AtomicU32::new(0);
    let attempts = &counter;

    policy(1)
        .execute(move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BrokerError::RateLimited {
                    message: "throttled".to_string(),
                    retry_after: Some(Duration::from_secs(7)),
                })
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn custom_classifier_overrides_default() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;
    let policy = RetryPolicy {
        is_retryable: |err| matches!(err, BrokerError::Validation(_)),
        ..policy(2)
    };

    let result = policy
        .execute(move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(BrokerError::Validation("flaky".to_string()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
