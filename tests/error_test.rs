//! Tests for error classification — transient vs. permanent, retry hints.

use std::time::Duration;

use sleipnir::{LoadError, SleipnirError};

#[test]
fn transient_errors() {
    assert!(SleipnirError::RateLimited { retry_after: None }.is_transient());
    assert!(
        SleipnirError::RateLimited {
            retry_after: Some(Duration::from_secs(1))
        }
        .is_transient()
    );
    assert!(SleipnirError::Http("connection reset".into()).is_transient());
    assert!(SleipnirError::Timeout(Duration::from_secs(30)).is_transient());
    assert!(
        SleipnirError::Api {
            status: 500,
            message: "internal".into()
        }
        .is_transient()
    );
    assert!(
        SleipnirError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient()
    );
    assert!(
        SleipnirError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_transient()
    );
    assert!(
        SleipnirError::Api {
            status: 408,
            message: "request timeout".into()
        }
        .is_transient()
    );
}

#[test]
fn permanent_errors() {
    assert!(!SleipnirError::InvalidInput("bad".into()).is_transient());
    assert!(!SleipnirError::ModelNotFound("x".into()).is_transient());
    assert!(!SleipnirError::NoTarget.is_transient());
    assert!(!SleipnirError::UnknownTarget("x".into()).is_transient());
    assert!(!SleipnirError::Configuration("x".into()).is_transient());
    assert!(
        !SleipnirError::BreakerOpen {
            target: "primary".into()
        }
        .is_transient()
    );
    assert!(
        !SleipnirError::Api {
            status: 400,
            message: "validation".into()
        }
        .is_transient()
    );
    assert!(
        !SleipnirError::Api {
            status: 404,
            message: "no such model".into()
        }
        .is_transient()
    );
}

#[test]
fn load_errors_are_permanent() {
    // Retrying a load failure is the lifecycle coordinator's domain,
    // not the retry policy's.
    let timeout = SleipnirError::Load(LoadError::Timeout {
        model: "m1".into(),
        base_url: "http://localhost".into(),
        timeout_ms: 2000,
    });
    assert!(!timeout.is_transient());
    assert!(
        !SleipnirError::Load(LoadError::NoAdmin { model: "m1".into() }).is_transient()
    );
}

#[test]
fn retry_after_hint_only_on_rate_limited() {
    let hint = Duration::from_secs(3);
    assert_eq!(
        SleipnirError::RateLimited {
            retry_after: Some(hint)
        }
        .retry_after(),
        Some(hint)
    );
    assert_eq!(
        SleipnirError::RateLimited { retry_after: None }.retry_after(),
        None
    );
    assert_eq!(SleipnirError::Http("reset".into()).retry_after(), None);
}

#[test]
fn display_formats() {
    let err = SleipnirError::BreakerOpen {
        target: "primary".into(),
    };
    assert_eq!(err.to_string(), "circuit breaker open for target 'primary'");

    let err = SleipnirError::Load(LoadError::Timeout {
        model: "m1".into(),
        base_url: "http://host:1234".into(),
        timeout_ms: 2000,
    });
    assert_eq!(
        err.to_string(),
        "model 'm1' not loaded on http://host:1234 after 2000ms"
    );
}
