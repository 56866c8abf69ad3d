#![cfg(feature = "serde")]

use faultline::{
    BulkheadConfig, BulkheadSettings, CircuitBreakerConfig, CircuitBreakerSettings, TimeoutPolicy,
    TimeoutSettings,
};
use std::time::Duration;

#[test]
fn breaker_settings_fill_missing_fields_with_defaults() {
    let settings: CircuitBreakerSettings =
        serde_json::from_str(r#"{"failure_threshold": 3, "timeout_ms": 1500}"#).unwrap();
    let config = CircuitBreakerConfig::try_from(settings).unwrap();

    assert_eq!(config.failure_threshold(), 3);
    assert_eq!(config.timeout(), Duration::from_millis(1500));
    assert_eq!(config.success_threshold(), 1);
    assert_eq!(config.half_open_max_calls(), 1);
}

#[test]
fn unknown_fields_are_rejected() {
    let err = serde_json::from_str::<BulkheadSettings>(r#"{"max_concurent": 4}"#).unwrap_err();
    assert!(err.to_string().contains("unknown field"));
}

#[test]
fn invalid_values_surface_as_configuration_errors() {
    let settings: BulkheadSettings = serde_json::from_str(r#"{"max_concurrent": 0}"#).unwrap();
    let err = BulkheadConfig::try_from(settings).unwrap_err();
    assert_eq!(err.field, "max_concurrent");

    let err = TimeoutPolicy::try_from(TimeoutSettings { timeout_ms: 0 }).unwrap_err();
    assert_eq!(err.field, "timeout");
}

#[test]
fn settings_serialize_back_to_json() {
    let settings = BulkheadSettings::default();
    let json = serde_json::to_value(&settings).unwrap();
    assert_eq!(json["max_concurrent"], 10);
    assert_eq!(json["max_queue_size"], 100);
    assert_eq!(json["queue_timeout_ms"], 5000);

    let policy = TimeoutPolicy::try_from(TimeoutSettings { timeout_ms: 250 }).unwrap();
    assert_eq!(policy.duration(), Duration::from_millis(250));
}

#[test]
fn empty_timeout_settings_use_default_duration() {
    let settings: TimeoutSettings = serde_json::from_str("{}").unwrap();
    let policy = TimeoutPolicy::try_from(settings).unwrap();
    assert_eq!(policy.duration(), Duration::from_secs(30));
}
