use std::time::Duration;

use snapstep_engine::{CaptureMode, SessionConfig, DEFAULT_EVENT_TIMEOUT, DEFAULT_MAX_STEPS};
use tracing::info;

#[test]
fn test_default_config() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");
    let config = SessionConfig::default();

    assert_eq!(config.max_steps, 500);
    assert_eq!(config.event_timeout, Duration::from_secs(5));
    assert_eq!(config.capture_mode, CaptureMode::Cumulative);
}

#[test]
fn test_config_with_custom_values() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");
    let config = SessionConfig::new("Fib")
        .with_max_steps(20)
        .with_event_timeout(Duration::from_millis(250))
        .with_capture_mode(CaptureMode::Delta);

    assert_eq!(config.entry_scope, "Fib");
    assert_eq!(config.max_steps, 20);
    assert_eq!(config.event_timeout, Duration::from_millis(250));
    assert_eq!(config.capture_mode, CaptureMode::Delta);
}

#[test]
fn test_config_new_keeps_defaults() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");
    let config = SessionConfig::new("Add");

    assert_eq!(config.max_steps, DEFAULT_MAX_STEPS);
    assert_eq!(config.event_timeout, DEFAULT_EVENT_TIMEOUT);
    assert_eq!(config.clone(), config);
}
