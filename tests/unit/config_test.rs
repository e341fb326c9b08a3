//! Tests for configuration validation

use std::time::Duration;

use gen_dispatch::config::DispatchConfig;

#[test]
fn test_defaults_are_valid() {
    let cfg = DispatchConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.backend_timeout(), Duration::from_secs(120));
    assert_eq!(cfg.sweep_backend_timeout(), Duration::from_secs(600));
    assert_eq!(cfg.drain_backstop(), Duration::from_secs(2));
}

#[test]
fn test_invalid_max_concurrent() {
    let cfg = DispatchConfig {
        max_concurrent: 0,
        ..DispatchConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_max_sweep_points_bounds() {
    assert_eq!(DispatchConfig::default().max_sweep_points, 100_000);
    let zero = DispatchConfig {
        max_sweep_points: 0,
        ..DispatchConfig::default()
    };
    assert!(zero.validate().is_err());
    let huge = DispatchConfig {
        max_sweep_points: usize::MAX,
        ..DispatchConfig::default()
    };
    assert!(huge.validate().is_err());
}

#[test]
fn test_invalid_output_format() {
    let cfg = DispatchConfig {
        output_format: ".png".to_string(),
        ..DispatchConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_fills_defaults() {
    let cfg = DispatchConfig::from_json_str(r#"{"max_concurrent": 4, "output_format": "webp"}"#)
        .unwrap();
    assert_eq!(cfg.max_concurrent, 4);
    assert_eq!(cfg.output_format, "webp");
    assert_eq!(cfg.backend_timeout_secs, 120);
}

#[test]
fn test_from_json_rejects_invalid() {
    assert!(DispatchConfig::from_json_str(r#"{"event_buffer": 0}"#).is_err());
    assert!(DispatchConfig::from_json_str("not json").is_err());
}
