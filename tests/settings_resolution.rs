//! Settings derivation against the documented scenario rules, including the
//! recovery and rejection paths.

mod common;

use std::time::Duration;

use cargar::log::{AsyncLogger, SharedBuffer};
use cargar::{CargarError, EffectiveSettings, Mode, RequestedSettings, Scenario};
use common::MockLibrary;

fn resolve_with_log(
    requested: &RequestedSettings,
    library: &MockLibrary,
) -> (Result<EffectiveSettings, CargarError>, String) {
    let buffer = SharedBuffer::default();
    let logger = AsyncLogger::spawn(Box::new(buffer.clone()));
    let result = EffectiveSettings::resolve(requested, library, &logger.sink());
    logger.shutdown();
    (result, buffer.contents())
}

#[test]
fn test_single_stream_expected_latency_to_qps() {
    let library = MockLibrary::new(1024, 1024);
    let requested = RequestedSettings {
        scenario: Scenario::SingleStream,
        single_stream_expected_latency_ns: 1_000_000,
        ..RequestedSettings::default()
    };
    let (result, _) = resolve_with_log(&requested, &library);
    let effective = result.expect("resolve");
    assert!((effective.target_qps - 1000.0).abs() < 1e-9);
    assert_eq!(effective.max_async_queries, 1);
}

#[test]
fn test_server_default_recovery_logs_one_error() {
    let library = MockLibrary::new(1024, 1024);
    let requested = RequestedSettings {
        scenario: Scenario::Server,
        server_target_qps: -1.0,
        ..RequestedSettings::default()
    };
    let (result, log) = resolve_with_log(&requested, &library);
    let effective = result.expect("resolve");
    assert!((effective.target_qps - 1.0).abs() < f64::EPSILON);

    let matches: Vec<&str> = log
        .lines()
        .filter(|line| line.contains("Invalid value for server_target_qps"))
        .collect();
    assert_eq!(matches.len(), 1, "log was:\n{log}");
    assert!(matches[0].starts_with("ERROR :"));
}

#[test]
fn test_offline_default_recovery() {
    let library = MockLibrary::new(1024, 1024);
    let requested = RequestedSettings {
        scenario: Scenario::Offline,
        offline_expected_qps: -5.0,
        ..RequestedSettings::default()
    };
    let (result, log) = resolve_with_log(&requested, &library);
    let effective = result.expect("resolve");
    assert!((effective.target_qps - 1.0).abs() < f64::EPSILON);
    assert!(log.contains("Invalid value for offline_expected_qps"));
}

#[test]
fn test_mutually_exclusive_performance_flags_rejected() {
    let library = MockLibrary::new(1024, 1024);
    let requested = RequestedSettings {
        performance_issue_same: true,
        performance_issue_unique: true,
        ..RequestedSettings::default()
    };
    let (result, _) = resolve_with_log(&requested, &library);
    assert!(matches!(
        result,
        Err(CargarError::InvalidSettings { .. })
    ));
}

#[test]
fn test_same_index_must_be_inside_working_set() {
    let library = MockLibrary::new(1024, 8);
    let requested = RequestedSettings {
        performance_issue_same: true,
        performance_issue_same_index: 8,
        ..RequestedSettings::default()
    };
    let (result, _) = resolve_with_log(&requested, &library);
    assert!(matches!(
        result,
        Err(CargarError::InvalidSettings {
            field: "performance_issue_same_index",
            ..
        })
    ));

    // Index 7 in a working set of 8 is the last valid value.
    let requested = RequestedSettings {
        performance_issue_same: true,
        performance_issue_same_index: 7,
        ..RequestedSettings::default()
    };
    let (result, _) = resolve_with_log(&requested, &library);
    assert!(result.is_ok());

    // The bound applies even with performance_issue_same unset.
    let requested = RequestedSettings {
        performance_issue_same: false,
        performance_issue_same_index: 8,
        ..RequestedSettings::default()
    };
    let (result, _) = resolve_with_log(&requested, &library);
    assert!(matches!(
        result,
        Err(CargarError::InvalidSettings {
            field: "performance_issue_same_index",
            ..
        })
    ));
}

#[test]
fn test_library_supplies_performance_sample_count() {
    let library = MockLibrary::new(4096, 777);
    let (result, _) = resolve_with_log(&RequestedSettings::default(), &library);
    assert_eq!(result.expect("resolve").performance_sample_count, 777);
}

#[test]
fn test_durations_copied_from_request() {
    let library = MockLibrary::new(64, 64);
    let requested = RequestedSettings {
        min_duration_ms: 1234,
        max_duration_ms: 5678,
        ..RequestedSettings::default()
    };
    let (result, _) = resolve_with_log(&requested, &library);
    let effective = result.expect("resolve");
    assert_eq!(effective.min_duration, Duration::from_millis(1234));
    assert_eq!(effective.max_duration, Duration::from_millis(5678));
}

#[test]
fn test_detail_log_carries_both_settings_blocks() {
    let library = MockLibrary::new(64, 64);
    let requested = RequestedSettings {
        scenario: Scenario::Server,
        server_target_qps: 10.0,
        ..RequestedSettings::default()
    };
    let buffer = SharedBuffer::default();
    let logger = AsyncLogger::spawn(Box::new(buffer.clone()));
    requested.log_requested(&logger.sink());
    let effective =
        EffectiveSettings::resolve(&requested, &library, &logger.sink()).expect("resolve");
    effective.log_effective(&logger.sink());
    logger.shutdown();

    let log = buffer.contents();
    assert!(log.contains("Requested Settings:"));
    assert!(log.contains("Effective Settings:"));
    assert!(log.contains("Scenario : Server"));
    assert!(log.contains("Test mode : Performance"));
    assert!(log.contains("server_target_qps : 10"));
    assert!(log.contains("samples_per_query : 1"));
}

#[test]
fn test_accuracy_mode_label_in_detail_log() {
    let library = MockLibrary::new(64, 64);
    let requested = RequestedSettings {
        mode: Mode::AccuracyOnly,
        ..RequestedSettings::default()
    };
    let buffer = SharedBuffer::default();
    let logger = AsyncLogger::spawn(Box::new(buffer.clone()));
    requested.log_requested(&logger.sink());
    logger.shutdown();
    assert!(buffer.contents().contains("Test mode : Accuracy"));
}
