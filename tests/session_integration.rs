//! AnalyzerSession end to end over a scripted transport.

use daq_driver_hp8903::{StepOutcome, Unit};
use gpib_bridge::BridgeConfig;
use gpib_core::mock::MockTransport;
use gpib_core::{GpibError, ManualClock, Transport};
use hp8903_daq::config::{AnalyzerConfig, MeasurementConfig};
use hp8903_daq::{
    AnalyzerSession, BridgeKind, MeasurementMode, MeasurementSpec, SweepPlan, SweepState,
};
use std::time::Duration;

const LEVEL_REPLY: &str = "+1.000E-01\r\n";

fn galvant() -> MockTransport {
    let mock = MockTransport::new();
    mock.on_write("++ver", "Version 5.1 (Galvant GPIB-USB)\r\n");
    mock
}

fn session(clock: &ManualClock) -> AnalyzerSession {
    AnalyzerSession::with_clock(
        BridgeConfig::default(),
        MeasurementConfig::default(),
        clock.shared(),
    )
}

#[test]
fn connect_then_log_sweep() {
    let clock = ManualClock::new();
    let mut session = session(&clock);
    let mock = galvant();
    mock.on_write_sequence(
        "T3",
        [
            Some(LEVEL_REPLY),
            Some("+1.000E+00\r\n"), // preliminary
            Some("+3.000E-03\r\n"),
            Some("+4.000E-03\r\n"),
        ],
    );

    session
        .connect_with_transport(BridgeKind::Prefixed, 28, Box::new(mock.clone()))
        .unwrap();
    mock.clear_written();

    let template = MeasurementSpec::new(MeasurementMode::ThdPercent, 1000.0, 1.0);
    let plan = SweepPlan::logarithmic(20.0, 200.0, 1);
    let mut steps = Vec::new();
    let series = session
        .run_sweep(&plan, &template, |point| steps.push(point.index))
        .unwrap();

    assert_eq!(steps, vec![0, 1]);
    assert_eq!(series.failed_count(), 0);
    let ys = series.y_values();
    assert!((ys[0] - 3.0e-3).abs() < 1e-12);
    assert!((ys[1] - 4.0e-3).abs() < 1e-12);
    assert_eq!(series.x_label(), "Frequency (Hz)");
    assert_eq!(series.y_label(), "THD+n (%)");
    assert_eq!(session.sweep_state(), &SweepState::Idle);

    let commands: Vec<String> = mock
        .written()
        .into_iter()
        .filter(|w| w.contains("T3"))
        .collect();
    assert_eq!(
        commands,
        vec![
            "FR1.0000E+03HZAP1.0000E+00VLM3L0H0LNR0T3\n",
            "FR2.0000E+01HZAP1.0000E+00VLM3L0H0LNT3\n",
            "FR2.0000E+02HZAP1.0000E+00VLM3L0H0LNT3\n",
        ]
    );
}

#[test]
fn analyzer_error_is_recorded_not_fatal() {
    let clock = ManualClock::new();
    let mut session = session(&clock);
    let mock = MockTransport::new();
    mock.on_write_sequence(
        "T3",
        [
            Some(LEVEL_REPLY),
            Some("+1.000E+00\n"),
            Some("+90096E+05\n"),
            Some("+2.500E-01\n"),
        ],
    );
    session
        .connect_with_transport(BridgeKind::Transparent, 28, Box::new(mock))
        .unwrap();

    let template = MeasurementSpec::new(MeasurementMode::FreqResponse, 1000.0, 0.5)
        .with_unit(Unit::Log);
    let series = session
        .run_sweep(&SweepPlan::logarithmic(100.0, 1000.0, 1), &template, |_| {})
        .unwrap();

    assert_eq!(series.failed_count(), 1);
    match &series.points[0].outcome {
        StepOutcome::Failed(e) => {
            assert_eq!(e.code, Some(96));
            assert_eq!(e.to_string(), "Instrument error 96: No signal sensed at input.");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(series.points[1].outcome.is_reading());
    assert!(session.is_connected());
}

#[test]
fn broken_link_aborts_sweep() {
    let clock = ManualClock::new();
    let mut session = session(&clock);
    let mock = MockTransport::new();
    mock.on_write_sequence("T3", [Some(LEVEL_REPLY), Some("+1.000E+00\n"), Some("+1.000E-01\n")]);
    session
        .connect_with_transport(BridgeKind::Transparent, 28, Box::new(mock.clone()))
        .unwrap();

    let template = MeasurementSpec::new(MeasurementMode::OutputLevel, 1000.0, 1.0);
    let plan = SweepPlan::linear(0.1, 0.5, 5);
    let mut seen = Vec::new();
    let result = session.run_sweep(&plan, &template, |point| {
        seen.push(point.outcome.is_reading());
        mock.set_broken(true);
    });

    assert!(matches!(result, Err(GpibError::Io(_))));
    assert_eq!(seen, vec![true, false]);
    assert!(matches!(session.sweep_state(), SweepState::Failed(_)));

    // the transparent bridge has no teardown commands to fail
    assert!(session.disconnect());
    assert!(!session.is_connected());
}

#[test]
fn reconnect_closes_previous_bridge() {
    let clock = ManualClock::new();
    let mut session = session(&clock);

    let first = galvant();
    first.on_write("T3", LEVEL_REPLY);
    session
        .connect_with_transport(BridgeKind::Prefixed, 28, Box::new(first.clone()))
        .unwrap();
    first.clear_written();

    let second = MockTransport::new();
    second.on_write("T3", LEVEL_REPLY);
    let report = session
        .connect_with_transport(BridgeKind::Transparent, 7, Box::new(second.clone()))
        .unwrap();

    assert_eq!(first.written(), vec!["++ifc\n", "++loc\n"]);
    assert!(!first.is_open());
    assert!(second.is_open());
    assert_eq!(report.kind, BridgeKind::Transparent);
    assert_eq!(
        session.status(),
        (true, "National Instruments GPIB-232CV-A connected".to_string())
    );
}

#[test]
fn configured_timeout_bounds_single_measurement() {
    let mut config = AnalyzerConfig::default();
    config.measurement.timeout_ms = 1000;
    config.measurement.poll_interval_ms = 5;

    let clock = ManualClock::new();
    let mut bridge_config = config.bridge.to_bridge_config();
    bridge_config.poll_interval_ms = config.measurement.poll_interval_ms;
    let mut session =
        AnalyzerSession::with_clock(bridge_config, config.measurement.clone(), clock.shared());

    let mock = MockTransport::new();
    mock.on_write_sequence("T3", [Some(LEVEL_REPLY), None]);
    session
        .connect_with_transport(BridgeKind::Transparent, 28, Box::new(mock))
        .unwrap();

    let before = clock.elapsed();
    let result = session
        .single_measurement(&MeasurementSpec::default())
        .unwrap();
    let waited = clock.elapsed() - before;

    assert!(result.is_error);
    assert_eq!(result.error_code, None);
    assert!(waited >= Duration::from_millis(1000));
    assert!(waited < Duration::from_millis(1010));
}

#[test]
fn invalid_measurement_is_rejected_without_io() {
    let clock = ManualClock::new();
    let mut session = session(&clock);
    let mock = MockTransport::new();
    mock.on_write("T3", LEVEL_REPLY);
    session
        .connect_with_transport(BridgeKind::Transparent, 28, Box::new(mock.clone()))
        .unwrap();
    mock.clear_written();

    let spec = MeasurementSpec::new(MeasurementMode::ThdPercent, 150_000.0, 1.0);
    assert!(matches!(
        session.single_measurement(&spec),
        Err(GpibError::Config(_))
    ));
    assert!(mock.written().is_empty());
}
