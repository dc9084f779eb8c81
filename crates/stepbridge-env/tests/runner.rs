//! Scheduler loop termination and plan overrides.

use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use stepbridge_core::config::RunnerConfig;
use stepbridge_core::error::{DeviceError, EnvError};
use stepbridge_core::lifecycle::EnvironmentState;
use stepbridge_core::types::{Action, Readback};
use stepbridge_env::bridge::Bridge;
use stepbridge_env::device::{Device, DeviceLayout};
use stepbridge_env::environment::Environment;
use stepbridge_env::plans::PlanSet;
use stepbridge_env::runner::{RunnerError, StopReason, ThreadedRunner};
use stepbridge_test_utils::{RecordingDevice, StallingDevice, TwoAxisModel};

fn two_axis(bridge: Bridge) -> Environment<TwoAxisModel> {
    let mut env = Environment::new(TwoAxisModel::default(), TwoAxisModel::layout());
    env.attach_bridge(bridge);
    env
}

#[test]
fn stop_delegation_releases_learner_blocked_in_step() {
    let mut runner = ThreadedRunner::new(StallingDevice);
    let started = Instant::now();
    let report = runner
        .run(|bridge| {
            let stopper = bridge.clone();
            let watchdog = thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                stopper.stop_delegation();
            });

            let mut env = two_axis(bridge);
            env.setup().unwrap();
            let err = env.reset().unwrap_err();
            watchdog.join().unwrap();
            (err, env.state())
        })
        .unwrap();

    let (err, state) = report.output;
    assert!(matches!(err, EnvError::BridgeClosed));
    assert_eq!(state, EnvironmentState::Failed);
    assert_eq!(report.stop, StopReason::Cancelled);
    // Only setup completed; the stalled reset was abandoned.
    assert_eq!(report.units, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn unit_budget_ends_the_run() {
    let config = RunnerConfig {
        max_units: Some(2),
        ..RunnerConfig::default()
    };
    let mut runner = ThreadedRunner::new(RecordingDevice::new()).with_config(config);
    let report = runner
        .run(|bridge| {
            let mut env = two_axis(bridge);
            env.setup().unwrap();
            env.reset().unwrap();
            let err = env.step(Action::from(vec![1.0, 1.0])).unwrap_err();
            (err, env.state())
        })
        .unwrap();

    let (err, state) = report.output;
    assert!(matches!(err, EnvError::BridgeClosed));
    assert_eq!(state, EnvironmentState::Failed);
    assert_eq!(report.stop, StopReason::UnitBudget);
    assert_eq!(report.units, 2);
}

#[test]
fn learner_thread_gets_configured_name() {
    let config = RunnerConfig {
        learner_thread_name: "trainer".into(),
        ..RunnerConfig::default()
    };
    let mut runner = ThreadedRunner::new(RecordingDevice::new()).with_config(config);
    let report = runner
        .run(|_bridge| thread::current().name().map(str::to_string))
        .unwrap();
    assert_eq!(report.output.as_deref(), Some("trainer"));
    assert_eq!(report.stop, StopReason::LearnerFinished);
    assert_eq!(report.units, 0);
}

#[test]
fn learner_panic_is_reported() {
    let mut runner = ThreadedRunner::new(RecordingDevice::new());
    let result = runner.run(|bridge| {
        let _env = two_axis(bridge);
        panic!("learner blew up");
    });
    assert!(matches!(result, Err(RunnerError::LearnerPanicked)));
}

// ---------------------------------------------------------------------------
// Plan overrides
// ---------------------------------------------------------------------------

/// Step plan that doubles every action before moving.
struct DoublingPlans;

#[async_trait(?Send)]
impl PlanSet for DoublingPlans {
    async fn step(
        &self,
        device: &mut dyn Device,
        layout: &DeviceLayout,
        values: &[f64],
    ) -> Result<Readback, DeviceError> {
        let doubled: Vec<f64> = values.iter().map(|v| v * 2.0).collect();
        device
            .apply_and_read(&layout.motors, &doubled, &layout.detectors)
            .await
    }
}

#[test]
fn custom_plan_set_replaces_only_overridden_plans() {
    let mut runner = ThreadedRunner::new(RecordingDevice::new()).with_plans(DoublingPlans);
    let report = runner
        .run(|bridge| {
            let mut env = two_axis(bridge);
            env.setup().unwrap();
            env.reset().unwrap();
            env.step(Action::from(vec![1.5, -1.0])).unwrap()
        })
        .unwrap();

    assert_eq!(report.output.observation.as_slice(), &[3.0, -2.0]);
    assert_eq!(runner.device().position("m1"), Some(-2.0));
}

#[test]
fn unknown_target_fails_the_unit() {
    let device = RecordingDevice::with_targets(["m0"]);
    let mut runner = ThreadedRunner::new(device);
    let report = runner
        .run(|bridge| {
            let mut env = two_axis(bridge);
            env.setup().unwrap();
            env.reset().unwrap_err()
        })
        .unwrap();

    match report.output {
        EnvError::Device { operation, source } => {
            assert_eq!(operation, "reset");
            assert_eq!(source, DeviceError::UnknownTarget("m1".into()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(report.stop, StopReason::UnitFailed { operation: "reset" });
}
