//! Simulated cart-pole exposed as a [`Device`].
//!
//! Signals are named `cp_x`, `cp_x_dot`, `cp_theta`, `cp_theta_dot` and
//! `cp_action`. Writing a state signal overwrites that component; writing
//! `cp_action` advances the physics by one step.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use stepbridge_core::error::DeviceError;
use stepbridge_core::types::Readback;
use stepbridge_env::device::{Device, DeviceLayout};

use crate::physics::{CartPolePhysics, CartPoleState};

pub const X: &str = "cp_x";
pub const X_DOT: &str = "cp_x_dot";
pub const THETA: &str = "cp_theta";
pub const THETA_DOT: &str = "cp_theta_dot";
pub const ACTION: &str = "cp_action";

/// State signals in observation order.
pub const STATE_SIGNALS: [&str; 4] = [X, X_DOT, THETA, THETA_DOT];

/// Detectors, motors and state motors of the simulated cart-pole.
#[must_use]
pub fn layout() -> DeviceLayout {
    DeviceLayout::new(STATE_SIGNALS, [ACTION], STATE_SIGNALS)
}

#[derive(Debug, Default)]
pub struct CartPoleDevice {
    physics: CartPolePhysics,
    state: CartPoleState,
    action: f64,
    mode: Option<String>,
    settle_time: Duration,
    steps: u64,
}

impl CartPoleDevice {
    #[must_use]
    pub fn new(physics: CartPolePhysics) -> Self {
        Self {
            physics,
            ..Self::default()
        }
    }

    /// Sleep this long after every move, like a real actuator settling.
    #[must_use]
    pub const fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    #[must_use]
    pub const fn state(&self) -> CartPoleState {
        self.state
    }

    #[must_use]
    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    /// Physics steps taken so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    fn signal(&self, name: &str) -> Result<f64, DeviceError> {
        match name {
            X => Ok(self.state.x),
            X_DOT => Ok(self.state.x_dot),
            THETA => Ok(self.state.theta),
            THETA_DOT => Ok(self.state.theta_dot),
            ACTION => Ok(self.action),
            other => Err(DeviceError::UnknownTarget(other.to_string())),
        }
    }

    fn write(&mut self, name: &str, value: f64) -> Result<(), DeviceError> {
        if !value.is_finite() {
            return Err(DeviceError::Rejected {
                target: name.to_string(),
                reason: format!("non-finite setpoint {value}"),
            });
        }
        match name {
            X => self.state.x = value,
            X_DOT => self.state.x_dot = value,
            THETA => self.state.theta = value,
            THETA_DOT => self.state.theta_dot = value,
            ACTION => {
                self.action = value;
                self.state = self.physics.step(self.state, value);
                self.steps += 1;
            }
            other => return Err(DeviceError::UnknownTarget(other.to_string())),
        }
        Ok(())
    }

    fn snapshot(&self, detectors: &[String]) -> Result<Readback, DeviceError> {
        detectors
            .iter()
            .map(|d| Ok((d.as_str(), self.signal(d)?)))
            .collect()
    }
}

#[async_trait(?Send)]
impl Device for CartPoleDevice {
    async fn apply_and_read(
        &mut self,
        targets: &[String],
        values: &[f64],
        detectors: &[String],
    ) -> Result<Readback, DeviceError> {
        if targets.len() != values.len() {
            return Err(DeviceError::Fault(format!(
                "{} targets but {} values",
                targets.len(),
                values.len()
            )));
        }
        for (target, value) in targets.iter().zip(values) {
            self.write(target, *value)?;
        }
        if !self.settle_time.is_zero() {
            tokio::time::sleep(self.settle_time).await;
        }
        debug!(state = ?self.state, "cart-pole moved");
        self.snapshot(detectors)
    }

    async fn read(&mut self, detectors: &[String]) -> Result<Readback, DeviceError> {
        self.snapshot(detectors)
    }

    async fn checkpoint(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn set_mode(&mut self, mode: &str) -> Result<(), DeviceError> {
        self.mode = Some(mode.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn action_steps_physics_and_reads_back() {
        let mut device = CartPoleDevice::default();
        let detectors = names(&STATE_SIGNALS);
        let readback = block_on(device.apply_and_read(&names(&[ACTION]), &[1.0], &detectors))
            .unwrap();

        let expected = CartPolePhysics::default().step(CartPoleState::default(), 1.0);
        assert_relative_eq!(readback.value(X_DOT).unwrap(), expected.x_dot);
        assert_relative_eq!(readback.value(THETA_DOT).unwrap(), expected.theta_dot);
        assert_eq!(device.steps(), 1);
    }

    #[test]
    fn state_signals_overwrite_without_stepping() {
        let mut device = CartPoleDevice::default();
        let readback = block_on(device.apply_and_read(
            &names(&STATE_SIGNALS),
            &[0.01, -0.02, 0.03, -0.04],
            &names(&STATE_SIGNALS),
        ))
        .unwrap();
        assert_eq!(
            STATE_SIGNALS.map(|s| readback.value(s).unwrap()),
            [0.01, -0.02, 0.03, -0.04]
        );
        assert_eq!(device.steps(), 0);
    }

    #[test]
    fn unknown_and_non_finite_targets_are_refused() {
        let mut device = CartPoleDevice::default();
        let err = block_on(device.apply_and_read(&names(&["cp_y"]), &[0.0], &[])).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownTarget(ref t) if t == "cp_y"));

        let err = block_on(device.apply_and_read(&names(&[X]), &[f64::NAN], &[])).unwrap_err();
        assert!(matches!(err, DeviceError::Rejected { .. }));

        let err = block_on(device.read(&names(&["cp_mode"]))).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownTarget(_)));
    }

    #[test]
    fn mode_is_recorded() {
        let mut device = CartPoleDevice::default();
        block_on(device.set_mode("test")).unwrap();
        assert_eq!(device.mode(), Some("test"));
    }

    #[test]
    fn layout_names() {
        let layout = layout();
        assert_eq!(layout.motors, vec![ACTION.to_string()]);
        assert_eq!(layout.state_motors.len(), 4);
        assert_eq!(layout.n_motors(), 1);
    }
}
