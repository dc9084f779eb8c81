//! Device layer seen from inside the plan scheduler.
//!
//! A [`Device`] is only ever touched from the scheduler thread, so the trait
//! is `?Send` and implementations may hold non-thread-safe handles.

use async_trait::async_trait;

use stepbridge_core::error::DeviceError;
use stepbridge_core::types::Readback;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Opaque hardware or simulation backend driven by plans.
#[async_trait(?Send)]
pub trait Device {
    /// Move each target to the paired value, then trigger and read the
    /// detectors.
    async fn apply_and_read(
        &mut self,
        targets: &[String],
        values: &[f64],
        detectors: &[String],
    ) -> Result<Readback, DeviceError>;

    /// Trigger and read the detectors without moving anything.
    async fn read(&mut self, detectors: &[String]) -> Result<Readback, DeviceError>;

    /// Mark a point the plan could safely resume from.
    async fn checkpoint(&mut self) -> Result<(), DeviceError>;

    /// Record the run mode (`"train"`, `"test"`, ...).
    async fn set_mode(&mut self, mode: &str) -> Result<(), DeviceError> {
        let _ = mode;
        Err(DeviceError::Unsupported("set_mode"))
    }
}

#[async_trait(?Send)]
impl<D: Device + ?Sized> Device for Box<D> {
    async fn apply_and_read(
        &mut self,
        targets: &[String],
        values: &[f64],
        detectors: &[String],
    ) -> Result<Readback, DeviceError> {
        (**self).apply_and_read(targets, values, detectors).await
    }

    async fn read(&mut self, detectors: &[String]) -> Result<Readback, DeviceError> {
        (**self).read(detectors).await
    }

    async fn checkpoint(&mut self) -> Result<(), DeviceError> {
        (**self).checkpoint().await
    }

    async fn set_mode(&mut self, mode: &str) -> Result<(), DeviceError> {
        (**self).set_mode(mode).await
    }
}

// ---------------------------------------------------------------------------
// DeviceLayout
// ---------------------------------------------------------------------------

/// Names of the devices handed to every plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLayout {
    /// Signals read back after every move.
    pub detectors: Vec<String>,
    /// Targets driven by the learner's actions, one value per motor.
    pub motors: Vec<String>,
    /// Targets driven back to the saved state on reset.
    pub state_motors: Vec<String>,
}

impl DeviceLayout {
    pub fn new<S: Into<String>>(
        detectors: impl IntoIterator<Item = S>,
        motors: impl IntoIterator<Item = S>,
        state_motors: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            detectors: detectors.into_iter().map(Into::into).collect(),
            motors: motors.into_iter().map(Into::into).collect(),
            state_motors: state_motors.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of values a step action must carry.
    #[must_use]
    pub const fn n_motors(&self) -> usize {
        self.motors.len()
    }
}
