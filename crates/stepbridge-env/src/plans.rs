use async_trait::async_trait;

use stepbridge_core::error::DeviceError;
use stepbridge_core::types::{Readback, ResetState};

use crate::device::{Device, DeviceLayout};

// ---------------------------------------------------------------------------
// PlanSet
// ---------------------------------------------------------------------------

/// The plans a unit of work runs on the scheduler.
///
/// Every method has a default; override only the ones a setup needs to
/// customise.
#[async_trait(?Send)]
pub trait PlanSet {
    /// Checkpoint, then read the detectors.
    async fn setup(
        &self,
        device: &mut dyn Device,
        layout: &DeviceLayout,
    ) -> Result<Readback, DeviceError> {
        device.checkpoint().await?;
        device.read(&layout.detectors).await
    }

    /// Apply one value per motor, then read the detectors.
    async fn step(
        &self,
        device: &mut dyn Device,
        layout: &DeviceLayout,
        values: &[f64],
    ) -> Result<Readback, DeviceError> {
        device
            .apply_and_read(&layout.motors, values, &layout.detectors)
            .await
    }

    /// The per-step move, aimed at the state motors with the saved state.
    async fn reset(
        &self,
        device: &mut dyn Device,
        layout: &DeviceLayout,
        reset_state: &ResetState,
    ) -> Result<Readback, DeviceError> {
        device
            .apply_and_read(&layout.state_motors, reset_state.values(), &layout.detectors)
            .await
    }

    /// Nothing to do by default.
    async fn teardown(
        &self,
        device: &mut dyn Device,
        layout: &DeviceLayout,
        reset_state: &ResetState,
    ) -> Result<Readback, DeviceError> {
        let _ = (device, layout, reset_state);
        Ok(Readback::new())
    }

    async fn set_mode(&self, device: &mut dyn Device, mode: &str) -> Result<(), DeviceError> {
        device.set_mode(mode).await
    }
}

/// Uses every default plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPlans;

impl PlanSet for DefaultPlans {}
