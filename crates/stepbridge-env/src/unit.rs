use std::sync::Arc;

use stepbridge_core::error::DeviceError;
use stepbridge_core::types::{Readback, ResetState};

use crate::device::{Device, DeviceLayout};
use crate::plans::PlanSet;

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

/// A deferred plan invocation together with its bound arguments.
///
/// Built on the caller thread, moved across the bridge and consumed exactly
/// once by [`execute`](Self::execute) on the scheduler thread.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOfWork {
    Setup {
        layout: Arc<DeviceLayout>,
    },
    Step {
        layout: Arc<DeviceLayout>,
        values: Vec<f64>,
    },
    Reset {
        layout: Arc<DeviceLayout>,
        reset_state: ResetState,
    },
    Teardown {
        layout: Arc<DeviceLayout>,
        reset_state: ResetState,
    },
    SetMode {
        mode: String,
    },
}

impl UnitOfWork {
    /// Operation name used in logs and error reports.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "setup",
            Self::Step { .. } => "step",
            Self::Reset { .. } => "reset",
            Self::Teardown { .. } => "teardown",
            Self::SetMode { .. } => "set_mode",
        }
    }

    /// Run the matching plan against `device`.
    ///
    /// `set_mode` yields an empty readback.
    pub async fn execute(
        self,
        plans: &dyn PlanSet,
        device: &mut dyn Device,
    ) -> Result<Readback, DeviceError> {
        match self {
            Self::Setup { layout } => plans.setup(device, &layout).await,
            Self::Step { layout, values } => plans.step(device, &layout, &values).await,
            Self::Reset {
                layout,
                reset_state,
            } => plans.reset(device, &layout, &reset_state).await,
            Self::Teardown {
                layout,
                reset_state,
            } => plans.teardown(device, &layout, &reset_state).await,
            Self::SetMode { mode } => {
                plans.set_mode(device, &mode).await?;
                Ok(Readback::new())
            }
        }
    }
}
