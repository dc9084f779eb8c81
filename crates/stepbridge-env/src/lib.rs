//! Blocking RL environment on top of a cooperative plan scheduler.
//!
//! The learner calls [`Environment`](environment::Environment) methods on
//! an ordinary thread. Each call becomes a [`UnitOfWork`](unit::UnitOfWork)
//! handed across the single-slot [`Bridge`](bridge::Bridge) to the
//! [`ThreadedRunner`](runner::ThreadedRunner), which runs it against the
//! [`Device`](device::Device) on a current-thread tokio runtime.

pub mod bridge;
pub mod device;
pub mod environment;
pub mod plans;
pub mod runner;
pub mod unit;

pub mod prelude {
    pub use stepbridge_core::prelude::*;

    pub use crate::{
        bridge::{Bridge, BridgeEndpoint, BridgeError},
        device::{Device, DeviceLayout},
        environment::{EnvModel, Environment},
        plans::{DefaultPlans, PlanSet},
        runner::{RunReport, RunnerError, StopReason, ThreadedRunner},
        unit::UnitOfWork,
    };
}
