// stepbridge-core: lifecycle, types, traits, config and errors shared by the stepbridge crates.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod traits;
pub mod types;

pub mod prelude {
    pub use crate::{
        config::{ProxyConfig, RunnerConfig, StepBridgeConfig},
        error::{ConfigError, DeviceError, EnvError, InvalidTransition},
        lifecycle::{EnvironmentState, LifecycleStateMachine},
        traits::RlEnvironment,
        types::{Action, Observation, Readback, ResetState, StepInfo, StepResult},
    };
}
