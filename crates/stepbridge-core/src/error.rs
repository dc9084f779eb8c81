use thiserror::Error;

use crate::lifecycle::EnvironmentState;

/// A lifecycle change that is not listed in the transition table.
///
/// Copy + static data so it can be returned from the hot path without
/// allocation. The state machine is left untouched when this is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: EnvironmentState,
    pub to: EnvironmentState,
}

/// Failures raised by the device/plan layer while a unit of work runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Target {target} rejected setpoint: {reason}")]
    Rejected { target: String, reason: String },

    #[error("Operation not supported by device: {0}")]
    Unsupported(&'static str),

    #[error("Device fault: {0}")]
    Fault(String),
}

/// Errors surfaced by the RL-facing environment operations.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Action shape mismatch: expected {expected} values (one per motor), got {got}")]
    ActionShape { expected: usize, got: usize },

    #[error("Setup failed: {0}")]
    Setup(#[source] Box<EnvError>),

    #[error("No bridge attached to the environment")]
    NoBridge,

    #[error("Bridge closed: delegation was stopped")]
    BridgeClosed,

    #[error("Bridge busy: another unit of work is already in flight")]
    BridgeBusy,

    #[error("{operation} failed on device: {source}")]
    Device {
        operation: &'static str,
        #[source]
        source: DeviceError,
    },

    #[error("Derived observation is empty")]
    EmptyObservation,

    #[error("Missing reading in device readback: {0}")]
    MissingReading(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Environment model error: {0}")]
    Model(String),
}

impl EnvError {
    /// Stable kind name, used when the error crosses the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTransition(_) => "InvalidTransition",
            Self::ActionShape { .. } => "ActionShapeError",
            Self::Setup(_) => "SetupError",
            Self::NoBridge => "NoBridge",
            Self::BridgeClosed => "BridgeClosed",
            Self::BridgeBusy => "BridgeBusy",
            Self::Device { .. } => "DeviceError",
            Self::EmptyObservation => "EmptyObservation",
            Self::MissingReading(_) => "MissingReading",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Model(_) => "ModelError",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
