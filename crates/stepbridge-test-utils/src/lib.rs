//! Shared test fixtures for stepbridge crates.
//!
//! Mock devices for the plan scheduler, a small two-axis environment model,
//! and deterministic RNG setup.

pub mod mocks;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use mocks::{DeviceCall, FailingDevice, RecordingDevice, StallingDevice, TwoAxisModel};
pub use rng::{deterministic_action, seeded_rng};
