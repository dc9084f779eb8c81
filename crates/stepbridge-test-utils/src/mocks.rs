//! Mock devices and environment models.

use std::collections::BTreeMap;

use async_trait::async_trait;

use stepbridge_core::error::{DeviceError, EnvError};
use stepbridge_core::types::{Observation, Readback, ResetState};
use stepbridge_env::device::{Device, DeviceLayout};
use stepbridge_env::environment::EnvModel;

// ---------------------------------------------------------------------------
// RecordingDevice
// ---------------------------------------------------------------------------

/// One call seen by a [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    ApplyAndRead { targets: Vec<String>, values: Vec<f64> },
    Read { detectors: Vec<String> },
    Checkpoint,
    SetMode(String),
}

/// A device that stores setpoints and reads them back by name.
///
/// Every call is appended to [`calls`](Self::calls). Detectors read the
/// position of the target with the same name, `0.0` if never set.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    positions: BTreeMap<String, f64>,
    strict: bool,
    mode: Option<String>,
    calls: Vec<DeviceCall>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept the given targets; anything else is `UnknownTarget`.
    pub fn with_targets<S: Into<String>>(targets: impl IntoIterator<Item = S>) -> Self {
        Self {
            positions: targets.into_iter().map(|t| (t.into(), 0.0)).collect(),
            strict: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Number of `apply_and_read` calls, the only ones that move anything.
    pub fn moves(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::ApplyAndRead { .. }))
            .count()
    }

    pub fn position(&self, target: &str) -> Option<f64> {
        self.positions.get(target).copied()
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    fn snapshot(&self, detectors: &[String]) -> Readback {
        detectors
            .iter()
            .map(|d| (d.as_str(), self.positions.get(d).copied().unwrap_or(0.0)))
            .collect()
    }
}

#[async_trait(?Send)]
impl Device for RecordingDevice {
    async fn apply_and_read(
        &mut self,
        targets: &[String],
        values: &[f64],
        detectors: &[String],
    ) -> Result<Readback, DeviceError> {
        self.calls.push(DeviceCall::ApplyAndRead {
            targets: targets.to_vec(),
            values: values.to_vec(),
        });
        if let Some(unknown) = targets
            .iter()
            .find(|t| self.strict && !self.positions.contains_key(t.as_str()))
        {
            return Err(DeviceError::UnknownTarget(unknown.clone()));
        }
        for (target, value) in targets.iter().zip(values) {
            self.positions.insert(target.clone(), *value);
        }
        Ok(self.snapshot(detectors))
    }

    async fn read(&mut self, detectors: &[String]) -> Result<Readback, DeviceError> {
        self.calls.push(DeviceCall::Read {
            detectors: detectors.to_vec(),
        });
        Ok(self.snapshot(detectors))
    }

    async fn checkpoint(&mut self) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::Checkpoint);
        Ok(())
    }

    async fn set_mode(&mut self, mode: &str) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::SetMode(mode.to_string()));
        self.mode = Some(mode.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FailingDevice
// ---------------------------------------------------------------------------

/// Reads fine but faults on every move.
#[derive(Debug, Default)]
pub struct FailingDevice {
    pub moves_attempted: usize,
}

#[async_trait(?Send)]
impl Device for FailingDevice {
    async fn apply_and_read(
        &mut self,
        _targets: &[String],
        _values: &[f64],
        _detectors: &[String],
    ) -> Result<Readback, DeviceError> {
        self.moves_attempted += 1;
        Err(DeviceError::Fault("actuator stalled".into()))
    }

    async fn read(&mut self, detectors: &[String]) -> Result<Readback, DeviceError> {
        Ok(detectors.iter().map(|d| (d.as_str(), 0.0)).collect())
    }

    async fn checkpoint(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StallingDevice
// ---------------------------------------------------------------------------

/// Reads fine but never finishes a move.
#[derive(Debug, Default)]
pub struct StallingDevice;

#[async_trait(?Send)]
impl Device for StallingDevice {
    async fn apply_and_read(
        &mut self,
        _targets: &[String],
        _values: &[f64],
        _detectors: &[String],
    ) -> Result<Readback, DeviceError> {
        std::future::pending().await
    }

    async fn read(&mut self, detectors: &[String]) -> Result<Readback, DeviceError> {
        Ok(detectors.iter().map(|d| (d.as_str(), 0.0)).collect())
    }

    async fn checkpoint(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TwoAxisModel
// ---------------------------------------------------------------------------

/// Two motors `m0`, `m1` read back through detectors of the same name.
///
/// Reward is `1.0` per step; the episode ends once `|m0|` exceeds `limit`.
/// Reset drives both axes back to the positions seen at setup.
#[derive(Debug, Clone)]
pub struct TwoAxisModel {
    pub limit: f64,
    initial: Vec<f64>,
}

impl TwoAxisModel {
    pub const MOTORS: [&'static str; 2] = ["m0", "m1"];

    pub const fn new(limit: f64) -> Self {
        Self {
            limit,
            initial: Vec::new(),
        }
    }

    pub fn layout() -> DeviceLayout {
        DeviceLayout::new(Self::MOTORS, Self::MOTORS, Self::MOTORS)
    }

    pub fn initial_state(&self) -> &[f64] {
        &self.initial
    }
}

impl Default for TwoAxisModel {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl EnvModel for TwoAxisModel {
    fn store_initial_state(&mut self, readback: &Readback) -> Result<(), EnvError> {
        self.initial = Self::MOTORS
            .iter()
            .map(|m| readback.value(m))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn state_to_reset_to(&mut self) -> Result<ResetState, EnvError> {
        Ok(ResetState::new(self.initial.clone()))
    }

    fn compute_state(&self, readback: &Readback) -> Result<Observation, EnvError> {
        let values = Self::MOTORS
            .iter()
            .map(|m| readback.value(m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Observation::new(values))
    }

    fn compute_reward_terminal(&mut self, readback: &Readback) -> Result<(f64, bool), EnvError> {
        let x = readback.value("m0")?;
        Ok((1.0, x.abs() > self.limit))
    }

    fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
        Ok(seed.unwrap_or(42))
    }

    fn validate_mode(&self, mode: &str) -> Result<(), EnvError> {
        match mode {
            "train" | "test" => Ok(()),
            other => Err(EnvError::InvalidArgument(format!("bad mode {other:?}"))),
        }
    }
}
