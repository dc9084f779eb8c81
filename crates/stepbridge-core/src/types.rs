use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EnvError;

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Flat f64 vector representing the environment state handed to the learner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Observation {
    data: Vec<f64>,
}

impl Observation {
    pub const fn new(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    pub const fn len(&self) -> usize {
        self.data.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

impl std::ops::Index<usize> for Observation {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

impl From<Vec<f64>> for Observation {
    fn from(data: Vec<f64>) -> Self {
        Self::new(data)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Control command sent to the environment.
///
/// A scalar is only accepted when exactly one motor is controlled; it is
/// then coerced to a single-element vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Action {
    /// Number of scalar elements.
    pub const fn len(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Vector(v) => v.len(),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coerce into one value per motor.
    ///
    /// Fails with [`EnvError::ActionShape`] when the cardinality does not
    /// match `n_motors`.
    pub fn into_values(self, n_motors: usize) -> Result<Vec<f64>, EnvError> {
        match self {
            Self::Scalar(v) if n_motors == 1 => Ok(vec![v]),
            Self::Vector(v) if v.len() == n_motors => Ok(v),
            other => Err(EnvError::ActionShape {
                expected: n_motors,
                got: other.len(),
            }),
        }
    }
}

impl From<f64> for Action {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f64>> for Action {
    fn from(data: Vec<f64>) -> Self {
        Self::Vector(data)
    }
}

impl From<&[f64]> for Action {
    fn from(data: &[f64]) -> Self {
        Self::Vector(data.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Readback
// ---------------------------------------------------------------------------

/// Values read back from the device layer, keyed by signal name.
///
/// The core never interprets a readback beyond handing it to the
/// environment model's derivation hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Readback {
    values: BTreeMap<String, f64>,
}

impl Readback {
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Like [`get`](Self::get) but reports the missing signal as an error.
    pub fn value(&self, name: &str) -> Result<f64, EnvError> {
        self.get(name)
            .ok_or_else(|| EnvError::MissingReading(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Merge another readback into this one, overwriting duplicates.
    pub fn extend(&mut self, other: Self) {
        self.values.extend(other.values);
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Readback {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// ResetState
// ---------------------------------------------------------------------------

/// Snapshot of the state-motor setpoints an episode is reset to.
///
/// Replaced wholesale, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResetState {
    values: Vec<f64>,
}

impl ResetState {
    pub const fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub const fn len(&self) -> usize {
        self.values.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<f64>> for ResetState {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Auxiliary diagnostic info returned with each step.
pub type StepInfo = BTreeMap<String, f64>;

/// Outcome of a single [`step`](crate::traits::RlEnvironment::step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    #[serde(default)]
    pub info: StepInfo,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
