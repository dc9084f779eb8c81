//! Message types for the remote environment protocol.
//!
//! A message is a JSON [`Envelope`] optionally followed by one binary
//! [`ArrayPayload`]. Requests carry `cmd`; responses carry either result
//! fields or `exception` + `args`. Responses pair with requests purely by
//! order on the connection, so only one request may be outstanding.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use stepbridge_core::error::ConfigError;

use crate::array::{ArrayError, ArrayPayload, DType};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 9998;

/// Maximum size of a single frame (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// ProxyError
// ---------------------------------------------------------------------------

/// Errors raised by the remote proxy pair.
///
/// Transport failures are terminal for the session; nothing here is
/// retried.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Poll timeout: socket not ready within {budget:?}")]
    PollTimeout { budget: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Poll error: {0}")]
    Poll(#[from] nix::errno::Errno),

    #[error("Frame too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Array error: {0}")]
    Array(#[from] ArrayError),

    #[error("Remote raised {kind}: {}", .args.join(", "))]
    Remote { kind: String, args: Vec<String> },

    #[error("Connection closed by peer")]
    UnexpectedEof,

    #[error("Invalid proxy configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Envelope is missing field {0:?}")]
    MissingField(&'static str),

    #[error("Invalid value for field {field:?}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

impl ProxyError {
    /// Stable kind name, used when the error is reported to a client.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PollTimeout { .. } => "PollTimeout",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Poll(_) => "PollError",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::Array(_) => "ArrayError",
            Self::Remote { .. } => "RemoteException",
            Self::UnexpectedEof => "UnexpectedEof",
            Self::Config(_) => "ConfigError",
            Self::MissingField(_) | Self::InvalidField { .. } => "ProtocolError",
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Commands the server dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Setup,
    Step,
    Seed,
    Reset,
    SetMode,
}

impl Command {
    pub const ALL: [Self; 5] = [
        Self::Setup,
        Self::Step,
        Self::Seed,
        Self::Reset,
        Self::SetMode,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Step => "step",
            Self::Seed => "seed",
            Self::Reset => "reset",
            Self::SetMode => "set_mode",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Structured part of a wire message.
///
/// Field names follow the established wire format (`has_A`, `A_dtype`,
/// `A_shape`). Command-specific fields such as `set_mode`, `reward`,
/// `done` and `info` live in [`fields`](Self::fields).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    #[serde(rename = "has_A", default)]
    pub has_array: bool,

    #[serde(rename = "A_dtype", default, skip_serializing_if = "Option::is_none")]
    pub array_dtype: Option<String>,

    #[serde(rename = "A_shape", default, skip_serializing_if = "Option::is_none")]
    pub array_shape: Option<Vec<usize>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Request envelope for `cmd`.
    #[must_use]
    pub fn request(cmd: Command) -> Self {
        Self {
            cmd: Some(cmd.as_str().to_string()),
            ..Self::default()
        }
    }

    /// Response envelope describing a failed handler.
    #[must_use]
    pub fn exception(kind: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            exception: Some(kind.into()),
            args,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field `key` or [`ProxyError::MissingField`].
    pub fn require(&self, key: &'static str) -> Result<&Value, ProxyError> {
        self.field(key).ok_or(ProxyError::MissingField(key))
    }

    /// `Some(kind)` when the peer reported a failure.
    #[must_use]
    pub fn exception_kind(&self) -> Option<&str> {
        self.exception.as_deref().filter(|kind| !kind.is_empty())
    }

    /// Fill in `has_A`, `A_dtype` and `A_shape` for `payload`.
    pub fn describe(&mut self, payload: Option<&ArrayPayload>) {
        self.has_array = payload.is_some();
        self.array_dtype = payload.map(|a| a.dtype().as_str().to_string());
        self.array_shape = payload.map(|a| a.shape().to_vec());
    }

    /// Declared dtype and shape of the trailing payload.
    pub fn array_meta(&self) -> Result<(DType, Vec<usize>), ProxyError> {
        let dtype = self
            .array_dtype
            .as_deref()
            .ok_or(ProxyError::MissingField("A_dtype"))?
            .parse::<DType>()?;
        let shape = self
            .array_shape
            .clone()
            .ok_or(ProxyError::MissingField("A_shape"))?;
        Ok((dtype, shape))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An envelope plus its optional array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub envelope: Envelope,
    pub payload: Option<ArrayPayload>,
}

impl Message {
    #[must_use]
    pub const fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            payload: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: ArrayPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The payload, or [`ProxyError::MissingField`] naming `A`.
    pub fn require_payload(&self) -> Result<&ArrayPayload, ProxyError> {
        self.payload.as_ref().ok_or(ProxyError::MissingField("A"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
