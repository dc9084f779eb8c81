//! TCP server exposing an [`RlEnvironment`] to a remote learner.
//!
//! [`EnvironmentServer`] accepts one connection at a time and answers each
//! request through a command table. A failing handler never ends the loop:
//! its error is sent back as `{exception, args}` and serving continues.
//! Transport errors and timeouts do end it.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};

use serde_json::Value;
use thiserror::Error;
use tracing::{Span, debug, error, info, info_span};

use stepbridge_core::config::ProxyConfig;
use stepbridge_core::error::EnvError;
use stepbridge_core::traits::RlEnvironment;
use stepbridge_core::types::{Action, Observation};

use crate::array::{ArrayError, ArrayPayload, DType};
use crate::connection::Connection;
use crate::poll::PollBudget;
use crate::protocol::{Command, Envelope, Message, ProxyError};

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Why a single command failed. Reported to the client, never fatal.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Protocol(#[from] ProxyError),

    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),
}

impl From<ArrayError> for HandlerError {
    fn from(err: ArrayError) -> Self {
        Self::Protocol(ProxyError::Array(err))
    }
}

impl HandlerError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Env(e) => e.kind(),
            Self::Protocol(e) => e.kind(),
            Self::UnknownCommand(_) => "UnknownCommand",
        }
    }

    /// Exception envelope carrying the kind and the rendered message.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope::exception(self.kind(), vec![self.to_string()])
    }
}

// ---------------------------------------------------------------------------
// Command table
// ---------------------------------------------------------------------------

type Handler<E> = fn(&mut E, &Message) -> Result<Message, HandlerError>;

fn command_table<E: RlEnvironment>() -> HashMap<Command, Handler<E>> {
    let mut table: HashMap<Command, Handler<E>> = HashMap::with_capacity(Command::ALL.len());
    table.insert(Command::Setup, handle_setup::<E>);
    table.insert(Command::Step, handle_step::<E>);
    table.insert(Command::Seed, handle_seed::<E>);
    table.insert(Command::Reset, handle_reset::<E>);
    table.insert(Command::SetMode, handle_set_mode::<E>);
    table
}

fn observation_message(envelope: Envelope, observation: &Observation) -> Message {
    Message::new(envelope).with_payload(ArrayPayload::from_slice(observation.as_slice()))
}

fn reject_payload(request: &Message) -> Result<(), HandlerError> {
    if request.payload.is_some() {
        return Err(ProxyError::InvalidField {
            field: "A",
            message: "command takes no array".into(),
        }
        .into());
    }
    Ok(())
}

fn handle_setup<E: RlEnvironment>(env: &mut E, request: &Message) -> Result<Message, HandlerError> {
    reject_payload(request)?;
    let observation = env.setup()?;
    Ok(observation_message(Envelope::default(), &observation))
}

fn handle_reset<E: RlEnvironment>(env: &mut E, request: &Message) -> Result<Message, HandlerError> {
    reject_payload(request)?;
    let observation = env.reset()?;
    Ok(observation_message(Envelope::default(), &observation))
}

fn handle_seed<E: RlEnvironment>(env: &mut E, request: &Message) -> Result<Message, HandlerError> {
    let payload = request.require_payload()?;
    let seed = match payload.dtype() {
        DType::Uint64 => payload.to_scalar::<u64>()?,
        DType::Int64 => {
            u64::try_from(payload.to_scalar::<i64>()?).map_err(|e| ProxyError::InvalidField {
                field: "A",
                message: format!("seed must be non-negative: {e}"),
            })?
        }
        other => {
            return Err(ProxyError::InvalidField {
                field: "A_dtype",
                message: format!("seed must be an integer scalar, got {other}"),
            }
            .into());
        }
    };
    let used = env.seed(Some(seed))?;
    Ok(Message::new(Envelope::default()).with_payload(ArrayPayload::scalar(used)))
}

fn handle_step<E: RlEnvironment>(env: &mut E, request: &Message) -> Result<Message, HandlerError> {
    let payload = request.require_payload()?;
    let action = match payload.shape().len() {
        0 => Action::Scalar(payload.to_f64_vec().first().copied().unwrap_or_default()),
        1 => Action::Vector(payload.to_f64_vec()),
        _ => return Err(ArrayError::TooManyDims(payload.shape().to_vec()).into()),
    };

    let result = env.step(action)?;
    if !result.reward.is_finite() {
        return Err(ProxyError::InvalidField {
            field: "reward",
            message: format!("{} cannot be encoded as JSON", result.reward),
        }
        .into());
    }
    let info = serde_json::to_value(&result.info).map_err(ProxyError::from)?;
    let envelope = Envelope::default()
        .with_field("reward", result.reward)
        .with_field("done", result.done)
        .with_field("info", info);
    Ok(observation_message(envelope, &result.observation))
}

fn handle_set_mode<E: RlEnvironment>(
    env: &mut E,
    request: &Message,
) -> Result<Message, HandlerError> {
    let mode = request
        .envelope
        .require("set_mode")?
        .as_str()
        .ok_or_else(|| ProxyError::InvalidField {
            field: "set_mode",
            message: "expected a string".into(),
        })?;
    env.set_mode(mode)?;
    Ok(Message::default())
}

// ---------------------------------------------------------------------------
// EnvironmentServer
// ---------------------------------------------------------------------------

/// Serves one environment over TCP, one client at a time.
pub struct EnvironmentServer {
    listener: TcpListener,
    budget: PollBudget,
    span: Span,
}

impl EnvironmentServer {
    /// Bind to `addr` (e.g. `"127.0.0.1:9998"`) with default polling.
    pub fn bind(addr: &str) -> Result<Self, ProxyError> {
        Self::bind_with_config(addr, &ProxyConfig::default())
    }

    /// Bind to `addr` and poll with `config`'s budget.
    ///
    /// An invalid `config` is refused before anything is bound.
    pub fn bind_with_config(addr: &str, config: &ProxyConfig) -> Result<Self, ProxyError> {
        let budget = PollBudget::from_config(config)?;
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            budget,
            span: info_span!("server"),
        })
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one client and serve it until it disconnects.
    ///
    /// Returns the number of requests answered.
    pub fn serve_one<E: RlEnvironment>(&self, env: &mut E) -> Result<u64, ProxyError> {
        let (stream, peer) = self.listener.accept()?;
        info!(parent: &self.span, %peer, "client connected");
        let mut connection = Connection::new(stream, self.budget)?;
        let served = self.handle_connection(&mut connection, env)?;
        info!(parent: &self.span, %peer, served, "client disconnected");
        Ok(served)
    }

    fn handle_connection<E: RlEnvironment>(
        &self,
        connection: &mut Connection,
        env: &mut E,
    ) -> Result<u64, ProxyError> {
        let table = command_table::<E>();
        let mut served = 0_u64;

        while let Some(request) = connection.receive()? {
            let response = match dispatch(&table, env, &request) {
                Ok(response) => response,
                Err(err) => {
                    error!(
                        parent: &self.span,
                        cmd = ?request.envelope.cmd,
                        kind = err.kind(),
                        error = %err,
                        "command failed"
                    );
                    Message::new(err.to_envelope())
                }
            };
            connection.send(&response)?;
            served += 1;
        }
        Ok(served)
    }
}

fn dispatch<E: RlEnvironment>(
    table: &HashMap<Command, Handler<E>>,
    env: &mut E,
    request: &Message,
) -> Result<Message, HandlerError> {
    let name = request
        .envelope
        .cmd
        .as_deref()
        .ok_or_else(|| HandlerError::UnknownCommand(String::new()))?;
    let handler = name
        .parse::<Command>()
        .ok()
        .and_then(|cmd| table.get(&cmd))
        .ok_or_else(|| HandlerError::UnknownCommand(name.to_string()))?;
    debug!(cmd = name, "dispatching");
    handler(env, request)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
