//! Learner-side proxy for an environment served by [`EnvironmentServer`].
//!
//! [`EnvironmentServer`]: crate::server::EnvironmentServer

use std::net::{TcpStream, ToSocketAddrs};

use serde_json::Value;
use tracing::{Span, debug, info_span, warn};

use stepbridge_core::config::ProxyConfig;
use stepbridge_core::types::{Action, Observation, StepInfo, StepResult};

use crate::array::ArrayPayload;
use crate::connection::Connection;
use crate::poll::PollBudget;
use crate::protocol::{Command, Envelope, Message, ProxyError};

/// Synchronous client: one request, one response, in order.
pub struct EnvironmentClient {
    connection: Connection,
    span: Span,
}

impl EnvironmentClient {
    /// Connect to `addr` with default polling.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProxyError> {
        Self::connect_with_budget(addr, PollBudget::default())
    }

    /// Connect to the address and budget described by `config`.
    ///
    /// An invalid `config` is refused before connecting.
    pub fn connect_with_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let budget = PollBudget::from_config(config)?;
        Self::connect_with_budget(config.address(), budget)
    }

    pub fn connect_with_budget(
        addr: impl ToSocketAddrs,
        budget: PollBudget,
    ) -> Result<Self, ProxyError> {
        let stream = TcpStream::connect(addr)?;
        let connection = Connection::new(stream, budget)?;
        let span = info_span!("client", peer = %connection.peer_addr()?);
        debug!(parent: &span, "connected");
        Ok(Self { connection, span })
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Send `request` and wait for its response.
    ///
    /// A response carrying `exception` becomes [`ProxyError::Remote`]. A
    /// peer that hangs up mid-exchange is [`ProxyError::UnexpectedEof`].
    pub fn process_command(&mut self, request: &Message) -> Result<Message, ProxyError> {
        debug!(parent: &self.span, cmd = ?request.envelope.cmd, "request");
        self.connection.send(request)?;
        let response = self.connection.receive()?.ok_or(ProxyError::UnexpectedEof)?;

        if let Some(kind) = response.envelope.exception_kind() {
            let err = ProxyError::Remote {
                kind: kind.to_string(),
                args: response.envelope.args.clone(),
            };
            warn!(parent: &self.span, error = %err, "remote exception");
            return Err(err);
        }
        Ok(response)
    }

    pub fn setup(&mut self) -> Result<Observation, ProxyError> {
        let response = self.process_command(&Message::new(Envelope::request(Command::Setup)))?;
        observation(&response)
    }

    /// Seed the remote environment; returns the seed it applied.
    pub fn seed(&mut self, seed: u64) -> Result<u64, ProxyError> {
        let request =
            Message::new(Envelope::request(Command::Seed)).with_payload(ArrayPayload::scalar(seed));
        let response = self.process_command(&request)?;
        Ok(response.require_payload()?.to_scalar::<u64>()?)
    }

    pub fn reset(&mut self) -> Result<Observation, ProxyError> {
        let response = self.process_command(&Message::new(Envelope::request(Command::Reset)))?;
        observation(&response)
    }

    pub fn step(&mut self, action: &Action) -> Result<StepResult, ProxyError> {
        let payload = match action {
            Action::Scalar(v) => ArrayPayload::scalar(*v),
            Action::Vector(values) => ArrayPayload::from_slice(values),
        };
        let request = Message::new(Envelope::request(Command::Step)).with_payload(payload);
        let response = self.process_command(&request)?;

        let envelope = &response.envelope;
        let reward = envelope
            .require("reward")?
            .as_f64()
            .ok_or_else(|| invalid("reward", "expected a number"))?;
        let done = envelope
            .require("done")?
            .as_bool()
            .ok_or_else(|| invalid("done", "expected a boolean"))?;
        let info: StepInfo = match envelope.field("info") {
            None | Some(Value::Null) => StepInfo::new(),
            Some(value) => serde_json::from_value(value.clone())?,
        };

        Ok(StepResult {
            observation: observation(&response)?,
            reward,
            done,
            info,
        })
    }

    pub fn set_mode(&mut self, mode: &str) -> Result<(), ProxyError> {
        let request =
            Message::new(Envelope::request(Command::SetMode).with_field("set_mode", mode));
        self.process_command(&request)?;
        Ok(())
    }
}

fn observation(response: &Message) -> Result<Observation, ProxyError> {
    Ok(Observation::new(response.require_payload()?.to_f64_vec()))
}

fn invalid(field: &'static str, message: &str) -> ProxyError {
    ProxyError::InvalidField {
        field,
        message: message.to_string(),
    }
}
