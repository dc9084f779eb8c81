use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::framing::{read_message, write_message};
use crate::poll::{PollBudget, wait_readable, wait_writable};
use crate::protocol::{Message, ProxyError};

/// One duplex TCP socket with readiness-bounded send and receive.
///
/// Strictly one message each way per exchange; nothing is multiplexed.
/// The budget covers the whole message, not just its first byte.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    budget: PollBudget,
}

impl Connection {
    pub fn new(stream: TcpStream, budget: PollBudget) -> Result<Self, ProxyError> {
        stream.set_nodelay(true)?;
        Ok(Self { stream, budget })
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.stream.peer_addr()?)
    }

    #[must_use]
    pub const fn budget(&self) -> PollBudget {
        self.budget
    }

    /// Wait for writability, then write `message` before the budget runs out.
    pub fn send(&mut self, message: &Message) -> Result<(), ProxyError> {
        let deadline = Instant::now() + self.budget.timeout;
        wait_writable(&self.stream, self.budget)?;
        trace!(
            cmd = ?message.envelope.cmd,
            has_array = message.payload.is_some(),
            "sending message"
        );
        let mut writer = Deadline::new(&self.stream, deadline);
        let result = write_message(&mut BufWriter::new(&mut writer), message);
        self.stream.set_write_timeout(None)?;
        result.map_err(|e| self.timed_out(e))
    }

    /// Wait for readability, then read one message before the budget runs
    /// out.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly.
    pub fn receive(&mut self) -> Result<Option<Message>, ProxyError> {
        let deadline = Instant::now() + self.budget.timeout;
        wait_readable(&self.stream, self.budget)?;
        let mut reader = Deadline::new(&self.stream, deadline);
        let result = read_message(&mut reader);
        self.stream.set_read_timeout(None)?;
        let message = result.map_err(|e| self.timed_out(e))?;
        trace!(received = message.is_some(), "received message");
        Ok(message)
    }

    fn timed_out(&self, err: ProxyError) -> ProxyError {
        match err {
            ProxyError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                ProxyError::PollTimeout {
                    budget: self.budget.timeout,
                }
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Socket reads and writes that fail with `TimedOut` once `deadline` passes.
struct Deadline<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl<'a> Deadline<'a> {
    const fn new(stream: &'a TcpStream, deadline: Instant) -> Self {
        Self { stream, deadline }
    }

    fn remaining(&self) -> io::Result<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::from(ErrorKind::TimedOut));
        }
        Ok(remaining)
    }
}

impl Read for Deadline<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(Some(self.remaining()?))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

impl Write for Deadline<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(Some(self.remaining()?))?;
        let mut stream = self.stream;
        stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut stream = self.stream;
        stream.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
