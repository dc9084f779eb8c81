//! Readiness polling bounded by a total time budget.
//!
//! [`TimeToExpire`] splits the budget into sub-deadlines `start + i * dt`,
//! clamped to `start + budget`, and yields the time left until each one.
//! [`wait_readable`] / [`wait_writable`] poll the socket once per
//! sub-timeout and give up with [`ProxyError::PollTimeout`] when the
//! iterator runs dry.

use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use stepbridge_core::config::ProxyConfig;

use crate::protocol::ProxyError;

// ---------------------------------------------------------------------------
// PollBudget
// ---------------------------------------------------------------------------

/// Total budget and granularity for one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub timeout: Duration,
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollBudget {
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration, max_polls: u32) -> Self {
        Self {
            timeout,
            interval,
            max_polls,
        }
    }

    /// Budget described by `config`, which must validate.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        config.validate()?;
        Ok(Self::new(
            config.timeout(),
            config.poll_interval(),
            config.max_polls,
        ))
    }

    /// Start the clock.
    #[must_use]
    pub fn start(self) -> TimeToExpire {
        TimeToExpire::new(self.timeout, self.interval, self.max_polls)
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        let config = ProxyConfig::default();
        Self::new(config.timeout(), config.poll_interval(), config.max_polls)
    }
}

// ---------------------------------------------------------------------------
// TimeToExpire
// ---------------------------------------------------------------------------

/// Shrinking sequence of sub-timeouts covering a fixed budget.
#[derive(Debug, Clone)]
pub struct TimeToExpire {
    start: Instant,
    end: Instant,
    dt: Duration,
    i: u32,
    n_max: u32,
    finished: bool,
}

impl TimeToExpire {
    #[must_use]
    pub fn new(budget: Duration, dt: Duration, n_max: u32) -> Self {
        let start = Instant::now();
        Self {
            start,
            end: start + budget,
            dt,
            i: 0,
            n_max,
            finished: dt.is_zero(),
        }
    }

    #[must_use]
    pub fn budget(&self) -> Duration {
        self.end - self.start
    }
}

impl Iterator for TimeToExpire {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.finished || self.i >= self.n_max {
            return None;
        }
        self.i += 1;
        let expire = self
            .start
            .checked_add(self.dt * self.i)
            .map_or(self.end, |t| t.min(self.end));
        if expire >= self.end {
            self.finished = true;
        }
        Some(expire.saturating_duration_since(Instant::now()))
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Block until `fd` is readable or the budget is spent.
pub fn wait_readable(fd: &impl AsFd, budget: PollBudget) -> Result<(), ProxyError> {
    wait_ready(fd, PollFlags::POLLIN, budget)
}

/// Block until `fd` is writable or the budget is spent.
pub fn wait_writable(fd: &impl AsFd, budget: PollBudget) -> Result<(), ProxyError> {
    wait_ready(fd, PollFlags::POLLOUT, budget)
}

fn wait_ready(fd: &impl AsFd, events: PollFlags, budget: PollBudget) -> Result<(), ProxyError> {
    let schedule = budget.start();
    let total = schedule.budget();
    for remaining in schedule {
        let millis = u16::try_from(remaining.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(fd.as_fd(), events)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            // Hang-up and error conditions also count: the next read or
            // write reports them without blocking.
            Ok(n) if n > 0 => return Ok(()),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(errno) => return Err(ProxyError::Poll(errno)),
        }
    }
    Err(ProxyError::PollTimeout { budget: total })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    use super::*;

    #[test]
    fn sub_timeouts_shrink_and_stop_at_budget() {
        let schedule = TimeToExpire::new(Duration::from_secs(1), Duration::from_millis(200), 100);
        let waits: Vec<Duration> = schedule.collect();
        assert_eq!(waits.len(), 5);
        assert!(waits.iter().all(|w| *w <= Duration::from_secs(1)));
        // Each sub-deadline is later than the previous one.
        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
        assert!(waits.last().unwrap() <= &Duration::from_secs(1));
    }

    #[test]
    fn partial_last_interval_is_clamped() {
        let waits: Vec<Duration> =
            TimeToExpire::new(Duration::from_millis(500), Duration::from_millis(200), 100).collect();
        assert_eq!(waits.len(), 3);
        assert!(waits[2] <= Duration::from_millis(500));
    }

    #[test]
    fn max_polls_caps_the_sequence() {
        let waits: Vec<Duration> =
            TimeToExpire::new(Duration::from_secs(10), Duration::from_millis(100), 3).collect();
        assert_eq!(waits.len(), 3);
    }

    #[test]
    fn zero_interval_yields_nothing() {
        assert_eq!(
            TimeToExpire::new(Duration::from_secs(1), Duration::ZERO, 10).count(),
            0
        );
    }

    #[test]
    fn budget_from_config() {
        let budget = PollBudget::default();
        assert_eq!(budget.timeout, Duration::from_secs(10));
        assert_eq!(budget.interval, Duration::from_millis(200));
        assert_eq!(budget.max_polls, 100);
        assert_eq!(PollBudget::from_config(&ProxyConfig::default()).unwrap(), budget);
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = ProxyConfig {
            timeout_secs: -3.0,
            ..ProxyConfig::default()
        };
        let err = PollBudget::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn silent_socket_times_out_within_one_interval_of_budget() {
        let (_client, server) = pair();
        let budget = PollBudget::new(Duration::from_millis(300), Duration::from_millis(100), 100);

        let started = Instant::now();
        let err = wait_readable(&server, budget).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ProxyError::PollTimeout { budget } if budget == Duration::from_millis(300)));
        assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(300 + 100 + 300), "{elapsed:?}");
    }

    #[test]
    fn pending_data_is_ready_immediately() {
        let (mut client, server) = pair();
        client.write_all(b"x").unwrap();
        let started = Instant::now();
        wait_readable(&server, PollBudget::default()).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn fresh_socket_is_writable() {
        let (client, _server) = pair();
        wait_writable(&client, PollBudget::default()).unwrap();
    }
}
