//! Single-slot handoff between the blocking learner thread and the plan
//! scheduler.
//!
//! [`channel`] returns the two halves. The learner side ([`Bridge`]) submits
//! one [`UnitOfWork`] at a time and blocks until the scheduler side
//! ([`BridgeEndpoint`]) replies. [`Bridge::stop_delegation`] cancels the
//! scheduler loop; the endpoint then drops anything still queued so a
//! blocked `submit` returns [`BridgeError::Closed`].
//!
//! `submit` uses blocking channel operations and must not be called from
//! inside an async runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info_span, warn};

use stepbridge_core::error::{DeviceError, EnvError};
use stepbridge_core::types::Readback;

use crate::unit::UnitOfWork;

// ---------------------------------------------------------------------------
// BridgeError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge closed: delegation was stopped")]
    Closed,

    #[error("Bridge busy: another unit of work is already in flight")]
    Busy,

    #[error("{operation} unit failed: {source}")]
    Unit {
        operation: &'static str,
        #[source]
        source: DeviceError,
    },
}

impl From<BridgeError> for EnvError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Closed => Self::BridgeClosed,
            BridgeError::Busy => Self::BridgeBusy,
            BridgeError::Unit { operation, source } => Self::Device { operation, source },
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Shared {
    in_flight: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag when the submitting call returns.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type Reply = Result<Readback, DeviceError>;

/// Create a connected bridge pair with a default `bridge` span.
#[must_use]
pub fn channel() -> (Bridge, BridgeEndpoint) {
    channel_with_span(info_span!("bridge"))
}

/// Create a connected bridge pair logging under `span`.
#[must_use]
pub fn channel_with_span(span: Span) -> (Bridge, BridgeEndpoint) {
    let (tx, rx) = mpsc::channel(1);
    let shared = Arc::new(Shared {
        in_flight: AtomicBool::new(false),
        closed: AtomicBool::new(false),
        cancel: CancellationToken::new(),
    });
    let bridge = Bridge {
        tx,
        shared: Arc::clone(&shared),
        span: span.clone(),
    };
    let endpoint = BridgeEndpoint { rx, shared, span };
    (bridge, endpoint)
}

// ---------------------------------------------------------------------------
// Bridge (learner side)
// ---------------------------------------------------------------------------

/// Learner-side handle. Cheap to clone; all clones share one slot.
#[derive(Debug, Clone)]
pub struct Bridge {
    tx: mpsc::Sender<Submission>,
    shared: Arc<Shared>,
    span: Span,
}

impl Bridge {
    /// Hand `unit` to the scheduler and block until it has run.
    ///
    /// Fails fast with [`BridgeError::Busy`] when another submission is
    /// still outstanding. A unit that fails on the scheduler closes the
    /// bridge.
    pub fn submit(&self, unit: UnitOfWork) -> Result<Readback, BridgeError> {
        let operation = unit.operation();
        if self.shared.is_closed() {
            return Err(BridgeError::Closed);
        }
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            warn!(parent: &self.span, operation, "submit while another unit is in flight");
            return Err(BridgeError::Busy);
        }
        let _in_flight = InFlight(&self.shared.in_flight);

        debug!(parent: &self.span, operation, "submitting unit of work");
        let (reply, response) = oneshot::channel();
        self.tx
            .blocking_send(Submission { unit, reply })
            .map_err(|_| BridgeError::Closed)?;

        match response.blocking_recv() {
            Ok(Ok(readback)) => {
                debug!(parent: &self.span, operation, signals = readback.len(), "unit completed");
                Ok(readback)
            }
            Ok(Err(source)) => {
                self.shared.close();
                Err(BridgeError::Unit { operation, source })
            }
            Err(_) => Err(BridgeError::Closed),
        }
    }

    /// Tell the scheduler no further units will come.
    ///
    /// Takes effect at the scheduler's next iteration boundary. Any caller
    /// blocked in [`submit`](Self::submit) is then released with
    /// [`BridgeError::Closed`].
    pub fn stop_delegation(&self) {
        if !self.shared.is_closed() {
            debug!(parent: &self.span, "stopping delegation");
        }
        self.shared.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

// ---------------------------------------------------------------------------
// BridgeEndpoint (scheduler side)
// ---------------------------------------------------------------------------

/// A unit of work waiting for the scheduler, plus the slot for its result.
#[derive(Debug)]
pub struct Submission {
    unit: UnitOfWork,
    reply: oneshot::Sender<Reply>,
}

impl Submission {
    #[must_use]
    pub const fn unit(&self) -> &UnitOfWork {
        &self.unit
    }

    #[must_use]
    pub fn into_parts(self) -> (UnitOfWork, Responder) {
        (self.unit, Responder(self.reply))
    }
}

/// Delivers the result of one unit back to the blocked caller.
///
/// Dropping it without sending releases the caller with
/// [`BridgeError::Closed`].
#[derive(Debug)]
pub struct Responder(oneshot::Sender<Reply>);

impl Responder {
    /// Returns `false` when the caller is no longer waiting.
    pub fn send(self, result: Reply) -> bool {
        self.0.send(result).is_ok()
    }
}

/// Scheduler-side half of the bridge.
#[derive(Debug)]
pub struct BridgeEndpoint {
    rx: mpsc::Receiver<Submission>,
    shared: Arc<Shared>,
    span: Span,
}

impl BridgeEndpoint {
    /// Wait for the next submission.
    ///
    /// Returns `None` once delegation is stopped or every [`Bridge`] clone
    /// has been dropped.
    pub async fn next_submission(&mut self) -> Option<Submission> {
        tokio::select! {
            biased;
            () = self.shared.cancel.cancelled() => None,
            submission = self.rx.recv() => submission,
        }
    }

    /// Token cancelled by [`Bridge::stop_delegation`] and [`close`](Self::close).
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Refuse further submissions and release anything still queued.
    pub fn close(&mut self) {
        self.shared.close();
        self.rx.close();
        let mut dropped = 0_usize;
        while let Ok(submission) = self.rx.try_recv() {
            drop(submission);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(parent: &self.span, dropped, "released queued submissions");
        }
    }
}

impl Drop for BridgeEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
