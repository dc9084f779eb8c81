//! Cooperative plan scheduler plus the learner thread that feeds it.

use std::thread;

use thiserror::Error;
use tracing::{Instrument, Span, debug, error, info, info_span};

use stepbridge_core::config::RunnerConfig;

use crate::bridge::{self, Bridge, BridgeEndpoint};
use crate::device::Device;
use crate::plans::{DefaultPlans, PlanSet};

// ---------------------------------------------------------------------------
// Errors / report
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to build scheduler runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to spawn learner thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Learner thread panicked")]
    LearnerPanicked,
}

/// Why the scheduler loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every bridge handle was dropped.
    LearnerFinished,
    /// Delegation was stopped.
    Cancelled,
    /// The configured unit budget was used up.
    UnitBudget,
    /// A unit of work failed on the device.
    UnitFailed { operation: &'static str },
}

/// Outcome of [`ThreadedRunner::run`].
#[derive(Debug)]
pub struct RunReport<R> {
    /// Whatever the learner closure returned.
    pub output: R,
    /// Units executed to completion, failed ones included.
    pub units: u64,
    pub stop: StopReason,
}

// ---------------------------------------------------------------------------
// ThreadedRunner
// ---------------------------------------------------------------------------

/// Runs the plan scheduler on the calling thread and the learning loop on
/// a spawned one.
///
/// The scheduler is a single-threaded runtime; the device is only touched
/// there, so it need not be `Send`.
pub struct ThreadedRunner<D, P = DefaultPlans> {
    device: D,
    plans: P,
    config: RunnerConfig,
    span: Span,
}

impl<D: Device> ThreadedRunner<D> {
    #[must_use]
    pub fn new(device: D) -> Self {
        Self {
            device,
            plans: DefaultPlans,
            config: RunnerConfig::default(),
            span: info_span!("runner"),
        }
    }
}

impl<D: Device, P: PlanSet> ThreadedRunner<D, P> {
    /// Replace the plan set.
    #[must_use]
    pub fn with_plans<Q: PlanSet>(self, plans: Q) -> ThreadedRunner<D, Q> {
        ThreadedRunner {
            device: self.device,
            plans,
            config: self.config,
            span: self.span,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Start `learner` on its own thread with a fresh [`Bridge`] and serve
    /// its units until it lets go, delegation stops, a unit fails or the
    /// unit budget runs out.
    ///
    /// The learner thread is always joined before returning.
    pub fn run<F, R>(&mut self, learner: F) -> Result<RunReport<R>, RunnerError>
    where
        F: FnOnce(Bridge) -> R + Send + 'static,
        R: Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RunnerError::Runtime)?;

        let (bridge, mut endpoint) = bridge::channel_with_span(self.span.clone());
        let handle = thread::Builder::new()
            .name(self.config.learner_thread_name.clone())
            .spawn(move || learner(bridge))
            .map_err(RunnerError::Spawn)?;

        info!(parent: &self.span, max_units = ?self.config.max_units, "scheduler started");
        let (units, stop) = runtime.block_on(
            schedule(
                &mut endpoint,
                &self.plans,
                &mut self.device,
                self.config.max_units,
            )
            .instrument(self.span.clone()),
        );
        endpoint.close();

        let output = handle.join().map_err(|_| RunnerError::LearnerPanicked)?;
        info!(parent: &self.span, units, stop = ?stop, "scheduler stopped");
        Ok(RunReport {
            output,
            units,
            stop,
        })
    }
}

/// Scheduler loop: pull one submission, run it, reply, repeat.
async fn schedule(
    endpoint: &mut BridgeEndpoint,
    plans: &dyn PlanSet,
    device: &mut dyn Device,
    max_units: Option<u64>,
) -> (u64, StopReason) {
    let cancel = endpoint.cancellation();
    let mut units = 0_u64;

    loop {
        if max_units.is_some_and(|max| units >= max) {
            return (units, StopReason::UnitBudget);
        }

        let Some(submission) = endpoint.next_submission().await else {
            let reason = if cancel.is_cancelled() {
                StopReason::Cancelled
            } else {
                StopReason::LearnerFinished
            };
            return (units, reason);
        };

        let (unit, responder) = submission.into_parts();
        let operation = unit.operation();
        debug!(operation, unit = units, "executing unit of work");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = unit.execute(plans, device) => Some(result),
        };
        let Some(result) = outcome else {
            debug!(operation, "unit abandoned on cancellation");
            return (units, StopReason::Cancelled);
        };
        units += 1;

        match result {
            Ok(readback) => {
                responder.send(Ok(readback));
            }
            Err(err) => {
                error!(operation, error = %err, "unit of work failed");
                responder.send(Err(err));
                endpoint.close();
                return (units, StopReason::UnitFailed { operation });
            }
        }
    }
}
