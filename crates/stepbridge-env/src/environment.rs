//! RL-facing environment driving the plan scheduler through a [`Bridge`].
//!
//! [`Environment`] owns the lifecycle state machine and turns each
//! `setup`/`reset`/`step`/`close` call into a guarded transition plus one
//! bridge submission. The concrete system supplies an [`EnvModel`] that
//! derives observations and rewards from device readbacks.

use std::sync::Arc;

use tracing::{Span, debug, info, info_span, warn};

use stepbridge_core::error::EnvError;
use stepbridge_core::lifecycle::{EnvironmentState, LifecycleStateMachine};
use stepbridge_core::traits::RlEnvironment;
use stepbridge_core::types::{Action, Observation, Readback, ResetState, StepInfo, StepResult};

use crate::bridge::Bridge;
use crate::device::DeviceLayout;
use crate::unit::UnitOfWork;

// ---------------------------------------------------------------------------
// EnvModel
// ---------------------------------------------------------------------------

/// Derivation hooks a concrete environment supplies.
pub trait EnvModel {
    /// Remember what the device looked like at setup.
    fn store_initial_state(&mut self, readback: &Readback) -> Result<(), EnvError>;

    /// The state-motor setpoints the next reset drives to.
    fn state_to_reset_to(&mut self) -> Result<ResetState, EnvError>;

    /// Observation vector handed to the learner.
    fn compute_state(&self, readback: &Readback) -> Result<Observation, EnvError>;

    /// `(reward, done)` for the step that produced `readback`.
    fn compute_reward_terminal(&mut self, readback: &Readback) -> Result<(f64, bool), EnvError>;

    /// Seed the model's randomness and return the seed in use.
    fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
        Ok(seed.unwrap_or_default())
    }

    /// Reject modes the model does not know.
    fn validate_mode(&self, mode: &str) -> Result<(), EnvError> {
        let _ = mode;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Blocking environment whose device work runs on the scheduler thread.
///
/// Calls must come from a single thread, strictly one after another. Any
/// failure while a unit of work is in flight moves the environment to
/// [`Failed`](EnvironmentState::Failed) and stops delegation on the bridge.
///
/// # Example
///
/// ```no_run
/// # use stepbridge_env::prelude::*;
/// # fn demo<M: EnvModel>(model: M, bridge: Bridge) -> Result<(), EnvError> {
/// let layout = DeviceLayout::new(["det"], ["motor"], ["motor"]);
/// let mut env = Environment::new(model, layout);
/// env.attach_bridge(bridge);
/// env.setup()?;
/// env.reset()?;
/// let result = env.step(Action::Scalar(1.0))?;
/// # let _ = result;
/// env.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Environment<M> {
    model: M,
    layout: Arc<DeviceLayout>,
    machine: LifecycleStateMachine,
    bridge: Option<Bridge>,
    span: Span,
}

impl<M: EnvModel> Environment<M> {
    #[must_use]
    pub fn new(model: M, layout: DeviceLayout) -> Self {
        Self {
            model,
            layout: Arc::new(layout),
            machine: LifecycleStateMachine::new(),
            bridge: None,
            span: info_span!("environment"),
        }
    }

    /// Log under `span` instead of the default `environment` span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    // -- accessors ---------------------------------------------------------

    #[must_use]
    pub const fn state(&self) -> EnvironmentState {
        self.machine.state()
    }

    #[must_use]
    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    #[must_use]
    pub const fn model(&self) -> &M {
        &self.model
    }

    pub const fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    // -- bridge ------------------------------------------------------------

    /// Attach `bridge`, returning the one it replaces.
    pub fn attach_bridge(&mut self, bridge: Bridge) -> Option<Bridge> {
        let previous = self.bridge.replace(bridge);
        info!(parent: &self.span, replaced = previous.is_some(), "bridge attached");
        previous
    }

    pub fn detach_bridge(&mut self) -> Option<Bridge> {
        let previous = self.bridge.take();
        if previous.is_some() {
            info!(parent: &self.span, "bridge detached");
        }
        previous
    }

    #[must_use]
    pub const fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    // -- lifecycle ---------------------------------------------------------

    /// Read the device and store the state episodes reset to.
    ///
    /// Returns the observation derived from the setup readback.
    pub fn setup(&mut self) -> Result<Observation, EnvError> {
        self.require_bridge()
            .map_err(|err| EnvError::Setup(Box::new(err)))?;
        self.machine.transition(EnvironmentState::SettingUp)?;

        let unit = UnitOfWork::Setup {
            layout: Arc::clone(&self.layout),
        };
        let observation = self
            .submit(unit)
            .and_then(|readback| {
                self.model.store_initial_state(&readback)?;
                self.model.compute_state(&readback)
            })
            .map_err(|err| EnvError::Setup(Box::new(self.fail(err))))?;

        self.machine.transition(EnvironmentState::Initialised)?;
        info!(parent: &self.span, observation_len = observation.len(), "environment set up");
        Ok(observation)
    }

    /// Drive the state motors to the reset state and return the observation.
    pub fn reset(&mut self) -> Result<Observation, EnvError> {
        self.require_bridge()?;
        self.machine.transition(EnvironmentState::Resetting)?;

        let observation = self.run_reset().map_err(|err| self.fail(err))?;

        self.machine.transition(EnvironmentState::Initialised)?;
        debug!(parent: &self.span, "environment reset");
        Ok(observation)
    }

    /// Apply one action.
    ///
    /// A wrong action cardinality re-enters `Stepping` and is reported as
    /// [`EnvError::ActionShape`] without touching the device.
    pub fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
        self.require_bridge()?;
        self.machine.transition(EnvironmentState::Stepping)?;

        let values = match action.into_values(self.layout.n_motors()) {
            Ok(values) => values,
            Err(err) => {
                self.machine.transition(EnvironmentState::Stepping)?;
                warn!(parent: &self.span, error = %err, "rejected action");
                return Err(err);
            }
        };

        let result = self.run_step(values).map_err(|err| self.fail(err))?;
        if result.done {
            self.machine.transition(EnvironmentState::Done)?;
            debug!(parent: &self.span, reward = result.reward, "episode done");
        }
        Ok(result)
    }

    /// Run the teardown plan, stop delegation and return to `Undefined`.
    pub fn close(&mut self) -> Result<(), EnvError> {
        self.require_bridge()?;
        self.machine.transition(EnvironmentState::TearingDown)?;

        self.run_teardown().map_err(|err| self.fail(err))?;
        self.stop_delegation();

        self.machine.transition(EnvironmentState::Undefined)?;
        info!(parent: &self.span, "environment closed");
        Ok(())
    }

    /// Stop delegation and move to `Done`.
    pub fn mark_done(&mut self) -> Result<(), EnvError> {
        self.stop_delegation();
        self.machine.transition(EnvironmentState::Done)?;
        Ok(())
    }

    /// Seed the model. Answered locally; nothing crosses the bridge.
    pub fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
        let used = self.model.seed(seed)?;
        debug!(parent: &self.span, seed = used, "seeded");
        Ok(used)
    }

    /// Validate `mode` with the model, then hand it to the device.
    pub fn set_mode(&mut self, mode: &str) -> Result<(), EnvError> {
        self.model.validate_mode(mode)?;
        self.require_bridge()?;
        self.submit(UnitOfWork::SetMode { mode: mode.into() })
            .map_err(|err| self.fail(err))?;
        info!(parent: &self.span, mode, "mode set");
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn run_reset(&mut self) -> Result<Observation, EnvError> {
        let reset_state = self.model.state_to_reset_to()?;
        let readback = self.submit(UnitOfWork::Reset {
            layout: Arc::clone(&self.layout),
            reset_state,
        })?;
        let observation = self.model.compute_state(&readback)?;
        if observation.is_empty() {
            return Err(EnvError::EmptyObservation);
        }
        Ok(observation)
    }

    fn run_step(&mut self, values: Vec<f64>) -> Result<StepResult, EnvError> {
        let readback = self.submit(UnitOfWork::Step {
            layout: Arc::clone(&self.layout),
            values,
        })?;
        let observation = self.model.compute_state(&readback)?;
        let (reward, done) = self.model.compute_reward_terminal(&readback)?;
        Ok(StepResult {
            observation,
            reward,
            done,
            info: StepInfo::new(),
        })
    }

    fn run_teardown(&mut self) -> Result<(), EnvError> {
        let reset_state = self.model.state_to_reset_to()?;
        self.submit(UnitOfWork::Teardown {
            layout: Arc::clone(&self.layout),
            reset_state,
        })?;
        Ok(())
    }

    fn require_bridge(&self) -> Result<&Bridge, EnvError> {
        self.bridge.as_ref().ok_or(EnvError::NoBridge)
    }

    fn submit(&self, unit: UnitOfWork) -> Result<Readback, EnvError> {
        let bridge = self.require_bridge()?;
        Ok(bridge.submit(unit)?)
    }

    fn stop_delegation(&self) {
        if let Some(bridge) = &self.bridge {
            bridge.stop_delegation();
        }
    }

    /// Enter `Failed` and release the scheduler, handing `err` back.
    fn fail(&mut self, err: EnvError) -> EnvError {
        warn!(
            parent: &self.span,
            state = %self.machine.state(),
            kind = err.kind(),
            error = %err,
            "environment failed"
        );
        self.machine.enter_failed();
        self.stop_delegation();
        err
    }
}

impl<M: EnvModel> RlEnvironment for Environment<M> {
    fn setup(&mut self) -> Result<Observation, EnvError> {
        Self::setup(self)
    }

    fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
        Self::seed(self, seed)
    }

    fn reset(&mut self) -> Result<Observation, EnvError> {
        Self::reset(self)
    }

    fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
        Self::step(self, action)
    }

    fn set_mode(&mut self, mode: &str) -> Result<(), EnvError> {
        Self::set_mode(self, mode)
    }
}
