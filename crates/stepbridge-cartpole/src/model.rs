//! Reward, termination and reset policy of the cart-pole task.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use stepbridge_core::error::EnvError;
use stepbridge_core::types::{Observation, Readback, ResetState};
use stepbridge_env::environment::{EnvModel, Environment};

use crate::device::{self, STATE_SIGNALS};
use crate::physics::CartPoleState;

/// Cart position beyond which the episode ends.
pub const X_THRESHOLD: f64 = 2.4;

/// Pole angle (12 degrees) beyond which the episode ends.
pub const THETA_THRESHOLD_RADIANS: f64 = 12.0 * 2.0 * std::f64::consts::PI / 360.0;

/// Half-width of the uniform reset distribution.
const RESET_SPREAD: f64 = 0.05;

/// The cart-pole environment: [`CartPoleModel`] behind the generic driver.
pub type CartPoleEnv = Environment<CartPoleModel>;

/// A cart-pole environment wired to the cart-pole device layout.
#[must_use]
pub fn cart_pole_env() -> CartPoleEnv {
    Environment::new(CartPoleModel::default(), device::layout())
}

#[derive(Debug, Clone)]
pub struct CartPoleModel {
    rng: ChaCha8Rng,
    initial: CartPoleState,
    steps_beyond_done: Option<u32>,
}

impl Default for CartPoleModel {
    fn default() -> Self {
        Self {
            rng: ChaCha8Rng::from_rng(&mut rand::rng()),
            initial: CartPoleState::default(),
            steps_beyond_done: None,
        }
    }
}

impl CartPoleModel {
    /// State seen at setup.
    #[must_use]
    pub const fn initial_state(&self) -> CartPoleState {
        self.initial
    }

    #[must_use]
    pub const fn steps_beyond_done(&self) -> Option<u32> {
        self.steps_beyond_done
    }

    fn extract_state(readback: &Readback) -> Result<CartPoleState, EnvError> {
        let mut values = [0.0; 4];
        for (slot, name) in values.iter_mut().zip(STATE_SIGNALS) {
            *slot = readback.value(name)?;
        }
        Ok(CartPoleState::from_array(values))
    }
}

impl EnvModel for CartPoleModel {
    fn store_initial_state(&mut self, readback: &Readback) -> Result<(), EnvError> {
        self.initial = Self::extract_state(readback)?;
        Ok(())
    }

    fn state_to_reset_to(&mut self) -> Result<ResetState, EnvError> {
        self.steps_beyond_done = None;
        let values = (0..STATE_SIGNALS.len())
            .map(|_| self.rng.random_range(-RESET_SPREAD..RESET_SPREAD))
            .collect();
        Ok(ResetState::new(values))
    }

    fn compute_state(&self, readback: &Readback) -> Result<Observation, EnvError> {
        Ok(Observation::new(
            Self::extract_state(readback)?.to_array().to_vec(),
        ))
    }

    fn compute_reward_terminal(&mut self, readback: &Readback) -> Result<(f64, bool), EnvError> {
        let state = Self::extract_state(readback)?;
        let done = state.x > X_THRESHOLD || state.theta.abs() > THETA_THRESHOLD_RADIANS;

        if !done {
            return Ok((1.0, false));
        }
        match self.steps_beyond_done {
            None => {
                self.steps_beyond_done = Some(0);
                Ok((1.0, true))
            }
            Some(steps) => {
                if steps == 0 {
                    warn!("step() called after the episode ended; call reset() first");
                }
                self.steps_beyond_done = Some(steps + 1);
                Ok((0.0, true))
            }
        }
    }

    /// Reseed the reset distribution; without a seed, draw one.
    fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
        let seed = seed.unwrap_or_else(rand::random);
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        Ok(seed)
    }

    fn validate_mode(&self, mode: &str) -> Result<(), EnvError> {
        match mode {
            "train" | "test" => Ok(()),
            other => Err(EnvError::InvalidArgument(format!(
                "unknown mode {other:?}, expected \"train\" or \"test\""
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn readback(state: [f64; 4]) -> Readback {
        STATE_SIGNALS.into_iter().zip(state).collect()
    }

    #[test]
    fn threshold_is_twelve_degrees() {
        assert_relative_eq!(THETA_THRESHOLD_RADIANS, 12.0_f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn running_state_earns_one() {
        let mut model = CartPoleModel::default();
        let (reward, done) = model
            .compute_reward_terminal(&readback([0.0, 0.0, 0.1, 0.0]))
            .unwrap();
        assert_relative_eq!(reward, 1.0);
        assert!(!done);
        assert_eq!(model.steps_beyond_done(), None);
    }

    #[test]
    fn steps_beyond_done_bookkeeping() {
        let mut model = CartPoleModel::default();
        let fallen = readback([0.0, 0.0, 0.3, 0.0]);

        assert_eq!(model.compute_reward_terminal(&fallen).unwrap(), (1.0, true));
        assert_eq!(model.compute_reward_terminal(&fallen).unwrap(), (0.0, true));
        assert_eq!(model.compute_reward_terminal(&fallen).unwrap(), (0.0, true));
        assert_eq!(model.steps_beyond_done(), Some(2));

        model.state_to_reset_to().unwrap();
        assert_eq!(model.steps_beyond_done(), None);
    }

    #[test]
    fn only_positive_cart_excursion_terminates() {
        let mut model = CartPoleModel::default();
        assert!(model.compute_reward_terminal(&readback([2.5, 0.0, 0.0, 0.0])).unwrap().1);
        let mut model = CartPoleModel::default();
        assert!(!model.compute_reward_terminal(&readback([-2.5, 0.0, 0.0, 0.0])).unwrap().1);
        assert!(model.compute_reward_terminal(&readback([0.0, 0.0, -0.25, 0.0])).unwrap().1);
    }

    #[test]
    fn seeded_reset_states_are_reproducible_and_bounded() {
        let mut a = CartPoleModel::default();
        let mut b = CartPoleModel::default();
        assert_eq!(a.seed(Some(7)).unwrap(), 7);
        b.seed(Some(7)).unwrap();

        for _ in 0..20 {
            let sa = a.state_to_reset_to().unwrap();
            let sb = b.state_to_reset_to().unwrap();
            assert_eq!(sa, sb);
            assert_eq!(sa.len(), 4);
            assert!(sa.values().iter().all(|v| (-0.05..0.05).contains(v)));
        }
    }

    #[test]
    fn modes() {
        let model = CartPoleModel::default();
        assert!(model.validate_mode("train").is_ok());
        assert!(model.validate_mode("test").is_ok());
        let err = model.validate_mode("eval").unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn observation_follows_signal_order() {
        let model = CartPoleModel::default();
        let obs = model.compute_state(&readback([1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(obs.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
