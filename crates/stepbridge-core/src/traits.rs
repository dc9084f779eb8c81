use crate::error::EnvError;
use crate::types::{Action, Observation, StepResult};

// ---------------------------------------------------------------------------
// RlEnvironment
// ---------------------------------------------------------------------------

/// The capability set a learning loop (local or remote) drives.
///
/// Every concrete environment implements this; the remote server holds a
/// typed reference to it instead of forwarding arbitrary attributes. Calls
/// are strictly sequential from a single thread.
pub trait RlEnvironment {
    /// Read back the device and record the state episodes reset to.
    fn setup(&mut self) -> Result<Observation, EnvError>;

    /// Seed the environment's randomness; returns the seed actually used.
    fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError>;

    /// Drive the device back to the reset state and return the observation.
    fn reset(&mut self) -> Result<Observation, EnvError>;

    /// Apply one action and report `(observation, reward, done, info)`.
    fn step(&mut self, action: Action) -> Result<StepResult, EnvError>;

    /// Switch the evaluation mode (e.g. `"train"` / `"test"`).
    fn set_mode(&mut self, mode: &str) -> Result<(), EnvError>;
}

impl<E: RlEnvironment + ?Sized> RlEnvironment for &mut E {
    fn setup(&mut self) -> Result<Observation, EnvError> {
        (**self).setup()
    }

    fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
        (**self).seed(seed)
    }

    fn reset(&mut self) -> Result<Observation, EnvError> {
        (**self).reset()
    }

    fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
        (**self).step(action)
    }

    fn set_mode(&mut self, mode: &str) -> Result<(), EnvError> {
        (**self).set_mode(mode)
    }
}

impl<E: RlEnvironment + ?Sized> RlEnvironment for Box<E> {
    fn setup(&mut self) -> Result<Observation, EnvError> {
        (**self).setup()
    }

    fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
        (**self).seed(seed)
    }

    fn reset(&mut self) -> Result<Observation, EnvError> {
        (**self).reset()
    }

    fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
        (**self).step(action)
    }

    fn set_mode(&mut self, mode: &str) -> Result<(), EnvError> {
        (**self).set_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        steps: usize,
    }

    impl RlEnvironment for Counter {
        fn setup(&mut self) -> Result<Observation, EnvError> {
            Ok(Observation::zeros(1))
        }

        fn seed(&mut self, seed: Option<u64>) -> Result<u64, EnvError> {
            Ok(seed.unwrap_or(7))
        }

        fn reset(&mut self) -> Result<Observation, EnvError> {
            self.steps = 0;
            Ok(Observation::zeros(1))
        }

        fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
            let values = action.into_values(1)?;
            self.steps += 1;
            Ok(StepResult {
                observation: Observation::new(values),
                reward: 1.0,
                done: false,
                info: crate::types::StepInfo::new(),
            })
        }

        fn set_mode(&mut self, _mode: &str) -> Result<(), EnvError> {
            Ok(())
        }
    }

    #[test]
    fn boxed_dyn_environment_forwards() {
        let mut env: Box<dyn RlEnvironment> = Box::new(Counter { steps: 0 });
        env.reset().unwrap();
        let r = env.step(Action::Scalar(0.5)).unwrap();
        assert_eq!(r.observation.as_slice(), &[0.5]);
        assert_eq!(env.seed(None).unwrap(), 7);
    }

    #[test]
    fn mut_ref_environment_forwards() {
        fn drive(mut env: impl RlEnvironment) {
            env.step(Action::Scalar(1.0)).unwrap();
            env.step(Action::Scalar(1.0)).unwrap();
        }

        let mut counter = Counter { steps: 0 };
        drive(&mut counter);
        assert_eq!(counter.steps, 2);
    }
}
