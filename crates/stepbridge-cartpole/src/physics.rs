//! Classic cart-pole dynamics, integrated with explicit Euler.

use serde::{Deserialize, Serialize};

/// Cart position/velocity and pole angle/angular velocity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CartPoleState {
    pub x: f64,
    pub x_dot: f64,
    pub theta: f64,
    pub theta_dot: f64,
}

impl CartPoleState {
    #[must_use]
    pub const fn new(x: f64, x_dot: f64, theta: f64, theta_dot: f64) -> Self {
        Self {
            x,
            x_dot,
            theta,
            theta_dot,
        }
    }

    /// `[x, x_dot, theta, theta_dot]`.
    #[must_use]
    pub const fn to_array(self) -> [f64; 4] {
        [self.x, self.x_dot, self.theta, self.theta_dot]
    }

    #[must_use]
    pub const fn from_array(values: [f64; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }
}

/// Physical constants of the cart-pole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartPolePhysics {
    pub gravity: f64,
    pub mass_cart: f64,
    pub mass_pole: f64,
    /// Half the pole length.
    pub length: f64,
    pub force_mag: f64,
    /// Integration step in seconds.
    pub tau: f64,
}

impl Default for CartPolePhysics {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
        }
    }
}

impl CartPolePhysics {
    #[must_use]
    pub fn total_mass(&self) -> f64 {
        self.mass_cart + self.mass_pole
    }

    /// Force for a discrete action: `1` pushes right, `0` pushes left.
    ///
    /// Values above `0.5` count as `1`.
    #[must_use]
    pub fn force(&self, action: f64) -> f64 {
        if action > 0.5 {
            self.force_mag
        } else {
            -self.force_mag
        }
    }

    /// Advance `state` by one `tau` under `action`.
    #[must_use]
    pub fn step(&self, state: CartPoleState, action: f64) -> CartPoleState {
        let force = self.force(action);
        let (sin_theta, cos_theta) = state.theta.sin_cos();
        let total_mass = self.total_mass();
        let pole_mass_length = self.mass_pole * self.length;

        let temp =
            (force + pole_mass_length * state.theta_dot * state.theta_dot * sin_theta) / total_mass;
        let theta_acc = (self.gravity * sin_theta - cos_theta * temp)
            / (self.length * (4.0 / 3.0 - self.mass_pole * cos_theta * cos_theta / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        CartPoleState {
            x: self.tau.mul_add(state.x_dot, state.x),
            x_dot: self.tau.mul_add(x_acc, state.x_dot),
            theta: self.tau.mul_add(state.theta_dot, state.theta),
            theta_dot: self.tau.mul_add(theta_acc, state.theta_dot),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn push_right_from_rest() {
        let physics = CartPolePhysics::default();
        let next = physics.step(CartPoleState::default(), 1.0);

        // Position and angle integrate the old velocities, which are zero.
        assert_relative_eq!(next.x, 0.0);
        assert_relative_eq!(next.theta, 0.0);
        // temp = 10 / 1.1; theta_acc = -temp / (0.5 * (4/3 - 0.1/1.1))
        let temp = 10.0 / 1.1;
        let theta_acc = -temp / (0.5 * (4.0 / 3.0 - 0.1 / 1.1));
        let x_acc = temp - 0.05 * theta_acc / 1.1;
        assert_relative_eq!(next.x_dot, 0.02 * x_acc, epsilon = 1e-12);
        assert_relative_eq!(next.theta_dot, 0.02 * theta_acc, epsilon = 1e-12);
        assert!(next.x_dot > 0.0);
        assert!(next.theta_dot < 0.0);
    }

    #[test]
    fn actions_are_mirror_images_at_rest() {
        let physics = CartPolePhysics::default();
        let right = physics.step(CartPoleState::default(), 1.0);
        let left = physics.step(CartPoleState::default(), 0.0);
        assert_relative_eq!(right.x_dot, -left.x_dot, epsilon = 1e-12);
        assert_relative_eq!(right.theta_dot, -left.theta_dot, epsilon = 1e-12);
    }

    #[test]
    fn tilted_pole_falls_further() {
        let physics = CartPolePhysics::default();
        let mut state = CartPoleState::new(0.0, 0.0, 0.05, 0.0);
        for _ in 0..10 {
            // Alternate pushes so the cart stays roughly centred.
            state = physics.step(state, 1.0);
            state = physics.step(state, 0.0);
        }
        assert!(state.theta > 0.05);
    }

    #[test]
    fn array_roundtrip_order() {
        let state = CartPoleState::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(state.to_array(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(CartPoleState::from_array(state.to_array()), state);
    }
}
