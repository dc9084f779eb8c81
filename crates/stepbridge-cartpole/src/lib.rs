//! Simulated cart-pole for stepbridge.
//!
//! [`CartPoleDevice`] integrates the classic cart-pole dynamics whenever its
//! `cp_action` target is written. [`CartPoleModel`] turns its readbacks into
//! observations and rewards, with the usual 2.4 m / 12 degree limits.

pub mod device;
pub mod model;
pub mod physics;

pub use device::{CartPoleDevice, layout};
pub use model::{CartPoleEnv, CartPoleModel, cart_pole_env};
pub use physics::{CartPolePhysics, CartPoleState};
