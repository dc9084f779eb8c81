//! Environment lifecycle state machine.
//!
//! [`LifecycleStateMachine`] tracks the current [`EnvironmentState`] and
//! refuses any change that is not listed in the static transition table:
//!
//! ```text
//! undefined    -> resetting, setting_up, tearing_down, failed
//! setting_up   -> initialised, tearing_down, failed
//! resetting    -> initialised, tearing_down, failed
//! initialised  -> stepping, done, resetting, tearing_down, failed
//! stepping     -> stepping, done, resetting, tearing_down, failed
//! done         -> setting_up, done, resetting, tearing_down, failed
//! tearing_down -> undefined, failed
//! failed       -> undefined, resetting, tearing_down, failed
//! ```
//!
//! There is no automatic recovery from `failed`; the caller must reset or
//! tear down explicitly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidTransition;

// ---------------------------------------------------------------------------
// EnvironmentState
// ---------------------------------------------------------------------------

/// State the environment is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Undefined,
    SettingUp,
    TearingDown,
    Resetting,
    Initialised,
    Stepping,
    Done,
    Failed,
}

impl EnvironmentState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Undefined,
        Self::SettingUp,
        Self::TearingDown,
        Self::Resetting,
        Self::Initialised,
        Self::Stepping,
        Self::Done,
        Self::Failed,
    ];

    /// States directly reachable from `self`.
    #[must_use]
    pub const fn successors(self) -> &'static [Self] {
        use EnvironmentState::{
            Done, Failed, Initialised, Resetting, SettingUp, Stepping, TearingDown, Undefined,
        };
        match self {
            Undefined => &[Resetting, SettingUp, TearingDown, Failed],
            SettingUp | Resetting => &[Initialised, TearingDown, Failed],
            Initialised => &[Stepping, Done, Resetting, TearingDown, Failed],
            Stepping => &[Stepping, Done, Resetting, TearingDown, Failed],
            Done => &[SettingUp, Done, Resetting, TearingDown, Failed],
            TearingDown => &[Undefined, Failed],
            Failed => &[Undefined, Resetting, TearingDown, Failed],
        }
    }

    /// Whether `target` appears in the transition table for `self`.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.successors().contains(&target)
    }

    /// Snake-case name, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::SettingUp => "setting_up",
            Self::TearingDown => "tearing_down",
            Self::Resetting => "resetting",
            Self::Initialised => "initialised",
            Self::Stepping => "stepping",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LifecycleStateMachine
// ---------------------------------------------------------------------------

/// Tracks the environment state and enforces valid transitions.
///
/// # Example
///
/// ```
/// use stepbridge_core::lifecycle::{EnvironmentState, LifecycleStateMachine};
///
/// let mut sm = LifecycleStateMachine::new();
/// assert_eq!(sm.state(), EnvironmentState::Undefined);
/// sm.transition(EnvironmentState::SettingUp).unwrap();
/// assert!(sm.transition(EnvironmentState::Stepping).is_err());
/// assert_eq!(sm.state(), EnvironmentState::SettingUp);
/// ```
#[derive(Debug)]
pub struct LifecycleStateMachine {
    state: EnvironmentState,
}

impl LifecycleStateMachine {
    /// Create a new state machine in the [`Undefined`](EnvironmentState::Undefined) state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: EnvironmentState::Undefined,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> EnvironmentState {
        self.state
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.state, EnvironmentState::Failed)
    }

    /// Validate and apply a transition to `target`.
    ///
    /// Returns [`InvalidTransition`] and leaves the state unchanged when
    /// `target` is not reachable from the current state.
    pub fn transition(&mut self, target: EnvironmentState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(target) {
            return Err(InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        Ok(())
    }

    /// Force the machine into [`Failed`](EnvironmentState::Failed).
    ///
    /// Every state lists `failed` as a successor, so this never needs the
    /// table check.
    pub const fn enter_failed(&mut self) {
        self.state = EnvironmentState::Failed;
    }
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(state: EnvironmentState) -> LifecycleStateMachine {
        LifecycleStateMachine { state }
    }

    #[test]
    fn new_starts_undefined() {
        let sm = LifecycleStateMachine::new();
        assert_eq!(sm.state(), EnvironmentState::Undefined);
        assert!(!sm.is_failed());
    }

    #[test]
    fn default_starts_undefined() {
        let sm = LifecycleStateMachine::default();
        assert_eq!(sm.state(), EnvironmentState::Undefined);
    }

    #[test]
    fn every_listed_transition_moves_to_target() {
        for from in EnvironmentState::ALL {
            for &to in from.successors() {
                let mut sm = machine_in(from);
                sm.transition(to).unwrap();
                assert_eq!(sm.state(), to, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn every_unlisted_transition_is_refused_without_side_effect() {
        let mut refused = 0;
        for from in EnvironmentState::ALL {
            for to in EnvironmentState::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let mut sm = machine_in(from);
                let err = sm.transition(to).unwrap_err();
                assert_eq!(err, InvalidTransition { from, to });
                assert_eq!(sm.state(), from, "{from} -> {to} must not move");
                refused += 1;
            }
        }
        // 64 pairs minus 31 listed edges.
        assert_eq!(refused, 33);
    }

    #[test]
    fn every_state_can_fail() {
        for from in EnvironmentState::ALL {
            assert!(from.can_transition_to(EnvironmentState::Failed), "{from}");
        }
    }

    #[test]
    fn full_episode_path() {
        let mut sm = LifecycleStateMachine::new();
        for next in [
            EnvironmentState::SettingUp,
            EnvironmentState::Initialised,
            EnvironmentState::Resetting,
            EnvironmentState::Initialised,
            EnvironmentState::Stepping,
            EnvironmentState::Stepping,
            EnvironmentState::Done,
            EnvironmentState::Resetting,
            EnvironmentState::Initialised,
            EnvironmentState::TearingDown,
            EnvironmentState::Undefined,
        ] {
            sm.transition(next).unwrap();
        }
        assert_eq!(sm.state(), EnvironmentState::Undefined);
    }

    #[test]
    fn stepping_self_transition_is_allowed() {
        let mut sm = machine_in(EnvironmentState::Stepping);
        sm.transition(EnvironmentState::Stepping).unwrap();
        assert_eq!(sm.state(), EnvironmentState::Stepping);
    }

    #[test]
    fn failed_requires_explicit_recovery() {
        let mut sm = machine_in(EnvironmentState::Stepping);
        sm.enter_failed();
        assert!(sm.is_failed());
        assert!(sm.transition(EnvironmentState::Stepping).is_err());
        assert!(sm.transition(EnvironmentState::Initialised).is_err());
        sm.transition(EnvironmentState::Resetting).unwrap();
        assert!(!sm.is_failed());
    }

    #[test]
    fn state_names_match_serde() {
        for state in EnvironmentState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }
}
