/*
Copyright 2026 The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Ring state machine
//!
//! Both rings share one state model:
//!
//! ```text
//!     ┌─────────┐  reset   ┌───────────────┐  init  ┌─────────────┐
//!     │ Unknown │ ───────> │ Uninitialized │ ─────> │ Initialized │<──┐
//!     └─────────┘          └───────────────┘        └─────────────┘   │
//!                                 ^                    │      ^       │
//!                                 │ reset       put/get│      │ empty │
//!                                 │                    v      │       │
//!                          ┌────────────┐  DMA err  ┌──────┐  │  ┌────────┐
//!                          │ FatalError │ <──────── │ Free │ ─┘  │  Full  │
//!                          └────────────┘           └──────┘ <──>└────────┘
//! ```
//!
//! In [`FsmMode::Strict`] every requested transition is checked against the
//! table in [`RingState::can_transition_to`]. In [`FsmMode::Relaxed`] the
//! state is recorded for diagnostics only.

use log::error;

use crate::error::{Result, RingError};

/// Logical state of a command or result ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub enum RingState {
    #[default]
    Unknown,
    Uninitialized,
    Initialized,
    Free,
    Full,
    FatalError,
}

impl RingState {
    /// Transition table of the ring state machine.
    pub const fn can_transition_to(self, to: RingState) -> bool {
        use RingState::*;

        match (self, to) {
            (Unknown, Uninitialized) => true,
            (Uninitialized, Uninitialized | Initialized) => true,
            (Initialized | Free | Full, Uninitialized | Initialized | Free | Full | FatalError) => {
                true
            }
            (FatalError, Uninitialized) => true,
            _ => false,
        }
    }

    /// Can the ring take or hand out descriptors in this state?
    pub const fn is_operational(self) -> bool {
        matches!(
            self,
            RingState::Initialized | RingState::Free | RingState::Full
        )
    }

    /// State implied by a hand-over counter of `words` in a ring of
    /// `ring_size_words`. Counts beyond the ring map to `Unknown`, which no
    /// transition accepts.
    pub(crate) const fn for_fill(words: usize, ring_size_words: usize) -> RingState {
        if words == 0 {
            RingState::Initialized
        } else if words < ring_size_words {
            RingState::Free
        } else if words == ring_size_words {
            RingState::Full
        } else {
            RingState::Unknown
        }
    }
}

/// How strictly state transitions are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub enum FsmMode {
    /// Record states without checking transitions.
    #[default]
    Relaxed,
    /// Reject transitions that are not in the table.
    Strict,
}

/// Current state of one ring plus the checking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStateMachine {
    state: RingState,
    mode: FsmMode,
}

impl RingStateMachine {
    pub const fn new(mode: FsmMode) -> Self {
        Self {
            state: RingState::Unknown,
            mode,
        }
    }

    #[inline]
    pub fn state(&self) -> RingState {
        self.state
    }

    #[inline]
    pub fn mode(&self) -> FsmMode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: FsmMode) {
        self.mode = mode;
    }

    /// Request a transition to `to`.
    ///
    /// Strict mode leaves the state untouched and returns
    /// [`RingError::IllegalStateTransition`] when the table forbids the move.
    pub fn set_state(&mut self, to: RingState) -> Result<()> {
        if self.mode == FsmMode::Strict && !self.state.can_transition_to(to) {
            error!(
                "illegal ring state transition {:?} -> {:?}",
                self.state, to
            );
            return Err(RingError::IllegalStateTransition {
                from: self.state,
                to,
            });
        }

        self.state = to;
        Ok(())
    }

    /// Overwrite the state without consulting the table. Used by reset and
    /// init, which start over from a known state.
    pub(crate) fn force(&mut self, state: RingState) {
        self.state = state;
    }
}

impl Default for RingStateMachine {
    fn default() -> Self {
        Self::new(FsmMode::default())
    }
}
