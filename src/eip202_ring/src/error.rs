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

use thiserror::Error;

use crate::fsm::RingState;

/// The error type for ring control operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Malformed caller input or settings that are inconsistent with each other.
    /// Fix the call, nothing needs to be reset.
    #[error("Invalid argument: {0}")]
    Argument(&'static str),

    /// The settings ask for something the detected hardware (or this driver)
    /// cannot do.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    /// The ring was driven through a transition the state machine forbids.
    /// Only reported when the state machine runs in strict mode.
    #[error("Illegal ring state transition from {from:?} to {to:?}")]
    IllegalStateTransition { from: RingState, to: RingState },

    /// The engine reported a DMA error. The ring is unusable until both rings
    /// of the channel have been reset.
    #[error("Fatal DMA error reported by the engine (status {status:#010x})")]
    Fatal { status: u32 },

    /// The DMA region backend refused an access.
    #[error("DMA region access failed at byte offset {0:#x}")]
    DmaAccess(usize),

    /// A register offset fell outside of the ring's MMIO window.
    #[error("Register offset {offset:#x} outside of the {window:#x} byte window")]
    RegisterOutOfWindow { offset: u32, window: u32 },
}

impl RingError {
    /// Whether the ring has to go through `reset` (and `init`) before it can be
    /// used again after this error.
    ///
    /// Exhaustive on purpose: a new variant has to decide here.
    pub fn requires_reset(&self) -> bool {
        match self {
            RingError::Fatal { .. } => true,
            RingError::DmaAccess(_) => true,
            RingError::Argument(_)
            | RingError::UnsupportedFeature(_)
            | RingError::IllegalStateTransition { .. }
            | RingError::RegisterOutOfWindow { .. } => false,
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, RingError>;
