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

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
// We use Arbitrary during fuzzing, which requires std
#![cfg_attr(not(any(test, feature = "fuzzing")), no_std)]

//! Ring control for the EIP-202 host interface.
//!
//! An EIP-202 exchanges work with a packet crypto engine through pairs of
//! descriptor rings in DMA memory. Software puts command descriptors into a
//! [`CommandRing`], prepares empty destination descriptors in a
//! [`ResultRing`] and gets them back once the engine has written results.
//!
//! The crate only needs three capabilities from its environment: a
//! [`RegisterPort`] for the MMIO window, a [`DmaRegion`] for ring memory of
//! each ring, and a [`TokenSizeProvider`] for the token sizes of the engine
//! firmware.

extern crate alloc;

/// Capabilities the rings are built on: register port, DMA region and token
/// sizes.
pub mod access;
/// Completion detection for result rings when the processed counter can run
/// ahead of descriptor memory.
pub mod anti_race;
pub mod cdr;
/// Ring settings, validated by `init`.
pub mod config;
pub mod cursor;
pub mod desc;
pub mod error;
pub mod fsm;
pub mod rdr;
/// Register map of one ring window and the register field codecs.
pub mod regs;
pub mod status;
/// Output token and bypass data decoding.
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{DmaRegion, FixedTokenSize, RegisterPort, TokenSizeProvider};
pub use anti_race::{AntiRace, AntiRaceMode, AntiRaceStrategy};
pub use cdr::{CommandRing, PutOutcome};
pub use config::{CdrSettings, DmaAddressMode, RdrSettings, RingOptions, RingParams};
pub use desc::{
    CommandControl, CommandDescriptor, PreparedControl, PreparedDescriptor, ResultControl,
    ResultDescriptor,
};
pub use error::{Result, RingError};
pub use fsm::{FsmMode, RingState};
pub use rdr::{GetOutcome, ProcessedLevel, ResultRing};
pub use regs::{CdrIrq, RdrIrq};
pub use status::{CdrStatus, IrqHandoff, IrqLine, RdrStatus, RingDump};
pub use token::{BypassData, ResultToken};
