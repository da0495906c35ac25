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

//! Result completion detection
//!
//! The processed counter of the result ring can run ahead of the descriptor
//! memory on some interconnects: the counter says a result is there, but the
//! DMA writes have not landed yet. An [`AntiRaceStrategy`] decides per slot
//! whether a result descriptor is complete.
//!
//! - [`CounterTrust`]: believe PROC_COUNT, no per-slot check.
//! - [`OwnershipWord`]: the last word of every slot is poisoned by software
//!   and overwritten by the engine when it is done with the slot.
//! - [`ApplicationIdMark`]: the command ring stamps the mark `0xEC00` into
//!   the application-id field of the input token. Software clears output token
//!   word 2 of every prepared slot, and the engine overwrites it with the
//!   tagged application id when it writes the result. So the mark being
//!   present means the slot is complete, and a cleared word means it is not.
//!   The engine writes the application id into the last segment of a chain
//!   only, so an unmarked slot still counts as complete when a later slot,
//!   still within the prepared region, carries the mark.

use log::{trace, warn};

use crate::access::DmaRegion;
use crate::desc::{
    APP_ID_MASK, DescriptorCodec, OUTPUT_TOKEN_APP_ID_WORD, read_word, write_word,
};
use crate::error::{Result, RingError};

/// Written by software into the ownership word of a slot it owns.
pub const OWNERSHIP_POISON: u32 = 0x5555_5555;
/// Written by the engine into the ownership word of a completed slot.
pub const OWNERSHIP_DONE: u32 = 0xAAAA_AAAA;
/// Application-id bits stamped into input tokens and expected in results.
pub const APP_ID_MARK: u32 = 0xEC00;

/// Which completion detection the rings use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub enum AntiRaceMode {
    #[default]
    CounterTrust,
    OwnershipWord,
    ApplicationIdMark,
}

/// Per-slot completion detection for result rings.
pub trait AntiRaceStrategy {
    fn mode(&self) -> AntiRaceMode;

    /// Can PROC_COUNT be used as the number of ready descriptors?
    fn trusts_counter(&self) -> bool {
        false
    }

    /// Does the strategy own the last word of every result slot?
    fn reserves_last_word(&self) -> bool {
        false
    }

    /// Does the strategy own the application-id field of input tokens?
    fn reserves_application_id(&self) -> bool {
        false
    }

    /// Check result ring settings against the strategy's needs.
    fn validate(&self, _codec: &DescriptorCodec) -> Result<()> {
        Ok(())
    }

    /// Input token word 1 as written to the command ring.
    fn tag_application_word(&self, word: u32) -> u32 {
        word
    }

    /// Does the engine mark only the last segment of a chain complete?
    ///
    /// Earlier segments of a finished chain then fail `is_complete` and are
    /// known complete once a later slot passes it.
    fn marks_last_segment_only(&self) -> bool {
        false
    }

    /// Hand a prepared or consumed result slot back in its "not done" state.
    fn arm_slot<D: DmaRegion>(
        &self,
        _dma: &D,
        _codec: &DescriptorCodec,
        _slot: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// Has the engine finished writing `slot`?
    fn is_complete<D: DmaRegion>(
        &self,
        _dma: &D,
        _codec: &DescriptorCodec,
        _slot: usize,
    ) -> Result<bool> {
        Ok(true)
    }
}

/// Trust the processed counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterTrust;

impl AntiRaceStrategy for CounterTrust {
    fn mode(&self) -> AntiRaceMode {
        AntiRaceMode::CounterTrust
    }

    fn trusts_counter(&self) -> bool {
        true
    }
}

/// Poison word in the last word of each slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipWord;

impl OwnershipWord {
    #[inline]
    fn word_offset(codec: &DescriptorCodec, slot: usize) -> usize {
        codec.word_offset(slot, codec.stride_words - 1)
    }
}

impl AntiRaceStrategy for OwnershipWord {
    fn mode(&self) -> AntiRaceMode {
        AntiRaceMode::OwnershipWord
    }

    fn reserves_last_word(&self) -> bool {
        true
    }

    fn validate(&self, codec: &DescriptorCodec) -> Result<()> {
        if codec.stride_words <= codec.size_words {
            warn!(
                "ownership word needs a descriptor offset above the size ({} <= {})",
                codec.stride_words, codec.size_words
            );
            return Err(RingError::Argument(
                "ownership word needs descriptor offset > descriptor size",
            ));
        }
        Ok(())
    }

    fn arm_slot<D: DmaRegion>(&self, dma: &D, codec: &DescriptorCodec, slot: usize) -> Result<()> {
        write_word(dma, Self::word_offset(codec, slot), OWNERSHIP_POISON)
    }

    fn is_complete<D: DmaRegion>(
        &self,
        dma: &D,
        codec: &DescriptorCodec,
        slot: usize,
    ) -> Result<bool> {
        let w = read_word(dma, Self::word_offset(codec, slot))?;
        if w != OWNERSHIP_DONE {
            trace!("slot {slot} ownership word {w:#010x}, not done");
            return Ok(false);
        }
        Ok(true)
    }
}

/// Completion mark carried in the application-id field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplicationIdMark;

impl ApplicationIdMark {
    #[inline]
    fn word_offset(codec: &DescriptorCodec, slot: usize) -> usize {
        codec.word_offset(slot, codec.token_offset_words + OUTPUT_TOKEN_APP_ID_WORD)
    }
}

impl AntiRaceStrategy for ApplicationIdMark {
    fn mode(&self) -> AntiRaceMode {
        AntiRaceMode::ApplicationIdMark
    }

    fn reserves_application_id(&self) -> bool {
        true
    }

    fn validate(&self, codec: &DescriptorCodec) -> Result<()> {
        let readable = codec.size_words.saturating_sub(codec.token_offset_words);
        if codec.output_token_words.min(readable) <= OUTPUT_TOKEN_APP_ID_WORD {
            warn!(
                "application-id mark needs {} output token words, have {}",
                OUTPUT_TOKEN_APP_ID_WORD + 1,
                codec.output_token_words.min(readable)
            );
            return Err(RingError::Argument(
                "output token too short for the application-id mark",
            ));
        }
        Ok(())
    }

    fn tag_application_word(&self, word: u32) -> u32 {
        (word & !APP_ID_MASK) | APP_ID_MARK
    }

    fn marks_last_segment_only(&self) -> bool {
        true
    }

    fn arm_slot<D: DmaRegion>(&self, dma: &D, codec: &DescriptorCodec, slot: usize) -> Result<()> {
        write_word(dma, Self::word_offset(codec, slot), 0)
    }

    fn is_complete<D: DmaRegion>(
        &self,
        dma: &D,
        codec: &DescriptorCodec,
        slot: usize,
    ) -> Result<bool> {
        let w = read_word(dma, Self::word_offset(codec, slot))?;
        if w & APP_ID_MARK != APP_ID_MARK {
            trace!("slot {slot} application-id word {w:#010x}, mark missing");
            return Ok(false);
        }
        Ok(true)
    }
}

/// The strategy picked by [`AntiRaceMode`].
#[derive(Debug, Clone, Copy)]
pub enum AntiRace {
    CounterTrust(CounterTrust),
    OwnershipWord(OwnershipWord),
    ApplicationIdMark(ApplicationIdMark),
}

impl AntiRace {
    pub const fn new(mode: AntiRaceMode) -> Self {
        match mode {
            AntiRaceMode::CounterTrust => AntiRace::CounterTrust(CounterTrust),
            AntiRaceMode::OwnershipWord => AntiRace::OwnershipWord(OwnershipWord),
            AntiRaceMode::ApplicationIdMark => AntiRace::ApplicationIdMark(ApplicationIdMark),
        }
    }
}

impl Default for AntiRace {
    fn default() -> Self {
        Self::new(AntiRaceMode::default())
    }
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $e:expr) => {
        match $self {
            AntiRace::CounterTrust($s) => $e,
            AntiRace::OwnershipWord($s) => $e,
            AntiRace::ApplicationIdMark($s) => $e,
        }
    };
}

impl AntiRaceStrategy for AntiRace {
    fn mode(&self) -> AntiRaceMode {
        dispatch!(self, s => s.mode())
    }

    fn trusts_counter(&self) -> bool {
        dispatch!(self, s => s.trusts_counter())
    }

    fn reserves_last_word(&self) -> bool {
        dispatch!(self, s => s.reserves_last_word())
    }

    fn reserves_application_id(&self) -> bool {
        dispatch!(self, s => s.reserves_application_id())
    }

    fn validate(&self, codec: &DescriptorCodec) -> Result<()> {
        dispatch!(self, s => s.validate(codec))
    }

    fn tag_application_word(&self, word: u32) -> u32 {
        dispatch!(self, s => s.tag_application_word(word))
    }

    fn marks_last_segment_only(&self) -> bool {
        dispatch!(self, s => s.marks_last_segment_only())
    }

    fn arm_slot<D: DmaRegion>(&self, dma: &D, codec: &DescriptorCodec, slot: usize) -> Result<()> {
        dispatch!(self, s => s.arm_slot(dma, codec, slot))
    }

    fn is_complete<D: DmaRegion>(
        &self,
        dma: &D,
        codec: &DescriptorCodec,
        slot: usize,
    ) -> Result<bool> {
        dispatch!(self, s => s.is_complete(dma, codec, slot))
    }
}
