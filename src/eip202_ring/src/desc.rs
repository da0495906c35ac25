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

//! EIP-202 descriptor formats
//!
//! A ring slot holds a fixed header (control word plus buffer addresses)
//! followed by token words. The header depends on the addressing mode picked
//! at init:
//!
//! ```text
//!   command descriptor               result descriptor
//!   32-bit          64-bit           32-bit          64-bit
//!   w0 control      w0 control       w0 control      w0 control
//!   w1 src          w1 0             w1 dst          w1 0
//!   w2 token ptr    w2/w3 src        w2.. token      w2/w3 dst
//!   w3.. token      w4/w5 token ptr                  w[token offset].. token
//!                   w6.. token
//! ```
//!
//! The inline input token starts with a fixed prefix: header word,
//! application-id word (tag in bits [15:9]) and the context record address.

use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;

use crate::access::DmaRegion;
use crate::error::{Result, RingError};

/// Control word bit: descriptor starts a packet.
pub const CONTROL_FIRST_SEG: u32 = 1 << 23;
/// Control word bit: descriptor ends a packet.
pub const CONTROL_LAST_SEG: u32 = 1 << 22;
/// Command control word bit: process on the engine in `engine_id`.
pub const CONTROL_FORCE_ENGINE: u32 = 1 << 21;
/// Result control word bit: packet did not fit in the prepared buffers.
pub const CONTROL_BUFFER_OVERFLOW: u32 = 1 << 21;
/// Result control word bit: engine ran out of prepared descriptors.
pub const CONTROL_DESCRIPTOR_OVERFLOW: u32 = 1 << 20;

/// Largest segment byte count a control word can hold.
pub const SEGMENT_BYTES_MAX: u32 = 0xF_FFFF;

const WORD_BYTES: usize = 4;
const ENGINE_ID_SHIFT: u32 = 16;
const ENGINE_ID_MASK: u32 = 0x1F;
const WORD_COUNT_SHIFT: u32 = 24;

/// Words of the input token prefix (header, application id, context lo/hi).
pub const INPUT_TOKEN_PREFIX_WORDS: usize = 4;
/// Application-id tag position inside input token word 1.
pub const APP_ID_SHIFT: u32 = 9;
pub const APP_ID_MASK: u32 = 0x7F << APP_ID_SHIFT;

/// Input token word holding the application id.
pub const INPUT_TOKEN_APP_ID_WORD: usize = 1;
/// Output token word the engine copies the application id to.
pub const OUTPUT_TOKEN_APP_ID_WORD: usize = 2;

/// Control word of a command descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct CommandControl {
    pub first: bool,
    pub last: bool,
    pub force_engine: bool,
    /// 5 bits, only meaningful with `force_engine`.
    pub engine_id: u8,
    /// Input token length in words.
    pub token_words: u8,
    /// Segment length in bytes, 20 bits.
    pub segment_bytes: u32,
}

impl CommandControl {
    pub const fn to_word(self) -> u32 {
        let mut w = ((self.token_words as u32) << WORD_COUNT_SHIFT)
            | (self.segment_bytes & SEGMENT_BYTES_MAX);
        if self.first {
            w |= CONTROL_FIRST_SEG;
        }
        if self.last {
            w |= CONTROL_LAST_SEG;
        }
        if self.force_engine {
            w |= CONTROL_FORCE_ENGINE | ((self.engine_id as u32 & ENGINE_ID_MASK) << ENGINE_ID_SHIFT);
        }
        w
    }

    pub const fn from_word(w: u32) -> Self {
        Self {
            first: w & CONTROL_FIRST_SEG != 0,
            last: w & CONTROL_LAST_SEG != 0,
            force_engine: w & CONTROL_FORCE_ENGINE != 0,
            engine_id: ((w >> ENGINE_ID_SHIFT) & ENGINE_ID_MASK) as u8,
            token_words: (w >> WORD_COUNT_SHIFT) as u8,
            segment_bytes: w & SEGMENT_BYTES_MAX,
        }
    }
}

/// Control word of a prepared (empty) result descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct PreparedControl {
    pub first: bool,
    pub last: bool,
    /// Result token words the engine may write.
    pub expected_result_words: u8,
    /// Size of the destination buffer in bytes, 20 bits.
    pub segment_bytes: u32,
}

impl PreparedControl {
    pub const fn to_word(self) -> u32 {
        let mut w = ((self.expected_result_words as u32) << WORD_COUNT_SHIFT)
            | (self.segment_bytes & SEGMENT_BYTES_MAX);
        if self.first {
            w |= CONTROL_FIRST_SEG;
        }
        if self.last {
            w |= CONTROL_LAST_SEG;
        }
        w
    }
}

/// Control word of a processed result descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultControl {
    pub first: bool,
    pub last: bool,
    pub buffer_overflow: bool,
    pub descriptor_overflow: bool,
    /// Bytes the engine wrote to this segment.
    pub segment_bytes: u32,
    /// Result token words the engine wrote.
    pub result_words: u8,
}

impl ResultControl {
    pub const fn from_word(w: u32) -> Self {
        Self {
            first: w & CONTROL_FIRST_SEG != 0,
            last: w & CONTROL_LAST_SEG != 0,
            buffer_overflow: w & CONTROL_BUFFER_OVERFLOW != 0,
            descriptor_overflow: w & CONTROL_DESCRIPTOR_OVERFLOW != 0,
            segment_bytes: w & SEGMENT_BYTES_MAX,
            result_words: (w >> WORD_COUNT_SHIFT) as u8,
        }
    }

    pub const fn to_word(self) -> u32 {
        let mut w = ((self.result_words as u32) << WORD_COUNT_SHIFT)
            | (self.segment_bytes & SEGMENT_BYTES_MAX);
        if self.first {
            w |= CONTROL_FIRST_SEG;
        }
        if self.last {
            w |= CONTROL_LAST_SEG;
        }
        if self.buffer_overflow {
            w |= CONTROL_BUFFER_OVERFLOW;
        }
        if self.descriptor_overflow {
            w |= CONTROL_DESCRIPTOR_OVERFLOW;
        }
        w
    }
}

/// One segment of a packet handed to the engine.
///
/// The token prefix and payload are only written for first segments.
/// Segments of one packet have to be submitted in order, in one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandDescriptor<'a> {
    pub control: CommandControl,
    /// 7-bit tag echoed in the result token.
    pub application_id: u8,
    pub token_header: u32,
    pub src_addr: u64,
    /// External token buffer. `None` puts the token inline.
    pub token_addr: Option<u64>,
    pub context_addr: u64,
    /// Input token words following the prefix.
    pub token: &'a [u32],
}

impl CommandDescriptor<'_> {
    /// Input token word 1 for this descriptor.
    pub const fn application_word(&self) -> u32 {
        ((self.application_id as u32) << APP_ID_SHIFT) & APP_ID_MASK
    }
}

/// An empty destination buffer handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct PreparedDescriptor {
    pub control: PreparedControl,
    pub dst_addr: u64,
}

/// A processed result descriptor read back from the ring.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultDescriptor {
    pub control: ResultControl,
    pub dst_addr: u64,
    /// Output token words, see [`crate::token::ResultToken`].
    pub token: SmallVec<[u32; 16]>,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
struct CommandHeader32 {
    control: u32,
    src: u32,
    token: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
struct CommandHeader64 {
    control: u32,
    ext_len: u32,
    src_lo: u32,
    src_hi: u32,
    token_lo: u32,
    token_hi: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
struct ResultHeader32 {
    control: u32,
    dst: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
struct ResultHeader64 {
    control: u32,
    ext_len: u32,
    dst_lo: u32,
    dst_hi: u32,
}

const _: () = assert!(core::mem::size_of::<CommandHeader32>() == 3 * WORD_BYTES);
const _: () = assert!(core::mem::size_of::<CommandHeader64>() == 6 * WORD_BYTES);
const _: () = assert!(core::mem::size_of::<ResultHeader32>() == 2 * WORD_BYTES);
const _: () = assert!(core::mem::size_of::<ResultHeader64>() == 4 * WORD_BYTES);

#[inline]
const fn lo(v: u64) -> u32 {
    v as u32
}

#[inline]
const fn hi(v: u64) -> u32 {
    (v >> 32) as u32
}

#[inline]
const fn join(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Descriptor header layout chosen at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorLayout {
    pub addr64: bool,
}

impl DescriptorLayout {
    /// Header words of a command descriptor.
    pub const fn command_control_words(self) -> usize {
        if self.addr64 { 6 } else { 3 }
    }

    /// Header words of a result descriptor.
    pub const fn result_control_words(self) -> usize {
        if self.addr64 { 4 } else { 2 }
    }
}

/// Reads and writes descriptors in one ring's DMA region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorCodec {
    pub layout: DescriptorLayout,
    /// Words per slot.
    pub stride_words: usize,
    /// Words the engine reads or writes per descriptor.
    pub size_words: usize,
    /// Result rings: first output token word inside the slot.
    pub token_offset_words: usize,
    /// Output token words read back per result descriptor.
    pub output_token_words: usize,
}

impl DescriptorCodec {
    /// Byte offset of `slot` in the region.
    #[inline]
    pub const fn slot_offset(&self, slot: usize) -> usize {
        slot * self.stride_words * WORD_BYTES
    }

    /// Byte offset of word `word` of `slot`.
    #[inline]
    pub const fn word_offset(&self, slot: usize, word: usize) -> usize {
        self.slot_offset(slot) + word * WORD_BYTES
    }

    /// Bytes the engine reads or writes per descriptor.
    #[inline]
    pub const fn size_bytes(&self) -> usize {
        self.size_words * WORD_BYTES
    }

    /// Inline token words that fit in a command descriptor.
    pub const fn inline_token_capacity(&self) -> usize {
        self.size_words
            .saturating_sub(self.layout.command_control_words())
    }

    /// Write `desc` into `slot`.
    ///
    /// `app_word` replaces input token word 1, so that an anti-race strategy
    /// can claim the application-id field.
    pub fn encode_command<D: DmaRegion>(
        &self,
        dma: &D,
        slot: usize,
        desc: &CommandDescriptor<'_>,
        app_word: u32,
    ) -> Result<()> {
        let base = self.slot_offset(slot);
        let control = desc.control.to_word();
        let token_addr = desc.token_addr.unwrap_or(0);

        let token_at = if self.layout.addr64 {
            let hdr = CommandHeader64 {
                control,
                ext_len: 0,
                src_lo: lo(desc.src_addr),
                src_hi: hi(desc.src_addr),
                token_lo: lo(token_addr),
                token_hi: hi(token_addr),
            };
            write_val(dma, base, hdr)?;
            base + core::mem::size_of::<CommandHeader64>()
        } else {
            let hdr = CommandHeader32 {
                control,
                src: lo(desc.src_addr),
                token: lo(token_addr),
            };
            write_val(dma, base, hdr)?;
            base + core::mem::size_of::<CommandHeader32>()
        };

        if !desc.control.first || desc.token_addr.is_some() {
            return Ok(());
        }

        let prefix = [
            desc.token_header,
            app_word,
            lo(desc.context_addr),
            hi(desc.context_addr),
        ];
        write_words(dma, token_at, &prefix)?;
        write_words(dma, token_at + prefix.len() * WORD_BYTES, desc.token)
    }

    /// Read back the command descriptor header in `slot`.
    ///
    /// Returns (control, source address, token address).
    pub fn decode_command_header<D: DmaRegion>(
        &self,
        dma: &D,
        slot: usize,
    ) -> Result<(CommandControl, u64, u64)> {
        let base = self.slot_offset(slot);
        if self.layout.addr64 {
            let hdr: CommandHeader64 = read_val(dma, base)?;
            Ok((
                CommandControl::from_word(hdr.control),
                join(hdr.src_lo, hdr.src_hi),
                join(hdr.token_lo, hdr.token_hi),
            ))
        } else {
            let hdr: CommandHeader32 = read_val(dma, base)?;
            Ok((
                CommandControl::from_word(hdr.control),
                hdr.src as u64,
                hdr.token as u64,
            ))
        }
    }

    /// Write a prepared descriptor into `slot`.
    pub fn encode_prepared<D: DmaRegion>(
        &self,
        dma: &D,
        slot: usize,
        desc: &PreparedDescriptor,
    ) -> Result<()> {
        let base = self.slot_offset(slot);
        let control = desc.control.to_word();
        if self.layout.addr64 {
            write_val(
                dma,
                base,
                ResultHeader64 {
                    control,
                    ext_len: 0,
                    dst_lo: lo(desc.dst_addr),
                    dst_hi: hi(desc.dst_addr),
                },
            )
        } else {
            write_val(
                dma,
                base,
                ResultHeader32 {
                    control,
                    dst: lo(desc.dst_addr),
                },
            )
        }
    }

    /// Read the result descriptor in `slot`.
    ///
    /// With `strip_app_id` the application-id field of the output token is
    /// cleared, for rings where the field carries the completion mark.
    pub fn decode_result<D: DmaRegion>(
        &self,
        dma: &D,
        slot: usize,
        strip_app_id: bool,
    ) -> Result<ResultDescriptor> {
        let base = self.slot_offset(slot);
        let (control, dst_addr) = if self.layout.addr64 {
            let hdr: ResultHeader64 = read_val(dma, base)?;
            (hdr.control, join(hdr.dst_lo, hdr.dst_hi))
        } else {
            let hdr: ResultHeader32 = read_val(dma, base)?;
            (hdr.control, hdr.dst as u64)
        };

        let words = self
            .output_token_words
            .min(self.size_words.saturating_sub(self.token_offset_words));
        let mut token = SmallVec::with_capacity(words);
        for i in 0..words {
            token.push(read_word(dma, self.word_offset(slot, self.token_offset_words + i))?);
        }

        if strip_app_id {
            if let Some(w) = token.get_mut(OUTPUT_TOKEN_APP_ID_WORD) {
                *w &= !APP_ID_MASK;
            }
        }

        Ok(ResultDescriptor {
            control: ResultControl::from_word(control),
            dst_addr,
            token,
        })
    }

    /// Read only the control word of `slot`.
    pub fn read_control<D: DmaRegion>(&self, dma: &D, slot: usize) -> Result<u32> {
        read_word(dma, self.slot_offset(slot))
    }

    /// Zero the control word of a consumed result descriptor so stale
    /// results are never decoded twice.
    pub fn clear_result<D: DmaRegion>(&self, dma: &D, slot: usize) -> Result<()> {
        write_word(dma, self.slot_offset(slot), 0)
    }

    /// Zero the whole `slot`.
    pub fn zero_slot<D: DmaRegion>(&self, dma: &D, slot: usize) -> Result<()> {
        let base = self.slot_offset(slot);
        for w in 0..self.stride_words {
            write_word(dma, base + w * WORD_BYTES, 0)?;
        }
        Ok(())
    }
}

#[inline]
pub(crate) fn read_word<D: DmaRegion>(dma: &D, offset: usize) -> Result<u32> {
    dma.read32(offset).map_err(|_| RingError::DmaAccess(offset))
}

#[inline]
pub(crate) fn write_word<D: DmaRegion>(dma: &D, offset: usize, value: u32) -> Result<()> {
    dma.write32(offset, value)
        .map_err(|_| RingError::DmaAccess(offset))
}

fn write_words<D: DmaRegion>(dma: &D, offset: usize, words: &[u32]) -> Result<()> {
    if words.is_empty() {
        return Ok(());
    }
    dma.write(offset, bytemuck::cast_slice(words))
        .map_err(|_| RingError::DmaAccess(offset))?;
    Ok(())
}

fn read_val<D: DmaRegion, T: Pod>(dma: &D, offset: usize) -> Result<T> {
    dma.read_val(offset).map_err(|_| RingError::DmaAccess(offset))
}

fn write_val<D: DmaRegion, T: Pod>(dma: &D, offset: usize, val: T) -> Result<()> {
    dma.write_val(offset, val)
        .map_err(|_| RingError::DmaAccess(offset))
}
