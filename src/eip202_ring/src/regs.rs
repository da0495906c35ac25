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

//! EIP-202 ring register file
//!
//! Every ring owns a 2 KiB MMIO window. The command ring window comes first,
//! the result ring window follows at [`RDR_WINDOW_BASE`]. [`RegisterFile`]
//! wraps a [`RegisterPort`] with the window base, refuses offsets outside the
//! window and the registers the ring kind does not implement, and the field
//! types below pack and unpack register values so the ring managers never
//! shift or mask by hand.

use bitflags::bitflags;

use crate::access::RegisterPort;
use crate::error::{Result, RingError};

/// Size of one ring's register window in bytes.
pub const RING_WINDOW_BYTES: u32 = 0x800;
/// Offset of the first command ring window.
pub const CDR_WINDOW_BASE: u32 = 0x000;
/// Offset of the first result ring window.
pub const RDR_WINDOW_BASE: u32 = 0x800;

/// EIP number (0xCA) and its complement (0x35) in the low half of VERSION.
pub const HIA_SIGNATURE: u16 = 0x35CA;

/// Pattern written to RING_BASE_ADDR_LO to detect the hardware.
pub(crate) const DETECT_PATTERN: u32 = 0x7FFF_FFFF;

/// Largest word delta a single COUNT / PROC_COUNT write can carry.
pub const COUNT_FIELD_MAX_WORDS: usize = 0x3FFF;
/// Largest packet count a single PROC_COUNT write can carry.
pub const PROC_PKT_FIELD_MAX: u8 = 0x7F;

const MASK_3: u32 = 0x7;
const MASK_4: u32 = 0xF;
const MASK_5: u32 = 0x1F;
const MASK_7: u32 = 0x7F;
const MASK_8: u32 = 0xFF;
const MASK_10: u32 = 0x3FF;
const MASK_12: u32 = 0xFFF;
const MASK_14: u32 = 0x3FFF;
const MASK_16: u32 = 0xFFFF;
const MASK_22: u32 = 0x3F_FFFF;

/// Which half of the channel a register window belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingKind {
    Command,
    Result,
}

/// Registers of a ring window.
///
/// The result ring reuses the command ring slots: `Count` is PREP_COUNT and
/// `Pointer` is PREP_PNTR there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Reg {
    RingBaseLo = 0x00,
    RingBaseHi = 0x04,
    DataBaseLo = 0x08,
    DataBaseHi = 0x0C,
    AtokBaseLo = 0x10,
    AtokBaseHi = 0x14,
    RingSize = 0x18,
    DescSize = 0x1C,
    Cfg = 0x20,
    DmaCfg = 0x24,
    Thresh = 0x28,
    Count = 0x2C,
    ProcCount = 0x30,
    Pointer = 0x34,
    ProcPointer = 0x38,
    Stat = 0x3C,
    Options = 0x7F8,
    Version = 0x7FC,
}

const _: () = assert!((Reg::Version as u32) < RING_WINDOW_BYTES);

impl Reg {
    #[inline]
    pub const fn offset(self) -> u32 {
        self as u32
    }

    /// Does a ring of `kind` implement this register?
    pub const fn present_in(self, kind: RingKind) -> bool {
        match self {
            Reg::AtokBaseLo | Reg::AtokBaseHi | Reg::Options | Reg::Version => {
                matches!(kind, RingKind::Command)
            }
            Reg::ProcPointer => matches!(kind, RingKind::Result),
            _ => true,
        }
    }

    /// Value the register holds after a hardware reset.
    pub const fn default_value(self, kind: RingKind) -> u32 {
        match (self, kind) {
            (Reg::DmaCfg, RingKind::Command) => 0x0100_0000,
            (Reg::DmaCfg, RingKind::Result) => 0x0180_0000,
            _ => 0,
        }
    }
}

/// Typed, bounds-checked access to one ring's register window.
#[derive(Debug, Clone)]
pub struct RegisterFile<P> {
    port: P,
    base: u32,
    kind: RingKind,
}

impl<P: RegisterPort> RegisterFile<P> {
    /// Register file of ring `index` of the given kind.
    ///
    /// Ring windows of the same kind are `2 * RING_WINDOW_BYTES` apart.
    pub fn new(port: P, kind: RingKind, index: u32) -> Self {
        let first = match kind {
            RingKind::Command => CDR_WINDOW_BASE,
            RingKind::Result => RDR_WINDOW_BASE,
        };
        Self {
            port,
            base: first + index * 2 * RING_WINDOW_BYTES,
            kind,
        }
    }

    #[inline]
    pub fn kind(&self) -> RingKind {
        self.kind
    }

    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    fn check(&self, reg: Reg) -> Result<u32> {
        if !reg.present_in(self.kind) {
            return Err(RingError::RegisterOutOfWindow {
                offset: reg.offset(),
                window: RING_WINDOW_BYTES,
            });
        }
        Ok(self.base + reg.offset())
    }

    fn check_raw(&self, offset: u32) -> Result<u32> {
        if offset % 4 != 0 || offset >= RING_WINDOW_BYTES {
            return Err(RingError::RegisterOutOfWindow {
                offset,
                window: RING_WINDOW_BYTES,
            });
        }
        Ok(self.base + offset)
    }

    pub fn read(&self, reg: Reg) -> Result<u32> {
        let at = self.check(reg)?;
        Ok(self.port.read32(at))
    }

    pub fn write(&self, reg: Reg, value: u32) -> Result<()> {
        let at = self.check(reg)?;
        self.port.write32(at, value);
        Ok(())
    }

    /// Restore the reset default of `reg`.
    pub fn write_default(&self, reg: Reg) -> Result<()> {
        self.write(reg, reg.default_value(self.kind))
    }

    /// Read a raw window offset, for diagnostics.
    pub fn read_raw(&self, offset: u32) -> Result<u32> {
        let at = self.check_raw(offset)?;
        Ok(self.port.read32(at))
    }

    /// Read/write/read probe of RING_BASE_ADDR_LO. Returns true when an
    /// EIP-202 ring answers at this window.
    pub fn detect(&self) -> Result<bool> {
        self.write(Reg::RingBaseLo, DETECT_PATTERN)?;
        if self.read(Reg::RingBaseLo)? & DETECT_PATTERN != DETECT_PATTERN {
            return Ok(false);
        }

        self.write(Reg::RingBaseLo, 0)?;
        Ok(self.read(Reg::RingBaseLo)? & DETECT_PATTERN == 0)
    }
}

#[inline]
const fn field(v: u32, shift: u32, mask: u32) -> u32 {
    (v >> shift) & mask
}

#[inline]
const fn bit(v: u32, n: u32) -> bool {
    v & (1 << n) != 0
}

#[inline]
const fn flag(b: bool, n: u32) -> u32 {
    if b { 1 << n } else { 0 }
}

/// RING_SIZE: ring size in 32-bit words.
pub struct RingSizeReg;

impl RingSizeReg {
    pub const fn encode(words: u32) -> u32 {
        (words & MASK_22) << 2
    }

    pub const fn decode(v: u32) -> u32 {
        field(v, 2, MASK_22)
    }
}

/// DESC_SIZE: descriptor size and offset (stride) in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescSize {
    pub size_words: u8,
    pub offs_words: u8,
    /// Command ring only: additional token pointer used as token.
    pub atp_to_token: bool,
    /// Command ring only: descriptors carry an additional token pointer.
    pub atp: bool,
    pub addr64: bool,
}

impl DescSize {
    pub const fn to_word(self) -> u32 {
        flag(self.addr64, 31)
            | flag(self.atp, 30)
            | flag(self.atp_to_token, 29)
            | ((self.offs_words as u32) << 16)
            | self.size_words as u32
    }

    pub const fn from_word(v: u32) -> Self {
        Self {
            size_words: field(v, 0, MASK_8) as u8,
            offs_words: field(v, 16, MASK_8) as u8,
            atp_to_token: bit(v, 29),
            atp: bit(v, 30),
            addr64: bit(v, 31),
        }
    }
}

/// CFG: descriptor fetch size and fetch threshold in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingCfg {
    pub fetch_words: u16,
    /// 10 bits on the command ring, 12 bits on the result ring.
    pub fetch_threshold_words: u16,
    /// Result ring only: the engine writes ownership words.
    pub ownership_words: bool,
}

impl RingCfg {
    pub const fn to_word(self, kind: RingKind) -> u32 {
        let thresh_mask = match kind {
            RingKind::Command => MASK_10,
            RingKind::Result => MASK_12,
        };
        let own = match kind {
            RingKind::Command => 0,
            RingKind::Result => flag(self.ownership_words, 31),
        };
        own | ((self.fetch_threshold_words as u32 & thresh_mask) << 16)
            | (self.fetch_words as u32 & MASK_16)
    }

    pub const fn from_word(v: u32, kind: RingKind) -> Self {
        let thresh_mask = match kind {
            RingKind::Command => MASK_10,
            RingKind::Result => MASK_12,
        };
        Self {
            fetch_words: field(v, 0, MASK_16) as u16,
            fetch_threshold_words: field(v, 16, thresh_mask) as u16,
            ownership_words: matches!(kind, RingKind::Result) && bit(v, 31),
        }
    }
}

/// DMA_CFG: byte swapping, bufferability and cache/protection controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmaCfg {
    pub descriptor_swap: u8,
    pub data_swap: u8,
    /// Command ring only.
    pub token_swap: u8,
    /// Command ring: bufferable own DMA writes. Result ring: bufferable
    /// ownership word writes.
    pub own_buf: bool,
    /// Result ring only: bufferable control word writes.
    pub ctrl_buf: bool,
    /// Result ring only: bufferable result token writes.
    pub result_buf: bool,
    /// Result ring only: pad result descriptors to the descriptor offset.
    pub pad_to_offset: bool,
    pub write_cache: u8,
    pub read_cache: u8,
    pub descriptor_prot: u8,
    pub data_prot: u8,
    /// Command ring only: additional token buffer protection.
    pub token_prot: u8,
}

impl DmaCfg {
    pub const fn to_word(self, kind: RingKind) -> u32 {
        let common = ((self.read_cache as u32 & MASK_3) << 29)
            | ((self.write_cache as u32 & MASK_3) << 25)
            | ((self.data_prot as u32 & MASK_4) << 12)
            | ((self.data_swap as u32 & MASK_4) << 8)
            | ((self.descriptor_prot as u32 & MASK_4) << 4)
            | (self.descriptor_swap as u32 & MASK_4);

        match kind {
            RingKind::Command => {
                common
                    | flag(self.own_buf, 24)
                    | ((self.token_prot as u32 & MASK_4) << 20)
                    | ((self.token_swap as u32 & MASK_4) << 16)
            }
            RingKind::Result => {
                common
                    | flag(self.pad_to_offset, 28)
                    | flag(self.own_buf, 24)
                    | flag(self.ctrl_buf, 23)
                    | flag(self.result_buf, 22)
            }
        }
    }
}

/// THRESH: interrupt threshold and timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Thresh {
    /// Words, or packets when `packet_mode` is set.
    pub threshold: u32,
    /// Result ring only: count processed packets instead of words.
    pub packet_mode: bool,
    /// In units of 256 engine clock cycles. 0 disables the timeout.
    pub timeout: u8,
}

impl Thresh {
    pub const fn to_word(self, kind: RingKind) -> u32 {
        let mode = match kind {
            RingKind::Command => 0,
            RingKind::Result => flag(self.packet_mode, 23),
        };
        ((self.timeout as u32) << 24) | mode | (self.threshold & MASK_22)
    }

    pub const fn from_word(v: u32, kind: RingKind) -> Self {
        Self {
            threshold: field(v, 0, MASK_22),
            packet_mode: matches!(kind, RingKind::Result) && bit(v, 23),
            timeout: field(v, 24, MASK_8) as u8,
        }
    }
}

/// COUNT / PREP_COUNT: the software hand-over counter.
pub struct CountReg;

impl CountReg {
    /// Add `words` to the counter, or clear it.
    pub const fn encode(words: u32, clear: bool) -> u32 {
        flag(clear, 31) | ((words & MASK_14) << 2)
    }

    /// Words currently owned by the engine.
    pub const fn decode(v: u32) -> u32 {
        field(v, 2, MASK_22)
    }
}

/// PROC_COUNT: processed descriptor words and packets.
pub struct ProcCountReg;

impl ProcCountReg {
    /// Acknowledge `words` and `packets`, or clear the counter.
    pub const fn encode(words: u32, packets: u8, clear: bool) -> u32 {
        flag(clear, 31) | ((packets as u32 & MASK_7) << 24) | ((words & MASK_14) << 2)
    }

    /// Returns (words, packets).
    pub const fn decode(v: u32) -> (u32, u8) {
        (field(v, 2, MASK_22), field(v, 24, MASK_7) as u8)
    }
}

bitflags! {
    /// Interrupt bits of the command ring STAT register (write one to clear).
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct CdrIrq: u32 {
        const DMA_ERROR = 1 << 0;
        const THRESHOLD = 1 << 1;
        const ERROR     = 1 << 2;
        /// Overflow or underflow of the descriptor counter.
        const OU_FLOW   = 1 << 3;
        const TIMEOUT   = 1 << 4;
    }
}

bitflags! {
    /// Interrupt bits of the result ring STAT register (write one to clear).
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RdrIrq: u32 {
        const DMA_ERROR           = 1 << 0;
        const ERROR               = 1 << 2;
        const OU_FLOW             = 1 << 3;
        const THRESHOLD           = 1 << 4;
        const TIMEOUT             = 1 << 5;
        /// A packet did not fit in its prepared buffers.
        const BUFFER_OVERFLOW     = 1 << 6;
        /// The engine ran out of prepared descriptors.
        const DESCRIPTOR_OVERFLOW = 1 << 7;
    }
}

/// STAT helpers shared by both rings.
pub struct StatReg;

impl StatReg {
    /// Descriptor FIFO size in words (bits [27:16]).
    pub const fn fifo_words(v: u32) -> u16 {
        field(v, 16, MASK_12) as u16
    }
}

/// Capabilities of the host interface, decoded from the OPTIONS register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HiaOptions {
    pub rings: u8,
    pub processing_engines: u8,
    pub extended_platform: bool,
    /// Command descriptor FIFO size is `2^cd_fifo_log2` HDW words.
    pub cd_fifo_log2: u8,
    /// Result descriptor FIFO size is `2^rd_fifo_log2` HDW words.
    pub rd_fifo_log2: u8,
    pub host_interface: u8,
    pub dma_len: u8,
    /// Host data width code.
    pub hdw: u8,
    pub target_align: u8,
    pub addr64: bool,
}

impl HiaOptions {
    pub const fn from_word(v: u32) -> Self {
        Self {
            addr64: bit(v, 31),
            target_align: field(v, 28, MASK_3) as u8,
            hdw: field(v, 25, MASK_3) as u8,
            dma_len: field(v, 20, MASK_5) as u8,
            host_interface: field(v, 16, MASK_4) as u8,
            extended_platform: bit(v, 15),
            rd_fifo_log2: field(v, 12, MASK_3) as u8 + 4,
            cd_fifo_log2: field(v, 9, MASK_3) as u8 + 4,
            processing_engines: field(v, 4, MASK_5) as u8,
            rings: field(v, 0, MASK_4) as u8,
        }
    }
}

/// Hardware revision from the VERSION register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HiaVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl HiaVersion {
    /// Decode VERSION, `None` when the signature does not match.
    pub const fn from_word(v: u32) -> Option<Self> {
        if (v & 0xFFFF) as u16 != HIA_SIGNATURE {
            return None;
        }
        Some(Self {
            major: field(v, 24, MASK_4) as u8,
            minor: field(v, 20, MASK_4) as u8,
            patch: field(v, 16, MASK_4) as u8,
        })
    }
}
