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

use bitflags::bitflags;

use crate::anti_race::AntiRaceMode;
use crate::desc::DescriptorLayout;
use crate::fsm::FsmMode;
use crate::regs::{DmaCfg, RingKind};

bitflags! {
    /// DMA data types the engine byte swaps.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ByteSwap: u32 {
        const TOKEN      = 1 << 0;
        const DESCRIPTOR = 1 << 1;
        const PACKET     = 1 << 2;
    }
}

bitflags! {
    /// How bytes are swapped for one DMA data type.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SwapMethod: u8 {
        /// Bytes within each 32-bit word.
        const SWAP_32  = 1 << 0;
        /// 32-bit words within each 64-bit chunk.
        const SWAP_64  = 1 << 1;
        /// 64-bit chunks within each 128-bit chunk.
        const SWAP_128 = 1 << 2;
        /// 128-bit chunks within each 256-bit chunk.
        const SWAP_256 = 1 << 3;
    }
}

bitflags! {
    /// Bufferable DMA write classes.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Bufferability: u32 {
        const OWN_DMA_WRITES          = 1 << 0;
        /// Apply the read/write cache type controls.
        const WR_RD_CACHE             = 1 << 1;
        /// Result ring only.
        const RESULT_TOKEN_DMA_WRITES = 1 << 2;
        /// Result ring only.
        const RDR_CONTROL_DMA_WRITES  = 1 << 3;
    }
}

/// Addresses carried in descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub enum DmaAddressMode {
    /// 32-bit addresses.
    Disabled,
    /// 64-bit addresses in the descriptors.
    #[default]
    DescriptorPointer64,
    /// 32-bit descriptor addresses added to a 64-bit base. Not supported.
    ExtendedAddress,
}

impl DmaAddressMode {
    pub const fn layout(self) -> DescriptorLayout {
        DescriptorLayout {
            addr64: matches!(self, DmaAddressMode::DescriptorPointer64),
        }
    }
}

/// Driver policy for one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct RingOptions {
    pub anti_race: AntiRaceMode,
    pub fsm: FsmMode,
}

/// Autonomous ring mode settings shared by both rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingParams {
    pub byte_swap: ByteSwap,
    pub swap_token: SwapMethod,
    pub swap_descriptor: SwapMethod,
    pub swap_packet: SwapMethod,
    pub bufferability: Bufferability,
    /// Only applied with [`Bufferability::WR_RD_CACHE`].
    pub write_cache: u8,
    /// Only applied with [`Bufferability::WR_RD_CACHE`].
    pub read_cache: u8,
    pub descriptor_prot: u8,
    pub data_prot: u8,
    /// Command ring only.
    pub token_prot: u8,
    pub dma_address_mode: DmaAddressMode,
    /// Bus address of the ring memory.
    pub ring_dma_addr: u64,
    pub ring_size_words: u32,
    pub desc_size_words: u32,
    /// Descriptor stride, at least `desc_size_words`.
    pub desc_offs_words: u32,
    /// Result ring only: first output token word in the descriptor.
    pub token_offset_words: u32,
    pub fetch_size_words: u32,
    pub fetch_threshold_words: u32,
    /// Descriptor threshold programmed into THRESH by `init`. 0 leaves the
    /// threshold interrupt off.
    pub irq_threshold: u32,
    /// Timeout programmed with a non-zero `irq_threshold`, in units of 256
    /// engine clock cycles. 0 disables.
    pub irq_timeout: u8,
}

impl RingParams {
    /// The largest ring the RING_SIZE field can describe (16 MiB - 4).
    pub const MAX_RING_SIZE_WORDS: u32 = 4_194_303;
    /// The smallest descriptor stride
    pub const MIN_DESC_OFFS_WORDS: u32 = 1;
    /// The largest descriptor stride the DESC_SIZE offset field can hold
    pub const MAX_DESC_OFFS_WORDS: u32 = 0xFF;
    /// The default descriptor stride
    pub const DEFAULT_DESC_OFFS_WORDS: u32 = 16;
    /// The default number of slots
    pub const DEFAULT_SLOTS: u32 = 64;
    /// The default ring size
    pub const DEFAULT_RING_SIZE_WORDS: u32 = Self::DEFAULT_DESC_OFFS_WORDS * Self::DEFAULT_SLOTS;
    /// The default fetch size, four descriptors
    pub const DEFAULT_FETCH_SIZE_WORDS: u32 = 4 * Self::DEFAULT_DESC_OFFS_WORDS;
    /// The default fetch threshold
    pub const DEFAULT_FETCH_THRESHOLD_WORDS: u32 = Self::DEFAULT_FETCH_SIZE_WORDS;

    pub const fn slots(&self) -> u32 {
        if self.desc_offs_words == 0 {
            0
        } else {
            self.ring_size_words / self.desc_offs_words
        }
    }

    pub const fn ring_size_bytes(&self) -> usize {
        self.ring_size_words as usize * 4
    }

    pub(crate) fn dma_cfg(&self, kind: RingKind) -> DmaCfg {
        let swap = |t: ByteSwap, m: SwapMethod| {
            if self.byte_swap.contains(t) {
                m.bits()
            } else {
                0
            }
        };
        let cache = self.bufferability.contains(Bufferability::WR_RD_CACHE);

        DmaCfg {
            descriptor_swap: swap(ByteSwap::DESCRIPTOR, self.swap_descriptor),
            data_swap: swap(ByteSwap::PACKET, self.swap_packet),
            token_swap: swap(ByteSwap::TOKEN, self.swap_token),
            own_buf: self.bufferability.contains(Bufferability::OWN_DMA_WRITES),
            ctrl_buf: matches!(kind, RingKind::Result)
                && self
                    .bufferability
                    .contains(Bufferability::RDR_CONTROL_DMA_WRITES),
            result_buf: matches!(kind, RingKind::Result)
                && self
                    .bufferability
                    .contains(Bufferability::RESULT_TOKEN_DMA_WRITES),
            pad_to_offset: false,
            write_cache: if cache { self.write_cache } else { 0 },
            read_cache: if cache { self.read_cache } else { 0 },
            descriptor_prot: self.descriptor_prot,
            data_prot: self.data_prot,
            token_prot: self.token_prot,
        }
    }
}

impl Default for RingParams {
    fn default() -> Self {
        Self {
            byte_swap: ByteSwap::empty(),
            swap_token: SwapMethod::empty(),
            swap_descriptor: SwapMethod::empty(),
            swap_packet: SwapMethod::empty(),
            bufferability: Bufferability::empty(),
            write_cache: 0,
            read_cache: 0,
            descriptor_prot: 0,
            data_prot: 0,
            token_prot: 0,
            dma_address_mode: DmaAddressMode::default(),
            ring_dma_addr: 0,
            ring_size_words: Self::DEFAULT_RING_SIZE_WORDS,
            desc_size_words: 14,
            desc_offs_words: Self::DEFAULT_DESC_OFFS_WORDS,
            token_offset_words: 4,
            fetch_size_words: Self::DEFAULT_FETCH_SIZE_WORDS,
            fetch_threshold_words: Self::DEFAULT_FETCH_THRESHOLD_WORDS,
            irq_threshold: 0,
            irq_timeout: 0,
        }
    }
}

/// Command ring settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CdrSettings {
    pub params: RingParams,
    /// Descriptors carry an additional token pointer.
    pub atp: bool,
    /// Short tokens passed in the token pointer words. Not supported.
    pub atp_to_token: bool,
    pub options: RingOptions,
}

/// Result ring settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdrSettings {
    pub params: RingParams,
    /// Packets may spread over several prepared buffers back to back.
    pub continuous_scatter: bool,
    pub options: RingOptions,
}
