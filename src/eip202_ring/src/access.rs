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

//! Environment capabilities consumed by the ring managers
//!
//! The ring code never touches MMIO or DMA memory directly. It goes through
//! three small traits that the embedding driver implements:
//!
//! - [`RegisterPort`]: 32-bit register access inside the EIP-202 MMIO space
//! - [`DmaRegion`]: the descriptor ring memory plus its cache maintenance
//! - [`TokenSizeProvider`]: input/output token sizes of the packet engine

use alloc::rc::Rc;
use alloc::sync::Arc;

use bytemuck::Pod;

/// 32-bit register access to the EIP-202 host interface.
///
/// Offsets are byte offsets relative to the base of the device, the ring
/// managers add their own window base. Accesses are infallible, an MMIO
/// window that was mapped successfully can always be read and written.
pub trait RegisterPort {
    /// Read the 32-bit register at `offset`.
    fn read32(&self, offset: u32) -> u32;

    /// Write `value` to the 32-bit register at `offset`.
    fn write32(&self, offset: u32, value: u32);
}

/// Backend-provided access to the DMA-able memory that holds one ring.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Offsets are relative to the start of the region and are range checked
/// - `sync_for_device` makes every earlier CPU write in the range visible to
///   the engine before it returns
/// - `sync_for_host` discards stale CPU cache lines in the range so that the
///   next read observes what the engine wrote
pub trait DmaRegion {
    type Error;

    /// Size of the region in bytes.
    fn len(&self) -> usize;

    /// Is the region empty?
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read bytes starting at `offset`.
    ///
    /// # Returns
    ///
    /// Number of bytes actually read (should equal `dst.len()` on success).
    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write bytes starting at `offset`.
    ///
    /// # Returns
    ///
    /// Number of bytes actually written (should equal `src.len()` on success).
    fn write(&self, offset: usize, src: &[u8]) -> Result<usize, Self::Error>;

    /// Hand `len` bytes at `offset` over to the device (PreDMA).
    fn sync_for_device(&self, offset: usize, len: usize) -> Result<(), Self::Error>;

    /// Take `len` bytes at `offset` back from the device (PostDMA).
    fn sync_for_host(&self, offset: usize, len: usize) -> Result<(), Self::Error>;

    /// Read a Pod value at `offset`.
    fn read_val<T: Pod>(&self, offset: usize) -> Result<T, Self::Error> {
        let mut val = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut val);

        self.read(offset, bytes)?;
        Ok(val)
    }

    /// Write a Pod value at `offset`.
    fn write_val<T: Pod>(&self, offset: usize, val: T) -> Result<(), Self::Error> {
        let bytes = bytemuck::bytes_of(&val);
        self.write(offset, bytes)?;
        Ok(())
    }

    /// Read the 32-bit word at byte `offset`.
    #[inline]
    fn read32(&self, offset: usize) -> Result<u32, Self::Error> {
        self.read_val::<u32>(offset)
    }

    /// Write the 32-bit word at byte `offset`.
    #[inline]
    fn write32(&self, offset: usize, value: u32) -> Result<(), Self::Error> {
        self.write_val(offset, value)
    }
}

/// Token sizes of the packet engine behind the rings.
///
/// Fixed for a given engine/firmware combination. Queried once at `init`.
pub trait TokenSizeProvider {
    /// Number of 32-bit words in an input (command) token.
    fn input_token_word_count(&self) -> usize;

    /// Number of 32-bit words in an output (result) token.
    fn output_token_word_count(&self) -> usize;
}

/// A [`TokenSizeProvider`] with compile-time or probed constant sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTokenSize {
    pub input_words: usize,
    pub output_words: usize,
}

impl FixedTokenSize {
    pub const fn new(input_words: usize, output_words: usize) -> Self {
        Self {
            input_words,
            output_words,
        }
    }
}

impl TokenSizeProvider for FixedTokenSize {
    fn input_token_word_count(&self) -> usize {
        self.input_words
    }

    fn output_token_word_count(&self) -> usize {
        self.output_words
    }
}

impl<T: RegisterPort + ?Sized> RegisterPort for &T {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

impl<T: RegisterPort + ?Sized> RegisterPort for Rc<T> {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

impl<T: RegisterPort + ?Sized> RegisterPort for Arc<T> {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}
