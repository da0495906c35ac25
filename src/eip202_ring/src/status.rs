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

//! Ring status snapshots and the interrupt hand-off cell
//!
//! STAT bits are write-one-to-clear. An interrupt handler that acknowledges
//! them would hide them from the next `status()` call, so the handler
//! publishes what it acknowledged into an [`IrqHandoff`] and the polling side
//! drains it when it builds the next snapshot.
//!
//! ```text
//!   interrupt context                 polling context
//!   service_interrupt()               status()
//!     read STAT                         read STAT / counters
//!     write STAT (ack)                  take() ──┐
//!     publish(bits) ──> IrqHandoff ─────────────┘ merge
//! ```

#[cfg(not(all(test, loom)))]
use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(all(test, loom))]
use loom::sync::atomic::{AtomicU32, Ordering};

use alloc::sync::Arc;

use log::debug;

use crate::access::RegisterPort;
use crate::cursor::CursorDump;
use crate::error::Result;
use crate::fsm::RingState;
use crate::regs::{CdrIrq, RdrIrq, Reg, RegisterFile, RingKind};

/// Latched interrupt bits moving from the interrupt handler to the poller.
///
/// Single writer (`publish`), single reader (`take`). Bits published
/// between two `take` calls are merged.
#[derive(Debug)]
pub struct IrqHandoff {
    bits: AtomicU32,
}

impl IrqHandoff {
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Add `bits` to the latched set.
    pub fn publish(&self, bits: u32) {
        if bits != 0 {
            self.bits.fetch_or(bits, Ordering::Release);
        }
    }

    /// Return and clear the latched set.
    pub fn take(&self) -> u32 {
        self.bits.swap(0, Ordering::Acquire)
    }

    /// Latched set, left in place.
    pub fn peek(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }
}

impl Default for IrqHandoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt context handle of one ring.
///
/// Owns its own register file view and shares the [`IrqHandoff`] with the
/// ring, so it can live in an interrupt handler while the ring is polled
/// elsewhere.
#[derive(Debug, Clone)]
pub struct IrqLine<P> {
    regs: RegisterFile<P>,
    handoff: Arc<IrqHandoff>,
}

impl<P: RegisterPort> IrqLine<P> {
    pub(crate) fn new(regs: RegisterFile<P>, handoff: Arc<IrqHandoff>) -> Self {
        Self { regs, handoff }
    }

    /// Acknowledge the pending interrupts of the ring and latch them for the
    /// next `status()` call. Returns the acknowledged bits.
    pub fn service_interrupt(&self) -> Result<u32> {
        service_interrupt(&self.regs, &self.handoff)
    }

    pub fn handoff(&self) -> &IrqHandoff {
        &self.handoff
    }
}

pub(crate) fn service_interrupt<P: RegisterPort>(
    regs: &RegisterFile<P>,
    handoff: &IrqHandoff,
) -> Result<u32> {
    let mask = match regs.kind() {
        RingKind::Command => CdrIrq::all().bits(),
        RingKind::Result => RdrIrq::all().bits(),
    };
    let pending = regs.read(Reg::Stat)? & mask;
    if pending != 0 {
        regs.write(Reg::Stat, pending)?;
        handoff.publish(pending);
        debug!("{:?} ring interrupt {pending:#04x}", regs.kind());
    }
    Ok(pending)
}

/// Software view of a ring, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingDump {
    pub state: RingState,
    pub cursor: CursorDump,
    pub ring_size_words: usize,
    pub desc_size_words: usize,
    pub desc_offs_words: usize,
    /// Hand-over counter value cached by the last fill level query.
    pub cached_count_words: Option<u32>,
    /// Result rings: a first segment was seen, the packet is not complete.
    pub packet_open: bool,
}

/// Snapshot of the command ring status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CdrStatus {
    /// Pending interrupts, including those already acknowledged by
    /// `service_interrupt`.
    pub irq: CdrIrq,
    /// Free words in the command descriptor FIFO.
    pub fifo_words: u16,
    /// Words handed to the engine and not yet fetched.
    pub prepared_words: u32,
    pub processed_words: u32,
    /// Saturates at 127.
    pub processed_packets: u8,
}

impl CdrStatus {
    /// Errors after which the ring has to be reset and initialized again.
    pub fn needs_reinit(&self) -> bool {
        self.irq
            .intersects(CdrIrq::DMA_ERROR | CdrIrq::ERROR | CdrIrq::OU_FLOW)
    }
}

/// Snapshot of the result ring status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdrStatus {
    pub irq: RdrIrq,
    pub fifo_words: u16,
    /// Words prepared for the engine.
    pub prepared_words: u32,
    /// Words of processed results not yet acknowledged.
    pub processed_words: u32,
    /// Saturates at 127.
    pub processed_packets: u8,
}

impl RdrStatus {
    pub fn needs_reinit(&self) -> bool {
        self.irq
            .intersects(RdrIrq::DMA_ERROR | RdrIrq::ERROR | RdrIrq::OU_FLOW)
    }

    /// Buffer or descriptor overflow reported.
    pub fn overflow(&self) -> bool {
        self.irq
            .intersects(RdrIrq::BUFFER_OVERFLOW | RdrIrq::DESCRIPTOR_OVERFLOW)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn take_drains_published_bits() {
        let h = IrqHandoff::new();
        h.publish(0x1);
        h.publish(0x4);
        assert_eq!(h.peek(), 0x5);
        assert_eq!(h.take(), 0x5);
        assert_eq!(h.take(), 0);
    }

    #[test]
    fn reinit_classification() {
        let s = CdrStatus {
            irq: CdrIrq::THRESHOLD | CdrIrq::TIMEOUT,
            ..Default::default()
        };
        assert!(!s.needs_reinit());

        let s = RdrStatus {
            irq: RdrIrq::OU_FLOW | RdrIrq::BUFFER_OVERFLOW,
            ..Default::default()
        };
        assert!(s.needs_reinit());
        assert!(s.overflow());
    }
}
