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

//! Simulated EIP-202 for unit tests
//!
//! [`MockDevice`] implements the counter registers the way the hardware does
//! (COUNT adds, PROC_COUNT subtracts, STAT is write-one-to-clear), keeps every
//! other register as plain storage and logs every register write. [`MockDma`]
//! is a byte vector that logs sync calls into the same [`EventLog`], so tests
//! can check that descriptors were synced before the hand-over write.
//! [`SimEngine`] moves descriptors from the command ring to the result ring
//! like the packet engine would.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::access::{DmaRegion, FixedTokenSize, RegisterPort};
use crate::anti_race::OWNERSHIP_DONE;
use crate::desc::{
    CommandControl, DescriptorCodec, INPUT_TOKEN_APP_ID_WORD, ResultControl,
};
use crate::regs::{
    CDR_WINDOW_BASE, CountReg, HIA_SIGNATURE, ProcCountReg, RDR_WINDOW_BASE, Reg,
};

pub(crate) const TEST_FIFO_WORDS: u32 = 256;
pub(crate) const TEST_TOKENS: FixedTokenSize = FixedTokenSize::new(8, 12);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    RegWrite { offset: u32, value: u32 },
    SyncForDevice { offset: usize, len: usize },
    SyncForHost { offset: usize, len: usize },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub(crate) fn push(&self, e: Event) {
        self.0.borrow_mut().push(e);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Register writes to `offset`, in order.
    pub(crate) fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match *e {
                Event::RegWrite { offset: o, value } if o == offset => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Position of the first write to `offset`.
    pub(crate) fn first_write_to(&self, offset: u32) -> Option<usize> {
        self.0
            .borrow()
            .iter()
            .position(|e| matches!(*e, Event::RegWrite { offset: o, .. } if o == offset))
    }

    /// Position of the last sync for device.
    pub(crate) fn last_sync_for_device(&self) -> Option<usize> {
        self.0
            .borrow()
            .iter()
            .rposition(|e| matches!(e, Event::SyncForDevice { .. }))
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    regs: BTreeMap<u32, u32>,
    cdr_prep_words: u32,
    cdr_proc_words: u32,
    rdr_prep_words: u32,
    rdr_proc_words: u32,
    rdr_proc_pkts: u32,
    cdr_stat: u32,
    rdr_stat: u32,
    absent: bool,
}

/// Register level model of one CDR/RDR pair (ring index 0).
#[derive(Debug, Clone)]
pub(crate) struct MockDevice {
    state: Rc<RefCell<DeviceState>>,
    log: EventLog,
}

pub(crate) const CDR_COUNT: u32 = CDR_WINDOW_BASE + Reg::Count as u32;
pub(crate) const CDR_PROC_COUNT: u32 = CDR_WINDOW_BASE + Reg::ProcCount as u32;
pub(crate) const CDR_STAT: u32 = CDR_WINDOW_BASE + Reg::Stat as u32;
pub(crate) const CDR_THRESH: u32 = CDR_WINDOW_BASE + Reg::Thresh as u32;
pub(crate) const RDR_PREP_COUNT: u32 = RDR_WINDOW_BASE + Reg::Count as u32;
pub(crate) const RDR_PROC_COUNT: u32 = RDR_WINDOW_BASE + Reg::ProcCount as u32;
pub(crate) const RDR_STAT: u32 = RDR_WINDOW_BASE + Reg::Stat as u32;
pub(crate) const RDR_THRESH: u32 = RDR_WINDOW_BASE + Reg::Thresh as u32;
pub(crate) const RDR_CFG: u32 = RDR_WINDOW_BASE + Reg::Cfg as u32;
pub(crate) const RDR_DMA_CFG: u32 = RDR_WINDOW_BASE + Reg::DmaCfg as u32;

const FIFO_FIELD: u32 = TEST_FIFO_WORDS << 16;

impl MockDevice {
    pub(crate) fn new() -> Self {
        let dev = Self {
            state: Rc::new(RefCell::new(DeviceState::default())),
            log: EventLog::default(),
        };
        dev.set_reg(CDR_WINDOW_BASE + Reg::Version as u32, 0x0231_0000 | HIA_SIGNATURE as u32);
        dev.set_reg(
            CDR_WINDOW_BASE + Reg::Options as u32,
            (1 << 31) | (2 << 12) | (2 << 9) | (4 << 4) | 4,
        );
        dev
    }

    pub(crate) fn log(&self) -> EventLog {
        self.log.clone()
    }

    pub(crate) fn set_absent(&self, absent: bool) {
        self.state.borrow_mut().absent = absent;
    }

    /// Store a raw register value, no side effects and no log entry.
    pub(crate) fn set_reg(&self, offset: u32, value: u32) {
        self.state.borrow_mut().regs.insert(offset, value);
    }

    pub(crate) fn reg(&self, offset: u32) -> u32 {
        self.read32(offset)
    }

    /// Latch raw STAT bits of the command ring.
    pub(crate) fn raise_cdr(&self, bits: u32) {
        self.state.borrow_mut().cdr_stat |= bits;
    }

    /// Latch raw STAT bits of the result ring.
    pub(crate) fn raise_rdr(&self, bits: u32) {
        self.state.borrow_mut().rdr_stat |= bits;
    }

    pub(crate) fn cdr_prepared_words(&self) -> u32 {
        self.state.borrow().cdr_prep_words
    }

    pub(crate) fn rdr_prepared_words(&self) -> u32 {
        self.state.borrow().rdr_prep_words
    }

    /// The engine fetched `words` of command descriptors.
    pub(crate) fn fetch_commands(&self, words: u32) {
        let mut s = self.state.borrow_mut();
        s.cdr_prep_words = s.cdr_prep_words.saturating_sub(words);
        s.cdr_proc_words += words;
    }

    /// The engine wrote `words` of results, `pkts` of them ending a packet.
    pub(crate) fn complete_results(&self, words: u32, pkts: u32) {
        let mut s = self.state.borrow_mut();
        s.rdr_prep_words = s.rdr_prep_words.saturating_sub(words);
        s.rdr_proc_words += words;
        s.rdr_proc_pkts += pkts;
    }

    /// Advance PROC_COUNT without touching descriptor memory.
    pub(crate) fn force_processed(&self, words: u32, pkts: u32) {
        let mut s = self.state.borrow_mut();
        s.rdr_proc_words += words;
        s.rdr_proc_pkts += pkts;
    }

    fn default_for(offset: u32) -> u32 {
        match offset {
            o if o == CDR_WINDOW_BASE + Reg::DmaCfg as u32 => 0x0100_0000,
            o if o == RDR_WINDOW_BASE + Reg::DmaCfg as u32 => 0x0180_0000,
            _ => 0,
        }
    }
}

impl RegisterPort for MockDevice {
    fn read32(&self, offset: u32) -> u32 {
        let s = self.state.borrow();
        let base_lo = offset == CDR_WINDOW_BASE || offset == RDR_WINDOW_BASE;
        if s.absent && base_lo {
            return 0;
        }

        match offset {
            CDR_COUNT => (s.cdr_prep_words & 0x3F_FFFF) << 2,
            CDR_PROC_COUNT => (s.cdr_proc_words & 0x3F_FFFF) << 2,
            CDR_STAT => s.cdr_stat | FIFO_FIELD,
            RDR_PREP_COUNT => (s.rdr_prep_words & 0x3F_FFFF) << 2,
            RDR_PROC_COUNT => {
                ((s.rdr_proc_words & 0x3F_FFFF) << 2) | (s.rdr_proc_pkts.min(0x7F) << 24)
            }
            RDR_STAT => s.rdr_stat | FIFO_FIELD,
            _ => s
                .regs
                .get(&offset)
                .copied()
                .unwrap_or_else(|| Self::default_for(offset)),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        self.log.push(Event::RegWrite { offset, value });
        let mut s = self.state.borrow_mut();
        let clear = value & (1 << 31) != 0;

        match offset {
            CDR_COUNT => {
                if clear {
                    s.cdr_prep_words = 0;
                } else {
                    s.cdr_prep_words += CountReg::decode(value);
                }
            }
            CDR_PROC_COUNT => {
                if clear {
                    s.cdr_proc_words = 0;
                } else {
                    let (w, _) = ProcCountReg::decode(value);
                    s.cdr_proc_words = s.cdr_proc_words.saturating_sub(w);
                }
            }
            CDR_STAT => s.cdr_stat &= !value,
            RDR_PREP_COUNT => {
                if clear {
                    s.rdr_prep_words = 0;
                } else {
                    s.rdr_prep_words += CountReg::decode(value);
                }
            }
            RDR_PROC_COUNT => {
                if clear {
                    s.rdr_proc_words = 0;
                    s.rdr_proc_pkts = 0;
                } else {
                    let (w, p) = ProcCountReg::decode(value);
                    s.rdr_proc_words = s.rdr_proc_words.saturating_sub(w);
                    s.rdr_proc_pkts = s.rdr_proc_pkts.saturating_sub(p as u32);
                }
            }
            RDR_STAT => s.rdr_stat &= !value,
            _ => {
                s.regs.insert(offset, value);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockDmaError;

/// Ring memory backed by a byte vector.
#[derive(Debug, Clone)]
pub(crate) struct MockDma {
    mem: Rc<RefCell<Vec<u8>>>,
    log: EventLog,
}

impl MockDma {
    pub(crate) fn new(len: usize) -> Self {
        Self::with_log(len, EventLog::default())
    }

    pub(crate) fn with_log(len: usize, log: EventLog) -> Self {
        Self {
            mem: Rc::new(RefCell::new(vec![0; len])),
            log,
        }
    }

    /// `n` words starting at word index `at`.
    pub(crate) fn words(&self, at: usize, n: usize) -> Vec<u32> {
        let mem = self.mem.borrow();
        (at..at + n)
            .map(|i| {
                let b = &mem[i * 4..i * 4 + 4];
                u32::from_ne_bytes([b[0], b[1], b[2], b[3]])
            })
            .collect()
    }

    /// Overwrite words starting at word index `at`.
    pub(crate) fn set_words(&self, at: usize, words: &[u32]) {
        let mut mem = self.mem.borrow_mut();
        for (i, w) in words.iter().enumerate() {
            let o = (at + i) * 4;
            mem[o..o + 4].copy_from_slice(&w.to_ne_bytes());
        }
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), MockDmaError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.mem.borrow().len() => Ok(()),
            _ => Err(MockDmaError),
        }
    }
}

impl DmaRegion for MockDma {
    type Error = MockDmaError;

    fn len(&self) -> usize {
        self.mem.borrow().len()
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<usize, Self::Error> {
        self.check(offset, dst.len())?;
        dst.copy_from_slice(&self.mem.borrow()[offset..offset + dst.len()]);
        Ok(dst.len())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<usize, Self::Error> {
        self.check(offset, src.len())?;
        self.mem.borrow_mut()[offset..offset + src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    fn sync_for_device(&self, offset: usize, len: usize) -> Result<(), Self::Error> {
        self.check(offset, len)?;
        self.log.push(Event::SyncForDevice { offset, len });
        Ok(())
    }

    fn sync_for_host(&self, offset: usize, len: usize) -> Result<(), Self::Error> {
        self.check(offset, len)?;
        self.log.push(Event::SyncForHost { offset, len });
        Ok(())
    }
}

/// Packet engine model: fetches command descriptors and writes one result
/// descriptor per command into the next prepared result slot.
pub(crate) struct SimEngine {
    pub(crate) dev: MockDevice,
    pub(crate) cdr_dma: MockDma,
    pub(crate) rdr_dma: MockDma,
    pub(crate) cd: DescriptorCodec,
    pub(crate) rd: DescriptorCodec,
    pub(crate) cd_slots: usize,
    pub(crate) rd_slots: usize,
    pub(crate) ownership: bool,
    cd_next: usize,
    rd_next: usize,
    app_word: u32,
}

impl SimEngine {
    pub(crate) fn new(
        dev: MockDevice,
        cdr_dma: MockDma,
        rdr_dma: MockDma,
        cd: DescriptorCodec,
        rd: DescriptorCodec,
        cd_slots: usize,
        rd_slots: usize,
    ) -> Self {
        Self {
            dev,
            cdr_dma,
            rdr_dma,
            cd,
            rd,
            cd_slots,
            rd_slots,
            ownership: false,
            cd_next: 0,
            rd_next: 0,
            app_word: 0,
        }
    }

    /// Process up to `n` command descriptors. Returns how many were turned
    /// into results.
    pub(crate) fn process(&mut self, n: usize) -> usize {
        let cd_words = self.cd.stride_words as u32;
        let rd_words = self.rd.stride_words as u32;
        let mut done = 0;

        while done < n
            && self.dev.cdr_prepared_words() >= cd_words
            && self.dev.rdr_prepared_words() >= rd_words
        {
            let (ctrl, _, _) = match self.cd.decode_command_header(&self.cdr_dma, self.cd_next) {
                Ok(h) => h,
                Err(_) => break,
            };
            let CommandControl {
                first,
                last,
                segment_bytes,
                ..
            } = ctrl;

            if first {
                let at = self.cd.layout.command_control_words() + INPUT_TOKEN_APP_ID_WORD;
                self.app_word = self.cdr_dma.words(self.cd.stride_words * self.cd_next + at, 1)[0];
            }

            let rd_base = self.rd.stride_words * self.rd_next;
            let token_words = self
                .rd
                .output_token_words
                .min(self.rd.size_words - self.rd.token_offset_words);
            let result = ResultControl {
                first,
                last,
                segment_bytes,
                result_words: token_words as u8,
                ..Default::default()
            };
            self.rdr_dma.set_words(rd_base, &[result.to_word()]);

            let mut token = vec![0u32; token_words];
            if let Some(w) = token.get_mut(0) {
                *w = segment_bytes & 0x1_FFFF;
            }
            // The application id lands in the last segment only.
            if let Some(w) = token.get_mut(2) {
                *w = if last { self.app_word } else { 0 };
            }
            self.rdr_dma.set_words(rd_base + self.rd.token_offset_words, &token);

            if self.ownership {
                self.rdr_dma
                    .set_words(rd_base + self.rd.stride_words - 1, &[OWNERSHIP_DONE]);
            }

            self.dev.fetch_commands(cd_words);
            self.dev.complete_results(rd_words, last as u32);
            self.cd_next = (self.cd_next + 1) % self.cd_slots;
            self.rd_next = (self.rd_next + 1) % self.rd_slots;
            done += 1;
        }

        done
    }
}
