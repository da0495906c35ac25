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

#![no_main]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use arbitrary::Arbitrary;
use eip202_ring::{
    CdrSettings, CommandControl, CommandDescriptor, CommandRing, DmaAddressMode, DmaRegion,
    FixedTokenSize, PreparedDescriptor, RdrSettings, RegisterPort, ResultRing, RingOptions,
    RingParams,
};
use libfuzzer_sys::fuzz_target;

const WINDOW: u32 = 0x800;
const COUNT: u32 = 0x2C;
const PROC_COUNT: u32 = 0x30;
const STAT: u32 = 0x3C;
const VERSION: u32 = 0x7FC;
const FIFO_WORDS: u32 = 256;
const MAX_SLOTS: u8 = 64;
const MAX_OFFS: u8 = 32;

/// Register window that keeps plain values, with counter and STAT write
/// semantics close enough to the hardware to drive the rings.
#[derive(Default)]
struct MemPort {
    regs: RefCell<HashMap<u32, u32>>,
}

impl MemPort {
    fn new() -> Self {
        let port = Self::default();
        {
            let mut regs = port.regs.borrow_mut();
            regs.insert(STAT, FIFO_WORDS << 16);
            regs.insert(WINDOW + STAT, FIFO_WORDS << 16);
            regs.insert(VERSION, 0x0231_35CA);
        }
        port
    }
}

impl RegisterPort for MemPort {
    fn read32(&self, offset: u32) -> u32 {
        self.regs.borrow().get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut regs = self.regs.borrow_mut();
        let old = regs.get(&offset).copied().unwrap_or(0);
        let words = (old >> 2) & 0x3F_FFFF;
        let delta = (value >> 2) & 0x3FFF;
        let new = match offset % WINDOW {
            COUNT | PROC_COUNT if value & (1 << 31) != 0 => 0,
            COUNT => (words + delta) << 2,
            PROC_COUNT => (old & 0x7F00_0000) | (words.saturating_sub(delta) << 2),
            STAT => old & !(value & 0xFF),
            _ => value,
        };
        regs.insert(offset, new);
    }
}

struct VecDma {
    mem: RefCell<Vec<u8>>,
}

impl VecDma {
    fn new(len: usize) -> Self {
        Self {
            mem: RefCell::new(vec![0; len]),
        }
    }
}

impl DmaRegion for VecDma {
    type Error = ();

    fn len(&self) -> usize {
        self.mem.borrow().len()
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<usize, ()> {
        let mem = self.mem.borrow();
        let end = offset.checked_add(dst.len()).ok_or(())?;
        dst.copy_from_slice(mem.get(offset..end).ok_or(())?);
        Ok(dst.len())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<usize, ()> {
        let mut mem = self.mem.borrow_mut();
        let end = offset.checked_add(src.len()).ok_or(())?;
        mem.get_mut(offset..end).ok_or(())?.copy_from_slice(src);
        Ok(src.len())
    }

    fn sync_for_device(&self, offset: usize, len: usize) -> Result<(), ()> {
        (offset.checked_add(len).ok_or(())? <= self.len()).then_some(()).ok_or(())
    }

    fn sync_for_host(&self, offset: usize, len: usize) -> Result<(), ()> {
        self.sync_for_device(offset, len)
    }
}

#[derive(Arbitrary, Debug)]
struct Shape {
    slots: u8,
    offs: u8,
    size: u8,
    mode: DmaAddressMode,
    options: RingOptions,
}

impl Shape {
    fn params(&self) -> RingParams {
        let offs = (self.offs % MAX_OFFS) as u32 + 1;
        let slots = (self.slots % MAX_SLOTS) as u32 + 1;
        RingParams {
            dma_address_mode: self.mode,
            ring_size_words: offs * slots,
            desc_size_words: (self.size as u32 % offs) + 1,
            desc_offs_words: offs,
            fetch_size_words: offs,
            fetch_threshold_words: offs,
            ..Default::default()
        }
    }
}

#[derive(Arbitrary, Debug)]
enum Op {
    InitCdr {
        shape: Shape,
        atp: bool,
    },
    InitRdr {
        shape: Shape,
        token_offset: u8,
        continuous_scatter: bool,
    },
    Put(Vec<(CommandControl, u8, u64)>),
    Prepare(Vec<PreparedDescriptor>),
    Get {
        max_packets: u8,
        max_descriptors: u8,
    },
    /// The engine writes a word of result ring memory.
    EngineWrite {
        word: u16,
        value: u32,
    },
    /// The engine changes a register of either window.
    Poke {
        result: bool,
        reg: u8,
        value: u32,
    },
    Status,
    ServiceInterrupt,
    Reset {
        result: bool,
    },
}

const DMA_BYTES: usize = MAX_SLOTS as usize * MAX_OFFS as usize * 4;

// Ring operations must never panic, whatever the device registers and the
// engine-written memory hold, and must never report more than they were
// asked to do.
fuzz_target!(|ops: Vec<Op>| {
    let port = Rc::new(MemPort::new());
    let tokens = FixedTokenSize::new(8, 12);
    let mut cdr = CommandRing::new(port.clone(), 0, VecDma::new(DMA_BYTES), tokens);
    let mut rdr = ResultRing::new(port.clone(), 0, VecDma::new(DMA_BYTES), tokens);
    let token = [0u32; 4];
    let mut results = Vec::new();

    for op in ops {
        match op {
            Op::InitCdr { shape, atp } => {
                let _ = cdr.init(&CdrSettings {
                    params: shape.params(),
                    atp,
                    atp_to_token: false,
                    options: shape.options,
                });
            }
            Op::InitRdr {
                shape,
                token_offset,
                continuous_scatter,
            } => {
                let mut params = shape.params();
                params.token_offset_words = (token_offset % 8) as u32;
                let _ = rdr.init(&RdrSettings {
                    params,
                    continuous_scatter,
                    options: shape.options,
                });
            }
            Op::Put(batch) => {
                let descs: Vec<_> = batch
                    .iter()
                    .map(|&(control, application_id, src_addr)| CommandDescriptor {
                        control,
                        application_id,
                        src_addr,
                        token: &token,
                        ..Default::default()
                    })
                    .collect();
                if let Ok(out) = cdr.put(&descs) {
                    assert!(out.accepted <= descs.len());
                    assert!(out.fill_level <= cdr.capacity());
                }
            }
            Op::Prepare(batch) => {
                if let Ok(out) = rdr.prepare(&batch) {
                    assert!(out.accepted <= batch.len());
                }
            }
            Op::Get {
                max_packets,
                max_descriptors,
            } => {
                results.clear();
                if let Ok(out) = rdr.get(&mut results, max_packets as usize, max_descriptors as usize) {
                    assert_eq!(out.descriptors, results.len());
                    assert!(out.descriptors <= max_descriptors as usize);
                    assert!(out.packets <= out.descriptors);
                }
            }
            Op::EngineWrite { word, value } => {
                let at = (word as usize * 4) % DMA_BYTES;
                let _ = rdr.dma().write32(at, value);
            }
            Op::Poke { result, reg, value } => {
                let base = if result { WINDOW } else { 0 };
                port.regs
                    .borrow_mut()
                    .insert(base + (reg as u32 % 16) * 4, value);
            }
            Op::Status => {
                let _ = cdr.status();
                let _ = rdr.status();
            }
            Op::ServiceInterrupt => {
                let _ = cdr.service_interrupt();
                let _ = rdr.service_interrupt();
            }
            Op::Reset { result: false } => {
                let _ = cdr.reset();
            }
            Op::Reset { result: true } => {
                let _ = rdr.reset();
            }
        }
    }
});
