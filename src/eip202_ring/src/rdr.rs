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

//! Result descriptor ring (RDR)
//!
//! Software prepares empty destination descriptors, the engine overwrites them
//! with results in the same slots and software reads them back. Prepared and
//! processed slots share one ring, so the cursor keeps one slot empty.
//!
//! Completion is detected by the processed counter or, when the counter can
//! run ahead of descriptor memory, by an [`AntiRaceStrategy`] looking at each
//! slot.
//!
//! ```text
//!   prepare(bufs) ──> encode + arm + sync_for_device ──> PREP_COUNT += n
//!   get(out)      <── sync_for_host + is_complete + decode
//!                     re-arm + sync_for_device       ──> PROC_COUNT -= n (one write)
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, error, trace, warn};
#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::access::{DmaRegion, RegisterPort, TokenSizeProvider};
use crate::anti_race::{AntiRace, AntiRaceStrategy};
use crate::cdr::PutOutcome;
use crate::config::{DmaAddressMode, RdrSettings, RingParams};
use crate::cursor::{RingCursor, SlotReader, SlotWriter, fill_slots};
use crate::desc::{
    DescriptorCodec, PreparedControl, PreparedDescriptor, ResultControl, ResultDescriptor,
    SEGMENT_BYTES_MAX,
};
use crate::error::{Result, RingError};
use crate::fsm::{RingState, RingStateMachine};
use crate::regs::{
    COUNT_FIELD_MAX_WORDS, CountReg, DescSize, PROC_PKT_FIELD_MAX, ProcCountReg, RdrIrq, Reg,
    RegisterFile, RingCfg, RingKind, RingSizeReg, StatReg, Thresh,
};
use crate::status::{IrqHandoff, IrqLine, RdrStatus, RingDump, service_interrupt};
use crate::token::{BypassData, ResultToken};

/// Result of [`ResultRing::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetOutcome {
    /// Descriptors appended to the output vector.
    pub descriptors: usize,
    /// Packets completed by those descriptors.
    pub packets: usize,
    /// Fill level after the acknowledgement.
    pub fill_level: usize,
}

/// Processed but not yet acknowledged results, from PROC_COUNT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessedLevel {
    pub descriptors: usize,
    /// Saturates at 127.
    pub packets: u8,
}

/// Manager of one result descriptor ring.
pub struct ResultRing<P, D, T> {
    regs: RegisterFile<P>,
    dma: D,
    tokens: T,
    fsm: RingStateMachine,
    cursor: RingCursor,
    codec: DescriptorCodec,
    anti_race: AntiRace,
    ring_size_words: usize,
    per_packet_irq: bool,
    packet_open: bool,
    fatal_status: u32,
    handoff: Arc<IrqHandoff>,
}

impl<P, D, T> ResultRing<P, D, T>
where
    P: RegisterPort,
    D: DmaRegion,
    T: TokenSizeProvider,
{
    /// Result ring `index` of the device behind `port`. The ring starts in
    /// [`RingState::Unknown`].
    pub fn new(port: P, index: u32, dma: D, tokens: T) -> Self {
        Self {
            regs: RegisterFile::new(port, RingKind::Result, index),
            dma,
            tokens,
            fsm: RingStateMachine::default(),
            cursor: RingCursor::combined(0),
            codec: DescriptorCodec::default(),
            anti_race: AntiRace::default(),
            ring_size_words: 0,
            per_packet_irq: false,
            packet_open: false,
            fatal_status: 0,
            handoff: Arc::new(IrqHandoff::new()),
        }
    }

    #[inline]
    pub fn state(&self) -> RingState {
        self.fsm.state()
    }

    /// Slots in the ring. One of them always stays empty.
    #[inline]
    pub fn capacity(&self) -> usize {
        if self.codec.stride_words == 0 {
            0
        } else {
            self.ring_size_words / self.codec.stride_words
        }
    }

    /// Descriptor layout picked by the last `init`.
    pub fn codec(&self) -> &DescriptorCodec {
        &self.codec
    }

    pub fn dma(&self) -> &D {
        &self.dma
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn init(&mut self, settings: &RdrSettings) -> Result<()> {
        self.fsm.set_mode(settings.options.fsm);
        self.fsm.force(RingState::Uninitialized);

        if !self.regs.detect()? {
            warn!("no EIP-202 result ring at {:#x}", self.regs.base());
            return Err(RingError::UnsupportedFeature("result ring not detected"));
        }

        let p = &settings.params;
        if p.dma_address_mode == DmaAddressMode::ExtendedAddress {
            return Err(RingError::UnsupportedFeature("extended DMA addressing"));
        }

        let layout = p.dma_address_mode.layout();
        let out_words = self.tokens.output_token_word_count();
        let offs = p.desc_offs_words as usize;
        let size = p.desc_size_words as usize;
        let token_offset = p.token_offset_words as usize;
        let ring = p.ring_size_words as usize;

        if p.desc_offs_words < RingParams::MIN_DESC_OFFS_WORDS
            || p.desc_offs_words > RingParams::MAX_DESC_OFFS_WORDS
            || offs < size
        {
            return Err(RingError::Argument("descriptor offset out of range or below descriptor size"));
        }
        if p.ring_size_words < p.desc_offs_words || p.ring_size_words > RingParams::MAX_RING_SIZE_WORDS {
            return Err(RingError::Argument("ring size out of range"));
        }
        if size > token_offset + out_words {
            return Err(RingError::Argument("descriptor size too large"));
        }
        if token_offset < layout.result_control_words() {
            return Err(RingError::Argument("token offset inside the descriptor header"));
        }

        let fifo = StatReg::fifo_words(self.regs.read(Reg::Stat)?) as usize;
        if p.fetch_size_words as usize > fifo || p.fetch_threshold_words as usize > fifo {
            return Err(RingError::Argument("fetch size or threshold above FIFO size"));
        }
        if p.fetch_size_words as usize % offs != 0 {
            return Err(RingError::Argument("fetch size not a multiple of the descriptor offset"));
        }
        if p.irq_threshold as u64 * offs as u64 > ring as u64 {
            return Err(RingError::Argument("interrupt threshold beyond the ring"));
        }
        if self.dma.len() < p.ring_size_bytes() {
            return Err(RingError::Argument("DMA region smaller than the ring"));
        }

        let codec = DescriptorCodec {
            layout,
            stride_words: offs,
            size_words: size,
            token_offset_words: token_offset,
            output_token_words: out_words,
        };
        let anti_race = AntiRace::new(settings.options.anti_race);
        anti_race.validate(&codec)?;

        self.codec = codec;
        self.anti_race = anti_race;
        self.ring_size_words = ring;
        self.cursor = RingCursor::combined(ring / offs);
        self.per_packet_irq = false;
        self.packet_open = false;
        self.fatal_status = 0;

        for slot in 0..self.capacity() {
            self.codec.zero_slot(&self.dma, slot)?;
            self.anti_race.arm_slot(&self.dma, &self.codec, slot)?;
        }
        self.dma
            .sync_for_device(0, p.ring_size_bytes())
            .map_err(|_| RingError::DmaAccess(0))?;

        self.regs.write(Reg::RingBaseLo, p.ring_dma_addr as u32)?;
        self.regs.write(Reg::RingBaseHi, (p.ring_dma_addr >> 32) as u32)?;
        self.regs.write(Reg::RingSize, RingSizeReg::encode(p.ring_size_words))?;
        self.regs.write(
            Reg::DescSize,
            DescSize {
                size_words: size as u8,
                offs_words: offs as u8,
                atp_to_token: false,
                atp: false,
                addr64: layout.addr64,
            }
            .to_word(),
        )?;
        self.regs.write(
            Reg::Cfg,
            RingCfg {
                fetch_words: p.fetch_size_words as u16,
                fetch_threshold_words: p.fetch_threshold_words as u16,
                ownership_words: self.anti_race.reserves_last_word()
                    || settings.continuous_scatter,
            }
            .to_word(RingKind::Result),
        )?;

        let mut dma_cfg = p.dma_cfg(RingKind::Result);
        dma_cfg.pad_to_offset = settings.continuous_scatter;
        self.regs
            .write(Reg::DmaCfg, dma_cfg.to_word(RingKind::Result))?;
        let thresh = if p.irq_threshold > 0 {
            Thresh {
                threshold: p.irq_threshold * p.desc_offs_words,
                packet_mode: false,
                timeout: p.irq_timeout,
            }
            .to_word(RingKind::Result)
        } else {
            self.disabled_thresh()
        };
        self.regs.write(Reg::Thresh, thresh)?;

        self.fsm.set_state(RingState::Initialized)?;
        debug!(
            "result ring initialized: {} slots, stride {offs}, size {size}, token at {token_offset}, {:?}",
            self.capacity(),
            self.anti_race.mode()
        );
        Ok(())
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn reset(&mut self) -> Result<()> {
        self.fsm.force(RingState::Unknown);
        self.fsm.set_state(RingState::Uninitialized)?;

        self.cursor = RingCursor::combined(0);
        self.codec = DescriptorCodec::default();
        self.ring_size_words = 0;
        self.per_packet_irq = false;
        self.packet_open = false;
        self.fatal_status = 0;
        self.handoff.take();

        self.regs.write(Reg::Count, CountReg::encode(0, true))?;
        self.regs
            .write(Reg::ProcCount, ProcCountReg::encode(0, 0, true))?;
        for reg in [
            Reg::Pointer,
            Reg::ProcPointer,
            Reg::RingBaseLo,
            Reg::RingBaseHi,
            Reg::RingSize,
            Reg::DescSize,
            Reg::Cfg,
            Reg::DmaCfg,
            Reg::Thresh,
        ] {
            self.regs.write_default(reg)?;
        }
        self.regs.write(Reg::Stat, RdrIrq::all().bits())?;

        debug!("result ring {:#x} reset", self.regs.base());
        Ok(())
    }

    /// Prepared plus processed slots, from the software cursor.
    pub fn fill_level(&self) -> usize {
        self.cursor.fill_level().unwrap_or(0)
    }

    /// Prepared descriptors the engine has not filled yet, from PREP_COUNT.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn prepared_fill_level(&self) -> Result<usize> {
        let words = CountReg::decode(self.regs.read(Reg::Count)?);
        Ok(fill_slots(
            words as usize,
            self.ring_size_words,
            self.codec.stride_words,
        ))
    }

    /// Processed descriptors waiting for `get`, from PROC_COUNT. Only
    /// available while the counter is trusted.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn processed_fill_level(&self) -> Result<ProcessedLevel> {
        if !self.anti_race.trusts_counter() {
            return Err(RingError::UnsupportedFeature(
                "processed counter not trusted by the completion strategy",
            ));
        }
        let (words, packets) = ProcCountReg::decode(self.regs.read(Reg::ProcCount)?);
        Ok(ProcessedLevel {
            descriptors: if self.codec.stride_words == 0 {
                0
            } else {
                words as usize / self.codec.stride_words
            },
            packets,
        })
    }

    /// Hand empty destination descriptors to the engine.
    ///
    /// Accepts the longest prefix that fits (one slot always stays empty) and
    /// hands it over with a single PREP_COUNT write.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn prepare(&mut self, descs: &[PreparedDescriptor]) -> Result<PutOutcome> {
        self.check_operational()?;

        let stride = self.codec.stride_words;
        let request = descs.len().min(COUNT_FIELD_MAX_WORDS / stride);
        let batch = descs.get(..request).unwrap_or(descs);
        for d in batch {
            self.check_prepared(d)?;
        }

        let mut writer = PreparedWriter {
            dma: &self.dma,
            codec: &self.codec,
            anti_race: &self.anti_race,
            descs: batch,
        };
        let accepted = self.cursor.put(&mut writer, batch.len())?;

        if accepted > 0 {
            self.regs
                .write(Reg::Count, CountReg::encode((accepted * stride) as u32, false))?;
        }

        let fill_level = self.fill_level();
        self.fsm.set_state(self.state_for_fill(fill_level))?;
        trace!(
            "rdr prepared {accepted}/{} descriptors, fill level {fill_level}",
            descs.len()
        );

        Ok(PutOutcome {
            accepted,
            fill_level,
        })
    }

    /// Move processed results into `out`.
    ///
    /// Stops at `max_descriptors`, at the first slot that is not complete,
    /// and before the first segment of a packet once `max_packets` packets
    /// were returned (`max_packets == 0` means no packet limit). A packet
    /// started in one call may be finished in the next one.
    ///
    /// With per-packet interrupts the packet limit is also capped at the
    /// packets PROC_COUNT reports, at most 127, so that the single
    /// acknowledgement covers everything returned.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn get(
        &mut self,
        out: &mut Vec<ResultDescriptor>,
        max_packets: usize,
        max_descriptors: usize,
    ) -> Result<GetOutcome> {
        self.check_operational()?;
        if max_descriptors == 0 {
            return Err(RingError::Argument("max_descriptors must be at least 1"));
        }

        let stride = self.codec.stride_words;
        let limit = max_descriptors.min(COUNT_FIELD_MAX_WORDS / stride);

        let mut packet_quota = (max_packets > 0).then_some(max_packets);
        let mut ready = None;
        if self.anti_race.trusts_counter() || self.per_packet_irq {
            let (words, packets) = ProcCountReg::decode(self.regs.read(Reg::ProcCount)?);
            if self.per_packet_irq {
                // One PROC_COUNT write acknowledges at most what the counter reported.
                let counted = packets as usize;
                packet_quota = Some(packet_quota.map_or(counted, |q| q.min(counted)));
            }
            if self.anti_race.trusts_counter() {
                let words_ready = words as usize / stride;
                if words_ready == 0
                    || packet_quota == Some(0)
                    || (max_packets > 0 && packets == 0)
                {
                    self.fsm.set_state(RingState::Initialized)?;
                    return Ok(GetOutcome {
                        fill_level: self.fill_level(),
                        ..Default::default()
                    });
                }
                ready = Some(words_ready);
            }
        }

        let start = out.len();
        let capacity = self.capacity();
        let mut reader = ResultReader {
            dma: &self.dma,
            codec: &self.codec,
            anti_race: &self.anti_race,
            out,
            capacity,
            pending: self.cursor.used().unwrap_or(0),
            known_complete: 0,
            packet_quota,
            packets: 0,
            packet_open: &mut self.packet_open,
        };
        let taken = self.cursor.get(&mut reader, limit, ready)?;
        let packets = reader.packets;
        debug_assert_eq!(out.len() - start, taken);

        if taken == 0 {
            self.fsm.set_state(RingState::Initialized)?;
            return Ok(GetOutcome {
                fill_level: self.fill_level(),
                ..Default::default()
            });
        }

        let acked_packets = if self.per_packet_irq {
            packets.min(PROC_PKT_FIELD_MAX as usize) as u8
        } else {
            0
        };
        self.regs.write(
            Reg::ProcCount,
            ProcCountReg::encode((taken * stride) as u32, acked_packets, false),
        )?;

        let fill_level = self.fill_level();
        self.fsm.set_state(self.state_for_fill(fill_level))?;
        trace!("rdr get {taken} descriptors, {packets} packets, fill level {fill_level}");

        Ok(GetOutcome {
            descriptors: taken,
            packets,
            fill_level,
        })
    }

    /// Interrupt once `threshold` results are processed, or after
    /// `timeout` * 256 engine cycles with at least one pending. With `per_packet` the
    /// threshold counts packets instead of descriptors and `get`
    /// acknowledges packets too.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn enable_processed_high_irq(
        &mut self,
        threshold: usize,
        timeout: u8,
        per_packet: bool,
    ) -> Result<()> {
        self.check_operational()?;

        let value = if per_packet {
            if threshold > PROC_PKT_FIELD_MAX as usize {
                return Err(RingError::Argument("packet threshold above 127"));
            }
            threshold
        } else {
            threshold
                .checked_mul(self.codec.stride_words)
                .filter(|&w| w <= self.ring_size_words)
                .ok_or(RingError::Argument("interrupt threshold beyond the ring"))?
        };

        self.regs.write(
            Reg::Thresh,
            Thresh {
                threshold: value as u32,
                packet_mode: per_packet,
                timeout,
            }
            .to_word(RingKind::Result),
        )?;
        self.per_packet_irq = per_packet;
        debug!(
            "result ring processed irq at {threshold} {}, timeout {timeout}",
            if per_packet { "packets" } else { "descriptors" }
        );
        Ok(())
    }

    /// Acknowledge pending interrupts. With `overflow_only` only the buffer
    /// and descriptor overflow bits are cleared and the threshold stays
    /// armed, otherwise the threshold and timeout interrupts are disabled.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn clear_and_disable_irq(&mut self, overflow_only: bool) -> Result<()> {
        if overflow_only {
            let bits = RdrIrq::BUFFER_OVERFLOW | RdrIrq::DESCRIPTOR_OVERFLOW;
            return self.regs.write(Reg::Stat, bits.bits());
        }

        self.regs.write(Reg::Thresh, self.disabled_thresh())?;
        self.regs.write(Reg::Stat, RdrIrq::all().bits())?;
        self.per_packet_irq = false;
        self.handoff.take();
        Ok(())
    }

    /// Snapshot of STAT and the counters, merged with interrupts latched by
    /// [`service_interrupt`](Self::service_interrupt).
    ///
    /// A DMA error moves the ring to [`RingState::FatalError`].
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn status(&mut self) -> Result<RdrStatus> {
        let stat = self.regs.read(Reg::Stat)?;
        let prep = self.regs.read(Reg::Count)?;
        let (processed_words, processed_packets) =
            ProcCountReg::decode(self.regs.read(Reg::ProcCount)?);

        let irq = RdrIrq::from_bits_truncate(stat | self.handoff.take());
        if irq.contains(RdrIrq::DMA_ERROR) {
            self.enter_fatal(irq.bits());
            return Err(RingError::Fatal { status: irq.bits() });
        }

        Ok(RdrStatus {
            irq,
            fifo_words: StatReg::fifo_words(stat),
            prepared_words: CountReg::decode(prep),
            processed_words,
            processed_packets,
        })
    }

    /// Acknowledge pending interrupts from interrupt context.
    pub fn service_interrupt(&self) -> Result<u32> {
        service_interrupt(&self.regs, &self.handoff)
    }

    pub fn irq_line(&self) -> IrqLine<P>
    where
        P: Clone,
    {
        IrqLine::new(self.regs.clone(), self.handoff.clone())
    }

    pub fn irq_handoff(&self) -> Arc<IrqHandoff> {
        self.handoff.clone()
    }

    pub fn dump(&self) -> RingDump {
        RingDump {
            state: self.fsm.state(),
            cursor: self.cursor.dump(),
            ring_size_words: self.ring_size_words,
            desc_size_words: self.codec.size_words,
            desc_offs_words: self.codec.stride_words,
            cached_count_words: None,
            packet_open: self.packet_open,
        }
    }

    /// Control word for a prepared descriptor.
    pub fn make_prepared_control_word(control: PreparedControl) -> u32 {
        control.to_word()
    }

    /// Control word of the result `ahead` slots past the next one `get`
    /// would return, without consuming it.
    pub fn read_processed_control_word(&self, ahead: usize) -> Result<ResultControl> {
        let capacity = self.capacity();
        if ahead >= capacity {
            return Err(RingError::Argument("slot beyond the ring"));
        }
        let slot = (self.cursor.out_head() + ahead) % capacity;
        let offset = self.codec.slot_offset(slot);
        self.dma
            .sync_for_host(offset, self.codec.slot_offset(1))
            .map_err(|_| RingError::DmaAccess(offset))?;
        Ok(ResultControl::from_word(
            self.codec.read_control(&self.dma, slot)?,
        ))
    }

    /// Bypass data carried in the output token of `desc`.
    pub fn read_bypass_data(desc: &ResultDescriptor) -> Result<BypassData> {
        let token = ResultToken::parse(&desc.token)?;
        let words = ResultToken::bypass_words(&desc.token);
        let n = (token.bypass_bytes as usize).div_ceil(4);
        let words = words
            .get(..n)
            .ok_or(RingError::Argument("bypass data beyond the output token"))?;
        BypassData::parse(words)
    }

    fn disabled_thresh(&self) -> u32 {
        Thresh {
            threshold: self.ring_size_words as u32,
            packet_mode: false,
            timeout: 0,
        }
        .to_word(RingKind::Result)
    }

    fn state_for_fill(&self, fill: usize) -> RingState {
        match fill {
            0 => RingState::Initialized,
            f if f >= self.capacity() => RingState::Full,
            _ => RingState::Free,
        }
    }

    fn check_operational(&self) -> Result<()> {
        match self.fsm.state() {
            RingState::FatalError => Err(RingError::Fatal {
                status: self.fatal_status,
            }),
            s if s.is_operational() => Ok(()),
            s => Err(RingError::IllegalStateTransition {
                from: s,
                to: RingState::Free,
            }),
        }
    }

    fn check_prepared(&self, d: &PreparedDescriptor) -> Result<()> {
        if d.control.segment_bytes > SEGMENT_BYTES_MAX {
            return Err(RingError::Argument("segment byte count exceeds 20 bits"));
        }
        if !self.codec.layout.addr64 && d.dst_addr > u32::MAX as u64 {
            return Err(RingError::Argument("address above 4 GiB in 32-bit mode"));
        }
        Ok(())
    }

    fn enter_fatal(&mut self, status: u32) {
        error!(
            "result ring {:#x} DMA error (status {status:#04x}), reset required",
            self.regs.base()
        );
        self.fatal_status = status;
        self.fsm.force(RingState::FatalError);
    }
}

struct PreparedWriter<'a, D> {
    dma: &'a D,
    codec: &'a DescriptorCodec,
    anti_race: &'a AntiRace,
    descs: &'a [PreparedDescriptor],
}

impl<D: DmaRegion> SlotWriter for PreparedWriter<'_, D> {
    fn write_slots(&mut self, index: usize, count: usize, skip: usize) -> Result<usize> {
        let descs = self
            .descs
            .get(skip..skip + count)
            .ok_or(RingError::Argument("descriptor batch shorter than requested"))?;

        for (i, d) in descs.iter().enumerate() {
            self.codec.encode_prepared(self.dma, index + i, d)?;
            self.anti_race.arm_slot(self.dma, self.codec, index + i)?;
        }

        let offset = self.codec.slot_offset(index);
        self.dma
            .sync_for_device(offset, self.codec.slot_offset(count))
            .map_err(|_| RingError::DmaAccess(offset))?;
        Ok(count)
    }
}

struct ResultReader<'a, D> {
    dma: &'a D,
    codec: &'a DescriptorCodec,
    anti_race: &'a AntiRace,
    out: &'a mut Vec<ResultDescriptor>,
    capacity: usize,
    /// Prepared slots not yet read back when the get started.
    pending: usize,
    /// Slots after the current one known complete through a later mark.
    known_complete: usize,
    packet_quota: Option<usize>,
    packets: usize,
    packet_open: &'a mut bool,
}

impl<D: DmaRegion> ResultReader<'_, D> {
    fn sync_slot(&self, slot: usize) -> Result<()> {
        let offset = self.codec.slot_offset(slot);
        self.dma
            .sync_for_host(offset, self.codec.slot_offset(1))
            .map_err(|_| RingError::DmaAccess(offset))
    }

    /// Is `slot`, the `position`th slot of this get, complete?
    ///
    /// With last-segment marking an unmarked slot is complete once a later
    /// prepared slot carries the mark. The search stops at the prepared
    /// region.
    fn slot_complete(&mut self, slot: usize, position: usize) -> Result<bool> {
        if self.known_complete > 0 {
            self.known_complete -= 1;
            return Ok(true);
        }
        if self.anti_race.is_complete(self.dma, self.codec, slot)? {
            return Ok(true);
        }
        if !self.anti_race.marks_last_segment_only() {
            return Ok(false);
        }

        for ahead in 1..self.pending.saturating_sub(position) {
            let later = (slot + ahead) % self.capacity;
            self.sync_slot(later)?;
            if self.anti_race.is_complete(self.dma, self.codec, later)? {
                trace!("slot {slot} completed by the mark in slot {later}");
                self.known_complete = ahead - 1;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<D: DmaRegion> SlotReader for ResultReader<'_, D> {
    fn read_slots(&mut self, index: usize, count: usize, skip: usize) -> Result<usize> {
        let slot_bytes = self.codec.slot_offset(1);
        let strip_app_id = self.anti_race.reserves_application_id();
        let mut n = 0;

        for slot in index..index + count {
            self.sync_slot(slot)?;

            if !self.slot_complete(slot, skip + n)? {
                break;
            }

            let control = ResultControl::from_word(self.codec.read_control(self.dma, slot)?);
            if control.first && self.packet_quota.is_some_and(|q| self.packets >= q) {
                break;
            }

            self.out
                .push(self.codec.decode_result(self.dma, slot, strip_app_id)?);

            if control.first {
                *self.packet_open = true;
            }
            if control.last && *self.packet_open {
                *self.packet_open = false;
                self.packets += 1;
            }

            if !self.anti_race.trusts_counter() {
                let offset = self.codec.slot_offset(slot);
                self.codec.clear_result(self.dma, slot)?;
                self.anti_race.arm_slot(self.dma, self.codec, slot)?;
                self.dma
                    .sync_for_device(offset, slot_bytes)
                    .map_err(|_| RingError::DmaAccess(offset))?;
            }
            n += 1;
        }

        Ok(n)
    }
}
