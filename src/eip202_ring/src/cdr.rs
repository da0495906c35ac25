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

//! Command descriptor ring (CDR)
//!
//! Software writes command descriptors at the tail and hands them to the
//! engine by adding their word count to COUNT. The engine fetches from its
//! own read pointer and decrements COUNT as it goes, so COUNT is the only
//! view software has of how much of the ring is still pending.
//!
//! ```text
//!   put(descs)
//!     COUNT ──> free slots ──> RingCursor::put ──> encode + sync_for_device
//!                                                        │
//!     COUNT += accepted * stride  <──────────────────────┘ (one write)
//! ```

use alloc::sync::Arc;

use log::{debug, error, trace, warn};
#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::access::{DmaRegion, RegisterPort, TokenSizeProvider};
use crate::anti_race::{AntiRace, AntiRaceStrategy};
use crate::config::{CdrSettings, DmaAddressMode, RingParams};
use crate::cursor::{RingCursor, SlotWriter, fill_slots};
use crate::desc::{
    CommandControl, CommandDescriptor, DescriptorCodec, INPUT_TOKEN_APP_ID_WORD,
    INPUT_TOKEN_PREFIX_WORDS, SEGMENT_BYTES_MAX,
};
use crate::error::{Result, RingError};
use crate::fsm::{RingState, RingStateMachine};
use crate::regs::{
    COUNT_FIELD_MAX_WORDS, CdrIrq, CountReg, DescSize, HiaOptions, HiaVersion, ProcCountReg,
    Reg, RegisterFile, RingCfg, RingKind, RingSizeReg, StatReg, Thresh,
};
use crate::status::{CdrStatus, IrqHandoff, IrqLine, RingDump, service_interrupt};

const ENGINE_ID_MAX: u8 = 0x1F;

/// Result of [`CommandRing::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutOutcome {
    /// Descriptors handed to the engine, a prefix of the batch.
    pub accepted: usize,
    /// Fill level after the hand-over.
    pub fill_level: usize,
}

/// Manager of one command descriptor ring.
pub struct CommandRing<P, D, T> {
    regs: RegisterFile<P>,
    dma: D,
    tokens: T,
    fsm: RingStateMachine,
    cursor: RingCursor,
    codec: DescriptorCodec,
    anti_race: AntiRace,
    atp: bool,
    ring_size_words: usize,
    input_token_words: usize,
    cached_count: Option<u32>,
    fatal_status: u32,
    handoff: Arc<IrqHandoff>,
}

impl<P, D, T> CommandRing<P, D, T>
where
    P: RegisterPort,
    D: DmaRegion,
    T: TokenSizeProvider,
{
    /// Command ring `index` of the device behind `port`, using `dma` as ring
    /// memory. The ring starts in [`RingState::Unknown`], call
    /// [`reset`](Self::reset) or [`init`](Self::init) before use.
    pub fn new(port: P, index: u32, dma: D, tokens: T) -> Self {
        Self {
            regs: RegisterFile::new(port, RingKind::Command, index),
            dma,
            tokens,
            fsm: RingStateMachine::default(),
            cursor: RingCursor::separate(0, 0),
            codec: DescriptorCodec::default(),
            anti_race: AntiRace::default(),
            atp: false,
            ring_size_words: 0,
            input_token_words: 0,
            cached_count: None,
            fatal_status: 0,
            handoff: Arc::new(IrqHandoff::new()),
        }
    }

    #[inline]
    pub fn state(&self) -> RingState {
        self.fsm.state()
    }

    /// Slots in the ring.
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

    /// Check the settings, clear the ring memory and program the ring.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn init(&mut self, settings: &CdrSettings) -> Result<()> {
        self.fsm.set_mode(settings.options.fsm);
        self.fsm.force(RingState::Uninitialized);

        if !self.regs.detect()? {
            warn!("no EIP-202 command ring at {:#x}", self.regs.base());
            return Err(RingError::UnsupportedFeature("command ring not detected"));
        }
        if settings.atp_to_token {
            return Err(RingError::UnsupportedFeature("ATP-to-token mode"));
        }

        let p = &settings.params;
        if p.dma_address_mode == DmaAddressMode::ExtendedAddress {
            return Err(RingError::UnsupportedFeature("extended DMA addressing"));
        }

        let layout = p.dma_address_mode.layout();
        let in_words = self.tokens.input_token_word_count();
        let offs = p.desc_offs_words as usize;
        let size = p.desc_size_words as usize;
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

        let fifo = StatReg::fifo_words(self.regs.read(Reg::Stat)?) as usize;
        if size > layout.command_control_words() + in_words || size > fifo {
            return Err(RingError::Argument("descriptor size too large"));
        }
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
        if in_words < INPUT_TOKEN_PREFIX_WORDS {
            return Err(RingError::Argument("input token shorter than its prefix"));
        }
        if offs < layout.command_control_words() {
            return Err(RingError::Argument("descriptor offset below the header size"));
        }

        let anti_race = AntiRace::new(settings.options.anti_race);
        if anti_race.reserves_application_id()
            && size <= layout.command_control_words() + INPUT_TOKEN_APP_ID_WORD
        {
            return Err(RingError::Argument(
                "application-id marking needs the token prefix inside the descriptor",
            ));
        }

        self.anti_race = anti_race;
        self.atp = settings.atp;
        self.input_token_words = in_words;
        self.ring_size_words = ring;
        self.codec = DescriptorCodec {
            layout,
            stride_words: offs,
            size_words: size,
            token_offset_words: 0,
            output_token_words: 0,
        };
        self.cursor = RingCursor::separate(ring / offs, 0);
        self.cached_count = None;
        self.fatal_status = 0;

        for slot in 0..self.capacity() {
            self.codec.zero_slot(&self.dma, slot)?;
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
                atp: settings.atp,
                addr64: layout.addr64,
            }
            .to_word(),
        )?;
        self.regs.write(
            Reg::Cfg,
            RingCfg {
                fetch_words: p.fetch_size_words as u16,
                fetch_threshold_words: p.fetch_threshold_words as u16,
                ownership_words: false,
            }
            .to_word(RingKind::Command),
        )?;
        self.regs.write(
            Reg::DmaCfg,
            p.dma_cfg(RingKind::Command).to_word(RingKind::Command),
        )?;
        let thresh = if p.irq_threshold > 0 {
            Thresh {
                threshold: p.irq_threshold * p.desc_offs_words,
                packet_mode: false,
                timeout: p.irq_timeout,
            }
            .to_word(RingKind::Command)
        } else {
            Reg::Thresh.default_value(RingKind::Command)
        };
        self.regs.write(Reg::Thresh, thresh)?;

        self.fsm.set_state(RingState::Initialized)?;
        debug!(
            "command ring initialized: {} slots, stride {offs}, size {size}, {:?}, {:?}",
            self.capacity(),
            p.dma_address_mode,
            self.anti_race.mode()
        );
        Ok(())
    }

    /// Forget all software state and put the ring registers back to their
    /// reset values.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn reset(&mut self) -> Result<()> {
        self.fsm.force(RingState::Unknown);
        self.fsm.set_state(RingState::Uninitialized)?;

        self.cursor = RingCursor::separate(0, 0);
        self.codec = DescriptorCodec::default();
        self.ring_size_words = 0;
        self.cached_count = None;
        self.fatal_status = 0;
        self.handoff.take();

        self.regs.write(Reg::Count, CountReg::encode(0, true))?;
        for reg in [
            Reg::Pointer,
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
        self.regs.write(Reg::Stat, CdrIrq::all().bits())?;

        debug!("command ring {:#x} reset", self.regs.base());
        Ok(())
    }

    /// Descriptors pending for the engine, see [`fill_slots`] for the
    /// convention. The COUNT value read here is reused by the next `put`.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn fill_level(&mut self) -> Result<usize> {
        let words = CountReg::decode(self.regs.read(Reg::Count)?);
        self.cached_count = Some(words);
        self.fsm
            .set_state(RingState::for_fill(words as usize, self.ring_size_words))?;
        Ok(fill_slots(
            words as usize,
            self.ring_size_words,
            self.codec.stride_words,
        ))
    }

    /// Hand a batch of descriptors to the engine.
    ///
    /// Accepts the longest prefix that fits the free slots and a single
    /// COUNT write. Nothing is written when the batch fails validation.
    /// With the application-id mark active the caller's application id is
    /// replaced by the mark.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn put(&mut self, descs: &[CommandDescriptor<'_>]) -> Result<PutOutcome> {
        self.check_operational()?;

        let words = match self.cached_count.take() {
            Some(w) => w,
            None => CountReg::decode(self.regs.read(Reg::Count)?),
        } as usize;

        let stride = self.codec.stride_words;
        if words >= self.ring_size_words {
            self.fsm.set_state(RingState::Full)?;
            return Ok(PutOutcome {
                accepted: 0,
                fill_level: self.capacity(),
            });
        }

        let free = (self.ring_size_words - words) / stride;
        let request = free
            .min(descs.len())
            .min(COUNT_FIELD_MAX_WORDS / stride);
        let batch = descs.get(..request).unwrap_or(descs);
        for d in batch {
            self.check_command(d)?;
        }

        let mut writer = CommandWriter {
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

        let after = words + accepted * stride;
        self.fsm
            .set_state(RingState::for_fill(after, self.ring_size_words))?;
        let fill_level = fill_slots(after, self.ring_size_words, stride);
        trace!(
            "cdr put {accepted}/{} descriptors, fill level {fill_level}",
            descs.len()
        );

        Ok(PutOutcome {
            accepted,
            fill_level,
        })
    }

    /// Interrupt when at most `threshold` descriptors are pending, or after
    /// `timeout` * 256 engine cycles without progress. 0 disables the timeout.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn enable_fill_level_low_irq(&mut self, threshold: usize, timeout: u8) -> Result<()> {
        self.check_operational()?;
        let words = threshold
            .checked_mul(self.codec.stride_words)
            .filter(|&w| w <= self.ring_size_words)
            .ok_or(RingError::Argument("interrupt threshold beyond the ring"))?;

        self.regs.write(
            Reg::Thresh,
            Thresh {
                threshold: words as u32,
                packet_mode: false,
                timeout,
            }
            .to_word(RingKind::Command),
        )?;
        debug!("command ring fill level irq at {threshold} descriptors, timeout {timeout}");
        Ok(())
    }

    /// Disable the threshold and timeout interrupts and acknowledge every
    /// pending interrupt.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn clear_and_disable_irq(&mut self) -> Result<()> {
        self.regs.write_default(Reg::Thresh)?;
        self.regs.write(Reg::Stat, CdrIrq::all().bits())?;
        self.handoff.take();
        Ok(())
    }

    /// Snapshot of STAT and the counters, merged with interrupts latched by
    /// [`service_interrupt`](Self::service_interrupt).
    ///
    /// A DMA error moves the ring to [`RingState::FatalError`] and is
    /// returned as [`RingError::Fatal`].
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn status(&mut self) -> Result<CdrStatus> {
        let stat = self.regs.read(Reg::Stat)?;
        let count = self.regs.read(Reg::Count)?;
        let (processed_words, processed_packets) =
            ProcCountReg::decode(self.regs.read(Reg::ProcCount)?);

        let irq = CdrIrq::from_bits_truncate(stat | self.handoff.take());
        if irq.contains(CdrIrq::DMA_ERROR) {
            self.enter_fatal(irq.bits());
            return Err(RingError::Fatal { status: irq.bits() });
        }

        Ok(CdrStatus {
            irq,
            fifo_words: StatReg::fifo_words(stat),
            prepared_words: CountReg::decode(count),
            processed_words,
            processed_packets,
        })
    }

    /// Acknowledge pending interrupts from interrupt context.
    pub fn service_interrupt(&self) -> Result<u32> {
        service_interrupt(&self.regs, &self.handoff)
    }

    /// Handle for an interrupt handler running apart from the ring.
    pub fn irq_line(&self) -> IrqLine<P>
    where
        P: Clone,
    {
        IrqLine::new(self.regs.clone(), self.handoff.clone())
    }

    /// The hand-off cell shared with [`IrqLine`]s of this ring.
    pub fn irq_handoff(&self) -> Arc<IrqHandoff> {
        self.handoff.clone()
    }

    /// Host interface revision, after checking the EIP-202 signature.
    pub fn version(&self) -> Result<HiaVersion> {
        let v = self.regs.read(Reg::Version)?;
        HiaVersion::from_word(v).ok_or_else(|| {
            warn!("EIP-202 signature mismatch, VERSION {v:#010x}");
            RingError::UnsupportedFeature("EIP-202 signature mismatch")
        })
    }

    /// Capabilities of the host interface.
    pub fn options(&self) -> Result<HiaOptions> {
        self.version()?;
        Ok(HiaOptions::from_word(self.regs.read(Reg::Options)?))
    }

    pub fn dump(&self) -> RingDump {
        RingDump {
            state: self.fsm.state(),
            cursor: self.cursor.dump(),
            ring_size_words: self.ring_size_words,
            desc_size_words: self.codec.size_words,
            desc_offs_words: self.codec.stride_words,
            cached_count_words: self.cached_count,
            packet_open: false,
        }
    }

    /// Control word for a command descriptor.
    pub fn make_control_word(control: CommandControl) -> u32 {
        control.to_word()
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

    fn check_command(&self, d: &CommandDescriptor<'_>) -> Result<()> {
        let c = &d.control;
        if c.segment_bytes > SEGMENT_BYTES_MAX {
            return Err(RingError::Argument("segment byte count exceeds 20 bits"));
        }
        if c.force_engine && c.engine_id > ENGINE_ID_MAX {
            return Err(RingError::Argument("engine id exceeds 5 bits"));
        }
        if d.token_addr.is_some() && !self.atp {
            return Err(RingError::Argument("token pointer without ATP mode"));
        }

        let inline = c.first && d.token_addr.is_none();
        if !self.codec.layout.addr64 {
            let wide = |a: u64| a > u32::MAX as u64;
            if wide(d.src_addr)
                || d.token_addr.is_some_and(wide)
                || (inline && wide(d.context_addr))
            {
                return Err(RingError::Argument("address above 4 GiB in 32-bit mode"));
            }
        }

        if inline {
            let words = INPUT_TOKEN_PREFIX_WORDS + d.token.len();
            if words > self.input_token_words || words > self.codec.inline_token_capacity() {
                return Err(RingError::Argument("input token does not fit"));
            }
        } else if c.first && self.anti_race.reserves_application_id() {
            return Err(RingError::Argument(
                "application-id marking needs an inline token",
            ));
        }

        Ok(())
    }

    fn enter_fatal(&mut self, status: u32) {
        error!(
            "command ring {:#x} DMA error (status {status:#04x}), reset required",
            self.regs.base()
        );
        self.fatal_status = status;
        self.cached_count = None;
        self.fsm.force(RingState::FatalError);
    }
}

struct CommandWriter<'a, 'd, D> {
    dma: &'a D,
    codec: &'a DescriptorCodec,
    anti_race: &'a AntiRace,
    descs: &'a [CommandDescriptor<'d>],
}

impl<D: DmaRegion> SlotWriter for CommandWriter<'_, '_, D> {
    fn write_slots(&mut self, index: usize, count: usize, skip: usize) -> Result<usize> {
        let descs = self
            .descs
            .get(skip..skip + count)
            .ok_or(RingError::Argument("descriptor batch shorter than requested"))?;

        for (i, d) in descs.iter().enumerate() {
            let app_word = self.anti_race.tag_application_word(d.application_word());
            self.codec.encode_command(self.dma, index + i, d, app_word)?;
        }

        let offset = self.codec.slot_offset(index);
        self.dma
            .sync_for_device(offset, self.codec.slot_offset(count))
            .map_err(|_| RingError::DmaAccess(offset))?;
        Ok(count)
    }
}
