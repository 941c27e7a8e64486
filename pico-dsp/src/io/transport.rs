//! I²S transport channels.
//!
//! A channel is split in two handles over one [`ChannelStorage`]:
//!
//! ```text
//!             foreground                      DMA interrupt
//!   ┌──────────────────────┐  ring  ┌───────────────────────────┐
//!   │ TransportChannel     │◄──────►│ TransferService           │
//!   │  read / write        │        │  service(&mut unit)       │
//!   │  try_completion  ◄───┼─handoff┤  callback(&TransferEvent) │
//!   └──────────────────────┘        └───────────────────────────┘
//! ```
//!
//! The service only moves whole frames and converts between ring words and
//! FIFO words with the channel's [`SlotLayout`]. An output unit the ring
//! cannot fill is padded with the silence word; an input unit the ring
//! cannot hold loses its newest frames. Both are counted in
//! [`TransferStats`].
//!
//! [`TransportChannel::end`] stops the engine, disables the unit and gives
//! its claim back to the registry.
//!
//! The completion callback runs in interrupt context. It must not block,
//! allocate or call the blocking read/write of any channel.

use core::sync::atomic::{AtomicU32, Ordering};

use super::dma::{TransferEngine, TransferRequest};
use super::frame::{Frame, SlotLayout, FRAME_WORDS};
use super::handoff::Handoff;
use super::ring::AudioRingBuffer;
use crate::error::PipelineError;
use crate::sequencer::program::{I2S_IN, I2S_OUT};
use crate::sequencer::{
    ClockDivider, CoreLock, InstructionMemory, SequencerClaim, SequencerControl, SequencerHandle,
    UnitRole, UnitSetup,
};
use crate::sync::ClockSynchronizer;

/// Which way samples flow through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Capture: hardware produces, the loop consumes.
    Input,
    /// Playback: the loop produces, hardware consumes.
    Output,
}

/// Static description of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub direction: Direction,
    /// BCLK pin; LRCK is the next pin.
    pub clock_pin: u8,
    pub data_pin: u8,
    /// Slot width on the wire.
    pub bits_per_sample: u8,
    pub sample_rate: u32,
    pub system_clock_hz: u32,
    /// Words per DMA transfer unit.
    pub unit_words: usize,
    /// Slot-width sample sent when the loop falls behind.
    pub silence_sample: i32,
}

impl ChannelConfig {
    /// Check the config against a ring of `capacity` words.
    pub fn validate(&self, capacity: usize) -> Result<(), PipelineError> {
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(PipelineError::InvalidConfig("bit depth must be 8, 16, 24 or 32"));
        }
        if self.sample_rate == 0 {
            return Err(PipelineError::InvalidConfig("zero sample rate"));
        }
        let layout = self.layout();
        if self.unit_words == 0 || self.unit_words % layout.words_per_frame() != 0 {
            return Err(PipelineError::InvalidConfig("transfer unit must be whole frames"));
        }
        if self.unit_words * layout.slots_per_word() > capacity {
            return Err(PipelineError::InvalidConfig("transfer unit larger than ring"));
        }
        Ok(())
    }

    pub fn layout(&self) -> SlotLayout {
        SlotLayout::new(self.bits_per_sample)
    }

    /// The FIFO word for a silent frame: the silence sample in every slot
    /// the word carries.
    pub fn silence_word(&self) -> u32 {
        let layout = self.layout();
        let slot = layout.align(self.silence_sample);
        let mut words = [0; FRAME_WORDS];
        layout.pack([slot, slot], &mut words);
        words[0]
    }

    pub fn role(&self) -> UnitRole {
        let (data_pin, clock_pin, bits) = (self.data_pin, self.clock_pin, self.bits_per_sample);
        match self.direction {
            Direction::Output => UnitRole::Transmit {
                data_pin,
                clock_pin,
                bits,
            },
            Direction::Input => UnitRole::Receive {
                data_pin,
                clock_pin,
                bits,
            },
        }
    }
}

/// One completed transfer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferEvent {
    pub direction: Direction,
    /// Sequence number of the unit, starting at 1.
    pub unit: u32,
    /// Ring words (samples) moved between the unit and the ring.
    pub words: usize,
    /// Samples replaced by silence (output) or dropped (input).
    pub substituted: usize,
}

/// Interrupt-context completion hook. Must be non-blocking and bounded.
pub type CompletionCallback = fn(&TransferEvent);

/// Counters kept by the service side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferStats {
    pub units: u32,
    /// Output samples replaced by silence.
    pub silence_words: u32,
    /// Input samples dropped on a full ring.
    pub dropped_words: u32,
}

struct SharedStats {
    units: AtomicU32,
    silence_words: AtomicU32,
    dropped_words: AtomicU32,
}

impl SharedStats {
    const fn new() -> Self {
        SharedStats {
            units: AtomicU32::new(0),
            silence_words: AtomicU32::new(0),
            dropped_words: AtomicU32::new(0),
        }
    }

    /// Single writer: load + store, no read-modify-write needed.
    fn bump(counter: &AtomicU32, by: u32) {
        counter.store(counter.load(Ordering::Relaxed).wrapping_add(by), Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransferStats {
        TransferStats {
            units: self.units.load(Ordering::Relaxed),
            silence_words: self.silence_words.load(Ordering::Relaxed),
            dropped_words: self.dropped_words.load(Ordering::Relaxed),
        }
    }
}

/// Backing memory for one channel. Lives in a `static`.
pub struct ChannelStorage<const N: usize> {
    ring: AudioRingBuffer<N>,
    completions: Handoff<TransferEvent>,
    stats: SharedStats,
}

impl<const N: usize> ChannelStorage<N> {
    pub const fn new() -> Self {
        ChannelStorage {
            ring: AudioRingBuffer::new(),
            completions: Handoff::new(),
            stats: SharedStats::new(),
        }
    }

    pub fn ring(&self) -> &AudioRingBuffer<N> {
        &self.ring
    }
}

impl<const N: usize> Default for ChannelStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Foreground handle of a streaming channel.
pub struct TransportChannel<'a, const N: usize> {
    storage: &'a ChannelStorage<N>,
    config: ChannelConfig,
    claim: SequencerClaim,
}

impl<'a, const N: usize> TransportChannel<'a, N> {
    /// Claim and configure a sequencer unit for `config`, enroll it for the
    /// synchronized start and arm the transfer engine.
    ///
    /// No samples move until `clocks` releases the start gate.
    pub fn begin<L, M, C, E>(
        storage: &'a ChannelStorage<N>,
        config: &ChannelConfig,
        sequencer: &SequencerHandle<'_, L, M>,
        clocks: &mut ClockSynchronizer<C>,
        engine: &mut E,
        callback: Option<CompletionCallback>,
    ) -> Result<(Self, TransferService<'a, N>), PipelineError>
    where
        L: CoreLock,
        M: InstructionMemory,
        C: SequencerControl,
        E: TransferEngine,
    {
        config.validate(N)?;
        let divider = ClockDivider::for_bit_clock(
            config.system_clock_hz,
            config.sample_rate,
            config.bits_per_sample,
        )
        .ok_or(PipelineError::InvalidConfig("bit clock divider out of range"))?;
        let program = match config.direction {
            Direction::Output => I2S_OUT,
            Direction::Input => I2S_IN,
        };

        let claim = sequencer.claim(&program)?;
        clocks.configure(
            &claim,
            &UnitSetup {
                role: config.role(),
                program,
                divider,
            },
        )?;

        let request = TransferRequest {
            direction: config.direction,
            trigger: claim.trigger(config.direction),
            fifo: claim.fifo_address(config.direction),
            unit_words: config.unit_words,
            layout: config.layout(),
            silence: config.silence_word(),
        };
        let service = TransferService::begin(storage, &request, engine, callback)?;
        log::info!(
            "{:?} channel on {:?} unit {}: {} Hz, {} bit",
            config.direction,
            claim.block(),
            claim.unit(),
            config.sample_rate,
            config.bits_per_sample
        );

        Ok((
            TransportChannel {
                storage,
                config: *config,
                claim,
            },
            service,
        ))
    }

    /// Stop streaming: abort the engine, disable and withdraw the unit,
    /// discard unread words and release the claim.
    ///
    /// `service` must be the interrupt handle returned with this channel by
    /// [`begin`](Self::begin); the interrupt must no longer call it.
    pub fn end<L, M, C, E>(
        self,
        service: TransferService<'a, N>,
        sequencer: &SequencerHandle<'_, L, M>,
        clocks: &mut ClockSynchronizer<C>,
        engine: &mut E,
    ) -> Result<(), PipelineError>
    where
        L: CoreLock,
        M: InstructionMemory,
        C: SequencerControl,
        E: TransferEngine,
    {
        if !core::ptr::eq(self.storage, service.storage) {
            return Err(PipelineError::InvalidConfig("service belongs to another channel"));
        }
        let direction = self.config.direction;
        engine.stop(direction);
        clocks.withdraw(&self.claim);

        // Both handles are gone, so draining from here cannot race.
        while self.storage.ring.try_pop().is_some() {}
        let _ = self.storage.completions.take();

        log::info!(
            "{:?} channel on {:?} unit {} ended",
            direction,
            self.claim.block(),
            self.claim.unit()
        );
        sequencer.release(self.claim)
    }

    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn claim(&self) -> &SequencerClaim {
        &self.claim
    }

    /// Queue one word for output. Non-blocking writes report whether the
    /// word fit. Always `false` on an input channel.
    pub fn write(&self, word: u32, blocking: bool) -> bool {
        self.config.direction == Direction::Output && self.storage.ring.write(word, blocking)
    }

    /// Take one captured word. Always `None` on an output channel.
    pub fn read(&self, blocking: bool) -> Option<u32> {
        if self.config.direction != Direction::Input {
            return None;
        }
        self.storage.ring.read(blocking)
    }

    /// Queue a whole frame. A non-blocking write stores both words or
    /// neither.
    pub fn write_frame(&self, frame: Frame, blocking: bool) -> bool {
        if self.config.direction != Direction::Output {
            return false;
        }
        let ring = &self.storage.ring;
        let [left, right] = frame.to_words();
        if blocking {
            ring.push(left);
            ring.push(right);
            true
        } else {
            ring.push_frames(&[left, right], FRAME_WORDS) == FRAME_WORDS
        }
    }

    /// Take a whole frame. A non-blocking read takes both words or
    /// neither.
    pub fn read_frame(&self, blocking: bool) -> Option<Frame> {
        if self.config.direction != Direction::Input {
            return None;
        }
        let ring = &self.storage.ring;
        if blocking {
            let left = ring.pop();
            let right = ring.pop();
            Some(Frame::from_words([left, right]))
        } else {
            let mut words = [0; FRAME_WORDS];
            (ring.pop_frames(&mut words, FRAME_WORDS) == FRAME_WORDS)
                .then(|| Frame::from_words(words))
        }
    }

    /// The oldest completion event not yet taken.
    pub fn try_completion(&self) -> Option<TransferEvent> {
        self.storage.completions.take()
    }

    pub fn stats(&self) -> TransferStats {
        self.storage.stats.snapshot()
    }
}

/// Interrupt-side handle of a streaming channel.
pub struct TransferService<'a, const N: usize> {
    storage: &'a ChannelStorage<N>,
    direction: Direction,
    layout: SlotLayout,
    silence: u32,
    unit_words: usize,
    callback: Option<CompletionCallback>,
    units: u32,
}

impl<'a, const N: usize> TransferService<'a, N> {
    /// Bind `storage` to the engine and start continuous transfers paced by
    /// `request.trigger`.
    pub fn begin<E: TransferEngine>(
        storage: &'a ChannelStorage<N>,
        request: &TransferRequest,
        engine: &mut E,
        callback: Option<CompletionCallback>,
    ) -> Result<Self, PipelineError> {
        let direction = request.direction;
        engine.start(request).map_err(|e| {
            log::error!("{:?} transfer engine refused to start: {:?}", direction, e);
            PipelineError::TransferInitFailure { direction }
        })?;
        Ok(TransferService {
            storage,
            direction,
            layout: request.layout,
            silence: request.silence,
            unit_words: request.unit_words,
            callback,
            units: 0,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn unit_words(&self) -> usize {
        self.unit_words
    }

    /// Handle one completed transfer unit.
    ///
    /// Output: refill `unit` from the ring for the next transfer. Input:
    /// move the captured `unit` into the ring. Call from the transfer
    /// complete interrupt only.
    pub fn service(&mut self, unit: &mut [u32]) -> TransferEvent {
        let ring = &self.storage.ring;
        let stats = &self.storage.stats;
        let per_frame = self.layout.words_per_frame();
        let capacity = unit.len() / per_frame * FRAME_WORDS;

        let mut words = 0;
        match self.direction {
            Direction::Output => {
                let mut frame = [0; FRAME_WORDS];
                let mut filled = 0;
                for chunk in unit.chunks_exact_mut(per_frame) {
                    if ring.pop_frames(&mut frame, FRAME_WORDS) != FRAME_WORDS {
                        break;
                    }
                    self.layout.pack(frame, chunk);
                    filled += per_frame;
                    words += FRAME_WORDS;
                }
                unit[filled..].fill(self.silence);
            }
            Direction::Input => {
                // Stops at the first frame that does not fit: the newest
                // frames are the ones dropped.
                for chunk in unit.chunks_exact(per_frame) {
                    let frame = self.layout.unpack(chunk);
                    if ring.push_frames(&frame, FRAME_WORDS) != FRAME_WORDS {
                        break;
                    }
                    words += FRAME_WORDS;
                }
            }
        }
        let substituted = capacity - words;

        self.units = self.units.wrapping_add(1);
        SharedStats::bump(&stats.units, 1);
        if substituted > 0 {
            let counter = match self.direction {
                Direction::Output => &stats.silence_words,
                Direction::Input => &stats.dropped_words,
            };
            SharedStats::bump(counter, substituted as u32);
        }

        let event = TransferEvent {
            direction: self.direction,
            unit: self.units,
            words,
            substituted,
        };
        // A pending event the foreground has not taken yet is kept.
        self.storage.completions.post(event);
        if let Some(callback) = self.callback {
            callback(&event);
        }
        event
    }
}
