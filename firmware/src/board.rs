//! RP2040 implementations of the pico-dsp hardware seams.
//!
//! Plain volatile register access. Register offsets follow the RP2040
//! datasheet (§2.3.1 SIO, §2.5 DMA, §3.7 PIO, §2.14 resets, §2.19 GPIO).

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU8, Ordering};

use pico_dsp::io::{Direction, DmaHalf, TransferEngine, TransferRequest, TransferService};
use pico_dsp::sequencer::program::{instr, START_GATE_IRQ};
use pico_dsp::sequencer::{
    BlockId, CoreId, CoreLock, InstructionMemory, SequencerClaim, SequencerControl, UnitRole,
    UnitSetup,
};

/// Atomic set / clear register aliases.
const SET_ALIAS: usize = 0x2000;
const CLR_ALIAS: usize = 0x3000;

#[inline(always)]
fn read(address: usize) -> u32 {
    // SAFETY: only called with peripheral register addresses below.
    unsafe { read_volatile(address as *const u32) }
}

#[inline(always)]
fn write(address: usize, value: u32) {
    // SAFETY: only called with peripheral register addresses below.
    unsafe { write_volatile(address as *mut u32, value) }
}

// ── Resets ──────────────────────────────────────────────────────────

const RESETS_BASE: usize = 0x4000_c000;
const RESET_DONE: usize = 0x08;
const RESET_DMA: u32 = 1 << 2;
const RESET_PIO0: u32 = 1 << 10;
const RESET_PIO1: u32 = 1 << 11;

/// Cycle DMA and both PIO blocks through reset and wait until they are
/// back.
pub fn reset_audio_peripherals() {
    let mask = RESET_DMA | RESET_PIO0 | RESET_PIO1;
    write(RESETS_BASE + SET_ALIAS, mask);
    write(RESETS_BASE + CLR_ALIAS, mask);
    while read(RESETS_BASE + RESET_DONE) & mask != mask {
        core::hint::spin_loop();
    }
}

// ── GPIO ────────────────────────────────────────────────────────────

const IO_BANK0_BASE: usize = 0x4001_4000;
const FUNCSEL_PIO0: u32 = 6;
const FUNCSEL_PIO1: u32 = 7;

fn route_pin_to(block: BlockId, pin: u8) {
    let funcsel = match block {
        BlockId::Pio0 => FUNCSEL_PIO0,
        BlockId::Pio1 => FUNCSEL_PIO1,
    };
    write(IO_BANK0_BASE + 0x004 + 8 * pin as usize, funcsel);
}

// ── SIO spinlock ────────────────────────────────────────────────────

const SIO_BASE: usize = 0xd000_0000;
const SIO_CPUID: usize = 0x000;
const SIO_SPINLOCK0: usize = 0x100;
/// Spinlock 31 belongs to the HAL's critical-section implementation.
const SEQUENCER_SPINLOCK: usize = 14;
const NO_OWNER: u8 = u8::MAX;

pub fn current_core() -> CoreId {
    CoreId(read(SIO_BASE + SIO_CPUID) as u8)
}

/// Sequencer lock on an SIO hardware spinlock, shared by both cores.
pub struct SioCoreLock {
    owner: AtomicU8,
}

impl SioCoreLock {
    pub const fn new() -> Self {
        SioCoreLock {
            owner: AtomicU8::new(NO_OWNER),
        }
    }

    fn register() -> usize {
        SIO_BASE + SIO_SPINLOCK0 + 4 * SEQUENCER_SPINLOCK
    }
}

impl CoreLock for SioCoreLock {
    fn try_lock(&self, core: CoreId) -> Result<(), Option<CoreId>> {
        // Reading claims the spinlock; zero means someone else holds it.
        if read(Self::register()) != 0 {
            self.owner.store(core.0, Ordering::Release);
            return Ok(());
        }
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => Err(None),
            owner => Err(Some(CoreId(owner))),
        }
    }

    fn unlock(&self) {
        self.owner.store(NO_OWNER, Ordering::Release);
        write(Self::register(), 1);
    }
}

// ── PIO ─────────────────────────────────────────────────────────────

const PIO_CTRL: usize = 0x000;
const PIO_IRQ: usize = 0x030;
const PIO_IRQ_FORCE: usize = 0x034;
const PIO_INSTR_MEM0: usize = 0x048;
const PIO_SM0: usize = 0x0c8;
const PIO_SM_STRIDE: usize = 0x18;

const SM_CLKDIV: usize = 0x00;
const SM_EXECCTRL: usize = 0x04;
const SM_SHIFTCTRL: usize = 0x08;
const SM_INSTR: usize = 0x10;
const SM_PINCTRL: usize = 0x14;

const CTRL_SM_RESTART: u32 = 4;
const CTRL_CLKDIV_RESTART: u32 = 8;

const EXECCTRL_WRAP_TOP: u32 = 12;
const EXECCTRL_WRAP_BOTTOM: u32 = 7;

const SHIFTCTRL_FJOIN_RX: u32 = 1 << 31;
const SHIFTCTRL_FJOIN_TX: u32 = 1 << 30;
const SHIFTCTRL_PULL_THRESH: u32 = 25;
const SHIFTCTRL_PUSH_THRESH: u32 = 20;
const SHIFTCTRL_AUTOPULL: u32 = 1 << 17;
const SHIFTCTRL_AUTOPUSH: u32 = 1 << 16;

const PINCTRL_SIDESET_COUNT: u32 = 29;
const PINCTRL_SET_COUNT: u32 = 26;
const PINCTRL_OUT_COUNT: u32 = 20;
const PINCTRL_IN_BASE: u32 = 15;
const PINCTRL_SIDESET_BASE: u32 = 10;
const PINCTRL_SET_BASE: u32 = 5;

fn pio_base(block: BlockId) -> usize {
    block.base_address() as usize
}

fn sm_base(block: BlockId, unit: u8) -> usize {
    pio_base(block) + PIO_SM0 + PIO_SM_STRIDE * unit as usize
}

/// Writes program words into PIO instruction memory.
pub struct PioMemory;

impl InstructionMemory for PioMemory {
    fn write_instruction(&mut self, block: BlockId, address: u8, instruction: u16) {
        write(
            pio_base(block) + PIO_INSTR_MEM0 + 4 * address as usize,
            instruction as u32,
        );
    }
}

/// State machine configuration and the IRQ 7 start gate.
pub struct PioControl;

impl PioControl {
    fn exec(sm: usize, instruction: u16) {
        write(sm + SM_INSTR, instruction as u32);
    }

    /// Drive `count` pins from `base` as outputs per `dirs`, using `set`.
    fn set_pindirs(sm: usize, base: u8, count: u32, dirs: u8) {
        write(
            sm + SM_PINCTRL,
            count << PINCTRL_SET_COUNT | (base as u32) << PINCTRL_SET_BASE,
        );
        Self::exec(sm, instr::set_pindirs(dirs));
    }
}

impl SequencerControl for PioControl {
    fn hold_start_gate(&mut self) {
        for block in BlockId::ALL {
            write(pio_base(block) + PIO_IRQ_FORCE, 1 << START_GATE_IRQ);
        }
    }

    fn configure(&mut self, claim: &SequencerClaim, setup: &UnitSetup) {
        let block = claim.block();
        let sm = sm_base(block, claim.unit());
        let offset = claim.offset() as u32;
        let program = &setup.program;

        write(sm + SM_CLKDIV, setup.divider.register_value());
        write(
            sm + SM_EXECCTRL,
            (offset + program.wrap as u32) << EXECCTRL_WRAP_TOP
                | (offset + program.wrap_target as u32) << EXECCTRL_WRAP_BOTTOM,
        );

        let threshold = (setup.shift_threshold() as u32) & 0x1f;
        let (shiftctrl, pinctrl) = match setup.role {
            UnitRole::Transmit {
                data_pin,
                clock_pin,
                ..
            } => {
                for pin in [data_pin, clock_pin, clock_pin + 1] {
                    route_pin_to(block, pin);
                }
                Self::set_pindirs(sm, clock_pin, 2, 0b11);
                Self::set_pindirs(sm, data_pin, 1, 0b1);
                (
                    SHIFTCTRL_FJOIN_TX | threshold << SHIFTCTRL_PULL_THRESH | SHIFTCTRL_AUTOPULL,
                    (program.side_set_bits as u32) << PINCTRL_SIDESET_COUNT
                        | (clock_pin as u32) << PINCTRL_SIDESET_BASE
                        | 1 << PINCTRL_OUT_COUNT
                        | data_pin as u32,
                )
            }
            UnitRole::Receive {
                data_pin,
                clock_pin,
                ..
            } => {
                for pin in [data_pin, clock_pin, clock_pin + 1] {
                    route_pin_to(block, pin);
                }
                Self::set_pindirs(sm, clock_pin, 2, 0b11);
                (
                    SHIFTCTRL_FJOIN_RX | threshold << SHIFTCTRL_PUSH_THRESH | SHIFTCTRL_AUTOPUSH,
                    (program.side_set_bits as u32) << PINCTRL_SIDESET_COUNT
                        | (clock_pin as u32) << PINCTRL_SIDESET_BASE
                        | (data_pin as u32) << PINCTRL_IN_BASE,
                )
            }
            UnitRole::MasterClock { pin } => {
                route_pin_to(block, pin);
                Self::set_pindirs(sm, pin, 1, 0b1);
                (
                    0,
                    1 << PINCTRL_SET_COUNT | (pin as u32) << PINCTRL_SET_BASE,
                )
            }
        };
        write(sm + SM_SHIFTCTRL, shiftctrl);
        write(sm + SM_PINCTRL, pinctrl);

        if let Some(y) = setup.y_preload() {
            Self::exec(sm, instr::set_y(y));
        }
        write(
            pio_base(block) + PIO_CTRL + SET_ALIAS,
            1 << (CTRL_SM_RESTART + claim.unit() as u32),
        );
        // Park on the gate wait at the program start.
        Self::exec(sm, instr::jmp(claim.offset()));
    }

    fn enable_in_sync(&mut self, block: BlockId, units: u8) {
        let mask = (units & 0x0f) as u32;
        write(
            pio_base(block) + PIO_CTRL + SET_ALIAS,
            mask << CTRL_CLKDIV_RESTART | mask,
        );
    }

    fn release_start_gate(&mut self) {
        for block in BlockId::ALL {
            write(pio_base(block) + PIO_IRQ, 1 << START_GATE_IRQ);
        }
    }

    fn disable(&mut self, claim: &SequencerClaim) {
        let (block, unit) = (claim.block(), claim.unit());
        let bit = 1u32 << unit;
        write(pio_base(block) + PIO_CTRL + CLR_ALIAS, bit);
        write(pio_base(block) + PIO_CTRL + SET_ALIAS, bit << CTRL_SM_RESTART);

        // Toggling a join flushes both FIFOs.
        let sm = sm_base(block, unit);
        let shiftctrl = read(sm + SM_SHIFTCTRL);
        write(sm + SM_SHIFTCTRL, shiftctrl ^ SHIFTCTRL_FJOIN_RX);
        write(sm + SM_SHIFTCTRL, shiftctrl);
        defmt::debug!("{} unit {} disabled", block, unit);
    }
}

// ── DMA ─────────────────────────────────────────────────────────────

const DMA_BASE: usize = 0x5000_0000;
const DMA_CH_STRIDE: usize = 0x40;
const CH_READ_ADDR: usize = 0x00;
const CH_WRITE_ADDR: usize = 0x04;
const CH_TRANS_COUNT: usize = 0x08;
const CH_CTRL_TRIG: usize = 0x0c;
const CH_AL1_CTRL: usize = 0x10;
const DMA_INTE0: usize = 0x404;
const DMA_INTS0: usize = 0x40c;
const DMA_CHAN_ABORT: usize = 0x444;

const CTRL_EN: u32 = 1 << 0;
const CTRL_DATA_SIZE_WORD: u32 = 2 << 2;
const CTRL_INCR_READ: u32 = 1 << 4;
const CTRL_INCR_WRITE: u32 = 1 << 5;
const CTRL_CHAIN_TO: u32 = 11;
const CTRL_TREQ_SEL: u32 = 15;
const CTRL_BUSY: u32 = 1 << 24;

fn channel(ch: usize) -> usize {
    DMA_BASE + DMA_CH_STRIDE * ch
}

/// Channels for the first and second half of each direction.
fn channels(direction: Direction) -> [usize; 2] {
    match direction {
        Direction::Output => [0, 1],
        Direction::Input => [2, 3],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum DmaError {
    /// The request's unit size does not match the buffer halves.
    UnitSize { expected: usize, requested: usize },
    /// A channel for this direction is already running.
    ChannelBusy,
}

/// Two chained DMA channels per direction, each covering one half of a
/// `[[u32; W]; 2]` buffer. Each channel raises `DMA_IRQ_0` when its half
/// completes and triggers its partner.
pub struct PingPongDma<const W: usize> {
    playback: &'static mut [[u32; W]; 2],
    capture: &'static mut [[u32; W]; 2],
}

impl<const W: usize> PingPongDma<W> {
    pub fn new(playback: &'static mut [[u32; W]; 2], capture: &'static mut [[u32; W]; 2]) -> Self {
        PingPongDma { playback, capture }
    }

    fn half(&mut self, direction: Direction, half: DmaHalf) -> &mut [u32; W] {
        match direction {
            Direction::Output => &mut self.playback[half.index()],
            Direction::Input => &mut self.capture[half.index()],
        }
    }

    /// Service every half that completed and point its channel back at it.
    pub fn on_interrupt<const N: usize>(
        &mut self,
        playback: &mut TransferService<'_, N>,
        capture: &mut TransferService<'_, N>,
    ) {
        let pending = read(DMA_BASE + DMA_INTS0);
        write(DMA_BASE + DMA_INTS0, pending);

        // Capture first so the loop sees fresh frames as early as possible.
        for direction in [Direction::Input, Direction::Output] {
            let service = match direction {
                Direction::Output => &mut *playback,
                Direction::Input => &mut *capture,
            };
            for half in [DmaHalf::First, DmaHalf::Second] {
                let ch = channels(direction)[half.index()];
                if pending & (1 << ch) == 0 {
                    continue;
                }
                let buffer = self.half(direction, half);
                service.service(buffer);
                let address = buffer.as_ptr() as u32;
                match direction {
                    Direction::Output => write(channel(ch) + CH_READ_ADDR, address),
                    Direction::Input => write(channel(ch) + CH_WRITE_ADDR, address),
                }
            }
        }
    }
}

impl<const W: usize> TransferEngine for PingPongDma<W> {
    type Error = DmaError;

    fn start(&mut self, request: &TransferRequest) -> Result<(), DmaError> {
        if request.unit_words != W {
            return Err(DmaError::UnitSize {
                expected: W,
                requested: request.unit_words,
            });
        }
        let direction = request.direction;
        let pair = channels(direction);
        if pair.iter().any(|&ch| read(channel(ch) + CH_CTRL_TRIG) & CTRL_BUSY != 0) {
            return Err(DmaError::ChannelBusy);
        }
        if direction == Direction::Output {
            self.playback.iter_mut().for_each(|h| h.fill(request.silence));
        }

        let fifo = request.fifo.0;
        let treq = request.trigger.0 as u32;
        let incr = match direction {
            Direction::Output => CTRL_INCR_READ,
            Direction::Input => CTRL_INCR_WRITE,
        };

        // Second half armed but idle, then the first half triggered.
        for half in [DmaHalf::Second, DmaHalf::First] {
            let ch = pair[half.index()];
            let partner = pair[half.other().index()] as u32;
            let buffer = self.half(direction, half).as_ptr() as u32;
            let (read_addr, write_addr) = match direction {
                Direction::Output => (buffer, fifo),
                Direction::Input => (fifo, buffer),
            };
            let base = channel(ch);
            write(base + CH_READ_ADDR, read_addr);
            write(base + CH_WRITE_ADDR, write_addr);
            write(base + CH_TRANS_COUNT, W as u32);

            let ctrl = CTRL_EN
                | CTRL_DATA_SIZE_WORD
                | incr
                | partner << CTRL_CHAIN_TO
                | treq << CTRL_TREQ_SEL;
            match half {
                DmaHalf::Second => write(base + CH_AL1_CTRL, ctrl),
                DmaHalf::First => {
                    write(DMA_BASE + DMA_INTE0 + SET_ALIAS, 1 << pair[0] | 1 << pair[1]);
                    write(base + CH_CTRL_TRIG, ctrl);
                }
            }
        }
        defmt::debug!(
            "dma {} on channels {}/{} (dreq {})",
            direction,
            pair[0],
            pair[1],
            treq
        );
        Ok(())
    }

    fn stop(&mut self, direction: Direction) {
        let pair = channels(direction);
        let mask = 1 << pair[0] | 1 << pair[1];
        write(DMA_BASE + DMA_INTE0 + CLR_ALIAS, mask);
        // Unchained first, so an abort cannot restart the partner.
        for ch in pair {
            write(channel(ch) + CH_AL1_CTRL, 0);
        }
        write(DMA_BASE + DMA_CHAN_ABORT, mask);
        while read(DMA_BASE + DMA_CHAN_ABORT) & mask != 0 {
            core::hint::spin_loop();
        }
        write(DMA_BASE + DMA_INTS0, mask);
        defmt::debug!("dma {} stopped", direction);
    }
}
