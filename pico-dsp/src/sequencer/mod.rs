//! Sequencer (PIO state machine) arbitration.
//!
//! The RP2040 has two PIO blocks, each with four state machines ("units")
//! sharing 32 words of instruction memory. Every transport channel and the
//! master clock needs one unit, and units running the same program on the
//! same block share one copy of its instructions.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`SequencerRegistry`] | Process-wide claim broker and load-state table |
//! | [`CoreLock`] | Cross-core exclusive lock the registry runs under |
//! | [`SequencerProgram`] | Assembled program + relocation on load |
//! | [`SequencerControl`] | Hardware seam: unit setup and the start gate |
//!
//! A [`SequencerClaim`] is granted once and never returned; it knows the
//! DMA request line and FIFO address its unit exposes.

pub mod control;
pub mod lock;
pub mod program;
pub mod registry;

pub use control::{ClockDivider, SequencerControl, UnitRole, UnitSetup};
#[cfg(target_has_atomic = "8")]
pub use lock::AtomicCoreLock;
pub use lock::{CoreLock, CoreMutexGuard};
pub use program::SequencerProgram;
pub use registry::{BlockStatus, InstructionMemory, SequencerHandle, SequencerRegistry};

use crate::io::Direction;

/// Number of PIO blocks.
pub const BLOCK_COUNT: usize = 2;

/// State machines per PIO block.
pub const UNITS_PER_BLOCK: usize = 4;

/// Instruction memory words per PIO block.
pub const INSTRUCTION_MEMORY_WORDS: usize = 32;

/// Register base of PIO0 (PIO1 follows at +1 MiB).
pub const PIO0_BASE: u32 = 0x5020_0000;
const PIO_BLOCK_STRIDE: u32 = 0x0010_0000;
const TXF0_OFFSET: u32 = 0x010;
const RXF0_OFFSET: u32 = 0x020;

/// One of the two PIO blocks. Scanned in declaration order when claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockId {
    Pio0,
    Pio1,
}

impl BlockId {
    /// Claim priority order.
    pub const ALL: [BlockId; BLOCK_COUNT] = [BlockId::Pio0, BlockId::Pio1];

    pub const fn index(self) -> usize {
        match self {
            BlockId::Pio0 => 0,
            BlockId::Pio1 => 1,
        }
    }

    pub const fn base_address(self) -> u32 {
        PIO0_BASE + self.index() as u32 * PIO_BLOCK_STRIDE
    }
}

/// An execution context able to take the sequencer lock (a CPU core).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoreId(pub u8);

/// A specific state machine on a specific block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnitId {
    pub block: BlockId,
    pub unit: u8,
}

/// DMA request line number (`DREQ_PIOx_TXn` / `DREQ_PIOx_RXn`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferTrigger(pub u8);

/// Bus address of a state machine FIFO register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoAddress(pub u32);

/// Exclusive ownership of one unit, plus where its program was loaded.
///
/// Deliberately not `Clone`: there is exactly one claim per unit.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequencerClaim {
    block: BlockId,
    unit: u8,
    offset: u8,
}

impl SequencerClaim {
    pub(crate) fn new(block: BlockId, unit: u8, offset: u8) -> Self {
        SequencerClaim {
            block,
            unit,
            offset,
        }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    /// Instruction memory offset of the claimed program.
    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn id(&self) -> UnitId {
        UnitId {
            block: self.block,
            unit: self.unit,
        }
    }

    /// DMA request line paced by this unit's FIFO in `direction`.
    pub fn trigger(&self, direction: Direction) -> TransferTrigger {
        let rx = match direction {
            Direction::Output => 0,
            Direction::Input => UNITS_PER_BLOCK as u8,
        };
        TransferTrigger(self.block.index() as u8 * 2 * UNITS_PER_BLOCK as u8 + rx + self.unit)
    }

    /// TX FIFO for output, RX FIFO for input.
    pub fn fifo_address(&self, direction: Direction) -> FifoAddress {
        let fifo = match direction {
            Direction::Output => TXF0_OFFSET,
            Direction::Input => RXF0_OFFSET,
        };
        FifoAddress(self.block.base_address() + fifo + 4 * self.unit as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_follow_the_dreq_table() {
        let c = SequencerClaim::new(BlockId::Pio0, 0, 0);
        assert_eq!(c.trigger(Direction::Output), TransferTrigger(0));
        assert_eq!(c.trigger(Direction::Input), TransferTrigger(4));

        let c = SequencerClaim::new(BlockId::Pio1, 3, 0);
        assert_eq!(c.trigger(Direction::Output), TransferTrigger(11));
        assert_eq!(c.trigger(Direction::Input), TransferTrigger(15));
    }

    #[test]
    fn fifo_addresses() {
        let c = SequencerClaim::new(BlockId::Pio0, 2, 0);
        assert_eq!(c.fifo_address(Direction::Output), FifoAddress(0x5020_0018));
        assert_eq!(c.fifo_address(Direction::Input), FifoAddress(0x5020_0028));

        let c = SequencerClaim::new(BlockId::Pio1, 1, 0);
        assert_eq!(c.fifo_address(Direction::Output), FifoAddress(0x5030_0014));
    }
}
