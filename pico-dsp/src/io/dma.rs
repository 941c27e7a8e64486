//! Transfer engine seam.
//!
//! The engine streams words between a sequencer FIFO and memory in fixed
//! units, alternating between two halves of a buffer. After each unit
//! completes, the interrupt handler hands the finished half to
//! [`TransferService::service`](super::TransferService::service) and the
//! engine moves on to the other half.

use core::fmt::Debug;

use super::frame::SlotLayout;
use super::Direction;
use crate::sequencer::{FifoAddress, TransferTrigger};

/// Which half of a double buffer a transfer unit covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaHalf {
    First,
    Second,
}

impl DmaHalf {
    pub fn other(self) -> Self {
        match self {
            DmaHalf::First => DmaHalf::Second,
            DmaHalf::Second => DmaHalf::First,
        }
    }

    pub fn index(self) -> usize {
        match self {
            DmaHalf::First => 0,
            DmaHalf::Second => 1,
        }
    }
}

/// Everything an engine needs to start continuous transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferRequest {
    pub direction: Direction,
    /// DMA request line pacing the transfers.
    pub trigger: TransferTrigger,
    /// FIFO register read from (input) or written to (output).
    pub fifo: FifoAddress,
    /// FIFO words per transfer unit, one buffer half.
    pub unit_words: usize,
    /// How samples are packed into FIFO words.
    pub layout: SlotLayout,
    /// Word an output engine primes both halves with before starting.
    pub silence: u32,
}

/// Hardware that runs the continuous transfers.
pub trait TransferEngine {
    type Error: Debug;

    /// Arm and start transfers. Nothing moves until the sequencer unit
    /// raises its request line.
    fn start(&mut self, request: &TransferRequest) -> Result<(), Self::Error>;

    /// Abort the transfers of `direction` and mask their interrupts.
    fn stop(&mut self, direction: Direction);
}
