//! Startup error taxonomy.
//!
//! Every variant is fatal: the pipeline reports it once and halts. There is
//! no steady-state error path.

use crate::io::Direction;
use crate::sequencer::{BlockId, CoreId};

/// Which sequencer resource ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exhausted {
    /// Every unit on both blocks is already claimed.
    Units,
    /// The chosen block has no room left for the program's instructions.
    InstructionMemory { block: BlockId },
}

/// Errors raised while bringing the pipeline up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineError {
    /// No sequencer unit or instruction memory is available.
    #[error("sequencer resources exhausted: {0:?}")]
    ResourceExhausted(Exhausted),

    /// The sequencer lock is already held by the calling core.
    #[error("deadlock: sequencer lock already held by core {core:?}")]
    Deadlock { core: CoreId },

    /// The transfer engine refused to arm a transport.
    #[error("failed to initialize {direction:?} transport")]
    TransferInitFailure { direction: Direction },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Quantized coefficients could overflow the 64-bit accumulator.
    #[error("biquad coefficients exceed accumulator headroom")]
    CoefficientOverflow,
}
