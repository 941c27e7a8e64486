//! Hardware seam for configuring and starting sequencer units.

use super::program::SequencerProgram;
use super::{BlockId, SequencerClaim};
use crate::io::SlotLayout;

/// Unit clock divider in the hardware's 16.8 fixed-point format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider {
    pub integer: u16,
    pub fraction: u8,
}

impl ClockDivider {
    /// Divider taking `source_hz` down to `target_hz`, rounded down to the
    /// nearest 1/256.
    ///
    /// `None` if the target is zero, faster than the source, or needs an
    /// integer part above 65535.
    pub fn from_frequencies(source_hz: u32, target_hz: u32) -> Option<Self> {
        if target_hz == 0 {
            return None;
        }
        let scaled = source_hz as u64 * 256 / target_hz as u64;
        let integer = scaled >> 8;
        if integer == 0 || integer > u16::MAX as u64 {
            return None;
        }
        Some(ClockDivider {
            integer: integer as u16,
            fraction: (scaled & 0xFF) as u8,
        })
    }

    /// Divider for the I²S programs: two cycles per bit, two channels.
    pub fn for_bit_clock(source_hz: u32, sample_rate: u32, bits: u8) -> Option<Self> {
        let target = sample_rate.checked_mul(bits as u32 * 2 * 2)?;
        Self::from_frequencies(source_hz, target)
    }

    /// Divider for the master clock program: two cycles per MCLK period, so
    /// MCLK comes out at `sample_rate × factor / 2`.
    pub fn for_master_clock(source_hz: u32, sample_rate: u32, factor: u32) -> Option<Self> {
        Self::from_frequencies(source_hz, sample_rate.checked_mul(factor)?)
    }

    /// Value for the `SMx_CLKDIV` register.
    pub fn register_value(&self) -> u32 {
        (self.integer as u32) << 16 | (self.fraction as u32) << 8
    }
}

/// What a unit does and which pins it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UnitRole {
    /// I²S transmitter. LRCK is `clock_pin + 1`.
    Transmit { data_pin: u8, clock_pin: u8, bits: u8 },
    /// I²S receiver. LRCK is `clock_pin + 1`.
    Receive { data_pin: u8, clock_pin: u8, bits: u8 },
    MasterClock { pin: u8 },
}

/// Everything needed to configure one claimed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSetup {
    pub role: UnitRole,
    pub program: SequencerProgram,
    pub divider: ClockDivider,
}

impl UnitSetup {
    /// Value to `set y` before enabling (bit loop counter), if any.
    pub fn y_preload(&self) -> Option<u8> {
        match self.role {
            UnitRole::Transmit { bits, .. } | UnitRole::Receive { bits, .. } => {
                Some(bits.saturating_sub(2))
            }
            UnitRole::MasterClock { .. } => None,
        }
    }

    /// FIFO shift threshold in bits, per [`SlotLayout::fifo_threshold`].
    pub fn shift_threshold(&self) -> u8 {
        match self.role {
            UnitRole::Transmit { bits, .. } | UnitRole::Receive { bits, .. } => {
                SlotLayout::new(bits).fifo_threshold()
            }
            UnitRole::MasterClock { .. } => 32,
        }
    }
}

/// Register-level control of sequencer units.
///
/// Writes are infallible on the hardware; implementations only poke
/// registers.
pub trait SequencerControl {
    /// Set the start gate IRQ flag on every block so gated programs stall.
    fn hold_start_gate(&mut self);

    /// Pins, clock divider, shift and wrap configuration, then jump to the
    /// program start. The unit stays disabled.
    fn configure(&mut self, claim: &SequencerClaim, setup: &UnitSetup);

    /// Enable (with clock dividers restarted) every unit in `units` on
    /// `block` in a single register write.
    fn enable_in_sync(&mut self, block: BlockId, units: u8);

    /// Clear the start gate flag on every block.
    fn release_start_gate(&mut self);

    /// Stop a unit and restart its state so it can be configured again.
    fn disable(&mut self, claim: &SequencerClaim);
}
