//! Pipeline configuration.
//!
//! Everything is fixed before the first component starts and never changes
//! afterwards. [`PipelineConfig::DEFAULT`] is the reference board: a 24-bit
//! ADC on pins 3-5 and a DAC on pins 6-8, both in 32-bit slots, clocked
//! from a master clock on pin 15.

use crate::dsp::design::{
    FilterSpec, FilterType, Q_BUTTERWORTH_2, Q_BUTTERWORTH_4_1, Q_BUTTERWORTH_4_2,
};
use crate::dsp::FilterChain;
use crate::error::PipelineError;
use crate::io::{ChannelConfig, Direction, WireFormat};

/// Ring capacity per channel, in words.
pub const RING_WORDS: usize = 512;

/// Words per DMA transfer unit (16 stereo frames).
pub const UNIT_WORDS: usize = 32;

/// Stages on the left channel.
pub const LEFT_STAGES: usize = 3;

/// Stages on the right channel.
pub const RIGHT_STAGES: usize = 2;

pub type LeftChain = FilterChain<LEFT_STAGES>;
pub type RightChain = FilterChain<RIGHT_STAGES>;

/// BCLK / DATA pin pair of one I²S port. LRCK is `clock + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2sPins {
    pub clock: u8,
    pub data: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    /// Slot width on the wire.
    pub bits_per_sample: u8,
    pub system_clock_hz: u32,
    /// Master clock = `sample_rate × mclk_factor / 2`.
    pub mclk_factor: u32,
    pub input_pins: I2sPins,
    pub output_pins: I2sPins,
    pub mclk_pin: u8,
    /// Right shift of received samples (slot width minus converter width).
    pub input_shift: u32,
    /// Left shift of processed samples. At most `input_shift`; the
    /// difference is headroom for boosts in the chain.
    pub makeup_shift: u32,
    pub unit_words: usize,
    pub silence_sample: i32,
}

impl PipelineConfig {
    pub const DEFAULT: PipelineConfig = PipelineConfig {
        sample_rate: 44_100,
        bits_per_sample: 32,
        system_clock_hz: 125_000_000,
        mclk_factor: 512,
        input_pins: I2sPins { clock: 3, data: 5 },
        output_pins: I2sPins { clock: 6, data: 8 },
        mclk_pin: 15,
        input_shift: 8,
        makeup_shift: 7,
        unit_words: UNIT_WORDS,
        silence_sample: 0,
    };

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input_shift >= 32 || self.makeup_shift >= 32 {
            return Err(PipelineError::InvalidConfig("shift must be below 32"));
        }
        if self.makeup_shift > self.input_shift {
            return Err(PipelineError::InvalidConfig("makeup shift exceeds input shift"));
        }
        if self.mclk_factor == 0 {
            return Err(PipelineError::InvalidConfig("zero master clock factor"));
        }
        self.input_channel().validate(RING_WORDS)?;
        self.output_channel().validate(RING_WORDS)
    }

    fn channel(&self, direction: Direction, pins: I2sPins) -> ChannelConfig {
        ChannelConfig {
            direction,
            clock_pin: pins.clock,
            data_pin: pins.data,
            bits_per_sample: self.bits_per_sample,
            sample_rate: self.sample_rate,
            system_clock_hz: self.system_clock_hz,
            unit_words: self.unit_words,
            silence_sample: self.silence_sample,
        }
    }

    pub fn input_channel(&self) -> ChannelConfig {
        self.channel(Direction::Input, self.input_pins)
    }

    pub fn output_channel(&self) -> ChannelConfig {
        self.channel(Direction::Output, self.output_pins)
    }

    pub fn wire_format(&self) -> WireFormat {
        WireFormat {
            input_shift: self.input_shift,
            output_shift: self.makeup_shift,
        }
    }

    /// Left: 4th-order Butterworth lowpass at 880 Hz, then +6 dB at 80 Hz.
    pub fn left_specs(&self) -> [FilterSpec; LEFT_STAGES] {
        let fs = self.sample_rate as f32;
        [
            FilterSpec::new(FilterType::Lowpass, 880.0, Q_BUTTERWORTH_4_1, 0.0, fs),
            FilterSpec::new(FilterType::Lowpass, 880.0, Q_BUTTERWORTH_4_2, 0.0, fs),
            FilterSpec::new(FilterType::Peak, 80.0, Q_BUTTERWORTH_2, 6.0, fs),
        ]
    }

    /// Right: 4th-order Butterworth highpass at 880 Hz.
    pub fn right_specs(&self) -> [FilterSpec; RIGHT_STAGES] {
        let fs = self.sample_rate as f32;
        [
            FilterSpec::new(FilterType::Highpass, 880.0, Q_BUTTERWORTH_4_1, 0.0, fs),
            FilterSpec::new(FilterType::Highpass, 880.0, Q_BUTTERWORTH_4_2, 0.0, fs),
        ]
    }

    pub fn left_chain(&self) -> Result<LeftChain, PipelineError> {
        FilterChain::from_specs(&self.left_specs())
    }

    pub fn right_chain(&self) -> Result<RightChain, PipelineError> {
        FilterChain::from_specs(&self.right_specs())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
