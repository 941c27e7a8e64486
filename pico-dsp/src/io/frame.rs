//! Stereo frames and their wire alignment.
//!
//! Inside a ring every sample is one 32-bit word, MSB aligned: a slot of
//! `bits` bits occupies the top `bits` bits and its sign is bit 31. A
//! 24-bit converter in a 32-bit slot leaves the low 8 bits as padding, so
//! received words are arithmetically shifted right before filtering, and
//! processed samples are shifted left again before transmission. The
//! output shift is the makeup gain: shifting back by less than the input
//! shift leaves headroom for boosts in the filter chain.
//!
//! [`SlotLayout`] converts between ring words and sequencer FIFO words:
//!
//! | Slot bits | FIFO word | Shift threshold |
//! |-----------|-----------|-----------------|
//! | 8 | one frame, `L R` in bits 31..16 out, 15..0 in | 16 |
//! | 16 | one frame, `L` in 31..16, `R` in 15..0 | 32 |
//! | 24 | one sample, bits 31..8 out, 23..0 in | 24 |
//! | 32 | one sample | 32 |
//!
//! Received words are shifted left until the last bit in sits at bit 0 of
//! a full 32-bit shift, so capture and playback share one alignment.

/// Ring words per stereo frame.
pub const FRAME_WORDS: usize = 2;

/// One sample per channel at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub left: i32,
    pub right: i32,
}

impl Frame {
    pub const fn new(left: i32, right: i32) -> Self {
        Frame { left, right }
    }

    /// Interpret two wire words as signed samples, unshifted.
    pub fn from_words(words: [u32; FRAME_WORDS]) -> Self {
        Frame {
            left: words[0] as i32,
            right: words[1] as i32,
        }
    }

    pub fn to_words(self) -> [u32; FRAME_WORDS] {
        [self.left as u32, self.right as u32]
    }

    /// Apply `f` to each channel.
    #[inline]
    pub fn map(self, mut f: impl FnMut(i32) -> i32) -> Self {
        Frame {
            left: f(self.left),
            right: f(self.right),
        }
    }
}

/// Shifts between wire words and working samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WireFormat {
    /// Right shift applied to received samples (removes padding).
    pub input_shift: u32,
    /// Left shift applied to processed samples (makeup gain).
    pub output_shift: u32,
}

impl WireFormat {
    /// Samples pass through unshifted.
    pub const TRANSPARENT: WireFormat = WireFormat {
        input_shift: 0,
        output_shift: 0,
    };

    /// Received frame to working samples (arithmetic shift, sign kept).
    #[inline]
    pub fn decode(&self, frame: Frame) -> Frame {
        let shift = self.input_shift;
        frame.map(|s| s >> shift)
    }

    /// Working samples to the frame to transmit.
    #[inline]
    pub fn encode(&self, frame: Frame) -> Frame {
        let shift = self.output_shift;
        frame.map(|s| s << shift)
    }
}

/// How slots of one width sit in sequencer FIFO words.
///
/// Slots up to 16 bits share one FIFO word per frame; wider slots take a
/// word each. The bit width must be validated (1..=32) beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotLayout {
    bits: u8,
}

impl SlotLayout {
    pub const fn new(bits: u8) -> Self {
        SlotLayout { bits }
    }

    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Slots carried by one FIFO word.
    pub fn slots_per_word(self) -> usize {
        if self.bits <= 16 {
            2
        } else {
            1
        }
    }

    /// FIFO words per stereo frame.
    pub fn words_per_frame(self) -> usize {
        FRAME_WORDS / self.slots_per_word()
    }

    /// Bits shifted per FIFO word: the autopull / autopush threshold.
    pub fn fifo_threshold(self) -> u8 {
        self.bits * self.slots_per_word() as u8
    }

    fn slot_mask(self) -> u32 {
        u32::MAX << (32 - self.bits as u32)
    }

    /// A slot-width sample as a ring word.
    pub fn align(self, sample: i32) -> u32 {
        (sample as u32) << (32 - self.bits as u32)
    }

    /// Write one frame of ring words as [`words_per_frame`](Self::words_per_frame)
    /// FIFO words.
    pub fn pack(self, frame: [u32; FRAME_WORDS], out: &mut [u32]) {
        let mask = self.slot_mask();
        if self.slots_per_word() == 2 {
            out[0] = (frame[0] & mask) | (frame[1] & mask) >> self.bits;
        } else {
            out[0] = frame[0] & mask;
            out[1] = frame[1] & mask;
        }
    }

    /// One frame of received FIFO words as ring words.
    pub fn unpack(self, words: &[u32]) -> [u32; FRAME_WORDS] {
        let mask = self.slot_mask();
        let shift = 32 - self.fifo_threshold() as u32;
        if self.slots_per_word() == 2 {
            let word = words[0] << shift;
            [word & mask, (word << self.bits) & mask]
        } else {
            [(words[0] << shift) & mask, (words[1] << shift) & mask]
        }
    }
}
