//! Assembled sequencer programs.
//!
//! Every program starts with `wait 0 irq 7` so a freshly enabled unit
//! stalls until the start gate is released, then wraps over the remaining
//! instructions forever.
//!
//! The I²S programs drive BCLK on side-set bit 0 and LRCK on side-set bit 1
//! (LRCK pin = BCLK pin + 1). Each data bit takes two instruction cycles, so
//! the unit clock is `rate × bits × 2 channels × 2`. `y` must be preloaded
//! with `bits - 2` before the unit is enabled.

/// Sequencer IRQ flag used as the start gate.
pub const START_GATE_IRQ: u8 = 7;

/// Instruction encoders for the few instructions executed at setup time.
pub mod instr {
    /// `jmp address`
    pub const fn jmp(address: u8) -> u16 {
        (address & 0x1F) as u16
    }

    /// `set y, value`
    pub const fn set_y(value: u8) -> u16 {
        0xE040 | (value & 0x1F) as u16
    }

    /// `set pindirs, value`
    pub const fn set_pindirs(value: u8) -> u16 {
        0xE080 | (value & 0x1F) as u16
    }

    /// `wait 0 irq n`
    pub const fn wait_irq_clear(irq: u8) -> u16 {
        0x2040 | (irq & 0x07) as u16
    }

    /// True for `JMP`, whose low five bits are an absolute address.
    pub const fn is_jmp(instruction: u16) -> bool {
        instruction & 0xE000 == 0
    }
}

/// A program as assembled for offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerProgram {
    /// Identity used for sharing: programs with the same name on the same
    /// block share one loaded copy.
    pub name: &'static str,
    pub instructions: &'static [u16],
    /// Fixed load address, if the program is not relocatable.
    pub origin: Option<u8>,
    pub wrap_target: u8,
    pub wrap: u8,
    /// Side-set bit count (not optional).
    pub side_set_bits: u8,
}

impl SequencerProgram {
    pub const fn len(&self) -> usize {
        self.instructions.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// `instruction` as it must be written when the program sits at `offset`.
    pub fn relocate(instruction: u16, offset: u8) -> u16 {
        if instr::is_jmp(instruction) {
            let target = (instruction & 0x1F) + offset as u16;
            (instruction & !0x1F) | (target & 0x1F)
        } else {
            instruction
        }
    }
}

/// Stereo I²S transmitter, MSB first.
pub const I2S_OUT: SequencerProgram = SequencerProgram {
    name: "i2s_out",
    instructions: &[
        0x2047, //  0: wait 0 irq 7         side 0b00
        0xA822, //  1: mov x, y             side 0b01  (wrap target)
        0x6001, //  2: out pins, 1          side 0b00
        0x0842, //  3: jmp x--, 2           side 0b01
        0x7001, //  4: out pins, 1          side 0b10
        0xB822, //  5: mov x, y             side 0b11
        0x7001, //  6: out pins, 1          side 0b10
        0x1846, //  7: jmp x--, 6           side 0b11
        0x6001, //  8: out pins, 1          side 0b00  (wrap)
    ],
    origin: None,
    wrap_target: 1,
    wrap: 8,
    side_set_bits: 2,
};

/// Stereo I²S receiver, MSB first. Same clocking as [`I2S_OUT`].
pub const I2S_IN: SequencerProgram = SequencerProgram {
    name: "i2s_in",
    instructions: &[
        0x2047, //  0: wait 0 irq 7         side 0b00
        0xA822, //  1: mov x, y             side 0b01  (wrap target)
        0x4001, //  2: in pins, 1           side 0b00
        0x0842, //  3: jmp x--, 2           side 0b01
        0x5001, //  4: in pins, 1           side 0b10
        0xB822, //  5: mov x, y             side 0b11
        0x5001, //  6: in pins, 1           side 0b10
        0x1846, //  7: jmp x--, 6           side 0b11
        0x4001, //  8: in pins, 1           side 0b00  (wrap)
    ],
    origin: None,
    wrap_target: 1,
    wrap: 8,
    side_set_bits: 2,
};

/// Square wave at half the unit clock.
pub const MCLK: SequencerProgram = SequencerProgram {
    name: "mclk",
    instructions: &[
        0x2047, // 0: wait 0 irq 7
        0xE001, // 1: set pins, 1  (wrap target)
        0xE000, // 2: set pins, 0  (wrap)
    ],
    origin: None,
    wrap_target: 1,
    wrap: 2,
    side_set_bits: 0,
};
