//! The real-time loop.
//!
//! One iteration per stereo frame: blocking read from the input channel,
//! remove wire padding, run each channel through its filter chain, apply
//! makeup gain, blocking write to the output channel. The loop only ever
//! waits at the two rings; everything in between is fixed-cost integer
//! arithmetic that must finish within one sample period.

use crate::dsp::SampleFilter;
use crate::error::PipelineError;
use crate::io::{Direction, Frame, TransportChannel, WireFormat};

pub struct RealTimeLoop<'a, FL, FR, const N: usize> {
    input: TransportChannel<'a, N>,
    output: TransportChannel<'a, N>,
    format: WireFormat,
    left: FL,
    right: FR,
    frames: u64,
}

impl<'a, FL: SampleFilter, FR: SampleFilter, const N: usize> RealTimeLoop<'a, FL, FR, N> {
    pub fn new(
        input: TransportChannel<'a, N>,
        output: TransportChannel<'a, N>,
        format: WireFormat,
        left: FL,
        right: FR,
    ) -> Result<Self, PipelineError> {
        if input.direction() != Direction::Input || output.direction() != Direction::Output {
            return Err(PipelineError::InvalidConfig("loop needs an input and an output channel"));
        }
        Ok(RealTimeLoop {
            input,
            output,
            format,
            left,
            right,
            frames: 0,
        })
    }

    /// Transform one received frame into the frame to transmit.
    #[inline]
    pub fn process(&mut self, frame: Frame) -> Frame {
        let frame = self.format.decode(frame);
        let filtered = Frame {
            left: self.left.filter(frame.left),
            right: self.right.filter(frame.right),
        };
        self.format.encode(filtered)
    }

    /// One blocking iteration.
    pub fn step(&mut self) {
        let Some(frame) = self.input.read_frame(true) else {
            return;
        };
        let out = self.process(frame);
        self.output.write_frame(out, true);
        self.frames = self.frames.wrapping_add(1);
    }

    pub fn run(&mut self) -> ! {
        log::info!("entering real-time loop");
        loop {
            self.step();
        }
    }

    /// Frames processed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn input(&self) -> &TransportChannel<'a, N> {
        &self.input
    }

    pub fn output(&self) -> &TransportChannel<'a, N> {
        &self.output
    }
}
