//! Fixed-point biquad stage with truncation-error feedback.
//!
//! Direct Form I with a 64-bit accumulator. The low `COEFF_FRAC_BITS` bits
//! discarded by the output shift are carried into the next sample's
//! accumulator, so truncation error is shaped rather than accumulated as a
//! DC bias.
//!
//! The per-sample path has no branches and no overflow checks: headroom is
//! proven once at construction with
//! [`FixedCoefficients::check_headroom`](super::FixedCoefficients::check_headroom).

use super::design::{FilterSpec, FixedCoefficients, COEFF_FRAC_BITS};
use super::SampleFilter;
use crate::error::PipelineError;

/// Mask selecting the bits dropped by the output shift.
pub const REMAINDER_MASK: i64 = (1i64 << COEFF_FRAC_BITS) - 1;

/// One fixed-point second-order section and its state.
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: FixedCoefficients,
    /// Input history: `x[n-1]`, `x[n-2]`.
    x: [i32; 2],
    /// Output history: `y[n-1]`, `y[n-2]`.
    y: [i32; 2],
    /// Truncation remainder carried from the previous sample.
    remainder: i64,
}

impl Biquad {
    /// A pass-through stage.
    pub const fn identity() -> Self {
        Biquad {
            coeffs: FixedCoefficients::IDENTITY,
            x: [0; 2],
            y: [0; 2],
            remainder: 0,
        }
    }

    /// Build a stage from already-quantized coefficients.
    ///
    /// Fails with [`PipelineError::CoefficientOverflow`] if the coefficients
    /// could overflow the accumulator for some full-range input.
    pub fn from_fixed(coeffs: FixedCoefficients) -> Result<Self, PipelineError> {
        coeffs.check_headroom()?;
        Ok(Biquad {
            coeffs,
            x: [0; 2],
            y: [0; 2],
            remainder: 0,
        })
    }

    /// Design, quantize and build a stage.
    pub fn from_spec(spec: &FilterSpec) -> Result<Self, PipelineError> {
        Self::from_fixed(spec.design().to_fixed())
    }

    /// Filter one sample.
    #[inline]
    pub fn process(&mut self, input: i32) -> i32 {
        let [b0, b1, b2] = self.coeffs.b;
        let [a1, a2] = self.coeffs.a;

        let mut acc = self.remainder;
        acc += b0 as i64 * input as i64;
        acc += b1 as i64 * self.x[0] as i64;
        acc += b2 as i64 * self.x[1] as i64;
        acc -= a1 as i64 * self.y[0] as i64;
        acc -= a2 as i64 * self.y[1] as i64;

        self.remainder = acc & REMAINDER_MASK;
        let out = (acc >> COEFF_FRAC_BITS) as i32;

        self.x = [input, self.x[0]];
        self.y = [out, self.y[0]];

        out
    }

    /// Clear history and remainder; coefficients are kept.
    pub fn reset(&mut self) {
        self.x = [0; 2];
        self.y = [0; 2];
        self.remainder = 0;
    }

    pub fn coefficients(&self) -> &FixedCoefficients {
        &self.coeffs
    }

    /// The carried truncation remainder, always in `0..=REMAINDER_MASK`.
    pub fn remainder(&self) -> i64 {
        self.remainder
    }
}

impl Default for Biquad {
    fn default() -> Self {
        Self::identity()
    }
}

impl SampleFilter for Biquad {
    #[inline]
    fn filter(&mut self, sample: i32) -> i32 {
        self.process(sample)
    }
}
