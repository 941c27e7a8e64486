//! Biquad coefficient design.
//!
//! Bilinear-transform biquad formulas parameterized by `K = tan(π·Fc/Fs)` and
//! the linear gain `V = 10^(|gain|/20)`. Boost and cut branches are mirrored
//! so a cut of N dB exactly inverts a boost of N dB.
//!
//! Coefficients are designed in `f32` and quantized once to Q4.28 via
//! [`Coefficients::to_fixed`].

use core::f32::consts::{PI, SQRT_2};

use libm::{fabsf, powf, sqrtf, tanf};

use crate::error::PipelineError;

/// Fractional bits of the fixed-point coefficient format.
pub const COEFF_FRAC_BITS: u32 = 28;

/// `1.0` in the fixed-point coefficient format.
pub const COEFF_ONE: i32 = 1 << COEFF_FRAC_BITS;

/// Q for a single 2nd-order Butterworth section.
pub const Q_BUTTERWORTH_2: f32 = 0.707_106_78;

/// Q of the first section of a 4th-order Butterworth cascade.
pub const Q_BUTTERWORTH_4_1: f32 = 0.541_196_1;

/// Q of the second section of a 4th-order Butterworth cascade.
pub const Q_BUTTERWORTH_4_2: f32 = 1.306_563;

/// Filter response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Peak,
    LowShelf,
    HighShelf,
    /// Identity section: `b0 = 1`, everything else zero.
    None,
}

/// Everything needed to design one biquad section.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterSpec {
    pub kind: FilterType,
    /// Cutoff or center frequency in Hz.
    pub frequency: f32,
    pub q: f32,
    /// Peak/shelf gain in dB. Ignored by the other types.
    pub gain_db: f32,
    pub sample_rate: f32,
}

impl FilterSpec {
    pub const fn new(kind: FilterType, frequency: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        FilterSpec {
            kind,
            frequency,
            q,
            gain_db,
            sample_rate,
        }
    }

    /// The identity section.
    pub const fn identity(sample_rate: f32) -> Self {
        FilterSpec::new(FilterType::None, 0.0, Q_BUTTERWORTH_2, 0.0, sample_rate)
    }

    /// Design the floating-point coefficients for this spec.
    pub fn design(&self) -> Coefficients {
        Coefficients::design(self)
    }
}

/// Normalized biquad coefficients (`a0 == 1`).
///
/// ```text
/// y[n] = b0·x[n] + b1·x[n-1] + b2·x[n-2] - a1·y[n-1] - a2·y[n-2]
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Coefficients {
    /// Pass-through coefficients.
    pub const IDENTITY: Coefficients = Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Design coefficients from a [`FilterSpec`].
    pub fn design(spec: &FilterSpec) -> Self {
        let q = spec.q;
        let v = powf(10.0, fabsf(spec.gain_db) / 20.0);
        let k = tanf(PI * spec.frequency / spec.sample_rate);
        let kk = k * k;
        let boost = spec.gain_db >= 0.0;

        match spec.kind {
            FilterType::Lowpass => {
                let norm = 1.0 / (1.0 + k / q + kk);
                let b0 = kk * norm;
                Coefficients {
                    b0,
                    b1: 2.0 * b0,
                    b2: b0,
                    a1: 2.0 * (kk - 1.0) * norm,
                    a2: (1.0 - k / q + kk) * norm,
                }
            }
            FilterType::Highpass => {
                let norm = 1.0 / (1.0 + k / q + kk);
                Coefficients {
                    b0: norm,
                    b1: -2.0 * norm,
                    b2: norm,
                    a1: 2.0 * (kk - 1.0) * norm,
                    a2: (1.0 - k / q + kk) * norm,
                }
            }
            FilterType::Bandpass => {
                let norm = 1.0 / (1.0 + k / q + kk);
                let b0 = k / q * norm;
                Coefficients {
                    b0,
                    b1: 0.0,
                    b2: -b0,
                    a1: 2.0 * (kk - 1.0) * norm,
                    a2: (1.0 - k / q + kk) * norm,
                }
            }
            FilterType::Notch => {
                let norm = 1.0 / (1.0 + k / q + kk);
                let b0 = (1.0 + kk) * norm;
                let b1 = 2.0 * (kk - 1.0) * norm;
                Coefficients {
                    b0,
                    b1,
                    b2: b0,
                    a1: b1,
                    a2: (1.0 - k / q + kk) * norm,
                }
            }
            FilterType::Peak => {
                if boost {
                    let norm = 1.0 / (1.0 + k / q + kk);
                    let b1 = 2.0 * (kk - 1.0) * norm;
                    Coefficients {
                        b0: (1.0 + v / q * k + kk) * norm,
                        b1,
                        b2: (1.0 - v / q * k + kk) * norm,
                        a1: b1,
                        a2: (1.0 - k / q + kk) * norm,
                    }
                } else {
                    let norm = 1.0 / (1.0 + v / q * k + kk);
                    let b1 = 2.0 * (kk - 1.0) * norm;
                    Coefficients {
                        b0: (1.0 + k / q + kk) * norm,
                        b1,
                        b2: (1.0 - k / q + kk) * norm,
                        a1: b1,
                        a2: (1.0 - v / q * k + kk) * norm,
                    }
                }
            }
            FilterType::LowShelf => {
                let s2v = sqrtf(2.0 * v);
                if boost {
                    let norm = 1.0 / (1.0 + SQRT_2 * k + kk);
                    Coefficients {
                        b0: (1.0 + s2v * k + v * kk) * norm,
                        b1: 2.0 * (v * kk - 1.0) * norm,
                        b2: (1.0 - s2v * k + v * kk) * norm,
                        a1: 2.0 * (kk - 1.0) * norm,
                        a2: (1.0 - SQRT_2 * k + kk) * norm,
                    }
                } else {
                    let norm = 1.0 / (1.0 + s2v * k + v * kk);
                    Coefficients {
                        b0: (1.0 + SQRT_2 * k + kk) * norm,
                        b1: 2.0 * (kk - 1.0) * norm,
                        b2: (1.0 - SQRT_2 * k + kk) * norm,
                        a1: 2.0 * (v * kk - 1.0) * norm,
                        a2: (1.0 - s2v * k + v * kk) * norm,
                    }
                }
            }
            FilterType::HighShelf => {
                let s2v = sqrtf(2.0 * v);
                if boost {
                    let norm = 1.0 / (1.0 + SQRT_2 * k + kk);
                    Coefficients {
                        b0: (v + s2v * k + kk) * norm,
                        b1: 2.0 * (kk - v) * norm,
                        b2: (v - s2v * k + kk) * norm,
                        a1: 2.0 * (kk - 1.0) * norm,
                        a2: (1.0 - SQRT_2 * k + kk) * norm,
                    }
                } else {
                    let norm = 1.0 / (v + s2v * k + kk);
                    Coefficients {
                        b0: (1.0 + SQRT_2 * k + kk) * norm,
                        b1: 2.0 * (kk - 1.0) * norm,
                        b2: (1.0 - SQRT_2 * k + kk) * norm,
                        a1: 2.0 * (kk - v) * norm,
                        a2: (v - s2v * k + kk) * norm,
                    }
                }
            }
            FilterType::None => Coefficients::IDENTITY,
        }
    }

    /// Quantize to Q4.28 by scaling and truncating toward zero.
    ///
    /// Truncation (not rounding) is deliberate and must stay: the stage's
    /// remainder feedback was tuned against these exact values.
    pub fn to_fixed(&self) -> FixedCoefficients {
        let scale = COEFF_ONE as f32;
        FixedCoefficients {
            b: [
                (self.b0 * scale) as i32,
                (self.b1 * scale) as i32,
                (self.b2 * scale) as i32,
            ],
            a: [(self.a1 * scale) as i32, (self.a2 * scale) as i32],
        }
    }

    /// Whether both poles lie strictly inside the unit circle.
    ///
    /// For `1 + a1·z⁻¹ + a2·z⁻²` this is the stability triangle
    /// `|a2| < 1` and `|a1| < 1 + a2`.
    pub fn is_stable(&self) -> bool {
        fabsf(self.a2) < 1.0 && fabsf(self.a1) < 1.0 + self.a2
    }
}

/// Quantized coefficients, scaled by `2^COEFF_FRAC_BITS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedCoefficients {
    /// Feed-forward `b0, b1, b2`.
    pub b: [i32; 3],
    /// Feedback `a1, a2`.
    pub a: [i32; 2],
}

impl FixedCoefficients {
    /// Pass-through coefficients.
    pub const IDENTITY: FixedCoefficients = FixedCoefficients {
        b: [COEFF_ONE, 0, 0],
        a: [0, 0],
    };

    /// Worst-case accumulator magnitude for full-range `i32` history.
    ///
    /// `remainder + Σ|coeff| · 2^31`. Must stay below `i64::MAX` for the
    /// stage's unchecked 64-bit accumulation to be sound.
    pub fn accumulator_bound(&self) -> u128 {
        let full_scale = 1u128 << 31;
        let sum: u128 = self
            .b
            .iter()
            .chain(self.a.iter())
            .map(|&c| c.unsigned_abs() as u128)
            .sum();
        sum * full_scale + (1u128 << COEFF_FRAC_BITS)
    }

    /// Reject coefficient sets whose worst case does not fit in an `i64`.
    pub fn check_headroom(&self) -> Result<(), PipelineError> {
        if self.accumulator_bound() <= i64::MAX as u128 {
            Ok(())
        } else {
            Err(PipelineError::CoefficientOverflow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f32 = 44_100.0;

    #[test]
    fn none_is_identity() {
        let c = FilterSpec::identity(FS).design();
        assert_eq!(c, Coefficients::IDENTITY);
        assert_eq!(c.to_fixed(), FixedCoefficients::IDENTITY);
    }

    #[test]
    fn lowpass_has_unity_dc_gain() {
        let c = FilterSpec::new(FilterType::Lowpass, 880.0, Q_BUTTERWORTH_2, 0.0, FS).design();
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!((dc - 1.0).abs() < 1e-3, "dc gain {dc}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let c = FilterSpec::new(FilterType::Highpass, 880.0, Q_BUTTERWORTH_2, 0.0, FS).design();
        assert!((c.b0 + c.b1 + c.b2).abs() < 1e-6);
    }

    #[test]
    fn peak_boost_and_cut_are_reciprocal() {
        let boost = FilterSpec::new(FilterType::Peak, 1000.0, 1.0, 6.0, FS).design();
        let cut = FilterSpec::new(FilterType::Peak, 1000.0, 1.0, -6.0, FS).design();
        // Cut swaps numerator and denominator of the boost (after normalization).
        let boost_num = [boost.b0, boost.b1, boost.b2];
        let boost_den = [1.0, boost.a1, boost.a2];
        let scale = 1.0 / cut.b0;
        let cut_den = [cut.b0 * scale, cut.b1 * scale, cut.b2 * scale];
        let cut_num = [scale, cut.a1 * scale, cut.a2 * scale];
        for i in 0..3 {
            assert!((boost_den[i] - cut_den[i]).abs() < 1e-5);
            assert!((boost_num[i] - cut_num[i]).abs() < 1e-5);
        }
    }

    #[test]
    fn peak_with_zero_gain_is_flat() {
        let c = FilterSpec::new(FilterType::Peak, 80.0, Q_BUTTERWORTH_2, 0.0, FS).design();
        assert!((c.b0 - 1.0).abs() < 1e-6);
        assert!((c.b1 - c.a1).abs() < 1e-6);
        assert!((c.b2 - c.a2).abs() < 1e-6);
    }

    #[test]
    fn quantization_truncates_toward_zero() {
        let c = Coefficients {
            b0: 1.5 / COEFF_ONE as f32,
            b1: -1.5 / COEFF_ONE as f32,
            b2: 0.0,
            a1: -1.999,
            a2: 0.25,
        };
        let f = c.to_fixed();
        assert_eq!(f.b[0], 1);
        assert_eq!(f.b[1], -1);
        assert_eq!(f.a[1], COEFF_ONE / 4);
        assert!(f.a[0] > -2 * COEFF_ONE);
    }

    #[test]
    fn headroom_check_rejects_extreme_gain() {
        let ok = FilterSpec::new(FilterType::Peak, 80.0, Q_BUTTERWORTH_2, 6.0, FS)
            .design()
            .to_fixed();
        assert!(ok.check_headroom().is_ok());

        let fixed = FixedCoefficients {
            b: [i32::MAX, i32::MIN, i32::MAX],
            a: [i32::MIN, i32::MAX],
        };
        assert_eq!(fixed.check_headroom(), Err(PipelineError::CoefficientOverflow));
    }
}
