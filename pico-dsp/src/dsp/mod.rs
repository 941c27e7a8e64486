//! Filter design and fixed-point filtering.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`FilterSpec`] / [`Coefficients`] | Floating-point biquad design |
//! | [`FixedCoefficients`] | Q4.28 quantized coefficients + headroom check |
//! | [`Biquad`] | One fixed-point section with remainder feedback |
//! | [`FilterChain`] | Fixed cascade of sections for one channel |

pub mod biquad;
pub mod chain;
pub mod design;

pub use biquad::Biquad;
pub use chain::FilterChain;
pub use design::{
    Coefficients, FilterSpec, FilterType, FixedCoefficients, COEFF_FRAC_BITS, COEFF_ONE,
    Q_BUTTERWORTH_2, Q_BUTTERWORTH_4_1, Q_BUTTERWORTH_4_2,
};

/// Anything that turns one sample into one sample.
///
/// Implemented by [`Biquad`] and [`FilterChain`]; the real-time loop is
/// generic over it so each channel can carry a different chain length.
pub trait SampleFilter {
    fn filter(&mut self, sample: i32) -> i32;
}
