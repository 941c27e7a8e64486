//! Ordered cascade of biquad stages for one channel.

use super::biquad::Biquad;
use super::design::FilterSpec;
use super::SampleFilter;
use crate::error::PipelineError;

/// `N` biquad stages applied in construction order.
///
/// The topology is fixed once built: there is no way to insert, remove or
/// reorder stages afterwards.
#[derive(Debug, Clone)]
pub struct FilterChain<const N: usize> {
    stages: [Biquad; N],
}

impl<const N: usize> FilterChain<N> {
    /// A chain of identity stages.
    pub const fn identity() -> Self {
        FilterChain {
            stages: [const { Biquad::identity() }; N],
        }
    }

    /// Design every stage from its spec, in order.
    pub fn from_specs(specs: &[FilterSpec; N]) -> Result<Self, PipelineError> {
        let mut stages = [const { Biquad::identity() }; N];
        for (stage, spec) in stages.iter_mut().zip(specs.iter()) {
            *stage = Biquad::from_spec(spec)?;
        }
        Ok(FilterChain { stages })
    }

    pub fn from_stages(stages: [Biquad; N]) -> Self {
        FilterChain { stages }
    }

    /// Run one sample through every stage.
    #[inline]
    pub fn process(&mut self, sample: i32) -> i32 {
        let mut s = sample;
        for stage in self.stages.iter_mut() {
            s = stage.process(s);
        }
        s
    }

    pub fn stages(&self) -> &[Biquad; N] {
        &self.stages
    }

    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }
}

impl<const N: usize> SampleFilter for FilterChain<N> {
    #[inline]
    fn filter(&mut self, sample: i32) -> i32 {
        self.process(sample)
    }
}
