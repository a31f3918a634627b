//! FFT plan wrapper.
//!
//! Demodulation spends almost all of its time in one place: the per-symbol
//! forward FFT of the dechirped window. The plan pair created here owns the
//! precomputed twiddle state and a scratch buffer, so execution against the
//! workspace buffers never allocates. The inverse transform divides by the
//! size, so `inverse(forward(x))` returns `x` to within floating point
//! tolerance.

use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

use crate::types::IQSample;

/// A forward/inverse transform pair for a fixed size.
pub struct FftPlan {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<IQSample>,
}

impl fmt::Debug for FftPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftPlan").field("size", &self.size).finish()
    }
}

impl FftPlan {
    /// Plan both directions for `size`-point transforms. All twiddle and
    /// scratch storage is allocated here, once.
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_outofplace_scratch_len()
            .max(inverse.get_outofplace_scratch_len());
        Self {
            size,
            forward,
            inverse,
            scratch: vec![IQSample::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform from `input` into `output`.
    ///
    /// `input` is used as working storage and holds garbage afterwards.
    pub fn forward(&mut self, input: &mut [IQSample], output: &mut [IQSample]) {
        debug_assert_eq!(input.len(), self.size);
        debug_assert_eq!(output.len(), self.size);
        self.forward
            .process_outofplace_with_scratch(input, output, &mut self.scratch);
    }

    /// Inverse transform from `input` into `output`, normalised by `1/size`.
    pub fn inverse(&mut self, input: &mut [IQSample], output: &mut [IQSample]) {
        debug_assert_eq!(input.len(), self.size);
        debug_assert_eq!(output.len(), self.size);
        self.inverse
            .process_outofplace_with_scratch(input, output, &mut self.scratch);
        let scale = 1.0 / self.size as f32;
        for sample in output.iter_mut() {
            *sample *= scale;
        }
    }
}
