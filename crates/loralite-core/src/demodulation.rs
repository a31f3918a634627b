//! Symbol detection and offset estimation.
//!
//! Detection is dechirp-and-FFT: multiply the received window by the
//! reference downchirp, transform, and the symbol is the bin with the most
//! power. Everything else here refines that one idea:
//!
//! - quadratic interpolation over the three bins around the peak gives a
//!   fractional bin offset (`findex`) without a bigger FFT;
//! - with oversampling, the detector tries every decimation sub-phase and
//!   keeps the strongest, which doubles as fine timing alignment;
//! - the offset estimator reads the first windows of a burst (known
//!   upchirps in a preamble) and splits the observed bin offset into a
//!   carrier frequency component, measured from the phase drift between
//!   consecutive peak bins, and a timing component, which is the rest.
//!   With oversampling the winning sub-phase pins the sub-chip part of
//!   the timing correction, so the compensator's rounded shift lands on
//!   the oversampled grid.
//!
//! The phase drift measurement must account for the modulator's own
//! deterministic phase advance per symbol (see
//! [`crate::chirp::symbol_phase_advance`]); after subtracting it, a clean
//! burst measures zero CFO no matter which symbols it carries.

use std::f32::consts::TAU;

use crate::chirp::wrap_phase;
use crate::fft::FftPlan;
use crate::types::IQSample;

/// Result of detecting one symbol window.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    /// Integer symbol index, the argmax bin.
    pub index: usize,
    /// Fractional bin refinement in `[-0.5, 0.5]`. Never folded back into
    /// `index`; only the offset estimator consumes it.
    pub findex: f32,
    /// Peak bin power.
    pub peak: f32,
    /// Mean power across all bins.
    pub average: f32,
    /// Complex value of the peak bin, for phase-based CFO refinement.
    pub bin: IQSample,
    /// Decimation sub-phase that produced the strongest peak.
    pub subphase: usize,
}

/// Offsets estimated from the leading windows of a burst.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetEstimate {
    /// Carrier frequency offset in cycles per base-rate sample.
    pub cfo: f32,
    /// Timing correction in base-rate samples; positive delays, negative
    /// advances.
    pub time_offset: f32,
}

/// Per-symbol detector borrowing the workspace's plan and scratch buffers.
pub(crate) struct Detector<'a> {
    pub n: usize,
    pub osr: usize,
    pub plan: &'a mut FftPlan,
    pub downchirp: &'a [IQSample],
    pub window: Option<&'a [f32]>,
    pub fft_in: &'a mut [IQSample],
    pub fft_out: &'a mut [IQSample],
}

/// A sub-phase must out-power the incumbent by this relative margin to win;
/// near-equal energies keep the earliest alignment, so a clean burst always
/// reports sub-phase zero.
const SUBPHASE_MARGIN: f32 = 1e-3;

impl Detector<'_> {
    /// Detect one symbol from an `n * osr` sample window.
    ///
    /// `rate`/`phase0` describe a rotation applied inline (radians per
    /// oversampled sample and at the window start) so the caller can
    /// compensate CFO without touching the input buffer.
    pub fn detect(&mut self, samples: &[IQSample], rate: f32, phase0: f32) -> Detection {
        debug_assert!(samples.len() >= self.n * self.osr);
        let mut best: Option<Detection> = None;

        for subphase in 0..self.osr {
            for m in 0..self.n {
                let i = m * self.osr + subphase;
                let mut x = samples[i] * self.downchirp[i];
                if rate != 0.0 {
                    let phi = phase0 + rate * i as f32;
                    x *= IQSample::new(phi.cos(), phi.sin());
                }
                if let Some(w) = self.window {
                    x *= w[m];
                }
                self.fft_in[m] = x;
            }
            self.plan.forward(self.fft_in, self.fft_out);

            let detection = peak_search(self.fft_out, subphase);
            let wins = best
                .as_ref()
                .map_or(true, |b| detection.peak > b.peak * (1.0 + SUBPHASE_MARGIN));
            if wins {
                best = Some(detection);
            }
        }
        best.expect("osr >= 1")
    }
}

/// Magnitude-squared argmax plus quadratic refinement over the spectrum.
fn peak_search(spectrum: &[IQSample], subphase: usize) -> Detection {
    let n = spectrum.len();
    let mut index = 0;
    let mut peak = 0.0f32;
    let mut total = 0.0f32;
    for (k, bin) in spectrum.iter().enumerate() {
        let power = bin.norm_sqr();
        total += power;
        if power > peak {
            peak = power;
            index = k;
        }
    }

    let prev = spectrum[(index + n - 1) % n].norm_sqr();
    let next = spectrum[(index + 1) % n].norm_sqr();
    let denom = prev - 2.0 * peak + next;
    let findex = if denom.abs() > f32::EPSILON {
        (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    Detection {
        index,
        findex,
        peak,
        average: total / n as f32,
        bin: spectrum[index],
        subphase,
    }
}

/// Estimate CFO and timing from the first `min(num_symbols, 2)` windows of
/// `samples`, which the caller expects to be known upchirps.
///
/// With two windows the CFO comes from the phase drift between the peak
/// bins (`expected_advance` already subtracted), wrapped to half a bin, and
/// the timing offset absorbs the remainder of the observed average index.
/// With a single window the phase-difference term is skipped and the whole
/// observation is attributed to the carrier.
///
/// When `osr > 1` the estimator also keeps the best sub-phase found by the
/// detector and uses it for the sub-chip part of the timing correction, so
/// the compensator's integer shift lands on the oversampled grid.
pub(crate) fn estimate_offsets(
    detector: &mut Detector<'_>,
    samples: &[IQSample],
    num_symbols: usize,
    expected_advance: f32,
) -> OffsetEstimate {
    let n = detector.n as f32;
    let osr = detector.osr;
    let step = detector.n * osr;
    let est_syms = num_symbols.min(2);
    if est_syms == 0 {
        return OffsetEstimate::default();
    }

    let mut sum_index = 0.0f32;
    let mut phase_diff = 0.0f32;
    let mut prev_phase = None;
    let mut best_peak = 0.0f32;
    let mut best_subphase = 0usize;
    for s in 0..est_syms {
        let detection = detector.detect(&samples[s * step..(s + 1) * step], 0.0, 0.0);
        sum_index += detection.index as f32 + detection.findex;
        if detection.peak > best_peak {
            best_peak = detection.peak;
            best_subphase = detection.subphase;
        }
        let phase = detection.bin.arg();
        if let Some(prev) = prev_phase {
            phase_diff += wrap_phase(phase - prev - expected_advance);
        }
        prev_phase = Some(phase);
    }

    let avg_index = sum_index / est_syms as f32;
    // Report offsets past the Nyquist bin with their sign.
    let observed = if avg_index > n / 2.0 {
        avg_index - n
    } else {
        avg_index
    };

    // The winning sub-phase, as a signed fraction of a base-rate sample.
    let subphase = if 2 * best_subphase > osr {
        best_subphase as f32 - osr as f32
    } else {
        best_subphase as f32
    } / osr as f32;

    if est_syms > 1 {
        let fine_bins = phase_diff / (est_syms - 1) as f32 / TAU;
        let mut time_offset = observed - fine_bins;
        if osr > 1 {
            // The bin observation keeps the whole-sample part; the
            // sub-phase pins the fractional part, which the quadratic
            // refinement only resolves approximately.
            time_offset = (time_offset + subphase).round() - subphase;
        }
        OffsetEstimate {
            cfo: fine_bins / n,
            time_offset,
        }
    } else {
        OffsetEstimate {
            cfo: observed / n,
            time_offset: if osr > 1 { -subphase } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chirp::{gen_chirp, symbol_phase_advance};
    use approx::assert_relative_eq;
    use std::f32::consts::TAU;

    struct Fixture {
        n: usize,
        osr: usize,
        plan: FftPlan,
        downchirp: Vec<IQSample>,
        fft_in: Vec<IQSample>,
        fft_out: Vec<IQSample>,
    }

    impl Fixture {
        fn new(n: usize, osr: usize) -> Self {
            let mut downchirp = vec![IQSample::new(0.0, 0.0); n * osr];
            let mut phase = 0.0;
            gen_chirp(&mut downchirp, n, osr, 0.0, true, 1.0, &mut phase, 1.0);
            Self {
                n,
                osr,
                plan: FftPlan::new(n),
                downchirp,
                fft_in: vec![IQSample::new(0.0, 0.0); n],
                fft_out: vec![IQSample::new(0.0, 0.0); n],
            }
        }

        fn detector(&mut self) -> Detector<'_> {
            Detector {
                n: self.n,
                osr: self.osr,
                plan: &mut self.plan,
                downchirp: &self.downchirp,
                window: None,
                fft_in: &mut self.fft_in,
                fft_out: &mut self.fft_out,
            }
        }
    }

    fn modulate_symbols(n: usize, osr: usize, symbols: &[u16]) -> Vec<IQSample> {
        let step = n * osr;
        let mut iq = vec![IQSample::new(0.0, 0.0); symbols.len() * step];
        let mut phase = 0.0;
        for (s, &k) in symbols.iter().enumerate() {
            let freq = TAU * k as f32 / step as f32;
            gen_chirp(
                &mut iq[s * step..(s + 1) * step],
                n,
                osr,
                freq,
                false,
                1.0,
                &mut phase,
                1.0,
            );
        }
        iq
    }

    #[test]
    fn detects_known_symbols() {
        let mut fixture = Fixture::new(128, 1);
        for k in [0u16, 1, 42, 64, 127] {
            let iq = modulate_symbols(128, 1, &[k]);
            let detection = fixture.detector().detect(&iq, 0.0, 0.0);
            assert_eq!(detection.index, k as usize);
            assert!(detection.peak > 10.0 * detection.average);
            assert!(detection.findex.abs() < 0.1);
        }
    }

    #[test]
    fn detects_with_oversampling() {
        let mut fixture = Fixture::new(64, 4);
        let iq = modulate_symbols(64, 4, &[23]);
        let detection = fixture.detector().detect(&iq, 0.0, 0.0);
        assert_eq!(detection.index, 23);
    }

    #[test]
    fn clean_burst_estimates_zero_offsets() {
        let n = 128;
        let mut fixture = Fixture::new(n, 1);
        let advance = symbol_phase_advance(n, 1, 1.0);
        // Arbitrary payload symbols, not upchirps: the estimate must still
        // be near zero because the inter-symbol phase advance is constant.
        let iq = modulate_symbols(n, 1, &[17, 54, 3]);
        let estimate = estimate_offsets(&mut fixture.detector(), &iq, 3, advance);
        assert_relative_eq!(estimate.cfo, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn estimates_injected_fractional_cfo() {
        let n = 128;
        let mut fixture = Fixture::new(n, 1);
        let advance = symbol_phase_advance(n, 1, 1.0);
        let cfo_bins = 0.25f32;
        let cfo = cfo_bins / n as f32;

        let mut iq = modulate_symbols(n, 1, &[0, 0]);
        for (i, sample) in iq.iter_mut().enumerate() {
            let phi = TAU * cfo * i as f32;
            *sample *= IQSample::new(phi.cos(), phi.sin());
        }

        let estimate = estimate_offsets(&mut fixture.detector(), &iq, 2, advance);
        assert!(
            (estimate.cfo - cfo).abs() < 1.0 / (n as f32 * n as f32),
            "estimated {} expected {}",
            estimate.cfo,
            cfo
        );
        // The quadratic refinement underestimates mid-bin offsets, so the
        // timing residue only has sub-sample accuracy.
        assert!(estimate.time_offset.abs() < 0.5);
    }

    #[test]
    fn oversampled_subchip_delay_uses_the_subphase() {
        let n = 64;
        let osr = 4;
        let mut fixture = Fixture::new(n, osr);
        let advance = symbol_phase_advance(n, osr, 1.0);

        // One oversampled sample late: a quarter of a base-rate sample,
        // below what the quadratic refinement resolves reliably.
        let clean = modulate_symbols(n, osr, &[0, 0]);
        let mut delayed = vec![IQSample::new(0.0, 0.0); clean.len()];
        delayed[1..].copy_from_slice(&clean[..clean.len() - 1]);

        let estimate = estimate_offsets(&mut fixture.detector(), &delayed, 2, advance);
        // The winning sub-phase pins the correction to the oversampled grid.
        assert_relative_eq!(estimate.time_offset, -0.25, epsilon = 1e-3);
        assert!(estimate.cfo.abs() < 1.0 / n as f32);
    }

    #[test]
    fn estimates_injected_integer_delay() {
        let n = 128;
        let mut fixture = Fixture::new(n, 1);
        let advance = symbol_phase_advance(n, 1, 1.0);
        let delay = 3usize;

        let clean = modulate_symbols(n, 1, &[0, 0, 0]);
        let mut delayed = vec![IQSample::new(0.0, 0.0); clean.len()];
        delayed[delay..].copy_from_slice(&clean[..clean.len() - delay]);

        let estimate = estimate_offsets(&mut fixture.detector(), &delayed, 3, advance);
        // A late stream needs advancing: negative correction.
        assert_relative_eq!(estimate.time_offset, -(delay as f32), epsilon = 0.1);
        assert!(estimate.cfo.abs() < 1.0 / n as f32);
    }
}
