//! Chirp generation.
//!
//! A chirp is a complex sinusoid whose instantaneous frequency moves linearly
//! with time. LoRa encodes a symbol `k` as an upchirp whose sweep starts
//! `k` bins above the base frequency; the receiver undoes the sweep by
//! multiplying with a downchirp, collapsing each symbol into a single tone
//! that an FFT picks out.
//!
//! ```text
//! freq                         freq
//!   |        ___/                |  \___
//!   |     __/                    |      \__
//!   |  __/            vs         |         \__
//!   |_/                          |            \___
//!   +---------> time             +---------> time
//!       upchirp                      downchirp
//! ```
//!
//! The generator integrates instantaneous frequency into a running phase
//! accumulator owned by the caller. Keeping the accumulator across calls
//! makes consecutive symbols phase-continuous, which the receiver's
//! phase-difference CFO refinement depends on.

use std::f32::consts::{PI, TAU};

use crate::types::IQSample;

/// Phase advance accumulated by one `n * osr` sample chirp, modulo 2π.
///
/// The symbol-dependent part of the sweep contributes an exact multiple of
/// 2π, so the advance depends only on the geometry. The offset estimator
/// subtracts this constant from measured inter-symbol phase differences.
pub fn symbol_phase_advance(n: usize, osr: usize, bw_scale: f32) -> f32 {
    let step = (n * osr) as f64;
    let advance = std::f64::consts::PI * bw_scale as f64 * (step - 1.0);
    wrap_phase(advance.rem_euclid(std::f64::consts::TAU) as f32)
}

/// Wrap a phase into `(-PI, PI]`.
pub fn wrap_phase(mut phase: f32) -> f32 {
    while phase > PI {
        phase -= TAU;
    }
    while phase <= -PI {
        phase += TAU;
    }
    phase
}

/// Write one chirp of `n * osr` samples into `out`.
///
/// The instantaneous angular frequency sweeps from `freq_offset` to
/// `freq_offset + 2π * bw_scale` for an upchirp, or with the negated slope
/// for a downchirp. Frequencies beyond Nyquist alias, which is exactly the
/// cyclic wrap the modulation relies on. `phase` is the caller's running
/// accumulator; on return it has advanced by the chirp's total phase, wrapped
/// to `(-PI, PI]`.
///
/// Symbol `k` is produced by passing `freq_offset = 2π * k / (n * osr)`.
#[allow(clippy::too_many_arguments)]
pub fn gen_chirp(
    out: &mut [IQSample],
    n: usize,
    osr: usize,
    freq_offset: f32,
    down: bool,
    amplitude: f32,
    phase: &mut f32,
    bw_scale: f32,
) {
    let step = n * osr;
    debug_assert_eq!(out.len(), step);

    let slope = if down { -1.0 } else { 1.0 } * TAU * bw_scale / step as f32;
    let mut freq = freq_offset;
    for sample in out.iter_mut() {
        *sample = IQSample::new(amplitude * phase.cos(), amplitude * phase.sin());
        *phase = wrap_phase(*phase + freq);
        freq += slope;
    }
}
