//! Symbol modulation.
//!
//! Each symbol `k` becomes one upchirp whose sweep starts `k` bins up, so
//! after dechirping the receiver sees a tone in FFT bin `k`. The modulator
//! keeps one running phase accumulator for the whole burst; symbols are
//! phase-continuous, which the receiver's fine CFO estimate relies on.
//!
//! An optional preamble of plain upchirps followed by downchirps can be
//! prepended for offset-estimation and channel tests.

use std::f32::consts::TAU;

use crate::chirp::gen_chirp;
use crate::params::Params;
use crate::types::{IQSample, ModemError, ModemResult, Symbol};

/// Chirp modulator. Owns nothing but derived constants and the running
/// phase, so it can live inside a preallocated workspace.
#[derive(Debug, Clone)]
pub struct Modulator {
    n: usize,
    osr: usize,
    bw_scale: f32,
    amplitude: f32,
    preamble_up: usize,
    preamble_down: usize,
    phase: f32,
}

impl Modulator {
    pub fn new(params: &Params) -> Self {
        Self {
            n: params.chips_per_symbol(),
            osr: params.osr,
            bw_scale: params.bw.chirp_scale(),
            amplitude: params.amplitude,
            preamble_up: params.preamble_up,
            preamble_down: params.preamble_down,
            phase: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Samples required to modulate `symbol_count` symbols, preamble
    /// included.
    pub fn required_samples(&self, symbol_count: usize) -> usize {
        (self.preamble_up + self.preamble_down + symbol_count) * self.n * self.osr
    }

    /// Write the burst for `symbols` into `iq` and return the number of
    /// samples produced.
    pub fn modulate(&mut self, symbols: &[Symbol], iq: &mut [IQSample]) -> ModemResult<usize> {
        let step = self.n * self.osr;
        let needed = self.required_samples(symbols.len());
        if iq.len() < needed {
            return Err(ModemError::CapacityTooSmall {
                needed,
                have: iq.len(),
            });
        }

        self.phase = 0.0;
        let mut pos = 0;
        for _ in 0..self.preamble_up {
            gen_chirp(
                &mut iq[pos..pos + step],
                self.n,
                self.osr,
                0.0,
                false,
                self.amplitude,
                &mut self.phase,
                self.bw_scale,
            );
            pos += step;
        }
        for _ in 0..self.preamble_down {
            gen_chirp(
                &mut iq[pos..pos + step],
                self.n,
                self.osr,
                0.0,
                true,
                self.amplitude,
                &mut self.phase,
                self.bw_scale,
            );
            pos += step;
        }
        for &symbol in symbols {
            let freq = TAU * symbol as f32 / step as f32;
            gen_chirp(
                &mut iq[pos..pos + step],
                self.n,
                self.osr,
                freq,
                false,
                self.amplitude,
                &mut self.phase,
                self.bw_scale,
            );
            pos += step;
        }
        Ok(pos)
    }
}
