//! The modem workspace: the public PHY surface.
//!
//! A [`Workspace`] is initialised once from [`Params`] and then drives the
//! whole TX/RX chain through preallocated state:
//!
//! ```text
//! TX: encode  (whiten -> nibbles -> Hamming -> pad -> interleave)
//!     modulate (symbols -> phase-continuous chirps, optional preamble)
//! RX: demodulate (estimate offsets -> derotate -> dechirp+FFT per symbol)
//!     decode  (deinterleave -> FEC -> bytes -> dewhiten -> checksum)
//! ```
//!
//! After `init` returns, no operation allocates: the FFT plan, the reference
//! downchirp and all scratch buffers are owned by the workspace, and
//! per-block staging uses fixed arrays. A workspace is single-threaded;
//! distinct workspaces over disjoint buffers may run on distinct threads.
//!
//! Decode-quality outcomes (checksum, FEC flags) and the offset estimates
//! are reported through [`Metrics`], refreshed by every demodulate, decode
//! or estimate call and readable via [`Workspace::last_metrics`].

use std::f32::consts::TAU;

use crate::chirp::{gen_chirp, symbol_phase_advance};
use crate::coding::{
    decode_codeword, deinterleave_block, encode_codeword, interleave_block, sx1272_data_checksum,
    MAX_CODEWORD_BITS, MAX_SF,
};
use crate::demodulation::{estimate_offsets, Detector, OffsetEstimate};
use crate::fft::FftPlan;
use crate::modulation::Modulator;
use crate::params::{Params, WindowKind};
use crate::types::{IQSample, Metrics, ModemError, ModemResult, Symbol};
use crate::whitening::Whitening;

/// A fully initialised modem instance.
#[derive(Debug)]
pub struct Workspace {
    params: Params,
    n: usize,
    step: usize,
    expected_advance: f32,
    plan: FftPlan,
    downchirp: Vec<IQSample>,
    window: Option<Vec<f32>>,
    fft_in: Vec<IQSample>,
    fft_out: Vec<IQSample>,
    modulator: Modulator,
    whitening: Whitening,
    metrics: Metrics,
}

impl Workspace {
    /// Validate `params`, build the FFT plans, the reference downchirp and
    /// the scratch buffers. This is the only place the core allocates.
    pub fn init(params: Params) -> ModemResult<Self> {
        params.validate()?;
        let n = params.chips_per_symbol();
        let step = params.samples_per_symbol();
        let bw_scale = params.bw.chirp_scale();

        let mut downchirp = vec![IQSample::new(0.0, 0.0); step];
        let mut phase = 0.0;
        gen_chirp(&mut downchirp, n, params.osr, 0.0, true, 1.0, &mut phase, bw_scale);

        let window = match params.window {
            WindowKind::None => None,
            WindowKind::Hann => Some(
                (0..n)
                    .map(|m| 0.5 * (1.0 - (TAU * m as f32 / n as f32).cos()))
                    .collect(),
            ),
        };

        Ok(Self {
            n,
            step,
            expected_advance: symbol_phase_advance(n, params.osr, bw_scale),
            plan: FftPlan::new(n),
            downchirp,
            window,
            fft_in: vec![IQSample::new(0.0, 0.0); n],
            fft_out: vec![IQSample::new(0.0, 0.0); n],
            modulator: Modulator::new(&params),
            whitening: Whitening::new(),
            metrics: Metrics::default(),
            params,
        })
    }

    /// Clear metrics and sequence state; plans and buffers are preserved.
    pub fn reset(&mut self) {
        self.metrics = Metrics::default();
        self.whitening.reset();
        self.modulator.reset();
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Samples per symbol on the oversampled grid.
    pub fn samples_per_symbol(&self) -> usize {
        self.step
    }

    /// Metrics of the most recent demodulate/decode/estimate call.
    pub fn last_metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Symbols produced by [`Workspace::encode`] for a payload of
    /// `payload_len` bytes: codewords are padded up to a whole number of
    /// `sf`-row interleaver blocks, each yielding `4 + rdd` symbols.
    pub fn required_symbols(&self, payload_len: usize) -> usize {
        let sf = self.params.sf.value() as usize;
        (payload_len * 2).div_ceil(sf) * self.params.symbols_per_block()
    }

    /// Samples produced by [`Workspace::modulate`] for `symbol_count`
    /// symbols, preamble included.
    pub fn required_samples(&self, symbol_count: usize) -> usize {
        self.modulator.required_samples(symbol_count)
    }

    /// Encode payload bytes into symbols. Returns the symbol count.
    pub fn encode(&mut self, payload: &[u8], symbols: &mut [Symbol]) -> ModemResult<usize> {
        let sf = self.params.sf.value() as usize;
        let rdd = self.params.cr.redundancy();
        let width = self.params.symbols_per_block();

        let nibbles = payload.len() * 2;
        let blocks = nibbles.div_ceil(sf);
        let needed = blocks * width;
        if symbols.len() < needed {
            return Err(ModemError::CapacityTooSmall {
                needed,
                have: symbols.len(),
            });
        }

        self.whitening.reset();
        let mut cw_block = [0u8; MAX_SF];
        let mut current = 0u8;
        let mut out_pos = 0;
        for i in 0..blocks * sf {
            // High nibble first; pad codewords past the payload are zero.
            cw_block[i % sf] = if i < nibbles {
                let nibble = if i % 2 == 0 {
                    current = payload[i / 2];
                    if self.params.whitening {
                        current ^= self.whitening.next_byte();
                    }
                    current >> 4
                } else {
                    current & 0x0F
                };
                encode_codeword(nibble, rdd)
            } else {
                0
            };
            if i % sf == sf - 1 {
                interleave_block(
                    &cw_block[..sf],
                    &mut symbols[out_pos..out_pos + width],
                    sf,
                    rdd,
                );
                out_pos += width;
            }
        }
        Ok(out_pos)
    }

    /// Modulate symbols into complex baseband samples. Returns the sample
    /// count, preamble included.
    pub fn modulate(&mut self, symbols: &[Symbol], iq: &mut [IQSample]) -> ModemResult<usize> {
        self.modulator.modulate(symbols, iq)
    }

    /// Demodulate samples into symbols. Returns the symbol count.
    ///
    /// The input length must be a whole number of symbol spans. The first
    /// two windows feed the offset estimator and the estimated CFO is
    /// derotated inline before detection, so callers do not need a separate
    /// compensation pass. Timing corrections are applied only through
    /// [`Workspace::compensate_offsets`], which requires the leading
    /// windows to be known upchirps.
    pub fn demodulate(&mut self, iq: &[IQSample], symbols: &mut [Symbol]) -> ModemResult<usize> {
        if iq.len() % self.step != 0 {
            return Err(ModemError::SampleShape {
                count: iq.len(),
                span: self.step,
            });
        }
        let num_symbols = iq.len() / self.step;
        if symbols.len() < num_symbols {
            return Err(ModemError::CapacityTooSmall {
                needed: num_symbols,
                have: symbols.len(),
            });
        }
        if num_symbols == 0 {
            self.metrics.cfo = 0.0;
            self.metrics.time_offset = 0.0;
            return Ok(0);
        }

        let estimate = self.run_estimator(iq, num_symbols);
        self.metrics.cfo = estimate.cfo;
        self.metrics.time_offset = estimate.time_offset;

        let rate = -TAU * estimate.cfo / self.params.osr as f32;
        let step = self.step;
        let mut detector = Detector {
            n: self.n,
            osr: self.params.osr,
            plan: &mut self.plan,
            downchirp: &self.downchirp,
            window: self.window.as_deref(),
            fft_in: &mut self.fft_in,
            fft_out: &mut self.fft_out,
        };
        for (s, symbol) in symbols.iter_mut().take(num_symbols).enumerate() {
            let base = s * step;
            let detection = detector.detect(&iq[base..base + step], rate, rate * base as f32);
            *symbol = detection.index as Symbol;
        }
        Ok(num_symbols)
    }

    /// Decode symbols back into bytes. Returns the byte count, including
    /// any bytes arising from TX-side pad codewords; the caller truncates.
    ///
    /// The data checksum is verified over `bytes[2..len-2]` against the
    /// little-endian CRC-16 in the last two bytes and reported via
    /// [`Metrics::crc_ok`]; uncorrectable codewords never fail the call.
    pub fn decode(&mut self, symbols: &[Symbol], payload: &mut [u8]) -> ModemResult<usize> {
        let sf = self.params.sf.value() as usize;
        let rdd = self.params.cr.redundancy();
        let width = self.params.symbols_per_block();
        if symbols.len() % width != 0 {
            return Err(ModemError::SymbolShape {
                count: symbols.len(),
                block: width,
            });
        }
        let blocks = symbols.len() / width;
        let produced = (blocks * sf).div_ceil(2);
        if payload.len() < produced {
            return Err(ModemError::CapacityTooSmall {
                needed: produced,
                have: payload.len(),
            });
        }

        self.whitening.reset();
        let mask = (self.n - 1) as Symbol;
        let mut corrected = 0u32;
        let mut uncorrectable = 0u32;
        let mut sym_block = [0 as Symbol; MAX_CODEWORD_BITS];
        let mut cw_block = [0u8; MAX_SF];
        let mut nibble_idx = 0usize;
        let mut high = 0u8;
        let mut out = 0usize;

        for block in symbols.chunks_exact(width) {
            for (j, &s) in block.iter().enumerate() {
                sym_block[j] = s & mask;
            }
            deinterleave_block(&sym_block[..width], &mut cw_block[..sf], sf, rdd);
            for &cw in &cw_block[..sf] {
                let (nibble, error, bad) = decode_codeword(cw, rdd);
                if bad {
                    uncorrectable += 1;
                } else if error {
                    corrected += 1;
                }
                if nibble_idx % 2 == 0 {
                    high = nibble;
                } else {
                    let mut byte = (high << 4) | nibble;
                    if self.params.whitening {
                        byte ^= self.whitening.next_byte();
                    }
                    payload[out] = byte;
                    out += 1;
                }
                nibble_idx += 1;
            }
        }
        if nibble_idx % 2 == 1 {
            let mut byte = high << 4;
            if self.params.whitening {
                byte ^= self.whitening.next_byte();
            }
            payload[out] = byte;
            out += 1;
        }
        debug_assert_eq!(out, produced);

        self.metrics.crc_ok = if out >= 4 {
            let provided = payload[out - 2] as u16 | ((payload[out - 1] as u16) << 8);
            provided == sx1272_data_checksum(&payload[2..out - 2])
        } else {
            false
        };
        self.metrics.fec_corrected = corrected;
        self.metrics.fec_uncorrectable = uncorrectable;
        Ok(out)
    }

    /// Run the offset estimator over the leading windows of `iq` (expected
    /// to be known upchirps) and store the result in the metrics.
    pub fn estimate_offsets(&mut self, iq: &[IQSample]) -> ModemResult<()> {
        if iq.len() % self.step != 0 {
            return Err(ModemError::SampleShape {
                count: iq.len(),
                span: self.step,
            });
        }
        let num_symbols = iq.len() / self.step;
        let estimate = self.run_estimator(iq, num_symbols);
        self.metrics.cfo = estimate.cfo;
        self.metrics.time_offset = estimate.time_offset;
        Ok(())
    }

    /// Apply the last estimated offsets to `iq` in place: derotate at the
    /// estimated CFO, then shift by the rounded timing correction (positive
    /// delays, negative advances), zero-filling the vacated samples.
    pub fn compensate_offsets(&mut self, iq: &mut [IQSample]) {
        let rate = -TAU * self.metrics.cfo / self.params.osr as f32;
        if rate != 0.0 {
            for (i, sample) in iq.iter_mut().enumerate() {
                let phi = rate * i as f32;
                *sample *= IQSample::new(phi.cos(), phi.sin());
            }
        }

        let shift = (self.metrics.time_offset * self.params.osr as f32).round() as isize;
        let len = iq.len();
        if shift > 0 {
            let shift = (shift as usize).min(len);
            iq.copy_within(0..len - shift, shift);
            iq[..shift].fill(IQSample::new(0.0, 0.0));
        } else if shift < 0 {
            let shift = ((-shift) as usize).min(len);
            iq.copy_within(shift.., 0);
            iq[len - shift..].fill(IQSample::new(0.0, 0.0));
        }
    }

    fn run_estimator(&mut self, iq: &[IQSample], num_symbols: usize) -> OffsetEstimate {
        let mut detector = Detector {
            n: self.n,
            osr: self.params.osr,
            plan: &mut self.plan,
            downchirp: &self.downchirp,
            window: self.window.as_deref(),
            fft_in: &mut self.fft_in,
            fft_out: &mut self.fft_out,
        };
        estimate_offsets(&mut detector, iq, num_symbols, self.expected_advance)
    }
}
