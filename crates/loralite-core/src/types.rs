//! Core types shared across the modem.
//!
//! Baseband signals are complex I/Q samples: the real part is the in-phase
//! component, the imaginary part the quadrature component. The modem works in
//! single precision throughout, which is what SDR front ends deliver and what
//! keeps the per-symbol FFT cheap.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// A single complex baseband sample.
pub type IQSample = Complex<f32>;

/// A LoRa symbol: an integer in `[0, 2^sf)`.
///
/// Every symbol produced by the TX chain or accepted by the RX chain is
/// strictly less than the chip count `N = 2^sf`.
pub type Symbol = u16;

/// Result type for modem operations.
pub type ModemResult<T> = Result<T, ModemError>;

/// Errors reported by the modem core.
///
/// Three kinds matter to callers: invalid configuration, an output buffer
/// that is too small for the computed result, and an input whose shape does
/// not match the configured symbol geometry. Decode-quality problems (failed
/// checksum, uncorrectable codewords) are *not* errors; they are reported
/// through [`Metrics`] so partial frames can still be inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ModemError {
    #[error("invalid spreading factor: {0}, must be between 7 and 12")]
    InvalidSpreadingFactor(u8),

    #[error("invalid bandwidth: {0} Hz, must be 125000, 250000 or 500000")]
    InvalidBandwidth(u32),

    #[error("invalid coding rate: {0}, must be between 1 and 4")]
    InvalidCodingRate(u8),

    #[error("invalid oversampling ratio: {0}, must be at least 1")]
    InvalidOversampling(usize),

    #[error("output capacity too small: need {needed}, have {have}")]
    CapacityTooSmall { needed: usize, have: usize },

    #[error("sample count {count} is not a multiple of the symbol span {span}")]
    SampleShape { count: usize, span: usize },

    #[error("symbol count {count} is not a multiple of the block size {block}")]
    SymbolShape { count: usize, block: usize },
}

/// Receive-quality metrics, overwritten by every demodulate/decode call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Whether the trailing data checksum of the last decode matched.
    pub crc_ok: bool,
    /// Estimated carrier frequency offset in cycles per base-rate sample.
    /// One FFT bin corresponds to `1/N`.
    pub cfo: f32,
    /// Timing correction in base-rate samples. Positive delays the stream,
    /// negative advances it.
    pub time_offset: f32,
    /// Codewords with a detected error that decode repaired.
    pub fec_corrected: u32,
    /// Codewords flagged uncorrectable by the last decode.
    pub fec_uncorrectable: u32,
}
