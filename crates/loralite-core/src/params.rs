//! Modem parameters and configuration.
//!
//! ## The three LoRa knobs
//!
//! **Spreading factor** sets the symbol alphabet: a symbol carries `sf` bits
//! and spans `2^sf` chips, so each step up doubles the symbol time and buys
//! roughly 2.5 dB of sensitivity.
//!
//! **Bandwidth** sets the chip rate. The sample grid is chip-synchronous
//! (`osr` samples per chip), so in normalised units the bandwidth tag only
//! scales the chirp slope; in wall-clock terms it decides how fast a symbol
//! goes over the air.
//!
//! **Coding rate** sets the Hamming redundancy: each nibble becomes a
//! `4 + cr` bit codeword, from single-parity (4/5) to the full Hamming(8,4)
//! (4/8) that corrects single bit errors per codeword.
//!
//! Parameters are immutable once a workspace is initialised; build them with
//! [`Params::builder`] and hand them to `Workspace::init`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ModemError, ModemResult};

/// Spreading factor, SF7 through SF12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpreadingFactor {
    SF7 = 7,
    SF8 = 8,
    SF9 = 9,
    SF10 = 10,
    SF11 = 11,
    SF12 = 12,
}

impl SpreadingFactor {
    pub fn from_u8(value: u8) -> ModemResult<Self> {
        match value {
            7 => Ok(Self::SF7),
            8 => Ok(Self::SF8),
            9 => Ok(Self::SF9),
            10 => Ok(Self::SF10),
            11 => Ok(Self::SF11),
            12 => Ok(Self::SF12),
            _ => Err(ModemError::InvalidSpreadingFactor(value)),
        }
    }

    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Chips per symbol, `N = 2^sf`.
    pub fn chips_per_symbol(&self) -> usize {
        1 << self.value()
    }
}

impl fmt::Display for SpreadingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SF{}", self.value())
    }
}

impl Default for SpreadingFactor {
    fn default() -> Self {
        Self::SF7
    }
}

/// Channel bandwidth tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bandwidth {
    Bw125kHz = 125_000,
    Bw250kHz = 250_000,
    Bw500kHz = 500_000,
}

impl Bandwidth {
    pub fn from_hz(hz: u32) -> ModemResult<Self> {
        match hz {
            125_000 => Ok(Self::Bw125kHz),
            250_000 => Ok(Self::Bw250kHz),
            500_000 => Ok(Self::Bw500kHz),
            _ => Err(ModemError::InvalidBandwidth(hz)),
        }
    }

    pub fn hz(&self) -> f64 {
        *self as u32 as f64
    }

    /// Chirp slope multiplier relative to the 125 kHz reference grid.
    pub fn chirp_scale(&self) -> f32 {
        (self.hz() / Bandwidth::Bw125kHz.hz()) as f32
    }
}

impl Default for Bandwidth {
    fn default() -> Self {
        Self::Bw125kHz
    }
}

/// Coding rate, expressed as the number of redundancy bits per nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodingRate {
    /// 4/5, one parity bit.
    CR4_5 = 1,
    /// 4/6, two parity bits.
    CR4_6 = 2,
    /// 4/7, Hamming(7,4).
    CR4_7 = 3,
    /// 4/8, full Hamming(8,4).
    CR4_8 = 4,
}

impl CodingRate {
    pub fn from_u8(value: u8) -> ModemResult<Self> {
        match value {
            1 => Ok(Self::CR4_5),
            2 => Ok(Self::CR4_6),
            3 => Ok(Self::CR4_7),
            4 => Ok(Self::CR4_8),
            _ => Err(ModemError::InvalidCodingRate(value)),
        }
    }

    /// Redundancy bit count (`rdd`).
    pub fn redundancy(&self) -> usize {
        *self as usize
    }

    /// Codeword width in bits, `4 + rdd`.
    pub fn codeword_bits(&self) -> usize {
        4 + self.redundancy()
    }
}

impl fmt::Display for CodingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "4/{}", 4 + self.redundancy())
    }
}

impl Default for CodingRate {
    fn default() -> Self {
        Self::CR4_5
    }
}

/// Detection window applied to the dechirped symbol before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    /// No windowing, rectangular.
    None,
    /// Hann window, trades peak sharpness for lower leakage.
    Hann,
}

impl Default for WindowKind {
    fn default() -> Self {
        Self::None
    }
}

/// Complete modem configuration, copied into the workspace at init time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub sf: SpreadingFactor,
    pub bw: Bandwidth,
    pub cr: CodingRate,
    /// Oversampling ratio: samples per chip, at least 1.
    pub osr: usize,
    /// Detection window choice.
    pub window: WindowKind,
    /// Whether payload bytes are whitened before FEC.
    pub whitening: bool,
    /// Chirp amplitude.
    pub amplitude: f32,
    /// Upchirps prepended by `modulate` ahead of the payload.
    pub preamble_up: usize,
    /// Downchirps following the preamble upchirps.
    pub preamble_down: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            sf: SpreadingFactor::default(),
            bw: Bandwidth::default(),
            cr: CodingRate::default(),
            osr: 1,
            window: WindowKind::default(),
            whitening: false,
            amplitude: 1.0,
            preamble_up: 0,
            preamble_down: 0,
        }
    }
}

impl Params {
    pub fn builder() -> ParamsBuilder {
        ParamsBuilder::default()
    }

    /// Chips per symbol, `N = 2^sf`.
    pub fn chips_per_symbol(&self) -> usize {
        self.sf.chips_per_symbol()
    }

    /// Samples per symbol on the oversampled grid, `N * osr`.
    pub fn samples_per_symbol(&self) -> usize {
        self.chips_per_symbol() * self.osr
    }

    /// Symbols per interleaver block, `4 + rdd`.
    pub fn symbols_per_block(&self) -> usize {
        self.cr.codeword_bits()
    }

    /// Preamble length in samples.
    pub fn preamble_samples(&self) -> usize {
        (self.preamble_up + self.preamble_down) * self.samples_per_symbol()
    }

    pub fn validate(&self) -> ModemResult<()> {
        if self.osr < 1 {
            return Err(ModemError::InvalidOversampling(self.osr));
        }
        Ok(())
    }
}

/// Builder for [`Params`], accepting raw values as a CLI or config file
/// would provide them.
#[derive(Debug, Default)]
pub struct ParamsBuilder {
    sf: Option<u8>,
    bw: Option<u32>,
    cr: Option<u8>,
    params: Params,
}

impl ParamsBuilder {
    pub fn spreading_factor(mut self, sf: u8) -> Self {
        self.sf = Some(sf);
        self
    }

    pub fn bandwidth(mut self, bw_hz: u32) -> Self {
        self.bw = Some(bw_hz);
        self
    }

    pub fn coding_rate(mut self, cr: u8) -> Self {
        self.cr = Some(cr);
        self
    }

    pub fn oversampling(mut self, osr: usize) -> Self {
        self.params.osr = osr;
        self
    }

    pub fn window(mut self, window: WindowKind) -> Self {
        self.params.window = window;
        self
    }

    pub fn whitening(mut self, enabled: bool) -> Self {
        self.params.whitening = enabled;
        self
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.params.amplitude = amplitude;
        self
    }

    pub fn preamble(mut self, up: usize, down: usize) -> Self {
        self.params.preamble_up = up;
        self.params.preamble_down = down;
        self
    }

    pub fn build(mut self) -> ModemResult<Params> {
        if let Some(sf) = self.sf {
            self.params.sf = SpreadingFactor::from_u8(sf)?;
        }
        if let Some(bw) = self.bw {
            self.params.bw = Bandwidth::from_hz(bw)?;
        }
        if let Some(cr) = self.cr {
            self.params.cr = CodingRate::from_u8(cr)?;
        }
        self.params.validate()?;
        Ok(self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chips_per_symbol() {
        assert_eq!(SpreadingFactor::SF7.chips_per_symbol(), 128);
        assert_eq!(SpreadingFactor::SF12.chips_per_symbol(), 4096);
    }

    #[test]
    fn builder_accepts_valid_ranges() {
        let params = Params::builder()
            .spreading_factor(9)
            .bandwidth(250_000)
            .coding_rate(4)
            .oversampling(2)
            .build()
            .unwrap();
        assert_eq!(params.chips_per_symbol(), 512);
        assert_eq!(params.samples_per_symbol(), 1024);
        assert_eq!(params.symbols_per_block(), 8);
    }

    #[test]
    fn builder_rejects_out_of_range() {
        assert_eq!(
            Params::builder().spreading_factor(6).build(),
            Err(ModemError::InvalidSpreadingFactor(6))
        );
        assert_eq!(
            Params::builder().bandwidth(200_000).build(),
            Err(ModemError::InvalidBandwidth(200_000))
        );
        assert_eq!(
            Params::builder().coding_rate(5).build(),
            Err(ModemError::InvalidCodingRate(5))
        );
        assert_eq!(
            Params::builder().oversampling(0).build(),
            Err(ModemError::InvalidOversampling(0))
        );
    }

    #[test]
    fn chirp_scale_tracks_bandwidth() {
        assert_eq!(Bandwidth::Bw125kHz.chirp_scale(), 1.0);
        assert_eq!(Bandwidth::Bw500kHz.chirp_scale(), 4.0);
    }
}
