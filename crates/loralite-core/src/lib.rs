//! # loralite-core
//!
//! A lightweight LoRa physical-layer modem: the transmit chain turns a byte
//! payload into complex baseband samples, the receive chain recovers
//! symbols and bytes under carrier frequency offset and timing error, and a
//! Hamming(8,4) / diagonal-interleaver codec links the two. A thin LoRaWAN
//! framing shim rides on top.
//!
//! ## Signal flow
//!
//! ```text
//! TX: bytes -> whiten -> Hamming FEC -> interleave -> chirp modulate -> I/Q
//! RX: I/Q -> offset estimate -> dechirp + FFT -> de-interleave -> FEC -> bytes
//! ```
//!
//! ## Example
//!
//! ```
//! use loralite_core::{Params, Workspace};
//!
//! let params = Params::builder()
//!     .spreading_factor(7)
//!     .bandwidth(125_000)
//!     .coding_rate(1)
//!     .build()
//!     .unwrap();
//! let mut ws = Workspace::init(params).unwrap();
//!
//! let payload = [0xDE, 0xAD, 0xBE, 0xEF];
//! let mut symbols = vec![0u16; ws.required_symbols(payload.len())];
//! let count = ws.encode(&payload, &mut symbols).unwrap();
//!
//! let mut iq = vec![loralite_core::IQSample::new(0.0, 0.0); ws.required_samples(count)];
//! let produced = ws.modulate(&symbols[..count], &mut iq).unwrap();
//!
//! let mut received = vec![0u16; count];
//! ws.demodulate(&iq[..produced], &mut received).unwrap();
//! assert_eq!(received, symbols);
//! ```
//!
//! All buffers a call reads or writes are supplied by the caller; after
//! [`Workspace::init`] returns, no operation in this crate allocates. This
//! keeps the modem usable from realtime loops and makes the allocation
//! behaviour a testable contract.

pub mod chirp;
pub mod coding;
pub mod demodulation;
pub mod fft;
pub mod lorawan;
pub mod modulation;
pub mod params;
pub mod phy;
pub mod types;
pub mod whitening;

pub use params::{Bandwidth, CodingRate, Params, SpreadingFactor, WindowKind};
pub use phy::Workspace;
pub use types::{IQSample, Metrics, ModemError, ModemResult, Symbol};
