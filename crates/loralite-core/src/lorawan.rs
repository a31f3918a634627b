//! LoRaWAN framing shim.
//!
//! A thin MHDR/FHDR wrapper around the PHY, exercising the encode/decode
//! contract end to end:
//!
//! ```text
//! MHDR(1) | DevAddr(4, LE) | FCtrl(1) | FCnt(2, LE) | FOpts(0..15) | FRMPayload | MIC(4, LE)
//! ```
//!
//! The low nibble of FCtrl carries the FOpts length and must match the
//! actual option bytes; that is the invariant connecting build and parse.
//! The MIC is a CRC-32 stand-in for the AES-128 CMAC of real LoRaWAN: same
//! position, same length, so the upgrade path is mechanical.
//!
//! The PHY pads codewords up to whole interleaver blocks and cannot carry
//! the original byte count, so `parse_frame` recovers the frame end by
//! checking the MIC at each candidate length within the pad range.

use crate::params::Params;
use crate::phy::Workspace;
use crate::types::{ModemError, Symbol};

/// Frame-layer result type.
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors reported by the framing shim. An integrity failure is distinct
/// from a malformed or truncated byte layout, and both are distinct from
/// the PHY's own argument/capacity/shape errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame options too long: {0} bytes, at most 15")]
    FoptsTooLong(usize),

    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("message integrity check failed")]
    MicMismatch,

    #[error(transparent)]
    Modem(#[from] ModemError),
}

/// LoRaWAN message type, the top three MHDR bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest = 0,
    JoinAccept = 1,
    UnconfirmedDataUp = 2,
    UnconfirmedDataDown = 3,
    ConfirmedDataUp = 4,
    ConfirmedDataDown = 5,
    RejoinRequest = 6,
    Proprietary = 7,
}

impl MType {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x7 {
            0 => Self::JoinRequest,
            1 => Self::JoinAccept,
            2 => Self::UnconfirmedDataUp,
            3 => Self::UnconfirmedDataDown,
            4 => Self::ConfirmedDataUp,
            5 => Self::ConfirmedDataDown,
            6 => Self::RejoinRequest,
            _ => Self::Proprietary,
        }
    }

    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// MAC header: message type and major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr {
    pub mtype: MType,
    pub major: u8,
}

/// Frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fhdr {
    pub devaddr: u32,
    /// Frame control byte; the low nibble must equal `fopts.len()`.
    pub fctrl: u8,
    pub fcnt: u16,
    pub fopts: Vec<u8>,
}

/// A complete uplink/downlink frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub mhdr: Mhdr,
    pub fhdr: Fhdr,
    pub payload: Vec<u8>,
}

/// Minimum serialised frame: MHDR, DevAddr, FCtrl, FCnt and MIC.
const MIN_FRAME_BYTES: usize = 1 + 4 + 1 + 2 + 4;

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

/// Message integrity code over the serialised frame body.
pub fn compute_mic(data: &[u8]) -> u32 {
    crc32(data)
}

/// Serialise a frame, MIC included.
pub fn serialize_frame(frame: &Frame) -> FrameResult<Vec<u8>> {
    if frame.fhdr.fopts.len() > 15 {
        return Err(FrameError::FoptsTooLong(frame.fhdr.fopts.len()));
    }

    let mut bytes = Vec::with_capacity(MIN_FRAME_BYTES + frame.fhdr.fopts.len() + frame.payload.len());
    bytes.push((frame.mhdr.mtype.value() << 5) | (frame.mhdr.major & 0x3));
    bytes.extend_from_slice(&frame.fhdr.devaddr.to_le_bytes());
    bytes.push((frame.fhdr.fctrl & 0xF0) | (frame.fhdr.fopts.len() as u8 & 0x0F));
    bytes.extend_from_slice(&frame.fhdr.fcnt.to_le_bytes());
    bytes.extend_from_slice(&frame.fhdr.fopts);
    bytes.extend_from_slice(&frame.payload);

    let mic = compute_mic(&bytes);
    bytes.extend_from_slice(&mic.to_le_bytes());
    Ok(bytes)
}

/// Serialise `frame` and encode it into PHY symbols. Returns the symbol
/// count.
pub fn build_frame(
    ws: &mut Workspace,
    frame: &Frame,
    symbols: &mut [Symbol],
) -> FrameResult<usize> {
    let bytes = serialize_frame(frame)?;
    Ok(ws.encode(&bytes, symbols)?)
}

/// Decode PHY symbols and deserialise the frame they carry.
///
/// The MIC is located by scanning the candidate frame lengths left open by
/// PHY codeword padding; if none validates the frame is rejected with
/// [`FrameError::MicMismatch`].
pub fn parse_frame(ws: &mut Workspace, symbols: &[Symbol]) -> FrameResult<Frame> {
    let decoded = {
        let mut bytes = vec![0u8; decoded_capacity(ws.params(), symbols.len())];
        let produced = ws.decode(symbols, &mut bytes)?;
        bytes.truncate(produced);
        bytes
    };
    if decoded.len() < MIN_FRAME_BYTES {
        return Err(FrameError::TooShort(decoded.len()));
    }

    let sf = ws.params().sf.value() as usize;
    let max_pad_bytes = (sf - 1).div_ceil(2);
    let shortest = decoded.len().saturating_sub(max_pad_bytes).max(MIN_FRAME_BYTES);
    for len in (shortest..=decoded.len()).rev() {
        let provided = u32::from_le_bytes(decoded[len - 4..len].try_into().unwrap());
        if provided == compute_mic(&decoded[..len - 4]) {
            return deserialize_frame(&decoded[..len]);
        }
    }
    Err(FrameError::MicMismatch)
}

fn decoded_capacity(params: &Params, symbol_count: usize) -> usize {
    let width = params.symbols_per_block();
    let sf = params.sf.value() as usize;
    (symbol_count / width.max(1) * sf).div_ceil(2) + 1
}

fn deserialize_frame(bytes: &[u8]) -> FrameResult<Frame> {
    let len = bytes.len();
    let mhdr = bytes[0];
    let devaddr = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    let fctrl = bytes[5];
    let fcnt = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
    let fopts_len = (fctrl & 0x0F) as usize;
    if 8 + fopts_len > len - 4 {
        return Err(FrameError::TooShort(len));
    }

    Ok(Frame {
        mhdr: Mhdr {
            mtype: MType::from_u8(mhdr >> 5),
            major: mhdr & 0x3,
        },
        fhdr: Fhdr {
            devaddr,
            fctrl,
            fcnt,
            fopts: bytes[8..8 + fopts_len].to_vec(),
        },
        payload: bytes[8 + fopts_len..len - 4].to_vec(),
    })
}
