//! IQ stream and vector file I/O.
//!
//! The wire format for sample streams is interleaved little-endian
//! `f32 real, f32 imag` with no framing; CSV vector files carry one value
//! (or one `real,imag` pair) per line.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use loralite_core::IQSample;

/// Read interleaved `f32` IQ pairs until EOF. A trailing unpaired float is
/// dropped, matching the stream contract.
pub fn read_iq_stream<R: Read>(reader: &mut R) -> io::Result<Vec<IQSample>> {
    let mut samples = Vec::new();
    loop {
        let re = match reader.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let im = match reader.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        samples.push(IQSample::new(re, im));
    }
    Ok(samples)
}

/// Write interleaved `f32` IQ pairs.
pub fn write_iq_stream<W: Write>(writer: &mut W, samples: &[IQSample]) -> io::Result<()> {
    for sample in samples {
        writer.write_f32::<LittleEndian>(sample.re)?;
        writer.write_f32::<LittleEndian>(sample.im)?;
    }
    Ok(())
}

/// One decimal value per line.
pub fn write_decimal_csv<W: Write, T: std::fmt::Display>(
    writer: &mut W,
    values: &[T],
) -> io::Result<()> {
    for value in values {
        writeln!(writer, "{}", value)?;
    }
    Ok(())
}

/// One `real,imag` pair per line, with enough digits to reproduce the
/// sample to better than 1e-6 relative.
pub fn write_iq_csv<W: Write>(writer: &mut W, samples: &[IQSample]) -> io::Result<()> {
    for sample in samples {
        writeln!(writer, "{},{}", sample.re, sample.im)?;
    }
    Ok(())
}

/// Parse a hex payload string such as `deadbeef`.
pub fn parse_hex(hex: &str) -> anyhow::Result<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        anyhow::bail!("payload hex must have even length, got {}", hex.len());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| anyhow::anyhow!("bad hex byte {:?}: {}", &hex[i..i + 2], e))
        })
        .collect()
}

/// Render bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
