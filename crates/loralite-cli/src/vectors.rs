//! Reference test-vector generation.
//!
//! Dumps the intermediate states of the TX/RX chain for a deterministic,
//! seeded payload so external implementations can cross-check themselves
//! stage by stage:
//!
//! | state            | file                 | format                      |
//! |------------------|----------------------|-----------------------------|
//! | payload          | payload.bin          | raw bytes                   |
//! | pre_interleave   | pre_interleave.csv   | one codeword per line       |
//! | post_interleave  | post_interleave.csv  | one symbol per line         |
//! | iq               | iq_samples.csv       | `real,imag` per line        |
//! | demod            | demod_symbols.csv    | one symbol per line         |
//! | deinterleave     | deinterleave.csv     | one codeword per line       |
//! | decoded          | decoded.bin          | raw bytes                   |
//!
//! Each emitted file is also stored base64-wrapped at 76 columns with a
//! `.b64` suffix, and `manifest.json` lists the wrapped files with their
//! SHA-256 checksums. The codec vectors (`hamming_tests.bin`,
//! `modulation_tests.bin`) use framed little-endian binary records.

use std::collections::BTreeSet;
use std::f32::consts::TAU;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use loralite_core::coding::{decode_hamming84, deinterleave, encode_hamming84, interleave};
use loralite_core::{IQSample, Params, Symbol, WindowKind, Workspace};

use crate::iqio;

/// The vector chain always runs at full redundancy.
const VECTOR_RDD: usize = 4;

/// Settings for one vector set.
pub struct VectorConfig {
    pub sf: u8,
    pub bw: u32,
    pub seed: u64,
    pub bytes: usize,
    pub osr: usize,
    pub window: WindowKind,
    pub cfo_bins: f32,
    pub time_offset: i32,
    pub out_dir: PathBuf,
    /// Which states to dump; empty means all of them.
    pub dumps: BTreeSet<String>,
}

#[derive(Serialize)]
struct ManifestFile {
    name: String,
    sha256: String,
}

#[derive(Serialize)]
struct Manifest {
    sf: u8,
    seed: u64,
    bytes: usize,
    osr: usize,
    bw: u32,
    files: Vec<ManifestFile>,
}

/// Generate one vector set under `config.out_dir`.
pub fn generate(config: &VectorConfig) -> Result<()> {
    fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("creating {}", config.out_dir.display()))?;

    let dump_all = config.dumps.is_empty();
    let wants = |state: &str| dump_all || config.dumps.contains(state);

    let sf = config.sf as usize;
    let n = 1usize << sf;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let payload: Vec<u8> = (0..config.bytes).map(|_| rng.gen()).collect();

    // Nibbles (high first) -> Hamming codewords, padded to whole blocks.
    let nibble_count = payload.len() * 2;
    let cw_count = nibble_count.div_ceil(sf) * sf;
    let mut codewords = vec![0u8; cw_count];
    for (i, cw) in codewords.iter_mut().take(nibble_count).enumerate() {
        let byte = payload[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        *cw = encode_hamming84(nibble);
    }

    let mut symbols = vec![0 as Symbol; cw_count / sf * (4 + VECTOR_RDD)];
    interleave(&codewords, &mut symbols, sf, VECTOR_RDD)?;

    let params = Params::builder()
        .spreading_factor(config.sf)
        .bandwidth(config.bw)
        .coding_rate(VECTOR_RDD as u8)
        .oversampling(config.osr)
        .window(config.window)
        .build()?;
    let mut ws = Workspace::init(params)?;

    let mut iq = vec![IQSample::new(0.0, 0.0); ws.required_samples(symbols.len())];
    let sample_count = ws.modulate(&symbols, &mut iq)?;
    debug_assert_eq!(sample_count, iq.len());

    // Channel impairments are injected after modulation so the RX-side
    // states exercise the estimator.
    if config.cfo_bins != 0.0 {
        let cfo = config.cfo_bins / n as f32 / config.osr as f32;
        for (i, sample) in iq.iter_mut().enumerate() {
            let phi = TAU * cfo * i as f32;
            *sample *= IQSample::new(phi.cos(), phi.sin());
        }
    }
    if config.time_offset != 0 {
        let shift = (config.time_offset * config.osr as i32).rem_euclid(iq.len() as i32) as usize;
        iq.rotate_right(shift);
    }

    let mut demod = vec![0 as Symbol; symbols.len()];
    ws.demodulate(&iq, &mut demod)?;

    let mut deinterleaved = vec![0u8; cw_count];
    deinterleave(&demod, &mut deinterleaved, sf, VECTOR_RDD)?;

    let mut decoded = vec![0u8; payload.len()];
    for (i, byte) in decoded.iter_mut().enumerate() {
        let (hi, _, _) = decode_hamming84(deinterleaved[2 * i]);
        let (lo, _, _) = decode_hamming84(deinterleaved[2 * i + 1]);
        *byte = (hi << 4) | lo;
    }

    let mut written: Vec<PathBuf> = Vec::new();
    if wants("payload") {
        written.push(write_binary(&config.out_dir, "payload.bin", &payload)?);
    }
    if wants("pre_interleave") {
        written.push(write_csv(&config.out_dir, "pre_interleave.csv", &codewords)?);
    }
    if wants("post_interleave") {
        written.push(write_csv(&config.out_dir, "post_interleave.csv", &symbols)?);
    }
    if wants("iq") {
        let path = config.out_dir.join("iq_samples.csv");
        let mut writer = BufWriter::new(File::create(&path)?);
        iqio::write_iq_csv(&mut writer, &iq)?;
        writer.flush()?;
        written.push(path);
    }
    if wants("demod") {
        written.push(write_csv(&config.out_dir, "demod_symbols.csv", &demod)?);
    }
    if wants("deinterleave") {
        written.push(write_csv(&config.out_dir, "deinterleave.csv", &deinterleaved)?);
    }
    if wants("decoded") {
        written.push(write_binary(&config.out_dir, "decoded.bin", &decoded)?);
    }
    if wants("hamming") {
        written.push(write_hamming_vectors(&config.out_dir)?);
    }
    if wants("modulation") {
        written.push(write_modulation_vectors(&config.out_dir)?);
    }

    let mut files = Vec::new();
    for path in &written {
        files.push(wrap_base64(path)?);
    }

    let manifest = Manifest {
        sf: config.sf,
        seed: config.seed,
        bytes: config.bytes,
        osr: config.osr,
        bw: config.bw,
        files,
    };
    let manifest_path = config.out_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    info!(
        dir = %config.out_dir.display(),
        states = written.len(),
        "vector set written"
    );
    Ok(())
}

fn write_binary(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn write_csv<T: std::fmt::Display>(dir: &Path, name: &str, values: &[T]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut writer = BufWriter::new(File::create(&path)?);
    iqio::write_decimal_csv(&mut writer, values)?;
    writer.flush()?;
    Ok(path)
}

/// Base64-wrap `path` at 76 columns into `<path>.b64` and return its
/// manifest entry.
fn wrap_base64(path: &Path) -> Result<ManifestFile> {
    let raw = fs::read(path)?;
    let encoded = BASE64.encode(&raw);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 76 + 1);
    for chunk in encoded.as_bytes().chunks(76) {
        wrapped.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        wrapped.push('\n');
    }

    let b64_name = format!(
        "{}.b64",
        path.file_name().expect("vector file name").to_string_lossy()
    );
    let b64_path = path.with_file_name(&b64_name);
    fs::write(&b64_path, wrapped.as_bytes())?;

    let digest = Sha256::digest(wrapped.as_bytes());
    Ok(ManifestFile {
        name: b64_name,
        sha256: format!("{:x}", digest),
    })
}

/// `hamming_tests.bin`: `u32` record count, then
/// `{type, data, enc, dec, err, bad}` bytes for each nibble.
fn write_hamming_vectors(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("hamming_tests.bin");
    let mut writer = BufWriter::new(File::create(&path)?);
    writer.write_u32::<LittleEndian>(16)?;
    for data in 0..16u8 {
        let enc = encode_hamming84(data);
        let (dec, err, bad) = decode_hamming84(enc);
        writer.write_all(&[0, data, enc, dec, err as u8, bad as u8])?;
    }
    writer.flush()?;
    Ok(path)
}

/// `modulation_tests.bin`: `u32` record count, then per record
/// `{type:u8, sf:i32, bw:i32, cr:i32, payload_len:u32, payload,
///   iq_len:u32, complex<f64> IQ}`.
fn write_modulation_vectors(dir: &Path) -> Result<PathBuf> {
    let configs: &[(u8, u32, u8)] = &[
        (7, 125_000, 1),
        (7, 125_000, 4),
        (9, 125_000, 1),
        (9, 125_000, 4),
        (12, 125_000, 1),
        (12, 125_000, 4),
    ];
    let payloads: &[&[u8]] = &[
        b"Hello",
        b"World",
        b"Test",
        b"LoRa",
        &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
    ];

    let path = dir.join("modulation_tests.bin");
    let mut writer = BufWriter::new(File::create(&path)?);
    writer.write_u32::<LittleEndian>((configs.len() * payloads.len()) as u32)?;

    for &(sf, bw, cr) in configs {
        let params = Params::builder()
            .spreading_factor(sf)
            .bandwidth(bw)
            .coding_rate(cr)
            .build()?;
        let mut ws = Workspace::init(params)?;

        for payload in payloads {
            let mut symbols = vec![0 as Symbol; ws.required_symbols(payload.len())];
            let count = ws.encode(payload, &mut symbols)?;
            let mut iq = vec![IQSample::new(0.0, 0.0); ws.required_samples(count)];
            let produced = ws.modulate(&symbols[..count], &mut iq)?;

            writer.write_u8(0)?;
            writer.write_i32::<LittleEndian>(sf as i32)?;
            writer.write_i32::<LittleEndian>(bw as i32)?;
            writer.write_i32::<LittleEndian>(cr as i32)?;
            writer.write_u32::<LittleEndian>(payload.len() as u32)?;
            writer.write_all(payload)?;
            writer.write_u32::<LittleEndian>(produced as u32)?;
            for sample in &iq[..produced] {
                writer.write_f64::<LittleEndian>(sample.re as f64)?;
                writer.write_f64::<LittleEndian>(sample.im as f64)?;
            }
        }
    }
    writer.flush()?;
    Ok(path)
}
