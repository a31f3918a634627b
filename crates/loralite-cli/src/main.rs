//! LoRa PHY command-line runners.
//!
//! - `tx`: encode and modulate a hex payload into an IQ stream.
//! - `rx`: demodulate and decode an IQ stream, print the recovered frame
//!   and the receive metrics.
//! - `vectors`: write a reference vector set for cross-implementation
//!   checks.
//!
//! IQ streams are interleaved little-endian `f32 real, f32 imag`, on stdio
//! or in files. Diagnostics go to stderr; exit status is non-zero on any
//! argument or capacity error.

mod iqio;
mod vectors;

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use loralite_core::{IQSample, Params, Symbol, WindowKind, Workspace};

#[derive(Parser)]
#[command(name = "loralite")]
#[command(author, version, about = "Lightweight LoRa PHY modem runners", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WindowArg {
    None,
    Hann,
}

impl From<WindowArg> for WindowKind {
    fn from(value: WindowArg) -> Self {
        match value {
            WindowArg::None => WindowKind::None,
            WindowArg::Hann => WindowKind::Hann,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode and modulate a payload into an IQ stream.
    Tx {
        /// Payload bytes as hex, e.g. deadbeef.
        #[arg(long)]
        payload: String,

        /// Spreading factor (7-12).
        #[arg(long, default_value = "7")]
        sf: u8,

        /// Bandwidth in Hz (125000, 250000, 500000).
        #[arg(long, default_value = "125000")]
        bw: u32,

        /// Coding rate redundancy (1-4).
        #[arg(long, default_value = "1")]
        cr: u8,

        /// Output file for the IQ stream.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write the IQ stream to stdout instead of a file.
        #[arg(long)]
        stdout: bool,
    },

    /// Demodulate and decode an IQ stream.
    Rx {
        /// Input file with the IQ stream; stdin when omitted.
        #[arg(long = "in")]
        input: Option<PathBuf>,

        /// Spreading factor (7-12).
        #[arg(long, default_value = "7")]
        sf: u8,

        /// Bandwidth in Hz.
        #[arg(long, default_value = "125000")]
        bw: u32,

        /// Coding rate redundancy (1-4).
        #[arg(long, default_value = "1")]
        cr: u8,
    },

    /// Generate a reference vector set.
    Vectors {
        /// Spreading factor (7-12).
        #[arg(long, default_value = "7")]
        sf: u8,

        /// Bandwidth in Hz.
        #[arg(long, default_value = "125000")]
        bw: u32,

        /// Seed for the deterministic payload.
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Payload length in bytes.
        #[arg(long, default_value = "16")]
        bytes: usize,

        /// Oversampling ratio.
        #[arg(long, default_value = "1")]
        osr: usize,

        /// Detection window.
        #[arg(long, value_enum, default_value = "none")]
        window: WindowArg,

        /// Carrier offset to inject, in FFT bins.
        #[arg(long, default_value = "0.0")]
        cfo_bins: f32,

        /// Timing offset to inject, in base-rate samples.
        #[arg(long, default_value = "0")]
        time_offset: i32,

        /// Output directory.
        #[arg(long)]
        out: PathBuf,

        /// Dump only the named states (repeatable); all states by default.
        #[arg(long = "dump")]
        dumps: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loralite=info")),
        )
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Tx {
            payload,
            sf,
            bw,
            cr,
            out,
            stdout,
        } => run_tx(&payload, sf, bw, cr, out, stdout),
        Commands::Rx { input, sf, bw, cr } => run_rx(input, sf, bw, cr),
        Commands::Vectors {
            sf,
            bw,
            seed,
            bytes,
            osr,
            window,
            cfo_bins,
            time_offset,
            out,
            dumps,
        } => vectors::generate(&vectors::VectorConfig {
            sf,
            bw,
            seed,
            bytes,
            osr,
            window: window.into(),
            cfo_bins,
            time_offset,
            out_dir: out,
            dumps: dumps.into_iter().collect::<BTreeSet<_>>(),
        }),
    }
}

fn workspace(sf: u8, bw: u32, cr: u8) -> Result<Workspace> {
    let params = Params::builder()
        .spreading_factor(sf)
        .bandwidth(bw)
        .coding_rate(cr)
        .build()
        .context("invalid modem parameters")?;
    Ok(Workspace::init(params)?)
}

fn run_tx(payload_hex: &str, sf: u8, bw: u32, cr: u8, out: Option<PathBuf>, stdout: bool) -> Result<()> {
    if !stdout && out.is_none() {
        bail!("specify --out=<path> or --stdout");
    }

    let payload = iqio::parse_hex(payload_hex)?;
    let mut ws = workspace(sf, bw, cr)?;

    let mut symbols = vec![0 as Symbol; ws.required_symbols(payload.len())];
    let symbol_count = ws.encode(&payload, &mut symbols).context("encode failed")?;

    let mut iq = vec![IQSample::new(0.0, 0.0); ws.required_samples(symbol_count)];
    let sample_count = ws
        .modulate(&symbols[..symbol_count], &mut iq)
        .context("modulate failed")?;

    debug!(symbol_count, sample_count, "modulated payload");

    if stdout {
        let mut writer = BufWriter::new(io::stdout().lock());
        iqio::write_iq_stream(&mut writer, &iq[..sample_count])?;
        writer.flush()?;
    } else {
        let path = out.expect("checked above");
        let mut writer = BufWriter::new(
            File::create(&path).with_context(|| format!("creating {}", path.display()))?,
        );
        iqio::write_iq_stream(&mut writer, &iq[..sample_count])?;
        writer.flush()?;
        info!(samples = sample_count, path = %path.display(), "IQ stream written");
    }
    Ok(())
}

fn run_rx(input: Option<PathBuf>, sf: u8, bw: u32, cr: u8) -> Result<()> {
    let samples = match &input {
        Some(path) => {
            let mut reader = BufReader::new(
                File::open(path).with_context(|| format!("opening {}", path.display()))?,
            );
            iqio::read_iq_stream(&mut reader)?
        }
        None => {
            let mut buf = Vec::new();
            io::stdin().lock().read_to_end(&mut buf)?;
            iqio::read_iq_stream(&mut buf.as_slice())?
        }
    };
    if samples.is_empty() {
        bail!("no samples read");
    }

    let mut ws = workspace(sf, bw, cr)?;
    let span = ws.samples_per_symbol();
    if samples.len() % span != 0 {
        bail!(
            "sample count {} is not a multiple of the symbol span {}",
            samples.len(),
            span
        );
    }

    let mut symbols = vec![0 as Symbol; samples.len() / span];
    let symbol_count = ws.demodulate(&samples, &mut symbols).context("demodulate failed")?;

    let width = ws.params().symbols_per_block();
    let rows = ws.params().sf.value() as usize;
    let mut decoded = vec![0u8; (symbol_count / width * rows).div_ceil(2) + 1];
    let byte_count = ws
        .decode(&symbols[..symbol_count], &mut decoded)
        .context("decode failed")?;
    decoded.truncate(byte_count);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if byte_count >= 4 {
        // Framed payloads carry [length, flags, data.., crc16].
        writeln!(out, "Header length={} flags={}", decoded[0], decoded[1])?;
        writeln!(out, "Payload: {}", iqio::to_hex(&decoded[2..byte_count - 2]))?;
    } else {
        writeln!(out, "Decoded payload too short")?;
    }

    let metrics = ws.last_metrics();
    writeln!(out, "CRC OK: {}", if metrics.crc_ok { "yes" } else { "no" })?;
    writeln!(out, "CFO: {}", metrics.cfo)?;
    writeln!(out, "Time offset: {}", metrics.time_offset)?;
    Ok(())
}
