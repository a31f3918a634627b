//! CFO and timing tolerance of the receive chain.
//!
//! The bursts here carry a two-upchirp preamble so the offset estimator
//! sees the known symbols its contract expects. Offsets are injected into
//! the clean modulation: a carrier offset as a complex rotation, a timing
//! error as a circular sample shift.

use loralite_core::{IQSample, Params, Symbol, Workspace};
use std::f32::consts::TAU;

const SF: u8 = 7;
const N: usize = 128;

fn workspace() -> Workspace {
    let params = Params::builder()
        .spreading_factor(SF)
        .bandwidth(125_000)
        .coding_rate(1)
        .preamble(2, 0)
        .build()
        .unwrap();
    Workspace::init(params).unwrap()
}

fn modulate_with_preamble(ws: &mut Workspace, payload: &[u8]) -> (Vec<IQSample>, Vec<Symbol>) {
    let mut symbols = vec![0 as Symbol; ws.required_symbols(payload.len())];
    let count = ws.encode(payload, &mut symbols).unwrap();
    let mut iq = vec![IQSample::new(0.0, 0.0); ws.required_samples(count)];
    let produced = ws.modulate(&symbols[..count], &mut iq).unwrap();
    assert_eq!(produced, (count + 2) * N);
    (iq, symbols)
}

fn inject_cfo(iq: &mut [IQSample], cfo_bins: f32) {
    let cfo = cfo_bins / N as f32;
    for (i, sample) in iq.iter_mut().enumerate() {
        let phi = TAU * cfo * i as f32;
        *sample *= IQSample::new(phi.cos(), phi.sin());
    }
}

fn inject_delay(iq: &mut Vec<IQSample>, delay: i32) {
    let len = iq.len();
    let shift = delay.rem_euclid(len as i32) as usize;
    iq.rotate_right(shift);
}

/// Wrap a bin error into `[-0.5, 0.5]`; a whole-bin ambiguity at the
/// half-bin boundary is not an estimation error.
fn wrapped_bin_error(a: f32, b: f32) -> f32 {
    let d = a - b;
    d - d.round()
}

#[test]
fn injected_offsets_are_estimated_and_recovered() {
    let payload = [0x5A, 0x3C, 0x96, 0xC3, 0x0F, 0xF0, 0x55, 0xAA];

    for &cfo_bins in &[-0.5f32, 0.0, 0.5] {
        for &delay in &[-2i32, 0, 2] {
            let mut ws = workspace();
            let (clean, symbols) = modulate_with_preamble(&mut ws, &payload);

            let mut iq = clean;
            inject_cfo(&mut iq, cfo_bins);
            inject_delay(&mut iq, delay);

            ws.estimate_offsets(&iq).unwrap();
            let metrics = *ws.last_metrics();

            let est_bins = metrics.cfo * N as f32;
            assert!(
                wrapped_bin_error(est_bins, cfo_bins).abs() < 0.15,
                "cfo {} est {} bins (delay {})",
                cfo_bins,
                est_bins,
                delay
            );
            // Positive time_offset delays the stream on compensation, so a
            // late stream reports a negative correction.
            assert!(
                (metrics.time_offset + delay as f32).abs() < 1.1,
                "delay {} estimated correction {}",
                delay,
                metrics.time_offset
            );

            ws.compensate_offsets(&mut iq);
            let mut received = vec![0 as Symbol; iq.len() / N];
            let count = ws.demodulate(&iq, &mut received).unwrap();
            assert_eq!(count, symbols.len() + 2);
            assert_eq!(&received[..2], &[0, 0], "preamble upchirps");
            assert_eq!(&received[2..], &symbols[..], "cfo {} delay {}", cfo_bins, delay);

            let mut decoded = vec![0u8; 16];
            let produced = ws.decode(&received[2..], &mut decoded).unwrap();
            assert!(produced >= payload.len());
            assert_eq!(&decoded[..payload.len()], &payload);
        }
    }
}

#[test]
fn pure_cfo_is_recovered_without_a_compensation_pass() {
    let payload = [0x12, 0x34, 0x56, 0x78];

    // Exactly half a bin sits on the decision boundary between a positive
    // and a negative carrier interpretation; the inline-only path is tested
    // inside that boundary, the boundary itself goes through the explicit
    // compensation pass above.
    for &cfo_bins in &[-0.45f32, -0.25, 0.25, 0.45] {
        let mut ws = workspace();
        let (clean, symbols) = modulate_with_preamble(&mut ws, &payload);

        let mut iq = clean;
        inject_cfo(&mut iq, cfo_bins);

        // No explicit estimate/compensate: demodulate derotates inline.
        let mut received = vec![0 as Symbol; iq.len() / N];
        let count = ws.demodulate(&iq, &mut received).unwrap();
        assert_eq!(count, symbols.len() + 2);
        assert_eq!(&received[2..], &symbols[..], "cfo {}", cfo_bins);

        let est_bins = ws.last_metrics().cfo * N as f32;
        assert!(
            wrapped_bin_error(est_bins, cfo_bins).abs() < 0.15,
            "cfo {} estimated {} bins",
            cfo_bins,
            est_bins
        );
    }
}

#[test]
fn oversampled_subchip_delay_is_estimated_and_recovered() {
    let payload = [0xA5, 0x0F, 0x3C, 0x96];
    let params = Params::builder()
        .spreading_factor(SF)
        .bandwidth(125_000)
        .coding_rate(1)
        .oversampling(4)
        .preamble(2, 0)
        .build()
        .unwrap();
    let mut ws = Workspace::init(params).unwrap();
    let step = ws.samples_per_symbol();
    assert_eq!(step, 4 * N);

    let mut symbols = vec![0 as Symbol; ws.required_symbols(payload.len())];
    let count = ws.encode(&payload, &mut symbols).unwrap();
    let mut iq = vec![IQSample::new(0.0, 0.0); ws.required_samples(count)];
    ws.modulate(&symbols[..count], &mut iq).unwrap();

    // One oversampled sample late: a quarter of a base-rate sample, below
    // base-rate resolution, so only the sub-phase search can resolve it.
    let len = iq.len();
    iq.copy_within(0..len - 1, 1);
    iq[0] = IQSample::new(0.0, 0.0);

    ws.estimate_offsets(&iq).unwrap();
    let metrics = *ws.last_metrics();
    assert!(
        (metrics.time_offset + 0.25).abs() < 0.05,
        "estimated correction {}",
        metrics.time_offset
    );
    assert!(
        (metrics.cfo * N as f32).abs() < 0.15,
        "estimated {} bins of carrier offset",
        metrics.cfo * N as f32
    );

    ws.compensate_offsets(&mut iq);
    let mut received = vec![0 as Symbol; iq.len() / step];
    let demodulated = ws.demodulate(&iq, &mut received).unwrap();
    assert_eq!(demodulated, symbols.len() + 2);
    assert_eq!(&received[..2], &[0, 0], "preamble upchirps");
    assert_eq!(&received[2..], &symbols[..]);

    let mut decoded = vec![0u8; 16];
    let produced = ws.decode(&received[2..], &mut decoded).unwrap();
    assert!(produced >= payload.len());
    assert_eq!(&decoded[..payload.len()], &payload);
}

#[test]
fn single_window_estimation_uses_coarse_cfo_only() {
    let mut ws = workspace();

    // One lone upchirp with a carrier offset: the phase-difference term is
    // unavailable, the call still succeeds on the coarse estimate.
    let symbols = vec![0 as Symbol; 1];
    let mut iq = vec![IQSample::new(0.0, 0.0); N];
    {
        // A bare upchirp window without preamble framing.
        let params = Params::builder()
            .spreading_factor(SF)
            .bandwidth(125_000)
            .coding_rate(1)
            .build()
            .unwrap();
        let mut bare = Workspace::init(params).unwrap();
        bare.modulate(&symbols, &mut iq).unwrap();
    }
    inject_cfo(&mut iq, 0.5);

    ws.estimate_offsets(&iq).unwrap();
    let est_bins = ws.last_metrics().cfo * N as f32;
    assert!(
        wrapped_bin_error(est_bins, 0.5).abs() < 0.2,
        "estimated {} bins",
        est_bins
    );
    assert_eq!(ws.last_metrics().time_offset, 0.0);
}

#[test]
fn compensation_is_idempotent_on_a_clean_burst() {
    let payload = [0xDE, 0xAD];
    let mut ws = workspace();
    let (clean, symbols) = modulate_with_preamble(&mut ws, &payload);

    let mut iq = clean;
    ws.estimate_offsets(&iq).unwrap();
    assert!(ws.last_metrics().cfo.abs() < 1.0 / (N as f32 * N as f32));
    ws.compensate_offsets(&mut iq);

    let mut received = vec![0 as Symbol; iq.len() / N];
    ws.demodulate(&iq, &mut received).unwrap();
    assert_eq!(&received[2..], &symbols[..]);
}
