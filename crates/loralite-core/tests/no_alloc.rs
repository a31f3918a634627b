//! Steady-state allocation contract.
//!
//! Everything the modem needs is allocated by `Workspace::init`; afterwards
//! the TX and RX hot paths must not touch the heap. A counting global
//! allocator wrapped around the whole test binary makes that observable.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

use loralite_core::{IQSample, Params, Symbol, Workspace};

struct CountingAllocator;

static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        System.realloc(ptr, layout, new_size)
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

fn allocations() -> u64 {
    ALLOCATIONS.load(Ordering::Relaxed)
}

#[test]
fn hot_path_never_allocates_after_init() {
    let params = Params::builder()
        .spreading_factor(7)
        .bandwidth(125_000)
        .coding_rate(4)
        .oversampling(2)
        .build()
        .unwrap();
    let mut ws = Workspace::init(params).unwrap();

    let payload = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04];
    let mut symbols = vec![0 as Symbol; ws.required_symbols(payload.len())];
    let mut iq = vec![IQSample::new(0.0, 0.0); ws.required_samples(symbols.len())];
    let mut received = vec![0 as Symbol; symbols.len()];
    let mut decoded = vec![0u8; 32];

    // Warm up once so lazily initialised library state is excluded.
    let count = ws.encode(&payload, &mut symbols).unwrap();
    let produced = ws.modulate(&symbols[..count], &mut iq).unwrap();
    ws.demodulate(&iq[..produced], &mut received).unwrap();
    ws.decode(&received[..count], &mut decoded).unwrap();

    let before = allocations();

    let count = ws.encode(&payload, &mut symbols).unwrap();
    let produced = ws.modulate(&symbols[..count], &mut iq).unwrap();
    ws.demodulate(&iq[..produced], &mut received).unwrap();
    ws.decode(&received[..count], &mut decoded).unwrap();
    ws.estimate_offsets(&iq[..produced]).unwrap();
    ws.compensate_offsets(&mut iq[..produced]);
    ws.reset();

    let after = allocations();
    assert_eq!(after - before, 0, "hot path allocated {} times", after - before);
}
