//! Integration tests for livealloc.
//!
//! The tracer is process-global and only sees allocations explicitly
//! routed through it, so totals here are exact - but tests still
//! serialize on a shared lock because they all mutate the same aggregate
//! state.

use std::sync::{Mutex, MutexGuard, OnceLock};

fn setup() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let guard = LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    livealloc::suppress_diagnostics(true);
    livealloc::init();
    livealloc::flush();
    guard
}

fn live_bytes() -> isize {
    livealloc::snapshot().expect("tracer initialized").total_live_bytes()
}

#[test]
fn single_alloc_free_round_trip() {
    let _guard = setup();
    let before = live_bytes();

    let ptr = livealloc::alloc(100_000);
    assert!(!ptr.is_null());
    unsafe { ptr.write_bytes(0xAA, 100_000) };
    livealloc::flush();
    assert_eq!(live_bytes() - before, 100_000);

    unsafe { livealloc::dealloc(ptr) };
    livealloc::flush();
    assert_eq!(live_bytes(), before);
}

#[test]
fn coalesced_burst_accounts_every_byte() {
    let _guard = setup();
    let before = live_bytes();

    // Same call site a thousand times: the producer coalesces these into
    // a handful of chunk events, but not a byte goes missing.
    let mut ptrs = Vec::with_capacity(1000);
    for _ in 0..1000 {
        ptrs.push(livealloc::alloc(10));
    }
    livealloc::flush();
    assert_eq!(live_bytes() - before, 10_000);

    for ptr in ptrs {
        unsafe { livealloc::dealloc(ptr) };
    }
    livealloc::flush();
    assert_eq!(live_bytes(), before);
}

#[test]
fn aligned_allocations_round_trip() {
    let _guard = setup();
    let before = live_bytes();

    let mut ptrs = Vec::new();
    for align in [8usize, 64, 256, 4096] {
        let ptr = livealloc::alloc_aligned(1000, align);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % align, 0);
        unsafe { ptr.write_bytes(0x5C, 1000) };
        ptrs.push(ptr);
    }
    livealloc::flush();
    assert_eq!(live_bytes() - before, 4000);

    for ptr in ptrs {
        unsafe { livealloc::dealloc_aligned(ptr) };
    }
    livealloc::flush();
    assert_eq!(live_bytes(), before);
}

#[test]
fn realloc_same_size_is_identity() {
    let _guard = setup();

    let ptr = livealloc::alloc(64);
    livealloc::flush();
    let held = live_bytes();

    let same = unsafe { livealloc::realloc(ptr, 64) };
    assert_eq!(ptr, same);
    livealloc::flush();
    assert_eq!(live_bytes(), held, "same-size realloc must record nothing");

    unsafe { livealloc::dealloc(same) };
    livealloc::flush();
}

#[test]
fn realloc_moves_accounting_to_new_size() {
    let _guard = setup();
    let before = live_bytes();

    let ptr = livealloc::alloc(100);
    unsafe { ptr.write_bytes(0x7E, 100) };
    let grown = unsafe { livealloc::realloc(ptr, 5000) };
    assert!(!grown.is_null());
    unsafe {
        for i in 0..100 {
            assert_eq!(*grown.add(i), 0x7E);
        }
    }
    livealloc::flush();
    assert_eq!(live_bytes() - before, 5000);

    unsafe { livealloc::dealloc(grown) };
    livealloc::flush();
    assert_eq!(live_bytes(), before);
}

#[test]
fn realloc_through_zero_and_null() {
    let _guard = setup();
    let before = live_bytes();

    let ptr = unsafe { livealloc::realloc(std::ptr::null_mut(), 300) };
    assert!(!ptr.is_null());
    let emptied = unsafe { livealloc::realloc(ptr, 0) };
    assert!(!emptied.is_null());
    unsafe { livealloc::dealloc(emptied) };

    livealloc::flush();
    assert_eq!(live_bytes(), before);
}

#[test]
fn stats_track_user_and_real_bytes() {
    let _guard = setup();
    let before = livealloc::stats();

    let ptr = livealloc::alloc(512);
    let during = livealloc::stats();
    assert_eq!(during.user_bytes - before.user_bytes, 512);
    assert!(during.real_bytes - before.real_bytes > 512, "headers are accounted");

    unsafe { livealloc::dealloc(ptr) };
    let after = livealloc::stats();
    assert_eq!(after.user_bytes, before.user_bytes);
    assert_eq!(after.real_bytes, before.real_bytes);
}

#[test]
fn dictionaries_report_occupancy_after_traffic() {
    let _guard = setup();
    let ptr = livealloc::alloc(64);
    livealloc::flush();

    let stats = livealloc::stats();
    assert!(stats.stack_dictionary.len > 0);
    assert!(stats.symbol_dictionary.len > 0);
    assert!(stats.edge_dictionary.len > 0);
    assert_eq!(stats.stack_dictionary.capacity, livealloc::STACK_DICTIONARY);
    assert!(stats.stack_dictionary.fill_ratio() < 0.5);

    unsafe { livealloc::dealloc(ptr) };
    livealloc::flush();
}

#[inline(never)]
fn burst_alloc(size: usize) -> *mut u8 {
    std::hint::black_box(livealloc::alloc(size))
}

#[test]
fn function_queries_and_watches() {
    let _guard = setup();

    let mut ptrs = Vec::new();
    for _ in 0..100 {
        ptrs.push(burst_alloc(64));
    }
    livealloc::flush();

    // Symbol names come from the platform resolver; on stripped builds
    // the frames fall back to "Truncated" and the name queries below are
    // skipped rather than asserted.
    let resolved = {
        let snapshot = livealloc::snapshot().expect("tracer initialized");
        let top = snapshot.top_functions(5);
        assert!(top.len() <= 5);
        for pair in top.windows(2) {
            assert!(pair[0].total_bytes() >= pair[1].total_bytes());
        }
        snapshot.find_function("burst_alloc").map(|function| {
            assert!(function.total_bytes() >= 6400);
            assert!(function.calls().next().is_some());
            function.name().to_string()
        })
    };

    if let Some(name) = resolved {
        assert!(livealloc::watch_function(&name));
        livealloc::display(0.5); // crosses the sampling interval
        let histograms = livealloc::histograms();
        let watch = histograms
            .iter()
            .find(|h| h.name == name)
            .expect("watch registered");
        assert!(watch.is_function);
        assert!(watch.current >= 6400);
        assert_eq!(watch.samples.len(), livealloc::HISTORY_FRAMES);
    }

    for ptr in ptrs {
        unsafe { livealloc::dealloc(ptr) };
    }
    livealloc::flush();
}

#[test]
fn call_graph_roots_are_consistent() {
    let _guard = setup();

    let ptr = livealloc::alloc(2048);
    livealloc::flush();

    let snapshot = livealloc::snapshot().expect("tracer initialized");
    // Every root's children carry no more than the root itself, and all
    // reachable views resolve without panicking.
    for root in snapshot.roots() {
        let child_sum: isize = root.children().map(|child| child.total_bytes()).sum();
        assert!(child_sum <= root.total_bytes() || root.total_bytes() <= 0);
        assert_eq!(root.depth(), 0);
        for child in root.children() {
            assert_eq!(child.parent().map(|p| p.total_bytes()), Some(root.total_bytes()));
            let _ = child.function().map(|f| f.name().to_string());
        }
    }
    drop(snapshot);

    unsafe { livealloc::dealloc(ptr) };
    livealloc::flush();
}

#[test]
fn threads_produce_independently() {
    let _guard = setup();
    let before = live_bytes();

    let mut handles = Vec::new();
    for t in 0..4 {
        handles.push(std::thread::spawn(move || {
            let mut ptrs = Vec::new();
            for i in 0..1000 {
                ptrs.push(livealloc::alloc(16 + (t * 8 + i) % 128));
            }
            for ptr in ptrs {
                unsafe { livealloc::dealloc(ptr) };
            }
            // Each producer flushes its own chunk before exiting.
            livealloc::flush();
        }));
    }
    for handle in handles {
        handle.join().expect("producer thread");
    }

    livealloc::flush();
    assert_eq!(live_bytes(), before);
}

#[test]
fn alloc_free_within_one_chunk_cancels() {
    let _guard = setup();
    let before = live_bytes();

    // Back-to-back alloc and free of the same block coalesce onto one
    // chunk slot through the recent-hash cache and net to zero before the
    // consumer ever sees them.
    let ptr = livealloc::alloc(777);
    unsafe { livealloc::dealloc(ptr) };
    livealloc::flush();

    assert_eq!(live_bytes(), before);
}
