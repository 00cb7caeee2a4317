//! Events recorded before `init()` must survive into the aggregate.
//!
//! A separate binary with a single test: the pre-init phase only exists
//! once per process.

#[test]
fn pre_init_allocations_are_aggregated_after_init() {
    livealloc::suppress_diagnostics(true);

    // Recorded while NOT_INITIALIZED, into this thread's one-shot chunks.
    let early = livealloc::alloc(4096);
    assert!(!early.is_null());

    livealloc::init();

    // The first post-init activity dispatches the startup backlog.
    let late = livealloc::alloc(1024);
    livealloc::flush();

    let live = livealloc::snapshot()
        .expect("tracer initialized")
        .total_live_bytes();
    assert_eq!(live, 4096 + 1024);

    unsafe {
        livealloc::dealloc(early);
        livealloc::dealloc(late);
    }
    livealloc::flush();
    let live = livealloc::snapshot()
        .expect("tracer initialized")
        .total_live_bytes();
    assert_eq!(live, 0);
}
