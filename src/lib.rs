//! # livealloc
//!
//! Live in-process memory allocation tracing with call-graph aggregation.
//!
//! The tracer intercepts every dynamic allocation a host forwards to it,
//! correlates each event with its call stack, and continuously maintains
//! per-function totals, an allocation call graph, and watchable totals
//! that a developer can browse while the program runs.
//!
//! ## How it fits together
//!
//! - Producers (any thread that allocates) write events into thread-local
//!   chunks with a lock-free hot path and a small coalescing cache.
//! - Full chunks are handed to a single consumer - a background thread or
//!   the producer itself - which resolves stacks to symbols and folds the
//!   events into fixed-capacity dictionaries under one lock.
//! - The renderer pulls aggregates through the snapshot API under the
//!   same lock.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! livealloc::init();
//!
//! let ptr = livealloc::alloc(1024);
//! // ... hand ptr to whatever needed the memory ...
//! unsafe { livealloc::dealloc(ptr) };
//!
//! livealloc::flush();
//! if let Some(snapshot) = livealloc::snapshot() {
//!     for function in snapshot.functions() {
//!         println!("{:>12} B  {}", function.total_bytes(), function.name());
//!     }
//! }
//! ```
//!
//! Hosts typically integrate by forwarding a `GlobalAlloc` implementation
//! or operator-new overrides to [`alloc`]/[`dealloc`]; the tracer's own
//! memory never routes through the registered global allocator.

mod aggregate;
mod api;
mod core;
mod diagnostics;
mod ingest;
mod platform;
mod sync;
mod util;

pub use api::alloc::{alloc, alloc_aligned, dealloc, dealloc_aligned, realloc, realloc_aligned};
pub use api::config::{
    TracerConfig, ALLOC_DICTIONARY, ALLOC_PER_CHUNK, CACHE_SIZE, CHUNK_PER_THREAD, HISTORY_FRAMES,
    INTERNAL_FRAME_TO_SKIP, STACK_DICTIONARY, STACK_PER_ALLOC, TREE_DICTIONARY,
};
pub use api::lifecycle::{exit, flush, init, init_with_config};
pub use api::snapshot::{
    display, histograms, snapshot, watch_call, watch_function, CallView, Calls, FunctionView,
    Functions, HistogramSample, TracerSnapshot,
};
pub use api::stats::{stats, temporary_chunk_count, DictionaryStats, TracerStats};
pub use diagnostics::suppress_diagnostics;
pub use util::size::format_bytes;
