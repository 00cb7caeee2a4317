//! Tracer lifecycle: init / exit / flush.
//!
//! The state machine is `NOT_INITIALIZED -> RUNNING -> EXIT`. Producers
//! record in every state; only in `RUNNING` do chunks rotate and reach the
//! consumer. Events recorded before `init()` (the host's static-init
//! phase) are retained per thread and dispatched on that thread's first
//! allocation after `init()`.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::config::TracerConfig;
use crate::core::global::{self, running_status, set_running_status, RunningStatus};
use crate::core::tls;
use crate::ingest::worker;

static WORKER_SPAWNED: AtomicBool = AtomicBool::new(false);

/// Start the tracer with the default (synchronous consumer) configuration.
pub fn init() {
    init_with_config(TracerConfig::default());
}

/// Start the tracer.
///
/// The first call fixes the configuration for the process; later calls
/// only flip the state back to running.
pub fn init_with_config(config: TracerConfig) {
    let global = global::initialize(config);
    // The stored configuration wins if init raced or ran twice.
    if global.config.background_worker && !WORKER_SPAWNED.swap(true, Ordering::AcqRel) {
        worker::spawn_worker(global);
    }
    set_running_status(RunningStatus::Running);
}

/// Stop the pipeline.
///
/// Producers keep recording into their remaining preallocated chunks, but
/// nothing new is handed off; the background worker (if any) drains what
/// it has and stops. Call [`flush`] first for a clean shutdown.
pub fn exit() {
    set_running_status(RunningStatus::Exit);
    if let Some(global) = global::global() {
        worker::retire_worker(global);
    }
}

/// Flush the calling thread's in-flight events and wait until the
/// consumer has drained every dispatched chunk.
///
/// After `flush()` returns, everything this thread recorded is visible in
/// snapshots and `temporary_chunk_count()` has returned to zero (absent
/// concurrent producers).
pub fn flush() {
    if running_status() != RunningStatus::Running {
        return;
    }
    tls::flush_current();
    if let Some(global) = global::global() {
        // With a background worker the queue has exactly one consumer;
        // draining from here too would reorder a thread's chunks.
        if !global.queue.worker_active() {
            global.queue.drain(global);
        }
        global.queue.wait_drained();
    }
}
