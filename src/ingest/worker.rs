//! Chunk handoff: the queue between producers and the consumer.
//!
//! Two consumer arrangements, chosen at `init()`:
//!
//! - **Background worker** (`TracerConfig::background_worker`): full
//!   chunks are pushed onto a lock-free queue and a dedicated thread
//!   drains them.
//! - **Synchronous fallback** (the default): the producer that filled a
//!   chunk aggregates it on the spot, under the aggregation lock.
//!
//! In both arrangements a dispatch issued *while this thread is already
//! consuming* (the symbolizer allocated, the allocation filled a chunk) is
//! parked on the queue instead of recursing into the aggregation lock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex as StdMutex, OnceLock};
use std::thread::{self, Thread};
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::aggregate::engine::treat_chunk;
use crate::core::global::{running_status, GlobalState, RunningStatus};
use crate::core::tls;
use crate::ingest::chunk::ChunkRef;

/// How long the worker sleeps when the queue is empty. Dispatch unparks
/// it, so this is only the fallback cadence.
const WORKER_PARK: Duration = Duration::from_millis(10);

/// The producer-to-consumer handoff queue.
pub(crate) struct HandoffQueue {
    queue: SegQueue<ChunkRef>,
    /// Chunks dispatched but not yet fully consumed.
    in_flight: AtomicUsize,
    /// True while a live worker thread owns draining.
    worker_mode: AtomicBool,
    drained_lock: StdMutex<()>,
    drained: Condvar,
    worker: OnceLock<Thread>,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            in_flight: AtomicUsize::new(0),
            worker_mode: AtomicBool::new(false),
            drained_lock: StdMutex::new(()),
            drained: Condvar::new(),
            worker: OnceLock::new(),
        }
    }

    /// Hand a full chunk to the consumer.
    pub fn dispatch(&self, global: &GlobalState, chunk: ChunkRef) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        if self.worker_mode.load(Ordering::Acquire) {
            self.queue.push(chunk);
            if let Some(worker) = self.worker.get() {
                worker.unpark();
            }
            return;
        }

        if tls::is_consumer_active() {
            // The consumer sits beneath us on this very stack; queue the
            // chunk for the outer invocation to drain.
            self.queue.push(chunk);
            return;
        }

        // Anything deferred earlier is older than this chunk.
        self.drain(global);
        self.consume(global, chunk);
    }

    /// Pop and consume until the queue is empty.
    pub fn drain(&self, global: &GlobalState) {
        while let Some(chunk) = self.queue.pop() {
            self.consume(global, chunk);
        }
    }

    fn consume(&self, global: &GlobalState, chunk: ChunkRef) {
        treat_chunk(global, chunk);
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.drained_lock.lock().expect("drain signal lock");
            self.drained.notify_all();
        }
    }

    /// Block until every dispatched chunk has been consumed.
    pub fn wait_drained(&self) {
        let mut guard = self.drained_lock.lock().expect("drain signal lock");
        while self.in_flight.load(Ordering::Acquire) != 0 {
            let (next, _timeout) = self
                .drained
                .wait_timeout(guard, WORKER_PARK)
                .expect("drain signal lock");
            guard = next;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// True while a live worker owns the queue. Nobody else may pop:
    /// two consumers draining one queue could process a thread's chunks
    /// out of fill order.
    pub fn worker_active(&self) -> bool {
        self.worker_mode.load(Ordering::Acquire)
    }
}

/// Start the background consumer thread.
///
/// The handle is detached; the loop exits after `exit()` once the queue is
/// empty. If the spawn fails the queue stays in synchronous mode and the
/// producers consume their own chunks.
pub(crate) fn spawn_worker(global: &'static GlobalState) {
    global.queue.worker_mode.store(true, Ordering::Release);
    let spawned = thread::Builder::new()
        .name("livealloc-consumer".into())
        .spawn(move || {
            let _ = global.queue.worker.set(thread::current());
            worker_loop(global);
        });
    if spawned.is_err() {
        global.queue.worker_mode.store(false, Ordering::Release);
    }
}

/// Stop routing new chunks to the worker; called from `exit()` after the
/// worker has been asked to wind down.
pub(crate) fn retire_worker(global: &GlobalState) {
    global.queue.worker_mode.store(false, Ordering::Release);
    if let Some(worker) = global.queue.worker.get() {
        worker.unpark();
    }
}

fn worker_loop(global: &'static GlobalState) {
    loop {
        global.queue.drain(global);
        if running_status() == RunningStatus::Exit && global.queue.in_flight() == 0 {
            break;
        }
        thread::park_timeout(WORKER_PARK);
    }
    global.queue.worker_mode.store(false, Ordering::Release);
}
