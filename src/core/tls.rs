//! Per-thread producer state.
//!
//! Each thread owns a ring of preallocated chunks, the chunk it is
//! currently writing, and a small recent-hash cache that coalesces bursts
//! of same-site events. Nothing here is shared: the producer never takes
//! the aggregation lock, and the only cross-thread traffic is the status
//! flag on a handed-off chunk.
//!
//! Two rules keep the hot path re-entrancy safe when a host routes its
//! global allocator through the tracer:
//!
//! - No code inside the thread-local borrow allocates through the global
//!   allocator (chunks come from the raw seam, bookkeeping uses fixed
//!   arrays).
//! - Chunk dispatch - which may run the consumer synchronously, which
//!   does allocate - is collected into a [`PendingDispatch`] and executed
//!   only after the borrow ends.

use std::cell::{Cell, RefCell};
use std::sync::atomic::AtomicBool;

use crate::api::config::{
    CACHE_SIZE, CHUNK_PER_THREAD, INTERNAL_FRAME_TO_SKIP, STACK_PER_ALLOC,
};
use crate::api::stats::counters;
use crate::core::global::{self, running_status, RunningStatus};
use crate::diagnostics::{self, kind};
use crate::ingest::chunk::{ChunkRef, ChunkStatus, EventChunk, NO_FRAMES};
use crate::platform;

/// Pre-init temporary chunks retained per thread until the consumer is
/// live. Overflow beyond this loses the oldest chunk's events.
const STARTUP_OVERFLOW_CAP: usize = 32;

/// Upper bound on chunks one call can need to dispatch: the whole startup
/// backlog plus the chunk being retired.
const PENDING_CAP: usize = CHUNK_PER_THREAD + STARTUP_OVERFLOW_CAP + 1;

static TEMP_PRESSURE_REPORTED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static TLS: RefCell<Option<ThreadState>> = const { RefCell::new(None) };
    static CONSUMER_ACTIVE: Cell<bool> = const { Cell::new(false) };
    static INTERNAL_SCOPE: Cell<u32> = const { Cell::new(0) };
}

/// Chunks whose dispatch was deferred past the thread-local borrow.
pub(crate) struct PendingDispatch {
    chunks: [Option<ChunkRef>; PENDING_CAP],
    len: usize,
}

impl PendingDispatch {
    pub fn new() -> Self {
        Self {
            chunks: [None; PENDING_CAP],
            len: 0,
        }
    }

    fn push(&mut self, chunk: ChunkRef) {
        debug_assert!(self.len < PENDING_CAP);
        if self.len < PENDING_CAP {
            self.chunks[self.len] = Some(chunk);
            self.len += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn drain(&mut self) -> impl Iterator<Item = ChunkRef> + '_ {
        let len = self.len;
        self.len = 0;
        self.chunks[..len].iter_mut().filter_map(Option::take)
    }
}

/// Thread-local producer state.
pub(crate) struct ThreadState {
    /// Preallocated chunk ring, filled lazily.
    chunks: [Option<&'static EventChunk>; CHUNK_PER_THREAD],
    /// Ring cursor.
    chunk_index: usize,
    /// The chunk currently being written.
    current: Option<ChunkRef>,
    /// Recent stack hashes, a ring parallel to the last inserted events.
    cache: [u64; CACHE_SIZE],
    cache_index: usize,
    /// Pre-init temporary chunks awaiting the consumer.
    startup_overflow: [Option<ChunkRef>; STARTUP_OVERFLOW_CAP],
    startup_len: usize,
    /// Set once the startup backlog has been dispatched.
    startup_flushed: bool,
}

impl ThreadState {
    fn new() -> Self {
        counters()
            .internal_static_bytes
            .add(std::mem::size_of::<ThreadState>());
        Self {
            chunks: [None; CHUNK_PER_THREAD],
            chunk_index: 0,
            current: None,
            cache: [0; CACHE_SIZE],
            cache_index: 0,
            startup_overflow: [None; STARTUP_OVERFLOW_CAP],
            startup_len: 0,
            startup_flushed: false,
        }
    }

    /// Record an allocation event. Returns the stack hash for the header.
    fn record_alloc(&mut self, size: usize, pending: &mut PendingDispatch) -> u64 {
        if in_internal_scope() {
            counters().internal_bytes.add(size);
        }
        let Some(chunk) = self.acquire_chunk(pending) else {
            return 0;
        };
        // SAFETY: the chunk is owned by this producer (not Pending).
        let data = unsafe { chunk.get().data_mut() };

        let cursor = data.frame_cursor;
        let (count, hash) = platform::capture_stack(
            INTERNAL_FRAME_TO_SKIP,
            &mut data.frames[cursor..cursor + STACK_PER_ALLOC],
        );

        if let Some(back) = self.find_in_cache(hash) {
            if back < data.event_count {
                let index = data.event_count - 1 - back;
                data.size_delta[index] += size as isize;
                return hash;
            }
        }

        let index = data.event_count;
        data.size_delta[index] = size as isize;
        data.stack_hash[index] = hash;
        data.frame_offset[index] = cursor as i32;
        data.frame_count[index] = count;
        data.event_count += 1;
        data.frame_cursor += count as usize;
        self.cache_insert(hash);
        hash
    }

    /// Record a free event using the hash and size read from the header.
    fn record_free(&mut self, hash: u64, size: usize, pending: &mut PendingDispatch) {
        if in_internal_scope() {
            counters().internal_bytes.sub(size);
        }
        let Some(chunk) = self.acquire_chunk(pending) else {
            return;
        };
        // SAFETY: the chunk is owned by this producer (not Pending).
        let data = unsafe { chunk.get().data_mut() };

        if let Some(back) = self.find_in_cache(hash) {
            if back < data.event_count {
                let index = data.event_count - 1 - back;
                data.size_delta[index] -= size as isize;
                return;
            }
        }

        let index = data.event_count;
        data.size_delta[index] = -(size as isize);
        data.stack_hash[index] = hash;
        data.frame_offset[index] = NO_FRAMES;
        data.frame_count[index] = 0;
        data.event_count += 1;
        self.cache_insert(hash);
    }

    /// Get a writable chunk, rotating when the current one is full.
    fn acquire_chunk(&mut self, pending: &mut PendingDispatch) -> Option<ChunkRef> {
        let status = running_status();

        if status != RunningStatus::Running {
            // Startup (or shutdown): record one-shot into preallocated
            // chunks, keep overflow aside for the consumer-to-be.
            if let Some(current) = self.current {
                // SAFETY: producer-owned chunk.
                if !unsafe { current.get().data() }.is_full() {
                    return Some(current);
                }
            }
            if let Some(old) = self.current.take() {
                self.retain_startup(old);
            }
            if let Some(chunk) = self.next_preallocated(status) {
                self.current = Some(chunk);
                return self.current;
            }
            let chunk = EventChunk::alloc_temporary()?;
            self.reset_cache();
            self.current = Some(chunk);
            return self.current;
        }

        if !self.startup_flushed {
            self.flush_startup(pending);
        }

        if let Some(current) = self.current {
            // SAFETY: producer-owned chunk.
            if !unsafe { current.get().data() }.is_full() {
                return Some(current);
            }
        }

        // Retire the current chunk.
        if let Some(old) = self.current.take() {
            if old.get().status() != ChunkStatus::Temporary {
                old.get().set_status(ChunkStatus::Pending);
            }
            pending.push(old);
        }

        let chunk = match self.next_preallocated(status) {
            Some(chunk) => chunk,
            None => {
                // The next ring chunk is still pending: the consumer is
                // behind. Fall back to a heap chunk rather than wait.
                diagnostics::emit_once(&kind::LA201, &TEMP_PRESSURE_REPORTED);
                let chunk = EventChunk::alloc_temporary()?;
                self.reset_cache();
                chunk
            }
        };
        self.current = Some(chunk);
        self.current
    }

    /// Retire the current chunk for dispatch without acquiring a
    /// replacement; the next event will. Empty chunks stay put.
    fn flush_current_chunk(&mut self, pending: &mut PendingDispatch) {
        if !self.startup_flushed {
            self.flush_startup(pending);
        }
        let Some(current) = self.current else {
            return;
        };
        // SAFETY: producer-owned chunk.
        if unsafe { current.get().data() }.event_count == 0 {
            return;
        }
        self.current = None;
        if current.get().status() != ChunkStatus::Temporary {
            current.get().set_status(ChunkStatus::Pending);
        }
        pending.push(current);
    }

    /// Advance the ring and claim the next preallocated chunk, unless it
    /// is still in the consumer's hands.
    fn next_preallocated(&mut self, status: RunningStatus) -> Option<ChunkRef> {
        // Outside RUNNING, preallocated chunks are one-shot.
        if status != RunningStatus::Running && self.chunk_index + 1 >= CHUNK_PER_THREAD {
            return None;
        }
        self.chunk_index = (self.chunk_index + 1) % CHUNK_PER_THREAD;
        let slot = &mut self.chunks[self.chunk_index];
        let chunk: &'static EventChunk = match slot {
            Some(chunk) => *chunk,
            None => {
                let chunk = EventChunk::alloc_static()?;
                *slot = Some(chunk);
                chunk
            }
        };
        if chunk.status() == ChunkStatus::Pending {
            return None;
        }
        self.reset_cache();
        // SAFETY: a non-pending ring chunk belongs to this producer.
        unsafe { chunk.data_mut().reset() };
        Some(ChunkRef::from_static(chunk))
    }

    /// Keep a retired pre-init chunk for later dispatch.
    ///
    /// Ring chunks stay reachable through the ring; only temporary chunks
    /// need the side list. Beyond its capacity the chunk is released and
    /// its events are lost, which bounds pre-init memory.
    fn retain_startup(&mut self, old: ChunkRef) {
        if old.get().status() != ChunkStatus::Temporary {
            return;
        }
        if self.startup_len < STARTUP_OVERFLOW_CAP {
            self.startup_overflow[self.startup_len] = Some(old);
            self.startup_len += 1;
        } else {
            // SAFETY: the chunk was never dispatched; this thread holds
            // the only reference.
            unsafe { old.free_temporary() };
        }
    }

    /// First acquisition after `init()`: dispatch everything recorded
    /// during startup, in fill order.
    fn flush_startup(&mut self, pending: &mut PendingDispatch) {
        self.startup_flushed = true;
        for slot in self.chunks.iter() {
            let Some(&chunk) = slot.as_ref() else { continue };
            if let Some(current) = self.current {
                if std::ptr::eq(chunk, current.get()) {
                    continue;
                }
            }
            if chunk.status() != ChunkStatus::Treated {
                continue;
            }
            // SAFETY: a treated ring chunk belongs to this producer.
            if unsafe { chunk.data() }.event_count == 0 {
                continue;
            }
            chunk.set_status(ChunkStatus::Pending);
            pending.push(ChunkRef::from_static(chunk));
        }
        for slot in self.startup_overflow[..self.startup_len].iter_mut() {
            if let Some(chunk) = slot.take() {
                pending.push(chunk);
            }
        }
        self.startup_len = 0;
    }

    /// Distance (in events back from the newest) at which `hash` was last
    /// inserted, if it is still in the cache window.
    fn find_in_cache(&self, hash: u64) -> Option<usize> {
        if hash == 0 {
            return None; // zero marks empty cache slots
        }
        for distance in 0..CACHE_SIZE - 1 {
            let index = (self.cache_index + CACHE_SIZE - 1 - distance) % CACHE_SIZE;
            if self.cache[index] == hash {
                return Some(distance);
            }
        }
        None
    }

    fn cache_insert(&mut self, hash: u64) {
        self.cache[self.cache_index] = hash;
        self.cache_index = (self.cache_index + 1) % CACHE_SIZE;
    }

    /// The cache pairs positions with event slots of the current chunk,
    /// so it must be emptied whenever the writing chunk changes.
    fn reset_cache(&mut self) {
        self.cache = [0; CACHE_SIZE];
        self.cache_index = 0;
    }
}

fn with_tls<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut ThreadState) -> R,
{
    TLS.try_with(|cell| {
        // A re-entrant borrow (host allocator called back into the tracer
        // from inside the producer) or a dead TLS during thread teardown
        // skips recording; the host's allocation itself still proceeds.
        let mut borrow = cell.try_borrow_mut().ok()?;
        let state = borrow.get_or_insert_with(ThreadState::new);
        Some(f(state))
    })
    .ok()
    .flatten()
}

/// Record an allocation event; returns the stack hash for the header.
pub(crate) fn log_alloc(size: usize) -> u64 {
    let mut pending = PendingDispatch::new();
    let hash = with_tls(|state| state.record_alloc(size, &mut pending)).unwrap_or(0);
    flush_pending(&mut pending);
    hash
}

/// Record a free event for a block carrying `hash` in its header.
pub(crate) fn log_free(hash: u64, size: usize) {
    let mut pending = PendingDispatch::new();
    with_tls(|state| state.record_free(hash, size, &mut pending));
    flush_pending(&mut pending);
}

/// Retire this thread's current chunk and dispatch it.
pub(crate) fn flush_current() {
    let mut pending = PendingDispatch::new();
    with_tls(|state| {
        state.flush_current_chunk(&mut pending);
    });
    flush_pending(&mut pending);
}

fn flush_pending(pending: &mut PendingDispatch) {
    if pending.is_empty() {
        return;
    }
    match global::global() {
        Some(global) => {
            for chunk in pending.drain() {
                global.queue.dispatch(global, chunk);
            }
        }
        None => {
            // No consumer exists; return the chunks instead of leaking
            // them as permanently pending.
            for chunk in pending.drain() {
                match chunk.get().status() {
                    // SAFETY: an undispatched temporary has one owner.
                    ChunkStatus::Temporary => unsafe { chunk.free_temporary() },
                    _ => chunk.get().set_status(ChunkStatus::Treated),
                }
            }
        }
    }
}

// ---- internal scope and consumer-depth marks ----

/// RAII mark for tracer-internal code paths; only statistics look at it.
pub(crate) struct InternalScope;

impl InternalScope {
    pub fn enter() -> Self {
        let _ = INTERNAL_SCOPE.try_with(|scope| scope.set(scope.get() + 1));
        InternalScope
    }
}

impl Drop for InternalScope {
    fn drop(&mut self) {
        let _ = INTERNAL_SCOPE.try_with(|scope| scope.set(scope.get().saturating_sub(1)));
    }
}

pub(crate) fn in_internal_scope() -> bool {
    INTERNAL_SCOPE.try_with(|scope| scope.get() > 0).unwrap_or(false)
}

/// Mark this thread as running the consumer. Returns the previous mark.
pub(crate) fn enter_consumer() -> bool {
    CONSUMER_ACTIVE
        .try_with(|active| active.replace(true))
        .unwrap_or(false)
}

pub(crate) fn leave_consumer(previous: bool) {
    let _ = CONSUMER_ACTIVE.try_with(|active| active.set(previous));
}

/// True while the consumer runs beneath the current stack frame; dispatch
/// uses it to avoid re-entering the aggregation lock.
pub(crate) fn is_consumer_active() -> bool {
    CONSUMER_ACTIVE.try_with(|active| active.get()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_finds_recent_hashes_backwards() {
        let mut state = ThreadState::new();
        state.cache_insert(0xA);
        state.cache_insert(0xB);
        state.cache_insert(0xC);
        assert_eq!(state.find_in_cache(0xC), Some(0));
        assert_eq!(state.find_in_cache(0xB), Some(1));
        assert_eq!(state.find_in_cache(0xA), Some(2));
        assert_eq!(state.find_in_cache(0xF), None);
    }

    #[test]
    fn cache_window_is_bounded() {
        let mut state = ThreadState::new();
        state.cache_insert(0x1);
        // CACHE_SIZE - 1 newer entries push 0x1 out of the search window.
        for i in 0..CACHE_SIZE as u64 - 1 {
            state.cache_insert(0x100 + i);
        }
        assert_eq!(state.find_in_cache(0x1), None);
    }

    #[test]
    fn cache_ignores_zero() {
        let state = ThreadState::new();
        assert_eq!(state.find_in_cache(0), None);
    }

    #[test]
    fn cache_reset_clears_window() {
        let mut state = ThreadState::new();
        state.cache_insert(0xAA);
        state.reset_cache();
        assert_eq!(state.find_in_cache(0xAA), None);
    }

    #[test]
    fn same_site_events_coalesce_into_one_slot() {
        let mut state = ThreadState::new();
        let mut pending = PendingDispatch::new();

        // Identical call site, identical stack: one chunk slot.
        let mut hashes = Vec::new();
        for _ in 0..3 {
            hashes.push(state.record_alloc(10, &mut pending));
        }
        assert_eq!(hashes[0], hashes[1]);
        assert_eq!(hashes[1], hashes[2]);

        let chunk = state.current.expect("chunk acquired");
        // SAFETY: producer-owned chunk on this thread.
        let data = unsafe { chunk.get().data() };
        assert_eq!(data.event_count, 1);
        assert_eq!(data.size_delta[0], 30);

        // A free with the same hash folds back into the same slot.
        state.record_free(hashes[0], 10, &mut pending);
        let data = unsafe { chunk.get().data() };
        assert_eq!(data.event_count, 1);
        assert_eq!(data.size_delta[0], 20);

        assert!(pending.is_empty());
    }

    #[test]
    fn pending_dispatch_is_bounded() {
        let mut pending = PendingDispatch::new();
        assert!(pending.is_empty());
        let chunk = EventChunk::alloc_temporary().unwrap();
        pending.push(chunk);
        assert!(!pending.is_empty());
        let drained: Vec<_> = pending.drain().collect();
        assert_eq!(drained.len(), 1);
        assert!(pending.is_empty());
        // SAFETY: never dispatched, single owner.
        unsafe { chunk.free_temporary() };
    }

    #[test]
    fn internal_scope_nests() {
        assert!(!in_internal_scope());
        {
            let _outer = InternalScope::enter();
            assert!(in_internal_scope());
            {
                let _inner = InternalScope::enter();
                assert!(in_internal_scope());
            }
            assert!(in_internal_scope());
        }
        assert!(!in_internal_scope());
    }

    #[test]
    fn consumer_mark_restores() {
        assert!(!is_consumer_active());
        let previous = enter_consumer();
        assert!(is_consumer_active());
        leave_consumer(previous);
        assert!(!is_consumer_active());
    }
}
