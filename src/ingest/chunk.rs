//! Event chunks: the producer-to-consumer batch unit.
//!
//! A chunk is a pre-sized record of parallel arrays written sequentially by
//! exactly one producer thread, then read sequentially by the single
//! consumer. The `status` atomic is the only cross-thread synchronization:
//!
//! ```text
//! Treated  --producer acquires-->  (in use, producer-private)
//! (in use) --producer hands off--> Pending --consumer processes--> Treated
//! Temporary (heap overflow chunk)          --consumer processes--> freed
//! ```
//!
//! Preallocated chunks live for the process (they are leaked as `&'static`
//! on first use); temporary chunks are freed by the consumer.

use std::cell::UnsafeCell;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::api::config::{ALLOC_PER_CHUNK, FRAME_BUFFER_LEN, STACK_PER_ALLOC};
use crate::api::stats::counters;
use crate::core::raw::{raw_alloc_zeroed, raw_free};

/// Lifecycle state of a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub(crate) enum ChunkStatus {
    /// Consumed (or never used); the owning producer may reuse it.
    Treated = 0,
    /// Handed off; only the consumer may touch it.
    Pending = 1,
    /// Heap-allocated overflow chunk; freed by the consumer.
    Temporary = 2,
}

impl ChunkStatus {
    fn from_raw(raw: usize) -> Self {
        match raw {
            1 => ChunkStatus::Pending,
            2 => ChunkStatus::Temporary,
            _ => ChunkStatus::Treated,
        }
    }
}

/// Sentinel frame offset for free events that carry no captured stack.
pub(crate) const NO_FRAMES: i32 = -1;

/// The event payload of a chunk.
///
/// Parallel arrays indexed by event slot, plus a packed frame buffer that
/// event slots point into via `frame_offset`.
#[repr(C)]
pub(crate) struct ChunkData {
    /// Signed byte delta per event: positive alloc, negative free.
    pub size_delta: [isize; ALLOC_PER_CHUNK],
    /// Stack hash per event.
    pub stack_hash: [u64; ALLOC_PER_CHUNK],
    /// Offset into `frames`, or [`NO_FRAMES`].
    pub frame_offset: [i32; ALLOC_PER_CHUNK],
    /// Captured frame count per event.
    pub frame_count: [u8; ALLOC_PER_CHUNK],
    /// Packed return addresses, innermost first per event.
    pub frames: [usize; FRAME_BUFFER_LEN],
    /// Number of event slots in use.
    pub event_count: usize,
    /// Next free index in `frames`.
    pub frame_cursor: usize,
}

impl ChunkData {
    /// A chunk is full when either the event slots or the frame buffer
    /// cannot take one more worst-case event.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.event_count >= ALLOC_PER_CHUNK || self.frame_cursor + STACK_PER_ALLOC > FRAME_BUFFER_LEN
    }

    /// Reset cursors for reuse. Stale array contents are simply overwritten.
    pub fn reset(&mut self) {
        self.event_count = 0;
        self.frame_cursor = 0;
    }

    /// The frame slice of one event, empty for stack-less frees.
    pub fn event_frames(&self, index: usize) -> &[usize] {
        let offset = self.frame_offset[index];
        if offset < 0 {
            return &[];
        }
        let start = offset as usize;
        &self.frames[start..start + self.frame_count[index] as usize]
    }
}

/// A chunk: status atomic plus the producer/consumer-shared payload.
///
/// # Ownership protocol
///
/// The payload behind `data` is intentionally not guarded by a lock. The
/// invariant making the `UnsafeCell` sound:
///
/// - While `status` is `Treated`, only the producer thread that owns the
///   chunk touches the payload (and only one thread ever owns a chunk).
/// - The producer publishes with a release store of `Pending`; after the
///   consumer's acquire load it alone reads the payload.
/// - `Temporary` chunks are producer-private until dispatched, then
///   consumer-private until freed.
#[repr(C)]
pub(crate) struct EventChunk {
    status: AtomicUsize,
    data: UnsafeCell<ChunkData>,
}

// SAFETY: cross-thread access to `data` is serialized by the status
// protocol documented above.
unsafe impl Sync for EventChunk {}
unsafe impl Send for EventChunk {}

impl EventChunk {
    /// Allocate a process-lifetime chunk for a producer ring.
    ///
    /// Returns `None` on allocation failure. The zeroed block is a valid
    /// chunk: status `Treated`, both cursors zero.
    pub fn alloc_static() -> Option<&'static EventChunk> {
        let ptr = raw_alloc_zeroed(mem::size_of::<EventChunk>());
        if ptr.is_null() {
            return None;
        }
        counters().internal_static_bytes.add(mem::size_of::<EventChunk>());
        // SAFETY: the block is zeroed, which is a valid EventChunk bit
        // pattern, and it is never freed.
        Some(unsafe { &*(ptr as *const EventChunk) })
    }

    /// Allocate a heap overflow chunk, owned by whoever holds the ref.
    pub fn alloc_temporary() -> Option<ChunkRef> {
        let ptr = raw_alloc_zeroed(mem::size_of::<EventChunk>());
        if ptr.is_null() {
            return None;
        }
        // SAFETY: zeroed block is a valid EventChunk.
        let chunk = unsafe { &*(ptr as *const EventChunk) };
        chunk.status.store(ChunkStatus::Temporary as usize, Ordering::Relaxed);
        counters().internal_bytes.add(mem::size_of::<EventChunk>());
        counters().temporary_chunks.add(1);
        NonNull::new(ptr as *mut EventChunk).map(ChunkRef)
    }

    pub fn status(&self) -> ChunkStatus {
        ChunkStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Publish a status transition, releasing all prior payload writes.
    pub fn set_status(&self, status: ChunkStatus) {
        self.status.store(status as usize, Ordering::Release);
    }

    /// Shared view of the payload.
    ///
    /// # Safety
    /// The caller must be the side the status protocol currently grants
    /// access to (consumer for `Pending`/dispatched `Temporary` chunks).
    pub unsafe fn data(&self) -> &ChunkData {
        &*self.data.get()
    }

    /// Mutable view of the payload.
    ///
    /// # Safety
    /// The caller must be the producer thread owning the chunk, and the
    /// chunk must not be `Pending`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut(&self) -> &mut ChunkData {
        &mut *self.data.get()
    }
}

/// A shareable chunk handle.
///
/// Plain pointer plus the status protocol; no reference counting, matching
/// the chunk lifecycle (static chunks never die, temporary chunks die at a
/// single well-defined point in the consumer).
#[derive(Clone, Copy)]
pub(crate) struct ChunkRef(NonNull<EventChunk>);

// SAFETY: EventChunk is Sync; the payload protocol governs actual access.
unsafe impl Send for ChunkRef {}

impl ChunkRef {
    pub fn from_static(chunk: &'static EventChunk) -> Self {
        // SAFETY: a reference is never null.
        ChunkRef(unsafe { NonNull::new_unchecked(chunk as *const _ as *mut _) })
    }

    pub fn get(&self) -> &EventChunk {
        // SAFETY: static chunks live forever; temporary chunks are freed
        // only after their last handle is dropped by the consumer.
        unsafe { self.0.as_ref() }
    }

    /// Release a consumed temporary chunk.
    ///
    /// # Safety
    /// The chunk must be `Temporary`, fully processed, and no other handle
    /// to it may be used afterwards.
    pub unsafe fn free_temporary(self) {
        debug_assert_eq!(self.get().status(), ChunkStatus::Temporary);
        counters().internal_bytes.sub(mem::size_of::<EventChunk>());
        counters().temporary_chunks.sub(1);
        raw_free(self.0.as_ptr() as *mut u8);
    }
}
