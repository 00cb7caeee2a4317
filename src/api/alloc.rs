//! Allocation entry points.
//!
//! These keep the C allocator contract - null on failure, `free` takes
//! only a pointer - so a host can forward its `GlobalAlloc`, operator-new
//! overrides, or CRT hooks here unchanged. Every operation records one
//! event in the calling thread's chunk; the header written in front of the
//! returned pointer is what lets the matching free find its stack hash and
//! size with no lookup at all.

use std::ptr;

use crate::api::stats::counters;
use crate::core::header::{
    aligned_base, aligned_request_size, place_aligned, read_header, write_header, Header,
    HEADER_SIZE, MIN_ALIGNMENT,
};
use crate::core::raw;
use crate::core::tls;

/// Allocate `size` bytes, recording the allocation against the current
/// call stack. Returns null on allocation failure.
pub fn alloc(size: usize) -> *mut u8 {
    let Some(total) = size.checked_add(HEADER_SIZE) else {
        return ptr::null_mut();
    };
    let base = raw::raw_alloc(total);
    if base.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: the block holds `total` bytes; the user region starts after
    // the header.
    let user = unsafe { base.add(HEADER_SIZE) };
    let hash = tls::log_alloc(size);
    // SAFETY: the header area precedes `user` inside the same block.
    unsafe { write_header(user, Header::new(hash, size, false)) };
    counters().user_bytes.add(size);
    counters().real_bytes.add(size + HEADER_SIZE);
    user
}

/// Allocate `size` bytes aligned to `align` (a power of two, clamped to at
/// least 8). Returns null on failure or on an invalid alignment.
pub fn alloc_aligned(size: usize, align: usize) -> *mut u8 {
    let align = align.max(MIN_ALIGNMENT);
    if !align.is_power_of_two() {
        debug_assert!(false, "alloc_aligned: alignment must be a power of two");
        return ptr::null_mut();
    }
    let Some(total) = aligned_request_size(size, align) else {
        return ptr::null_mut();
    };
    let base = raw::raw_alloc(total);
    if base.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: the block holds `total` bytes, enough for the worst-case
    // aligned position plus the header area.
    let user = unsafe { place_aligned(base, align) };
    let hash = tls::log_alloc(size);
    // SAFETY: `place_aligned` reserved the header area before `user`.
    unsafe { write_header(user, Header::new(hash, size, true)) };
    counters().user_bytes.add(size);
    counters().real_bytes.add(size + HEADER_SIZE);
    debug_assert_eq!(user as usize % align, 0);
    user
}

/// Release a pointer from [`alloc`] or [`realloc`]. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by the non-aligned
/// allocation entry points, and must not be used afterwards.
pub unsafe fn dealloc(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let header = read_header(ptr);
    debug_assert!(!header.is_aligned(), "aligned pointer passed to dealloc");
    tls::log_free(header.hash(), header.size());
    counters().user_bytes.sub(header.size());
    counters().real_bytes.sub(header.size() + HEADER_SIZE);
    raw::raw_free(ptr.sub(HEADER_SIZE));
}

/// Release a pointer from [`alloc_aligned`] or [`realloc_aligned`].
/// Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by the aligned
/// allocation entry points, and must not be used afterwards.
pub unsafe fn dealloc_aligned(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let header = read_header(ptr);
    debug_assert!(header.is_aligned(), "non-aligned pointer passed to dealloc_aligned");
    tls::log_free(header.hash(), header.size());
    counters().user_bytes.sub(header.size());
    counters().real_bytes.sub(header.size() + HEADER_SIZE);
    raw::raw_free(aligned_base(ptr));
}

/// Resize an allocation with the usual realloc semantics.
///
/// A same-size call returns the pointer unchanged and records nothing;
/// otherwise a free of the old block and an allocation of the new one are
/// recorded, in that order. On failure the original block stays valid and
/// no event is recorded.
///
/// # Safety
/// `ptr` must be null or a live pointer from the non-aligned allocation
/// entry points; if reallocation succeeds the old pointer must not be
/// used.
pub unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    if ptr.is_null() {
        return alloc(size);
    }
    let header = read_header(ptr);
    debug_assert!(!header.is_aligned(), "aligned pointer passed to realloc");
    if size == 0 {
        dealloc(ptr);
        return alloc(0);
    }
    if size == header.size() {
        return ptr;
    }
    let Some(total) = size.checked_add(HEADER_SIZE) else {
        return ptr::null_mut();
    };
    let new_base = raw::raw_realloc(ptr.sub(HEADER_SIZE), total);
    if new_base.is_null() {
        return ptr::null_mut();
    }
    tls::log_free(header.hash(), header.size());
    let user = new_base.add(HEADER_SIZE);
    let hash = tls::log_alloc(size);
    write_header(user, Header::new(hash, size, false));
    counters().user_bytes.sub(header.size());
    counters().user_bytes.add(size);
    counters().real_bytes.sub(header.size());
    counters().real_bytes.add(size);
    user
}

/// Resize an aligned allocation, preserving contents up to the smaller
/// size. Same-size calls return the pointer unchanged.
///
/// # Safety
/// `ptr` must be null or a live pointer from the aligned allocation entry
/// points; if reallocation succeeds the old pointer must not be used.
pub unsafe fn realloc_aligned(ptr: *mut u8, size: usize, align: usize) -> *mut u8 {
    if ptr.is_null() {
        return alloc_aligned(size, align);
    }
    let header = read_header(ptr);
    debug_assert!(header.is_aligned(), "non-aligned pointer passed to realloc_aligned");
    if size == 0 {
        dealloc_aligned(ptr);
        return alloc_aligned(0, align);
    }
    if size == header.size() {
        return ptr;
    }
    // The aligned layout cannot be resized in place; go through a fresh
    // allocation.
    let fresh = alloc_aligned(size, align);
    if fresh.is_null() {
        return ptr::null_mut();
    }
    ptr::copy_nonoverlapping(ptr, fresh, header.size().min(size));
    dealloc_aligned(ptr);
    fresh
}
