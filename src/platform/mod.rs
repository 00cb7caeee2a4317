//! Platform collaborators: stack capture and symbol resolution.
//!
//! Capture runs inside every traced allocation, so it must not allocate
//! and must not resolve symbols. Resolution is deferred to the consumer
//! and sits behind [`SymbolResolver`] so the aggregation engine can be
//! driven by a deterministic resolver in tests.

use crate::util::hash::hash_frames;

/// Sentinel planted in frame slot 0 when a stack was truncated.
pub(crate) const TRUNCATED_FRAME: usize = usize::MAX;

/// Name attributed to truncated stacks and unresolvable addresses.
pub(crate) const TRUNCATED_NAME: &str = "Truncated";

/// Deepest stack the walker will follow before truncating.
pub(crate) const MAX_RAW_STACK_DEPTH: usize = 255;

/// Capture the current call stack into `out`, innermost first.
///
/// The first `skip` frames (the tracer's own) are dropped. When the stack
/// is deeper than `out`, the outermost frames are kept - they anchor the
/// call graph at its real roots - and slot 0 is planted with
/// [`TRUNCATED_FRAME`].
///
/// Returns the stored frame count and a hash that is deterministic on the
/// exact frame sequence stored.
pub(crate) fn capture_stack(skip: usize, out: &mut [usize]) -> (u8, u64) {
    let mut raw = [0usize; MAX_RAW_STACK_DEPTH];
    let mut total = 0usize;
    backtrace::trace(|frame| {
        if total == MAX_RAW_STACK_DEPTH {
            return false;
        }
        raw[total] = frame.ip() as usize;
        total += 1;
        true
    });

    let frames = &raw[skip.min(total)..total];
    let count = if frames.len() > out.len() {
        let keep = out.len() - 1;
        out[0] = TRUNCATED_FRAME;
        out[1..1 + keep].copy_from_slice(&frames[frames.len() - keep..]);
        out.len()
    } else {
        out[..frames.len()].copy_from_slice(frames);
        frames.len()
    };

    (count as u8, hash_frames(&out[..count]))
}

/// One resolved frame.
///
/// `base` is the function's start address, which is what collapses
/// multiple call sites inside one function into a single canonical symbol.
/// An unresolvable frame reports `name: None, base: 0` and every such
/// frame shares the canonical "Truncated" entry.
pub(crate) struct ResolvedFrame {
    pub name: Option<String>,
    pub base: usize,
}

impl ResolvedFrame {
    fn unresolved() -> Self {
        Self { name: None, base: 0 }
    }
}

/// Resolves return addresses to function identities.
pub(crate) trait SymbolResolver: Send {
    fn resolve(&mut self, addr: usize) -> ResolvedFrame;
}

/// Production resolver over the `backtrace` crate.
pub(crate) struct BacktraceResolver;

impl SymbolResolver for BacktraceResolver {
    fn resolve(&mut self, addr: usize) -> ResolvedFrame {
        if addr == TRUNCATED_FRAME || addr == 0 {
            return ResolvedFrame::unresolved();
        }

        let mut out = ResolvedFrame::unresolved();
        backtrace::resolve(addr as *mut std::ffi::c_void, |symbol| {
            if out.name.is_some() {
                return;
            }
            if let Some(name) = symbol.name() {
                out.name = Some(name.to_string());
            }
            if let Some(base) = symbol.addr() {
                out.base = base as usize;
            }
        });

        if out.name.is_some() && out.base == 0 {
            // No symbol start available; fall back to the call site itself
            // so at least this site keeps a stable identity.
            out.base = addr;
        }
        if out.name.is_none() {
            out.base = 0;
        }
        out
    }
}
