//! Read-only snapshot API.
//!
//! A renderer pulls aggregates through three query shapes, all under the
//! aggregation lock held by a [`TracerSnapshot`] guard:
//!
//! - **By function**: the global symbol list, optionally filtered by an
//!   ASCII case-insensitive substring.
//! - **By call graph**: the root edges and their ordered children.
//! - **By watch**: registered functions or calls answered with their
//!   current totals and a short sampled history.
//!
//! Views borrow the guard; nothing escapes the lock. The tracer retains no
//! history beyond the watch rings - the renderer caches between polls.

use crate::aggregate::engine::AggregateState;
use crate::aggregate::graph::{EdgeId, SymbolId};
use crate::api::config::HISTORY_FRAMES;
use crate::core::global;
use crate::core::tls::InternalScope;
use crate::sync::mutex::MutexGuard;

/// Seconds between watch samples, matching a ~3 Hz refresh.
const SAMPLE_INTERVAL: f32 = 1.0 / 3.0;

/// Take a snapshot of the aggregate state.
///
/// Holds the aggregation lock until dropped; producers are unaffected,
/// but the consumer stalls, so keep snapshots short-lived. Returns `None`
/// before `init()`.
pub fn snapshot() -> Option<TracerSnapshot> {
    global::global().map(|global| TracerSnapshot {
        state: global.aggregate.lock(),
    })
}

/// A locked view over everything aggregated so far.
pub struct TracerSnapshot {
    state: MutexGuard<'static, AggregateState>,
}

impl TracerSnapshot {
    /// Iterate every known function, most recently discovered first.
    pub fn functions(&self) -> Functions<'_> {
        Functions {
            state: &self.state,
            cursor: self.state.symbol_head(),
        }
    }

    /// Iterate functions whose name contains `pattern` (ASCII
    /// case-insensitive).
    pub fn functions_matching<'a>(
        &'a self,
        pattern: &'a str,
    ) -> impl Iterator<Item = FunctionView<'a>> + 'a {
        self.functions()
            .filter(move |function| contains_ignore_ascii_case(function.name(), pattern))
    }

    /// First function matching `pattern`, if any.
    pub fn find_function<'a>(&'a self, pattern: &'a str) -> Option<FunctionView<'a>> {
        self.functions_matching(pattern).next()
    }

    /// Iterate the call-graph roots in first-seen order.
    pub fn roots(&self) -> impl Iterator<Item = CallView<'_>> + '_ {
        self.state.roots().iter().map(|&id| CallView {
            state: &self.state,
            id,
        })
    }

    /// Sum of live bytes over all call-graph roots.
    pub fn total_live_bytes(&self) -> isize {
        self.state
            .roots()
            .iter()
            .map(|&id| self.state.edge(id).total_bytes)
            .sum()
    }

    /// The `count` functions holding the most live bytes, descending.
    pub fn top_functions(&self, count: usize) -> Vec<FunctionView<'_>> {
        let mut functions: Vec<FunctionView<'_>> = self.functions().collect();
        functions.sort_by_key(|function| std::cmp::Reverse(function.total_bytes()));
        functions.truncate(count);
        functions
    }
}

/// One function in the aggregate state.
#[derive(Clone, Copy)]
pub struct FunctionView<'s> {
    state: &'s AggregateState,
    id: SymbolId,
}

impl<'s> FunctionView<'s> {
    /// The resolved (demangled) function name.
    pub fn name(&self) -> &'s str {
        self.state.symbol(self.id).name.as_deref().unwrap_or("?")
    }

    /// Live bytes across every stack this function appears in.
    pub fn total_bytes(&self) -> isize {
        self.state.symbol(self.id).total_bytes
    }

    /// Iterate the call locations of this function across all paths.
    pub fn calls(&self) -> Calls<'s> {
        Calls {
            state: self.state,
            cursor: self.state.symbol(self.id).edges_head,
        }
    }
}

/// One call location in the call graph.
#[derive(Clone, Copy)]
pub struct CallView<'s> {
    state: &'s AggregateState,
    id: EdgeId,
}

impl<'s> CallView<'s> {
    /// Live bytes flowing through this call location.
    pub fn total_bytes(&self) -> isize {
        self.state.edge(self.id).total_bytes
    }

    /// Distance from the root of its stack.
    pub fn depth(&self) -> usize {
        self.state.edge(self.id).depth as usize
    }

    /// The function at this location.
    pub fn function(&self) -> Option<FunctionView<'s>> {
        self.state.edge(self.id).symbol.map(|id| FunctionView {
            state: self.state,
            id,
        })
    }

    /// The calling location, `None` for roots.
    pub fn parent(&self) -> Option<CallView<'s>> {
        self.state.edge(self.id).parent.map(|id| CallView {
            state: self.state,
            id,
        })
    }

    /// Callee locations in insertion order; the renderer sorts on demand.
    pub fn children(&self) -> impl Iterator<Item = CallView<'s>> + 's {
        let state = self.state;
        self.state
            .edge(self.id)
            .children
            .iter()
            .map(move |&id| CallView { state, id })
    }
}

/// Iterator over the global function list.
pub struct Functions<'s> {
    state: &'s AggregateState,
    cursor: Option<SymbolId>,
}

impl<'s> Iterator for Functions<'s> {
    type Item = FunctionView<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.state.symbol(id).next;
        Some(FunctionView {
            state: self.state,
            id,
        })
    }
}

/// Iterator over the call locations sharing one function.
pub struct Calls<'s> {
    state: &'s AggregateState,
    cursor: Option<EdgeId>,
}

impl<'s> Iterator for Calls<'s> {
    type Item = CallView<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.state.edge(id).same_symbol;
        Some(CallView {
            state: self.state,
            id,
        })
    }
}

// ---- watches and histograms ----

enum WatchTarget {
    Function(SymbolId),
    Call(EdgeId),
}

struct Watch {
    target: WatchTarget,
    name: Box<str>,
    samples: [isize; HISTORY_FRAMES],
    cursor: usize,
    current: isize,
}

/// Registered watches and their sampled histories.
pub(crate) struct WatchRegistry {
    watches: Vec<Watch>,
    accumulated: f32,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            watches: Vec::new(),
            accumulated: 0.0,
        }
    }

    fn add_function(&mut self, id: SymbolId, name: &str) -> bool {
        let exists = self.watches.iter().any(
            |watch| matches!(watch.target, WatchTarget::Function(existing) if existing == id),
        );
        if exists {
            return false;
        }
        self.watches.push(Watch {
            target: WatchTarget::Function(id),
            name: name.into(),
            samples: [0; HISTORY_FRAMES],
            cursor: 0,
            current: 0,
        });
        true
    }

    fn add_call(&mut self, id: EdgeId, name: &str) -> bool {
        let exists = self
            .watches
            .iter()
            .any(|watch| matches!(watch.target, WatchTarget::Call(existing) if existing == id));
        if exists {
            return false;
        }
        self.watches.push(Watch {
            target: WatchTarget::Call(id),
            name: name.into(),
            samples: [0; HISTORY_FRAMES],
            cursor: 0,
            current: 0,
        });
        true
    }

    /// Accumulate frame time; true when a sample is due.
    fn tick(&mut self, dt: f32) -> bool {
        self.accumulated += dt;
        if self.accumulated < SAMPLE_INTERVAL {
            return false;
        }
        self.accumulated = 0.0;
        true
    }

    fn sample(&mut self, state: &AggregateState) {
        for watch in &mut self.watches {
            watch.current = match watch.target {
                WatchTarget::Function(id) => state.symbol(id).total_bytes,
                WatchTarget::Call(id) => state.edge(id).total_bytes,
            };
            watch.samples[watch.cursor] = watch.current;
            watch.cursor = (watch.cursor + 1) % HISTORY_FRAMES;
        }
    }
}

/// Watch a function's total; its history is sampled by [`display`].
///
/// Returns false when no function matches or the watch already exists.
pub fn watch_function(pattern: &str) -> bool {
    let Some(global) = global::global() else {
        return false;
    };
    // Lock order: aggregation lock first, then the watch registry.
    let state = global.aggregate.lock();
    let Some(function) = find_symbol(&state, pattern) else {
        return false;
    };
    let name = state.symbol(function).name.clone().unwrap_or_default();
    let mut watches = global.watches.lock().expect("watch registry lock");
    watches.add_function(function, &name)
}

/// Watch one call location of a function (its most recently discovered
/// path). Returns false when no function matches or it has no calls yet.
pub fn watch_call(pattern: &str) -> bool {
    let Some(global) = global::global() else {
        return false;
    };
    let state = global.aggregate.lock();
    let Some(function) = find_symbol(&state, pattern) else {
        return false;
    };
    let Some(edge) = state.symbol(function).edges_head else {
        return false;
    };
    let name = state.symbol(function).name.clone().unwrap_or_default();
    let mut watches = global.watches.lock().expect("watch registry lock");
    watches.add_call(edge, &name)
}

/// Drive watch sampling from the renderer's frame loop.
///
/// `dt` is the elapsed seconds since the last call; watches sample about
/// three times per second regardless of the frame rate.
pub fn display(dt: f32) {
    let _scope = InternalScope::enter();
    let Some(global) = global::global() else {
        return;
    };
    let state = global.aggregate.lock();
    let mut watches = global.watches.lock().expect("watch registry lock");
    if watches.tick(dt) {
        watches.sample(&state);
    }
}

/// An owned copy of one watch's state, safe to hold without any lock.
#[derive(Debug, Clone)]
pub struct HistogramSample {
    /// The watched function's name.
    pub name: String,
    /// False when the watch covers a single call location.
    pub is_function: bool,
    /// Ring of the last [`HISTORY_FRAMES`] sampled totals.
    pub samples: Vec<isize>,
    /// Index of the oldest sample in `samples`.
    pub cursor: usize,
    /// Total at the most recent sample.
    pub current: isize,
}

/// Copy out the registered watches and their histories.
pub fn histograms() -> Vec<HistogramSample> {
    let Some(global) = global::global() else {
        return Vec::new();
    };
    let watches = global.watches.lock().expect("watch registry lock");
    watches
        .watches
        .iter()
        .map(|watch| HistogramSample {
            name: watch.name.to_string(),
            is_function: matches!(watch.target, WatchTarget::Function(_)),
            samples: watch.samples.to_vec(),
            cursor: watch.cursor,
            current: watch.current,
        })
        .collect()
}

fn find_symbol(state: &AggregateState, pattern: &str) -> Option<SymbolId> {
    let mut cursor = state.symbol_head();
    while let Some(id) = cursor {
        if let Some(name) = state.symbol(id).name.as_deref() {
            if contains_ignore_ascii_case(name, pattern) {
                return Some(id);
            }
        }
        cursor = state.symbol(id).next;
    }
    None
}

/// ASCII case-insensitive substring search, allocation-free.
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > haystack.len() {
        return false;
    }
    for start in 0..=haystack.len() - needle.len() {
        if haystack[start..start + needle.len()].eq_ignore_ascii_case(needle) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_search_is_case_insensitive() {
        assert!(contains_ignore_ascii_case("MyEngine::update", "engine"));
        assert!(contains_ignore_ascii_case("MyEngine::update", "UPDATE"));
        assert!(!contains_ignore_ascii_case("MyEngine::update", "render"));
        assert!(contains_ignore_ascii_case("anything", ""));
        assert!(!contains_ignore_ascii_case("ab", "abc"));
    }

    #[test]
    fn registry_dedupes_targets() {
        let mut registry = WatchRegistry::new();
        assert!(registry.add_function(SymbolId(1), "alpha"));
        assert!(!registry.add_function(SymbolId(1), "alpha"));
        assert!(registry.add_function(SymbolId(2), "beta"));
        assert!(registry.add_call(EdgeId(1), "alpha"));
        assert!(!registry.add_call(EdgeId(1), "alpha"));
        assert_eq!(registry.watches.len(), 3);
    }

    #[test]
    fn tick_samples_at_interval() {
        let mut registry = WatchRegistry::new();
        assert!(!registry.tick(0.1));
        assert!(!registry.tick(0.1));
        assert!(registry.tick(0.2)); // crosses 1/3 second
        assert!(!registry.tick(0.0));
    }

    #[test]
    fn sample_ring_wraps() {
        let mut registry = WatchRegistry::new();
        registry.add_function(SymbolId(0), "ring");
        // Drive the cursor all the way around the ring.
        let resolver = Box::new(NullResolver);
        let state = crate::aggregate::engine::AggregateState::with_capacities(resolver, 8, 8, 8);
        for _ in 0..HISTORY_FRAMES + 3 {
            registry.sample(&state);
        }
        assert_eq!(registry.watches[0].cursor, 3);
    }

    struct NullResolver;

    impl crate::platform::SymbolResolver for NullResolver {
        fn resolve(&mut self, _addr: usize) -> crate::platform::ResolvedFrame {
            crate::platform::ResolvedFrame {
                name: None,
                base: 0,
            }
        }
    }
}
