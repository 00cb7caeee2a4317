//! The aggregation engine: the single consumer of event chunks.
//!
//! All mutation of the aggregate state happens here, under the one
//! process-wide aggregation lock. Events commute (counter additions and
//! set-inserts), so cross-thread chunk ordering does not matter; per-thread
//! ordering is preserved because chunks are dispatched in fill order.

use std::sync::atomic::AtomicBool;

use crate::aggregate::dictionary::Dictionary;
use crate::aggregate::graph::{Edge, EdgeId, EdgeKey, StackRecord, Symbol, SymbolId};
use crate::api::config::{ALLOC_DICTIONARY, STACK_DICTIONARY, STACK_PER_ALLOC, TREE_DICTIONARY};
use crate::api::stats::{counters, DictionaryStats};
use crate::diagnostics::{self, kind};
use crate::ingest::chunk::{ChunkData, ChunkRef, ChunkStatus};
use crate::platform::{SymbolResolver, TRUNCATED_NAME};

static SYMBOL_DICT_FULL: AtomicBool = AtomicBool::new(false);
static STACK_DICT_FULL: AtomicBool = AtomicBool::new(false);
static EDGE_DICT_FULL: AtomicBool = AtomicBool::new(false);
static TRUNCATION_SEEN: AtomicBool = AtomicBool::new(false);

/// A resolved stack: canonical symbols innermost first.
#[derive(Clone, Copy)]
struct ResolvedStack {
    frames: [Option<SymbolId>; STACK_PER_ALLOC],
    depth: u8,
}

/// Everything the consumer aggregates into, guarded by the aggregation
/// lock as one unit.
pub(crate) struct AggregateState {
    stacks: Dictionary<u64, StackRecord>,
    symbols: Dictionary<u64, Symbol>,
    edges: Dictionary<EdgeKey, Edge>,
    /// Head of the global symbol list, threaded through `Symbol::next`.
    symbol_head: Option<SymbolId>,
    /// Call-graph roots in first-seen order.
    roots: Vec<EdgeId>,
    resolver: Box<dyn SymbolResolver>,
}

impl AggregateState {
    pub fn new(resolver: Box<dyn SymbolResolver>) -> Self {
        Self::with_capacities(resolver, STACK_DICTIONARY, ALLOC_DICTIONARY, TREE_DICTIONARY)
    }

    /// Capacity-parameterized constructor, used directly by tests.
    pub fn with_capacities(
        resolver: Box<dyn SymbolResolver>,
        stack_capacity: usize,
        symbol_capacity: usize,
        edge_capacity: usize,
    ) -> Self {
        let stacks = Dictionary::with_capacity(stack_capacity);
        let symbols = Dictionary::with_capacity(symbol_capacity);
        let edges = Dictionary::with_capacity(edge_capacity);
        counters()
            .internal_static_bytes
            .add(stacks.footprint() + symbols.footprint() + edges.footprint());
        Self {
            stacks,
            symbols,
            edges,
            symbol_head: None,
            roots: Vec::new(),
            resolver,
        }
    }

    /// Fold one chunk's events into the aggregate state.
    pub fn process_chunk(&mut self, data: &ChunkData) {
        for i in 0..data.event_count {
            let delta = data.size_delta[i];
            if delta == 0 {
                continue;
            }
            self.process_event(data.stack_hash[i], delta, data.event_frames(i));
        }
    }

    /// Fold one event. `frames` is empty for frees with no captured stack.
    pub fn process_event(&mut self, hash: u64, delta: isize, frames: &[usize]) {
        let stack_index = match self.stacks.upsert(hash) {
            Ok(up) => up.index,
            Err(_) => {
                diagnostics::emit_once(&kind::LA302, &STACK_DICT_FULL);
                counters().dropped_events.increment();
                return;
            }
        };

        if self.stacks.value(stack_index).depth != 0 {
            // Fast path: this stack has been resolved before.
            self.stacks.value_mut(stack_index).total_bytes += delta;
            let record = self.stacks.value(stack_index);
            let resolved = ResolvedStack {
                frames: record.frames,
                depth: record.depth,
            };
            for symbol in resolved.frames[..resolved.depth as usize].iter().flatten() {
                self.symbols.value_mut(symbol.0).total_bytes += delta;
            }
            self.update_tree(&resolved, delta, false);
            return;
        }

        // Unresolved stack. Bytes accumulate even while unresolved so that
        // a free arriving before its alloc's chunk is never lost.
        self.stacks.value_mut(stack_index).total_bytes += delta;
        if frames.is_empty() {
            return;
        }

        let depth = frames.len().min(STACK_PER_ALLOC);
        let mut resolved = ResolvedStack {
            frames: [None; STACK_PER_ALLOC],
            depth: depth as u8,
        };
        for (j, &addr) in frames.iter().take(depth).enumerate() {
            resolved.frames[j] = self.canonical_symbol(addr, delta);
        }

        let record = self.stacks.value_mut(stack_index);
        record.frames = resolved.frames;
        record.depth = resolved.depth;

        self.update_tree(&resolved, delta, true);
    }

    /// Resolve one return address to its canonical symbol and attribute
    /// `delta` to it.
    ///
    /// Two-level scheme: the raw address gets a dictionary entry whose
    /// `shared` pointer names the canonical entry keyed by the function
    /// base address. Later hits on the same raw address short-circuit.
    fn canonical_symbol(&mut self, addr: usize, delta: isize) -> Option<SymbolId> {
        let raw = match self.symbols.upsert(addr as u64) {
            Ok(up) => up.index,
            Err(_) => {
                diagnostics::emit_once(&kind::LA301, &SYMBOL_DICT_FULL);
                counters().dropped_events.increment();
                return None;
            }
        };

        if let Some(shared) = self.symbols.value(raw).shared {
            self.symbols.value_mut(shared.0).total_bytes += delta;
            return Some(shared);
        }
        if self.symbols.value(raw).is_canonical() {
            self.symbols.value_mut(raw).total_bytes += delta;
            return Some(SymbolId(raw));
        }

        let frame = self.resolver.resolve(addr);
        let (name, base) = match frame.name {
            Some(name) => (name, frame.base),
            None => {
                diagnostics::emit_once(&kind::LA101, &TRUNCATION_SEEN);
                (TRUNCATED_NAME.to_string(), 0)
            }
        };

        let canonical = match self.symbols.upsert(base as u64) {
            Ok(up) => up.index,
            Err(_) => {
                diagnostics::emit_once(&kind::LA301, &SYMBOL_DICT_FULL);
                counters().dropped_events.increment();
                return None;
            }
        };

        if self.symbols.value(canonical).is_canonical() {
            // Another call site of this function got here first.
            self.symbols.value_mut(raw).shared = Some(SymbolId(canonical));
            self.symbols.value_mut(canonical).total_bytes += delta;
            return Some(SymbolId(canonical));
        }

        // First sighting of this function: name the canonical entry and
        // thread it onto the global list.
        let head = self.symbol_head;
        {
            let entry = self.symbols.value_mut(canonical);
            entry.name = Some(name.into_boxed_str());
            entry.total_bytes += delta;
            entry.next = head;
        }
        self.symbol_head = Some(SymbolId(canonical));
        self.symbols.value_mut(raw).shared = Some(SymbolId(canonical));
        Some(SymbolId(canonical))
    }

    /// Walk the resolved stack outermost to innermost, accumulating into
    /// the call-graph edge of each location.
    ///
    /// `link` is set on first resolution of a stack and establishes the
    /// structural pointers (symbol, parent, children, same-symbol chain);
    /// later hits only touch the counters.
    fn update_tree(&mut self, resolved: &ResolvedStack, delta: isize, link: bool) {
        let depth = resolved.depth as usize;
        let mut parent: Option<EdgeId> = None;
        for (graph_depth, index) in (0..depth).rev().enumerate() {
            // An unresolvable frame (symbol dictionary full) is transparent:
            // its callees attach to the nearest resolved caller.
            let Some(symbol) = resolved.frames[index] else {
                continue;
            };

            let key = EdgeKey::derive(symbol, parent, graph_depth);
            let edge = match self.edges.upsert(key) {
                Ok(up) => EdgeId(up.index),
                Err(_) => {
                    diagnostics::emit_once(&kind::LA303, &EDGE_DICT_FULL);
                    counters().dropped_events.increment();
                    return;
                }
            };

            self.edges.value_mut(edge.0).total_bytes += delta;

            if link {
                if self.edges.value(edge.0).symbol.is_none() {
                    let head = self.symbols.value(symbol.0).edges_head;
                    {
                        let entry = self.edges.value_mut(edge.0);
                        entry.symbol = Some(symbol);
                        entry.same_symbol = head;
                        entry.depth = graph_depth as u8;
                    }
                    self.symbols.value_mut(symbol.0).edges_head = Some(edge);
                }
                match parent {
                    Some(caller) => {
                        if !self.edges.value(caller.0).children.contains(&edge) {
                            self.edges.value_mut(caller.0).children.push(edge);
                        }
                        self.edges.value_mut(edge.0).parent = Some(caller);
                    }
                    None => {
                        if !self.roots.contains(&edge) {
                            self.roots.push(edge);
                        }
                    }
                }
            }

            parent = Some(edge);
        }
    }

    // ---- read-side accessors, used under the same lock ----

    pub fn symbol_head(&self) -> Option<SymbolId> {
        self.symbol_head
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        self.symbols.value(id.0)
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges.value(id.0)
    }

    pub fn roots(&self) -> &[EdgeId] {
        &self.roots
    }

    /// Live bytes attributed to one exact stack, if it has been seen.
    /// Exercised by tests; the public snapshot API works at symbol and
    /// edge granularity.
    #[allow(dead_code)]
    pub fn stack_bytes(&self, hash: u64) -> Option<isize> {
        self.stacks.get(hash).map(|index| self.stacks.value(index).total_bytes)
    }

    pub fn symbol_dictionary_stats(&self) -> DictionaryStats {
        DictionaryStats {
            len: self.symbols.len(),
            capacity: self.symbols.capacity(),
            mean_probe_length: self.symbols.mean_probe_length(),
        }
    }

    pub fn stack_dictionary_stats(&self) -> DictionaryStats {
        DictionaryStats {
            len: self.stacks.len(),
            capacity: self.stacks.capacity(),
            mean_probe_length: self.stacks.mean_probe_length(),
        }
    }

    pub fn edge_dictionary_stats(&self) -> DictionaryStats {
        DictionaryStats {
            len: self.edges.len(),
            capacity: self.edges.capacity(),
            mean_probe_length: self.edges.mean_probe_length(),
        }
    }
}

/// Consume one dispatched chunk: aggregate its events under the lock, then
/// hand the chunk back (preallocated) or free it (temporary).
pub(crate) fn treat_chunk(global: &crate::core::global::GlobalState, chunk: ChunkRef) {
    let _scope = crate::core::tls::InternalScope::enter();
    let was_consuming = crate::core::tls::enter_consumer();
    {
        let mut state = global.aggregate.lock();
        // SAFETY: the chunk is Pending or a dispatched Temporary; per the
        // status protocol the consumer owns the payload.
        let data = unsafe { chunk.get().data() };
        state.process_chunk(data);
    }
    release_chunk(chunk);
    crate::core::tls::leave_consumer(was_consuming);
}

fn release_chunk(chunk: ChunkRef) {
    match chunk.get().status() {
        // SAFETY: the chunk was fully processed and this is its last use.
        ChunkStatus::Temporary => unsafe { chunk.free_temporary() },
        _ => chunk.get().set_status(ChunkStatus::Treated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ResolvedFrame;

    /// Deterministic resolver: function base is the address rounded down
    /// to 256 bytes, so 0x1000 and 0x1080 are two call sites of one
    /// function. Address 0xdead is unresolvable.
    struct TestResolver;

    impl SymbolResolver for TestResolver {
        fn resolve(&mut self, addr: usize) -> ResolvedFrame {
            if addr == 0xdead {
                return ResolvedFrame { name: None, base: 0 };
            }
            let base = addr & !0xFF;
            ResolvedFrame {
                name: Some(format!("fn_{base:x}")),
                base,
            }
        }
    }

    fn state() -> AggregateState {
        AggregateState::with_capacities(Box::new(TestResolver), 256, 256, 1024)
    }

    fn named_total(state: &AggregateState, name: &str) -> Option<isize> {
        let mut cursor = state.symbol_head();
        while let Some(id) = cursor {
            let symbol = state.symbol(id);
            if symbol.name.as_deref() == Some(name) {
                return Some(symbol.total_bytes);
            }
            cursor = symbol.next;
        }
        None
    }

    #[test]
    fn single_alloc_attributes_every_frame() {
        let mut state = state();
        // innermost 0x3000, caller 0x2000, root 0x1000
        state.process_event(0xA1, 100, &[0x3000, 0x2000, 0x1000]);

        assert_eq!(named_total(&state, "fn_3000"), Some(100));
        assert_eq!(named_total(&state, "fn_2000"), Some(100));
        assert_eq!(named_total(&state, "fn_1000"), Some(100));
        assert_eq!(state.stack_bytes(0xA1), Some(100));

        // One root chain: fn_1000 -> fn_2000 -> fn_3000, all carrying 100.
        assert_eq!(state.roots().len(), 1);
        let root = state.edge(state.roots()[0]);
        assert_eq!(root.total_bytes, 100);
        assert_eq!(root.depth, 0);
        assert_eq!(root.children.len(), 1);
        let mid = state.edge(root.children[0]);
        assert_eq!(mid.total_bytes, 100);
        let leaf = state.edge(mid.children[0]);
        assert_eq!(leaf.total_bytes, 100);
        assert!(leaf.children.is_empty());
    }

    #[test]
    fn alloc_then_free_returns_to_zero() {
        let mut state = state();
        let frames = [0x3000, 0x2000, 0x1000];
        state.process_event(0xB2, 64, &frames);
        // The free reuses the hash from the allocation header and carries
        // no frames of its own.
        state.process_event(0xB2, -64, &[]);

        assert_eq!(state.stack_bytes(0xB2), Some(0));
        assert_eq!(named_total(&state, "fn_3000"), Some(0));
        assert_eq!(named_total(&state, "fn_1000"), Some(0));
        assert_eq!(state.edge(state.roots()[0]).total_bytes, 0);
    }

    #[test]
    fn fast_path_skips_resolution_but_counts() {
        let mut state = state();
        let frames = [0x3000, 0x1000];
        state.process_event(0xC3, 10, &frames);
        for _ in 0..9 {
            state.process_event(0xC3, 10, &frames);
        }
        assert_eq!(state.stack_bytes(0xC3), Some(100));
        assert_eq!(named_total(&state, "fn_3000"), Some(100));
        // Still exactly one edge chain.
        assert_eq!(state.roots().len(), 1);
        assert_eq!(state.edge(state.roots()[0]).children.len(), 1);
    }

    #[test]
    fn two_sites_one_function_collapse_to_one_symbol() {
        let mut state = state();
        // 0x2010 and 0x2080 share base 0x2000; different callers.
        state.process_event(0xD1, 30, &[0x2010, 0x1000]);
        state.process_event(0xD2, 12, &[0x2080, 0x5000]);

        assert_eq!(named_total(&state, "fn_2000"), Some(42));

        // But two distinct edges for the two paths, chained through the
        // symbol's same-symbol list.
        let mut cursor = None;
        let mut head = state.symbol_head();
        while let Some(id) = head {
            if state.symbol(id).name.as_deref() == Some("fn_2000") {
                cursor = state.symbol(id).edges_head;
                break;
            }
            head = state.symbol(id).next;
        }
        let first = cursor.expect("fn_2000 has edges");
        let second = state.edge(first).same_symbol.expect("two call paths");
        assert!(state.edge(second).same_symbol.is_none());
        let totals = {
            let mut t = [state.edge(first).total_bytes, state.edge(second).total_bytes];
            t.sort();
            t
        };
        assert_eq!(totals, [12, 30]);
    }

    #[test]
    fn recursion_produces_one_edge_per_depth() {
        let mut state = state();
        // Recursive f() allocating 8 bytes at five depths below main.
        // Event k has k recursive frames (innermost first) above main.
        for depth in 1..=5usize {
            let mut frames = vec![0x2000; depth];
            frames.push(0x1000); // main
            let hash = 0xE000 + depth as u64;
            state.process_event(hash, 8, &frames);
        }

        // One symbol for f with every frame occurrence counted:
        // 8*(1+2+3+4+5) = 120.
        assert_eq!(named_total(&state, "fn_2000"), Some(120));
        assert_eq!(named_total(&state, "fn_1000"), Some(40));

        // The chain under main carries 40, 32, 24, 16, 8.
        assert_eq!(state.roots().len(), 1);
        assert_eq!(state.edge(state.roots()[0]).total_bytes, 40); // main
        let mut chain = Vec::new();
        let mut current = state.roots()[0];
        loop {
            let edge = state.edge(current);
            if edge.depth > 0 {
                chain.push(edge.total_bytes);
            }
            assert!(edge.children.len() <= 1, "recursion chain must be linear");
            match edge.children.first() {
                Some(&child) => current = child,
                None => break,
            }
        }
        assert_eq!(chain, vec![40, 32, 24, 16, 8]);
    }

    #[test]
    fn unresolvable_frames_share_truncated() {
        let mut state = state();
        state.process_event(0xF1, 16, &[0xdead, 0x1000]);
        state.process_event(0xF2, 4, &[0xdead, 0x5000]);
        assert_eq!(named_total(&state, TRUNCATED_NAME), Some(20));
    }

    #[test]
    fn free_before_alloc_is_not_lost() {
        let mut state = state();
        // Cross-thread reordering: the free's chunk is consumed first.
        state.process_event(0xAB, -32, &[]);
        state.process_event(0xAB, 32, &[0x3000, 0x1000]);
        assert_eq!(state.stack_bytes(0xAB), Some(0));
    }

    #[test]
    fn mass_conservation_across_mixed_events() {
        let mut state = state();
        let frames_a = [0x3000, 0x2000, 0x1000];
        let frames_b = [0x4000, 0x2000, 0x1000];
        state.process_event(1, 100, &frames_a);
        state.process_event(2, 50, &frames_b);
        state.process_event(1, -100, &[]);

        // Live: 50 bytes on stack B, three frames deep. Every symbol sum
        // equals 50 per frame occurrence.
        let mut sum = 0isize;
        let mut cursor = state.symbol_head();
        while let Some(id) = cursor {
            sum += state.symbol(id).total_bytes;
            cursor = state.symbol(id).next;
        }
        assert_eq!(sum, 3 * 50);

        // Graph: every edge total equals the sum over its children plus
        // own-site allocations; here the root carries everything.
        let root = state.edge(state.roots()[0]);
        assert_eq!(root.total_bytes, 50);
        let child_sum: isize = root
            .children
            .iter()
            .map(|&c| state.edge(c).total_bytes)
            .sum();
        assert_eq!(child_sum, 50);
    }

    #[test]
    fn children_have_distinct_keys() {
        let mut state = state();
        state.process_event(1, 10, &[0x3000, 0x1000]);
        state.process_event(2, 20, &[0x4000, 0x1000]);
        // Same frames as the first stack under a new hash: the edges merge.
        state.process_event(3, 30, &[0x3000, 0x1000]);
        let root = state.edge(state.roots()[0]);
        assert_eq!(root.total_bytes, 60);
        // Two distinct callees even though three stacks flowed through.
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn edge_dictionary_exhaustion_stops_the_walk() {
        // Room for only two edges: the root and its first callee land,
        // the leaf is dropped, and symbol totals are unaffected.
        let mut state = AggregateState::with_capacities(Box::new(TestResolver), 64, 64, 2);
        crate::diagnostics::suppress_diagnostics(true);
        state.process_event(1, 8, &[0x3000, 0x2000, 0x1000]);
        crate::diagnostics::suppress_diagnostics(false);

        assert_eq!(named_total(&state, "fn_3000"), Some(8));
        assert_eq!(state.roots().len(), 1);
        let root = state.edge(state.roots()[0]);
        assert_eq!(root.total_bytes, 8);
        assert_eq!(root.children.len(), 1);
        let child = state.edge(root.children[0]);
        assert_eq!(child.total_bytes, 8);
        assert!(child.children.is_empty());
    }

    #[test]
    fn dictionary_exhaustion_drops_but_does_not_corrupt() {
        let mut state = AggregateState::with_capacities(Box::new(TestResolver), 4, 256, 1024);
        crate::diagnostics::suppress_diagnostics(true);
        for hash in 0..16u64 {
            state.process_event(hash, 8, &[0x3000, 0x1000]);
        }
        crate::diagnostics::suppress_diagnostics(false);
        // Only the stacks that fit are tracked; totals stay consistent.
        let tracked: isize = (0..16u64).filter_map(|h| state.stack_bytes(h)).sum();
        assert_eq!(tracked, 4 * 8);
    }
}
