//! Aggregate records: canonical symbols, stack descriptors, call-graph
//! edges.
//!
//! All three kinds live in fixed dictionaries that never move an entry, so
//! cross-references are plain `u32` slot indices. The graph is cyclic by
//! nature (`Edge` points at `Symbol`, `Symbol` chains back through its
//! edges); index addressing sidesteps any ownership question - nothing is
//! ever destroyed while the process runs.

use crate::api::config::STACK_PER_ALLOC;
use crate::util::hash::combine;

/// Slot index of a [`Symbol`] in the symbol dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SymbolId(pub u32);

/// Slot index of an [`Edge`] in the call-graph dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EdgeId(pub u32);

/// One record per resolved function.
///
/// Keyed twice in the symbol dictionary: once per raw return address seen,
/// and once per function base address. The base-address entry is the
/// canonical one carrying the name and the byte total; raw-address entries
/// just point at it via `shared`, so distinct call sites inside one
/// function collapse into a single count.
#[derive(Default)]
pub(crate) struct Symbol {
    /// Resolved name; set only on canonical entries.
    pub name: Option<Box<str>>,
    /// Live bytes attributed to stacks containing this function.
    pub total_bytes: isize,
    /// Canonical entry this raw-address entry resolves to.
    pub shared: Option<SymbolId>,
    /// Head of the chain of edges whose function is this symbol.
    pub edges_head: Option<EdgeId>,
    /// Next symbol in the global list used by search.
    pub next: Option<SymbolId>,
}

impl Symbol {
    /// A symbol is canonical once it has a name.
    pub fn is_canonical(&self) -> bool {
        self.name.is_some()
    }
}

/// Per-stack-hash totals plus the resolved frame array.
///
/// Once `depth` is nonzero the stack has been resolved and later events
/// with the same hash skip symbolization entirely.
pub(crate) struct StackRecord {
    /// Live bytes attributed to this exact stack.
    pub total_bytes: isize,
    /// Resolved frame count; zero means unresolved.
    pub depth: u8,
    /// Canonical symbols, innermost first.
    pub frames: [Option<SymbolId>; STACK_PER_ALLOC],
}

impl Default for StackRecord {
    fn default() -> Self {
        Self {
            total_bytes: 0,
            depth: 0,
            frames: [None; STACK_PER_ALLOC],
        }
    }
}

/// One node in the per-location call graph.
///
/// Distinct call paths through the same function produce distinct edges;
/// the dictionary key bakes in the caller chain (see [`EdgeKey::derive`]).
#[derive(Default)]
pub(crate) struct Edge {
    /// Live bytes flowing through this call location.
    pub total_bytes: isize,
    /// The function at this location; `None` until first linked.
    pub symbol: Option<SymbolId>,
    /// Caller edge, `None` for roots.
    pub parent: Option<EdgeId>,
    /// Callee edges in insertion order.
    pub children: Vec<EdgeId>,
    /// Next edge sharing the same symbol.
    pub same_symbol: Option<EdgeId>,
    /// Distance from the root of its stack.
    pub depth: u8,
}

/// Call-graph dictionary key.
///
/// `path` folds together the symbol, the caller edge identity, and the
/// depth, so the same function reached along two different paths (or at two
/// different recursion depths) lands in two distinct slots. `symbol`
/// rides along to make collisions on `path` resolvable by key equality.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct EdgeKey {
    pub path: u64,
    pub symbol: u64,
}

impl EdgeKey {
    /// Derive the key for `symbol` called at `depth` below `parent`.
    pub fn derive(symbol: SymbolId, parent: Option<EdgeId>, depth: usize) -> Self {
        let parent_raw = match parent {
            Some(edge) => edge.0 as u64 + 1,
            None => 0,
        };
        let mut path = symbol.0 as u64;
        path = combine(parent_raw, path);
        path = combine((depth * depth) as u64, path);
        Self {
            path,
            symbol: symbol.0 as u64,
        }
    }
}

impl crate::aggregate::dictionary::DictKey for EdgeKey {
    #[inline]
    fn probe_base(&self) -> u64 {
        self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stack_is_unresolved() {
        let stack = StackRecord::default();
        assert_eq!(stack.depth, 0);
        assert_eq!(stack.total_bytes, 0);
        assert!(stack.frames.iter().all(Option::is_none));
    }

    #[test]
    fn edge_key_distinguishes_parents() {
        let symbol = SymbolId(3);
        let by_root = EdgeKey::derive(symbol, None, 2);
        let by_caller = EdgeKey::derive(symbol, Some(EdgeId(17)), 2);
        assert_ne!(by_root, by_caller);
    }

    #[test]
    fn edge_key_distinguishes_depths() {
        let symbol = SymbolId(3);
        let parent = Some(EdgeId(5));
        assert_ne!(
            EdgeKey::derive(symbol, parent, 1),
            EdgeKey::derive(symbol, parent, 2)
        );
    }

    #[test]
    fn edge_key_deterministic() {
        let symbol = SymbolId(9);
        let parent = Some(EdgeId(1));
        assert_eq!(
            EdgeKey::derive(symbol, parent, 4),
            EdgeKey::derive(symbol, parent, 4)
        );
    }

    #[test]
    fn canonical_means_named() {
        let mut symbol = Symbol::default();
        assert!(!symbol.is_canonical());
        symbol.name = Some("example".into());
        assert!(symbol.is_canonical());
    }
}
