//! Tracer statistics.
//!
//! Two layers: process-wide atomic counters updated from the hot paths
//! without any lock, and dictionary statistics read under the aggregation
//! lock when a [`TracerStats`] snapshot is taken.

use crate::sync::atomics::{AtomicCounter, AtomicGauge, SignedGauge};

/// Process-wide atomic counters.
pub(crate) struct Counters {
    /// Live bytes as requested by the host.
    pub user_bytes: SignedGauge,
    /// Live bytes actually reserved (headers and alignment slack included).
    pub real_bytes: SignedGauge,
    /// Bytes allocated while inside tracer-internal scopes.
    pub internal_bytes: SignedGauge,
    /// Fixed tracer footprint: per-thread state and shared tables.
    pub internal_static_bytes: AtomicGauge,
    /// Heap-allocated temporary chunks currently alive.
    pub temporary_chunks: AtomicGauge,
    /// Events lost to full dictionaries.
    pub dropped_events: AtomicCounter,
}

static COUNTERS: Counters = Counters {
    user_bytes: SignedGauge::new(0),
    real_bytes: SignedGauge::new(0),
    internal_bytes: SignedGauge::new(0),
    internal_static_bytes: AtomicGauge::new(0),
    temporary_chunks: AtomicGauge::new(0),
    dropped_events: AtomicCounter::new(0),
};

pub(crate) fn counters() -> &'static Counters {
    &COUNTERS
}

/// Number of heap-allocated temporary chunks currently in flight.
///
/// A sustained nonzero value means producers outpace the consumer; after
/// `flush()` it returns to zero.
pub fn temporary_chunk_count() -> usize {
    COUNTERS.temporary_chunks.get()
}

/// Occupancy statistics for one dictionary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictionaryStats {
    /// Entries currently stored.
    pub len: usize,
    /// Fixed capacity.
    pub capacity: usize,
    /// Mean probe length per lookup since init.
    pub mean_probe_length: f64,
}

impl DictionaryStats {
    /// Fraction of the table in use, 0.0 to 1.0.
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.len as f64 / self.capacity as f64
    }
}

/// Point-in-time tracer statistics.
#[derive(Debug, Clone, Default)]
pub struct TracerStats {
    /// Live bytes as requested by the host.
    pub user_bytes: isize,
    /// Live bytes actually reserved, headers included.
    pub real_bytes: isize,
    /// Bytes allocated from within tracer-internal scopes.
    pub internal_bytes: isize,
    /// Fixed tracer footprint (thread state, dictionaries).
    pub internal_static_bytes: usize,
    /// Temporary chunks currently alive.
    pub temporary_chunks: usize,
    /// Events lost to full dictionaries.
    pub dropped_events: u64,
    /// Symbol dictionary occupancy (zero before `init()`).
    pub symbol_dictionary: DictionaryStats,
    /// Stack dictionary occupancy (zero before `init()`).
    pub stack_dictionary: DictionaryStats,
    /// Call-graph dictionary occupancy (zero before `init()`).
    pub edge_dictionary: DictionaryStats,
}

/// Take a statistics snapshot.
///
/// Dictionary statistics require the aggregation lock and are reported as
/// zero before `init()`.
pub fn stats() -> TracerStats {
    let mut out = TracerStats {
        user_bytes: COUNTERS.user_bytes.get(),
        real_bytes: COUNTERS.real_bytes.get(),
        internal_bytes: COUNTERS.internal_bytes.get(),
        internal_static_bytes: COUNTERS.internal_static_bytes.get(),
        temporary_chunks: COUNTERS.temporary_chunks.get(),
        dropped_events: COUNTERS.dropped_events.get(),
        ..TracerStats::default()
    };

    if let Some(global) = crate::core::global::global() {
        let state = global.aggregate.lock();
        out.symbol_dictionary = state.symbol_dictionary_stats();
        out.stack_dictionary = state.stack_dictionary_stats();
        out.edge_dictionary = state.edge_dictionary_stats();
    }

    out
}

impl std::fmt::Display for TracerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::util::size::format_bytes;

        writeln!(f, "Tracer statistics:")?;
        writeln!(f, "  User bytes:       {}", format_bytes(self.user_bytes))?;
        writeln!(f, "  Real bytes:       {}", format_bytes(self.real_bytes))?;
        writeln!(f, "  Internal bytes:   {}", format_bytes(self.internal_bytes))?;
        writeln!(
            f,
            "  Static footprint: {}",
            format_bytes(self.internal_static_bytes as isize)
        )?;
        writeln!(f, "  Temporary chunks: {}", self.temporary_chunks)?;
        writeln!(f, "  Dropped events:   {}", self.dropped_events)?;
        writeln!(
            f,
            "  Symbol dict:      {}/{} ({:.1}% full)",
            self.symbol_dictionary.len,
            self.symbol_dictionary.capacity,
            self.symbol_dictionary.fill_ratio() * 100.0
        )?;
        writeln!(
            f,
            "  Stack dict:       {}/{} ({:.1}% full)",
            self.stack_dictionary.len,
            self.stack_dictionary.capacity,
            self.stack_dictionary.fill_ratio() * 100.0
        )?;
        writeln!(
            f,
            "  Edge dict:        {}/{} ({:.1}% full)",
            self.edge_dictionary.len,
            self.edge_dictionary.capacity,
            self.edge_dictionary.fill_ratio() * 100.0
        )?;
        Ok(())
    }
}
