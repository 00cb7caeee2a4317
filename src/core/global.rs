//! Global shared state.
//!
//! The run-state flag lives in a plain static so producers can consult it
//! before `init()` ever runs. Everything that needs construction - the
//! dictionaries, the handoff queue, the watch registry - is created once
//! at `init()` and lives for the process.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use crate::aggregate::engine::AggregateState;
use crate::api::config::TracerConfig;
use crate::api::snapshot::WatchRegistry;
use crate::ingest::worker::HandoffQueue;
use crate::platform::{BacktraceResolver, SymbolResolver};
use crate::sync::mutex::Mutex;

/// Tracer run state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RunningStatus {
    /// Producers record one-shot into preallocated chunks; no handoff.
    NotInitialized = 0,
    /// Full pipeline: rotation, handoff, aggregation.
    Running = 1,
    /// Recording continues but handoff is disabled again.
    Exit = 2,
}

static RUNNING_STATUS: AtomicU8 = AtomicU8::new(RunningStatus::NotInitialized as u8);

pub(crate) fn running_status() -> RunningStatus {
    match RUNNING_STATUS.load(Ordering::Acquire) {
        1 => RunningStatus::Running,
        2 => RunningStatus::Exit,
        _ => RunningStatus::NotInitialized,
    }
}

pub(crate) fn set_running_status(status: RunningStatus) {
    RUNNING_STATUS.store(status as u8, Ordering::Release);
}

/// Everything shared across threads, built once at `init()`.
pub(crate) struct GlobalState {
    /// The aggregation lock and everything it guards.
    pub aggregate: Mutex<AggregateState>,
    /// Producer-to-consumer chunk handoff.
    pub queue: HandoffQueue,
    /// Watched symbols/calls and their histogram rings.
    pub watches: std::sync::Mutex<WatchRegistry>,
    pub config: TracerConfig,
}

impl GlobalState {
    pub fn new(config: TracerConfig, resolver: Box<dyn SymbolResolver>) -> Self {
        Self {
            aggregate: Mutex::new(AggregateState::new(resolver)),
            queue: HandoffQueue::new(),
            watches: std::sync::Mutex::new(WatchRegistry::new()),
            config,
        }
    }
}

static GLOBAL: OnceLock<GlobalState> = OnceLock::new();

pub(crate) fn global() -> Option<&'static GlobalState> {
    GLOBAL.get()
}

/// Create the global state on first call; later calls keep the first
/// configuration.
pub(crate) fn initialize(config: TracerConfig) -> &'static GlobalState {
    GLOBAL.get_or_init(|| GlobalState::new(config, Box::new(BacktraceResolver)))
}
