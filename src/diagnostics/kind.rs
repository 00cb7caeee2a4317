//! Diagnostic kinds and codes.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - aggregated data is being lost.
    Error,
    /// A warning - the tracer is under pressure but still correct.
    Warning,
    /// Additional context, informational only.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `LA1xx` - stack capture issues
/// - `LA2xx` - chunk handoff issues
/// - `LA3xx` - dictionary / aggregation issues
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "LA301").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
}

/// A call stack exceeded the per-event frame budget and was truncated.
pub const LA101: Diagnostic = Diagnostic {
    kind: DiagnosticKind::Note,
    code: "LA101",
    message: "call stack deeper than the per-event frame budget; outermost frames kept",
    note: Some("truncated stacks are attributed to the 'Truncated' symbol"),
};

/// A temporary chunk was allocated because preallocated chunks were busy.
pub const LA201: Diagnostic = Diagnostic {
    kind: DiagnosticKind::Warning,
    code: "LA201",
    message: "allocating temporary chunks; the consumer is not keeping up",
    note: Some("check temporary_chunk_count() for sustained pressure"),
};

/// The symbol dictionary is full.
pub const LA301: Diagnostic = Diagnostic {
    kind: DiagnosticKind::Error,
    code: "LA301",
    message: "symbol dictionary full; new functions will not be attributed",
    note: None,
};

/// The stack dictionary is full.
pub const LA302: Diagnostic = Diagnostic {
    kind: DiagnosticKind::Error,
    code: "LA302",
    message: "stack dictionary full; events for new stacks are dropped",
    note: None,
};

/// The call-graph dictionary is full.
pub const LA303: Diagnostic = Diagnostic {
    kind: DiagnosticKind::Error,
    code: "LA303",
    message: "call-graph dictionary full; new call paths will not be recorded",
    note: None,
};
