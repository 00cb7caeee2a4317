//! Diagnostic emission backend.
//!
//! Emits to stderr in debug builds (or with the `diagnostics` feature), and
//! through the `log` crate when that integration is enabled.

use std::sync::atomic::{AtomicBool, Ordering};

use super::kind::Diagnostic;

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Emit a diagnostic.
///
/// In release builds without the `diagnostics` feature this only forwards to
/// the `log` crate (when enabled); the tracer must stay quiet inside someone
/// else's process by default.
pub fn emit(diag: &Diagnostic) {
    if is_suppressed() {
        return;
    }

    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    emit_to_stderr(diag);

    #[cfg(feature = "log")]
    emit_to_log(diag);
}

/// Emit a diagnostic at most once per process.
///
/// Hot paths report structural conditions (full dictionary, chunk pressure)
/// that would otherwise repeat on every event.
pub fn emit_once(diag: &Diagnostic, reported: &AtomicBool) {
    if reported.swap(true, Ordering::Relaxed) {
        return;
    }
    emit(diag);
}

#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(diag: &Diagnostic) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(
        stderr,
        "[livealloc][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );

    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
}

#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic) {
    use super::kind::DiagnosticKind;

    match diag.kind {
        DiagnosticKind::Error => log::error!("[{}] {}", diag.code, diag.message),
        DiagnosticKind::Warning => log::warn!("[{}] {}", diag.code, diag.message),
        DiagnosticKind::Note => log::info!("[{}] {}", diag.code, diag.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::kind::LA201;

    #[test]
    fn suppression_round_trip() {
        suppress_diagnostics(true);
        assert!(is_suppressed());
        suppress_diagnostics(false);
        assert!(!is_suppressed());
    }

    #[test]
    fn emit_once_fires_once() {
        let reported = AtomicBool::new(false);
        suppress_diagnostics(true);
        emit_once(&LA201, &reported);
        assert!(reported.load(Ordering::Relaxed));
        // Second call is a no-op; the flag stays set.
        emit_once(&LA201, &reported);
        assert!(reported.load(Ordering::Relaxed));
        suppress_diagnostics(false);
    }
}
