//! Diagnostics (per-translation-unit, recoverable) and the internal error
//! taxonomy of §7: `SourceError`, `IRInvariantViolation`, `PassFailure`,
//! `ResourceExhaustion`, `Misconfiguration`.

use crate::common::source::{SourceManager, Span};
use thiserror::Error;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// A diagnostic message with source location.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<(Span, String)>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Error, message: message.into(), span, notes: Vec::new() }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Warning, message: message.into(), span, notes: Vec::new() }
    }

    pub fn with_note(mut self, span: Span, message: impl Into<String>) -> Self {
        self.notes.push((span, message.into()));
        self
    }

    pub fn emit(&self, source_manager: &SourceManager) {
        let loc = source_manager.resolve_span(self.span);
        let severity_str = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        log::trace!("emitting diagnostic at {}:{}:{}", loc.file, loc.line, loc.column);
        eprintln!("{}:{}:{}: {}: {}", loc.file, loc.line, loc.column, severity_str, self.message);
        for (note_span, note_msg) in &self.notes {
            let note_loc = source_manager.resolve_span(*note_span);
            eprintln!("{}:{}:{}: note: {}", note_loc.file, note_loc.line, note_loc.column, note_msg);
        }
    }
}

/// Collects `SourceError`-class diagnostics during one translation unit.
/// Interrogated at pass boundaries per §7's propagation policy: errors
/// accumulate silently until the driver checks `has_errors` and aborts.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: u32,
    warning_count: u32,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diag: Diagnostic) {
        match diag.severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
            Severity::Note => {}
        }
        self.diagnostics.push(diag);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn print_all(&self, source_manager: &SourceManager) {
        for diag in &self.diagnostics {
            diag.emit(source_manager);
        }
    }
}

/// The error taxonomy of spec §7. Kinds, not type hierarchies: a
/// `CompileError` is always fatal to the unit of work that produced it
/// (a pass, a stage, the whole run); `SourceError`s are instead accumulated
/// in a [`DiagnosticEngine`] and never constructed as a `CompileError`
/// variant themselves.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The IR violated an invariant from §3.2. This is always a compiler
    /// bug; tests must never observe it.
    #[error("internal error: IR invariant violated: {0}")]
    IrInvariantViolation(String),

    /// Register allocation could not spill any further (e.g. the only
    /// register left is reserved for the spill itself).
    #[error("register allocation failed: {0}")]
    ResourceExhaustion(String),

    /// Bad configuration discovered before any compilation work starts:
    /// unknown pass name, cyclic pass dependency, unknown `-O` level.
    #[error("configuration error: {0}")]
    Misconfiguration(String),

    /// A translation unit accumulated one or more `SourceError` diagnostics;
    /// the count is the number of `Severity::Error` diagnostics emitted.
    #[error("{0} error(s) generated")]
    SourceErrors(u32),

    #[error("cannot read {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    /// Malformed textual IR handed to [`crate::ir::reader::parse_module`]
    /// (e.g. via `-emit-ir` round-tripped back in for testing).
    #[error("malformed IR: {0}")]
    Parse(String),
}

impl CompileError {
    /// Exit codes are the diagnostic error count, clamped to 255 per §6;
    /// internal failures that carry no count map to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::SourceErrors(n) => (*n).min(255) as i32,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_counts_errors_and_warnings_separately() {
        let mut engine = DiagnosticEngine::new();
        engine.emit(Diagnostic::error("bad", Span::dummy()));
        engine.emit(Diagnostic::warning("meh", Span::dummy()));
        engine.emit(Diagnostic::error("bad again", Span::dummy()));
        assert_eq!(engine.error_count(), 2);
        assert_eq!(engine.warning_count(), 1);
        assert!(engine.has_errors());
    }

    #[test]
    fn exit_code_clamps_to_255() {
        let err = CompileError::SourceErrors(9000);
        assert_eq!(err.exit_code(), 255);
    }
}
