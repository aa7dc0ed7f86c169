// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by the front end (resolve), lowering and the
// post-condition check. The copy-elision pass itself never produces
// diagnostics; it reports through `trace::TraceEvent`.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0101`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes, grouped by phase: E01xx resolve, E02xx lower, E03xx verify.
pub mod codes {
    use super::DiagCode;

    /// Name defined twice, or an update of an input/extern.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Unknown stage or input, or unbound variable.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Call arity does not match the callee's dimensions.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Pure definition parameter is not a distinct variable.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// Tuple used as a scalar, or slot index out of range.
    pub const E0105: DiagCode = DiagCode("E0105");
    /// Update value count differs from the pure definition.
    pub const E0106: DiagCode = DiagCode("E0106");
    /// Cyclic stage dependency.
    pub const E0107: DiagCode = DiagCode("E0107");
    /// Bad `order` / `output` directive.
    pub const E0108: DiagCode = DiagCode("E0108");
    /// Pure definition reads its own stage.
    pub const E0109: DiagCode = DiagCode("E0109");
    /// Nothing to lower.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// Copy-elision post-conditions do not hold.
    pub const E0301: DiagCode = DiagCode("E0301");
    /// No `output` directive; the last stage is the output.
    pub const W0101: DiagCode = DiagCode("W0101");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    pub fn warning(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }
}

/// True if any diagnostic is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
