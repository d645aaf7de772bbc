//! Catalog construction diagnostics.
//!
//! Every failure in this subsystem aborts the compile for the node; no
//! partial catalog is ever emitted. Because most of the work here is
//! deferred (overrides, relationships and collectors resolve long after
//! they were recorded), each record snapshots the evaluation call stack
//! at record time, and the resulting diagnostics point at the manifest
//! statement that queued the work rather than at the finalize pass.
//!
//! - `CompileError` — single diagnostic with a primary span, optional
//!   secondary labels, notes and a recorded backtrace
//! - `ErrorKind` — categorizes catalog construction failures
//! - `StackFrame` — one evaluation frame in a recorded backtrace

use marionette_foundation::Span;
use std::fmt;

/// Result type for catalog construction operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// A fatal catalog construction diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    /// Category of this error.
    pub kind: ErrorKind,
    /// Primary source location.
    pub span: Span,
    /// Human-readable message.
    pub message: String,
    /// Additional labeled spans ("first declared here", cycle steps).
    pub labels: Vec<Label>,
    /// Additional notes or hints.
    pub notes: Vec<String>,
    /// Evaluation backtrace captured when the offending work was recorded.
    pub backtrace: Vec<StackFrame>,
}

/// Category of catalog construction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The same (type, title) identity declared twice.
    DuplicateResource,
    /// An attribute set twice on the same resource without override.
    DuplicateAttribute,
    /// An override target, relationship endpoint or explicit collector
    /// entry that never resolved to a declared resource.
    UnresolvedReference,
    /// The dependency graph contains a cycle.
    CyclicDependency,
    /// Malformed attribute application, e.g. append onto a non-array.
    InvalidAttributeOperation,
    /// A relationship endpoint value that denotes no resource.
    InvalidRelationship,
    /// Defined-type expansion exceeded the evaluation depth bound.
    StackOverflow,
    /// Invariant violation inside the catalog engine itself.
    Internal,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::DuplicateResource => "duplicate resource",
            ErrorKind::DuplicateAttribute => "duplicate attribute",
            ErrorKind::UnresolvedReference => "unresolved reference",
            ErrorKind::CyclicDependency => "cyclic dependency",
            ErrorKind::InvalidAttributeOperation => "invalid attribute operation",
            ErrorKind::InvalidRelationship => "invalid relationship",
            ErrorKind::StackOverflow => "stack overflow",
            ErrorKind::Internal => "internal error",
        }
    }
}

/// Secondary labeled span in a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// One frame of the evaluation call stack.
///
/// Frames are pushed when a defined-type or class body is entered and
/// popped on exit; deferred records clone the stack so diagnostics can
/// show how evaluation reached the offending statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Qualified name of the body being evaluated.
    pub name: String,
    /// Where the body was entered from.
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            backtrace: Vec::new(),
        }
    }

    /// Add a secondary labeled span.
    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label {
            span,
            message: message.into(),
        });
        self
    }

    /// Add a note or hint.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Attach the backtrace snapshot recorded with the deferred work.
    pub fn with_backtrace(mut self, frames: Vec<StackFrame>) -> Self {
        self.backtrace = frames;
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)?;
        for frame in self.backtrace.iter().rev() {
            write!(f, "\n  in {}", frame.name)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}
