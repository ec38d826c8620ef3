//! Structured errors for every toolchain phase.
//!
//! Errors are values, never bare strings: each carries a kind, an optional
//! source location, and a display message. Structural phases (lexing,
//! parsing, NN decoding) fail fast with a single error; the typechecker
//! accumulates a `Vec<TypeError>` and reports them together.

use crate::foundation::Span;
use std::fmt;
use thiserror::Error;

/// Fatal tokenization failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lexical error at {line}:{col}: {message}")]
pub struct LexicalError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

/// Category of semantic error produced by the typechecker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeErrorKind {
    /// A class or function schema could not be obtained.
    UnresolvedSchema,
    /// An input or output parameter name does not exist on the function.
    UnknownParameter,
    /// A value, filter, or parameter has the wrong type.
    TypeMismatch,
    /// `monitor` applied to a non-monitorable query.
    NotMonitorable,
    /// `sort` / index / slice / aggregation applied to a non-list query.
    NotList,
    /// Output parameters with the same name but incompatible types meet in
    /// a join.
    AmbiguousJoin,
    /// No overload of the operator accepts the operand types.
    InvalidOperator,
    /// A `VarRef` does not resolve to any name in scope.
    UnresolvedVariable,
    /// The operation was cancelled while schema fetches were outstanding.
    Cancelled,
}

impl TypeErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeErrorKind::UnresolvedSchema => "unresolved schema",
            TypeErrorKind::UnknownParameter => "unknown parameter",
            TypeErrorKind::TypeMismatch => "type mismatch",
            TypeErrorKind::NotMonitorable => "not monitorable",
            TypeErrorKind::NotList => "not a list",
            TypeErrorKind::AmbiguousJoin => "ambiguous join",
            TypeErrorKind::InvalidOperator => "invalid operator",
            TypeErrorKind::UnresolvedVariable => "unresolved variable",
            TypeErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Single semantic diagnostic.
///
/// The checker continues past recoverable errors, so a failed typecheck
/// yields every diagnostic found, not just the first.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Option<Span>,
    pub message: String,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for TypeError {}

/// Toolchain boundary error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lexical(#[from] LexicalError),

    #[error(transparent)]
    Parse(#[from] crate::parser::ParseError),

    #[error("typecheck failed with {} error(s): {}", .0.len(), format_type_errors(.0))]
    Type(Vec<TypeError>),

    /// NN encoding could not match a literal against the sentence.
    #[error("unmatched literal in sentence: {0}")]
    UnmatchedLiteral(String),

    /// NN decoding failed on a malformed token sequence.
    #[error("invalid NN syntax: {0}")]
    InvalidNNSyntax(String),

    /// The input uses a construct outside the supported language.
    #[error("unsupported: {0}")]
    UnsupportedFeature(String),

    #[error("operation cancelled")]
    Cancelled,
}

fn format_type_errors(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Optional primary source location, when the failing phase tracked one.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Parse(e) => Some(e.span),
            Error::Type(errors) => errors.iter().find_map(|e| e.span),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_error_display() {
        let err = TypeError::new(
            TypeErrorKind::UnknownParameter,
            None,
            "no parameter 'statu' on @com.twitter.post",
        );
        let text = err.to_string();
        assert!(text.contains("unknown parameter"));
        assert!(text.contains("statu"));
    }

    #[test]
    fn aggregated_type_errors_display_all() {
        let errors = vec![
            TypeError::new(TypeErrorKind::TypeMismatch, None, "first"),
            TypeError::new(TypeErrorKind::NotList, None, "second"),
        ];
        let err = Error::Type(errors);
        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("first"));
        assert!(text.contains("second"));
    }
}
