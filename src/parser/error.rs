//! Parse errors.

use crate::foundation::Span;
use crate::lexer::Token;
use std::fmt;

/// Fatal syntax error: what the parser expected and what it found.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub expected: String,
    pub got: String,
    pub span: Span,
}

impl ParseError {
    pub fn unexpected(got: Option<&Token>, expected: impl Into<String>, span: Span) -> Self {
        Self {
            expected: expected.into(),
            got: match got {
                Some(token) => token.to_string(),
                None => "end of input".to_string(),
            },
            span,
        }
    }

    pub fn invalid(message: impl Into<String>, span: Span) -> Self {
        Self {
            expected: message.into(),
            got: String::new(),
            span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.got.is_empty() {
            write!(f, "syntax error at line {}: {}", self.span.start_line, self.expected)
        } else {
            write!(
                f,
                "syntax error at line {}: expected {}, got {}",
                self.span.start_line, self.expected, self.got
            )
        }
    }
}

impl std::error::Error for ParseError {}
