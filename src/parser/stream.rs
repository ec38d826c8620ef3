//! Token stream wrapper for the hand-written parser.

use crate::foundation::Span;
use crate::lexer::{SpannedToken, Token};

use super::error::ParseError;

/// Token stream with lookahead and span tracking.
pub struct TokenStream<'src> {
    tokens: &'src [SpannedToken],
    pos: usize,
    file_id: u16,
}

impl<'src> TokenStream<'src> {
    pub fn new(tokens: &'src [SpannedToken], file_id: u16) -> Self {
        Self {
            tokens,
            pos: 0,
            file_id,
        }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&'src Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    /// Peek at the nth token ahead without consuming.
    pub fn peek_nth(&self, n: usize) -> Option<&'src Token> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    /// Advance to the next token and return the consumed one.
    pub fn advance(&mut self) -> Option<&'src Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token.map(|t| &t.token)
    }

    /// Check whether the current token has the same discriminant as
    /// `expected` (payloads are ignored).
    pub fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Consume the current token if it matches, otherwise error.
    pub fn expect(&mut self, expected: Token) -> Result<Span, ParseError> {
        if self.check(&expected) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(ParseError::unexpected(
                self.peek(),
                expected.to_string(),
                self.current_span(),
            ))
        }
    }

    /// Consume the current token if it matches; report nothing otherwise.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume an identifier-shaped token (identifiers and the keywords
    /// that double as parameter names).
    pub fn expect_ident(&mut self) -> Result<String, ParseError> {
        let span = self.current_span();
        match self.peek().and_then(Token::as_ident) {
            Some(name) => {
                let name = name.to_string();
                self.advance();
                Ok(name)
            }
            None => Err(ParseError::unexpected(self.peek(), "identifier", span)),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Rewind to a saved position (used by the input-kind dispatcher).
    pub fn rewind(&mut self, pos: usize) {
        debug_assert!(pos <= self.pos);
        self.pos = pos;
    }

    /// Span of the current token, or a zero span at EOF.
    pub fn current_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some(t) => t.span,
            None => self
                .tokens
                .last()
                .map(|t| Span::new(self.file_id, t.span.end, t.span.end, t.span.start_line))
                .unwrap_or_else(|| Span::zero(self.file_id)),
        }
    }

    /// Span covering everything from a saved position to the last
    /// consumed token.
    pub fn span_from(&self, start: usize) -> Span {
        let first = match self.tokens.get(start) {
            Some(t) => t.span,
            None => return self.current_span(),
        };
        let last = self
            .tokens
            .get(self.pos.saturating_sub(1).max(start))
            .map(|t| t.span)
            .unwrap_or(first);
        first.merge(&last)
    }
}
