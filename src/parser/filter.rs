//! Filter (boolean expression) parser.
//!
//! `||` binds looser than `&&`; `!` binds tightest. `true` and `false`
//! in filter position are boolean expressions, not values: the grammar
//! non-terminal drives that disambiguation, so `true(param)` here is a
//! don't-care marker while `true` in a value position stays a literal.

use crate::ast::{BooleanExpression, Value};
use crate::lexer::Token;
use crate::types::Operator;

use super::error::ParseError;
use super::stream::TokenStream;
use super::table::parse_invocation_parts;
use super::value::{parse_scalar_expr, parse_value};

pub fn parse_filter(stream: &mut TokenStream) -> Result<BooleanExpression, ParseError> {
    parse_or(stream)
}

fn parse_or(stream: &mut TokenStream) -> Result<BooleanExpression, ParseError> {
    let mut operands = vec![parse_and(stream)?];
    while stream.eat(&Token::OrOr) {
        operands.push(parse_and(stream)?);
    }
    Ok(BooleanExpression::or(operands))
}

fn parse_and(stream: &mut TokenStream) -> Result<BooleanExpression, ParseError> {
    let mut operands = vec![parse_unary(stream)?];
    while stream.eat(&Token::AndAnd) {
        operands.push(parse_unary(stream)?);
    }
    Ok(BooleanExpression::and(operands))
}

fn parse_unary(stream: &mut TokenStream) -> Result<BooleanExpression, ParseError> {
    match stream.peek() {
        Some(Token::Bang) => {
            stream.advance();
            Ok(BooleanExpression::not(parse_unary(stream)?))
        }
        Some(Token::LParen) => {
            stream.advance();
            let inner = parse_or(stream)?;
            stream.expect(Token::RParen)?;
            Ok(inner)
        }
        Some(Token::True) => {
            stream.advance();
            // `true(param)` marks the parameter as explicitly don't-care.
            if stream.eat(&Token::LParen) {
                let name = stream.expect_ident()?;
                stream.expect(Token::RParen)?;
                Ok(BooleanExpression::DontCare { name })
            } else {
                Ok(BooleanExpression::True)
            }
        }
        Some(Token::False) => {
            stream.advance();
            Ok(BooleanExpression::False)
        }
        Some(Token::ClassIdent(_)) => parse_external(stream),
        _ => parse_atom(stream),
    }
}

/// External (subquery) predicate:
/// `@com.weather.current(location=$location.home) { temperature >= 5C }`.
fn parse_external(stream: &mut TokenStream) -> Result<BooleanExpression, ParseError> {
    let start = stream.current_pos();
    let (selector, channel, in_params) = parse_invocation_parts(stream)?;
    stream.expect(Token::LBrace)?;
    let filter = parse_filter(stream)?;
    stream.expect(Token::RBrace)?;
    Ok(BooleanExpression::External {
        selector,
        channel,
        in_params,
        filter: Box::new(filter),
        schema: None,
        span: Some(stream.span_from(start)),
    })
}

fn parse_atom(stream: &mut TokenStream) -> Result<BooleanExpression, ParseError> {
    let start = stream.current_pos();

    // Plain atom: `param op value`. Anything else on the left (a scalar
    // call, an arithmetic expression, a field-of projection) makes this a
    // compute comparison.
    let plain = matches!(stream.peek(), Some(Token::Ident(_)))
        && !matches!(stream.peek_nth(1), Some(Token::LParen))
        && !matches!(stream.peek_nth(1), Some(Token::Of))
        && !matches!(
            stream.peek_nth(1),
            Some(Token::Plus) | Some(Token::Minus) | Some(Token::Star) | Some(Token::Slash)
        );

    if plain {
        let name = stream.expect_ident()?;
        let op = parse_operator(stream)?;
        let value = parse_value(stream)?;
        Ok(BooleanExpression::Atom {
            name,
            op,
            value,
            span: Some(stream.span_from(start)),
        })
    } else {
        let lhs = parse_scalar_expr(stream)?;
        let op = parse_operator(stream)?;
        let rhs = parse_scalar_expr(stream)?;
        if let (Value::VarRef(name), false) = (&lhs, rhs_is_computed(&rhs)) {
            // A parenthesized var still makes a plain atom.
            return Ok(BooleanExpression::Atom {
                name: name.clone(),
                op,
                value: rhs,
                span: Some(stream.span_from(start)),
            });
        }
        Ok(BooleanExpression::Compute {
            lhs,
            op,
            rhs,
            span: Some(stream.span_from(start)),
        })
    }
}

fn rhs_is_computed(value: &Value) -> bool {
    matches!(
        value,
        Value::Computation { .. } | Value::ArrayField { .. } | Value::Filter { .. }
    )
}

fn parse_operator(stream: &mut TokenStream) -> Result<Operator, ParseError> {
    let span = stream.current_span();
    let op = match stream.peek() {
        Some(Token::EqEq) => Some(Operator::Equal),
        Some(Token::GtEq) => Some(Operator::GreaterEq),
        Some(Token::LtEq) => Some(Operator::LessEq),
        Some(Token::Like) => Some(Operator::Substr),
        Some(Token::RevLike) => Some(Operator::RevSubstr),
        Some(Token::Ident(name)) => Operator::from_surface(name),
        _ => None,
    };
    match op {
        Some(op) => {
            stream.advance();
            Ok(op)
        }
        None => Err(ParseError::unexpected(
            stream.peek(),
            "comparison operator",
            span,
        )),
    }
}
