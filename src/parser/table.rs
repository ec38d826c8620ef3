//! Table, stream, action, and statement parsers.

use indexmap::IndexMap;

use crate::ast::{
    Action, Declaration, DeclarationBody, InputParam, Invocation, OnInputChoice, Selector,
    Statement, Stream, Table, Value,
};
use crate::lexer::Token;
use crate::types::{AggregationOp, SortDirection};

use super::decl::parse_annotations;
use super::error::ParseError;
use super::filter::parse_filter;
use super::stream::TokenStream;
use super::value::{parse_scalar_expr, parse_type, parse_value};

/// Parse `@kind[.channel](...)` into selector, channel, and input params.
///
/// Two surface forms share the `@` head:
/// - `@com.twitter.post(status="hi")` — the last dot segment is the
///   channel;
/// - `@com.twitter(id="twitter-foo").post(status="hi")` — the first paren
///   group holds selector attributes. Distinguished by whether a `.`
///   follows the closing paren.
pub fn parse_invocation_parts(
    stream: &mut TokenStream,
) -> Result<(Selector, String, Vec<InputParam>), ParseError> {
    let start = stream.current_pos();
    let span = stream.current_span();
    let path = match stream.advance() {
        Some(Token::ClassIdent(path)) => path.clone(),
        other => return Err(ParseError::unexpected(other, "@-class reference", span)),
    };

    let attrs_form = stream.check(&Token::LParen) && {
        let close = matching_paren(stream, 0);
        matches!(close.map(|i| stream.peek_nth(i + 1)), Some(Some(Token::Dot)))
    };

    if attrs_form {
        let mut selector = Selector::new(path);
        selector.span = Some(stream.span_from(start));
        let attrs = parse_in_params(stream)?;
        for attr in attrs {
            match (attr.name.as_str(), &attr.value) {
                ("id", Value::String(id)) => selector.id = Some(id.clone()),
                ("id", Value::Entity { value: Some(id), .. }) => selector.id = Some(id.clone()),
                ("all", Value::Boolean(all)) => selector.all = *all,
                _ => selector.attributes.push(attr),
            }
        }
        stream.expect(Token::Dot)?;
        let channel = stream.expect_ident()?;
        let in_params = parse_in_params(stream)?;
        Ok((selector, channel, in_params))
    } else {
        let (kind, channel) = match path.rfind('.') {
            Some(dot) => (path[..dot].to_string(), path[dot + 1..].to_string()),
            None => {
                return Err(ParseError::invalid(
                    format!("'@{path}' names a class but no function"),
                    span,
                ))
            }
        };
        let mut selector = Selector::new(kind);
        selector.span = Some(stream.span_from(start));
        let in_params = parse_in_params(stream)?;
        Ok((selector, channel, in_params))
    }
}

/// Offset of the `)` matching the `(` at lookahead `from`, if any.
fn matching_paren(stream: &TokenStream, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = from;
    loop {
        match stream.peek_nth(i)? {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
}

fn parse_in_params(stream: &mut TokenStream) -> Result<Vec<InputParam>, ParseError> {
    stream.expect(Token::LParen)?;
    let mut params = Vec::new();
    while !stream.check(&Token::RParen) {
        let start = stream.current_pos();
        let name = stream.expect_ident()?;
        stream.expect(Token::Eq)?;
        let value = parse_value(stream)?;
        params.push(InputParam {
            name,
            value,
            span: Some(stream.span_from(start)),
        });
        if !stream.check(&Token::RParen) {
            stream.expect(Token::Comma)?;
        }
    }
    stream.expect(Token::RParen)?;
    Ok(params)
}

fn parse_invocation(stream: &mut TokenStream) -> Result<Invocation, ParseError> {
    let start = stream.current_pos();
    let (selector, channel, in_params) = parse_invocation_parts(stream)?;
    let mut inv = Invocation::new(selector, channel, in_params);
    inv.span = Some(stream.span_from(start));
    Ok(inv)
}

/// Full table expression: a primary followed by postfix joins, brackets,
/// aliases, and comma-filters.
pub fn parse_table(stream: &mut TokenStream) -> Result<Table, ParseError> {
    let mut table = parse_table_primary(stream)?;
    loop {
        match stream.peek() {
            Some(Token::Join) => {
                stream.advance();
                let rhs = parse_table_primary(stream)?;
                let in_params = if stream.eat(&Token::On) {
                    parse_in_params(stream)?
                } else {
                    Vec::new()
                };
                table = Table::Join {
                    lhs: Box::new(table),
                    rhs: Box::new(rhs),
                    in_params,
                };
            }
            Some(Token::LBracket) => {
                stream.advance();
                table = parse_index_or_slice(stream, table)?;
            }
            Some(Token::As) => {
                stream.advance();
                let name = stream.expect_ident()?;
                table = Table::Alias {
                    table: Box::new(table),
                    name,
                };
            }
            Some(Token::Comma) => {
                stream.advance();
                let filter = parse_filter(stream)?;
                table = Table::Filter {
                    table: Box::new(table),
                    filter,
                };
            }
            _ => break,
        }
    }
    Ok(table)
}

fn parse_index_or_slice(stream: &mut TokenStream, table: Table) -> Result<Table, ParseError> {
    let first = parse_value(stream)?;
    if stream.eat(&Token::Colon) {
        let limit = parse_value(stream)?;
        stream.expect(Token::RBracket)?;
        return Ok(Table::Slice {
            table: Box::new(table),
            base: first,
            limit,
        });
    }
    let mut indices = vec![first];
    while stream.eat(&Token::Comma) {
        indices.push(parse_value(stream)?);
    }
    stream.expect(Token::RBracket)?;
    Ok(Table::Index {
        table: Box::new(table),
        indices,
    })
}

fn parse_table_primary(stream: &mut TokenStream) -> Result<Table, ParseError> {
    let span = stream.current_span();
    match stream.peek() {
        Some(Token::ClassIdent(_)) => Ok(Table::Invocation(parse_invocation(stream)?)),
        Some(Token::LParen) => {
            stream.advance();
            let table = parse_table(stream)?;
            stream.expect(Token::RParen)?;
            Ok(table)
        }
        Some(Token::LBracket) => {
            stream.advance();
            let args = parse_param_name_list(stream)?;
            stream.expect(Token::Of)?;
            // `of`-operands are primaries: postfix brackets, joins, and
            // comma-filters bind outside the prefix form, so
            // `sort x asc of t[1:5]` is a slice of the sorted table.
            let table = parse_table_primary(stream)?;
            Ok(Table::Projection {
                table: Box::new(table),
                args,
            })
        }
        Some(Token::Compute) => {
            stream.advance();
            let expr = parse_scalar_expr(stream)?;
            let alias = if stream.eat(&Token::As) {
                Some(stream.expect_ident()?)
            } else {
                None
            };
            stream.expect(Token::Of)?;
            let table = parse_table_primary(stream)?;
            Ok(Table::Compute {
                table: Box::new(table),
                expr,
                alias,
            })
        }
        Some(Token::Aggregate) => {
            stream.advance();
            let op_name = stream.expect_ident()?;
            let op = AggregationOp::from_surface(&op_name)
                .ok_or_else(|| ParseError::invalid(format!("unknown aggregation '{op_name}'"), span))?;
            let field = if op == AggregationOp::Count && stream.check(&Token::Of) {
                "*".to_string()
            } else {
                stream.expect_ident()?
            };
            let alias = if stream.eat(&Token::As) {
                Some(stream.expect_ident()?)
            } else {
                None
            };
            stream.expect(Token::Of)?;
            let table = parse_table_primary(stream)?;
            Ok(Table::Aggregation {
                table: Box::new(table),
                field,
                op,
                alias,
            })
        }
        Some(Token::Sort) => {
            stream.advance();
            let field = stream.expect_ident()?;
            let direction = match stream.advance() {
                Some(Token::Asc) => SortDirection::Asc,
                Some(Token::Desc) => SortDirection::Desc,
                other => return Err(ParseError::unexpected(other, "asc or desc", span)),
            };
            stream.expect(Token::Of)?;
            let table = parse_table_primary(stream)?;
            Ok(Table::Sort {
                table: Box::new(table),
                field,
                direction,
            })
        }
        Some(Token::Result) => {
            stream.advance();
            stream.expect(Token::LParen)?;
            let path = match stream.advance() {
                Some(Token::ClassIdent(path)) => path.clone(),
                other => return Err(ParseError::unexpected(other, "@-function reference", span)),
            };
            let (kind, channel) = match path.rfind('.') {
                Some(dot) => (path[..dot].to_string(), path[dot + 1..].to_string()),
                None => {
                    return Err(ParseError::invalid(
                        format!("'@{path}' names a class but no function"),
                        span,
                    ))
                }
            };
            let index = if stream.eat(&Token::LBracket) {
                let index = parse_value(stream)?;
                stream.expect(Token::RBracket)?;
                Some(index)
            } else {
                None
            };
            stream.expect(Token::RParen)?;
            Ok(Table::History {
                kind,
                channel,
                index,
                schema: None,
            })
        }
        other => Err(ParseError::unexpected(other, "table expression", span)),
    }
}

fn parse_param_name_list(stream: &mut TokenStream) -> Result<Vec<String>, ParseError> {
    let mut names = vec![stream.expect_ident()?];
    while stream.eat(&Token::Comma) {
        names.push(stream.expect_ident()?);
    }
    stream.expect(Token::RBracket)?;
    Ok(names)
}

/// Does the upcoming input start a stream expression?
///
/// `[x] of monitor ...` and `compute e of monitor ...` need lookahead past
/// the projection head to the `of` operand.
pub fn looks_like_stream(stream: &TokenStream) -> bool {
    match stream.peek() {
        Some(Token::Timer) | Some(Token::AtTimer) | Some(Token::Monitor) | Some(Token::Edge) => {
            true
        }
        Some(Token::LBracket) | Some(Token::Compute) => {
            // Scan for the top-level `of` and inspect what follows.
            let mut depth = 0usize;
            let mut i = 0;
            while let Some(token) = stream.peek_nth(i) {
                match token {
                    Token::LBracket | Token::LParen | Token::LBrace => depth += 1,
                    Token::RBracket | Token::RParen | Token::RBrace => {
                        depth = depth.saturating_sub(1)
                    }
                    Token::Of if depth == 0 => {
                        return matches!(
                            stream.peek_nth(i + 1),
                            Some(Token::Timer)
                                | Some(Token::AtTimer)
                                | Some(Token::Monitor)
                                | Some(Token::Edge)
                        );
                    }
                    Token::Semicolon | Token::Arrow => return false,
                    _ => {}
                }
                i += 1;
            }
            false
        }
        _ => false,
    }
}

pub fn parse_stream(stream: &mut TokenStream) -> Result<Stream, ParseError> {
    let mut parsed = parse_stream_primary(stream)?;
    loop {
        match stream.peek() {
            Some(Token::Join) => {
                stream.advance();
                let table = parse_table_primary(stream)?;
                let in_params = if stream.eat(&Token::On) {
                    parse_in_params(stream)?
                } else {
                    Vec::new()
                };
                parsed = Stream::Join {
                    stream: Box::new(parsed),
                    table: Box::new(table),
                    in_params,
                };
            }
            Some(Token::Comma) => {
                stream.advance();
                let filter = parse_filter(stream)?;
                parsed = Stream::Filter {
                    stream: Box::new(parsed),
                    filter,
                };
            }
            Some(Token::As) => {
                stream.advance();
                let name = stream.expect_ident()?;
                parsed = Stream::Alias {
                    stream: Box::new(parsed),
                    name,
                };
            }
            _ => break,
        }
    }
    Ok(parsed)
}

fn parse_stream_primary(stream: &mut TokenStream) -> Result<Stream, ParseError> {
    let span = stream.current_span();
    match stream.peek() {
        Some(Token::Timer) => {
            stream.advance();
            let params = parse_in_params(stream)?;
            let mut base = None;
            let mut interval = None;
            let mut frequency = None;
            for param in params {
                match param.name.as_str() {
                    "base" => base = Some(param.value),
                    "interval" => interval = Some(param.value),
                    "frequency" => frequency = Some(param.value),
                    other => {
                        return Err(ParseError::invalid(
                            format!("unknown timer parameter '{other}'"),
                            span,
                        ))
                    }
                }
            }
            Ok(Stream::Timer {
                base: base.unwrap_or(Value::Date(crate::ast::DateValue::Now)),
                interval: interval
                    .ok_or_else(|| ParseError::invalid("timer requires an interval", span))?,
                frequency,
            })
        }
        Some(Token::AtTimer) => {
            stream.advance();
            let params = parse_in_params(stream)?;
            let mut times = Vec::new();
            let mut expiration = None;
            for param in params {
                match (param.name.as_str(), param.value) {
                    ("time", Value::Array(values)) => times = values,
                    ("time", single) => times = vec![single],
                    ("expiration_date", value) => expiration = Some(value),
                    (other, _) => {
                        return Err(ParseError::invalid(
                            format!("unknown attimer parameter '{other}'"),
                            span,
                        ))
                    }
                }
            }
            if times.is_empty() {
                return Err(ParseError::invalid("attimer requires a time", span));
            }
            Ok(Stream::AtTimer { times, expiration })
        }
        Some(Token::Monitor) => {
            stream.advance();
            let table = parse_table_primary(stream)?;
            let args = if stream.check(&Token::On)
                && matches!(stream.peek_nth(1), Some(Token::New))
            {
                stream.advance();
                stream.advance();
                if stream.eat(&Token::LBracket) {
                    Some(parse_param_name_list(stream)?)
                } else {
                    Some(Vec::new())
                }
            } else {
                None
            };
            Ok(Stream::Monitor {
                table: Box::new(table),
                args,
            })
        }
        Some(Token::Edge) => {
            stream.advance();
            let inner = parse_stream_primary(stream)?;
            stream.expect(Token::On)?;
            if stream.eat(&Token::New) {
                Ok(Stream::EdgeNew(Box::new(inner)))
            } else {
                let filter = parse_filter(stream)?;
                Ok(Stream::EdgeFilter {
                    stream: Box::new(inner),
                    filter,
                })
            }
        }
        Some(Token::LBracket) => {
            stream.advance();
            let args = parse_param_name_list(stream)?;
            stream.expect(Token::Of)?;
            let inner = parse_stream_primary(stream)?;
            Ok(Stream::Projection {
                stream: Box::new(inner),
                args,
            })
        }
        Some(Token::Compute) => {
            stream.advance();
            let expr = parse_scalar_expr(stream)?;
            let alias = if stream.eat(&Token::As) {
                Some(stream.expect_ident()?)
            } else {
                None
            };
            stream.expect(Token::Of)?;
            let inner = parse_stream_primary(stream)?;
            Ok(Stream::Compute {
                stream: Box::new(inner),
                expr,
                alias,
            })
        }
        Some(Token::LParen) => {
            stream.advance();
            let inner = parse_stream(stream)?;
            stream.expect(Token::RParen)?;
            Ok(inner)
        }
        other => Err(ParseError::unexpected(other, "stream expression", span)),
    }
}

/// The `... => ... ;` tail of a rule or command, after the leading
/// `now =>` or stream has been consumed. Returns the optional table stage
/// and the final actions.
pub fn parse_rule_tail(
    stream: &mut TokenStream,
) -> Result<(Option<Table>, Vec<Action>), ParseError> {
    let span = stream.current_span();
    let first = parse_component(stream)?;
    if stream.eat(&Token::Arrow) {
        let table = match first {
            Component::Table(table) => table,
            Component::Actions(_) => {
                return Err(ParseError::invalid("actions must come last in a rule", span))
            }
        };
        let second = parse_component(stream)?;
        let actions = match second {
            Component::Actions(actions) => actions,
            Component::Table(_) => {
                return Err(ParseError::invalid(
                    "a rule admits at most one query stage",
                    span,
                ))
            }
        };
        Ok((Some(table), actions))
    } else {
        match first {
            Component::Actions(actions) => Ok((None, actions)),
            Component::Table(Table::Invocation(inv)) => {
                Ok((None, vec![Action::Invocation(inv)]))
            }
            Component::Table(_) => Err(ParseError::invalid(
                "rule must end in an action or notify",
                span,
            )),
        }
    }
}

enum Component {
    Table(Table),
    Actions(Vec<Action>),
}

fn parse_component(stream: &mut TokenStream) -> Result<Component, ParseError> {
    match stream.peek() {
        Some(Token::Notify) => {
            stream.advance();
            Ok(Component::Actions(vec![Action::notify()]))
        }
        Some(Token::Return) => {
            stream.advance();
            Ok(Component::Actions(vec![Action::Notify {
                name: crate::ast::NotifyKind::Return,
            }]))
        }
        _ => Ok(Component::Table(parse_table(stream)?)),
    }
}

pub fn parse_statement(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let start = stream.current_pos();
    match stream.peek() {
        Some(Token::Let) => parse_let(stream),
        Some(Token::OnInput) => parse_oninput(stream),
        Some(Token::Now) => {
            stream.advance();
            stream.expect(Token::Arrow)?;
            let (table, actions) = parse_rule_tail(stream)?;
            let span = Some(stream.span_from(start));
            stream.expect(Token::Semicolon)?;
            Ok(Statement::Command { table, actions, span })
        }
        _ if looks_like_stream(stream) => {
            let parsed = parse_stream(stream)?;
            stream.expect(Token::Arrow)?;
            let (table, actions) = parse_rule_tail(stream)?;
            // `stream => table => actions` folds the query stage into the
            // stream as a parameter-passing join.
            let parsed = match table {
                Some(table) => Stream::Join {
                    stream: Box::new(parsed),
                    table: Box::new(table),
                    in_params: Vec::new(),
                },
                None => parsed,
            };
            let span = Some(stream.span_from(start));
            stream.expect(Token::Semicolon)?;
            Ok(Statement::Rule {
                stream: parsed,
                actions,
                span,
            })
        }
        other => Err(ParseError::unexpected(
            other,
            "statement",
            stream.current_span(),
        )),
    }
}

fn parse_let(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Let)?;
    match stream.peek() {
        Some(Token::Query) | Some(Token::Stream) | Some(Token::Action) => {
            let kind = stream.advance().cloned();
            let name = stream.expect_ident()?;
            let mut params = IndexMap::new();
            if stream.eat(&Token::LParen) {
                while !stream.check(&Token::RParen) {
                    let pname = stream.expect_ident()?;
                    stream.expect(Token::Colon)?;
                    params.insert(pname, parse_type(stream)?);
                    if !stream.check(&Token::RParen) {
                        stream.expect(Token::Comma)?;
                    }
                }
                stream.expect(Token::RParen)?;
            }
            stream.expect(Token::Define)?;
            let body = match kind {
                Some(Token::Query) => DeclarationBody::Table(parse_table(stream)?),
                Some(Token::Stream) => DeclarationBody::Stream(parse_stream(stream)?),
                _ => DeclarationBody::Actions(vec![Action::Invocation(parse_invocation(
                    stream,
                )?)]),
            };
            let annotations = parse_annotations(stream)?;
            let span = Some(stream.span_from(start));
            stream.expect(Token::Semicolon)?;
            Ok(Statement::Declaration(Declaration {
                name,
                params,
                body,
                annotations,
                span,
            }))
        }
        _ => {
            let name = stream.expect_ident()?;
            stream.expect(Token::Eq)?;
            let value = parse_value(stream)?;
            let span = Some(stream.span_from(start));
            stream.expect(Token::Semicolon)?;
            Ok(Statement::Assignment { name, value, span })
        }
    }
}

fn parse_oninput(stream: &mut TokenStream) -> Result<Statement, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::OnInput)?;
    stream.expect(Token::Arrow)?;
    let (table, actions) = parse_rule_tail(stream)?;
    let annotations = parse_annotations(stream)?;
    let span = Some(stream.span_from(start));
    stream.expect(Token::Semicolon)?;
    Ok(Statement::OnInputChoice(OnInputChoice {
        table,
        actions,
        annotations,
        span,
    }))
}
