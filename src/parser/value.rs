//! Value and type parsers.

use chrono::{TimeZone, Utc};
use indexmap::IndexMap;

use crate::ast::{DateEdge, DateValue, EventRef, LocationValue, TimeValue, Value};
use crate::lexer::Token;
use crate::types::{Field, Type};

use super::error::ParseError;
use super::stream::TokenStream;

/// Parse a plain value: literals, references, arrays, objects, holes.
///
/// Arithmetic is not admitted here; `compute` expressions and filter
/// operands go through [`parse_scalar_expr`].
pub fn parse_value(stream: &mut TokenStream) -> Result<Value, ParseError> {
    let span = stream.current_span();
    match stream.peek() {
        Some(Token::True) => {
            stream.advance();
            Ok(Value::Boolean(true))
        }
        Some(Token::False) => {
            stream.advance();
            Ok(Value::Boolean(false))
        }
        Some(Token::Integer(n)) => {
            let n = *n;
            stream.advance();
            Ok(Value::Number(n as f64))
        }
        Some(Token::Double(x)) => {
            let x = *x;
            stream.advance();
            Ok(Value::Number(x))
        }
        Some(Token::Measure((value, unit))) => {
            let (value, unit) = (*value, unit.clone());
            stream.advance();
            Ok(Value::Measure { value, unit })
        }
        Some(Token::Currency((value, code))) => {
            let (value, code) = (*value, code.clone());
            stream.advance();
            Ok(Value::Currency { value, code })
        }
        Some(Token::Minus) => {
            stream.advance();
            match parse_value(stream)? {
                Value::Number(x) => Ok(Value::Number(-x)),
                Value::Measure { value, unit } => Ok(Value::Measure { value: -value, unit }),
                Value::Currency { value, code } => Ok(Value::Currency { value: -value, code }),
                _ => Err(ParseError::invalid("expected numeric literal after '-'", span)),
            }
        }
        Some(Token::Str(_)) => {
            let text = match stream.advance() {
                Some(Token::Str(s)) => s.clone(),
                _ => unreachable!(),
            };
            if stream.eat(&Token::EntityCast) {
                let kind = parse_entity_kind(stream)?;
                let display = parse_optional_display(stream)?;
                Ok(Value::Entity {
                    value: Some(text),
                    kind,
                    display,
                })
            } else {
                Ok(Value::String(text))
            }
        }
        Some(Token::Null) => {
            stream.advance();
            if stream.eat(&Token::EntityCast) {
                let kind = parse_entity_kind(stream)?;
                let display = parse_optional_display(stream)?;
                Ok(Value::Entity {
                    value: None,
                    kind,
                    display,
                })
            } else {
                // Bare `null` in a date position means "now".
                Ok(Value::Date(DateValue::Now))
            }
        }
        Some(Token::Enum) => {
            stream.advance();
            stream.expect(Token::LParen)?;
            let variant = stream.expect_ident()?;
            stream.expect(Token::RParen)?;
            Ok(Value::Enum(variant))
        }
        Some(Token::LBracket) => {
            stream.advance();
            let mut values = Vec::new();
            while !stream.check(&Token::RBracket) {
                values.push(parse_value(stream)?);
                if !stream.check(&Token::RBracket) {
                    stream.expect(Token::Comma)?;
                }
            }
            stream.expect(Token::RBracket)?;
            Ok(Value::Array(values))
        }
        Some(Token::LBrace) => {
            stream.advance();
            let mut fields = IndexMap::new();
            while !stream.check(&Token::RBrace) {
                let name = stream.expect_ident()?;
                stream.expect(Token::Eq)?;
                fields.insert(name, parse_value(stream)?);
                if !stream.check(&Token::RBrace) {
                    stream.expect(Token::Comma)?;
                }
            }
            stream.expect(Token::RBrace)?;
            Ok(Value::Object(fields))
        }
        Some(Token::New) => parse_constructed(stream),
        Some(Token::StartOf) | Some(Token::EndOf) => {
            let edge = if matches!(stream.advance(), Some(Token::StartOf)) {
                DateEdge::StartOf
            } else {
                DateEdge::EndOf
            };
            stream.expect(Token::LParen)?;
            let unit = stream.expect_ident()?;
            stream.expect(Token::RParen)?;
            Ok(Value::Date(DateValue::Edge { edge, unit }))
        }
        Some(Token::UndefinedMark) => {
            stream.advance();
            Ok(Value::undefined())
        }
        Some(Token::DollarIdent(name)) => {
            let name = name.clone();
            stream.advance();
            parse_dollar_value(stream, &name, span)
        }
        Some(Token::Ident(_)) => {
            let name = stream.expect_ident()?;
            if name.starts_with("__") && !name.starts_with("__const") && name != "__pi" {
                return Err(ParseError::invalid(
                    format!("identifier '{name}' is reserved"),
                    span,
                ));
            }
            Ok(Value::VarRef(name))
        }
        other => Err(ParseError::unexpected(other, "value", span)),
    }
}

fn parse_optional_display(stream: &mut TokenStream) -> Result<Option<String>, ParseError> {
    if !stream.check(&Token::LParen) {
        return Ok(None);
    }
    stream.advance();
    let span = stream.current_span();
    let display = match stream.advance() {
        Some(Token::Str(s)) => s.clone(),
        other => return Err(ParseError::unexpected(other, "display string", span)),
    };
    stream.expect(Token::RParen)?;
    Ok(Some(display))
}

/// Entity kind path: `tt:hashtag`, `com.spotify:song`.
pub fn parse_entity_kind(stream: &mut TokenStream) -> Result<String, ParseError> {
    let mut kind = stream.expect_ident()?;
    while stream.eat(&Token::Dot) {
        kind.push('.');
        kind.push_str(&stream.expect_ident()?);
    }
    stream.expect(Token::Colon)?;
    kind.push(':');
    kind.push_str(&stream.expect_ident()?);
    Ok(kind)
}

/// `new Date(...)`, `new Time(...)`, `new Location(...)`.
fn parse_constructed(stream: &mut TokenStream) -> Result<Value, ParseError> {
    let span = stream.current_span();
    stream.expect(Token::New)?;
    let ctor = stream.expect_ident()?;
    stream.expect(Token::LParen)?;
    let value = match ctor.as_str() {
        "Date" => parse_date_args(stream, span)?,
        "Time" => {
            let hour = parse_small_int(stream)?;
            stream.expect(Token::Comma)?;
            let minute = parse_small_int(stream)?;
            let second = if stream.eat(&Token::Comma) {
                parse_small_int(stream)?
            } else {
                0
            };
            Value::Time(TimeValue::Absolute {
                hour: hour as u8,
                minute: minute as u8,
                second: second as u8,
            })
        }
        "Location" => {
            if let Some(Token::Str(name)) = stream.peek() {
                let name = name.clone();
                stream.advance();
                Value::Location(LocationValue::Unresolved(name))
            } else {
                let lat = parse_signed_number(stream)?;
                stream.expect(Token::Comma)?;
                let lon = parse_signed_number(stream)?;
                let display = if stream.eat(&Token::Comma) {
                    match stream.advance() {
                        Some(Token::Str(s)) => Some(s.clone()),
                        other => {
                            return Err(ParseError::unexpected(other, "display string", span))
                        }
                    }
                } else {
                    None
                };
                Value::Location(LocationValue::Absolute { lat, lon, display })
            }
        }
        other => {
            return Err(ParseError::invalid(
                format!("unknown constructor 'new {other}'"),
                span,
            ))
        }
    };
    stream.expect(Token::RParen)?;
    Ok(value)
}

/// Date arguments: empty (now), an ISO string, or positional
/// year/month/day where any position may be left blank
/// (`new Date(, 4, 1)` is "April 1st of the current year").
fn parse_date_args(
    stream: &mut TokenStream,
    span: crate::foundation::Span,
) -> Result<Value, ParseError> {
    if stream.check(&Token::RParen) {
        return Ok(Value::Date(DateValue::Now));
    }
    if let Some(Token::Str(iso)) = stream.peek() {
        let iso = iso.clone();
        stream.advance();
        let parsed = chrono::DateTime::parse_from_rfc3339(&iso)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDate::parse_from_str(&iso, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| Utc.from_utc_datetime(&dt))
            })
            .ok_or_else(|| ParseError::invalid(format!("invalid date literal {iso:?}"), span))?;
        return Ok(Value::Date(DateValue::Absolute(parsed)));
    }

    let mut slots: Vec<Option<i64>> = Vec::new();
    loop {
        if stream.check(&Token::Comma) || stream.check(&Token::RParen) {
            slots.push(None);
        } else {
            slots.push(Some(parse_small_int(stream)?));
        }
        if !stream.eat(&Token::Comma) {
            break;
        }
        if stream.check(&Token::RParen) {
            break;
        }
    }
    if slots.len() > 3 {
        return Err(ParseError::invalid("too many date components", span));
    }
    slots.resize(3, None);
    let (year, month, day) = (slots[0], slots[1], slots[2]);
    match (year, month, day) {
        (Some(y), Some(m), Some(d)) => {
            let date = chrono::NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .ok_or_else(|| ParseError::invalid("invalid calendar date", span))?;
            Ok(Value::Date(DateValue::Absolute(Utc.from_utc_datetime(&date))))
        }
        _ => Ok(Value::Date(DateValue::Piece {
            year: year.map(|y| y as i32),
            month: month.map(|m| m as u32),
            day: day.map(|d| d as u32),
            time: None,
        })),
    }
}

fn parse_small_int(stream: &mut TokenStream) -> Result<i64, ParseError> {
    let span = stream.current_span();
    match stream.advance() {
        Some(Token::Integer(n)) => Ok(*n),
        other => Err(ParseError::unexpected(other, "integer", span)),
    }
}

fn parse_signed_number(stream: &mut TokenStream) -> Result<f64, ParseError> {
    let negative = stream.eat(&Token::Minus);
    let span = stream.current_span();
    let magnitude = match stream.advance() {
        Some(Token::Integer(n)) => *n as f64,
        Some(Token::Double(x)) => *x,
        other => return Err(ParseError::unexpected(other, "number", span)),
    };
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_dollar_value(
    stream: &mut TokenStream,
    name: &str,
    span: crate::foundation::Span,
) -> Result<Value, ParseError> {
    match name {
        "undefined" => Ok(Value::undefined()),
        "event" => {
            if stream.check(&Token::Dot) {
                stream.advance();
                let field = stream.expect_ident()?;
                match field.as_str() {
                    "type" => Ok(Value::Event(EventRef::Type)),
                    "program_id" => Ok(Value::Event(EventRef::ProgramId)),
                    other => Err(ParseError::invalid(
                        format!("unknown event field '{other}'"),
                        span,
                    )),
                }
            } else {
                Ok(Value::Event(EventRef::Content))
            }
        }
        "location" => {
            stream.expect(Token::Dot)?;
            let place = stream.expect_ident()?;
            Ok(Value::Location(LocationValue::Relative(place)))
        }
        "time" => {
            stream.expect(Token::Dot)?;
            let moment = stream.expect_ident()?;
            Ok(Value::Time(TimeValue::Relative(moment)))
        }
        "context" => {
            stream.expect(Token::Dot)?;
            let mut path = stream.expect_ident()?;
            while stream.eat(&Token::Dot) {
                path.push('.');
                path.push_str(&stream.expect_ident()?);
            }
            let ty = match path.split('.').next().unwrap_or("") {
                "location" => Type::Location,
                "time" => Type::Time,
                _ => Type::Any,
            };
            Ok(Value::ContextRef { name: path, ty })
        }
        other => Err(ParseError::invalid(
            format!("unknown value '${other}'"),
            span,
        )),
    }
}

/// Scalar expression: values combined with `+ - * /`, scalar function
/// calls, and `field of array` projections.
pub fn parse_scalar_expr(stream: &mut TokenStream) -> Result<Value, ParseError> {
    parse_scalar_additive(stream)
}

fn parse_scalar_additive(stream: &mut TokenStream) -> Result<Value, ParseError> {
    let mut lhs = parse_scalar_multiplicative(stream)?;
    loop {
        let op = match stream.peek() {
            Some(Token::Plus) => "+",
            Some(Token::Minus) => "-",
            _ => break,
        };
        stream.advance();
        let rhs = parse_scalar_multiplicative(stream)?;
        lhs = Value::Computation {
            op: op.to_string(),
            operands: vec![lhs, rhs],
        };
    }
    Ok(lhs)
}

fn parse_scalar_multiplicative(stream: &mut TokenStream) -> Result<Value, ParseError> {
    let mut lhs = parse_scalar_atom(stream)?;
    loop {
        let op = match stream.peek() {
            Some(Token::Star) => "*",
            Some(Token::Slash) => "/",
            _ => break,
        };
        stream.advance();
        let rhs = parse_scalar_atom(stream)?;
        lhs = Value::Computation {
            op: op.to_string(),
            operands: vec![lhs, rhs],
        };
    }
    Ok(lhs)
}

fn parse_scalar_atom(stream: &mut TokenStream) -> Result<Value, ParseError> {
    if stream.check(&Token::LParen) {
        stream.advance();
        let inner = parse_scalar_expr(stream)?;
        stream.expect(Token::RParen)?;
        return Ok(inner);
    }
    // Scalar call: `count(x)`, `distance(a, b)`.
    if matches!(stream.peek(), Some(Token::Ident(_)))
        && matches!(stream.peek_nth(1), Some(Token::LParen))
    {
        let op = stream.expect_ident()?;
        stream.advance();
        let mut operands = Vec::new();
        while !stream.check(&Token::RParen) {
            operands.push(parse_scalar_expr(stream)?);
            if !stream.check(&Token::RParen) {
                stream.expect(Token::Comma)?;
            }
        }
        stream.expect(Token::RParen)?;
        return Ok(Value::Computation { op, operands });
    }
    // Array-field projection: `name of value`. This is the value-side arm
    // of the `of` disambiguation; the table-side projection always uses
    // brackets.
    if matches!(stream.peek(), Some(Token::Ident(_)))
        && matches!(stream.peek_nth(1), Some(Token::Of))
    {
        let field = stream.expect_ident()?;
        stream.advance();
        let value = parse_scalar_atom(stream)?;
        return Ok(Value::ArrayField {
            value: Box::new(value),
            field,
        });
    }
    parse_value(stream)
}

/// Type expression: `String`, `Entity(com.spotify:song)`, `Array(Number)`,
/// `Measure(C)`, `Enum(high,low)`, `{ lat: Number, lon: Number }`.
pub fn parse_type(stream: &mut TokenStream) -> Result<Type, ParseError> {
    let span = stream.current_span();
    if stream.check(&Token::LBrace) {
        stream.advance();
        let mut fields = IndexMap::new();
        while !stream.check(&Token::RBrace) {
            let name = stream.expect_ident()?;
            stream.expect(Token::Colon)?;
            let ty = parse_type(stream)?;
            fields.insert(
                name,
                Field {
                    ty,
                    is_input: true,
                    required: false,
                },
            );
            if !stream.check(&Token::RBrace) {
                stream.expect(Token::Comma)?;
            }
        }
        stream.expect(Token::RBrace)?;
        return Ok(Type::Compound(fields));
    }

    let name = stream.expect_ident()?;
    match name.as_str() {
        "Boolean" => Ok(Type::Boolean),
        "String" => Ok(Type::string()),
        "Number" => Ok(Type::Number),
        "Currency" => Ok(Type::Currency),
        "Location" => Ok(Type::Location),
        "Date" => Ok(Type::Date),
        "Time" => Ok(Type::Time),
        "RecurrentTimeSpecification" => Ok(Type::RecurrentTimeSpec),
        "Any" => Ok(Type::Any),
        "Measure" => {
            stream.expect(Token::LParen)?;
            let unit = stream.expect_ident()?;
            stream.expect(Token::RParen)?;
            let base = crate::types::base_unit(&unit)
                .ok_or_else(|| ParseError::invalid(format!("unknown unit '{unit}'"), span))?;
            Ok(Type::Measure(base.to_string()))
        }
        "Entity" => {
            stream.expect(Token::LParen)?;
            let kind = parse_entity_kind(stream)?;
            stream.expect(Token::RParen)?;
            Ok(Type::Entity(kind))
        }
        "Array" => {
            stream.expect(Token::LParen)?;
            let elem = parse_type(stream)?;
            stream.expect(Token::RParen)?;
            Ok(Type::array(elem))
        }
        "Enum" => {
            stream.expect(Token::LParen)?;
            let mut variants = Vec::new();
            while !stream.check(&Token::RParen) {
                variants.push(stream.expect_ident()?);
                if !stream.check(&Token::RParen) {
                    stream.expect(Token::Comma)?;
                }
            }
            stream.expect(Token::RParen)?;
            Ok(Type::Enum(variants))
        }
        other => Err(ParseError::invalid(format!("unknown type '{other}'"), span)),
    }
}
