//! Declaration-level parsers: classes, datasets, permission rules,
//! bookkeeping commands, control commands, and dialogue states.

use indexmap::IndexMap;

use crate::ast::{
    AnnotationMap, ArgDirection, ArgumentDef, Bookkeeping, BookkeepingIntent, ClassDef, Confirm,
    ControlCommand, Dataset, DeclarationBody, DialogueHistoryItem, DialogueHistoryResultItem,
    DialogueHistoryResultList, DialogueState, EntityDecl, Example, FunctionDef, FunctionKind,
    Input, Library, MixinImport, PermissionFunction, PermissionRule, Value,
};
use crate::lexer::Token;

use super::error::ParseError;
use super::filter::parse_filter;
use super::stream::TokenStream;
use super::table::{parse_statement, parse_stream, parse_table};
use super::value::{parse_type, parse_value};

/// Parse a run of `#_[name=value]` / `#[name=value]` annotations.
pub fn parse_annotations(stream: &mut TokenStream) -> Result<AnnotationMap, ParseError> {
    let mut annotations = AnnotationMap::default();
    loop {
        let nl = match stream.peek() {
            Some(Token::NlAnnotationOpen) => true,
            Some(Token::ImplAnnotationOpen) => false,
            _ => break,
        };
        stream.advance();
        let name = stream.expect_ident()?;
        stream.expect(Token::Eq)?;
        let value = parse_value(stream)?;
        stream.expect(Token::RBracket)?;
        if nl {
            annotations.nl.insert(name, value);
        } else {
            annotations.impl_.insert(name, value);
        }
    }
    Ok(annotations)
}

// === Classes ===

pub fn parse_class(stream: &mut TokenStream) -> Result<ClassDef, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Class)?;
    let span = stream.current_span();
    let kind = match stream.advance() {
        Some(Token::ClassIdent(kind)) => kind.clone(),
        other => return Err(ParseError::unexpected(other, "class name", span)),
    };
    let mut class = ClassDef::new(kind);

    if stream.eat(&Token::Extends) {
        loop {
            let span = stream.current_span();
            match stream.advance() {
                Some(Token::ClassIdent(parent)) => class.extends.push(parent.clone()),
                other => return Err(ParseError::unexpected(other, "parent class", span)),
            }
            if !stream.eat(&Token::Comma) {
                break;
            }
        }
    }

    class.annotations = parse_annotations(stream)?;
    stream.expect(Token::LBrace)?;
    while !stream.check(&Token::RBrace) {
        parse_class_member(stream, &mut class)?;
    }
    stream.expect(Token::RBrace)?;
    class.span = Some(stream.span_from(start));
    Ok(class)
}

fn parse_class_member(stream: &mut TokenStream, class: &mut ClassDef) -> Result<(), ParseError> {
    let span = stream.current_span();
    match stream.peek() {
        Some(Token::Import) => {
            stream.advance();
            let mut facets = vec![stream.expect_ident()?];
            while stream.eat(&Token::Comma) {
                facets.push(stream.expect_ident()?);
            }
            stream.expect(Token::From)?;
            let span = stream.current_span();
            let module = match stream.advance() {
                Some(Token::ClassIdent(module)) => module.clone(),
                other => return Err(ParseError::unexpected(other, "mixin module", span)),
            };
            stream.expect(Token::LParen)?;
            let mut in_params = Vec::new();
            while !stream.check(&Token::RParen) {
                let name = stream.expect_ident()?;
                stream.expect(Token::Eq)?;
                in_params.push(crate::ast::InputParam::new(name, parse_value(stream)?));
                if !stream.check(&Token::RParen) {
                    stream.expect(Token::Comma)?;
                }
            }
            stream.expect(Token::RParen)?;
            stream.expect(Token::Semicolon)?;
            class.imports.push(MixinImport {
                facets,
                module,
                in_params,
            });
            Ok(())
        }
        Some(Token::Entity) => {
            stream.advance();
            let name = stream.expect_ident()?;
            let annotations = parse_annotations(stream)?;
            stream.expect(Token::Semicolon)?;
            class.entities.push(EntityDecl { name, annotations });
            Ok(())
        }
        Some(Token::Monitorable) | Some(Token::List) | Some(Token::Query)
        | Some(Token::Action) => {
            let def = parse_function_def(stream)?;
            class.add_function(def);
            Ok(())
        }
        other => Err(ParseError::unexpected(other, "class member", span)),
    }
}

fn parse_function_def(stream: &mut TokenStream) -> Result<FunctionDef, ParseError> {
    let start = stream.current_pos();
    let mut is_monitorable = false;
    let mut is_list = false;
    loop {
        match stream.peek() {
            Some(Token::Monitorable) => {
                is_monitorable = true;
                stream.advance();
            }
            Some(Token::List) => {
                is_list = true;
                stream.advance();
            }
            _ => break,
        }
    }
    let span = stream.current_span();
    let kind = match stream.advance() {
        Some(Token::Query) => FunctionKind::Query,
        Some(Token::Action) => FunctionKind::Action,
        other => return Err(ParseError::unexpected(other, "query or action", span)),
    };
    if kind == FunctionKind::Action && (is_monitorable || is_list) {
        return Err(ParseError::invalid(
            "actions cannot be monitorable or list",
            span,
        ));
    }
    let name = stream.expect_ident()?;
    let mut def = FunctionDef::new(kind, name);
    def.is_monitorable = is_monitorable;
    def.is_list = is_list;

    stream.expect(Token::LParen)?;
    while !stream.check(&Token::RParen) {
        let direction = parse_arg_direction(stream)?;
        let arg_name = stream.expect_ident()?;
        stream.expect(Token::Colon)?;
        let ty = parse_type(stream)?;
        let mut arg = ArgumentDef::new(arg_name, direction, ty);
        arg.annotations = parse_annotations(stream)?;
        def.args.insert(arg.name.clone(), arg);
        if !stream.check(&Token::RParen) {
            stream.expect(Token::Comma)?;
        }
    }
    stream.expect(Token::RParen)?;

    def.annotations = parse_annotations(stream)?;
    if let Some(Value::Array(values)) = def.annotations.impl_.get("minimal_projection") {
        let names = values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        def.minimal_projection = Some(names);
    }
    stream.expect(Token::Semicolon)?;
    def.span = Some(stream.span_from(start));
    Ok(def)
}

fn parse_arg_direction(stream: &mut TokenStream) -> Result<ArgDirection, ParseError> {
    let span = stream.current_span();
    match stream.advance() {
        Some(Token::In) => match stream.advance() {
            Some(Token::Req) => Ok(ArgDirection::InReq),
            Some(Token::Opt) => Ok(ArgDirection::InOpt),
            other => Err(ParseError::unexpected(other, "req or opt", span)),
        },
        Some(Token::Out) => Ok(ArgDirection::Out),
        other => Err(ParseError::unexpected(other, "in req, in opt, or out", span)),
    }
}

// === Datasets ===

pub fn parse_dataset(stream: &mut TokenStream) -> Result<Dataset, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Dataset)?;
    let span = stream.current_span();
    let name = match stream.advance() {
        Some(Token::ClassIdent(name)) => name.clone(),
        other => return Err(ParseError::unexpected(other, "dataset name", span)),
    };
    let mut language = None;
    if matches!(stream.peek(), Some(Token::Ident(s)) if s == "language") {
        stream.advance();
        let span = stream.current_span();
        match stream.advance() {
            Some(Token::Str(lang)) => language = Some(lang.clone()),
            other => return Err(ParseError::unexpected(other, "language tag", span)),
        }
    }
    let annotations = parse_annotations(stream)?;
    stream.expect(Token::LBrace)?;
    let mut examples = Vec::new();
    while !stream.check(&Token::RBrace) {
        examples.push(parse_example(stream)?);
    }
    stream.expect(Token::RBrace)?;
    Ok(Dataset {
        name,
        language,
        examples,
        annotations,
        span: Some(stream.span_from(start)),
    })
}

fn parse_example(stream: &mut TokenStream) -> Result<Example, ParseError> {
    let start = stream.current_pos();
    let span = stream.current_span();
    let kind = match stream.advance() {
        Some(Token::Query) => Token::Query,
        Some(Token::Stream) => Token::Stream,
        Some(Token::Action) => Token::Action,
        other => return Err(ParseError::unexpected(other, "example kind", span)),
    };
    let mut params = IndexMap::new();
    if stream.eat(&Token::LParen) {
        while !stream.check(&Token::RParen) {
            let name = stream.expect_ident()?;
            stream.expect(Token::Colon)?;
            params.insert(name, parse_type(stream)?);
            if !stream.check(&Token::RParen) {
                stream.expect(Token::Comma)?;
            }
        }
        stream.expect(Token::RParen)?;
    }
    stream.expect(Token::Define)?;
    let body = match kind {
        Token::Query => DeclarationBody::Table(parse_table(stream)?),
        Token::Stream => DeclarationBody::Stream(parse_stream(stream)?),
        _ => {
            let (selector, channel, in_params) = super::table::parse_invocation_parts(stream)?;
            DeclarationBody::Actions(vec![crate::ast::Action::Invocation(
                crate::ast::Invocation::new(selector, channel, in_params),
            )])
        }
    };
    let annotations = parse_annotations(stream)?;
    stream.expect(Token::Semicolon)?;

    let utterances = match annotations.nl.get("utterances") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let id = match annotations.impl_.get("id") {
        Some(Value::Number(n)) => Some(*n as i64),
        _ => None,
    };
    Ok(Example {
        id,
        params,
        body,
        utterances,
        annotations,
        span: Some(stream.span_from(start)),
    })
}

// === Permission rules ===

pub fn parse_permission_rule(stream: &mut TokenStream) -> Result<PermissionRule, ParseError> {
    let start = stream.current_pos();
    let principal = parse_filter(stream)?;
    stream.expect(Token::Colon)?;
    let query = parse_permission_function(stream, true)?;
    stream.expect(Token::Arrow)?;
    let action = parse_permission_function(stream, false)?;
    // Legacy three-part policies end with an output wildcard (`=> *` or
    // `=> notify`); it carries no information and is dropped.
    if stream.eat(&Token::Arrow) {
        let span = stream.current_span();
        match stream.advance() {
            Some(Token::Star) | Some(Token::Notify) => {}
            other => return Err(ParseError::unexpected(other, "* or notify", span)),
        }
    }
    let span = Some(stream.span_from(start));
    stream.expect(Token::Semicolon)?;
    Ok(PermissionRule {
        principal,
        query,
        action,
        span,
    })
}

fn parse_permission_function(
    stream: &mut TokenStream,
    query_side: bool,
) -> Result<PermissionFunction, ParseError> {
    let span = stream.current_span();
    match stream.peek() {
        Some(Token::Now) if query_side => {
            stream.advance();
            Ok(PermissionFunction::Builtin)
        }
        Some(Token::Notify) if !query_side => {
            stream.advance();
            Ok(PermissionFunction::Builtin)
        }
        Some(Token::Star) => {
            stream.advance();
            Ok(PermissionFunction::Star)
        }
        Some(Token::ClassIdent(path)) => {
            let path = path.clone();
            stream.advance();
            // `@com.twitter.*` lexes as `@com.twitter.` followed by `*`.
            if let Some(kind) = path.strip_suffix('.') {
                stream.expect(Token::Star)?;
                return Ok(PermissionFunction::ClassStar(kind.to_string()));
            }
            let (kind, channel) = match path.rfind('.') {
                Some(dot) => (path[..dot].to_string(), path[dot + 1..].to_string()),
                None => {
                    return Err(ParseError::invalid(
                        format!("'@{path}' names a class but no function"),
                        span,
                    ))
                }
            };
            let filter = if stream.eat(&Token::Comma) {
                parse_filter(stream)?
            } else {
                crate::ast::BooleanExpression::True
            };
            Ok(PermissionFunction::Specified {
                kind,
                channel,
                filter,
                schema: None,
            })
        }
        other => Err(ParseError::unexpected(other, "permission function", span)),
    }
}

// === Bookkeeping and control commands ===

pub fn parse_bookkeeping(stream: &mut TokenStream) -> Result<Bookkeeping, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Bookkeeping)?;
    stream.expect(Token::LParen)?;
    let intent = parse_intent(stream)?;
    stream.expect(Token::RParen)?;
    let span = Some(stream.span_from(start));
    stream.expect(Token::Semicolon)?;
    Ok(Bookkeeping { intent, span })
}

fn parse_intent(stream: &mut TokenStream) -> Result<BookkeepingIntent, ParseError> {
    let span = stream.current_span();
    let name = stream.expect_ident()?;
    match name.as_str() {
        "choice" => {
            stream.expect(Token::LParen)?;
            let span = stream.current_span();
            let n = match stream.advance() {
                Some(Token::Integer(n)) => *n,
                other => return Err(ParseError::unexpected(other, "choice index", span)),
            };
            stream.expect(Token::RParen)?;
            Ok(BookkeepingIntent::Choice(n))
        }
        "answer" => {
            stream.expect(Token::LParen)?;
            let value = parse_value(stream)?;
            stream.expect(Token::RParen)?;
            Ok(BookkeepingIntent::Answer(value))
        }
        "predicate" => {
            stream.expect(Token::LParen)?;
            let filter = parse_filter(stream)?;
            stream.expect(Token::RParen)?;
            Ok(BookkeepingIntent::Predicate(filter))
        }
        "special" => {
            stream.expect(Token::LParen)?;
            let special = stream.expect_ident()?;
            stream.expect(Token::RParen)?;
            check_special(&special, span)?;
            Ok(BookkeepingIntent::Special(special))
        }
        special => {
            check_special(special, span)?;
            Ok(BookkeepingIntent::Special(special.to_string()))
        }
    }
}

fn check_special(
    name: &str,
    span: crate::foundation::Span,
) -> Result<(), ParseError> {
    if crate::ast::SPECIAL_COMMANDS.contains(&name) {
        Ok(())
    } else {
        Err(ParseError::invalid(
            format!("unknown special command '{name}'"),
            span,
        ))
    }
}

/// `$yes;`, `$choice(0);`, `$answer(42);`, `$stop;`
pub fn parse_control_command(
    stream: &mut TokenStream,
    name: &str,
) -> Result<ControlCommand, ParseError> {
    let start = stream.current_pos();
    let span = stream.current_span();
    stream.advance();
    let intent = match name {
        "choice" => {
            stream.expect(Token::LParen)?;
            let ispan = stream.current_span();
            let n = match stream.advance() {
                Some(Token::Integer(n)) => *n,
                other => return Err(ParseError::unexpected(other, "choice index", ispan)),
            };
            stream.expect(Token::RParen)?;
            BookkeepingIntent::Choice(n)
        }
        "answer" => {
            stream.expect(Token::LParen)?;
            let value = parse_value(stream)?;
            stream.expect(Token::RParen)?;
            BookkeepingIntent::Answer(value)
        }
        "predicate" => {
            stream.expect(Token::LParen)?;
            let filter = parse_filter(stream)?;
            stream.expect(Token::RParen)?;
            BookkeepingIntent::Predicate(filter)
        }
        special => {
            check_special(special, span)?;
            BookkeepingIntent::Special(special.to_string())
        }
    };
    let span = Some(stream.span_from(start));
    stream.expect(Token::Semicolon)?;
    Ok(ControlCommand { intent, span })
}

// === Dialogue states ===

/// `$dialogue @<policy>.<act>[(param, ...)]; <history item>*`
pub fn parse_dialogue_state(stream: &mut TokenStream) -> Result<DialogueState, ParseError> {
    let start = stream.current_pos();
    stream.advance(); // `$dialogue`
    let span = stream.current_span();
    let path = match stream.advance() {
        Some(Token::ClassIdent(path)) => path.clone(),
        other => return Err(ParseError::unexpected(other, "dialogue policy", span)),
    };
    let (policy, act) = match path.rfind('.') {
        Some(dot) => (path[..dot].to_string(), path[dot + 1..].to_string()),
        None => {
            return Err(ParseError::invalid(
                "dialogue act must be qualified by its policy",
                span,
            ))
        }
    };
    let act_param = if stream.eat(&Token::LParen) {
        let mut names = Vec::new();
        while !stream.check(&Token::RParen) {
            names.push(stream.expect_ident()?);
            if !stream.check(&Token::RParen) {
                stream.expect(Token::Comma)?;
            }
        }
        stream.expect(Token::RParen)?;
        Some(names)
    } else {
        None
    };
    stream.expect(Token::Semicolon)?;

    let mut history = Vec::new();
    while !stream.at_end() {
        history.push(parse_history_item(stream)?);
    }
    Ok(DialogueState {
        policy,
        act,
        act_param,
        history,
        span: Some(stream.span_from(start)),
    })
}

/// A history item is a statement whose annotations (before the `;`) carry
/// results and confirmation state.
fn parse_history_item(stream: &mut TokenStream) -> Result<DialogueHistoryItem, ParseError> {
    // The statement parser consumes the trailing annotations itself only
    // for declarations; for rules we steal them before the semicolon by
    // parsing the statement body manually.
    let start = stream.current_pos();
    let span = stream.current_span();
    let (statement, annotations) = match stream.peek() {
        Some(Token::Now) => {
            stream.advance();
            stream.expect(Token::Arrow)?;
            let (table, actions) = super::table::parse_rule_tail(stream)?;
            let annotations = parse_annotations(stream)?;
            let span = Some(stream.span_from(start));
            stream.expect(Token::Semicolon)?;
            (
                crate::ast::Statement::Command { table, actions, span },
                annotations,
            )
        }
        _ if super::table::looks_like_stream(stream) => {
            let parsed = parse_stream(stream)?;
            stream.expect(Token::Arrow)?;
            let (table, actions) = super::table::parse_rule_tail(stream)?;
            let parsed = match table {
                Some(table) => crate::ast::Stream::Join {
                    stream: Box::new(parsed),
                    table: Box::new(table),
                    in_params: Vec::new(),
                },
                None => parsed,
            };
            let annotations = parse_annotations(stream)?;
            let span = Some(stream.span_from(start));
            stream.expect(Token::Semicolon)?;
            (
                crate::ast::Statement::Rule {
                    stream: parsed,
                    actions,
                    span,
                },
                annotations,
            )
        }
        other => return Err(ParseError::unexpected(other, "history item", span)),
    };

    let confirm = match annotations.impl_.get("confirm") {
        Some(Value::Enum(state)) => Confirm::from_surface(state)
            .ok_or_else(|| ParseError::invalid(format!("unknown confirm state '{state}'"), span))?,
        None => Confirm::Accepted,
        _ => return Err(ParseError::invalid("confirm must be an enum", span)),
    };

    let results = match annotations.impl_.get("results") {
        Some(Value::Array(rows)) => {
            let mut items = Vec::new();
            for row in rows {
                match row {
                    Value::Object(fields) => items.push(DialogueHistoryResultItem {
                        value: fields.clone(),
                    }),
                    _ => return Err(ParseError::invalid("result rows must be objects", span)),
                }
            }
            let count = match annotations.impl_.get("count") {
                Some(value) => value.clone(),
                None => Value::Number(items.len() as f64),
            };
            let more = matches!(annotations.impl_.get("more"), Some(Value::Boolean(true)));
            let error = annotations.impl_.get("error").cloned();
            Some(DialogueHistoryResultList {
                results: items,
                count,
                more,
                error,
            })
        }
        _ => None,
    };

    Ok(DialogueHistoryItem {
        statement,
        results,
        confirm,
    })
}

// === Libraries ===

/// A library input: one or more classes and datasets.
pub fn parse_library(stream: &mut TokenStream) -> Result<Library, ParseError> {
    let mut library = Library::default();
    while !stream.at_end() {
        match stream.peek() {
            Some(Token::Class) => library.classes.push(parse_class(stream)?),
            Some(Token::Dataset) => library.datasets.push(parse_dataset(stream)?),
            other => {
                return Err(ParseError::unexpected(
                    other,
                    "class or dataset",
                    stream.current_span(),
                ))
            }
        }
    }
    Ok(library)
}

/// Used by the input dispatcher: after classes, is the rest a program?
pub fn parse_program_after_classes(
    stream: &mut TokenStream,
    classes: Vec<ClassDef>,
) -> Result<Input, ParseError> {
    let mut statements = Vec::new();
    while !stream.at_end() {
        statements.push(parse_statement(stream)?);
    }
    if statements.is_empty() && !classes.is_empty() {
        return Ok(Input::Library(Library {
            classes,
            datasets: Vec::new(),
        }));
    }
    Ok(Input::Program(crate::ast::Program { classes, statements }))
}
