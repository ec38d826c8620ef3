//! Hand-written recursive descent parser for ThingTalk surface syntax.
//!
//! ## Architecture
//!
//! - `stream`: `TokenStream` wrapper with lookahead
//! - `error`: `ParseError`
//! - `value`: value, scalar-expression, and type parsers
//! - `filter`: boolean expression parser
//! - `table`: tables, streams, actions, statements
//! - `decl`: classes, datasets, permission rules, bookkeeping, dialogues
//!
//! The grammar is deterministic; the two intentional ambiguities
//! (`true`/`false` as filter vs value, `name of` as projection vs
//! array-field) are resolved by the grammar non-terminal, never by
//! backtracking. Parse failures are fatal for the input and carry the
//! expected/got token pair.

mod decl;
mod error;
mod filter;
mod stream;
mod table;
mod value;

pub use error::ParseError;

use crate::ast::{Input, PermissionRule, Program};
use crate::error::Error;
use crate::lexer::{tokenize, Token};

use stream::TokenStream;

/// Parse any top-level input, dispatching on its leading tokens.
pub fn parse(source: &str) -> Result<Input, Error> {
    parse_with_file_id(source, 0)
}

pub fn parse_with_file_id(source: &str, file_id: u16) -> Result<Input, Error> {
    let tokens = tokenize(source, file_id)?;
    let mut stream = TokenStream::new(&tokens, file_id);
    let input = dispatch(&mut stream)?;
    if !stream.at_end() {
        return Err(ParseError::unexpected(
            stream.peek(),
            "end of input",
            stream.current_span(),
        )
        .into());
    }
    Ok(input)
}

/// Parse a single program (classes plus statements).
pub fn parse_program(source: &str) -> Result<Program, Error> {
    match parse(source)? {
        Input::Program(program) => Ok(program),
        other => Err(Error::UnsupportedFeature(format!(
            "expected a program, parsed a {}",
            input_kind(&other)
        ))),
    }
}

/// Parse a single permission rule.
pub fn parse_permission_rule(source: &str) -> Result<PermissionRule, Error> {
    match parse(source)? {
        Input::Permission(rule) => Ok(rule),
        other => Err(Error::UnsupportedFeature(format!(
            "expected a permission rule, parsed a {}",
            input_kind(&other)
        ))),
    }
}

fn input_kind(input: &Input) -> &'static str {
    match input {
        Input::Program(_) => "program",
        Input::Permission(_) => "permission rule",
        Input::Library(_) => "library",
        Input::Dataset(_) => "dataset",
        Input::Bookkeeping(_) => "bookkeeping command",
        Input::DialogueState(_) => "dialogue state",
        Input::ControlCommand(_) => "control command",
    }
}

fn dispatch(stream: &mut TokenStream) -> Result<Input, ParseError> {
    match stream.peek() {
        Some(Token::Dataset) => {
            // A lone dataset is its own input kind; datasets mixed with
            // classes form a library.
            let dataset = decl::parse_dataset(stream)?;
            if stream.at_end() {
                Ok(Input::Dataset(dataset))
            } else {
                let mut library = decl::parse_library(stream)?;
                library.datasets.insert(0, dataset);
                Ok(Input::Library(library))
            }
        }
        Some(Token::Class) => {
            let mut classes = Vec::new();
            while stream.check(&Token::Class) {
                classes.push(decl::parse_class(stream)?);
            }
            if stream.check(&Token::Dataset) {
                let mut library = decl::parse_library(stream)?;
                library.classes.splice(0..0, classes);
                Ok(Input::Library(library))
            } else {
                decl::parse_program_after_classes(stream, classes)
            }
        }
        Some(Token::Bookkeeping) => Ok(Input::Bookkeeping(decl::parse_bookkeeping(stream)?)),
        Some(Token::DollarIdent(name)) if name == "dialogue" => {
            Ok(Input::DialogueState(decl::parse_dialogue_state(stream)?))
        }
        Some(Token::DollarIdent(name)) => {
            let name = name.clone();
            Ok(Input::ControlCommand(decl::parse_control_command(
                stream, &name,
            )?))
        }
        _ if has_top_level_colon(stream) => {
            Ok(Input::Permission(decl::parse_permission_rule(stream)?))
        }
        _ => decl::parse_program_after_classes(stream, Vec::new()),
    }
}

/// Permission rules are the only inputs with a top-level `:` before the
/// first statement terminator. Colons inside brackets (slices) or entity
/// casts (`^^tt:contact`) do not count.
fn has_top_level_colon(stream: &TokenStream) -> bool {
    let mut depth = 0usize;
    let mut i = 0;
    while let Some(token) = stream.peek_nth(i) {
        match token {
            Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => depth = depth.saturating_sub(1),
            Token::EntityCast => {
                // Skip the entity kind path, colon included.
                i += 1;
                while matches!(
                    stream.peek_nth(i),
                    Some(Token::Ident(_)) | Some(Token::Dot) | Some(Token::Colon)
                ) {
                    i += 1;
                }
                continue;
            }
            Token::Colon if depth == 0 => return true,
            Token::Semicolon | Token::Arrow => return false,
            _ => {}
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        Action, BookkeepingIntent, DateValue, Statement, Stream, Table, Value,
    };
    use crate::types::{AggregationOp, Operator, SortDirection};

    fn parse_ok(source: &str) -> Input {
        parse(source).unwrap_or_else(|e| panic!("parse failed for {source:?}: {e}"))
    }

    fn single_statement(source: &str) -> Statement {
        match parse_ok(source) {
            Input::Program(program) => {
                assert_eq!(program.statements.len(), 1);
                program.statements.into_iter().next().unwrap()
            }
            other => panic!("expected program, got {other:?}"),
        }
    }

    #[test]
    fn simple_command() {
        let stmt = single_statement("now => @com.xkcd.get_comic(number=42) => notify;");
        match stmt {
            Statement::Command { table, actions, .. } => {
                let table = table.expect("expected query stage");
                match table {
                    Table::Invocation(inv) => {
                        assert_eq!(inv.selector.kind, "com.xkcd");
                        assert_eq!(inv.channel, "get_comic");
                        assert_eq!(inv.in_params.len(), 1);
                        assert_eq!(inv.in_params[0].name, "number");
                        assert_eq!(inv.in_params[0].value, Value::Number(42.0));
                    }
                    other => panic!("expected invocation, got {other:?}"),
                }
                assert_eq!(actions, vec![Action::notify()]);
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn action_only_command() {
        let stmt = single_statement("now => @com.twitter.post(status=\"hello\");");
        match stmt {
            Statement::Command { table, actions, .. } => {
                assert!(table.is_none());
                assert!(matches!(&actions[0], Action::Invocation(inv) if inv.channel == "post"));
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn monitor_rule_folds_table_stage() {
        let stmt =
            single_statement("monitor @com.twitter.home_timeline() => @com.twitter.post(status=text);");
        match stmt {
            Statement::Rule { stream, actions, .. } => {
                assert!(matches!(stream, Stream::Monitor { .. }));
                assert_eq!(actions.len(), 1);
            }
            other => panic!("expected rule, got {other:?}"),
        }
    }

    #[test]
    fn filter_with_or() {
        let stmt = single_statement(
            "now => @com.gmail.inbox(), labels == \"a\" || labels == \"b\" => notify;",
        );
        match stmt {
            Statement::Command { table: Some(Table::Filter { filter, .. }), .. } => {
                match filter {
                    crate::ast::BooleanExpression::Or(ops) => assert_eq!(ops.len(), 2),
                    other => panic!("expected or, got {other:?}"),
                }
            }
            other => panic!("expected filtered command, got {other:?}"),
        }
    }

    #[test]
    fn sort_and_slice() {
        let stmt = single_statement(
            "now => sort file_size asc of @com.google.drive.list_drive_files()[1:5] => notify;",
        );
        match stmt {
            Statement::Command { table: Some(table), .. } => match table {
                Table::Slice { table, base, limit } => {
                    assert_eq!(base, Value::Number(1.0));
                    assert_eq!(limit, Value::Number(5.0));
                    match *table {
                        Table::Sort { field, direction, .. } => {
                            assert_eq!(field, "file_size");
                            assert_eq!(direction, SortDirection::Asc);
                        }
                        other => panic!("expected sort, got {other:?}"),
                    }
                }
                other => panic!("expected slice, got {other:?}"),
            },
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn aggregation_count() {
        let stmt = single_statement("now => aggregate count of @com.gmail.inbox() => notify;");
        match stmt {
            Statement::Command { table: Some(Table::Aggregation { op, field, .. }), .. } => {
                assert_eq!(op, AggregationOp::Count);
                assert_eq!(field, "*");
            }
            other => panic!("expected aggregation, got {other:?}"),
        }
    }

    #[test]
    fn projection_of_table() {
        let stmt = single_statement("now => [text, author] of @com.twitter.search() => notify;");
        match stmt {
            Statement::Command { table: Some(Table::Projection { args, .. }), .. } => {
                assert_eq!(args, vec!["text".to_string(), "author".to_string()]);
            }
            other => panic!("expected projection, got {other:?}"),
        }
    }

    #[test]
    fn measure_and_default_temperature() {
        let stmt = single_statement(
            "now => @org.thingpedia.weather.current(location=$location.home), temperature >= 5defaultTemperature => notify;",
        );
        match stmt {
            Statement::Command { table: Some(Table::Filter { filter, .. }), .. } => match filter {
                crate::ast::BooleanExpression::Atom { name, op, value, .. } => {
                    assert_eq!(name, "temperature");
                    assert_eq!(op, Operator::GreaterEq);
                    assert_eq!(
                        value,
                        Value::Measure { value: 5.0, unit: "defaultTemperature".to_string() }
                    );
                }
                other => panic!("expected atom, got {other:?}"),
            },
            other => panic!("expected filtered command, got {other:?}"),
        }
    }

    #[test]
    fn timer_stream() {
        let stmt = single_statement("timer(base=new Date(), interval=1h) => notify;");
        match stmt {
            Statement::Rule { stream: Stream::Timer { base, interval, .. }, .. } => {
                assert_eq!(base, Value::Date(DateValue::Now));
                assert_eq!(interval, Value::Measure { value: 1.0, unit: "h".to_string() });
            }
            other => panic!("expected timer rule, got {other:?}"),
        }
    }

    #[test]
    fn edge_filter_stream() {
        let stmt = single_statement(
            "edge monitor @thermostat.get_temperature() on value >= 70F => notify;",
        );
        assert!(matches!(
            stmt,
            Statement::Rule { stream: Stream::EdgeFilter { .. }, .. }
        ));
    }

    #[test]
    fn projection_of_stream() {
        let stmt = single_statement("[text] of monitor @com.twitter.home_timeline() => notify;");
        assert!(matches!(
            stmt,
            Statement::Rule { stream: Stream::Projection { .. }, .. }
        ));
    }

    #[test]
    fn device_selector_attributes() {
        let stmt = single_statement(
            "now => @com.twitter(id=\"twitter-foo\").post(status=\"hi\");",
        );
        match stmt {
            Statement::Command { actions, .. } => match &actions[0] {
                Action::Invocation(inv) => {
                    assert_eq!(inv.selector.kind, "com.twitter");
                    assert_eq!(inv.selector.id.as_deref(), Some("twitter-foo"));
                    assert_eq!(inv.channel, "post");
                }
                other => panic!("expected invocation, got {other:?}"),
            },
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn external_filter() {
        let stmt = single_statement(
            "now => @com.gmail.inbox(), @org.weather.current(location=$location.home) { temperature >= 10C } => notify;",
        );
        match stmt {
            Statement::Command { table: Some(Table::Filter { filter, .. }), .. } => {
                assert!(matches!(filter, crate::ast::BooleanExpression::External { .. }));
            }
            other => panic!("expected external filter, got {other:?}"),
        }
    }

    #[test]
    fn permission_rule_with_legacy_output_wildcard() {
        let input = parse_ok("true : now => @com.twitter.post => *;");
        match input {
            Input::Permission(rule) => {
                assert_eq!(rule.principal, crate::ast::BooleanExpression::True);
                assert!(matches!(rule.query, crate::ast::PermissionFunction::Builtin));
                assert!(matches!(
                    rule.action,
                    crate::ast::PermissionFunction::Specified { ref channel, .. } if channel == "post"
                ));
            }
            other => panic!("expected permission, got {other:?}"),
        }
    }

    #[test]
    fn class_star_permission() {
        let input = parse_ok("source == \"bob\"^^tt:contact : @com.twitter.* => notify;");
        match input {
            Input::Permission(rule) => {
                assert!(matches!(
                    rule.query,
                    crate::ast::PermissionFunction::ClassStar(ref kind) if kind == "com.twitter"
                ));
                assert!(matches!(rule.action, crate::ast::PermissionFunction::Builtin));
            }
            other => panic!("expected permission, got {other:?}"),
        }
    }

    #[test]
    fn bookkeeping_forms() {
        match parse_ok("bookkeeping(yes);") {
            Input::Bookkeeping(bk) => {
                assert_eq!(bk.intent, BookkeepingIntent::Special("yes".to_string()))
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse_ok("bookkeeping(choice(2));") {
            Input::Bookkeeping(bk) => assert_eq!(bk.intent, BookkeepingIntent::Choice(2)),
            other => panic!("unexpected {other:?}"),
        }
        match parse_ok("bookkeeping(answer(42));") {
            Input::Bookkeeping(bk) => {
                assert_eq!(bk.intent, BookkeepingIntent::Answer(Value::Number(42.0)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn control_command() {
        match parse_ok("$nevermind;") {
            Input::ControlCommand(cmd) => {
                assert_eq!(cmd.intent, BookkeepingIntent::Special("nevermind".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn class_definition() {
        let input = parse_ok(
            r#"class @com.twitter {
  entity tweet;
  monitorable list query home_timeline(out text: String)
  #_[canonical="home timeline"];
  action post(in req status: String);
}"#,
        );
        match input {
            Input::Library(library) => {
                let class = &library.classes[0];
                assert_eq!(class.kind, "com.twitter");
                assert!(class.queries.contains_key("home_timeline"));
                let query = &class.queries["home_timeline"];
                assert!(query.is_monitorable);
                assert!(query.is_list);
                assert!(class.actions.contains_key("post"));
                assert_eq!(class.entities[0].name, "tweet");
            }
            other => panic!("expected library, got {other:?}"),
        }
    }

    #[test]
    fn dataset_with_example() {
        let input = parse_ok(
            r#"dataset @com.twitter {
  query (p_author : Entity(tt:username)) := @com.twitter.search(), author == p_author
  #_[utterances=["tweets by someone"]];
}"#,
        );
        match input {
            Input::Dataset(dataset) => {
                assert_eq!(dataset.examples.len(), 1);
                let example = &dataset.examples[0];
                assert_eq!(example.utterances, vec!["tweets by someone".to_string()]);
                assert!(example.params.contains_key("p_author"));
            }
            other => panic!("expected dataset, got {other:?}"),
        }
    }

    #[test]
    fn dialogue_state() {
        let input = parse_ok(
            "$dialogue @org.thingpedia.dialogue.transaction.sys_recommend_one; now => @com.xkcd.get_comic(number=42) => notify #[results=[{ title=\"xkcd\" }]] #[confirm=enum(confirmed)];",
        );
        match input {
            Input::DialogueState(state) => {
                assert_eq!(state.policy, "org.thingpedia.dialogue.transaction");
                assert_eq!(state.act, "sys_recommend_one");
                assert_eq!(state.history.len(), 1);
                let item = &state.history[0];
                assert_eq!(item.confirm, crate::ast::Confirm::Confirmed);
                let results = item.results.as_ref().unwrap();
                assert_eq!(results.results.len(), 1);
            }
            other => panic!("expected dialogue state, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_is_fatal_and_located() {
        let err = parse("now => => notify;").unwrap_err();
        match err {
            Error::Parse(parse_err) => {
                assert!(!parse_err.expected.is_empty());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn undefined_values_parse() {
        let stmt = single_statement("now => @com.twitter.post(status=$undefined);");
        match stmt {
            Statement::Command { actions, .. } => match &actions[0] {
                Action::Invocation(inv) => {
                    assert!(inv.in_params[0].value.is_undefined());
                }
                other => panic!("expected invocation, got {other:?}"),
            },
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn compute_filter() {
        let stmt = single_statement(
            "now => @com.gmail.inbox(), count(recipients) >= 5 => notify;",
        );
        match stmt {
            Statement::Command { table: Some(Table::Filter { filter, .. }), .. } => {
                assert!(matches!(filter, crate::ast::BooleanExpression::Compute { .. }));
            }
            other => panic!("expected compute filter, got {other:?}"),
        }
    }

    #[test]
    fn assignment_statement() {
        let stmt = single_statement("let answer = 42;");
        match stmt {
            Statement::Assignment { name, value, .. } => {
                assert_eq!(name, "answer");
                assert_eq!(value, Value::Number(42.0));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn declaration_statement() {
        let stmt = single_statement(
            "let query recent(p_author : Entity(tt:username)) := @com.twitter.search(), author == p_author;",
        );
        match stmt {
            Statement::Declaration(decl) => {
                assert_eq!(decl.name, "recent");
                assert!(matches!(decl.body, crate::ast::DeclarationBody::Table(_)));
            }
            other => panic!("expected declaration, got {other:?}"),
        }
    }
}
