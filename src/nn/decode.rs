//! NN-syntax decoder: grammar-directed parsing of token sequences.
//!
//! Decoding is schema-free and synchronous; entity tokens resolve against
//! the entity dictionary supplied with the sentence. Malformed token
//! sequences are fatal (`InvalidNNSyntax`), per the fail-fast policy for
//! structural errors.

use chrono::TimeZone;

use crate::ast::{
    Action, Bookkeeping, BookkeepingIntent, BooleanExpression, Confirm, ControlCommand,
    DateEdge, DateValue, DialogueHistoryItem, DialogueState, EventRef, Input, InputParam,
    Invocation, LocationValue, PermissionFunction, PermissionRule, Program, Selector, Statement,
    Stream, Table, TimeValue, Value,
};
use crate::error::Error;
use crate::types::{AggregationOp, Operator, SortDirection, Type};

use super::{is_entity_token, EntityDict};

/// Decode an NN token sequence into an AST.
pub fn decode(tokens: &[String], entities: &EntityDict) -> Result<Input, Error> {
    tracing::debug!(len = tokens.len(), "nn decode");
    let mut decoder = Decoder {
        tokens,
        pos: 0,
        entities,
    };
    let input = decoder.input()?;
    if decoder.pos != decoder.tokens.len() {
        return Err(decoder.err("end of input"));
    }
    Ok(input)
}

struct Decoder<'a> {
    tokens: &'a [String],
    pos: usize,
    entities: &'a EntityDict,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn peek_nth(&self, n: usize) -> Option<&'a str> {
        self.tokens.get(self.pos + n).map(String::as_str)
    }

    fn advance(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.pos).map(String::as_str);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, word: &str) -> bool {
        if self.peek() == Some(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, word: &str) -> Result<(), Error> {
        if self.eat(word) {
            Ok(())
        } else {
            Err(self.err(word))
        }
    }

    fn err(&self, expected: &str) -> Error {
        Error::InvalidNNSyntax(format!(
            "expected {expected} at position {}, got {:?}",
            self.pos,
            self.peek().unwrap_or("<eof>")
        ))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // === Top level ===

    fn input(&mut self) -> Result<Input, Error> {
        match self.peek() {
            Some("bookkeeping") => {
                self.advance();
                let intent = self.intent()?;
                Ok(Input::Bookkeeping(Bookkeeping { intent, span: None }))
            }
            Some("control") => {
                self.advance();
                let intent = self.intent()?;
                Ok(Input::ControlCommand(ControlCommand { intent, span: None }))
            }
            Some("$dialogue") => self.dialogue(),
            _ if self.has_top_level_colon() => self.permission(),
            _ => self.program(),
        }
    }

    fn has_top_level_colon(&self) -> bool {
        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            match token.as_str() {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                ":" if depth == 0 => return true,
                "=>" | ";" => return false,
                _ => {}
            }
        }
        false
    }

    fn intent(&mut self) -> Result<BookkeepingIntent, Error> {
        match self.advance() {
            Some("special") => match self.advance() {
                Some(word) if word.starts_with("special:") => {
                    Ok(BookkeepingIntent::Special(word["special:".len()..].to_string()))
                }
                _ => Err(self.err("special command token")),
            },
            Some("choice") => {
                let n = match self.advance() {
                    Some(word) => word
                        .parse::<i64>()
                        .map_err(|_| self.err("choice index"))?,
                    None => return Err(self.err("choice index")),
                };
                Ok(BookkeepingIntent::Choice(n))
            }
            Some("answer") => Ok(BookkeepingIntent::Answer(self.value()?)),
            Some("predicate") => Ok(BookkeepingIntent::Predicate(self.filter()?)),
            _ => Err(self.err("bookkeeping intent")),
        }
    }

    fn program(&mut self) -> Result<Input, Error> {
        let mut statements = vec![self.statement()?];
        while self.eat(";") {
            if self.at_end() {
                break;
            }
            statements.push(self.statement()?);
        }
        Ok(Input::Program(Program::from_statements(statements)))
    }

    fn dialogue(&mut self) -> Result<Input, Error> {
        self.expect("$dialogue")?;
        let path = match self.advance() {
            Some(word) if word.starts_with('@') => word[1..].to_string(),
            _ => return Err(self.err("dialogue act")),
        };
        let (policy, act) = match path.rfind('.') {
            Some(dot) => (path[..dot].to_string(), path[dot + 1..].to_string()),
            None => return Err(self.err("qualified dialogue act")),
        };
        let act_param = if self.eat("(") {
            let mut names = Vec::new();
            while !self.eat(")") {
                if !names.is_empty() {
                    self.expect(",")?;
                }
                names.push(self.param_name()?);
            }
            Some(names)
        } else {
            None
        };
        self.expect(";")?;
        let mut history = Vec::new();
        while !self.at_end() {
            let statement = self.statement()?;
            self.expect(";")?;
            history.push(DialogueHistoryItem {
                statement,
                results: None,
                confirm: Confirm::Accepted,
            });
        }
        Ok(Input::DialogueState(DialogueState {
            policy,
            act,
            act_param,
            history,
            span: None,
        }))
    }

    fn permission(&mut self) -> Result<Input, Error> {
        let principal = self.filter()?;
        self.expect(":")?;
        let query = self.permission_function(true)?;
        self.expect("=>")?;
        let action = self.permission_function(false)?;
        // Legacy output wildcard, accepted and dropped.
        if self.eat("=>") {
            if !(self.eat("*") || self.eat("notify")) {
                return Err(self.err("* or notify"));
            }
        }
        Ok(Input::Permission(PermissionRule {
            principal,
            query,
            action,
            span: None,
        }))
    }

    fn permission_function(&mut self, query_side: bool) -> Result<PermissionFunction, Error> {
        match self.peek() {
            Some("now") if query_side => {
                self.advance();
                Ok(PermissionFunction::Builtin)
            }
            Some("notify") if !query_side => {
                self.advance();
                Ok(PermissionFunction::Builtin)
            }
            Some("*") => {
                self.advance();
                Ok(PermissionFunction::Star)
            }
            Some(word) if word.starts_with('@') => {
                let path = word[1..].to_string();
                self.advance();
                if let Some(kind) = path.strip_suffix(".*") {
                    return Ok(PermissionFunction::ClassStar(kind.to_string()));
                }
                let (kind, channel) = split_function(&path).ok_or_else(|| self.err("function"))?;
                let filter = if self.eat("filter") {
                    self.filter()?
                } else {
                    BooleanExpression::True
                };
                Ok(PermissionFunction::Specified {
                    kind,
                    channel,
                    filter,
                    schema: None,
                })
            }
            _ => Err(self.err("permission function")),
        }
    }

    // === Statements ===

    fn statement(&mut self) -> Result<Statement, Error> {
        match self.peek() {
            Some("now") => {
                self.advance();
                self.expect("=>")?;
                let (table, actions) = self.rule_tail()?;
                Ok(Statement::Command {
                    table,
                    actions,
                    span: None,
                })
            }
            Some("let") => {
                self.advance();
                let name = self.param_name()?;
                self.expect("=")?;
                let value = self.value()?;
                Ok(Statement::Assignment {
                    name,
                    value,
                    span: None,
                })
            }
            _ => {
                let stream = self.stream()?;
                self.expect("=>")?;
                let (table, actions) = self.rule_tail()?;
                let stream = match table {
                    Some(table) => Stream::Join {
                        stream: Box::new(stream),
                        table: Box::new(table),
                        in_params: Vec::new(),
                    },
                    None => stream,
                };
                Ok(Statement::Rule {
                    stream,
                    actions,
                    span: None,
                })
            }
        }
    }

    fn rule_tail(&mut self) -> Result<(Option<Table>, Vec<Action>), Error> {
        if let Some(actions) = self.try_actions()? {
            return Ok((None, actions));
        }
        let table = self.table(TablePos::Top)?;
        if self.eat("=>") {
            match self.try_actions()? {
                Some(actions) => Ok((Some(table), actions)),
                None => Err(self.err("actions after the query stage")),
            }
        } else {
            match table {
                Table::Invocation(inv) => Ok((None, vec![Action::Invocation(inv)])),
                _ => Err(self.err("an action or notify")),
            }
        }
    }

    /// Parse actions if the upcoming tokens are unambiguously actions
    /// (`notify` / `return`); invocations are resolved by `rule_tail`.
    fn try_actions(&mut self) -> Result<Option<Vec<Action>>, Error> {
        match self.peek() {
            Some("notify") => {
                self.advance();
                Ok(Some(vec![Action::notify()]))
            }
            Some("return") => {
                self.advance();
                Ok(Some(vec![Action::Notify {
                    name: crate::ast::NotifyKind::Return,
                }]))
            }
            _ => Ok(None),
        }
    }

    fn param_name(&mut self) -> Result<String, Error> {
        match self.advance() {
            Some(word) if word.starts_with("param:") => {
                Ok(word["param:".len()..].to_string())
            }
            _ => Err(self.err("param: token")),
        }
    }

    // === Invocations ===

    fn function_token(&mut self) -> Result<(String, String), Error> {
        match self.advance() {
            Some(word) if word.starts_with('@') => {
                split_function(&word[1..]).ok_or_else(|| self.err("function"))
            }
            _ => Err(self.err("@-function token")),
        }
    }

    fn invocation(&mut self) -> Result<Invocation, Error> {
        let (kind, channel) = self.function_token()?;
        let mut selector = Selector::new(kind);
        // Optional device binding: `( " id " : " name " )` or `( * )`.
        if self.peek() == Some("(")
            && matches!(self.peek_nth(1), Some("\"") | Some("*"))
        {
            self.advance();
            if self.eat("*") {
                selector.all = true;
                self.expect(")")?;
            } else {
                let id = self.quoted_words()?;
                selector.id = Some(id);
                if self.eat(":") {
                    let name = self.quoted_words()?;
                    selector
                        .attributes
                        .push(InputParam::new("name", Value::String(name)));
                }
                self.expect(")")?;
            }
        }
        let in_params = self.in_params()?;
        Ok(Invocation::new(selector, channel, in_params))
    }

    fn quoted_words(&mut self) -> Result<String, Error> {
        self.expect("\"")?;
        let mut words = Vec::new();
        while let Some(word) = self.peek() {
            if word == "\"" {
                break;
            }
            words.push(word.to_string());
            self.advance();
        }
        self.expect("\"")?;
        Ok(words.join(" "))
    }

    fn in_params(&mut self) -> Result<Vec<InputParam>, Error> {
        let mut params = Vec::new();
        while let Some(word) = self.peek() {
            if !word.starts_with("param:") || self.peek_nth(1) != Some("=") {
                break;
            }
            let name = self.param_name()?;
            self.expect("=")?;
            let value = self.value()?;
            params.push(InputParam::new(name, value));
        }
        Ok(params)
    }

    // === Tables ===

    fn table(&mut self, pos: TablePos) -> Result<Table, Error> {
        let mut table = self.table_primary()?;
        if pos == TablePos::Operand {
            return Ok(table);
        }
        loop {
            match self.peek() {
                Some("filter") => {
                    self.advance();
                    let filter = self.filter()?;
                    table = Table::Filter {
                        table: Box::new(table),
                        filter,
                    };
                }
                Some("join") => {
                    self.advance();
                    let rhs = self.table(TablePos::Operand)?;
                    let in_params = if self.eat("on") {
                        self.in_params()?
                    } else {
                        Vec::new()
                    };
                    table = Table::Join {
                        lhs: Box::new(table),
                        rhs: Box::new(rhs),
                        in_params,
                    };
                }
                Some("[") => {
                    self.advance();
                    table = self.index_or_slice(table)?;
                }
                Some("as") => {
                    self.advance();
                    let name = self.param_name()?;
                    table = Table::Alias {
                        table: Box::new(table),
                        name,
                    };
                }
                _ => break,
            }
        }
        Ok(table)
    }

    fn index_or_slice(&mut self, table: Table) -> Result<Table, Error> {
        let first = self.value()?;
        if self.eat(":") {
            let limit = self.value()?;
            self.expect("]")?;
            return Ok(Table::Slice {
                table: Box::new(table),
                base: first,
                limit,
            });
        }
        let mut indices = vec![first];
        while self.eat(",") {
            indices.push(self.value()?);
        }
        self.expect("]")?;
        Ok(Table::Index {
            table: Box::new(table),
            indices,
        })
    }

    fn table_primary(&mut self) -> Result<Table, Error> {
        match self.peek() {
            Some("(") => {
                self.advance();
                let table = self.table(TablePos::Top)?;
                self.expect(")")?;
                Ok(table)
            }
            Some("[") => {
                self.advance();
                let mut args = vec![self.param_name()?];
                while self.eat(",") {
                    args.push(self.param_name()?);
                }
                self.expect("]")?;
                self.expect("of")?;
                let table = self.table(TablePos::Operand)?;
                Ok(Table::Projection {
                    table: Box::new(table),
                    args,
                })
            }
            Some("compute") => {
                self.advance();
                let expr = self.value()?;
                let alias = if self.eat("as") {
                    Some(self.param_name()?)
                } else {
                    None
                };
                self.expect("of")?;
                let table = self.table(TablePos::Operand)?;
                Ok(Table::Compute {
                    table: Box::new(table),
                    expr,
                    alias,
                })
            }
            Some("aggregate") => {
                self.advance();
                let op = match self.advance() {
                    Some(word) => AggregationOp::from_surface(word)
                        .ok_or_else(|| self.err("aggregation operator"))?,
                    None => return Err(self.err("aggregation operator")),
                };
                let field = if self.peek().is_some_and(|w| w.starts_with("param:")) {
                    self.param_name()?
                } else {
                    "*".to_string()
                };
                let alias = if self.eat("as") {
                    Some(self.param_name()?)
                } else {
                    None
                };
                self.expect("of")?;
                let table = self.table(TablePos::Operand)?;
                Ok(Table::Aggregation {
                    table: Box::new(table),
                    field,
                    op,
                    alias,
                })
            }
            Some("sort") => {
                self.advance();
                let field = self.param_name()?;
                let direction = match self.advance() {
                    Some("asc") => SortDirection::Asc,
                    Some("desc") => SortDirection::Desc,
                    _ => return Err(self.err("asc or desc")),
                };
                self.expect("of")?;
                let table = self.table(TablePos::Operand)?;
                Ok(Table::Sort {
                    table: Box::new(table),
                    field,
                    direction,
                })
            }
            Some("result") => {
                self.advance();
                self.expect("(")?;
                let (kind, channel) = self.function_token()?;
                let index = if self.eat("[") {
                    let index = self.value()?;
                    self.expect("]")?;
                    Some(index)
                } else {
                    None
                };
                self.expect(")")?;
                Ok(Table::History {
                    kind,
                    channel,
                    index,
                    schema: None,
                })
            }
            Some(word) if word.starts_with('@') => Ok(Table::Invocation(self.invocation()?)),
            _ => Err(self.err("table expression")),
        }
    }

    // === Streams ===

    fn stream(&mut self) -> Result<Stream, Error> {
        let mut stream = self.stream_primary()?;
        loop {
            match self.peek() {
                Some("filter") => {
                    self.advance();
                    let filter = self.filter()?;
                    stream = Stream::Filter {
                        stream: Box::new(stream),
                        filter,
                    };
                }
                Some("join") => {
                    self.advance();
                    let table = self.table(TablePos::Operand)?;
                    let in_params = if self.eat("on") {
                        self.in_params()?
                    } else {
                        Vec::new()
                    };
                    stream = Stream::Join {
                        stream: Box::new(stream),
                        table: Box::new(table),
                        in_params,
                    };
                }
                Some("as") => {
                    self.advance();
                    let name = self.param_name()?;
                    stream = Stream::Alias {
                        stream: Box::new(stream),
                        name,
                    };
                }
                _ => break,
            }
        }
        Ok(stream)
    }

    fn stream_primary(&mut self) -> Result<Stream, Error> {
        match self.peek() {
            Some("timer") => {
                self.advance();
                let params = self.in_params()?;
                let mut base = Value::Date(DateValue::Now);
                let mut interval = None;
                let mut frequency = None;
                for param in params {
                    match param.name.as_str() {
                        "base" => base = param.value,
                        "interval" => interval = Some(param.value),
                        "frequency" => frequency = Some(param.value),
                        _ => return Err(self.err("timer parameter")),
                    }
                }
                Ok(Stream::Timer {
                    base,
                    interval: interval.ok_or_else(|| self.err("timer interval"))?,
                    frequency,
                })
            }
            Some("attimer") => {
                self.advance();
                let params = self.in_params()?;
                let mut times = Vec::new();
                let mut expiration = None;
                for param in params {
                    match (param.name.as_str(), param.value) {
                        ("time", Value::Array(values)) => times = values,
                        ("time", single) => times = vec![single],
                        ("expiration_date", value) => expiration = Some(value),
                        _ => return Err(self.err("attimer parameter")),
                    }
                }
                if times.is_empty() {
                    return Err(self.err("attimer time"));
                }
                Ok(Stream::AtTimer { times, expiration })
            }
            Some("monitor") => {
                self.advance();
                let table = self.table(TablePos::Operand)?;
                let args = if self.peek() == Some("on") && self.peek_nth(1) == Some("new") {
                    self.advance();
                    self.advance();
                    if self.eat("[") {
                        let mut names = vec![self.param_name()?];
                        while self.eat(",") {
                            names.push(self.param_name()?);
                        }
                        self.expect("]")?;
                        Some(names)
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
            Some("edge") => {
                self.advance();
                let inner = self.stream_operand()?;
                self.expect("on")?;
                if self.eat("new") {
                    Ok(Stream::EdgeNew(Box::new(inner)))
                } else {
                    let filter = self.filter()?;
                    Ok(Stream::EdgeFilter {
                        stream: Box::new(inner),
                        filter,
                    })
                }
            }
            Some("[") => {
                self.advance();
                let mut args = vec![self.param_name()?];
                while self.eat(",") {
                    args.push(self.param_name()?);
                }
                self.expect("]")?;
                self.expect("of")?;
                let inner = self.stream_operand()?;
                Ok(Stream::Projection {
                    stream: Box::new(inner),
                    args,
                })
            }
            Some("compute") => {
                self.advance();
                let expr = self.value()?;
                let alias = if self.eat("as") {
                    Some(self.param_name()?)
                } else {
                    None
                };
                self.expect("of")?;
                let inner = self.stream_operand()?;
                Ok(Stream::Compute {
                    stream: Box::new(inner),
                    expr,
                    alias,
                })
            }
            Some("(") => {
                self.advance();
                let inner = self.stream()?;
                self.expect(")")?;
                Ok(inner)
            }
            _ => Err(self.err("stream expression")),
        }
    }

    fn stream_operand(&mut self) -> Result<Stream, Error> {
        self.stream_primary()
    }

    // === Filters ===

    fn filter(&mut self) -> Result<BooleanExpression, Error> {
        let mut operands = vec![self.filter_and()?];
        while self.eat("or") {
            operands.push(self.filter_and()?);
        }
        Ok(BooleanExpression::or(operands))
    }

    fn filter_and(&mut self) -> Result<BooleanExpression, Error> {
        let mut operands = vec![self.filter_unary()?];
        while self.eat("and") {
            operands.push(self.filter_unary()?);
        }
        Ok(BooleanExpression::and(operands))
    }

    fn filter_unary(&mut self) -> Result<BooleanExpression, Error> {
        match self.peek() {
            Some("not") => {
                self.advance();
                Ok(BooleanExpression::not(self.filter_unary()?))
            }
            Some("(") => {
                self.advance();
                let inner = self.filter()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some("true") => {
                self.advance();
                if self.eat("(") {
                    let name = self.param_name()?;
                    self.expect(")")?;
                    Ok(BooleanExpression::DontCare { name })
                } else {
                    Ok(BooleanExpression::True)
                }
            }
            Some("false") => {
                self.advance();
                Ok(BooleanExpression::False)
            }
            Some(word) if word.starts_with('@') => {
                let (kind, channel) = self.function_token()?;
                let in_params = self.in_params()?;
                self.expect("{")?;
                let filter = self.filter()?;
                self.expect("}")?;
                Ok(BooleanExpression::External {
                    selector: Selector::new(kind),
                    channel,
                    in_params,
                    filter: Box::new(filter),
                    schema: None,
                    span: None,
                })
            }
            _ => self.filter_atom(),
        }
    }

    fn filter_atom(&mut self) -> Result<BooleanExpression, Error> {
        // Plain atom: `param:name <op> value` where the param token is
        // immediately followed by an operator.
        let plain = self.peek().is_some_and(|w| w.starts_with("param:"))
            && self
                .peek_nth(1)
                .and_then(Operator::from_surface)
                .is_some();
        if plain {
            let name = self.param_name()?;
            let op = self.operator()?;
            let value = self.value()?;
            return Ok(BooleanExpression::Atom {
                name,
                op,
                value,
                span: None,
            });
        }
        let lhs = self.value()?;
        let op = self.operator()?;
        let rhs = self.value()?;
        if let Value::VarRef(name) = &lhs {
            return Ok(BooleanExpression::Atom {
                name: name.clone(),
                op,
                value: rhs,
                span: None,
            });
        }
        Ok(BooleanExpression::Compute {
            lhs,
            op,
            rhs,
            span: None,
        })
    }

    fn operator(&mut self) -> Result<Operator, Error> {
        match self.peek().and_then(Operator::from_surface) {
            Some(op) => {
                self.advance();
                Ok(op)
            }
            None => Err(self.err("comparison operator")),
        }
    }

    // === Values ===

    fn value(&mut self) -> Result<Value, Error> {
        let word = match self.peek() {
            Some(word) => word,
            None => return Err(self.err("value")),
        };

        if word.starts_with("SLOT_") {
            let token = word.to_string();
            self.advance();
            return Ok(self
                .entities
                .get(&token)
                .cloned()
                .unwrap_or_else(Value::undefined));
        }
        if is_entity_token(word) {
            let token = word.to_string();
            self.advance();
            let payload = self
                .entities
                .get(&token)
                .cloned()
                .ok_or_else(|| {
                    Error::InvalidNNSyntax(format!("entity token {token} missing from dictionary"))
                })?;
            // `NUMBER_k unit:u` is a measure literal.
            if let Some(unit_word) = self.peek() {
                if let Some(unit) = unit_word.strip_prefix("unit:") {
                    let magnitude = match &payload {
                        Value::Number(n) => *n,
                        other => {
                            return Err(Error::InvalidNNSyntax(format!(
                                "measure magnitude must be a number, got {other:?}"
                            )))
                        }
                    };
                    let unit = unit.to_string();
                    self.advance();
                    return Ok(Value::Measure {
                        value: magnitude,
                        unit,
                    });
                }
            }
            return Ok(payload);
        }

        if let Some(variant) = word.strip_prefix("enum:") {
            let variant = variant.to_string();
            self.advance();
            return Ok(Value::Enum(variant));
        }
        if let Some(moment) = word.strip_prefix("time:") {
            let moment = moment.to_string();
            self.advance();
            return Ok(Value::Time(TimeValue::Relative(moment)));
        }
        if let Some(place) = word.strip_prefix("location:") {
            let place = place.to_string();
            self.advance();
            return Ok(Value::Location(LocationValue::Relative(place)));
        }
        if let Some(name) = word.strip_prefix("context:") {
            let name = name.to_string();
            self.advance();
            let ty = match name.split('.').next().unwrap_or("") {
                "location" => Type::Location,
                "time" => Type::Time,
                _ => Type::Any,
            };
            return Ok(Value::ContextRef { name, ty });
        }
        if word.starts_with("param:") {
            let name = self.param_name()?;
            if self.eat("of") {
                let value = self.value()?;
                return Ok(Value::ArrayField {
                    value: Box::new(value),
                    field: name,
                });
            }
            return Ok(Value::VarRef(name));
        }

        match word {
            "undefined" => {
                self.advance();
                Ok(Value::undefined())
            }
            "true" => {
                self.advance();
                Ok(Value::Boolean(true))
            }
            "false" => {
                self.advance();
                Ok(Value::Boolean(false))
            }
            "$event" => {
                self.advance();
                Ok(Value::Event(EventRef::Content))
            }
            "$event.type" => {
                self.advance();
                Ok(Value::Event(EventRef::Type))
            }
            "$event.program_id" => {
                self.advance();
                Ok(Value::Event(EventRef::ProgramId))
            }
            "start_of" | "end_of" => {
                let edge = if word == "start_of" {
                    DateEdge::StartOf
                } else {
                    DateEdge::EndOf
                };
                self.advance();
                let unit = self
                    .advance()
                    .ok_or_else(|| self.err("date edge unit"))?
                    .to_string();
                Ok(Value::Date(DateValue::Edge { edge, unit }))
            }
            "new" => self.date(),
            "[" => {
                self.advance();
                let mut values = Vec::new();
                while self.peek() != Some("]") {
                    if !values.is_empty() {
                        self.expect(",")?;
                    }
                    values.push(self.value()?);
                }
                self.expect("]")?;
                Ok(Value::Array(values))
            }
            "{" => {
                self.advance();
                let mut fields = indexmap::IndexMap::new();
                while self.peek() != Some("}") {
                    if !fields.is_empty() {
                        self.expect(",")?;
                    }
                    let name = self.param_name()?;
                    self.expect("=")?;
                    fields.insert(name, self.value()?);
                }
                self.expect("}")?;
                Ok(Value::Object(fields))
            }
            "(" => {
                // Arithmetic computation: `( lhs <op> rhs )`.
                self.advance();
                let lhs = self.value()?;
                let op = match self.advance() {
                    Some(op @ ("+" | "-" | "*" | "/")) => op.to_string(),
                    _ => return Err(self.err("arithmetic operator")),
                };
                let rhs = self.value()?;
                self.expect(")")?;
                Ok(Value::Computation {
                    op,
                    operands: vec![lhs, rhs],
                })
            }
            _ => {
                if let Ok(n) = word.parse::<f64>() {
                    self.advance();
                    return Ok(Value::Number(n));
                }
                // Scalar call: `count ( ... )`.
                if self.peek_nth(1) == Some("(")
                    && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    let op = word.to_string();
                    self.advance();
                    self.advance();
                    let mut operands = Vec::new();
                    while self.peek() != Some(")") {
                        if !operands.is_empty() {
                            self.expect(",")?;
                        }
                        operands.push(self.value()?);
                    }
                    self.expect(")")?;
                    return Ok(Value::Computation { op, operands });
                }
                Err(self.err("value"))
            }
        }
    }

    /// `new Date ( ... )` structural dates.
    fn date(&mut self) -> Result<Value, Error> {
        self.expect("new")?;
        self.expect("Date")?;
        self.expect("(")?;
        if self.eat(")") {
            return Ok(Value::Date(DateValue::Now));
        }
        let mut slots: Vec<Option<i64>> = Vec::new();
        loop {
            if self.peek() == Some(",") || self.peek() == Some(")") {
                slots.push(None);
            } else {
                let word = self.advance().ok_or_else(|| self.err("date component"))?;
                let n = word
                    .parse::<i64>()
                    .map_err(|_| Error::InvalidNNSyntax(format!("bad date component {word:?}")))?;
                slots.push(Some(n));
            }
            if !self.eat(",") {
                break;
            }
            if self.peek() == Some(")") {
                break;
            }
        }
        self.expect(")")?;

        if slots.len() >= 3 {
            if let (Some(y), Some(m), Some(d)) = (slots[0], slots[1], slots[2]) {
                let (hour, minute, second) = match slots.get(3..6) {
                    Some([Some(h), Some(mi), Some(s)]) => (*h as u32, *mi as u32, *s as u32),
                    _ => (0, 0, 0),
                };
                let date = chrono::NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                    .and_then(|date| date.and_hms_opt(hour, minute, second))
                    .ok_or_else(|| {
                        Error::InvalidNNSyntax("invalid calendar date".to_string())
                    })?;
                return Ok(Value::Date(DateValue::Absolute(
                    chrono::Utc.from_utc_datetime(&date),
                )));
            }
        }
        slots.resize(3, None);
        Ok(Value::Date(DateValue::Piece {
            year: slots[0].map(|y| y as i32),
            month: slots[1].map(|m| m as u32),
            day: slots[2].map(|d| d as u32),
            time: None,
        }))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum TablePos {
    Top,
    Operand,
}

fn split_function(path: &str) -> Option<(String, String)> {
    let dot = path.rfind('.')?;
    Some((path[..dot].to_string(), path[dot + 1..].to_string()))
}
