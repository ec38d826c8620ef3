//! NN-syntax serializer.
//!
//! Serialization is two-phase: the grammar walk emits words and literal
//! placeholders, then the [`allocator`](super::allocator) matches the
//! literals against the sentence and assigns entity tokens. Failing to
//! match a literal in consecutive mode is an error; the encoder never
//! invents a placeholder.

use crate::ast::{
    Action, BookkeepingIntent, BooleanExpression, DateEdge, DateValue, EventRef, Input,
    InputParam, Invocation, LocationValue, NotifyKind, PermissionFunction, Selector, Statement,
    Stream, Table, TimeValue, Value,
};
use crate::error::Error;

use super::allocator::{allocate, AllocationMode, DefaultMatcher, PendingLiteral, ValueMatcher};
use super::{entity_type_of, EntityDict};

/// Encoding knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    pub mode: AllocationMode,
    /// Render unfilled slots as `SLOT_k` instead of `undefined`.
    pub use_slots: bool,
}

/// Encode with the default matcher for the chosen mode.
pub fn encode(input: &Input, sentence: &[String]) -> Result<(Vec<String>, EntityDict), Error> {
    encode_with_options(input, sentence, EncodeOptions::default(), None)
}

/// Encode with explicit options and an optional custom matcher.
pub fn encode_with_options(
    input: &Input,
    sentence: &[String],
    options: EncodeOptions,
    matcher: Option<&dyn ValueMatcher>,
) -> Result<(Vec<String>, EntityDict), Error> {
    tracing::debug!(?options.mode, "nn encode");
    let mut serializer = Serializer {
        out: Vec::new(),
        pending: Vec::new(),
        slot_count: 0,
        use_slots: options.use_slots,
    };
    serializer.input(input)?;

    let default_matcher = DefaultMatcher {
        allow_gaps: options.mode == AllocationMode::NonConsecutive,
    };
    let matcher: &dyn ValueMatcher = matcher.unwrap_or(&default_matcher);
    let (tokens, dict) = allocate(&serializer.pending, sentence, options.mode, matcher)?;

    let rendered = serializer
        .out
        .into_iter()
        .map(|seg| match seg {
            Seg::Word(word) => word,
            Seg::Lit(index) => tokens[index].clone(),
        })
        .collect();
    Ok((rendered, dict))
}

enum Seg {
    Word(String),
    Lit(usize),
}

struct Serializer {
    out: Vec<Seg>,
    pending: Vec<PendingLiteral>,
    slot_count: usize,
    use_slots: bool,
}

impl Serializer {
    fn word(&mut self, word: impl Into<String>) {
        self.out.push(Seg::Word(word.into()));
    }

    /// Emit a space-separated run of fixed words.
    fn words(&mut self, words: &str) {
        for word in words.split_whitespace() {
            self.word(word);
        }
    }

    fn literal(&mut self, etype: String, payload: Value, original: Value) {
        self.pending.push(PendingLiteral {
            etype,
            payload,
            original,
        });
        self.out.push(Seg::Lit(self.pending.len() - 1));
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::UnsupportedFeature(format!("{what} has no NN form"))
    }

    fn input(&mut self, input: &Input) -> Result<(), Error> {
        match input {
            Input::Program(program) => {
                for (i, stmt) in program.statements.iter().enumerate() {
                    if i > 0 {
                        self.word(";");
                    }
                    self.statement(stmt)?;
                }
                if !program.classes.is_empty() {
                    return Err(self.unsupported("a program with inline classes"));
                }
                Ok(())
            }
            Input::Permission(rule) => {
                self.filter(&rule.principal)?;
                self.word(":");
                self.permission_function(&rule.query, true)?;
                self.words("=>");
                self.permission_function(&rule.action, false)
            }
            Input::Bookkeeping(bk) => {
                self.word("bookkeeping");
                self.intent(&bk.intent)
            }
            Input::ControlCommand(cmd) => {
                self.word("control");
                self.intent(&cmd.intent)
            }
            Input::DialogueState(state) => {
                self.word("$dialogue");
                self.word(format!("@{}.{}", state.policy, state.act));
                if let Some(params) = &state.act_param {
                    self.word("(");
                    for (i, param) in params.iter().enumerate() {
                        if i > 0 {
                            self.word(",");
                        }
                        self.word(format!("param:{param}"));
                    }
                    self.word(")");
                }
                self.word(";");
                for item in &state.history {
                    self.statement(&item.statement)?;
                    self.word(";");
                }
                Ok(())
            }
            Input::Library(_) | Input::Dataset(_) => {
                Err(self.unsupported("a library or dataset"))
            }
        }
    }

    fn intent(&mut self, intent: &BookkeepingIntent) -> Result<(), Error> {
        match intent {
            BookkeepingIntent::Special(name) => {
                self.word("special");
                self.word(format!("special:{name}"));
                Ok(())
            }
            BookkeepingIntent::Choice(n) => {
                self.word("choice");
                self.word(n.to_string());
                Ok(())
            }
            BookkeepingIntent::Answer(value) => {
                self.word("answer");
                self.value(value)
            }
            BookkeepingIntent::Predicate(filter) => {
                self.word("predicate");
                self.filter(filter)
            }
        }
    }

    fn statement(&mut self, stmt: &Statement) -> Result<(), Error> {
        match stmt {
            Statement::Command { table, actions, .. } => {
                self.words("now =>");
                if let Some(table) = table {
                    self.table(table, TablePos::Top)?;
                    self.words("=>");
                }
                self.actions(actions)
            }
            Statement::Rule { stream, actions, .. } => {
                // A parameterless stream-table join prints in arrow form.
                match stream {
                    Stream::Join { stream: inner, table, in_params } if in_params.is_empty() => {
                        self.stream(inner, StreamPos::Top)?;
                        self.words("=>");
                        self.table(table, TablePos::Top)?;
                    }
                    other => self.stream(other, StreamPos::Top)?,
                }
                self.words("=>");
                self.actions(actions)
            }
            Statement::Assignment { name, value, .. } => {
                self.words("let");
                self.word(format!("param:{name}"));
                self.word("=");
                self.value(value)
            }
            Statement::Declaration(_) | Statement::OnInputChoice(_) => {
                Err(self.unsupported("a declaration statement"))
            }
        }
    }

    fn actions(&mut self, actions: &[Action]) -> Result<(), Error> {
        for (i, action) in actions.iter().enumerate() {
            if i > 0 {
                self.word(",");
            }
            match action {
                Action::Notify { name: NotifyKind::Notify } => self.word("notify"),
                Action::Notify { name: NotifyKind::Return } => self.word("return"),
                Action::Invocation(inv) => self.invocation(inv)?,
            }
        }
        Ok(())
    }

    fn invocation(&mut self, inv: &Invocation) -> Result<(), Error> {
        self.selector(&inv.selector, &inv.channel);
        self.in_params(&inv.in_params)
    }

    fn selector(&mut self, selector: &Selector, channel: &str) {
        self.word(format!("@{}.{channel}", selector.kind));
        if let Some(id) = &selector.id {
            self.word("(");
            self.word("\"");
            for part in id.split_whitespace() {
                self.word(part);
            }
            self.word("\"");
            let name = selector.attributes.iter().find_map(|attr| {
                match (attr.name.as_str(), &attr.value) {
                    ("name", Value::String(name)) => Some(name.clone()),
                    _ => None,
                }
            });
            if let Some(name) = name {
                self.word(":");
                self.word("\"");
                for part in name.split_whitespace() {
                    self.word(part);
                }
                self.word("\"");
            }
            self.word(")");
        } else if selector.all {
            self.words("( * )");
        }
    }

    fn in_params(&mut self, in_params: &[InputParam]) -> Result<(), Error> {
        for param in in_params {
            self.word(format!("param:{}", param.name));
            self.word("=");
            self.value(&param.value)?;
        }
        Ok(())
    }

    fn table(&mut self, table: &Table, pos: TablePos) -> Result<(), Error> {
        let needs_parens = pos == TablePos::Operand
            && matches!(
                table,
                Table::Filter { .. }
                    | Table::Join { .. }
                    | Table::Alias { .. }
                    | Table::Index { .. }
                    | Table::Slice { .. }
            );
        if needs_parens {
            self.word("(");
        }
        match table {
            Table::Invocation(inv) => self.invocation(inv)?,
            Table::Filter { table, filter } => {
                self.table(table, TablePos::Top)?;
                self.word("filter");
                self.filter(filter)?;
            }
            Table::Projection { table, args } => {
                self.word("[");
                for (i, name) in args.iter().enumerate() {
                    if i > 0 {
                        self.word(",");
                    }
                    self.word(format!("param:{name}"));
                }
                self.words("] of");
                self.table(table, TablePos::Operand)?;
            }
            Table::Compute { table, expr, alias } => {
                self.word("compute");
                self.value(expr)?;
                if let Some(alias) = alias {
                    self.word("as");
                    self.word(format!("param:{alias}"));
                }
                self.word("of");
                self.table(table, TablePos::Operand)?;
            }
            Table::Aggregation { table, field, op, alias } => {
                self.word("aggregate");
                self.word(op.surface());
                if field != "*" {
                    self.word(format!("param:{field}"));
                }
                if let Some(alias) = alias {
                    self.word("as");
                    self.word(format!("param:{alias}"));
                }
                self.word("of");
                self.table(table, TablePos::Operand)?;
            }
            Table::Sort { table, field, direction } => {
                self.word("sort");
                self.word(format!("param:{field}"));
                self.word(direction.surface());
                self.word("of");
                self.table(table, TablePos::Operand)?;
            }
            Table::Index { table, indices } => {
                self.table(table, TablePos::Top)?;
                self.word("[");
                for (i, index) in indices.iter().enumerate() {
                    if i > 0 {
                        self.word(",");
                    }
                    self.value(index)?;
                }
                self.word("]");
            }
            Table::Slice { table, base, limit } => {
                self.table(table, TablePos::Top)?;
                self.word("[");
                self.value(base)?;
                self.word(":");
                self.value(limit)?;
                self.word("]");
            }
            Table::Join { lhs, rhs, in_params } => {
                self.table(lhs, TablePos::Top)?;
                self.word("join");
                self.table(rhs, TablePos::Operand)?;
                if !in_params.is_empty() {
                    self.word("on");
                    self.in_params(in_params)?;
                }
            }
            Table::Alias { table, name } => {
                self.table(table, TablePos::Top)?;
                self.word("as");
                self.word(format!("param:{name}"));
            }
            Table::History { kind, channel, index, .. } => {
                self.words("result (");
                self.word(format!("@{kind}.{channel}"));
                if let Some(index) = index {
                    self.word("[");
                    self.value(index)?;
                    self.word("]");
                }
                self.word(")");
            }
        }
        if needs_parens {
            self.word(")");
        }
        Ok(())
    }

    fn stream(&mut self, stream: &Stream, pos: StreamPos) -> Result<(), Error> {
        let needs_parens = pos == StreamPos::Primary
            && matches!(
                stream,
                Stream::Filter { .. } | Stream::Join { .. } | Stream::Alias { .. }
            );
        if needs_parens {
            self.word("(");
        }
        match stream {
            Stream::Timer { base, interval, frequency } => {
                self.word("timer");
                self.word("param:base");
                self.word("=");
                self.value(base)?;
                self.word("param:interval");
                self.word("=");
                self.value(interval)?;
                if let Some(frequency) = frequency {
                    self.word("param:frequency");
                    self.word("=");
                    self.value(frequency)?;
                }
            }
            Stream::AtTimer { times, expiration } => {
                self.word("attimer");
                self.word("param:time");
                self.word("=");
                self.word("[");
                for (i, time) in times.iter().enumerate() {
                    if i > 0 {
                        self.word(",");
                    }
                    self.value(time)?;
                }
                self.word("]");
                if let Some(expiration) = expiration {
                    self.word("param:expiration_date");
                    self.word("=");
                    self.value(expiration)?;
                }
            }
            Stream::Monitor { table, args } => {
                self.word("monitor");
                self.table(table, TablePos::Operand)?;
                if let Some(args) = args {
                    self.words("on new");
                    if !args.is_empty() {
                        self.word("[");
                        for (i, name) in args.iter().enumerate() {
                            if i > 0 {
                                self.word(",");
                            }
                            self.word(format!("param:{name}"));
                        }
                        self.word("]");
                    }
                }
            }
            Stream::EdgeFilter { stream, filter } => {
                self.word("edge");
                self.stream(stream, StreamPos::Primary)?;
                self.word("on");
                self.filter(filter)?;
            }
            Stream::EdgeNew(inner) => {
                self.word("edge");
                self.stream(inner, StreamPos::Primary)?;
                self.words("on new");
            }
            Stream::Filter { stream, filter } => {
                self.stream(stream, StreamPos::Top)?;
                self.word("filter");
                self.filter(filter)?;
            }
            Stream::Projection { stream, args } => {
                self.word("[");
                for (i, name) in args.iter().enumerate() {
                    if i > 0 {
                        self.word(",");
                    }
                    self.word(format!("param:{name}"));
                }
                self.words("] of");
                self.stream(stream, StreamPos::Primary)?;
            }
            Stream::Compute { stream, expr, alias } => {
                self.word("compute");
                self.value(expr)?;
                if let Some(alias) = alias {
                    self.word("as");
                    self.word(format!("param:{alias}"));
                }
                self.word("of");
                self.stream(stream, StreamPos::Primary)?;
            }
            Stream::Join { stream, table, in_params } => {
                self.stream(stream, StreamPos::Top)?;
                self.word("join");
                self.table(table, TablePos::Operand)?;
                if !in_params.is_empty() {
                    self.word("on");
                    self.in_params(in_params)?;
                }
            }
            Stream::Alias { stream, name } => {
                self.stream(stream, StreamPos::Top)?;
                self.word("as");
                self.word(format!("param:{name}"));
            }
        }
        if needs_parens {
            self.word(")");
        }
        Ok(())
    }

    fn permission_function(
        &mut self,
        func: &PermissionFunction,
        query_side: bool,
    ) -> Result<(), Error> {
        match func {
            PermissionFunction::Builtin => {
                self.word(if query_side { "now" } else { "notify" });
                Ok(())
            }
            PermissionFunction::Star => {
                self.word("*");
                Ok(())
            }
            PermissionFunction::ClassStar(kind) => {
                self.word(format!("@{kind}.*"));
                Ok(())
            }
            PermissionFunction::Specified { kind, channel, filter, .. } => {
                self.word(format!("@{kind}.{channel}"));
                if !filter.is_true() {
                    self.word("filter");
                    self.filter(filter)?;
                }
                Ok(())
            }
        }
    }

    fn filter(&mut self, filter: &BooleanExpression) -> Result<(), Error> {
        match filter {
            BooleanExpression::True => self.word("true"),
            BooleanExpression::False => self.word("false"),
            BooleanExpression::And(ops) => {
                for (i, op) in ops.iter().enumerate() {
                    if i > 0 {
                        self.word("and");
                    }
                    self.filter_operand(op, true)?;
                }
            }
            BooleanExpression::Or(ops) => {
                for (i, op) in ops.iter().enumerate() {
                    if i > 0 {
                        self.word("or");
                    }
                    self.filter_operand(op, false)?;
                }
            }
            BooleanExpression::Not(inner) => {
                self.word("not");
                self.filter_operand(inner, true)?;
            }
            BooleanExpression::Atom { name, op, value, .. } => {
                self.word(format!("param:{name}"));
                self.word(op.surface());
                self.value(value)?;
            }
            BooleanExpression::Compute { lhs, op, rhs, .. } => {
                self.value(lhs)?;
                self.word(op.surface());
                self.value(rhs)?;
            }
            BooleanExpression::DontCare { name } => {
                self.words("true (");
                self.word(format!("param:{name}"));
                self.word(")");
            }
            BooleanExpression::External { selector, channel, in_params, filter, .. } => {
                self.selector(selector, channel);
                self.in_params(in_params)?;
                self.word("{");
                self.filter(filter)?;
                self.word("}");
            }
        }
        Ok(())
    }

    /// Operand of `and` / `not`: disjunctions need parens.
    fn filter_operand(
        &mut self,
        filter: &BooleanExpression,
        parenthesize_or: bool,
    ) -> Result<(), Error> {
        let needs_parens = match filter {
            BooleanExpression::Or(_) => parenthesize_or,
            BooleanExpression::And(_) => true,
            _ => false,
        };
        if needs_parens {
            self.word("(");
        }
        self.filter(filter)?;
        if needs_parens {
            self.word(")");
        }
        Ok(())
    }

    fn value(&mut self, value: &Value) -> Result<(), Error> {
        match value {
            Value::Undefined { .. } => {
                if self.use_slots {
                    let token = format!("SLOT_{}", self.slot_count);
                    self.slot_count += 1;
                    self.word(token);
                } else {
                    self.word("undefined");
                }
                Ok(())
            }
            Value::Boolean(b) => {
                self.word(if *b { "true" } else { "false" });
                Ok(())
            }
            Value::Number(n) if *n == 0.0 || *n == 1.0 => {
                self.word(format!("{}", *n as i64));
                Ok(())
            }
            Value::Number(_) => {
                self.literal("NUMBER".to_string(), value.clone(), value.clone());
                Ok(())
            }
            Value::Measure { value: magnitude, unit } => {
                self.literal(
                    "NUMBER".to_string(),
                    Value::Number(*magnitude),
                    value.clone(),
                );
                self.word(format!("unit:{unit}"));
                Ok(())
            }
            Value::Date(date) => self.date(date),
            Value::Time(TimeValue::Relative(moment)) => {
                self.word(format!("time:{moment}"));
                Ok(())
            }
            Value::Location(LocationValue::Relative(place)) => {
                self.word(format!("location:{place}"));
                Ok(())
            }
            Value::Enum(variant) => {
                self.word(format!("enum:{variant}"));
                Ok(())
            }
            Value::VarRef(name) => {
                self.word(format!("param:{name}"));
                Ok(())
            }
            Value::Event(EventRef::Content) => {
                self.word("$event");
                Ok(())
            }
            Value::Event(EventRef::Type) => {
                self.word("$event.type");
                Ok(())
            }
            Value::Event(EventRef::ProgramId) => {
                self.word("$event.program_id");
                Ok(())
            }
            Value::ContextRef { name, .. } => {
                self.word(format!("context:{name}"));
                Ok(())
            }
            Value::Array(values) => {
                self.word("[");
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        self.word(",");
                    }
                    self.value(v)?;
                }
                self.word("]");
                Ok(())
            }
            Value::Object(fields) => {
                self.word("{");
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.word(",");
                    }
                    self.word(format!("param:{name}"));
                    self.word("=");
                    self.value(v)?;
                }
                self.word("}");
                Ok(())
            }
            Value::Computation { op, operands } => {
                if matches!(op.as_str(), "+" | "-" | "*" | "/") && operands.len() == 2 {
                    self.word("(");
                    self.value(&operands[0])?;
                    self.word(op.clone());
                    self.value(&operands[1])?;
                    self.word(")");
                } else {
                    self.word(op.clone());
                    self.word("(");
                    for (i, operand) in operands.iter().enumerate() {
                        if i > 0 {
                            self.word(",");
                        }
                        self.value(operand)?;
                    }
                    self.word(")");
                }
                Ok(())
            }
            Value::ArrayField { value, field } => {
                self.word(format!("param:{field}"));
                self.word("of");
                self.value(value)
            }
            Value::Filter { value, filter } => {
                self.value(value)?;
                self.word("filter");
                self.filter(filter)
            }
            // Entity-allocated literal kinds.
            other => match entity_type_of(other) {
                Some(etype) => {
                    self.literal(etype, other.clone(), other.clone());
                    Ok(())
                }
                None => Err(self.unsupported("this value kind")),
            },
        }
    }

    fn date(&mut self, date: &DateValue) -> Result<(), Error> {
        match date {
            DateValue::Now => self.words("new Date ( )"),
            DateValue::Absolute(dt) => {
                use chrono::{Datelike, Timelike};
                self.words("new Date (");
                self.word(dt.year().to_string());
                self.word(",");
                self.word(dt.month().to_string());
                self.word(",");
                self.word(dt.day().to_string());
                if dt.hour() != 0 || dt.minute() != 0 || dt.second() != 0 {
                    self.word(",");
                    self.word(dt.hour().to_string());
                    self.word(",");
                    self.word(dt.minute().to_string());
                    self.word(",");
                    self.word(dt.second().to_string());
                }
                self.word(")");
            }
            DateValue::Edge { edge, unit } => {
                self.word(match edge {
                    DateEdge::StartOf => "start_of",
                    DateEdge::EndOf => "end_of",
                });
                self.word(unit.clone());
            }
            DateValue::Piece { year, month, day, .. } => {
                self.words("new Date (");
                if let Some(y) = year {
                    self.word(y.to_string());
                }
                self.word(",");
                if let Some(m) = month {
                    self.word(m.to_string());
                }
                self.word(",");
                if let Some(d) = day {
                    self.word(d.to_string());
                }
                self.word(")");
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum TablePos {
    Top,
    Operand,
}

#[derive(Clone, Copy, PartialEq)]
enum StreamPos {
    Top,
    Primary,
}
