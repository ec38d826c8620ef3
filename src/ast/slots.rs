//! Primitive and slot iteration.
//!
//! Two traversal protocols over whole inputs:
//!
//! - [`iterate_primitives`] visits every function call site (invocations,
//!   externals, history references) in execution order. Schema resolution
//!   and entity extraction are built on it.
//! - [`iterate_slots`] visits every position that may need slot-filling
//!   (input parameters, filter operands, timer values), together with the
//!   invocation it belongs to and the scope of already-bound variables.
//!
//! Both are lazy, restartable sequences at the API boundary; internally
//! they collect eagerly, which keeps the traversal a single recursive
//! function per family.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::types::Type;

use super::class_def::FunctionDef;
use super::expression::BooleanExpression;
use super::program::{
    BookkeepingIntent, DeclarationBody, Input, PermissionFunction, Statement,
};
use super::stream_table::{Action, InputParam, Invocation, Selector, Stream, Table};
use super::value::Value;

/// Role of a call site in the surrounding AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Query,
    Action,
    /// External query inside a filter.
    Filter,
}

/// Borrowed view of one call site.
#[derive(Debug, Clone, Copy)]
pub struct Primitive<'a> {
    /// `None` for history references, which carry a bare kind string.
    pub selector: Option<&'a Selector>,
    pub kind: &'a str,
    pub channel: &'a str,
    pub in_params: &'a [InputParam],
    pub schema: Option<&'a Arc<FunctionDef>>,
}

/// One fillable position.
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    /// Declared type, when the owning schema is resolved.
    pub ty: Option<Type>,
    pub value: Value,
    /// Qualified name of the owning function, or `None` for outer scope
    /// (timers, assignments, bookkeeping answers).
    pub primitive: Option<String>,
    /// Already-bound output parameters visible at this position.
    pub scope: IndexMap<String, Type>,
}

impl Slot {
    /// Slot status per the state machine: empty iff the value is a
    /// fillable hole.
    pub fn is_empty(&self) -> bool {
        self.value.is_undefined()
    }
}

/// All call sites of `input`, in order.
pub fn iterate_primitives(input: &Input) -> Vec<(PrimitiveKind, Primitive<'_>)> {
    let mut out = Vec::new();
    match input {
        Input::Program(program) => {
            for stmt in &program.statements {
                statement_primitives(stmt, &mut out);
            }
        }
        Input::Permission(rule) => {
            filter_primitives(&rule.principal, &mut out);
            permission_primitives(&rule.query, &mut out);
            permission_primitives(&rule.action, &mut out);
        }
        Input::Dataset(dataset) => {
            for example in &dataset.examples {
                body_primitives(&example.body, &mut out);
            }
        }
        Input::Library(library) => {
            for dataset in &library.datasets {
                for example in &dataset.examples {
                    body_primitives(&example.body, &mut out);
                }
            }
        }
        Input::Bookkeeping(bk) => {
            if let BookkeepingIntent::Predicate(filter) = &bk.intent {
                filter_primitives(filter, &mut out);
            }
        }
        Input::ControlCommand(cmd) => {
            if let BookkeepingIntent::Predicate(filter) = &cmd.intent {
                filter_primitives(filter, &mut out);
            }
        }
        Input::DialogueState(state) => {
            for item in &state.history {
                statement_primitives(&item.statement, &mut out);
            }
        }
    }
    out
}

fn statement_primitives<'a>(
    stmt: &'a Statement,
    out: &mut Vec<(PrimitiveKind, Primitive<'a>)>,
) {
    match stmt {
        Statement::Rule { stream, actions, .. } => {
            stream_primitives(stream, out);
            for action in actions {
                action_primitives(action, out);
            }
        }
        Statement::Command { table, actions, .. } => {
            if let Some(table) = table {
                table_primitives(table, out);
            }
            for action in actions {
                action_primitives(action, out);
            }
        }
        Statement::Assignment { .. } => {}
        Statement::Declaration(decl) => body_primitives(&decl.body, out),
        Statement::OnInputChoice(choice) => {
            if let Some(table) = &choice.table {
                table_primitives(table, out);
            }
            for action in &choice.actions {
                action_primitives(action, out);
            }
        }
    }
}

fn body_primitives<'a>(body: &'a DeclarationBody, out: &mut Vec<(PrimitiveKind, Primitive<'a>)>) {
    match body {
        DeclarationBody::Stream(stream) => stream_primitives(stream, out),
        DeclarationBody::Table(table) => table_primitives(table, out),
        DeclarationBody::Actions(actions) => {
            for action in actions {
                action_primitives(action, out);
            }
        }
    }
}

fn invocation_primitive(inv: &Invocation, kind: PrimitiveKind) -> (PrimitiveKind, Primitive<'_>) {
    (
        kind,
        Primitive {
            selector: Some(&inv.selector),
            kind: &inv.selector.kind,
            channel: &inv.channel,
            in_params: &inv.in_params,
            schema: inv.schema.as_ref(),
        },
    )
}

fn table_primitives<'a>(table: &'a Table, out: &mut Vec<(PrimitiveKind, Primitive<'a>)>) {
    match table {
        Table::Invocation(inv) => out.push(invocation_primitive(inv, PrimitiveKind::Query)),
        Table::Filter { table, filter } => {
            table_primitives(table, out);
            filter_primitives(filter, out);
        }
        Table::Projection { table, .. }
        | Table::Compute { table, .. }
        | Table::Aggregation { table, .. }
        | Table::Sort { table, .. }
        | Table::Index { table, .. }
        | Table::Slice { table, .. }
        | Table::Alias { table, .. } => table_primitives(table, out),
        Table::Join { lhs, rhs, .. } => {
            table_primitives(lhs, out);
            table_primitives(rhs, out);
        }
        Table::History {
            kind,
            channel,
            schema,
            ..
        } => out.push((
            PrimitiveKind::Query,
            Primitive {
                selector: None,
                kind,
                channel,
                in_params: &[],
                schema: schema.as_ref(),
            },
        )),
    }
}

fn stream_primitives<'a>(stream: &'a Stream, out: &mut Vec<(PrimitiveKind, Primitive<'a>)>) {
    match stream {
        Stream::Timer { .. } | Stream::AtTimer { .. } => {}
        Stream::Monitor { table, .. } => table_primitives(table, out),
        Stream::EdgeFilter { stream, filter } => {
            stream_primitives(stream, out);
            filter_primitives(filter, out);
        }
        Stream::EdgeNew(stream) => stream_primitives(stream, out),
        Stream::Filter { stream, filter } => {
            stream_primitives(stream, out);
            filter_primitives(filter, out);
        }
        Stream::Projection { stream, .. }
        | Stream::Compute { stream, .. }
        | Stream::Alias { stream, .. } => stream_primitives(stream, out),
        Stream::Join { stream, table, .. } => {
            stream_primitives(stream, out);
            table_primitives(table, out);
        }
    }
}

fn action_primitives<'a>(action: &'a Action, out: &mut Vec<(PrimitiveKind, Primitive<'a>)>) {
    if let Action::Invocation(inv) = action {
        out.push(invocation_primitive(inv, PrimitiveKind::Action));
    }
}

fn filter_primitives<'a>(
    filter: &'a BooleanExpression,
    out: &mut Vec<(PrimitiveKind, Primitive<'a>)>,
) {
    filter.walk(&mut |expr| {
        if let BooleanExpression::External {
            selector,
            channel,
            in_params,
            schema,
            ..
        } = expr
        {
            out.push((
                PrimitiveKind::Filter,
                Primitive {
                    selector: Some(selector),
                    kind: &selector.kind,
                    channel,
                    in_params,
                    schema: schema.as_ref(),
                },
            ));
        }
    });
}

fn permission_primitives<'a>(
    func: &'a PermissionFunction,
    out: &mut Vec<(PrimitiveKind, Primitive<'a>)>,
) {
    if let PermissionFunction::Specified { filter, .. } = func {
        filter_primitives(filter, out);
    }
}

// === Slot iteration ===

struct SlotCollector {
    slots: Vec<Slot>,
    scope: IndexMap<String, Type>,
}

impl SlotCollector {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            scope: IndexMap::new(),
        }
    }

    fn push(&mut self, name: &str, ty: Option<Type>, value: &Value, primitive: Option<&str>) {
        self.slots.push(Slot {
            name: name.to_string(),
            ty,
            value: value.clone(),
            primitive: primitive.map(str::to_string),
            scope: self.scope.clone(),
        });
    }

    fn open_scope_from(&mut self, schema: &Option<Arc<FunctionDef>>) {
        if let Some(schema) = schema {
            for arg in schema.output_args() {
                self.scope.insert(arg.name.clone(), arg.ty.clone());
            }
        }
    }

    fn invocation(&mut self, inv: &Invocation) {
        let qualified = format!("@{}.{}", inv.selector.kind, inv.channel);
        for param in &inv.in_params {
            let ty = inv
                .schema
                .as_ref()
                .and_then(|s| s.arg(&param.name))
                .map(|a| a.ty.clone());
            self.push(&param.name, ty, &param.value, Some(&qualified));
        }
        self.open_scope_from(&inv.schema);
    }

    fn filter(&mut self, filter: &BooleanExpression, schema: Option<&Arc<FunctionDef>>) {
        match filter {
            BooleanExpression::And(ops) | BooleanExpression::Or(ops) => {
                for op in ops {
                    self.filter(op, schema);
                }
            }
            BooleanExpression::Not(inner) => self.filter(inner, schema),
            BooleanExpression::Atom { name, value, .. } => {
                let primitive = schema.map(|s| s.qualified_name());
                let ty = schema.and_then(|s| s.arg(name)).map(|a| a.ty.clone());
                self.push(name, ty, value, primitive.as_deref());
            }
            BooleanExpression::Compute { lhs, rhs, .. } => {
                let primitive = schema.map(|s| s.qualified_name());
                self.push("$lhs", None, lhs, primitive.as_deref());
                self.push("$rhs", None, rhs, primitive.as_deref());
            }
            BooleanExpression::External {
                selector,
                channel,
                in_params,
                filter,
                schema: ext_schema,
                ..
            } => {
                let qualified = format!("@{}.{}", selector.kind, channel);
                for param in in_params {
                    let ty = ext_schema
                        .as_ref()
                        .and_then(|s| s.arg(&param.name))
                        .map(|a| a.ty.clone());
                    self.push(&param.name, ty, &param.value, Some(&qualified));
                }
                self.filter(filter, ext_schema.as_ref());
            }
            BooleanExpression::True
            | BooleanExpression::False
            | BooleanExpression::DontCare { .. } => {}
        }
    }

    fn table(&mut self, table: &Table) {
        match table {
            Table::Invocation(inv) => self.invocation(inv),
            Table::Filter { table, filter } => {
                self.table(table);
                let schema = table.primitive().and_then(|inv| inv.schema.clone());
                self.filter(filter, schema.as_ref());
            }
            Table::Projection { table, .. }
            | Table::Compute { table, .. }
            | Table::Aggregation { table, .. }
            | Table::Sort { table, .. }
            | Table::Alias { table, .. } => self.table(table),
            Table::Index { table, indices } => {
                self.table(table);
                for (i, index) in indices.iter().enumerate() {
                    self.push(&format!("$index.{i}"), Some(Type::Number), index, None);
                }
            }
            Table::Slice { table, base, limit } => {
                self.table(table);
                self.push("$slice.base", Some(Type::Number), base, None);
                self.push("$slice.limit", Some(Type::Number), limit, None);
            }
            Table::Join { lhs, rhs, in_params } => {
                self.table(lhs);
                self.table(rhs);
                let qualified = rhs
                    .primitive()
                    .map(|inv| format!("@{}.{}", inv.selector.kind, inv.channel));
                for param in in_params {
                    self.push(&param.name, None, &param.value, qualified.as_deref());
                }
            }
            Table::History { schema, .. } => self.open_scope_from(schema),
        }
    }

    fn stream(&mut self, stream: &Stream) {
        match stream {
            Stream::Timer {
                base,
                interval,
                frequency,
            } => {
                self.push("$timer.base", Some(Type::Date), base, None);
                self.push(
                    "$timer.interval",
                    Some(Type::Measure("ms".to_string())),
                    interval,
                    None,
                );
                if let Some(freq) = frequency {
                    self.push("$timer.frequency", Some(Type::Number), freq, None);
                }
            }
            Stream::AtTimer { times, expiration } => {
                for (i, time) in times.iter().enumerate() {
                    self.push(&format!("$attimer.time.{i}"), Some(Type::Time), time, None);
                }
                if let Some(expiration) = expiration {
                    self.push(
                        "$attimer.expiration",
                        Some(Type::Measure("ms".to_string())),
                        expiration,
                        None,
                    );
                }
            }
            Stream::Monitor { table, .. } => self.table(table),
            Stream::EdgeFilter { stream, filter } | Stream::Filter { stream, filter } => {
                self.stream(stream);
                let schema = stream_schema(stream);
                self.filter(filter, schema.as_ref());
            }
            Stream::EdgeNew(stream) => self.stream(stream),
            Stream::Projection { stream, .. }
            | Stream::Compute { stream, .. }
            | Stream::Alias { stream, .. } => self.stream(stream),
            Stream::Join { stream, table, in_params } => {
                self.stream(stream);
                self.table(table);
                let qualified = table
                    .primitive()
                    .map(|inv| format!("@{}.{}", inv.selector.kind, inv.channel));
                for param in in_params {
                    self.push(&param.name, None, &param.value, qualified.as_deref());
                }
            }
        }
    }

    fn action(&mut self, action: &Action) {
        if let Action::Invocation(inv) = action {
            self.invocation(inv);
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Rule { stream, actions, .. } => {
                self.stream(stream);
                for action in actions {
                    self.action(action);
                }
            }
            Statement::Command { table, actions, .. } => {
                if let Some(table) = table {
                    self.table(table);
                }
                for action in actions {
                    self.action(action);
                }
            }
            Statement::Assignment { name, value, .. } => {
                self.push(name, None, value, None);
            }
            Statement::Declaration(decl) => {
                for (name, ty) in &decl.params {
                    self.scope.insert(name.clone(), ty.clone());
                }
                match &decl.body {
                    DeclarationBody::Stream(stream) => self.stream(stream),
                    DeclarationBody::Table(table) => self.table(table),
                    DeclarationBody::Actions(actions) => {
                        for action in actions {
                            self.action(action);
                        }
                    }
                }
            }
            Statement::OnInputChoice(choice) => {
                if let Some(table) = &choice.table {
                    self.table(table);
                }
                for action in &choice.actions {
                    self.action(action);
                }
            }
        }
    }
}

fn stream_schema(stream: &Stream) -> Option<Arc<FunctionDef>> {
    match stream {
        Stream::Monitor { table, .. } => {
            table.primitive().and_then(|inv| inv.schema.clone())
        }
        Stream::EdgeFilter { stream, .. }
        | Stream::EdgeNew(stream)
        | Stream::Filter { stream, .. }
        | Stream::Projection { stream, .. }
        | Stream::Compute { stream, .. }
        | Stream::Alias { stream, .. }
        | Stream::Join { stream, .. } => stream_schema(stream),
        Stream::Timer { .. } | Stream::AtTimer { .. } => None,
    }
}

/// All fillable positions of `input`, in order.
pub fn iterate_slots(input: &Input) -> impl Iterator<Item = Slot> {
    let mut collector = SlotCollector::new();
    match input {
        Input::Program(program) => {
            for stmt in &program.statements {
                collector.statement(stmt);
            }
        }
        Input::Permission(rule) => {
            collector
                .scope
                .insert("__pi".to_string(), Type::Entity("tt:contact".to_string()));
            collector.filter(&rule.principal, None);
            for func in [&rule.query, &rule.action] {
                if let PermissionFunction::Specified { filter, schema, .. } = func {
                    collector.filter(filter, schema.as_ref());
                }
            }
        }
        Input::Dataset(dataset) => {
            for example in &dataset.examples {
                for (name, ty) in &example.params {
                    collector.scope.insert(name.clone(), ty.clone());
                }
                match &example.body {
                    DeclarationBody::Stream(stream) => collector.stream(stream),
                    DeclarationBody::Table(table) => collector.table(table),
                    DeclarationBody::Actions(actions) => {
                        for action in actions {
                            collector.action(action);
                        }
                    }
                }
            }
        }
        Input::Library(_) => {}
        Input::Bookkeeping(bk) => slot_bookkeeping(&bk.intent, &mut collector),
        Input::ControlCommand(cmd) => slot_bookkeeping(&cmd.intent, &mut collector),
        Input::DialogueState(state) => {
            for item in &state.history {
                collector.statement(&item.statement);
            }
        }
    }
    collector.slots.into_iter()
}

fn slot_bookkeeping(intent: &BookkeepingIntent, collector: &mut SlotCollector) {
    match intent {
        BookkeepingIntent::Answer(value) => collector.push("$answer", None, value, None),
        BookkeepingIntent::Predicate(filter) => collector.filter(filter, None),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::program::{PermissionRule, Program};
    use crate::types::Operator;

    fn xkcd_command() -> Input {
        let inv = Invocation::new(
            Selector::new("com.xkcd"),
            "get_comic",
            vec![InputParam::new("number", Value::Number(42.0))],
        );
        Input::Program(Program::from_statements(vec![Statement::Command {
            table: Some(Table::Invocation(inv)),
            actions: vec![Action::notify()],
            span: None,
        }]))
    }

    #[test]
    fn primitives_in_order() {
        let input = xkcd_command();
        let prims = iterate_primitives(&input);
        assert_eq!(prims.len(), 1);
        assert_eq!(prims[0].0, PrimitiveKind::Query);
        assert_eq!(prims[0].1.channel, "get_comic");
    }

    #[test]
    fn slots_cover_in_params() {
        let input = xkcd_command();
        let slots: Vec<_> = iterate_slots(&input).collect();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].name, "number");
        assert_eq!(slots[0].primitive.as_deref(), Some("@com.xkcd.get_comic"));
        assert!(!slots[0].is_empty());
    }

    #[test]
    fn undefined_slots_are_reported_once() {
        let inv = Invocation::new(
            Selector::new("com.twitter"),
            "post",
            vec![InputParam::new("status", Value::undefined())],
        );
        let filter = BooleanExpression::atom("author", Operator::Equal, Value::undefined());
        let table = Table::Invocation(Invocation::new(
            Selector::new("com.twitter"),
            "search",
            vec![],
        ))
        .filtered(filter);
        let input = Input::Program(Program::from_statements(vec![Statement::Command {
            table: Some(table),
            actions: vec![Action::Invocation(inv)],
            span: None,
        }]));
        let empty: Vec<_> = iterate_slots(&input).filter(Slot::is_empty).collect();
        assert_eq!(empty.len(), 2);
    }

    #[test]
    fn permission_scope_contains_pi() {
        let rule = PermissionRule {
            principal: BooleanExpression::atom(
                "source",
                Operator::Equal,
                Value::undefined(),
            ),
            query: PermissionFunction::Builtin,
            action: PermissionFunction::Star,
            span: None,
        };
        let slots: Vec<_> = iterate_slots(&Input::Permission(rule)).collect();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].scope.contains_key("__pi"));
    }
}
