//! The prettyprinter: canonical surface syntax from an AST.
//!
//! Deterministic and parser-exact: for any AST `a` this crate can
//! produce, `parse(pretty(a)) == a` up to source locations. Indentation
//! is four spaces; annotations go on the line following their target.

use std::fmt::Write;

use crate::ast::{
    Action, AnnotationMap, BooleanExpression, Bookkeeping, BookkeepingIntent, ClassDef,
    ControlCommand, Dataset, DateEdge, DateValue, Declaration, DeclarationBody,
    DialogueHistoryItem, DialogueState, EventRef, Example, Input, InputParam, Invocation, Library,
    LocationValue, NotifyKind, OnInputChoice, PermissionFunction, PermissionRule, Program,
    Selector, Statement, Stream, Table, TimeValue, Value,
};
use crate::types::Type;

const INDENT: &str = "    ";

/// Render any input as canonical surface syntax.
pub fn pretty(input: &Input) -> String {
    let mut out = String::new();
    match input {
        Input::Program(program) => write_program(&mut out, program),
        Input::Permission(rule) => write_permission(&mut out, rule),
        Input::Library(library) => write_library(&mut out, library),
        Input::Dataset(dataset) => write_dataset(&mut out, dataset),
        Input::Bookkeeping(bk) => write_bookkeeping(&mut out, bk),
        Input::DialogueState(state) => write_dialogue(&mut out, state),
        Input::ControlCommand(cmd) => write_control(&mut out, cmd),
    }
    out
}

fn write_program(out: &mut String, program: &Program) {
    for class in &program.classes {
        write_class(out, class);
    }
    for stmt in &program.statements {
        write_statement(out, stmt);
        out.push('\n');
    }
}

fn write_library(out: &mut String, library: &Library) {
    for class in &library.classes {
        write_class(out, class);
    }
    for dataset in &library.datasets {
        write_dataset(out, dataset);
    }
}

// === Statements ===

fn write_statement(out: &mut String, stmt: &Statement) {
    match stmt {
        Statement::Command { table, actions, .. } => {
            out.push_str("now => ");
            if let Some(table) = table {
                write_table(out, table, TableCtx::Top);
                out.push_str(" => ");
            }
            write_actions(out, actions);
            out.push(';');
        }
        Statement::Rule { stream, actions, .. } => {
            write_rule_head(out, stream);
            out.push_str(" => ");
            write_actions(out, actions);
            out.push(';');
        }
        Statement::Assignment { name, value, .. } => {
            let _ = write!(out, "let {name} = ");
            write_value(out, value);
            out.push(';');
        }
        Statement::Declaration(decl) => write_declaration(out, decl),
        Statement::OnInputChoice(choice) => write_oninput(out, choice),
    }
}

/// A rule head that is a parameterless stream-table join prints in arrow
/// form, matching how the parser folds `stream => table => actions`.
fn write_rule_head(out: &mut String, stream: &Stream) {
    if let Stream::Join { stream: inner, table, in_params } = stream {
        if in_params.is_empty() {
            write_stream(out, inner, StreamCtx::Top);
            out.push_str(" => ");
            write_table(out, table, TableCtx::Top);
            return;
        }
    }
    write_stream(out, stream, StreamCtx::Top);
}

fn write_actions(out: &mut String, actions: &[Action]) {
    for (i, action) in actions.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match action {
            Action::Notify { name: NotifyKind::Notify } => out.push_str("notify"),
            Action::Notify { name: NotifyKind::Return } => out.push_str("return"),
            Action::Invocation(inv) => write_invocation(out, inv),
        }
    }
}

fn write_declaration(out: &mut String, decl: &Declaration) {
    let _ = write!(out, "let {} {}", decl.body.keyword(), decl.name);
    if !decl.params.is_empty() {
        out.push('(');
        for (i, (name, ty)) in decl.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{name} : {}", pretty_type(ty));
        }
        out.push(')');
    }
    out.push_str(" := ");
    write_body(out, &decl.body);
    write_annotations_inline(out, &decl.annotations);
    out.push(';');
}

fn write_body(out: &mut String, body: &DeclarationBody) {
    match body {
        DeclarationBody::Table(table) => write_table(out, table, TableCtx::Top),
        DeclarationBody::Stream(stream) => write_stream(out, stream, StreamCtx::Top),
        DeclarationBody::Actions(actions) => write_actions(out, actions),
    }
}

fn write_oninput(out: &mut String, choice: &OnInputChoice) {
    out.push_str("oninput => ");
    if let Some(table) = &choice.table {
        write_table(out, table, TableCtx::Top);
        out.push_str(" => ");
    }
    write_actions(out, &choice.actions);
    write_annotations_inline(out, &choice.annotations);
    out.push(';');
}

// === Invocations and selectors ===

fn write_invocation(out: &mut String, inv: &Invocation) {
    write_selector_and_channel(out, &inv.selector, &inv.channel);
    write_in_params(out, &inv.in_params);
}

fn write_selector_and_channel(out: &mut String, selector: &Selector, channel: &str) {
    let _ = write!(out, "@{}", selector.kind);
    if selector.id.is_some() || selector.all || !selector.attributes.is_empty() {
        out.push('(');
        let mut first = true;
        if let Some(id) = &selector.id {
            let _ = write!(out, "id={}", quote(id));
            first = false;
        }
        if selector.all {
            if !first {
                out.push_str(", ");
            }
            out.push_str("all=true");
            first = false;
        }
        for attr in &selector.attributes {
            if !first {
                out.push_str(", ");
            }
            let _ = write!(out, "{}=", attr.name);
            write_value(out, &attr.value);
            first = false;
        }
        out.push(')');
    }
    let _ = write!(out, ".{channel}");
}

fn write_in_params(out: &mut String, in_params: &[InputParam]) {
    out.push('(');
    for (i, param) in in_params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}=", param.name);
        write_value(out, &param.value);
    }
    out.push(')');
}

// === Tables ===

#[derive(Clone, Copy, PartialEq)]
enum TableCtx {
    /// Statement position: postfix forms attach freely.
    Top,
    /// `of`-operand, join operand, or monitor operand: the grammar reads
    /// a primary here, so postfix-shaped tables need parens.
    Operand,
}

fn write_table(out: &mut String, table: &Table, ctx: TableCtx) {
    let needs_parens = ctx == TableCtx::Operand
        && matches!(
            table,
            Table::Filter { .. }
                | Table::Join { .. }
                | Table::Alias { .. }
                | Table::Index { .. }
                | Table::Slice { .. }
        );
    if needs_parens {
        out.push('(');
    }
    match table {
        Table::Invocation(inv) => write_invocation(out, inv),
        Table::Filter { table, filter } => {
            write_table(out, table, TableCtx::Top);
            out.push_str(", ");
            write_filter(out, filter, false);
        }
        Table::Projection { table, args } => {
            out.push('[');
            out.push_str(&args.join(", "));
            out.push_str("] of ");
            write_table(out, table, TableCtx::Operand);
        }
        Table::Compute { table, expr, alias } => {
            out.push_str("compute ");
            write_value(out, expr);
            if let Some(alias) = alias {
                let _ = write!(out, " as {alias}");
            }
            out.push_str(" of ");
            write_table(out, table, TableCtx::Operand);
        }
        Table::Aggregation { table, field, op, alias } => {
            let _ = write!(out, "aggregate {op}");
            if field != "*" {
                let _ = write!(out, " {field}");
            }
            if let Some(alias) = alias {
                let _ = write!(out, " as {alias}");
            }
            out.push_str(" of ");
            write_table(out, table, TableCtx::Operand);
        }
        Table::Sort { table, field, direction } => {
            let _ = write!(out, "sort {field} {} of ", direction.surface());
            write_table(out, table, TableCtx::Operand);
        }
        Table::Index { table, indices } => {
            write_table(out, table, TableCtx::Top);
            out.push('[');
            for (i, index) in indices.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, index);
            }
            out.push(']');
        }
        Table::Slice { table, base, limit } => {
            write_table(out, table, TableCtx::Top);
            out.push('[');
            write_value(out, base);
            out.push(':');
            write_value(out, limit);
            out.push(']');
        }
        Table::Join { lhs, rhs, in_params } => {
            // The postfix loop naturally left-associates joins, so the
            // lhs keeps its postfix freedom; the rhs is a primary.
            write_table(out, lhs, TableCtx::Top);
            out.push_str(" join ");
            write_table(out, rhs, TableCtx::Operand);
            if !in_params.is_empty() {
                out.push_str(" on ");
                write_in_params(out, in_params);
            }
        }
        Table::Alias { table, name } => {
            write_table(out, table, TableCtx::Top);
            let _ = write!(out, " as {name}");
        }
        Table::History { kind, channel, index, .. } => {
            let _ = write!(out, "result(@{kind}.{channel}");
            if let Some(index) = index {
                out.push('[');
                write_value(out, index);
                out.push(']');
            }
            out.push(')');
        }
    }
    if needs_parens {
        out.push(')');
    }
}

// === Streams ===

#[derive(Clone, Copy, PartialEq)]
enum StreamCtx {
    Top,
    /// `edge` or `of` operand: must reparse as a stream primary.
    Primary,
}

fn write_stream(out: &mut String, stream: &Stream, ctx: StreamCtx) {
    let needs_parens = ctx == StreamCtx::Primary
        && matches!(stream, Stream::Filter { .. } | Stream::Join { .. } | Stream::Alias { .. });
    if needs_parens {
        out.push('(');
    }
    match stream {
        Stream::Timer { base, interval, frequency } => {
            out.push_str("timer(base=");
            write_value(out, base);
            out.push_str(", interval=");
            write_value(out, interval);
            if let Some(frequency) = frequency {
                out.push_str(", frequency=");
                write_value(out, frequency);
            }
            out.push(')');
        }
        Stream::AtTimer { times, expiration } => {
            out.push_str("attimer(time=[");
            for (i, time) in times.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, time);
            }
            out.push(']');
            if let Some(expiration) = expiration {
                out.push_str(", expiration_date=");
                write_value(out, expiration);
            }
            out.push(')');
        }
        Stream::Monitor { table, args } => {
            out.push_str("monitor ");
            write_table(out, table, TableCtx::Operand);
            if let Some(args) = args {
                out.push_str(" on new");
                if !args.is_empty() {
                    let _ = write!(out, " [{}]", args.join(", "));
                }
            }
        }
        Stream::EdgeFilter { stream, filter } => {
            out.push_str("edge ");
            write_stream(out, stream, StreamCtx::Primary);
            out.push_str(" on ");
            write_filter(out, filter, false);
        }
        Stream::EdgeNew(inner) => {
            out.push_str("edge ");
            write_stream(out, inner, StreamCtx::Primary);
            out.push_str(" on new");
        }
        Stream::Filter { stream, filter } => {
            write_stream(out, stream, StreamCtx::Top);
            out.push_str(", ");
            write_filter(out, filter, false);
        }
        Stream::Projection { stream, args } => {
            out.push('[');
            out.push_str(&args.join(", "));
            out.push_str("] of ");
            write_stream(out, stream, StreamCtx::Primary);
        }
        Stream::Compute { stream, expr, alias } => {
            out.push_str("compute ");
            write_value(out, expr);
            if let Some(alias) = alias {
                let _ = write!(out, " as {alias}");
            }
            out.push_str(" of ");
            write_stream(out, stream, StreamCtx::Primary);
        }
        Stream::Join { stream, table, in_params } => {
            write_stream(out, stream, StreamCtx::Top);
            out.push_str(" join ");
            write_table(out, table, TableCtx::Operand);
            if !in_params.is_empty() {
                out.push_str(" on ");
                write_in_params(out, in_params);
            }
        }
        Stream::Alias { stream, name } => {
            write_stream(out, stream, StreamCtx::Top);
            let _ = write!(out, " as {name}");
        }
    }
    if needs_parens {
        out.push(')');
    }
}

// === Filters ===

fn write_filter(out: &mut String, filter: &BooleanExpression, parenthesize_or: bool) {
    match filter {
        BooleanExpression::True => out.push_str("true"),
        BooleanExpression::False => out.push_str("false"),
        BooleanExpression::Or(ops) => {
            if parenthesize_or {
                out.push('(');
            }
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    out.push_str(" || ");
                }
                write_filter(out, op, false);
            }
            if parenthesize_or {
                out.push(')');
            }
        }
        BooleanExpression::And(ops) => {
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    out.push_str(" && ");
                }
                // `or` binds looser than `and`, so nested disjunctions
                // need parens.
                write_filter(out, op, true);
            }
        }
        BooleanExpression::Not(inner) => {
            out.push('!');
            match inner.as_ref() {
                BooleanExpression::Atom { .. }
                | BooleanExpression::DontCare { .. }
                | BooleanExpression::External { .. } => write_filter(out, inner, true),
                _ => {
                    out.push('(');
                    write_filter(out, inner, false);
                    out.push(')');
                }
            }
        }
        BooleanExpression::Atom { name, op, value, .. } => {
            let _ = write!(out, "{name} {op} ");
            write_value(out, value);
        }
        BooleanExpression::Compute { lhs, op, rhs, .. } => {
            write_value(out, lhs);
            let _ = write!(out, " {op} ");
            write_value(out, rhs);
        }
        BooleanExpression::DontCare { name } => {
            let _ = write!(out, "true({name})");
        }
        BooleanExpression::External { selector, channel, in_params, filter, .. } => {
            write_selector_and_channel(out, selector, channel);
            write_in_params(out, in_params);
            out.push_str(" { ");
            write_filter(out, filter, false);
            out.push_str(" }");
        }
    }
}

// === Values ===

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9e15 {
        format!("{}", n as i64)
    } else {
        format!("{n:?}")
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Boolean(b) => {
            let _ = write!(out, "{b}");
        }
        Value::String(s) => out.push_str(&quote(s)),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::Measure { value, unit } => {
            let _ = write!(out, "{}{unit}", format_number(*value));
        }
        Value::Currency { value, code } => {
            let _ = write!(out, "{}${code}", format_number(*value));
        }
        Value::Date(date) => write_date(out, date),
        Value::Time(time) => write_time(out, time),
        Value::Location(location) => match location {
            LocationValue::Absolute { lat, lon, display } => {
                let _ = write!(out, "new Location({}, {}", format_number(*lat), format_number(*lon));
                if let Some(display) = display {
                    let _ = write!(out, ", {}", quote(display));
                }
                out.push(')');
            }
            LocationValue::Relative(place) => {
                let _ = write!(out, "$location.{place}");
            }
            LocationValue::Unresolved(name) => {
                let _ = write!(out, "new Location({})", quote(name));
            }
        },
        Value::Entity { value, kind, display } => {
            match value {
                Some(value) => out.push_str(&quote(value)),
                None => out.push_str("null"),
            }
            let _ = write!(out, "^^{kind}");
            if let Some(display) = display {
                let _ = write!(out, "({})", quote(display));
            }
        }
        Value::Enum(variant) => {
            let _ = write!(out, "enum({variant})");
        }
        Value::Array(values) => {
            out.push('[');
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, v);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            out.push_str("{ ");
            for (i, (name, v)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}=");
                write_value(out, v);
            }
            out.push_str(" }");
        }
        Value::VarRef(name) => out.push_str(name),
        Value::Event(EventRef::Content) => out.push_str("$event"),
        Value::Event(EventRef::Type) => out.push_str("$event.type"),
        Value::Event(EventRef::ProgramId) => out.push_str("$event.program_id"),
        Value::ContextRef { name, .. } => {
            let _ = write!(out, "$context.{name}");
        }
        Value::Computation { op, operands } => write_computation(out, op, operands),
        Value::ArrayField { value, field } => {
            let _ = write!(out, "{field} of ");
            write_value(out, value);
        }
        Value::Filter { value, .. } => {
            // No surface form; render the underlying array.
            write_value(out, value);
        }
        Value::Undefined { .. } => out.push_str("$undefined"),
    }
}

fn write_computation(out: &mut String, op: &str, operands: &[Value]) {
    if matches!(op, "+" | "-" | "*" | "/") && operands.len() == 2 {
        out.push('(');
        write_value(out, &operands[0]);
        let _ = write!(out, " {op} ");
        write_value(out, &operands[1]);
        out.push(')');
    } else {
        let _ = write!(out, "{op}(");
        for (i, operand) in operands.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_value(out, operand);
        }
        out.push(')');
    }
}

fn write_date(out: &mut String, date: &DateValue) {
    match date {
        DateValue::Now => out.push_str("new Date()"),
        DateValue::Absolute(dt) => {
            let _ = write!(
                out,
                "new Date({})",
                quote(&dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            );
        }
        DateValue::Edge { edge, unit } => {
            let keyword = match edge {
                DateEdge::StartOf => "start_of",
                DateEdge::EndOf => "end_of",
            };
            let _ = write!(out, "{keyword}({unit})");
        }
        DateValue::Piece { year, month, day, .. } => {
            out.push_str("new Date(");
            match year {
                Some(y) => {
                    let _ = write!(out, "{y}");
                }
                None => out.push_str(""),
            }
            out.push_str(", ");
            if let Some(m) = month {
                let _ = write!(out, "{m}");
            }
            out.push_str(", ");
            if let Some(d) = day {
                let _ = write!(out, "{d}");
            }
            out.push(')');
        }
    }
}

fn write_time(out: &mut String, time: &TimeValue) {
    match time {
        TimeValue::Absolute { hour, minute, second } => {
            if *second != 0 {
                let _ = write!(out, "new Time({hour}, {minute}, {second})");
            } else {
                let _ = write!(out, "new Time({hour}, {minute})");
            }
        }
        TimeValue::Relative(moment) => {
            let _ = write!(out, "$time.{moment}");
        }
    }
}

// === Annotations ===

fn write_annotations_inline(out: &mut String, annotations: &AnnotationMap) {
    for (name, value) in &annotations.nl {
        let _ = write!(out, " #_[{name}=");
        write_value(out, value);
        out.push(']');
    }
    for (name, value) in &annotations.impl_ {
        let _ = write!(out, " #[{name}=");
        write_value(out, value);
        out.push(']');
    }
}

fn write_annotations_block(out: &mut String, annotations: &AnnotationMap, indent: &str) {
    for (name, value) in &annotations.nl {
        let _ = write!(out, "\n{indent}#_[{name}=");
        write_value(out, value);
        out.push(']');
    }
    for (name, value) in &annotations.impl_ {
        let _ = write!(out, "\n{indent}#[{name}=");
        write_value(out, value);
        out.push(']');
    }
}

// === Classes and datasets ===

fn write_class(out: &mut String, class: &ClassDef) {
    let _ = write!(out, "class @{}", class.kind);
    if !class.extends.is_empty() {
        out.push_str(" extends ");
        for (i, parent) in class.extends.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "@{parent}");
        }
    }
    write_annotations_block(out, &class.annotations, "");
    out.push_str(" {\n");

    for import in &class.imports {
        let _ = write!(out, "{INDENT}import {} from @{}", import.facets.join(", "), import.module);
        write_in_params(out, &import.in_params);
        out.push_str(";\n");
    }
    for entity in &class.entities {
        let _ = write!(out, "{INDENT}entity {}", entity.name);
        write_annotations_inline(out, &entity.annotations);
        out.push_str(";\n");
    }
    for def in class.queries.values().chain(class.actions.values()) {
        out.push_str(INDENT);
        if def.is_monitorable {
            out.push_str("monitorable ");
        }
        if def.is_list {
            out.push_str("list ");
        }
        let _ = write!(out, "{} {}(", def.kind.surface(), def.name);
        for (i, arg) in def.args.values().enumerate() {
            if i > 0 {
                out.push_str(",\n");
                out.push_str(INDENT);
                out.push_str("      ");
            }
            let _ = write!(out, "{} {} : {}", arg.direction.surface(), arg.name, pretty_type(&arg.ty));
            write_annotations_inline(out, &arg.annotations);
        }
        out.push(')');
        write_annotations_block(out, &def.annotations, INDENT);
        out.push_str(";\n");
    }
    out.push_str("}\n");
}

fn write_dataset(out: &mut String, dataset: &Dataset) {
    let _ = write!(out, "dataset @{}", dataset.name);
    if let Some(language) = &dataset.language {
        let _ = write!(out, " language {}", quote(language));
    }
    out.push_str(" {\n");
    for example in &dataset.examples {
        write_example(out, example);
    }
    out.push_str("}\n");
}

fn write_example(out: &mut String, example: &Example) {
    out.push_str(INDENT);
    out.push_str(example.body.keyword());
    if !example.params.is_empty() {
        out.push_str(" (");
        for (i, (name, ty)) in example.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{name} : {}", pretty_type(ty));
        }
        out.push(')');
    }
    out.push_str(" := ");
    write_body(out, &example.body);
    write_annotations_block(out, &example.annotations, INDENT);
    out.push_str(";\n");
}

// === Permission rules, bookkeeping, dialogues ===

fn write_permission(out: &mut String, rule: &PermissionRule) {
    write_filter(out, &rule.principal, false);
    out.push_str(" : ");
    write_permission_function(out, &rule.query, true);
    out.push_str(" => ");
    write_permission_function(out, &rule.action, false);
    out.push_str(";\n");
}

fn write_permission_function(out: &mut String, func: &PermissionFunction, query_side: bool) {
    match func {
        PermissionFunction::Builtin => {
            out.push_str(if query_side { "now" } else { "notify" })
        }
        PermissionFunction::Star => out.push('*'),
        PermissionFunction::ClassStar(kind) => {
            let _ = write!(out, "@{kind}.*");
        }
        PermissionFunction::Specified { kind, channel, filter, .. } => {
            let _ = write!(out, "@{kind}.{channel}");
            if !filter.is_true() {
                out.push_str(", ");
                write_filter(out, filter, false);
            }
        }
    }
}

fn write_bookkeeping(out: &mut String, bk: &Bookkeeping) {
    out.push_str("bookkeeping(");
    write_intent(out, &bk.intent);
    out.push_str(");\n");
}

fn write_control(out: &mut String, cmd: &ControlCommand) {
    out.push('$');
    write_intent(out, &cmd.intent);
    out.push_str(";\n");
}

fn write_intent(out: &mut String, intent: &BookkeepingIntent) {
    match intent {
        BookkeepingIntent::Special(name) => out.push_str(name),
        BookkeepingIntent::Choice(n) => {
            let _ = write!(out, "choice({n})");
        }
        BookkeepingIntent::Answer(value) => {
            out.push_str("answer(");
            write_value(out, value);
            out.push(')');
        }
        BookkeepingIntent::Predicate(filter) => {
            out.push_str("predicate(");
            write_filter(out, filter, false);
            out.push(')');
        }
    }
}

fn write_dialogue(out: &mut String, state: &DialogueState) {
    let _ = write!(out, "$dialogue @{}.{}", state.policy, state.act);
    if let Some(params) = &state.act_param {
        let _ = write!(out, "({})", params.join(", "));
    }
    out.push_str(";\n");
    for item in &state.history {
        write_history_item(out, item);
        out.push('\n');
    }
}

fn write_history_item(out: &mut String, item: &DialogueHistoryItem) {
    // Render the statement body without its terminator, then the item
    // annotations, then the terminator.
    let mut body = String::new();
    write_statement(&mut body, &item.statement);
    let body = body.trim_end_matches(';');
    out.push_str(body);

    if let Some(results) = &item.results {
        out.push_str(" #[results=[");
        for (i, row) in results.results.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str("{ ");
            for (j, (name, value)) in row.value.iter().enumerate() {
                if j > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}=");
                write_value(out, value);
            }
            out.push_str(" }");
        }
        out.push_str("]]");
        out.push_str(" #[count=");
        write_value(out, &results.count);
        out.push(']');
        if results.more {
            out.push_str(" #[more=true]");
        }
        if let Some(error) = &results.error {
            out.push_str(" #[error=");
            write_value(out, error);
            out.push(']');
        }
    }
    let _ = write!(out, " #[confirm=enum({})]", item.confirm.surface());
    out.push(';');
}

// === Types ===

/// Surface rendering of a type, parser-compatible (hints are dropped).
pub fn pretty_type(ty: &Type) -> String {
    match ty {
        Type::String(_) => "String".to_string(),
        Type::Measure(base) => format!("Measure({base})"),
        Type::Array(elem) => format!("Array({})", pretty_type(elem)),
        Type::Compound(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(name, field)| format!("{name}: {}", pretty_type(&field.ty)))
                .collect();
            format!("{{ {} }}", rendered.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn roundtrip(source: &str) {
        let first = parser::parse(source)
            .unwrap_or_else(|e| panic!("parse failed for {source:?}: {e}"));
        let printed = pretty(&first);
        let second = parser::parse(&printed)
            .unwrap_or_else(|e| panic!("reparse failed for {printed:?}: {e}"));
        assert_eq!(
            crate::ast::strip_locations(&first),
            crate::ast::strip_locations(&second),
            "pretty output was {printed:?}"
        );
    }

    #[test]
    fn roundtrip_commands() {
        roundtrip("now => @com.xkcd.get_comic(number=42) => notify;");
        roundtrip("now => @com.twitter.post(status=\"hello world\");");
        roundtrip("now => @com.gmail.inbox(), labels == \"a\" || labels == \"b\" => notify;");
        roundtrip("now => sort file_size asc of @com.google.drive.list_drive_files()[1:5] => notify;");
        roundtrip("now => aggregate count of @com.gmail.inbox() => notify;");
        roundtrip("now => [text, author] of @com.twitter.search() => notify;");
    }

    #[test]
    fn roundtrip_streams() {
        roundtrip("monitor @com.twitter.home_timeline() => notify;");
        roundtrip("timer(base=new Date(), interval=1h) => notify;");
        roundtrip("attimer(time=[new Time(9, 0)]) => notify;");
        roundtrip("edge monitor @thermostat.get_temperature() on value >= 70F => notify;");
        roundtrip("[text] of monitor @com.twitter.home_timeline() => notify;");
        roundtrip(
            "monitor @com.twitter.home_timeline() => @com.twitter.post(status=text);",
        );
    }

    #[test]
    fn roundtrip_values() {
        roundtrip("now => @com.twitter.post(status=$undefined);");
        roundtrip("now => @light.set_color(color=enum(red));");
        roundtrip("now => @org.weather.current(location=new Location(37.44, -122.17, \"palo alto\")) => notify;");
        roundtrip("now => @calendar.add(when=new Date(2020, 4, 1));");
        roundtrip("now => @calendar.add(when=new Date(, 4, 1));");
        roundtrip("now => @calendar.add(when=start_of(week));");
        roundtrip("now => @spotify.play(song=\"imagine\"^^com.spotify:song(\"Imagine\"));");
        roundtrip("now => @payments.send(amount=25.5$eur, to=\"bob\"^^tt:username);");
    }

    #[test]
    fn roundtrip_selector_attributes() {
        roundtrip("now => @com.twitter(id=\"twitter-foo\").post(status=\"hi\");");
        roundtrip("now => @light(all=true).set_power(power=enum(on));");
    }

    #[test]
    fn roundtrip_permissions() {
        roundtrip("true : now => @com.twitter.post => *;");
        roundtrip("source == \"bob\"^^tt:contact : @com.twitter.* => notify;");
        roundtrip("true : @com.twitter.search, text =~ \"cats\" => notify;");
    }

    #[test]
    fn roundtrip_bookkeeping_and_control() {
        roundtrip("bookkeeping(yes);");
        roundtrip("bookkeeping(choice(2));");
        roundtrip("bookkeeping(answer(42));");
        roundtrip("$nevermind;");
        roundtrip("$answer(7);");
    }

    #[test]
    fn roundtrip_class_and_dataset() {
        roundtrip(
            r#"class @com.twitter {
  entity tweet;
  monitorable list query home_timeline(out text: String)
  #_[canonical="home timeline"];
  action post(in req status: String);
}"#,
        );
        roundtrip(
            r#"dataset @com.twitter {
  query (p_author : Entity(tt:username)) := @com.twitter.search(), author == p_author
  #_[utterances=["tweets by someone"]];
}"#,
        );
    }

    #[test]
    fn roundtrip_dialogue() {
        roundtrip(
            "$dialogue @org.thingpedia.dialogue.transaction.sys_recommend_one; now => @com.xkcd.get_comic(number=42) => notify #[results=[{ title=\"xkcd\" }]] #[count=1] #[confirm=enum(confirmed)];",
        );
    }

    #[test]
    fn roundtrip_declarations() {
        roundtrip("let answer = 42;");
        roundtrip(
            "let query recent(p_author : Entity(tt:username)) := @com.twitter.search(), author == p_author;",
        );
    }

    #[test]
    fn roundtrip_filters() {
        roundtrip("now => @com.gmail.inbox(), !(labels contains \"spam\") => notify;");
        roundtrip("now => @com.gmail.inbox(), true(labels) => notify;");
        roundtrip(
            "now => @com.gmail.inbox(), labels in_array [\"a\", \"b\"] && sender =~ \"bob\" => notify;",
        );
        roundtrip("now => @com.gmail.inbox(), count(recipients) >= 5 => notify;");
        roundtrip(
            "now => @com.gmail.inbox(), @org.weather.current(location=$location.home) { temperature >= 10C } => notify;",
        );
    }

    #[test]
    fn pretty_is_deterministic() {
        let source = "now => @com.gmail.inbox(), labels == \"a\" || labels == \"b\" => notify;";
        let input = parser::parse(source).unwrap();
        assert_eq!(pretty(&input), pretty(&input));
    }
}
