//! Source-location erasure.
//!
//! Round-trip guarantees (parse/pretty, NN encode/decode) hold up to
//! source locations; [`strip_locations`] rewrites an input with every
//! span cleared so such comparisons can use plain equality.

use super::class_def::{ClassDef, FunctionDef};
use super::expression::BooleanExpression;
use super::program::{
    Declaration, DeclarationBody, Input, PermissionFunction, Statement,
};
use super::stream_table::{Action, InputParam, Invocation, Selector, Stream, Table};

/// A copy of `input` with every source location removed.
pub fn strip_locations(input: &Input) -> Input {
    let mut stripped = input.clone();
    match &mut stripped {
        Input::Program(program) => {
            for class in &mut program.classes {
                strip_class(class);
            }
            for stmt in &mut program.statements {
                strip_statement(stmt);
            }
        }
        Input::Permission(rule) => {
            rule.span = None;
            strip_filter(&mut rule.principal);
            strip_permission_function(&mut rule.query);
            strip_permission_function(&mut rule.action);
        }
        Input::Library(library) => {
            for class in &mut library.classes {
                strip_class(class);
            }
            for dataset in &mut library.datasets {
                dataset.span = None;
                for example in &mut dataset.examples {
                    example.span = None;
                    strip_body(&mut example.body);
                }
            }
        }
        Input::Dataset(dataset) => {
            dataset.span = None;
            for example in &mut dataset.examples {
                example.span = None;
                strip_body(&mut example.body);
            }
        }
        Input::Bookkeeping(bk) => {
            bk.span = None;
            strip_intent(&mut bk.intent);
        }
        Input::ControlCommand(cmd) => {
            cmd.span = None;
            strip_intent(&mut cmd.intent);
        }
        Input::DialogueState(state) => {
            state.span = None;
            for item in &mut state.history {
                strip_statement(&mut item.statement);
            }
        }
    }
    stripped
}

fn strip_intent(intent: &mut super::program::BookkeepingIntent) {
    if let super::program::BookkeepingIntent::Predicate(filter) = intent {
        strip_filter(filter);
    }
}

fn strip_class(class: &mut ClassDef) {
    class.span = None;
    for def in class.queries.values_mut().chain(class.actions.values_mut()) {
        strip_function_def(def);
    }
}

fn strip_function_def(def: &mut FunctionDef) {
    def.span = None;
}

fn strip_statement(stmt: &mut Statement) {
    match stmt {
        Statement::Rule { stream, actions, span } => {
            *span = None;
            strip_stream(stream);
            for action in actions {
                strip_action(action);
            }
        }
        Statement::Command { table, actions, span } => {
            *span = None;
            if let Some(table) = table {
                strip_table(table);
            }
            for action in actions {
                strip_action(action);
            }
        }
        Statement::Assignment { span, .. } => *span = None,
        Statement::Declaration(decl) => strip_declaration(decl),
        Statement::OnInputChoice(choice) => {
            choice.span = None;
            if let Some(table) = &mut choice.table {
                strip_table(table);
            }
            for action in &mut choice.actions {
                strip_action(action);
            }
        }
    }
}

fn strip_declaration(decl: &mut Declaration) {
    decl.span = None;
    strip_body(&mut decl.body);
}

fn strip_body(body: &mut DeclarationBody) {
    match body {
        DeclarationBody::Stream(stream) => strip_stream(stream),
        DeclarationBody::Table(table) => strip_table(table),
        DeclarationBody::Actions(actions) => {
            for action in actions {
                strip_action(action);
            }
        }
    }
}

fn strip_action(action: &mut Action) {
    if let Action::Invocation(inv) = action {
        strip_invocation(inv);
    }
}

fn strip_invocation(inv: &mut Invocation) {
    inv.span = None;
    strip_selector(&mut inv.selector);
    for param in &mut inv.in_params {
        strip_in_param(param);
    }
}

fn strip_selector(selector: &mut Selector) {
    selector.span = None;
    for attr in &mut selector.attributes {
        strip_in_param(attr);
    }
}

fn strip_in_param(param: &mut InputParam) {
    param.span = None;
}

fn strip_permission_function(func: &mut PermissionFunction) {
    if let PermissionFunction::Specified { filter, .. } = func {
        strip_filter(filter);
    }
}

fn strip_table(table: &mut Table) {
    match table {
        Table::Invocation(inv) => strip_invocation(inv),
        Table::Filter { table, filter } => {
            strip_table(table);
            strip_filter(filter);
        }
        Table::Projection { table, .. }
        | Table::Compute { table, .. }
        | Table::Aggregation { table, .. }
        | Table::Sort { table, .. }
        | Table::Alias { table, .. } => strip_table(table),
        Table::Index { table, .. } | Table::Slice { table, .. } => strip_table(table),
        Table::Join { lhs, rhs, in_params } => {
            strip_table(lhs);
            strip_table(rhs);
            for param in in_params {
                strip_in_param(param);
            }
        }
        Table::History { .. } => {}
    }
}

fn strip_stream(stream: &mut Stream) {
    match stream {
        Stream::Timer { .. } | Stream::AtTimer { .. } => {}
        Stream::Monitor { table, .. } => strip_table(table),
        Stream::EdgeFilter { stream, filter } => {
            strip_stream(stream);
            strip_filter(filter);
        }
        Stream::EdgeNew(inner) => strip_stream(inner),
        Stream::Filter { stream, filter } => {
            strip_stream(stream);
            strip_filter(filter);
        }
        Stream::Projection { stream, .. }
        | Stream::Compute { stream, .. }
        | Stream::Alias { stream, .. } => strip_stream(stream),
        Stream::Join { stream, table, in_params } => {
            strip_stream(stream);
            strip_table(table);
            for param in in_params {
                strip_in_param(param);
            }
        }
    }
}

fn strip_filter(filter: &mut BooleanExpression) {
    match filter {
        BooleanExpression::And(ops) | BooleanExpression::Or(ops) => {
            for op in ops {
                strip_filter(op);
            }
        }
        BooleanExpression::Not(inner) => strip_filter(inner),
        BooleanExpression::Atom { span, .. } => *span = None,
        BooleanExpression::Compute { span, .. } => *span = None,
        BooleanExpression::External {
            selector,
            in_params,
            filter,
            span,
            ..
        } => {
            *span = None;
            strip_selector(selector);
            for param in in_params {
                strip_in_param(param);
            }
            strip_filter(filter);
        }
        BooleanExpression::True
        | BooleanExpression::False
        | BooleanExpression::DontCare { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn stripped_inputs_compare_across_parses() {
        let source = "now => @com.xkcd.get_comic(number=42) => notify;";
        let spaced = "now  =>  @com.xkcd.get_comic(number=42)  =>  notify;";
        let a = parser::parse(source).unwrap();
        let b = parser::parse(spaced).unwrap();
        assert_ne!(a, b, "spans differ between the two parses");
        assert_eq!(strip_locations(&a), strip_locations(&b));
    }
}
