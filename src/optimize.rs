//! The normalizer: canonicalisation of typechecked ASTs.
//!
//! Pure AST -> AST, run after typechecking only (it refuses inputs whose
//! invocations carry no schema). Every pass is idempotent and the composed
//! pipeline is too: `normalize(normalize(p)) == normalize(p)`.
//!
//! Passes, applied bottom-up at each node:
//!
//! - filter canonicalisation: CNF with `and` outermost, stable atom order
//!   inside each conjunct, duplicate atoms and clauses removed, `or` of
//!   `==` on one parameter fused into `in_array`
//! - merge of adjacent filters and adjacent projections; projections equal
//!   to the full output set dropped
//! - filter pushdown across join scope boundaries
//! - removal of compute columns that merely re-alias an existing output
//! - minimal-projection widening (`[id]` by default when `id` exists)
//! - selector attribute sort, with `id` / `all` hoisted to their fields

use std::collections::BTreeSet;

use crate::ast::{
    Action, BookkeepingIntent, BooleanExpression, DeclarationBody, Input, Selector, Statement,
    Stream, Table, Value,
};
use crate::error::{Error, TypeError, TypeErrorKind};
use crate::types::Operator;

/// Normalize a typechecked input.
pub fn normalize(input: &Input) -> Result<Input, Error> {
    for (_, primitive) in crate::ast::iterate_primitives(input) {
        if primitive.schema.is_none() {
            return Err(Error::Type(vec![TypeError::new(
                TypeErrorKind::UnresolvedSchema,
                None,
                format!(
                    "cannot normalize: @{}.{} has no resolved schema (typecheck first)",
                    primitive.kind, primitive.channel
                ),
            )]));
        }
    }
    tracing::debug!("normalize start");
    Ok(normalize_input(input.clone()))
}

fn normalize_input(input: Input) -> Input {
    match input {
        Input::Program(mut program) => {
            program.statements = program
                .statements
                .into_iter()
                .map(normalize_statement)
                .collect();
            Input::Program(program)
        }
        Input::Permission(mut rule) => {
            rule.principal = normalize_filter(rule.principal);
            rule.query = normalize_permission_function(rule.query);
            rule.action = normalize_permission_function(rule.action);
            Input::Permission(rule)
        }
        Input::Dataset(mut dataset) => {
            for example in &mut dataset.examples {
                let body = std::mem::replace(
                    &mut example.body,
                    DeclarationBody::Actions(Vec::new()),
                );
                example.body = normalize_body(body);
            }
            Input::Dataset(dataset)
        }
        Input::Bookkeeping(mut bk) => {
            if let BookkeepingIntent::Predicate(filter) = bk.intent {
                bk.intent = BookkeepingIntent::Predicate(normalize_filter(filter));
            }
            Input::Bookkeeping(bk)
        }
        Input::ControlCommand(mut cmd) => {
            if let BookkeepingIntent::Predicate(filter) = cmd.intent {
                cmd.intent = BookkeepingIntent::Predicate(normalize_filter(filter));
            }
            Input::ControlCommand(cmd)
        }
        Input::DialogueState(mut state) => {
            for item in &mut state.history {
                let stmt = std::mem::replace(
                    &mut item.statement,
                    Statement::Command {
                        table: None,
                        actions: Vec::new(),
                        span: None,
                    },
                );
                item.statement = normalize_statement(stmt);
            }
            Input::DialogueState(state)
        }
        other => other,
    }
}

fn normalize_permission_function(
    func: crate::ast::PermissionFunction,
) -> crate::ast::PermissionFunction {
    match func {
        crate::ast::PermissionFunction::Specified {
            kind,
            channel,
            filter,
            schema,
        } => crate::ast::PermissionFunction::Specified {
            kind,
            channel,
            filter: normalize_filter(filter),
            schema,
        },
        other => other,
    }
}

fn normalize_body(body: DeclarationBody) -> DeclarationBody {
    match body {
        DeclarationBody::Table(table) => DeclarationBody::Table(normalize_table(table)),
        DeclarationBody::Stream(stream) => DeclarationBody::Stream(normalize_stream(stream)),
        DeclarationBody::Actions(actions) => {
            DeclarationBody::Actions(actions.into_iter().map(normalize_action).collect())
        }
    }
}

fn normalize_statement(stmt: Statement) -> Statement {
    match stmt {
        Statement::Command { table, actions, span } => Statement::Command {
            table: table.map(normalize_table),
            actions: actions.into_iter().map(normalize_action).collect(),
            span,
        },
        Statement::Rule { stream, actions, span } => Statement::Rule {
            stream: normalize_stream(stream),
            actions: actions.into_iter().map(normalize_action).collect(),
            span,
        },
        Statement::Declaration(mut decl) => {
            let body = std::mem::replace(&mut decl.body, DeclarationBody::Actions(Vec::new()));
            decl.body = normalize_body(body);
            Statement::Declaration(decl)
        }
        Statement::OnInputChoice(mut choice) => {
            choice.table = choice.table.map(normalize_table);
            choice.actions = choice.actions.into_iter().map(normalize_action).collect();
            Statement::OnInputChoice(choice)
        }
        other => other,
    }
}

fn normalize_action(action: Action) -> Action {
    match action {
        Action::Invocation(mut inv) => {
            canonicalize_selector(&mut inv.selector);
            Action::Invocation(inv)
        }
        other => other,
    }
}

/// Sort attributes by name; hoist `id` and `all` into their fields.
fn canonicalize_selector(selector: &mut Selector) {
    let attrs = std::mem::take(&mut selector.attributes);
    for attr in attrs {
        match (attr.name.as_str(), &attr.value) {
            ("id", Value::String(id)) => selector.id = Some(id.clone()),
            ("all", Value::Boolean(all)) => selector.all = *all,
            _ => selector.attributes.push(attr),
        }
    }
    selector.attributes.sort_by(|a, b| a.name.cmp(&b.name));
}

// === Tables ===

fn normalize_table(table: Table) -> Table {
    match table {
        Table::Invocation(mut inv) => {
            canonicalize_selector(&mut inv.selector);
            inv.in_params = inv
                .in_params
                .into_iter()
                .map(|mut p| {
                    p.value = normalize_value(p.value);
                    p
                })
                .collect();
            Table::Invocation(inv)
        }
        Table::Filter { table, filter } => {
            let table = normalize_table(*table);
            let filter = normalize_filter(filter);
            attach_filter(table, filter)
        }
        Table::Projection { table, args } => {
            let table = normalize_table(*table);
            normalize_projection(table, args)
        }
        Table::Compute { table, expr, alias } => {
            let table = normalize_table(*table);
            let expr = normalize_value(expr);
            // A compute that merely re-aliases an existing output column
            // is dead weight.
            if let Value::VarRef(name) = &expr {
                let trivial = match &alias {
                    Some(alias) => alias == name,
                    None => true,
                };
                if trivial
                    && table_output_names(&table)
                        .map(|outs| outs.contains(name))
                        .unwrap_or(false)
                {
                    return table;
                }
            }
            Table::Compute {
                table: Box::new(table),
                expr,
                alias,
            }
        }
        Table::Aggregation { table, field, op, alias } => Table::Aggregation {
            table: Box::new(normalize_table(*table)),
            field,
            op,
            alias,
        },
        Table::Sort { table, field, direction } => Table::Sort {
            table: Box::new(normalize_table(*table)),
            field,
            direction,
        },
        Table::Index { table, indices } => Table::Index {
            table: Box::new(normalize_table(*table)),
            indices: indices.into_iter().map(normalize_value).collect(),
        },
        Table::Slice { table, base, limit } => Table::Slice {
            table: Box::new(normalize_table(*table)),
            base: normalize_value(base),
            limit: normalize_value(limit),
        },
        Table::Join { lhs, rhs, in_params } => Table::Join {
            lhs: Box::new(normalize_table(*lhs)),
            rhs: Box::new(normalize_table(*rhs)),
            in_params,
        },
        Table::Alias { table, name } => Table::Alias {
            table: Box::new(normalize_table(*table)),
            name,
        },
        history @ Table::History { .. } => history,
    }
}

/// Attach a (CNF) filter to a normalized table: merge with an existing
/// filter, drop `True`, and push conjuncts across join boundaries.
fn attach_filter(table: Table, filter: BooleanExpression) -> Table {
    if filter.is_true() {
        return table;
    }
    match table {
        Table::Filter { table: inner, filter: existing } => {
            let merged = normalize_filter(BooleanExpression::and(vec![existing, filter]));
            attach_filter(*inner, merged)
        }
        Table::Join { lhs, rhs, in_params } => {
            let lhs_outs = table_output_names(&lhs);
            let rhs_outs = table_output_names(&rhs);
            let (mut lhs, mut rhs) = (*lhs, *rhs);
            let mut kept = Vec::new();
            if let (Some(lhs_outs), Some(rhs_outs)) = (lhs_outs, rhs_outs) {
                for clause in conjuncts(filter) {
                    let touched: BTreeSet<String> =
                        clause.touched_params().into_iter().collect();
                    if touched.iter().all(|p| lhs_outs.contains(p)) {
                        lhs = attach_filter(lhs, clause);
                    } else if touched.iter().all(|p| rhs_outs.contains(p)) {
                        rhs = attach_filter(rhs, clause);
                    } else {
                        kept.push(clause);
                    }
                }
            } else {
                kept = conjuncts(filter);
            }
            let join = Table::Join {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                in_params,
            };
            if kept.is_empty() {
                join
            } else {
                Table::Filter {
                    table: Box::new(join),
                    filter: BooleanExpression::and(kept),
                }
            }
        }
        other => Table::Filter {
            table: Box::new(other),
            filter,
        },
    }
}

fn conjuncts(filter: BooleanExpression) -> Vec<BooleanExpression> {
    match filter {
        BooleanExpression::And(ops) => ops,
        other => vec![other],
    }
}

fn normalize_projection(table: Table, args: Vec<String>) -> Table {
    // Empty projection means "all output params".
    if args.is_empty() {
        return table;
    }
    // Projection of projection collapses to the intersection.
    if let Table::Projection { table: inner, args: inner_args } = table {
        let merged: Vec<String> = inner_args
            .iter()
            .filter(|name| args.contains(name))
            .cloned()
            .collect();
        return normalize_projection(*inner, merged);
    }

    let mut args = args;
    // Widen with the minimal projection of the underlying function unless
    // a compute alias shadows the parameter.
    if let Some(schema) = base_schema(&table) {
        for required in schema.effective_minimal_projection() {
            if !args.contains(&required) && !compute_aliases(&table).contains(&required) {
                args.push(required);
            }
        }
    }

    // A projection that keeps the whole output set is a no-op.
    if let Some(outputs) = table_output_names(&table) {
        let projected: BTreeSet<&String> = args.iter().collect();
        if outputs.iter().all(|name| projected.contains(name)) {
            return table;
        }
    }
    Table::Projection {
        table: Box::new(table),
        args,
    }
}

fn base_schema(table: &Table) -> Option<std::sync::Arc<crate::ast::FunctionDef>> {
    match table {
        Table::Invocation(inv) => inv.schema.clone(),
        Table::History { schema, .. } => schema.clone(),
        Table::Filter { table, .. }
        | Table::Projection { table, .. }
        | Table::Compute { table, .. }
        | Table::Sort { table, .. }
        | Table::Index { table, .. }
        | Table::Slice { table, .. }
        | Table::Alias { table, .. } => base_schema(table),
        Table::Aggregation { .. } | Table::Join { .. } => None,
    }
}

fn compute_aliases(table: &Table) -> Vec<String> {
    let mut aliases = Vec::new();
    let mut current = table;
    loop {
        match current {
            Table::Compute { table, expr, alias } => {
                aliases.push(alias.clone().unwrap_or_else(|| computed_name(expr)));
                current = table;
            }
            Table::Filter { table, .. }
            | Table::Sort { table, .. }
            | Table::Index { table, .. }
            | Table::Slice { table, .. }
            | Table::Alias { table, .. } => current = table,
            _ => return aliases,
        }
    }
}

fn computed_name(expr: &Value) -> String {
    match expr {
        Value::Computation { op, .. } => op.clone(),
        Value::ArrayField { field, .. } => field.clone(),
        Value::VarRef(name) => name.clone(),
        _ => "computed".to_string(),
    }
}

/// Output parameter names of a typechecked table.
fn table_output_names(table: &Table) -> Option<BTreeSet<String>> {
    match table {
        Table::Invocation(inv) => inv
            .schema
            .as_ref()
            .map(|s| s.output_args().map(|a| a.name.clone()).collect()),
        Table::History { schema, .. } => schema
            .as_ref()
            .map(|s| s.output_args().map(|a| a.name.clone()).collect()),
        Table::Filter { table, .. }
        | Table::Sort { table, .. }
        | Table::Index { table, .. }
        | Table::Slice { table, .. }
        | Table::Alias { table, .. } => table_output_names(table),
        Table::Projection { table, args } => {
            if args.is_empty() {
                table_output_names(table)
            } else {
                Some(args.iter().cloned().collect())
            }
        }
        Table::Compute { table, expr, alias } => {
            let mut outs = table_output_names(table)?;
            outs.insert(alias.clone().unwrap_or_else(|| computed_name(expr)));
            Some(outs)
        }
        Table::Aggregation { field, alias, .. } => {
            let name = alias.clone().unwrap_or_else(|| {
                if field == "*" {
                    "count".to_string()
                } else {
                    field.clone()
                }
            });
            Some([name].into_iter().collect())
        }
        Table::Join { lhs, rhs, .. } => {
            let mut outs = table_output_names(lhs)?;
            outs.extend(table_output_names(rhs)?);
            Some(outs)
        }
    }
}

// === Streams ===

fn normalize_stream(stream: Stream) -> Stream {
    match stream {
        Stream::Timer { base, interval, frequency } => Stream::Timer {
            base: normalize_value(base),
            interval: normalize_value(interval),
            frequency: frequency.map(normalize_value),
        },
        Stream::AtTimer { times, expiration } => Stream::AtTimer {
            times: times.into_iter().map(normalize_value).collect(),
            expiration: expiration.map(normalize_value),
        },
        Stream::Monitor { table, args } => Stream::Monitor {
            table: Box::new(normalize_table(*table)),
            args,
        },
        Stream::EdgeFilter { stream, filter } => Stream::EdgeFilter {
            stream: Box::new(normalize_stream(*stream)),
            filter: normalize_filter(filter),
        },
        Stream::EdgeNew(inner) => Stream::EdgeNew(Box::new(normalize_stream(*inner))),
        Stream::Filter { stream, filter } => {
            let stream = normalize_stream(*stream);
            let filter = normalize_filter(filter);
            if filter.is_true() {
                return stream;
            }
            if let Stream::Filter { stream: inner, filter: existing } = stream {
                return Stream::Filter {
                    stream: inner,
                    filter: normalize_filter(BooleanExpression::and(vec![existing, filter])),
                };
            }
            Stream::Filter {
                stream: Box::new(stream),
                filter,
            }
        }
        Stream::Projection { stream, args } => {
            let stream = normalize_stream(*stream);
            if args.is_empty() {
                return stream;
            }
            if let Stream::Projection { stream: inner, args: inner_args } = stream {
                let merged: Vec<String> = inner_args
                    .iter()
                    .filter(|name| args.contains(name))
                    .cloned()
                    .collect();
                return Stream::Projection {
                    stream: inner,
                    args: merged,
                };
            }
            Stream::Projection {
                stream: Box::new(stream),
                args,
            }
        }
        Stream::Compute { stream, expr, alias } => Stream::Compute {
            stream: Box::new(normalize_stream(*stream)),
            expr: normalize_value(expr),
            alias,
        },
        Stream::Join { stream, table, in_params } => Stream::Join {
            stream: Box::new(normalize_stream(*stream)),
            table: Box::new(normalize_table(*table)),
            in_params,
        },
        Stream::Alias { stream, name } => Stream::Alias {
            stream: Box::new(normalize_stream(*stream)),
            name,
        },
    }
}

// === Values ===

fn normalize_value(value: Value) -> Value {
    match value {
        Value::Array(values) => {
            Value::Array(values.into_iter().map(normalize_value).collect())
        }
        Value::Computation { op, operands } => Value::Computation {
            op,
            operands: operands.into_iter().map(normalize_value).collect(),
        },
        Value::ArrayField { value, field } => Value::ArrayField {
            value: Box::new(normalize_value(*value)),
            field,
        },
        Value::Filter { value, filter } => Value::Filter {
            value: Box::new(normalize_value(*value)),
            filter: Box::new(normalize_filter(*filter)),
        },
        other => other,
    }
}

// === Filters ===

/// Rewrite a filter into canonical CNF.
pub fn normalize_filter(filter: BooleanExpression) -> BooleanExpression {
    let nnf = push_not(filter, false);
    let mut clauses = cnf_clauses(nnf);

    for clause in &mut clauses {
        dedup_lits(clause);
        fuse_equality_disjuncts(clause);
        clause.sort_by_cached_key(lit_sort_key);
    }

    // Dedup identical clauses. An empty clause (false) survives and makes
    // the whole conjunction collapse below.
    let mut seen = Vec::new();
    clauses.retain(|clause| {
        if seen.contains(clause) {
            false
        } else {
            seen.push(clause.clone());
            true
        }
    });
    clauses.sort_by_cached_key(|clause| {
        clause.iter().map(lit_sort_key).collect::<Vec<_>>()
    });

    BooleanExpression::and(
        clauses
            .into_iter()
            .map(|clause| BooleanExpression::or(clause))
            .collect(),
    )
}

/// Push negation down to the atoms (NNF). Nested external filters are
/// normalized along the way.
fn push_not(filter: BooleanExpression, negated: bool) -> BooleanExpression {
    match filter {
        BooleanExpression::True => {
            if negated {
                BooleanExpression::False
            } else {
                BooleanExpression::True
            }
        }
        BooleanExpression::False => {
            if negated {
                BooleanExpression::True
            } else {
                BooleanExpression::False
            }
        }
        BooleanExpression::And(ops) => {
            let ops = ops.into_iter().map(|op| push_not(op, negated)).collect();
            if negated {
                BooleanExpression::or(ops)
            } else {
                BooleanExpression::and(ops)
            }
        }
        BooleanExpression::Or(ops) => {
            let ops = ops.into_iter().map(|op| push_not(op, negated)).collect();
            if negated {
                BooleanExpression::and(ops)
            } else {
                BooleanExpression::or(ops)
            }
        }
        BooleanExpression::Not(inner) => push_not(*inner, !negated),
        BooleanExpression::External {
            selector,
            channel,
            in_params,
            filter,
            schema,
            span,
        } => {
            let external = BooleanExpression::External {
                selector,
                channel,
                in_params,
                filter: Box::new(normalize_filter(*filter)),
                schema,
                span,
            };
            wrap_not(external, negated)
        }
        atom => wrap_not(atom, negated),
    }
}

fn wrap_not(lit: BooleanExpression, negated: bool) -> BooleanExpression {
    if negated {
        BooleanExpression::Not(Box::new(lit))
    } else {
        lit
    }
}

/// CNF as a list of disjunction clauses. `vec![]` is `true`; a clause
/// `vec![]` is `false`.
fn cnf_clauses(filter: BooleanExpression) -> Vec<Vec<BooleanExpression>> {
    match filter {
        BooleanExpression::True => vec![],
        BooleanExpression::False => vec![vec![]],
        BooleanExpression::And(ops) => ops.into_iter().flat_map(cnf_clauses).collect(),
        BooleanExpression::Or(ops) => {
            let mut result: Vec<Vec<BooleanExpression>> = vec![vec![]];
            for op in ops {
                let op_clauses = cnf_clauses(op);
                if op_clauses.is_empty() {
                    // `true` absorbs the whole disjunction.
                    return vec![];
                }
                let mut next = Vec::new();
                for existing in &result {
                    for clause in &op_clauses {
                        let mut merged = existing.clone();
                        merged.extend(clause.iter().cloned());
                        next.push(merged);
                    }
                }
                result = next;
            }
            result
        }
        lit => vec![vec![lit]],
    }
}

fn dedup_lits(clause: &mut Vec<BooleanExpression>) {
    let mut seen = Vec::new();
    clause.retain(|lit| {
        if seen.contains(lit) {
            false
        } else {
            seen.push(lit.clone());
            true
        }
    });
}

/// `a == x || a == y` becomes `a in_array [x, y]` within one clause.
fn fuse_equality_disjuncts(clause: &mut Vec<BooleanExpression>) {
    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();
    for lit in clause.iter() {
        if let BooleanExpression::Atom { name, op: Operator::Equal, value, .. } = lit {
            match groups.iter_mut().find(|(n, _)| n == name) {
                Some((_, values)) => values.push(value.clone()),
                None => groups.push((name.clone(), vec![value.clone()])),
            }
        }
    }
    for (name, values) in groups {
        if values.len() < 2 {
            continue;
        }
        clause.retain(|lit| {
            !matches!(
                lit,
                BooleanExpression::Atom { name: n, op: Operator::Equal, .. } if *n == name
            )
        });
        clause.push(BooleanExpression::Atom {
            name,
            op: Operator::InArray,
            value: Value::Array(values),
            span: None,
        });
    }
}

/// Stable ordering key: parameter name, then operator, then a rendering
/// of the literal.
fn lit_sort_key(lit: &BooleanExpression) -> (String, String, String) {
    match lit {
        BooleanExpression::Atom { name, op, value, .. } => {
            (name.clone(), op.surface().to_string(), format!("{value:?}"))
        }
        BooleanExpression::Not(inner) => {
            let (name, op, value) = lit_sort_key(inner);
            (name, format!("!{op}"), value)
        }
        BooleanExpression::DontCare { name } => (name.clone(), "true".to_string(), String::new()),
        BooleanExpression::Compute { lhs, op, rhs, .. } => (
            "~compute".to_string(),
            op.surface().to_string(),
            format!("{lhs:?}{rhs:?}"),
        ),
        BooleanExpression::External { channel, .. } => {
            ("~external".to_string(), channel.clone(), format!("{lit:?}"))
        }
        other => ("~~".to_string(), String::new(), format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BooleanExpression as B;
    use crate::types::Operator;

    fn atom(name: &str, op: Operator, value: Value) -> B {
        B::atom(name, op, value)
    }

    fn eq(name: &str, text: &str) -> B {
        atom(name, Operator::Equal, Value::String(text.to_string()))
    }

    #[test]
    fn or_of_equalities_fuses_to_in_array() {
        let filter = B::or(vec![eq("labels", "a"), eq("labels", "b")]);
        let normalized = normalize_filter(filter);
        match normalized {
            B::Atom { name, op, value, .. } => {
                assert_eq!(name, "labels");
                assert_eq!(op, Operator::InArray);
                assert_eq!(
                    value,
                    Value::Array(vec![
                        Value::String("a".to_string()),
                        Value::String("b".to_string())
                    ])
                );
            }
            other => panic!("expected fused atom, got {other:?}"),
        }
    }

    #[test]
    fn cnf_has_and_outermost() {
        // (a || (b && c)) -> (a || b) && (a || c)
        let filter = B::or(vec![
            eq("a", "1"),
            B::and(vec![eq("b", "2"), eq("c", "3")]),
        ]);
        let normalized = normalize_filter(filter);
        match normalized {
            B::And(clauses) => {
                assert_eq!(clauses.len(), 2);
                for clause in clauses {
                    assert!(matches!(clause, B::Or(_)));
                }
            }
            other => panic!("expected CNF, got {other:?}"),
        }
    }

    #[test]
    fn true_and_false_absorb() {
        assert_eq!(
            normalize_filter(B::and(vec![B::True, eq("a", "1")])),
            eq("a", "1")
        );
        assert_eq!(
            normalize_filter(B::and(vec![B::False, eq("a", "1")])),
            B::False
        );
        assert_eq!(
            normalize_filter(B::or(vec![B::True, eq("a", "1")])),
            B::True
        );
    }

    #[test]
    fn duplicate_atoms_dedup() {
        let filter = B::and(vec![eq("a", "1"), eq("a", "1")]);
        assert_eq!(normalize_filter(filter), eq("a", "1"));
    }

    #[test]
    fn double_negation_normalizes_away() {
        let filter = B::not(B::not(eq("a", "1")));
        assert_eq!(normalize_filter(filter), eq("a", "1"));
    }

    #[test]
    fn negation_distributes_de_morgan() {
        let filter = B::not(B::or(vec![eq("a", "1"), eq("b", "2")]));
        match normalize_filter(filter) {
            B::And(clauses) => {
                assert_eq!(clauses.len(), 2);
                assert!(clauses.iter().all(|c| matches!(c, B::Not(_))));
            }
            other => panic!("expected conjunction of negations, got {other:?}"),
        }
    }

    #[test]
    fn atoms_sort_stably() {
        let filter = B::and(vec![eq("b", "2"), eq("a", "1")]);
        match normalize_filter(filter) {
            B::And(clauses) => {
                assert_eq!(
                    clauses,
                    vec![eq("a", "1"), eq("b", "2")],
                    "conjuncts sort by parameter name"
                );
            }
            other => panic!("expected sorted conjunction, got {other:?}"),
        }
    }

    #[test]
    fn filter_normalization_is_idempotent() {
        let filter = B::or(vec![
            B::and(vec![eq("b", "2"), eq("a", "1")]),
            B::not(B::or(vec![eq("c", "3"), eq("c", "4")])),
        ]);
        let once = normalize_filter(filter.clone());
        let twice = normalize_filter(once.clone());
        assert_eq!(once, twice);
    }
}
