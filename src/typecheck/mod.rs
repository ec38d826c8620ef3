//! The typechecker.
//!
//! Checking is two-pass, per the async-resolution redesign: pass one walks
//! the AST and collects one schema request per distinct `(kind_of, class,
//! function)` triple; requests resolve concurrently against the
//! [`SchemaRetriever`](crate::schema::SchemaRetriever) (classes defined
//! inline in the program shadow the catalogue). Pass two is synchronous:
//! it walks a clone of the input, populates every invocation's `schema`,
//! threads scopes left-to-right, and checks parameters, filters,
//! projections, and aggregations against the operator tables.
//!
//! Semantic errors accumulate: a broken statement does not stop checking
//! of its siblings. The result is either a fully annotated AST or the
//! complete list of diagnostics.

mod scope;

pub use scope::Scope;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;

use crate::ast::{
    Action, BookkeepingIntent, BooleanExpression, DeclarationBody, DialogueHistoryResultList,
    FunctionDef, FunctionKind, Input, InputParam, Invocation, PermissionFunction, Statement,
    Stream, Table, Value,
};
use crate::error::{Error, TypeError, TypeErrorKind};
use crate::foundation::{CancellationToken, Span};
use crate::schema::SchemaRetriever;
use crate::types::{self, assignable, operator_admits, TemperatureUnit, Type};

/// Caller preferences consulted during checking.
#[derive(Debug, Clone)]
pub struct TypecheckOptions {
    /// Unit the `defaultTemperature` pseudo-unit resolves to.
    pub temperature: TemperatureUnit,
}

impl Default for TypecheckOptions {
    fn default() -> Self {
        Self {
            temperature: TemperatureUnit::Celsius,
        }
    }
}

type SchemaKey = (FunctionKind, String, String);

/// Typecheck any input, returning an annotated clone.
///
/// On failure every collected [`TypeError`] is returned together. The
/// cancellation token aborts outstanding schema fetches; a cancelled check
/// yields `Error::Cancelled` and no partial AST.
pub async fn typecheck(
    input: &Input,
    retriever: &dyn SchemaRetriever,
    options: &TypecheckOptions,
    cancel: &CancellationToken,
) -> Result<Input, Error> {
    tracing::debug!("typecheck start");
    let mut checked = input.clone();

    let local = collect_local_schemas(&checked);
    let requests = collect_requests(&checked, &local);
    let schemas = fetch_schemas(requests, local, retriever, cancel).await?;

    let mut checker = Checker {
        schemas,
        errors: Vec::new(),
        options: options.clone(),
        lenient_atoms: false,
    };
    checker.check_input(&mut checked);

    if checker.errors.is_empty() {
        Ok(checked)
    } else {
        Err(Error::Type(checker.errors))
    }
}

/// Classes declared inline shadow the catalogue.
fn collect_local_schemas(input: &Input) -> HashMap<SchemaKey, Arc<FunctionDef>> {
    let mut map = HashMap::new();
    let classes = match input {
        Input::Program(program) => &program.classes,
        Input::Library(library) => &library.classes,
        _ => return map,
    };
    for class in classes {
        for def in class.queries.values() {
            map.insert(
                (FunctionKind::Query, class.kind.clone(), def.name.clone()),
                Arc::new(def.clone()),
            );
        }
        for def in class.actions.values() {
            map.insert(
                (FunctionKind::Action, class.kind.clone(), def.name.clone()),
                Arc::new(def.clone()),
            );
        }
    }
    map
}


fn collect_requests(
    input: &Input,
    local: &HashMap<SchemaKey, Arc<FunctionDef>>,
) -> Vec<SchemaKey> {
    let mut keys = Vec::new();
    let mut push = |key: SchemaKey| {
        if !local.contains_key(&key) && !keys.contains(&key) {
            keys.push(key);
        }
    };
    for (kind, primitive) in crate::ast::iterate_primitives(input) {
        let kind_of = match kind {
            crate::ast::PrimitiveKind::Action => FunctionKind::Action,
            _ => FunctionKind::Query,
        };
        push((
            kind_of,
            primitive.kind.to_string(),
            primitive.channel.to_string(),
        ));
    }
    if let Input::Permission(rule) = input {
        for (func, kind_of) in [
            (&rule.query, FunctionKind::Query),
            (&rule.action, FunctionKind::Action),
        ] {
            if let PermissionFunction::Specified { kind, channel, .. } = func {
                push((kind_of, kind.clone(), channel.clone()));
            }
        }
    }
    keys
}

/// Resolve all requests concurrently. Requests within a single invocation
/// are inherently serial (one fetch per invocation); independent
/// invocations overlap and are joined here.
async fn fetch_schemas(
    requests: Vec<SchemaKey>,
    local: HashMap<SchemaKey, Arc<FunctionDef>>,
    retriever: &dyn SchemaRetriever,
    cancel: &CancellationToken,
) -> Result<SchemaMap, Error> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let fetches = requests.into_iter().map(|key| async move {
        let (kind_of, kind, channel) = &key;
        let result = retriever.get_function(kind, channel, *kind_of).await;
        (key, result)
    });

    let results = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        results = join_all(fetches) => results,
    };

    let mut map: SchemaMap = local
        .into_iter()
        .map(|(key, def)| (key, Ok(def)))
        .collect();
    for (key, result) in results {
        map.insert(key, result.map_err(|e| e.to_string()));
    }
    Ok(map)
}

type SchemaMap = HashMap<SchemaKey, Result<Arc<FunctionDef>, String>>;

/// Output-parameter set and structural properties of a table or stream.
#[derive(Debug, Clone, Copy, Default)]
struct Props {
    is_list: bool,
    is_monitorable: bool,
}

struct Checker {
    schemas: SchemaMap,
    errors: Vec<TypeError>,
    options: TypecheckOptions,
    /// Bookkeeping predicates have no schema to check atoms against.
    lenient_atoms: bool,
}

impl Checker {
    fn error(&mut self, kind: TypeErrorKind, span: Option<Span>, message: impl Into<String>) {
        self.errors.push(TypeError::new(kind, span, message));
    }

    fn resolve(
        &mut self,
        kind_of: FunctionKind,
        kind: &str,
        channel: &str,
        span: Option<Span>,
    ) -> Option<Arc<FunctionDef>> {
        let key = (kind_of, kind.to_string(), channel.to_string());
        match self.schemas.get(&key) {
            Some(Ok(def)) => Some(def.clone()),
            Some(Err(message)) => {
                let message = message.clone();
                self.error(TypeErrorKind::UnresolvedSchema, span, message);
                None
            }
            None => {
                self.error(
                    TypeErrorKind::UnresolvedSchema,
                    span,
                    format!("no schema for @{kind}.{channel}"),
                );
                None
            }
        }
    }

    // === Inputs ===

    fn check_input(&mut self, input: &mut Input) {
        match input {
            Input::Program(program) => {
                let mut env = Scope::empty();
                for stmt in &mut program.statements {
                    self.check_statement(stmt, &mut env);
                }
            }
            Input::Permission(rule) => {
                let scope = Scope::empty()
                    .bind("__pi", Type::Entity("tt:contact".to_string()))
                    .bind("source", Type::Entity("tt:contact".to_string()));
                let principal_span = rule.span;
                self.check_filter(&mut rule.principal, &scope, principal_span);
                self.check_permission_function(
                    &mut rule.query,
                    FunctionKind::Query,
                    &scope,
                    rule.span,
                );
                self.check_permission_function(
                    &mut rule.action,
                    FunctionKind::Action,
                    &scope,
                    rule.span,
                );
            }
            Input::Dataset(dataset) => {
                for example in &mut dataset.examples {
                    let env = Scope::empty().bind_all(
                        example
                            .params
                            .iter()
                            .map(|(n, t)| (n.clone(), t.clone())),
                    );
                    let span = example.span;
                    self.check_body(&mut example.body, &env, span);
                }
            }
            Input::Library(_) => {}
            Input::Bookkeeping(bk) => {
                let span = bk.span;
                self.check_intent(&mut bk.intent, span);
            }
            Input::ControlCommand(cmd) => {
                let span = cmd.span;
                self.check_intent(&mut cmd.intent, span);
            }
            Input::DialogueState(state) => {
                for item in &mut state.history {
                    let mut env = Scope::empty();
                    self.check_statement(&mut item.statement, &mut env);
                    if let Some(results) = &item.results {
                        self.check_result_list(results, item.statement.span());
                    }
                }
            }
        }
    }

    fn check_intent(&mut self, intent: &mut BookkeepingIntent, span: Option<Span>) {
        match intent {
            BookkeepingIntent::Answer(value) => {
                let scope = Scope::empty();
                self.check_value(value, &scope, span);
            }
            BookkeepingIntent::Predicate(filter) => {
                let scope = Scope::empty();
                self.lenient_atoms = true;
                self.check_filter(filter, &scope, span);
                self.lenient_atoms = false;
            }
            _ => {}
        }
    }

    /// Result payloads are materialized facts; slot holes are not legal
    /// inside them.
    fn check_result_list(&mut self, results: &DialogueHistoryResultList, span: Option<Span>) {
        for item in &results.results {
            for (name, value) in &item.value {
                let mut has_hole = false;
                value.walk(&mut |v| {
                    if v.is_undefined() {
                        has_hole = true;
                    }
                });
                if has_hole {
                    self.error(
                        TypeErrorKind::TypeMismatch,
                        span,
                        format!("result field '{name}' contains an unfilled slot"),
                    );
                }
            }
        }
        if !matches!(results.count, Value::Number(_)) {
            self.error(TypeErrorKind::TypeMismatch, span, "result count must be a number");
        }
    }

    fn check_permission_function(
        &mut self,
        func: &mut PermissionFunction,
        kind_of: FunctionKind,
        outer: &Scope,
        span: Option<Span>,
    ) {
        if let PermissionFunction::Specified {
            kind,
            channel,
            filter,
            schema,
        } = func
        {
            let resolved = self.resolve(kind_of, kind, channel, span);
            if let Some(def) = resolved {
                // Permission filters may constrain inputs and outputs
                // alike.
                let scope = outer.bind_all(
                    def.args
                        .values()
                        .map(|arg| (arg.name.clone(), arg.ty.clone())),
                );
                *schema = Some(def);
                self.check_filter(filter, &scope, span);
            }
        }
    }

    fn check_body(&mut self, body: &mut DeclarationBody, env: &Scope, span: Option<Span>) {
        match body {
            DeclarationBody::Table(table) => {
                self.check_table(table, env, span);
            }
            DeclarationBody::Stream(stream) => {
                self.check_stream(stream, env, span);
            }
            DeclarationBody::Actions(actions) => {
                for action in actions {
                    self.check_action(action, env, span);
                }
            }
        }
    }

    // === Statements ===

    fn check_statement(&mut self, stmt: &mut Statement, env: &mut Scope) {
        match stmt {
            Statement::Command { table, actions, span } => {
                let span = *span;
                let scope = match table {
                    Some(table) => {
                        let (outputs, _props) = self.check_table(table, env, span);
                        env.bind_all(outputs)
                    }
                    None => env.clone(),
                };
                for action in actions {
                    self.check_action(action, &scope, span);
                }
            }
            Statement::Rule { stream, actions, span } => {
                let span = *span;
                let (outputs, _) = self.check_stream(stream, env, span);
                let scope = env.bind_all(outputs);
                for action in actions {
                    self.check_action(action, &scope, span);
                }
            }
            Statement::Assignment { name, value, span } => {
                let span = *span;
                let ty = self.check_value(value, env, span);
                *env = env.bind(name.clone(), ty);
            }
            Statement::Declaration(decl) => {
                let span = decl.span;
                let inner = env.bind_all(
                    decl.params.iter().map(|(n, t)| (n.clone(), t.clone())),
                );
                self.check_body(&mut decl.body, &inner, span);
            }
            Statement::OnInputChoice(choice) => {
                let span = choice.span;
                let scope = match &mut choice.table {
                    Some(table) => {
                        let (outputs, _) = self.check_table(table, env, span);
                        env.bind_all(outputs)
                    }
                    None => env.clone(),
                };
                for action in &mut choice.actions {
                    self.check_action(action, &scope, span);
                }
            }
        }
    }

    // === Tables ===

    fn check_table(
        &mut self,
        table: &mut Table,
        env: &Scope,
        span: Option<Span>,
    ) -> (IndexMap<String, Type>, Props) {
        match table {
            Table::Invocation(inv) => self.check_invocation_table(inv, env),
            Table::Filter { table, filter } => {
                let (outputs, props) = self.check_table(table, env, span);
                let scope = env.bind_all(outputs.clone());
                self.check_filter(filter, &scope, span);
                (outputs, props)
            }
            Table::Projection { table, args } => {
                let (outputs, props) = self.check_table(table, env, span);
                if args.is_empty() {
                    return (outputs, props);
                }
                let mut projected = IndexMap::new();
                for name in args.iter() {
                    match outputs.get(name) {
                        Some(ty) => {
                            projected.insert(name.clone(), ty.clone());
                        }
                        None => self.error(
                            TypeErrorKind::UnknownParameter,
                            span,
                            format!("cannot project on '{name}': no such output parameter"),
                        ),
                    }
                }
                (projected, props)
            }
            Table::Compute { table, expr, alias } => {
                let (mut outputs, props) = self.check_table(table, env, span);
                let scope = env.bind_all(outputs.clone());
                let ty = self.check_value(expr, &scope, span);
                let name = alias.clone().unwrap_or_else(|| computed_name(expr));
                outputs.insert(name, ty);
                (outputs, props)
            }
            Table::Aggregation { table, field, op, alias } => {
                let (outputs, props) = self.check_table(table, env, span);
                if !props.is_list {
                    self.error(
                        TypeErrorKind::NotList,
                        span,
                        "cannot aggregate over a single-row query",
                    );
                }
                let field_ty = if field == "*" {
                    Type::Any
                } else {
                    match outputs.get(field) {
                        Some(ty) => ty.clone(),
                        None => {
                            self.error(
                                TypeErrorKind::UnknownParameter,
                                span,
                                format!("no output parameter '{field}' to aggregate"),
                            );
                            Type::Any
                        }
                    }
                };
                if field != "*" && !op.admits(&field_ty) {
                    self.error(
                        TypeErrorKind::InvalidOperator,
                        span,
                        format!("cannot {op} a value of type {field_ty}"),
                    );
                }
                let result_name = alias.clone().unwrap_or_else(|| {
                    if field == "*" {
                        "count".to_string()
                    } else {
                        field.clone()
                    }
                });
                let mut result = IndexMap::new();
                result.insert(result_name, op.result_type(&field_ty));
                (
                    result,
                    Props {
                        is_list: false,
                        is_monitorable: props.is_monitorable,
                    },
                )
            }
            Table::Sort { table, field, .. } => {
                let (outputs, props) = self.check_table(table, env, span);
                if !props.is_list {
                    self.error(TypeErrorKind::NotList, span, "cannot sort a single-row query");
                }
                match outputs.get(field) {
                    Some(ty) if !ty.is_comparable() => self.error(
                        TypeErrorKind::TypeMismatch,
                        span,
                        format!("cannot sort by '{field}' of type {ty}"),
                    ),
                    Some(_) => {}
                    None => self.error(
                        TypeErrorKind::UnknownParameter,
                        span,
                        format!("no output parameter '{field}' to sort by"),
                    ),
                }
                (outputs, props)
            }
            Table::Index { table, indices } => {
                let (outputs, props) = self.check_table(table, env, span);
                if !props.is_list {
                    self.error(TypeErrorKind::NotList, span, "cannot index a single-row query");
                }
                for index in indices {
                    self.check_value_against(index, &Type::Number, env, span);
                }
                (outputs, props)
            }
            Table::Slice { table, base, limit } => {
                let (outputs, props) = self.check_table(table, env, span);
                if !props.is_list {
                    self.error(TypeErrorKind::NotList, span, "cannot slice a single-row query");
                }
                self.check_value_against(base, &Type::Number, env, span);
                self.check_value_against(limit, &Type::Number, env, span);
                (outputs, props)
            }
            Table::Join { lhs, rhs, in_params } => {
                let (lout, lprops) = self.check_table(lhs, env, span);
                let rhs_env = env.bind_all(lout.clone());
                let (rout, rprops) = self.check_table(rhs, &rhs_env, span);
                self.check_join_params(in_params, rhs, &rhs_env, span);
                let merged = self.merge_join_scopes(lout, rout, span);
                (
                    merged,
                    Props {
                        is_list: lprops.is_list || rprops.is_list,
                        is_monitorable: lprops.is_monitorable && rprops.is_monitorable,
                    },
                )
            }
            Table::Alias { table, .. } => self.check_table(table, env, span),
            Table::History { kind, channel, index, schema } => {
                let resolved = self.resolve(FunctionKind::Query, kind, channel, span);
                let mut outputs = IndexMap::new();
                let mut props = Props::default();
                if let Some(def) = resolved {
                    for arg in def.output_args() {
                        outputs.insert(arg.name.clone(), arg.ty.clone());
                    }
                    props.is_list = def.is_list;
                    *schema = Some(def);
                }
                if let Some(index) = index {
                    self.check_value_against(index, &Type::Number, env, span);
                }
                (outputs, props)
            }
        }
    }

    fn check_invocation_table(
        &mut self,
        inv: &mut Invocation,
        env: &Scope,
    ) -> (IndexMap<String, Type>, Props) {
        let span = inv.span;
        let resolved = self.resolve(FunctionKind::Query, &inv.selector.kind, &inv.channel, span);
        let mut outputs = IndexMap::new();
        let mut props = Props::default();
        if let Some(def) = resolved {
            self.check_in_params(&mut inv.in_params, &def, env, span);
            for arg in def.output_args() {
                outputs.insert(arg.name.clone(), arg.ty.clone());
            }
            props.is_list = def.is_list;
            props.is_monitorable = def.is_monitorable;
            inv.schema = Some(def);
        }
        (outputs, props)
    }

    fn check_join_params(
        &mut self,
        in_params: &mut [InputParam],
        rhs: &Table,
        scope: &Scope,
        span: Option<Span>,
    ) {
        let rhs_schema = rhs.primitive().and_then(|inv| inv.schema.clone());
        for param in in_params.iter_mut() {
            let vty = self.check_value(&mut param.value, scope, span);
            match rhs_schema.as_ref().and_then(|s| s.arg(&param.name)) {
                Some(arg) if arg.direction.is_input() => {
                    if !param.value.is_undefined() && !assignable(&vty, &arg.ty) {
                        self.error(
                            TypeErrorKind::TypeMismatch,
                            param.span.or(span),
                            format!(
                                "cannot pass {vty} into '{}' of type {}",
                                param.name, arg.ty
                            ),
                        );
                    }
                }
                Some(_) => self.error(
                    TypeErrorKind::UnknownParameter,
                    param.span.or(span),
                    format!("'{}' is an output parameter", param.name),
                ),
                None if rhs_schema.is_some() => self.error(
                    TypeErrorKind::UnknownParameter,
                    param.span.or(span),
                    format!("no input parameter '{}' on the joined query", param.name),
                ),
                None => {}
            }
        }
    }

    fn merge_join_scopes(
        &mut self,
        lhs: IndexMap<String, Type>,
        rhs: IndexMap<String, Type>,
        span: Option<Span>,
    ) -> IndexMap<String, Type> {
        let mut merged = lhs;
        for (name, rty) in rhs {
            match merged.get(&name) {
                Some(lty) => match lty.join(&rty) {
                    Some(joined) => {
                        merged.insert(name, joined);
                    }
                    None => {
                        let lty = lty.clone();
                        self.error(
                            TypeErrorKind::AmbiguousJoin,
                            span,
                            format!(
                                "output parameter '{name}' has incompatible types {lty} and {rty} across the join"
                            ),
                        );
                    }
                },
                None => {
                    merged.insert(name, rty);
                }
            }
        }
        merged
    }

    // === Streams ===

    fn check_stream(
        &mut self,
        stream: &mut Stream,
        env: &Scope,
        span: Option<Span>,
    ) -> (IndexMap<String, Type>, Props) {
        match stream {
            Stream::Timer { base, interval, frequency } => {
                self.check_value_against(base, &Type::Date, env, span);
                self.check_value_against(interval, &Type::Measure("ms".to_string()), env, span);
                if let Some(frequency) = frequency {
                    self.check_value_against(frequency, &Type::Number, env, span);
                }
                (IndexMap::new(), Props::default())
            }
            Stream::AtTimer { times, expiration } => {
                for time in times {
                    self.check_value_against(time, &Type::Time, env, span);
                }
                if let Some(expiration) = expiration {
                    self.check_value_against(expiration, &Type::Date, env, span);
                }
                (IndexMap::new(), Props::default())
            }
            Stream::Monitor { table, args } => {
                let (outputs, props) = self.check_table(table, env, span);
                if !props.is_monitorable {
                    self.error(
                        TypeErrorKind::NotMonitorable,
                        span,
                        "cannot monitor a non-monitorable query",
                    );
                }
                if let Some(args) = args {
                    for name in args.iter() {
                        if !outputs.contains_key(name) {
                            self.error(
                                TypeErrorKind::UnknownParameter,
                                span,
                                format!("cannot monitor on '{name}': no such output parameter"),
                            );
                        }
                    }
                }
                (outputs, props)
            }
            Stream::EdgeFilter { stream, filter } => {
                let (outputs, props) = self.check_stream(stream, env, span);
                let scope = env.bind_all(outputs.clone());
                self.check_filter(filter, &scope, span);
                (outputs, props)
            }
            Stream::EdgeNew(inner) => self.check_stream(inner, env, span),
            Stream::Filter { stream, filter } => {
                let (outputs, props) = self.check_stream(stream, env, span);
                let scope = env.bind_all(outputs.clone());
                self.check_filter(filter, &scope, span);
                (outputs, props)
            }
            Stream::Projection { stream, args } => {
                let (outputs, props) = self.check_stream(stream, env, span);
                if args.is_empty() {
                    return (outputs, props);
                }
                let mut projected = IndexMap::new();
                for name in args.iter() {
                    match outputs.get(name) {
                        Some(ty) => {
                            projected.insert(name.clone(), ty.clone());
                        }
                        None => self.error(
                            TypeErrorKind::UnknownParameter,
                            span,
                            format!("cannot project on '{name}': no such output parameter"),
                        ),
                    }
                }
                (projected, props)
            }
            Stream::Compute { stream, expr, alias } => {
                let (mut outputs, props) = self.check_stream(stream, env, span);
                let scope = env.bind_all(outputs.clone());
                let ty = self.check_value(expr, &scope, span);
                let name = alias.clone().unwrap_or_else(|| computed_name(expr));
                outputs.insert(name, ty);
                (outputs, props)
            }
            Stream::Join { stream, table, in_params } => {
                let (sout, sprops) = self.check_stream(stream, env, span);
                let table_env = env.bind_all(sout.clone());
                let (tout, tprops) = self.check_table(table, &table_env, span);
                self.check_join_params(in_params, table, &table_env, span);
                let merged = self.merge_join_scopes(sout, tout, span);
                (
                    merged,
                    Props {
                        is_list: sprops.is_list || tprops.is_list,
                        is_monitorable: sprops.is_monitorable,
                    },
                )
            }
            Stream::Alias { stream, .. } => self.check_stream(stream, env, span),
        }
    }

    // === Actions ===

    fn check_action(&mut self, action: &mut Action, scope: &Scope, span: Option<Span>) {
        if let Action::Invocation(inv) = action {
            let span = inv.span.or(span);
            let resolved =
                self.resolve(FunctionKind::Action, &inv.selector.kind, &inv.channel, span);
            if let Some(def) = resolved {
                self.check_in_params(&mut inv.in_params, &def, scope, span);
                inv.schema = Some(def);
            }
        }
    }

    // === Parameters, filters, values ===

    fn check_in_params(
        &mut self,
        in_params: &mut [InputParam],
        def: &FunctionDef,
        scope: &Scope,
        span: Option<Span>,
    ) {
        for param in in_params.iter_mut() {
            let pspan = param.span.or(span);
            let vty = self.check_value(&mut param.value, scope, pspan);
            match def.arg(&param.name) {
                Some(arg) if arg.direction.is_input() => {
                    if !param.value.is_undefined() && !assignable(&vty, &arg.ty) {
                        self.error(
                            TypeErrorKind::TypeMismatch,
                            pspan,
                            format!(
                                "cannot pass {vty} into '{}' of type {} on {}",
                                param.name,
                                arg.ty,
                                def.qualified_name()
                            ),
                        );
                    }
                }
                Some(_) => self.error(
                    TypeErrorKind::UnknownParameter,
                    pspan,
                    format!(
                        "'{}' is an output parameter of {}",
                        param.name,
                        def.qualified_name()
                    ),
                ),
                None => self.error(
                    TypeErrorKind::UnknownParameter,
                    pspan,
                    format!("no parameter '{}' on {}", param.name, def.qualified_name()),
                ),
            }
        }
    }

    fn check_filter(
        &mut self,
        filter: &mut BooleanExpression,
        scope: &Scope,
        span: Option<Span>,
    ) {
        match filter {
            BooleanExpression::True | BooleanExpression::False => {}
            BooleanExpression::And(ops) | BooleanExpression::Or(ops) => {
                for op in ops {
                    self.check_filter(op, scope, span);
                }
            }
            BooleanExpression::Not(inner) => self.check_filter(inner, scope, span),
            BooleanExpression::Atom { name, op, value, span: atom_span } => {
                let aspan = atom_span.or(span);
                let vty = self.check_value(value, scope, aspan);
                match scope.lookup(name) {
                    Some(pty) => {
                        let pty = pty.clone();
                        if !value.is_undefined() && !operator_admits(&pty, *op, &vty) {
                            self.error(
                                TypeErrorKind::InvalidOperator,
                                aspan,
                                format!("no overload of {op} accepts {pty} and {vty}"),
                            );
                        }
                    }
                    None if self.lenient_atoms => {}
                    None => self.error(
                        TypeErrorKind::UnknownParameter,
                        aspan,
                        format!("no parameter '{name}' in scope"),
                    ),
                }
            }
            BooleanExpression::Compute { lhs, op, rhs, span: atom_span } => {
                let aspan = atom_span.or(span);
                let lty = self.check_value(lhs, scope, aspan);
                let rty = self.check_value(rhs, scope, aspan);
                if !operator_admits(&lty, *op, &rty) {
                    self.error(
                        TypeErrorKind::InvalidOperator,
                        aspan,
                        format!("no overload of {op} accepts {lty} and {rty}"),
                    );
                }
            }
            BooleanExpression::DontCare { name } => {
                if !scope.contains(name) && !self.lenient_atoms {
                    self.error(
                        TypeErrorKind::UnknownParameter,
                        span,
                        format!("no parameter '{name}' in scope"),
                    );
                }
            }
            BooleanExpression::External {
                selector,
                channel,
                in_params,
                filter,
                schema,
                span: ext_span,
            } => {
                let espan = ext_span.or(span);
                let resolved =
                    self.resolve(FunctionKind::Query, &selector.kind, channel, espan);
                if let Some(def) = resolved {
                    self.check_in_params(in_params, &def, scope, espan);
                    let inner_scope = scope.bind_all(
                        def.output_args().map(|a| (a.name.clone(), a.ty.clone())),
                    );
                    *schema = Some(def);
                    self.check_filter(filter, &inner_scope, espan);
                }
            }
        }
    }

    fn check_value_against(
        &mut self,
        value: &mut Value,
        expected: &Type,
        scope: &Scope,
        span: Option<Span>,
    ) {
        let ty = self.check_value(value, scope, span);
        if !value.is_undefined() && !assignable(&ty, expected) {
            self.error(
                TypeErrorKind::TypeMismatch,
                span,
                format!("expected {expected}, got {ty}"),
            );
        }
    }

    /// Type of a value in `scope`, with `defaultTemperature` resolution
    /// and recursive checking of computations rewritten in place.
    fn check_value(&mut self, value: &mut Value, scope: &Scope, span: Option<Span>) -> Type {
        match value {
            Value::VarRef(name) => match scope.lookup(name) {
                Some(ty) => ty.clone(),
                // `__const_*` placeholders stand for constants chosen at
                // slot-fill time and are always in scope.
                None if name.starts_with("__const") => Type::Any,
                None => {
                    self.error(
                        TypeErrorKind::UnresolvedVariable,
                        span,
                        format!("no variable '{name}' in scope"),
                    );
                    Type::Any
                }
            },
            Value::Measure { unit, .. } => {
                if unit == "defaultTemperature" {
                    *unit = self.options.temperature.unit_name().to_string();
                }
                match types::base_unit(unit) {
                    Some(base) => Type::Measure(base.to_string()),
                    None => {
                        self.error(
                            TypeErrorKind::TypeMismatch,
                            span,
                            format!("unknown unit '{unit}'"),
                        );
                        Type::Any
                    }
                }
            }
            Value::Computation { op, operands } => {
                let tys: Vec<Type> = operands
                    .iter_mut()
                    .map(|operand| self.check_value(operand, scope, span))
                    .collect();
                match types::scalar_op_result(op, &tys) {
                    Some(ty) => ty,
                    None => {
                        let rendered = tys
                            .iter()
                            .map(|t| t.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        self.error(
                            TypeErrorKind::InvalidOperator,
                            span,
                            format!("no overload of {op}({rendered})"),
                        );
                        Type::Any
                    }
                }
            }
            Value::ArrayField { value, field } => {
                let vty = self.check_value(value, scope, span);
                match vty {
                    Type::Array(elem) => match elem.as_ref() {
                        Type::Compound(fields) => match fields.get(field.as_str()) {
                            Some(f) => Type::array(f.ty.clone()),
                            None => {
                                self.error(
                                    TypeErrorKind::UnknownParameter,
                                    span,
                                    format!("no field '{field}' in compound element"),
                                );
                                Type::Any
                            }
                        },
                        _ => Type::array(Type::Any),
                    },
                    Type::Any => Type::Any,
                    other => {
                        self.error(
                            TypeErrorKind::TypeMismatch,
                            span,
                            format!("cannot project field '{field}' out of {other}"),
                        );
                        Type::Any
                    }
                }
            }
            Value::Filter { value, filter } => {
                let vty = self.check_value(value, scope, span);
                if let Type::Array(elem) = &vty {
                    if let Type::Compound(fields) = elem.as_ref() {
                        let inner = scope.bind_all(
                            fields.iter().map(|(n, f)| (n.clone(), f.ty.clone())),
                        );
                        self.check_filter(filter, &inner, span);
                    } else {
                        // `value` binds the element itself.
                        let inner = scope.bind("value", (**elem).clone());
                        self.check_filter(filter, &inner, span);
                    }
                }
                vty
            }
            Value::Array(values) => {
                let mut elem = Type::Any;
                for v in values.iter_mut() {
                    let ty = self.check_value(v, scope, span);
                    elem = match elem.join(&ty) {
                        Some(joined) => joined,
                        None => {
                            self.error(
                                TypeErrorKind::TypeMismatch,
                                span,
                                format!("array elements disagree: {elem} vs {ty}"),
                            );
                            elem
                        }
                    };
                }
                Type::array(elem)
            }
            Value::Object(fields) => {
                for v in fields.values_mut() {
                    self.check_value(v, scope, span);
                }
                Type::Any
            }
            other => other.type_of(),
        }
    }
}

/// Column name synthesized for an unaliased compute expression.
fn computed_name(expr: &Value) -> String {
    match expr {
        Value::Computation { op, .. } => op.clone(),
        Value::ArrayField { field, .. } => field.clone(),
        Value::VarRef(name) => name.clone(),
        _ => "computed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ArgDirection, ArgumentDef, ClassDef, FunctionDef};
    use crate::parser;
    use crate::schema::MemorySchemaRetriever;

    fn retriever() -> MemorySchemaRetriever {
        let retriever = MemorySchemaRetriever::new();

        let mut xkcd = ClassDef::new("com.xkcd");
        xkcd.add_function(
            FunctionDef::new(FunctionKind::Query, "get_comic").with_args(vec![
                ArgumentDef::new("number", ArgDirection::InOpt, Type::Number),
                ArgumentDef::new("title", ArgDirection::Out, Type::string()),
                ArgumentDef::new(
                    "picture_url",
                    ArgDirection::Out,
                    Type::Entity("tt:picture".to_string()),
                ),
            ]),
        );
        retriever.add_class(xkcd);

        let mut twitter = ClassDef::new("com.twitter");
        let mut timeline = FunctionDef::new(FunctionKind::Query, "home_timeline").with_args(vec![
            ArgumentDef::new("text", ArgDirection::Out, Type::string()),
            ArgumentDef::new(
                "author",
                ArgDirection::Out,
                Type::Entity("tt:username".to_string()),
            ),
        ]);
        timeline.is_list = true;
        timeline.is_monitorable = true;
        twitter.add_function(timeline);
        twitter.add_function(
            FunctionDef::new(FunctionKind::Action, "post").with_args(vec![ArgumentDef::new(
                "status",
                ArgDirection::InReq,
                Type::string(),
            )]),
        );
        retriever.add_class(twitter);
        retriever
    }

    async fn check(source: &str) -> Result<Input, Error> {
        let input = parser::parse(source)?;
        typecheck(
            &input,
            &retriever(),
            &TypecheckOptions::default(),
            &CancellationToken::none(),
        )
        .await
    }

    #[tokio::test]
    async fn simple_command_typechecks() {
        let checked = check("now => @com.xkcd.get_comic(number=42) => notify;")
            .await
            .unwrap();
        let prims = crate::ast::iterate_primitives(&checked);
        assert!(prims.iter().all(|(_, p)| p.schema.is_some()));
    }

    #[tokio::test]
    async fn monitor_binds_output_scope() {
        // `text` flows from the monitored query into the action.
        check("monitor @com.twitter.home_timeline() => @com.twitter.post(status=text);")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn monitor_rejects_non_monitorable() {
        let err = check("monitor @com.xkcd.get_comic() => notify;")
            .await
            .unwrap_err();
        match err {
            Error::Type(errors) => {
                assert!(errors
                    .iter()
                    .any(|e| e.kind == TypeErrorKind::NotMonitorable));
            }
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sort_requires_list() {
        let err = check("now => sort title asc of @com.xkcd.get_comic() => notify;")
            .await
            .unwrap_err();
        match err {
            Error::Type(errors) => {
                assert!(errors.iter().any(|e| e.kind == TypeErrorKind::NotList));
            }
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_parameter_is_reported() {
        let err = check("now => @com.twitter.post(text=\"hi\");").await.unwrap_err();
        match err {
            Error::Type(errors) => {
                assert!(errors
                    .iter()
                    .any(|e| e.kind == TypeErrorKind::UnknownParameter));
            }
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let err = check("now => @com.twitter.post(status=42);").await.unwrap_err();
        match err {
            Error::Type(errors) => {
                assert!(errors.iter().any(|e| e.kind == TypeErrorKind::TypeMismatch));
            }
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn errors_accumulate_across_statements() {
        let err = check(
            "now => @com.twitter.post(status=42);\nnow => @com.twitter.post(text=\"x\");",
        )
        .await
        .unwrap_err();
        match err {
            Error::Type(errors) => assert!(errors.len() >= 2),
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolved_schema_is_reported() {
        let err = check("now => @com.nonexistent.frobnicate() => notify;")
            .await
            .unwrap_err();
        match err {
            Error::Type(errors) => {
                assert!(errors
                    .iter()
                    .any(|e| e.kind == TypeErrorKind::UnresolvedSchema));
            }
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn default_temperature_resolves() {
        let retriever = retriever();
        let mut weather = ClassDef::new("org.weather");
        let mut current = FunctionDef::new(FunctionKind::Query, "current").with_args(vec![
            ArgumentDef::new("location", ArgDirection::InReq, Type::Location),
            ArgumentDef::new(
                "temperature",
                ArgDirection::Out,
                Type::Measure("C".to_string()),
            ),
        ]);
        current.is_monitorable = true;
        weather.add_function(current);
        retriever.add_class(weather);

        let input = parser::parse(
            "now => @org.weather.current(location=$location.home), temperature >= 5defaultTemperature => notify;",
        )
        .unwrap();
        let checked = typecheck(
            &input,
            &retriever,
            &TypecheckOptions::default(),
            &CancellationToken::none(),
        )
        .await
        .unwrap();

        // The pseudo-unit is rewritten to the concrete preference.
        let mut seen = false;
        for slot in crate::ast::iterate_slots(&checked) {
            if let Value::Measure { unit, .. } = &slot.value {
                assert_eq!(unit, "C");
                seen = true;
            }
        }
        assert!(seen);
    }

    #[tokio::test]
    async fn permission_rule_checks_with_pi() {
        check("source == \"bob\"^^tt:contact : now => @com.twitter.post;").await.unwrap();
    }

    #[tokio::test]
    async fn determinism_same_errors_twice() {
        let input = parser::parse("now => @com.twitter.post(status=42);").unwrap();
        let retriever = retriever();
        let opts = TypecheckOptions::default();
        let first = typecheck(&input, &retriever, &opts, &CancellationToken::none())
            .await
            .unwrap_err();
        let second = typecheck(&input, &retriever, &opts, &CancellationToken::none())
            .await
            .unwrap_err();
        match (first, second) {
            (Error::Type(a), Error::Type(b)) => assert_eq!(a, b),
            _ => panic!("expected type errors"),
        }
    }

    #[tokio::test]
    async fn cancellation_aborts() {
        let (canceller, token) = CancellationToken::new();
        canceller.cancel();
        let input = parser::parse("now => @com.xkcd.get_comic() => notify;").unwrap();
        let err = typecheck(
            &input,
            &retriever(),
            &TypecheckOptions::default(),
            &token,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
