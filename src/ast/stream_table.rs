//! Streams, tables, invocations, and actions.
//!
//! A `Table` is a materialized multiset of rows; a `Stream` is a temporally
//! ordered source of table-shaped events. Both are tagged sums and both
//! compose by wrapping (filter, projection, compute, join).

use crate::foundation::Span;
use crate::types::{AggregationOp, SortDirection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::class_def::FunctionDef;
use super::expression::BooleanExpression;
use super::value::Value;

/// Identifies a device: class kind, optional concrete id, optional `all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    pub kind: String,
    pub id: Option<String>,
    pub all: bool,
    /// Remaining attributes, sorted by name after normalization.
    pub attributes: Vec<InputParam>,
    pub span: Option<Span>,
}

impl Selector {
    pub fn new(kind: impl Into<String>) -> Selector {
        Selector {
            kind: kind.into(),
            id: None,
            all: false,
            attributes: Vec::new(),
            span: None,
        }
    }

    pub fn with_id(kind: impl Into<String>, id: impl Into<String>) -> Selector {
        Selector {
            id: Some(id.into()),
            ..Selector::new(kind)
        }
    }
}

/// `name = value` binding of an input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputParam {
    pub name: String,
    pub value: Value,
    pub span: Option<Span>,
}

impl InputParam {
    pub fn new(name: impl Into<String>, value: Value) -> InputParam {
        InputParam {
            name: name.into(),
            value,
            span: None,
        }
    }
}

/// A call to a Thingpedia function. `schema` is populated by the
/// typechecker and referenced by identity; it never round-trips through
/// syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub selector: Selector,
    pub channel: String,
    pub in_params: Vec<InputParam>,
    #[serde(skip)]
    pub schema: Option<Arc<FunctionDef>>,
    pub span: Option<Span>,
}

impl Invocation {
    pub fn new(selector: Selector, channel: impl Into<String>, in_params: Vec<InputParam>) -> Invocation {
        Invocation {
            selector,
            channel: channel.into(),
            in_params,
            schema: None,
            span: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Table {
    Invocation(Invocation),
    Filter {
        table: Box<Table>,
        filter: BooleanExpression,
    },
    /// Restriction to a subset of output parameters. An empty list means
    /// "all output params".
    Projection {
        table: Box<Table>,
        args: Vec<String>,
    },
    /// Derived column defined by a scalar expression.
    Compute {
        table: Box<Table>,
        expr: Value,
        alias: Option<String>,
    },
    /// Consumes a list table and yields a single row holding only the
    /// aggregated column.
    Aggregation {
        table: Box<Table>,
        field: String,
        op: AggregationOp,
        alias: Option<String>,
    },
    Sort {
        table: Box<Table>,
        field: String,
        direction: SortDirection,
    },
    Index {
        table: Box<Table>,
        indices: Vec<Value>,
    },
    Slice {
        table: Box<Table>,
        base: Value,
        limit: Value,
    },
    Join {
        lhs: Box<Table>,
        rhs: Box<Table>,
        in_params: Vec<InputParam>,
    },
    Alias {
        table: Box<Table>,
        name: String,
    },
    /// `result(@kind.channel[index])` — the stored result of a previous
    /// invocation of the function.
    History {
        kind: String,
        channel: String,
        index: Option<Value>,
        #[serde(skip)]
        schema: Option<Arc<FunctionDef>>,
    },
}

impl Table {
    pub fn filtered(self, filter: BooleanExpression) -> Table {
        if filter.is_true() {
            return self;
        }
        Table::Filter {
            table: Box::new(self),
            filter,
        }
    }

    /// The innermost invocation, if this chain bottoms out in one.
    pub fn primitive(&self) -> Option<&Invocation> {
        match self {
            Table::Invocation(inv) => Some(inv),
            Table::Filter { table, .. }
            | Table::Projection { table, .. }
            | Table::Compute { table, .. }
            | Table::Aggregation { table, .. }
            | Table::Sort { table, .. }
            | Table::Index { table, .. }
            | Table::Slice { table, .. }
            | Table::Alias { table, .. } => table.primitive(),
            Table::Join { lhs, .. } => lhs.primitive(),
            Table::History { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stream {
    /// Fires every `interval` starting from `base`; `frequency` > 1 fires
    /// that many times per interval.
    Timer {
        base: Value,
        interval: Value,
        frequency: Option<Value>,
    },
    /// Fires at each wall-clock time in `times` until `expiration`.
    AtTimer {
        times: Vec<Value>,
        expiration: Option<Value>,
    },
    /// Polls a monitorable query and fires on changed results; `args`
    /// restricts change detection to the named output parameters.
    Monitor {
        table: Box<Table>,
        args: Option<Vec<String>>,
    },
    /// Fires when the filter transitions false -> true.
    EdgeFilter {
        stream: Box<Stream>,
        filter: BooleanExpression,
    },
    /// Fires on rows never seen before.
    EdgeNew(Box<Stream>),
    Filter {
        stream: Box<Stream>,
        filter: BooleanExpression,
    },
    Projection {
        stream: Box<Stream>,
        args: Vec<String>,
    },
    Compute {
        stream: Box<Stream>,
        expr: Value,
        alias: Option<String>,
    },
    Join {
        stream: Box<Stream>,
        table: Box<Table>,
        in_params: Vec<InputParam>,
    },
    Alias {
        stream: Box<Stream>,
        name: String,
    },
}

/// What happens when a rule or command fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// `notify` sends to the user's default channel; `return` sends back
    /// to the originating conversation.
    Notify { name: NotifyKind },
    Invocation(Invocation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyKind {
    Notify,
    Return,
}

impl NotifyKind {
    pub fn surface(self) -> &'static str {
        match self {
            NotifyKind::Notify => "notify",
            NotifyKind::Return => "return",
        }
    }
}

impl Action {
    pub fn notify() -> Action {
        Action::Notify {
            name: NotifyKind::Notify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_drops_trivial_filter() {
        let table = Table::Invocation(Invocation::new(Selector::new("com.xkcd"), "get_comic", vec![]));
        let same = table.clone().filtered(BooleanExpression::True);
        assert_eq!(same, table);
    }

    #[test]
    fn primitive_digs_through_wrappers() {
        let inv = Invocation::new(Selector::new("com.twitter"), "home_timeline", vec![]);
        let table = Table::Sort {
            table: Box::new(Table::Filter {
                table: Box::new(Table::Invocation(inv.clone())),
                filter: BooleanExpression::True,
            }),
            field: "text".to_string(),
            direction: SortDirection::Asc,
        };
        assert_eq!(table.primitive().unwrap().channel, "home_timeline");
    }
}
