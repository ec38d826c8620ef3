//! Boolean filter expressions.

use crate::foundation::Span;
use crate::types::Operator;
use serde::{Deserialize, Serialize};

use super::stream_table::{InputParam, Selector};
use super::value::Value;
use std::sync::Arc;

use super::class_def::FunctionDef;

/// A filter predicate over the rows of a table or stream.
///
/// After normalization filters are in CNF: `And` outermost, `Or` inside,
/// `Not` only directly around atoms. `True` and `False` are absorbing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BooleanExpression {
    True,
    False,
    And(Vec<BooleanExpression>),
    Or(Vec<BooleanExpression>),
    Not(Box<BooleanExpression>),
    /// `param op value`.
    Atom {
        name: String,
        op: Operator,
        value: Value,
        span: Option<Span>,
    },
    /// Comparison between two computed scalar values,
    /// e.g. `count(labels) >= 3`.
    Compute {
        lhs: Value,
        op: Operator,
        rhs: Value,
        span: Option<Span>,
    },
    /// The user explicitly does not care about this parameter.
    DontCare { name: String },
    /// Subquery filter: the predicate holds if the external query,
    /// invoked with `in_params`, has a row satisfying `filter`.
    External {
        selector: Selector,
        channel: String,
        in_params: Vec<InputParam>,
        filter: Box<BooleanExpression>,
        #[serde(skip)]
        schema: Option<Arc<FunctionDef>>,
        span: Option<Span>,
    },
}

impl BooleanExpression {
    pub fn atom(name: impl Into<String>, op: Operator, value: Value) -> BooleanExpression {
        BooleanExpression::Atom {
            name: name.into(),
            op,
            value,
            span: None,
        }
    }

    /// Conjunction with `True`/`False` absorption and flattening.
    pub fn and(operands: Vec<BooleanExpression>) -> BooleanExpression {
        let mut flat = Vec::new();
        for op in operands {
            match op {
                BooleanExpression::True => {}
                BooleanExpression::False => return BooleanExpression::False,
                BooleanExpression::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => BooleanExpression::True,
            1 => flat.into_iter().next().unwrap(),
            _ => BooleanExpression::And(flat),
        }
    }

    /// Disjunction with `True`/`False` absorption and flattening.
    pub fn or(operands: Vec<BooleanExpression>) -> BooleanExpression {
        let mut flat = Vec::new();
        for op in operands {
            match op {
                BooleanExpression::False => {}
                BooleanExpression::True => return BooleanExpression::True,
                BooleanExpression::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => BooleanExpression::False,
            1 => flat.into_iter().next().unwrap(),
            _ => BooleanExpression::Or(flat),
        }
    }

    pub fn not(operand: BooleanExpression) -> BooleanExpression {
        match operand {
            BooleanExpression::True => BooleanExpression::False,
            BooleanExpression::False => BooleanExpression::True,
            BooleanExpression::Not(inner) => *inner,
            other => BooleanExpression::Not(Box::new(other)),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, BooleanExpression::True)
    }

    /// Names of parameters this filter constrains, in first-mention order.
    pub fn touched_params(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_params(&mut names);
        names
    }

    fn collect_params(&self, names: &mut Vec<String>) {
        let mut push = |name: &String| {
            if !names.contains(name) {
                names.push(name.clone());
            }
        };
        match self {
            BooleanExpression::And(ops) | BooleanExpression::Or(ops) => {
                for op in ops {
                    op.collect_params(names);
                }
            }
            BooleanExpression::Not(inner) => inner.collect_params(names),
            BooleanExpression::Atom { name, value, .. } => {
                push(name);
                collect_value_refs(value, names);
            }
            BooleanExpression::DontCare { name } => push(name),
            BooleanExpression::Compute { lhs, rhs, .. } => {
                collect_value_refs(lhs, names);
                collect_value_refs(rhs, names);
            }
            BooleanExpression::External { in_params, .. } => {
                for param in in_params {
                    collect_value_refs(&param.value, names);
                }
            }
            BooleanExpression::True | BooleanExpression::False => {}
        }
    }

    /// Visit this expression and every nested one, pre-order.
    pub fn walk<'a, V: FnMut(&'a BooleanExpression)>(&'a self, visitor: &mut V) {
        visitor(self);
        match self {
            BooleanExpression::And(ops) | BooleanExpression::Or(ops) => {
                for op in ops {
                    op.walk(visitor);
                }
            }
            BooleanExpression::Not(inner) => inner.walk(visitor),
            BooleanExpression::External { filter, .. } => filter.walk(visitor),
            _ => {}
        }
    }
}

fn collect_value_refs(value: &Value, names: &mut Vec<String>) {
    value.walk(&mut |v| {
        if let Value::VarRef(name) = v {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(name: &str) -> BooleanExpression {
        BooleanExpression::atom(name, Operator::Equal, Value::Number(1.0))
    }

    #[test]
    fn and_absorbs_and_flattens() {
        let e = BooleanExpression::and(vec![
            BooleanExpression::True,
            BooleanExpression::And(vec![atom("a"), atom("b")]),
            atom("c"),
        ]);
        match e {
            BooleanExpression::And(ops) => assert_eq!(ops.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        assert_eq!(
            BooleanExpression::and(vec![atom("a"), BooleanExpression::False]),
            BooleanExpression::False
        );
        assert_eq!(BooleanExpression::and(vec![]), BooleanExpression::True);
    }

    #[test]
    fn or_absorbs_true() {
        assert_eq!(
            BooleanExpression::or(vec![atom("a"), BooleanExpression::True]),
            BooleanExpression::True
        );
    }

    #[test]
    fn double_negation_cancels() {
        let e = BooleanExpression::not(BooleanExpression::not(atom("a")));
        assert_eq!(e, atom("a"));
    }

    #[test]
    fn touched_params_includes_value_refs() {
        let e = BooleanExpression::atom(
            "text",
            Operator::Equal,
            Value::VarRef("other".to_string()),
        );
        assert_eq!(e.touched_params(), vec!["text".to_string(), "other".to_string()]);
    }
}
