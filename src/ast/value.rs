//! Value nodes: every literal and computed value form of the language.

use crate::types::{self, Type};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::expression::BooleanExpression;

/// A ThingTalk value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    String(String),
    Number(f64),
    /// Quantity with the display unit it was written in; comparisons use
    /// the canonical base-unit value.
    Measure { value: f64, unit: String },
    Currency { value: f64, code: String },
    Date(DateValue),
    Time(TimeValue),
    Location(LocationValue),
    Entity {
        value: Option<String>,
        kind: String,
        display: Option<String>,
    },
    Enum(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    /// Reference to an in-scope output parameter or declaration parameter.
    VarRef(String),
    /// `$event`, `$event.type`, `$event.program_id`.
    Event(EventRef),
    /// `$context.<name>` with the type the context slot carries.
    ContextRef { name: String, ty: Type },
    /// Scalar expression, e.g. `distance(geo, $context.location.home)`.
    Computation { op: String, operands: Vec<Value> },
    /// Projection of a field out of an array of compounds.
    ArrayField { value: Box<Value>, field: String },
    /// Array filtered by a predicate over its elements.
    Filter {
        value: Box<Value>,
        filter: Box<BooleanExpression>,
    },
    /// A hole to be slot-filled. `slot_fillable` is always true in ASTs
    /// produced by this toolchain; `false` never appears.
    Undefined { slot_fillable: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DateValue {
    /// `null` date, meaning "now".
    Now,
    Absolute(DateTime<Utc>),
    Edge { edge: DateEdge, unit: String },
    Piece {
        year: Option<i32>,
        month: Option<u32>,
        day: Option<u32>,
        time: Option<TimeValue>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateEdge {
    StartOf,
    EndOf,
}

impl DateEdge {
    pub fn surface(self) -> &'static str {
        match self {
            DateEdge::StartOf => "start_of",
            DateEdge::EndOf => "end_of",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeValue {
    Absolute { hour: u8, minute: u8, second: u8 },
    /// `$time.morning`, `$time.evening`.
    Relative(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocationValue {
    Absolute {
        lat: f64,
        lon: f64,
        display: Option<String>,
    },
    /// `$location.home`, `$location.work`, `$location.current_location`.
    Relative(String),
    /// Named place not yet resolved to coordinates.
    Unresolved(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventRef {
    /// `$event` — the formatted result of the current rule.
    Content,
    Type,
    ProgramId,
}

impl Value {
    /// An empty, fillable slot.
    pub fn undefined() -> Value {
        Value::Undefined { slot_fillable: true }
    }

    pub fn entity(value: impl Into<String>, kind: impl Into<String>, display: Option<String>) -> Value {
        Value::Entity {
            value: Some(value.into()),
            kind: kind.into(),
            display,
        }
    }

    /// True when the value contains no holes and no variable references,
    /// i.e. it can be executed as-is.
    pub fn is_concrete(&self) -> bool {
        match self {
            Value::Undefined { .. } | Value::VarRef(_) | Value::Event(_) => false,
            Value::ContextRef { .. } => false,
            Value::Array(values) => values.iter().all(Value::is_concrete),
            Value::Object(fields) => fields.values().all(Value::is_concrete),
            Value::Computation { operands, .. } => operands.iter().all(Value::is_concrete),
            Value::ArrayField { value, .. } => value.is_concrete(),
            Value::Filter { value, .. } => value.is_concrete(),
            Value::Entity { value, .. } => value.is_some(),
            Value::Location(LocationValue::Unresolved(_)) => false,
            _ => true,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined { .. })
    }

    /// The type of a concrete value, when it is independent of context.
    ///
    /// `VarRef`, `Computation`, `ArrayField` and `Filter` values type
    /// against the enclosing scope and return `Type::Any` here; the
    /// typechecker refines them.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Boolean(_) => Type::Boolean,
            Value::String(_) => Type::string(),
            Value::Number(_) => Type::Number,
            Value::Measure { unit, .. } => {
                let base = types::base_unit(unit).unwrap_or("ms");
                Type::Measure(base.to_string())
            }
            Value::Currency { .. } => Type::Currency,
            Value::Date(_) => Type::Date,
            Value::Time(_) => Type::Time,
            Value::Location(_) => Type::Location,
            Value::Entity { kind, .. } => Type::Entity(kind.clone()),
            Value::Enum(variant) => Type::Enum(vec![variant.clone()]),
            Value::Array(values) => {
                let elem = values
                    .first()
                    .map(Value::type_of)
                    .unwrap_or(Type::Any);
                Type::array(elem)
            }
            Value::Object(_) => Type::Any,
            Value::VarRef(_) => Type::Any,
            Value::Event(EventRef::Content) => Type::string(),
            Value::Event(EventRef::Type) => Type::Entity("tt:function".to_string()),
            Value::Event(EventRef::ProgramId) => Type::Entity("tt:program_id".to_string()),
            Value::ContextRef { ty, .. } => ty.clone(),
            Value::Computation { .. } => Type::Any,
            Value::ArrayField { .. } => Type::Any,
            Value::Filter { .. } => Type::Any,
            Value::Undefined { .. } => Type::Any,
        }
    }

    /// Canonical base-unit magnitude for measures, used when comparing or
    /// hashing measure literals.
    pub fn canonical_measure(&self) -> Option<f64> {
        match self {
            Value::Measure { value, unit } => types::normalize_measure(*value, unit),
            _ => None,
        }
    }

    /// Visit this value and every nested value, pre-order.
    pub fn walk<V: FnMut(&Value)>(&self, visitor: &mut V) {
        visitor(self);
        match self {
            Value::Array(values) => {
                for v in values {
                    v.walk(visitor);
                }
            }
            Value::Object(fields) => {
                for v in fields.values() {
                    v.walk(visitor);
                }
            }
            Value::Computation { operands, .. } => {
                for v in operands {
                    v.walk(visitor);
                }
            }
            Value::ArrayField { value, .. } | Value::Filter { value, .. } => {
                value.walk(visitor);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_type_uses_base_unit() {
        let v = Value::Measure { value: 5.0, unit: "kWh".to_string() };
        assert_eq!(v.type_of(), Type::Measure("kcal".to_string()));
        let canonical = v.canonical_measure().unwrap();
        assert!((canonical - 4302.1).abs() < 1.0);
    }

    #[test]
    fn undefined_is_not_concrete() {
        assert!(!Value::undefined().is_concrete());
        assert!(Value::Number(42.0).is_concrete());
        assert!(!Value::Array(vec![Value::Number(1.0), Value::undefined()]).is_concrete());
    }

    #[test]
    fn walk_visits_nested_values() {
        let v = Value::Computation {
            op: "+".to_string(),
            operands: vec![
                Value::Number(1.0),
                Value::Array(vec![Value::Number(2.0)]),
            ],
        };
        let mut count = 0;
        v.walk(&mut |_| count += 1);
        assert_eq!(count, 4);
    }

    #[test]
    fn entity_without_value_is_unresolved() {
        let e = Value::Entity {
            value: None,
            kind: "tt:phone_number".to_string(),
            display: Some("mom".to_string()),
        };
        assert!(!e.is_concrete());
    }
}
