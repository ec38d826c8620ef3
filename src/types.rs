//! The ThingTalk type system.
//!
//! # Design
//!
//! - `Type` — tagged sum over every ThingTalk type, including `Measure`
//!   with a canonical base unit, nominal `Entity` kinds, and structural
//!   `Compound` records
//! - unit table — display units normalize to SI-style base units; `F` and
//!   `K` convert with offsets, everything else by factor
//! - operator table — `(op, lhs, rhs)` admissibility for filter atoms, and
//!   result types for the scalar expression language used by `compute`
//!
//! Strict `<` and `>` are deliberately absent from the operator set; the
//! surface language only admits `>=` and `<=`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A ThingTalk type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    /// Top type; appears only as an inference sentinel.
    Any,
    Boolean,
    /// String with an optional hint tag (`String(tt:long_free_text)`).
    String(Option<String>),
    Number,
    Currency,
    Location,
    Date,
    Time,
    RecurrentTimeSpec,
    /// Quantity with a canonical base unit (`Measure(C)`, `Measure(ms)`).
    Measure(String),
    /// Closed set of identifier variants.
    Enum(Vec<String>),
    /// Nominal entity kind, `namespace:name`.
    Entity(String),
    Array(Box<Type>),
    /// Ordered record; structural when declared by the caller.
    Compound(IndexMap<String, Field>),
    /// Type variable used by operator overload matching.
    Var(u8),
}

/// One field of a compound record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub ty: Type,
    pub is_input: bool,
    pub required: bool,
}

impl Type {
    pub fn string() -> Type {
        Type::String(None)
    }

    pub fn array(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Number | Type::Currency | Type::Measure(_))
    }

    /// Types admissible on either side of `>=` / `<=`.
    pub fn is_comparable(&self) -> bool {
        matches!(
            self,
            Type::Number
                | Type::Currency
                | Type::Measure(_)
                | Type::Date
                | Type::Time
                | Type::String(_)
        )
    }

    /// True for strings and the string-like builtin entity kinds, which
    /// admit substring operators.
    pub fn is_string_like(&self) -> bool {
        match self {
            Type::String(_) => true,
            Type::Entity(kind) => STRING_LIKE_ENTITIES.contains(&kind.as_str()),
            _ => false,
        }
    }

    /// Least upper bound used when join scopes merge output parameters of
    /// the same name. `None` means the types cannot be reconciled.
    pub fn join(&self, other: &Type) -> Option<Type> {
        if self == other {
            return Some(self.clone());
        }
        match (self, other) {
            (Type::Any, t) | (t, Type::Any) => Some(t.clone()),
            (Type::Number, Type::Currency) | (Type::Currency, Type::Number) => {
                Some(Type::Currency)
            }
            (Type::String(_), Type::String(_)) => Some(Type::string()),
            (Type::Array(a), Type::Array(b)) => Some(Type::array(a.join(b)?)),
            _ => None,
        }
    }
}

/// Can a value of type `actual` flow into a slot of type `formal`?
///
/// Implicit coercions: `Number <: Currency`, hinted string into plain
/// string and back (the hint is advisory), `Any` into anything.
/// Entities are nominal; compounds are width-structural when the formal
/// side declares them.
pub fn assignable(actual: &Type, formal: &Type) -> bool {
    if actual == formal {
        return true;
    }
    match (actual, formal) {
        (Type::Any, _) | (_, Type::Any) => true,
        (Type::Number, Type::Currency) => true,
        (Type::String(_), Type::String(_)) => true,
        (Type::Entity(a), Type::Entity(b)) => a == b,
        (Type::Array(a), Type::Array(b)) => assignable(a, b),
        (Type::Enum(a), Type::Enum(b)) => a.iter().all(|v| b.contains(v)),
        (Type::Compound(af), Type::Compound(ff)) => ff.iter().all(|(name, field)| {
            match af.get(name) {
                Some(actual_field) => assignable(&actual_field.ty, &field.ty),
                None => !field.required,
            }
        }),
        _ => false,
    }
}

/// Match `actual` against a `formal` that may contain [`Type::Var`]s,
/// extending `env`. Each variable unifies with at most one concrete type.
pub fn unify(actual: &Type, formal: &Type, env: &mut [Option<Type>; 4]) -> bool {
    match formal {
        Type::Var(k) => {
            let slot = &mut env[*k as usize];
            match slot {
                None => {
                    *slot = Some(actual.clone());
                    true
                }
                Some(bound) => {
                    if let Some(joined) = actual.join(bound) {
                        *slot = Some(joined);
                        true
                    } else {
                        false
                    }
                }
            }
        }
        Type::Array(f) => match actual {
            Type::Array(a) => unify(a, f, env),
            _ => false,
        },
        _ => assignable(actual, formal),
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "Any"),
            Type::Boolean => write!(f, "Boolean"),
            Type::String(None) => write!(f, "String"),
            Type::String(Some(hint)) => write!(f, "String({hint})"),
            Type::Number => write!(f, "Number"),
            Type::Currency => write!(f, "Currency"),
            Type::Location => write!(f, "Location"),
            Type::Date => write!(f, "Date"),
            Type::Time => write!(f, "Time"),
            Type::RecurrentTimeSpec => write!(f, "RecurrentTimeSpecification"),
            Type::Measure(unit) => write!(f, "Measure({unit})"),
            Type::Enum(variants) => write!(f, "Enum({})", variants.join(",")),
            Type::Entity(kind) => write!(f, "Entity({kind})"),
            Type::Array(elem) => write!(f, "Array({elem})"),
            Type::Compound(fields) => {
                write!(f, "{{")?;
                for (i, (name, field)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {}", field.ty)?;
                }
                write!(f, "}}")
            }
            Type::Var(k) => write!(f, "'{k}"),
        }
    }
}

// === Units ===

/// Built-in entity kinds; everything else comes from class declarations.
pub const BUILTIN_ENTITIES: &[&str] = &[
    "tt:contact",
    "tt:contact_name",
    "tt:username",
    "tt:hashtag",
    "tt:url",
    "tt:phone_number",
    "tt:email_address",
    "tt:path_name",
    "tt:device",
    "tt:function",
    "tt:picture",
];

const STRING_LIKE_ENTITIES: &[&str] = &[
    "tt:username",
    "tt:hashtag",
    "tt:url",
    "tt:path_name",
    "tt:picture",
];

/// (display unit, base unit, factor). `F` and `K` appear with factor 1 and
/// convert through [`normalize_measure`] instead.
const UNITS: &[(&str, &str, f64)] = &[
    // time, base ms
    ("ms", "ms", 1.0),
    ("s", "ms", 1000.0),
    ("min", "ms", 60_000.0),
    ("h", "ms", 3_600_000.0),
    ("day", "ms", 86_400_000.0),
    ("week", "ms", 604_800_000.0),
    ("mon", "ms", 2_592_000_000.0),
    ("year", "ms", 31_536_000_000.0),
    // length, base m
    ("m", "m", 1.0),
    ("km", "m", 1000.0),
    ("mm", "m", 0.001),
    ("cm", "m", 0.01),
    ("mi", "m", 1609.344),
    ("in", "m", 0.0254),
    ("ft", "m", 0.3048),
    // speed, base mps
    ("mps", "mps", 1.0),
    ("kmph", "mps", 0.27777778),
    ("mph", "mps", 0.44704),
    // weight, base kg
    ("kg", "kg", 1.0),
    ("g", "kg", 0.001),
    ("lb", "kg", 0.45359237),
    ("oz", "kg", 0.028349523),
    // temperature, base C (F and K handled with offsets)
    ("C", "C", 1.0),
    ("F", "C", 1.0),
    ("K", "C", 1.0),
    ("defaultTemperature", "C", 1.0),
    // energy, base kcal
    ("kcal", "kcal", 1.0),
    ("kJ", "kcal", 0.239006),
    ("kWh", "kcal", 860.42065),
    // data size, base byte
    ("byte", "byte", 1.0),
    ("KB", "byte", 1000.0),
    ("KiB", "byte", 1024.0),
    ("MB", "byte", 1_000_000.0),
    ("MiB", "byte", 1_048_576.0),
    ("GB", "byte", 1_000_000_000.0),
    ("GiB", "byte", 1_073_741_824.0),
    // power, base W
    ("W", "W", 1.0),
    ("kW", "W", 1000.0),
    // heart rate
    ("bpm", "bpm", 1.0),
];

/// Base unit a display unit normalizes to, or `None` for unknown units.
pub fn base_unit(unit: &str) -> Option<&'static str> {
    UNITS.iter().find(|(u, _, _)| *u == unit).map(|(_, b, _)| *b)
}

/// Convert a parsed measure to its canonical base-unit value.
///
/// Literals carry their display unit but compare by canonical value.
pub fn normalize_measure(value: f64, unit: &str) -> Option<f64> {
    match unit {
        "F" => Some((value - 32.0) / 1.8),
        "K" => Some(value - 273.15),
        _ => UNITS
            .iter()
            .find(|(u, _, _)| *u == unit)
            .map(|(_, _, factor)| value * factor),
    }
}

/// The `defaultTemperature` pseudo-unit resolves to the caller's preferred
/// unit at typecheck time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn unit_name(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
        }
    }
}

// === Operators ===

/// Comparison operators admissible in filter atoms.
///
/// Substring operators (`=~`, `~=`, `~contains`, `~in_array`) compare
/// case- and accent-insensitively on normalized string forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    GreaterEq,
    LessEq,
    /// `=~` — rhs is a substring of lhs.
    Substr,
    /// `~=` — lhs is a substring of rhs.
    RevSubstr,
    Contains,
    ContainsSubstr,
    InArray,
    InArraySubstr,
    StartsWith,
    EndsWith,
    PrefixOf,
    SuffixOf,
}

impl Operator {
    pub fn surface(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::GreaterEq => ">=",
            Operator::LessEq => "<=",
            Operator::Substr => "=~",
            Operator::RevSubstr => "~=",
            Operator::Contains => "contains",
            Operator::ContainsSubstr => "~contains",
            Operator::InArray => "in_array",
            Operator::InArraySubstr => "~in_array",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::PrefixOf => "prefix_of",
            Operator::SuffixOf => "suffix_of",
        }
    }

    pub fn from_surface(text: &str) -> Option<Operator> {
        Some(match text {
            "==" => Operator::Equal,
            ">=" => Operator::GreaterEq,
            "<=" => Operator::LessEq,
            "=~" => Operator::Substr,
            "~=" => Operator::RevSubstr,
            "contains" => Operator::Contains,
            "~contains" => Operator::ContainsSubstr,
            "in_array" => Operator::InArray,
            "~in_array" => Operator::InArraySubstr,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "prefix_of" => Operator::PrefixOf,
            "suffix_of" => Operator::SuffixOf,
            _ => return None,
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.surface())
    }
}

/// Is `lhs op rhs` an admissible filter atom?
///
/// This is the operator overload table of the language, expressed as an
/// admissibility predicate over the two operand types.
pub fn operator_admits(lhs: &Type, op: Operator, rhs: &Type) -> bool {
    match op {
        Operator::Equal => lhs.join(rhs).is_some(),
        Operator::GreaterEq | Operator::LessEq => {
            lhs.is_comparable() && lhs.join(rhs).is_some()
        }
        Operator::Substr => lhs.is_string_like() && matches!(rhs, Type::String(_) | Type::Any),
        Operator::RevSubstr => matches!(lhs, Type::String(_) | Type::Any) && rhs.is_string_like(),
        Operator::Contains => match lhs {
            Type::Array(elem) => elem.join(rhs).is_some(),
            Type::RecurrentTimeSpec => matches!(rhs, Type::Date | Type::Time),
            _ => false,
        },
        Operator::ContainsSubstr => match lhs {
            Type::Array(elem) => elem.is_string_like() && matches!(rhs, Type::String(_)),
            _ => false,
        },
        Operator::InArray => match rhs {
            Type::Array(elem) => lhs.join(elem).is_some(),
            _ => false,
        },
        Operator::InArraySubstr => {
            lhs.is_string_like()
                && matches!(rhs, Type::Array(elem) if matches!(**elem, Type::String(_)))
        }
        Operator::StartsWith | Operator::EndsWith => {
            matches!(lhs, Type::String(_)) && matches!(rhs, Type::String(_))
        }
        Operator::PrefixOf | Operator::SuffixOf => {
            matches!(lhs, Type::String(_)) && matches!(rhs, Type::String(_))
        }
    }
}

// === Scalar expression language ===

/// Result type of a scalar computation, or `None` if no overload matches.
///
/// Used to type `compute` expressions and `Value::Computation` nodes.
pub fn scalar_op_result(op: &str, operands: &[Type]) -> Option<Type> {
    match (op, operands) {
        ("+", [a, b]) => match (a, b) {
            (Type::Number, Type::Number) => Some(Type::Number),
            (Type::Currency, Type::Currency)
            | (Type::Currency, Type::Number)
            | (Type::Number, Type::Currency) => Some(Type::Currency),
            (Type::Measure(u), Type::Measure(v)) if u == v => Some(Type::Measure(u.clone())),
            (Type::String(_), Type::String(_)) => Some(Type::string()),
            (Type::Date, Type::Measure(u)) if u == "ms" => Some(Type::Date),
            (Type::Time, Type::Measure(u)) if u == "ms" => Some(Type::Time),
            _ => None,
        },
        ("-", [a, b]) => match (a, b) {
            (Type::Number, Type::Number) => Some(Type::Number),
            (Type::Currency, Type::Currency) => Some(Type::Currency),
            (Type::Measure(u), Type::Measure(v)) if u == v => Some(Type::Measure(u.clone())),
            (Type::Date, Type::Measure(u)) if u == "ms" => Some(Type::Date),
            (Type::Date, Type::Date) => Some(Type::Measure("ms".to_string())),
            _ => None,
        },
        ("*" | "/", [a, b]) => match (a, b) {
            (Type::Number, Type::Number) => Some(Type::Number),
            (Type::Currency, Type::Number) => Some(Type::Currency),
            (Type::Measure(u), Type::Number) => Some(Type::Measure(u.clone())),
            _ => None,
        },
        ("distance", [Type::Location, Type::Location]) => Some(Type::Measure("m".to_string())),
        ("count", [Type::Array(_)]) => Some(Type::Number),
        ("max" | "min" | "sum", [Type::Array(elem)]) if elem.is_numeric() => {
            Some((**elem).clone())
        }
        ("avg", [Type::Array(elem)]) if elem.is_numeric() => Some((**elem).clone()),
        _ => None,
    }
}

/// Aggregation operators over list tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationOp {
    Count,
    Max,
    Min,
    Sum,
    Avg,
}

impl AggregationOp {
    pub fn surface(self) -> &'static str {
        match self {
            AggregationOp::Count => "count",
            AggregationOp::Max => "max",
            AggregationOp::Min => "min",
            AggregationOp::Sum => "sum",
            AggregationOp::Avg => "avg",
        }
    }

    pub fn from_surface(text: &str) -> Option<AggregationOp> {
        Some(match text {
            "count" => AggregationOp::Count,
            "max" => AggregationOp::Max,
            "min" => AggregationOp::Min,
            "sum" => AggregationOp::Sum,
            "avg" => AggregationOp::Avg,
            _ => return None,
        })
    }

    /// `count` accepts any field; the others require a numeric-ish one.
    pub fn admits(self, field_ty: &Type) -> bool {
        match self {
            AggregationOp::Count => true,
            AggregationOp::Max | AggregationOp::Min => {
                field_ty.is_numeric() || matches!(field_ty, Type::Date | Type::Time)
            }
            AggregationOp::Sum | AggregationOp::Avg => field_ty.is_numeric(),
        }
    }

    /// Type of the aggregated column.
    pub fn result_type(self, field_ty: &Type) -> Type {
        match self {
            AggregationOp::Count => Type::Number,
            _ => field_ty.clone(),
        }
    }
}

impl fmt::Display for AggregationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.surface())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn surface(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_flows_into_currency() {
        assert!(assignable(&Type::Number, &Type::Currency));
        assert!(!assignable(&Type::Currency, &Type::Number));
    }

    #[test]
    fn hinted_string_is_a_string() {
        let hinted = Type::String(Some("tt:long_free_text".to_string()));
        assert!(assignable(&hinted, &Type::string()));
        assert!(assignable(&Type::string(), &hinted));
    }

    #[test]
    fn entities_are_nominal() {
        let song = Type::Entity("com.spotify:song".to_string());
        let artist = Type::Entity("com.spotify:artist".to_string());
        assert!(assignable(&song, &song.clone()));
        assert!(!assignable(&song, &artist));
    }

    #[test]
    fn measure_normalization() {
        assert_eq!(normalize_measure(1.0, "km"), Some(1000.0));
        assert_eq!(normalize_measure(32.0, "F"), Some(0.0));
        assert_eq!(normalize_measure(273.15, "K"), Some(0.0));
        assert_eq!(normalize_measure(1.0, "parsec"), None);
    }

    #[test]
    fn default_temperature_is_a_temperature() {
        assert_eq!(base_unit("defaultTemperature"), Some("C"));
    }

    #[test]
    fn overload_table_admits_and_rejects() {
        let s = Type::string();
        let n = Type::Number;
        assert!(operator_admits(&s, Operator::Substr, &s));
        assert!(!operator_admits(&n, Operator::Substr, &s));
        assert!(operator_admits(
            &Type::array(s.clone()),
            Operator::Contains,
            &s
        ));
        assert!(operator_admits(&n, Operator::InArray, &Type::array(n.clone())));
        assert!(!operator_admits(&n, Operator::InArray, &n));
        // Number compares against Currency through the implicit coercion.
        assert!(operator_admits(&Type::Currency, Operator::GreaterEq, &n));
    }

    #[test]
    fn enum_width_subtyping() {
        let small = Type::Enum(vec!["asc".into()]);
        let big = Type::Enum(vec!["asc".into(), "desc".into()]);
        assert!(assignable(&small, &big));
        assert!(!assignable(&big, &small));
    }

    #[test]
    fn scalar_ops() {
        assert_eq!(
            scalar_op_result("distance", &[Type::Location, Type::Location]),
            Some(Type::Measure("m".to_string()))
        );
        assert_eq!(
            scalar_op_result("count", &[Type::array(Type::string())]),
            Some(Type::Number)
        );
        assert_eq!(scalar_op_result("+", &[Type::Number, Type::string()]), None);
        assert_eq!(
            scalar_op_result("+", &[Type::Date, Type::Measure("ms".to_string())]),
            Some(Type::Date)
        );
    }

    #[test]
    fn aggregation_rules() {
        assert!(AggregationOp::Count.admits(&Type::string()));
        assert!(AggregationOp::Avg.admits(&Type::Measure("C".to_string())));
        assert!(!AggregationOp::Sum.admits(&Type::string()));
        assert_eq!(AggregationOp::Count.result_type(&Type::string()), Type::Number);
    }

    #[test]
    fn unify_binds_type_vars() {
        let mut env: [Option<Type>; 4] = Default::default();
        assert!(unify(&Type::Number, &Type::Var(0), &mut env));
        assert!(unify(&Type::Number, &Type::Var(0), &mut env));
        assert_eq!(env[0], Some(Type::Number));
        // A conflicting binding fails unless the types join.
        assert!(!unify(&Type::string(), &Type::Var(0), &mut env));
    }

    #[test]
    fn compound_width_structural() {
        let mut declared = IndexMap::new();
        declared.insert(
            "lat".to_string(),
            Field { ty: Type::Number, is_input: true, required: true },
        );
        let mut actual = IndexMap::new();
        actual.insert(
            "lat".to_string(),
            Field { ty: Type::Number, is_input: true, required: true },
        );
        actual.insert(
            "lon".to_string(),
            Field { ty: Type::Number, is_input: true, required: false },
        );
        assert!(assignable(&Type::Compound(actual), &Type::Compound(declared)));
    }
}
