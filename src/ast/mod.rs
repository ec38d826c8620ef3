//! Abstract syntax tree for ThingTalk.
//!
//! Node families are tagged sums; construction helpers validate arity and
//! kind, traversal is closure-based (no visitor trait hierarchy), and
//! rewrites are functional: transformation passes consume a node and yield
//! a new one, sharing unchanged subtrees.

pub mod class_def;
pub mod expression;
pub mod program;
pub mod slots;
pub mod stream_table;
pub mod strip;
pub mod value;

pub use class_def::{
    AnnotationMap, ArgDirection, ArgumentDef, ClassDef, EntityDecl, FunctionDef, FunctionKind,
    MixinImport,
};
pub use expression::BooleanExpression;
pub use program::{
    Bookkeeping, BookkeepingIntent, Confirm, ControlCommand, Dataset, Declaration,
    DeclarationBody, DialogueHistoryItem, DialogueHistoryResultItem, DialogueHistoryResultList,
    DialogueState, Example, Input, Library, OnInputChoice, PermissionFunction, PermissionRule,
    Program, Statement, SPECIAL_COMMANDS,
};
pub use slots::{iterate_primitives, iterate_slots, Primitive, PrimitiveKind, Slot};
pub use strip::strip_locations;
pub use stream_table::{
    Action, InputParam, Invocation, NotifyKind, Selector, Stream, Table,
};
pub use value::{DateEdge, DateValue, EventRef, LocationValue, TimeValue, Value};
