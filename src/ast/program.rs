//! Top-level inputs: programs, permission rules, libraries, datasets,
//! bookkeeping commands, and dialogue states.

use crate::foundation::Span;
use crate::types::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::class_def::{AnnotationMap, ClassDef, FunctionDef};
use super::expression::BooleanExpression;
use super::stream_table::{Action, Stream, Table};
use super::value::Value;

/// Any complete parse result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Input {
    Program(Program),
    Permission(PermissionRule),
    Library(Library),
    Dataset(Dataset),
    Bookkeeping(Bookkeeping),
    DialogueState(DialogueState),
    ControlCommand(ControlCommand),
}

/// An executable program: class definitions plus statements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub classes: Vec<ClassDef>,
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn from_statements(statements: Vec<Statement>) -> Program {
        Program {
            classes: Vec::new(),
            statements,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `stream => [table =>] actions;`
    Rule {
        stream: Stream,
        actions: Vec<Action>,
        span: Option<Span>,
    },
    /// `now => [table =>] actions;`
    Command {
        table: Option<Table>,
        actions: Vec<Action>,
        span: Option<Span>,
    },
    /// `let x = value;`
    Assignment {
        name: String,
        value: Value,
        span: Option<Span>,
    },
    Declaration(Declaration),
    OnInputChoice(OnInputChoice),
}

impl Statement {
    pub fn span(&self) -> Option<Span> {
        match self {
            Statement::Rule { span, .. }
            | Statement::Command { span, .. }
            | Statement::Assignment { span, .. } => *span,
            Statement::Declaration(decl) => decl.span,
            Statement::OnInputChoice(choice) => choice.span,
        }
    }
}

/// `let query name(params) := body;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub params: IndexMap<String, Type>,
    pub body: DeclarationBody,
    pub annotations: AnnotationMap,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeclarationBody {
    Stream(Stream),
    Table(Table),
    Actions(Vec<Action>),
}

impl DeclarationBody {
    pub fn keyword(&self) -> &'static str {
        match self {
            DeclarationBody::Stream(_) => "stream",
            DeclarationBody::Table(_) => "query",
            DeclarationBody::Actions(_) => "action",
        }
    }
}

/// A command suggestion the agent surfaces when the user is asked for
/// input; fires when chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnInputChoice {
    pub table: Option<Table>,
    pub actions: Vec<Action>,
    pub annotations: AnnotationMap,
    pub span: Option<Span>,
}

/// Who may run what: `principal-filter : query => action;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Filter over the principal, checked with `__pi : Entity(tt:contact)`
    /// in scope.
    pub principal: BooleanExpression,
    pub query: PermissionFunction,
    pub action: PermissionFunction,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PermissionFunction {
    /// `now` on the query side, `notify` on the action side.
    Builtin,
    /// Any function of any class.
    Star,
    /// Any function of one class.
    ClassStar(String),
    /// One function, optionally constrained by a filter over its
    /// parameters.
    Specified {
        kind: String,
        channel: String,
        filter: BooleanExpression,
        #[serde(skip)]
        schema: Option<Arc<FunctionDef>>,
    },
}

/// Classes and datasets distributed together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Library {
    pub classes: Vec<ClassDef>,
    pub datasets: Vec<Dataset>,
}

/// Natural-language example templates for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub language: Option<String>,
    pub examples: Vec<Example>,
    pub annotations: AnnotationMap,
    pub span: Option<Span>,
}

/// One example template with typed placeholder parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: Option<i64>,
    pub params: IndexMap<String, Type>,
    pub body: DeclarationBody,
    pub utterances: Vec<String>,
    pub annotations: AnnotationMap,
    pub span: Option<Span>,
}

/// Meta-commands that steer the dialogue rather than execute anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookkeeping {
    pub intent: BookkeepingIntent,
    pub span: Option<Span>,
}

/// Dialogue-level wrapper around the same intents (`$yes;`, `$answer(7);`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub intent: BookkeepingIntent,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookkeepingIntent {
    /// `yes`, `no`, `nevermind`, ... (see [`SPECIAL_COMMANDS`]).
    Special(String),
    /// Pick the n-th choice offered by the agent.
    Choice(i64),
    /// Answer to a slot-filling question.
    Answer(Value),
    /// Answer to a filter question.
    Predicate(BooleanExpression),
}

/// Recognized special bookkeeping commands.
pub const SPECIAL_COMMANDS: &[&str] = &[
    "yes", "no", "failed", "train", "back", "more", "empty", "debug", "maybe", "nevermind",
    "stop", "help", "makerule", "wakeup",
];

/// Full state of a conversation: which policy is driving it, the last
/// dialogue act, and the history of executed and proposed statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueState {
    pub policy: String,
    pub act: String,
    pub act_param: Option<Vec<String>>,
    pub history: Vec<DialogueHistoryItem>,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueHistoryItem {
    pub statement: Statement,
    pub results: Option<DialogueHistoryResultList>,
    pub confirm: Confirm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueHistoryResultList {
    pub results: Vec<DialogueHistoryResultItem>,
    /// Total count, possibly larger than `results.len()`.
    pub count: Value,
    pub more: bool,
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueHistoryResultItem {
    pub value: IndexMap<String, Value>,
}

/// Confirmation state of a history item. Transitions are strictly
/// monotonic: `Proposed -> Accepted -> Confirmed -> ConfirmedAndExecuted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Confirm {
    Proposed,
    Accepted,
    Confirmed,
    ConfirmedAndExecuted,
}

impl Confirm {
    pub fn surface(self) -> &'static str {
        match self {
            Confirm::Proposed => "proposed",
            Confirm::Accepted => "accepted",
            Confirm::Confirmed => "confirmed",
            Confirm::ConfirmedAndExecuted => "confirmed_and_executed",
        }
    }

    pub fn from_surface(text: &str) -> Option<Confirm> {
        Some(match text {
            "proposed" => Confirm::Proposed,
            "accepted" => Confirm::Accepted,
            "confirmed" => Confirm::Confirmed,
            "confirmed_and_executed" => Confirm::ConfirmedAndExecuted,
            _ => return None,
        })
    }

    /// Whether moving to `next` respects monotonicity.
    pub fn can_transition(self, next: Confirm) -> bool {
        next >= self
    }

    /// The next state, saturating at the terminal state.
    pub fn advance(self) -> Confirm {
        match self {
            Confirm::Proposed => Confirm::Accepted,
            Confirm::Accepted => Confirm::Confirmed,
            Confirm::Confirmed | Confirm::ConfirmedAndExecuted => Confirm::ConfirmedAndExecuted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_is_monotonic() {
        assert!(Confirm::Proposed.can_transition(Confirm::Accepted));
        assert!(Confirm::Proposed.can_transition(Confirm::ConfirmedAndExecuted));
        assert!(!Confirm::Confirmed.can_transition(Confirm::Proposed));
        assert!(Confirm::Confirmed.can_transition(Confirm::Confirmed));
    }

    #[test]
    fn confirm_advance_saturates() {
        let mut state = Confirm::Proposed;
        for _ in 0..5 {
            state = state.advance();
        }
        assert_eq!(state, Confirm::ConfirmedAndExecuted);
    }

    #[test]
    fn special_commands_include_the_basics() {
        for cmd in ["yes", "no", "nevermind", "stop"] {
            assert!(SPECIAL_COMMANDS.contains(&cmd));
        }
    }
}
