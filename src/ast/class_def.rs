//! Class (skill) and function definitions.
//!
//! A class groups the queries and actions of one third-party service.
//! Function definitions are the schemas the typechecker binds invocations
//! against; they live outside the program AST and are shared by `Arc`.

use crate::foundation::Span;
use crate::types::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::value::Value;

/// Natural-language (`#_[...]`) and implementation (`#[...]`) annotations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationMap {
    pub nl: IndexMap<String, Value>,
    pub impl_: IndexMap<String, Value>,
}

impl AnnotationMap {
    pub fn is_empty(&self) -> bool {
        self.nl.is_empty() && self.impl_.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Query,
    Action,
}

impl FunctionKind {
    pub fn surface(self) -> &'static str {
        match self {
            FunctionKind::Query => "query",
            FunctionKind::Action => "action",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgDirection {
    InReq,
    InOpt,
    Out,
}

impl ArgDirection {
    pub fn is_input(self) -> bool {
        matches!(self, ArgDirection::InReq | ArgDirection::InOpt)
    }

    pub fn surface(self) -> &'static str {
        match self {
            ArgDirection::InReq => "in req",
            ArgDirection::InOpt => "in opt",
            ArgDirection::Out => "out",
        }
    }
}

/// One declared parameter of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDef {
    pub name: String,
    pub direction: ArgDirection,
    pub ty: Type,
    pub annotations: AnnotationMap,
}

impl ArgumentDef {
    pub fn new(name: impl Into<String>, direction: ArgDirection, ty: Type) -> ArgumentDef {
        ArgumentDef {
            name: name.into(),
            direction,
            ty,
            annotations: AnnotationMap::default(),
        }
    }
}

/// Schema of one query or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub kind: FunctionKind,
    pub name: String,
    /// Owning class kind, e.g. `com.twitter`.
    pub class_name: Option<String>,
    pub args: IndexMap<String, ArgumentDef>,
    /// Queries returning multiple rows; required for sort/index/slice and
    /// aggregation.
    pub is_list: bool,
    /// Whether `monitor` may wrap this query.
    pub is_monitorable: bool,
    /// Parameters every projection must retain. Defaults to `["id"]` when
    /// an `id` output exists and the annotation is absent.
    pub minimal_projection: Option<Vec<String>>,
    pub annotations: AnnotationMap,
    pub span: Option<Span>,
}

impl FunctionDef {
    pub fn new(kind: FunctionKind, name: impl Into<String>) -> FunctionDef {
        FunctionDef {
            kind,
            name: name.into(),
            class_name: None,
            args: IndexMap::new(),
            is_list: false,
            is_monitorable: false,
            minimal_projection: None,
            annotations: AnnotationMap::default(),
            span: None,
        }
    }

    pub fn with_args(mut self, args: Vec<ArgumentDef>) -> FunctionDef {
        for arg in args {
            self.args.insert(arg.name.clone(), arg);
        }
        self
    }

    pub fn arg(&self, name: &str) -> Option<&ArgumentDef> {
        self.args.get(name)
    }

    pub fn input_args(&self) -> impl Iterator<Item = &ArgumentDef> {
        self.args.values().filter(|a| a.direction.is_input())
    }

    pub fn output_args(&self) -> impl Iterator<Item = &ArgumentDef> {
        self.args
            .values()
            .filter(|a| a.direction == ArgDirection::Out)
    }

    /// Effective minimal projection: the annotation if present, otherwise
    /// `[id]` when an `id` output parameter exists.
    pub fn effective_minimal_projection(&self) -> Vec<String> {
        if let Some(explicit) = &self.minimal_projection {
            return explicit.clone();
        }
        match self.args.get("id") {
            Some(arg) if arg.direction == ArgDirection::Out => vec!["id".to_string()],
            _ => Vec::new(),
        }
    }

    /// `@class.name`, or just the name for detached schemas.
    pub fn qualified_name(&self) -> String {
        match &self.class_name {
            Some(class) => format!("@{class}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Entity kind declared inside a class (`entity song #_[...]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDecl {
    pub name: String,
    pub annotations: AnnotationMap,
}

/// `import loader from @org.thingpedia.v2()` — carried through as an
/// annotation-only node; loader semantics belong to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixinImport {
    pub facets: Vec<String>,
    pub module: String,
    pub in_params: Vec<super::stream_table::InputParam>,
}

/// Definition of one Thingpedia class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub kind: String,
    pub extends: Vec<String>,
    pub imports: Vec<MixinImport>,
    pub entities: Vec<EntityDecl>,
    pub queries: IndexMap<String, FunctionDef>,
    pub actions: IndexMap<String, FunctionDef>,
    pub annotations: AnnotationMap,
    pub span: Option<Span>,
}

impl ClassDef {
    pub fn new(kind: impl Into<String>) -> ClassDef {
        ClassDef {
            kind: kind.into(),
            extends: Vec::new(),
            imports: Vec::new(),
            entities: Vec::new(),
            queries: IndexMap::new(),
            actions: IndexMap::new(),
            annotations: AnnotationMap::default(),
            span: None,
        }
    }

    /// Register a function, filling in its owning class name.
    pub fn add_function(&mut self, mut def: FunctionDef) {
        def.class_name = Some(self.kind.clone());
        match def.kind {
            FunctionKind::Query => self.queries.insert(def.name.clone(), def),
            FunctionKind::Action => self.actions.insert(def.name.clone(), def),
        };
    }

    pub fn get_function(&self, kind: FunctionKind, name: &str) -> Option<&FunctionDef> {
        match kind {
            FunctionKind::Query => self.queries.get(name),
            FunctionKind::Action => self.actions.get(name),
        }
    }

    /// Fully qualified names of entity kinds this class declares.
    pub fn entity_kinds(&self) -> Vec<String> {
        self.entities
            .iter()
            .map(|e| format!("{}:{}", self.kind, e.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_projection_defaults_to_id() {
        let def = FunctionDef::new(FunctionKind::Query, "list_drive_files").with_args(vec![
            ArgumentDef::new("id", ArgDirection::Out, Type::Entity("com.google.drive:file_id".into())),
            ArgumentDef::new("file_name", ArgDirection::Out, Type::string()),
        ]);
        assert_eq!(def.effective_minimal_projection(), vec!["id".to_string()]);

        let no_id = FunctionDef::new(FunctionKind::Query, "get_comic").with_args(vec![
            ArgumentDef::new("title", ArgDirection::Out, Type::string()),
        ]);
        assert!(no_id.effective_minimal_projection().is_empty());
    }

    #[test]
    fn class_function_registration() {
        let mut class = ClassDef::new("com.twitter");
        class.add_function(FunctionDef::new(FunctionKind::Action, "post"));
        let post = class.get_function(FunctionKind::Action, "post").unwrap();
        assert_eq!(post.class_name.as_deref(), Some("com.twitter"));
        assert_eq!(post.qualified_name(), "@com.twitter.post");
    }

    #[test]
    fn entity_kinds_are_qualified() {
        let mut class = ClassDef::new("com.spotify");
        class.entities.push(EntityDecl {
            name: "song".to_string(),
            annotations: AnnotationMap::default(),
        });
        assert_eq!(class.entity_kinds(), vec!["com.spotify:song".to_string()]);
    }
}
