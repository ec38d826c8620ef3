//! Persistent scope environments.
//!
//! Scopes are immutable linked chains: binding returns a new scope that
//! shares its tail with the old one, so sibling traversals (the two sides
//! of a join, independent statements) extend a common prefix without
//! copying it. Lookup is O(depth), which is fine at ThingTalk program
//! sizes.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::types::Type;

#[derive(Debug, Clone, Default)]
pub struct Scope(Option<Arc<Node>>);

#[derive(Debug)]
struct Node {
    name: String,
    ty: Type,
    parent: Scope,
}

impl Scope {
    pub fn empty() -> Scope {
        Scope(None)
    }

    /// New scope with one extra binding; the receiver is unchanged.
    pub fn bind(&self, name: impl Into<String>, ty: Type) -> Scope {
        Scope(Some(Arc::new(Node {
            name: name.into(),
            ty,
            parent: self.clone(),
        })))
    }

    pub fn bind_all<I: IntoIterator<Item = (String, Type)>>(&self, bindings: I) -> Scope {
        let mut scope = self.clone();
        for (name, ty) in bindings {
            scope = scope.bind(name, ty);
        }
        scope
    }

    /// Innermost binding for `name`.
    pub fn lookup(&self, name: &str) -> Option<&Type> {
        let mut current = self;
        while let Some(node) = &current.0 {
            if node.name == name {
                return Some(&node.ty);
            }
            current = &node.parent;
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Flatten to a map, innermost bindings winning, in outermost-first
    /// order. Used when a whole scope must be merged or compared.
    pub fn to_map(&self) -> IndexMap<String, Type> {
        let mut reversed = Vec::new();
        let mut current = self;
        while let Some(node) = &current.0 {
            reversed.push((node.name.clone(), node.ty.clone()));
            current = &node.parent;
        }
        let mut map = IndexMap::new();
        for (name, ty) in reversed.into_iter().rev() {
            map.insert(name, ty);
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_is_persistent() {
        let base = Scope::empty().bind("a", Type::Number);
        let extended = base.bind("b", Type::string());
        assert!(extended.contains("a"));
        assert!(extended.contains("b"));
        assert!(!base.contains("b"));
    }

    #[test]
    fn inner_bindings_shadow() {
        let scope = Scope::empty()
            .bind("x", Type::Number)
            .bind("x", Type::string());
        assert_eq!(scope.lookup("x"), Some(&Type::string()));
        let map = scope.to_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["x"], Type::string());
    }
}
