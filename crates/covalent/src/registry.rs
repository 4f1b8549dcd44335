//! Content type registry.
//!
//! Maps header content type names to the view that folds them. The node
//! builds one at startup with the built-in types and applications
//! [`register`](ContentRegistry::register) their own names on top, e.g. a
//! `todo` type that is folded like a map.

use std::collections::BTreeMap;

use covalent_core::content_types;

use crate::error::{NodeError, Result};

/// How transactions of a content type are folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Map,
    List,
    Stream,
    /// Group and account logs.
    Group,
    /// Stored and synced, never folded.
    Opaque,
}

impl ContentKind {
    /// The built-in type whose change format this kind uses.
    pub fn base_type(self) -> &'static str {
        match self {
            ContentKind::Map => content_types::COMAP,
            ContentKind::List => content_types::COLIST,
            ContentKind::Stream => content_types::COSTREAM,
            ContentKind::Group => content_types::GROUP,
            ContentKind::Opaque => "opaque",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentRegistry {
    kinds: BTreeMap<String, ContentKind>,
}

impl Default for ContentRegistry {
    fn default() -> Self {
        let mut kinds = BTreeMap::new();
        kinds.insert(content_types::COMAP.to_string(), ContentKind::Map);
        kinds.insert(content_types::COLIST.to_string(), ContentKind::List);
        kinds.insert(content_types::COSTREAM.to_string(), ContentKind::Stream);
        kinds.insert(content_types::GROUP.to_string(), ContentKind::Group);
        kinds.insert(content_types::ACCOUNT.to_string(), ContentKind::Group);
        Self { kinds }
    }
}

impl ContentRegistry {
    /// Register a custom content type. Built-in names cannot be rebound.
    pub fn register(&mut self, name: impl Into<String>, kind: ContentKind) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(NodeError::InvalidOperation("empty content type name".into()));
        }
        if let Some(existing) = self.kinds.get(&name) {
            if *existing != kind {
                return Err(NodeError::InvalidOperation(format!(
                    "content type {name} is already registered"
                )));
            }
        }
        if kind == ContentKind::Group {
            return Err(NodeError::InvalidOperation(
                "only groups and accounts use the group kind".into(),
            ));
        }
        self.kinds.insert(name, kind);
        Ok(())
    }

    pub fn kind(&self, name: &str) -> Option<ContentKind> {
        self.kinds.get(name).copied()
    }

    /// Kind of `name`; unregistered types are opaque.
    pub fn kind_or_opaque(&self, name: &str) -> ContentKind {
        self.kind(name).unwrap_or(ContentKind::Opaque)
    }

    /// Type name used for structural checks of `name`'s changes.
    pub fn structural_type(&self, name: &str) -> &'static str {
        self.kind_or_opaque(name).base_type()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Forget custom registrations.
    pub fn clear_custom(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let registry = ContentRegistry::default();
        assert_eq!(registry.kind("comap"), Some(ContentKind::Map));
        assert_eq!(registry.kind("account"), Some(ContentKind::Group));
        assert_eq!(registry.kind_or_opaque("blob"), ContentKind::Opaque);
        assert_eq!(registry.structural_type("blob"), "opaque");
    }

    #[test]
    fn test_register_custom() {
        let mut registry = ContentRegistry::default();
        registry.register("todo", ContentKind::Map).unwrap();
        registry.register("todo", ContentKind::Map).unwrap();
        assert_eq!(registry.structural_type("todo"), "comap");

        assert!(registry.register("todo", ContentKind::List).is_err());
        assert!(registry.register("comap", ContentKind::List).is_err());
        assert!(registry.register("team", ContentKind::Group).is_err());
        assert!(registry.register("", ContentKind::Map).is_err());

        registry.clear_custom();
        assert_eq!(registry.kind("todo"), None);
    }
}
