//! Field schemas for map-kind CoValues.
//!
//! A [`Schema`] names the fields a map is expected to hold and their types.
//! Reference fields point at other CoValues and carry the schema of the
//! target behind a [`LazyRef`], so schemas can refer to each other or to
//! themselves:
//!
//! ```rust
//! use std::sync::Arc;
//! use covalent::{FieldType, LazyRef, Schema};
//!
//! fn person() -> Arc<Schema> {
//!     Arc::new(
//!         Schema::new("person")
//!             .field("name", FieldType::Str)
//!             .optional("bestFriend", FieldType::Ref(LazyRef::new(person))),
//!     )
//! }
//!
//! let schema = person();
//! assert_eq!(schema.name(), "person");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use covalent_core::CoValueId;
use serde_json::Value;

use crate::handles::MapHandle;
use crate::lazy::LazyRef;

/// Type of one field.
#[derive(Debug, Clone)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    /// Any JSON value.
    Json,
    /// Id of a map following the target schema.
    Ref(LazyRef<Arc<Schema>>),
    /// Id of a list whose items are ids of maps following the target schema.
    RefList(LazyRef<Arc<Schema>>),
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::Json => "json",
            FieldType::Ref(_) => "ref",
            FieldType::RefList(_) => "refList",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Bool => value.is_boolean(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Str => value.is_string(),
            FieldType::Json => true,
            FieldType::Ref(_) | FieldType::RefList(_) => value
                .as_str()
                .is_some_and(|s| s.parse::<CoValueId>().is_ok()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct Field {
    ty: FieldType,
    optional: bool,
}

/// A field that does not match its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub problem: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// A reference found while walking a map with its schema.
#[derive(Debug, Clone)]
pub enum SchemaRef {
    Map(CoValueId, Arc<Schema>),
    List(CoValueId, Arc<Schema>),
}

impl SchemaRef {
    pub fn id(&self) -> CoValueId {
        match self {
            SchemaRef::Map(id, _) | SchemaRef::List(id, _) => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: BTreeMap<String, Field>,
    open: bool,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            open: true,
        }
    }

    /// A required field.
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(name.into(), Field { ty, optional: false });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(name.into(), Field { ty, optional: true });
        self
    }

    /// Reject keys the schema does not name.
    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name).map(|f| &f.ty)
    }

    pub fn violations(&self, map: &MapHandle) -> Vec<Violation> {
        let mut found = Vec::new();
        for (name, field) in &self.fields {
            match map.get(name) {
                None if field.optional => {}
                None => found.push(Violation {
                    field: name.clone(),
                    problem: "missing".into(),
                }),
                Some(value) if !field.ty.accepts(value) => found.push(Violation {
                    field: name.clone(),
                    problem: format!("expected {}, got {value}", field.ty),
                }),
                Some(_) => {}
            }
        }
        if !self.open {
            found.extend(
                map.keys()
                    .filter(|key| !self.fields.contains_key(*key))
                    .map(|key| Violation {
                        field: key.to_string(),
                        problem: "not in schema".into(),
                    }),
            );
        }
        found
    }

    /// References held by `map`, each with the schema of its target.
    pub fn refs(&self, map: &MapHandle) -> Vec<SchemaRef> {
        self.fields
            .iter()
            .filter_map(|(name, field)| {
                let id = map.get_ref(name)?;
                match &field.ty {
                    FieldType::Ref(target) => Some(SchemaRef::Map(id, Arc::clone(target.get()))),
                    FieldType::RefList(target) => {
                        Some(SchemaRef::List(id, Arc::clone(target.get())))
                    }
                    _ => None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covalent_core::{AgentSecret, SessionId, TransactionId};
    use covalent_crdt::{CoMap, DecodedTx, MapOp};
    use serde_json::json;

    fn person() -> Arc<Schema> {
        Arc::new(
            Schema::new("person")
                .field("name", FieldType::Str)
                .optional("age", FieldType::Int)
                .optional("friend", FieldType::Ref(LazyRef::new(person))),
        )
    }

    fn handle(changes: Vec<Value>) -> MapHandle {
        let session = SessionId::new(None, AgentSecret::from_seed(&[1; 32]).agent_id(), 1);
        let tx = DecodedTx {
            id: TransactionId::new(session, 0),
            made_at: 1,
            changes,
            meta: None,
        };
        MapHandle::new(
            CoValueId::from_bytes([9; 32]),
            "comap".into(),
            Arc::new(CoMap::from_transactions([&tx])),
        )
    }

    #[test]
    fn test_violations() {
        let schema = person();
        let ok = handle(vec![MapOp::set("name", "ada").to_value()]);
        assert!(schema.violations(&ok).is_empty());

        let bad = handle(vec![
            MapOp::set("age", "old").to_value(),
            MapOp::set("extra", true).to_value(),
        ]);
        let problems = schema.violations(&bad);
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|v| v.field == "name" && v.problem == "missing"));

        let closed = Schema::new("strict").field("age", FieldType::Json).closed();
        assert_eq!(closed.violations(&bad).len(), 1);
    }

    #[test]
    fn test_refs_resolve_recursive_schema() {
        let friend = CoValueId::from_bytes([3; 32]);
        let map = handle(vec![
            MapOp::set("name", "bob").to_value(),
            MapOp::set("friend", json!(friend.to_string())).to_value(),
        ]);
        let schema = person();
        let refs = schema.refs(&map);
        assert_eq!(refs.len(), 1);
        match &refs[0] {
            SchemaRef::Map(id, target) => {
                assert_eq!(*id, friend);
                assert_eq!(target.name(), "person");
                assert_eq!(target.field_type("friend").map(FieldType::as_str), Some("ref"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
