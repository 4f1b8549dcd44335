//! Proptest generators for covalent types.

use proptest::prelude::*;
use serde_json::Value;

use covalent_core::{AgentId, AgentSecret, CoValueId, KnownState, SessionId};

/// Agents from a small seed space, so sessions collide across cases.
pub fn agent_id() -> impl Strategy<Value = AgentId> {
    (0u8..8).prop_map(|seed| AgentSecret::from_seed(&[seed; 32]).agent_id())
}

pub fn covalue_id() -> impl Strategy<Value = CoValueId> {
    any::<[u8; 32]>().prop_map(CoValueId::from_bytes)
}

pub fn session_id() -> impl Strategy<Value = SessionId> {
    (agent_id(), 0u64..4).prop_map(|(agent, nonce)| SessionId::new(None, agent, nonce))
}

/// Known states of one fixed CoValue.
pub fn known_state() -> impl Strategy<Value = KnownState> {
    (any::<bool>(), prop::collection::btree_map(session_id(), 0u32..20, 0..5)).prop_map(
        |(header, sessions)| KnownState {
            id: CoValueId::from_bytes([7; 32]),
            header,
            sessions,
        },
    )
}

/// JSON leaves that maps and lists store.
pub fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

/// One edit in a map script.
#[derive(Debug, Clone)]
pub enum ScriptEdit {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl ScriptEdit {
    pub fn key(&self) -> &str {
        match self {
            ScriptEdit::Set { key, .. } | ScriptEdit::Delete { key } => key,
        }
    }
}

pub fn script_edit() -> impl Strategy<Value = ScriptEdit> {
    let key = prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(String::from);
    prop_oneof![
        3 => (key.clone(), json_leaf()).prop_map(|(key, value)| ScriptEdit::Set { key, value }),
        1 => key.prop_map(|key| ScriptEdit::Delete { key }),
    ]
}

/// Edits by two writers, each applied in order on its own replica.
#[derive(Debug, Clone)]
pub struct MapScript {
    pub first: Vec<ScriptEdit>,
    pub second: Vec<ScriptEdit>,
}

impl Arbitrary for MapScript {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            prop::collection::vec(script_edit(), 0..8),
            prop::collection::vec(script_edit(), 0..8),
        )
            .prop_map(|(first, second)| MapScript { first, second })
            .boxed()
    }
}

/// Operations on a list by position, clamped to the current length when
/// applied.
#[derive(Debug, Clone)]
pub enum ListStep {
    Push(Value),
    Prepend(Value),
    InsertAfter(usize, Value),
    Remove(usize),
}

pub fn list_step() -> impl Strategy<Value = ListStep> {
    prop_oneof![
        3 => json_leaf().prop_map(ListStep::Push),
        1 => json_leaf().prop_map(ListStep::Prepend),
        2 => (0usize..16, json_leaf()).prop_map(|(i, v)| ListStep::InsertAfter(i, v)),
        1 => (0usize..16).prop_map(ListStep::Remove),
    ]
}

pub fn list_script() -> impl Strategy<Value = Vec<ListStep>> {
    prop::collection::vec(list_step(), 1..12)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn script_keys_stay_small(script in any::<MapScript>()) {
            for edit in script.first.iter().chain(&script.second) {
                prop_assert!(["a", "b", "c", "d"].contains(&edit.key()));
            }
        }

        #[test]
        fn covalue_id_text_round_trips(id in covalue_id()) {
            prop_assert_eq!(id.to_string().parse::<CoValueId>().unwrap(), id);
        }
    }
}
