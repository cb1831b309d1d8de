//! Change records produced by tree mutations.
//!
//! Changes are recorded with client ids already resolved, so a change is
//! self-contained once it sits in the pending buffer.

use crate::constants::ConstantPool;
use crate::node::{NodeFeatureType, NodeId};
use crate::protocol::NODE_REF_KEY;
use serde_json::{Map, Value, json};

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeValue {
    Json(Value),
    Node(NodeId),
    Constant(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeChange {
    Attach {
        node: NodeId,
    },
    Detach {
        node: NodeId,
    },
    MapPut {
        node: NodeId,
        feature: NodeFeatureType,
        key: String,
        value: ChangeValue,
    },
    MapRemove {
        node: NodeId,
        feature: NodeFeatureType,
        key: String,
    },
    ListSplice {
        node: NodeId,
        feature: NodeFeatureType,
        index: usize,
        removed: usize,
        added: Vec<ChangeValue>,
    },
    ListClear {
        node: NodeId,
        feature: NodeFeatureType,
    },
}

impl NodeChange {
    pub fn node(&self) -> NodeId {
        match self {
            Self::Attach { node }
            | Self::Detach { node }
            | Self::MapPut { node, .. }
            | Self::MapRemove { node, .. }
            | Self::ListSplice { node, .. }
            | Self::ListClear { node, .. } => *node,
        }
    }

    pub fn feature(&self) -> Option<NodeFeatureType> {
        match self {
            Self::Attach { .. } | Self::Detach { .. } => None,
            Self::MapPut { feature, .. }
            | Self::MapRemove { feature, .. }
            | Self::ListSplice { feature, .. }
            | Self::ListClear { feature, .. } => Some(*feature),
        }
    }

    /// Encodes the change in its wire form. Constant values are interned in
    /// `constants` and referenced by key.
    pub fn to_json(&self, constants: &mut ConstantPool) -> Value {
        let mut out = Map::new();
        out.insert("node".into(), json!(self.node()));

        match self {
            Self::Attach { .. } => {
                out.insert("type".into(), json!("attach"));
            }
            Self::Detach { .. } => {
                out.insert("type".into(), json!("detach"));
            }
            Self::MapPut {
                feature,
                key,
                value,
                ..
            } => {
                out.insert("type".into(), json!("put"));
                out.insert("feat".into(), json!(feature.wire_id()));
                out.insert("key".into(), json!(key));
                match value {
                    ChangeValue::Json(value) => {
                        out.insert("value".into(), value.clone());
                    }
                    ChangeValue::Constant(value) => {
                        let key = constants.intern(value);
                        out.insert("value".into(), Value::String(key));
                    }
                    ChangeValue::Node(child) => {
                        out.insert("nodeValue".into(), json!(child));
                    }
                }
            }
            Self::MapRemove { feature, key, .. } => {
                out.insert("type".into(), json!("remove"));
                out.insert("feat".into(), json!(feature.wire_id()));
                out.insert("key".into(), json!(key));
            }
            Self::ListSplice {
                feature,
                index,
                removed,
                added,
                ..
            } => {
                out.insert("type".into(), json!("splice"));
                out.insert("feat".into(), json!(feature.wire_id()));
                out.insert("index".into(), json!(index));
                if *removed > 0 {
                    out.insert("remove".into(), json!(removed));
                }
                if !added.is_empty() {
                    encode_added(&mut out, added, constants);
                }
            }
            Self::ListClear { feature, .. } => {
                out.insert("type".into(), json!("clear"));
                out.insert("feat".into(), json!(feature.wire_id()));
            }
        }

        Value::Object(out)
    }
}

/// All-node additions go out as `addNodes`. Anything else goes out as `add`,
/// where node entries are tagged `{"@node": id}` so they stay distinguishable
/// from plain numbers.
fn encode_added(out: &mut Map<String, Value>, added: &[ChangeValue], constants: &mut ConstantPool) {
    let node_ids: Option<Vec<Value>> = added
        .iter()
        .map(|value| match value {
            ChangeValue::Node(id) => Some(json!(id)),
            _ => None,
        })
        .collect();
    if let Some(ids) = node_ids {
        out.insert("addNodes".into(), Value::Array(ids));
        return;
    }

    let values = added
        .iter()
        .map(|value| match value {
            ChangeValue::Json(value) => value.clone(),
            ChangeValue::Constant(value) => Value::String(constants.intern(value)),
            ChangeValue::Node(id) => json!({ NODE_REF_KEY: id }),
        })
        .collect();
    out.insert("add".into(), Value::Array(values));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_of_node_uses_node_value_key() {
        let mut pool = ConstantPool::default();
        let change = NodeChange::MapPut {
            node: NodeId(3),
            feature: NodeFeatureType::ElementProperties,
            key: "child".into(),
            value: ChangeValue::Node(NodeId(7)),
        };

        let encoded = change.to_json(&mut pool);
        assert_eq!(
            encoded,
            json!({"node": 3, "type": "put", "feat": 1, "key": "child", "nodeValue": 7})
        );
    }

    #[test]
    fn splice_omits_empty_remove_and_add() {
        let mut pool = ConstantPool::default();
        let change = NodeChange::ListSplice {
            node: NodeId(1),
            feature: NodeFeatureType::ClassList,
            index: 2,
            removed: 0,
            added: vec![],
        };
        assert_eq!(
            change.to_json(&mut pool),
            json!({"node": 1, "type": "splice", "feat": 5, "index": 2})
        );

        let change = NodeChange::ListSplice {
            node: NodeId(1),
            feature: NodeFeatureType::ElementChildren,
            index: 0,
            removed: 1,
            added: vec![ChangeValue::Node(NodeId(4)), ChangeValue::Node(NodeId(5))],
        };
        assert_eq!(
            change.to_json(&mut pool),
            json!({"node": 1, "type": "splice", "feat": 2, "index": 0, "remove": 1, "addNodes": [4, 5]})
        );
    }

    #[test]
    fn mixed_additions_tag_node_entries() {
        let mut pool = ConstantPool::default();
        let change = NodeChange::ListSplice {
            node: NodeId(2),
            feature: NodeFeatureType::ElementChildren,
            index: 0,
            removed: 0,
            added: vec![ChangeValue::Node(NodeId(3)), ChangeValue::Json(json!(3))],
        };
        assert_eq!(
            change.to_json(&mut pool)["add"],
            json!([{"@node": 3}, 3]),
            "node 3 and the number 3 must stay distinguishable"
        );
    }

    #[test]
    fn constant_values_are_interned_into_the_pool() {
        let mut pool = ConstantPool::default();
        let change = NodeChange::MapPut {
            node: NodeId(2),
            feature: NodeFeatureType::ElementListeners,
            key: "click".into(),
            value: ChangeValue::Constant(json!({"debounce": 200})),
        };

        let encoded = change.to_json(&mut pool);
        let key = encoded["value"].as_str().expect("constant key").to_string();

        assert!(pool.has_new_constants());
        assert_eq!(pool.dump_constants()[key.as_str()], json!({"debounce": 200}));
    }
}
