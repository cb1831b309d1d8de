//! State nodes and the typed features they own.
//!
//! A node is only a bag of features. Structure comes from features holding
//! references to other nodes: a node has at most one parent, which is the
//! node whose feature currently references it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arena slot of a node inside its [`StateTree`](crate::tree::StateTree).
///
/// Handles are stable for the lifetime of the tree and are never exposed to
/// the client. Use [`NodeId`] for anything that crosses the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub(crate) u32);

impl NodeHandle {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Client-visible node identity, assigned on first attach and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    Map,
    List,
}

impl FeatureKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::List => "list",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeFeatureType {
    ElementData,
    ElementProperties,
    ElementChildren,
    ElementAttributes,
    ElementListeners,
    ClassList,
    ElementStyle,
    TemplateMap,
    /// Server-side bookkeeping of which component owns the node.
    ComponentMapping,
}

impl NodeFeatureType {
    pub const ALL: [NodeFeatureType; 9] = [
        Self::ElementData,
        Self::ElementProperties,
        Self::ElementChildren,
        Self::ElementAttributes,
        Self::ElementListeners,
        Self::ClassList,
        Self::ElementStyle,
        Self::TemplateMap,
        Self::ComponentMapping,
    ];

    /// Numeric id used in the `feat` field of serialized changes.
    pub fn wire_id(self) -> u8 {
        match self {
            Self::ElementData => 0,
            Self::ElementProperties => 1,
            Self::ElementChildren => 2,
            Self::ElementAttributes => 3,
            Self::ElementListeners => 4,
            Self::ClassList => 5,
            Self::ElementStyle => 6,
            Self::TemplateMap => 7,
            Self::ComponentMapping => 8,
        }
    }

    pub fn from_wire_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| u64::from(ty.wire_id()) == id)
    }

    pub fn kind(self) -> FeatureKind {
        match self {
            Self::ElementChildren | Self::ClassList => FeatureKind::List,
            _ => FeatureKind::Map,
        }
    }

    /// Whether mutations of this feature are sent to the client.
    pub fn is_client_side(self) -> bool {
        !matches!(self, Self::ComponentMapping)
    }
}

/// A value stored in a feature.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureValue {
    Json(Value),
    Node(NodeHandle),
    /// A value that is sent through the constant pool instead of inline.
    Constant(Value),
}

impl FeatureValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) | Self::Constant(value) => Some(value),
            Self::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeHandle> {
        match self {
            Self::Node(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl From<Value> for FeatureValue {
    fn from(value: Value) -> Self {
        FeatureValue::Json(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        FeatureValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        FeatureValue::Json(Value::String(value))
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        FeatureValue::Json(Value::Bool(value))
    }
}

impl From<i64> for FeatureValue {
    fn from(value: i64) -> Self {
        FeatureValue::Json(Value::from(value))
    }
}

impl From<u32> for FeatureValue {
    fn from(value: u32) -> Self {
        FeatureValue::Json(Value::from(value))
    }
}

impl From<NodeHandle> for FeatureValue {
    fn from(handle: NodeHandle) -> Self {
        FeatureValue::Node(handle)
    }
}

/// Insertion-ordered key/value feature.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeMap {
    entries: Vec<(String, FeatureValue)>,
}

impl NodeMap {
    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, key: String, value: FeatureValue) -> Option<FeatureValue> {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<FeatureValue> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeList {
    items: Vec<FeatureValue>,
}

impl NodeList {
    pub fn get(&self, index: usize) -> Option<&FeatureValue> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureValue> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn splice(
        &mut self,
        index: usize,
        remove: usize,
        add: Vec<FeatureValue>,
    ) -> Vec<FeatureValue> {
        self.items.splice(index..index + remove, add).collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<FeatureValue> {
        std::mem::take(&mut self.items)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeFeature {
    Map(NodeMap),
    List(NodeList),
}

impl NodeFeature {
    pub(crate) fn new(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Map => NodeFeature::Map(NodeMap::default()),
            FeatureKind::List => NodeFeature::List(NodeList::default()),
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Self::Map(_) => FeatureKind::Map,
            Self::List(_) => FeatureKind::List,
        }
    }

    pub fn as_map(&self) -> Option<&NodeMap> {
        match self {
            Self::Map(map) => Some(map),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&NodeList> {
        match self {
            Self::List(list) => Some(list),
            Self::Map(_) => None,
        }
    }

    /// Child nodes referenced from this feature, in storage order.
    pub(crate) fn child_nodes(&self) -> Vec<NodeHandle> {
        match self {
            Self::Map(map) => map.iter().filter_map(|(_, value)| value.as_node()).collect(),
            Self::List(list) => list.iter().filter_map(FeatureValue::as_node).collect(),
        }
    }
}

/// One node of a state tree. Features are created lazily on first access.
#[derive(Debug)]
pub struct StateNode {
    pub(crate) id: Option<NodeId>,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) attached: bool,
    pub(crate) removed: bool,
    pub(crate) features: Vec<(NodeFeatureType, NodeFeature)>,
}

impl StateNode {
    pub(crate) fn new() -> Self {
        Self {
            id: None,
            parent: None,
            attached: false,
            removed: false,
            features: Vec::new(),
        }
    }

    /// The client id, if the node has ever been attached.
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn has_feature(&self, ty: NodeFeatureType) -> bool {
        self.feature(ty).is_some()
    }

    pub fn feature(&self, ty: NodeFeatureType) -> Option<&NodeFeature> {
        self.features
            .iter()
            .find(|(existing, _)| *existing == ty)
            .map(|(_, feature)| feature)
    }

    pub fn map(&self, ty: NodeFeatureType) -> Option<&NodeMap> {
        self.feature(ty).and_then(NodeFeature::as_map)
    }

    pub fn list(&self, ty: NodeFeatureType) -> Option<&NodeList> {
        self.feature(ty).and_then(NodeFeature::as_list)
    }

    pub(crate) fn feature_mut_or_create(&mut self, ty: NodeFeatureType) -> &mut NodeFeature {
        let index = match self.features.iter().position(|(existing, _)| *existing == ty) {
            Some(index) => index,
            None => {
                self.features.push((ty, NodeFeature::new(ty.kind())));
                self.features.len() - 1
            }
        };
        &mut self.features[index].1
    }

    pub(crate) fn child_nodes(&self) -> Vec<NodeHandle> {
        self.features
            .iter()
            .flat_map(|(_, feature)| feature.child_nodes())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_ids_round_trip_for_every_feature() {
        for ty in NodeFeatureType::ALL {
            assert_eq!(NodeFeatureType::from_wire_id(u64::from(ty.wire_id())), Some(ty));
        }
        assert_eq!(NodeFeatureType::from_wire_id(99), None);
    }

    #[test]
    fn map_insert_replaces_in_place_and_keeps_order() {
        let mut map = NodeMap::default();
        map.insert("a".into(), json!(1).into());
        map.insert("b".into(), json!(2).into());
        let previous = map.insert("a".into(), json!(3).into());

        assert_eq!(previous, Some(FeatureValue::Json(json!(1))));
        let keys: Vec<_> = map.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(map.get("a"), Some(&FeatureValue::Json(json!(3))));
    }

    #[test]
    fn features_are_created_lazily_once_per_type() {
        let mut node = StateNode::new();
        assert!(!node.has_feature(NodeFeatureType::ClassList));

        node.feature_mut_or_create(NodeFeatureType::ClassList);
        node.feature_mut_or_create(NodeFeatureType::ClassList);

        assert!(node.has_feature(NodeFeatureType::ClassList));
        assert_eq!(node.features.len(), 1);
        assert!(node.list(NodeFeatureType::ClassList).is_some());
        assert!(node.map(NodeFeatureType::ClassList).is_none());
    }

    #[test]
    fn component_mapping_stays_on_the_server() {
        assert!(!NodeFeatureType::ComponentMapping.is_client_side());
        assert!(NodeFeatureType::ElementChildren.is_client_side());
        assert_eq!(NodeFeatureType::ElementChildren.kind(), FeatureKind::List);
    }
}
