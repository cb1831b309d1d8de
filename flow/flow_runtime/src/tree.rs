//! The state tree: node arena, id allocation and the pending change buffer.
//!
//! Invariants:
//! - A node is attached iff it is the root or its parent is attached.
//! - Ids are assigned on the first attach, strictly increasing, never reused.
//!   Re-attaching a node keeps its id.
//! - Only attached nodes produce changes. Attaching a node emits `Attach`
//!   followed by a snapshot of its current client-visible state, so the
//!   client never sees a partially described node.
//! - Within one mutation, attach changes for new children come before the
//!   feature change that references them; detach changes come after it.

use crate::change::{ChangeValue, NodeChange};
use crate::error::StateError;
use crate::node::{FeatureKind, FeatureValue, NodeFeature, NodeFeatureType, NodeHandle, NodeId, NodeList, NodeMap, StateNode};
use crate::protocol::NODE_REF_KEY;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

#[derive(Debug)]
pub struct StateTree {
    nodes: Vec<StateNode>,
    ids: HashMap<NodeId, NodeHandle>,
    next_id: u32,
    pending: Vec<NodeChange>,
    root: NodeHandle,
}

impl StateTree {
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            ids: HashMap::new(),
            next_id: 1,
            pending: Vec::new(),
            root: NodeHandle(0),
        };
        let root = tree.create_node();
        tree.root = root;
        let id = tree.assign_id(root);
        tree.nodes[root.index()].attached = true;
        tree.pending.push(NodeChange::Attach { node: id });
        tree
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    /// Creates a detached node without an id.
    pub fn create_node(&mut self) -> NodeHandle {
        let handle = NodeHandle(self.nodes.len() as u32);
        self.nodes.push(StateNode::new());
        handle
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&StateNode> {
        self.nodes.get(handle.index())
    }

    /// Looks up an attached node. Stale, detached and unknown ids all yield
    /// `None`.
    pub fn node_by_id(&self, id: NodeId) -> Option<NodeHandle> {
        self.ids
            .get(&id)
            .copied()
            .filter(|handle| self.nodes[handle.index()].attached)
    }

    /// Looks up a node that has had `id` at some point, attached or not.
    pub(crate) fn handle_for_id(&self, id: NodeId) -> Option<NodeHandle> {
        self.ids.get(&id).copied()
    }

    pub fn id_of(&self, handle: NodeHandle) -> Option<NodeId> {
        self.node(handle).and_then(StateNode::id)
    }

    pub fn is_attached(&self, handle: NodeHandle) -> bool {
        self.node(handle).is_some_and(StateNode::is_attached)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Hands every pending change to `consumer` in recording order and
    /// clears the buffer. Calling this with nothing pending is a no-op.
    pub fn collect_changes(&mut self, mut consumer: impl FnMut(NodeChange)) {
        for change in std::mem::take(&mut self.pending) {
            consumer(change);
        }
    }

    /// Returns the map feature `ty` of `node`, creating it on first access.
    pub fn map_feature(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
    ) -> Result<MapFeatureMut<'_>, StateError> {
        self.prepare_feature(node, ty, FeatureKind::Map)?;
        Ok(MapFeatureMut { tree: self, node, ty })
    }

    /// Returns the list feature `ty` of `node`, creating it on first access.
    pub fn list_feature(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
    ) -> Result<ListFeatureMut<'_>, StateError> {
        self.prepare_feature(node, ty, FeatureKind::List)?;
        Ok(ListFeatureMut { tree: self, node, ty })
    }

    /// Unlinks `node` from its parent and permanently retires it and its
    /// subtree. Later mutations of any retired node fail with
    /// [`StateError::NodeRemoved`]. Returns the retired handles.
    pub fn remove_node(&mut self, node: NodeHandle) -> Result<Vec<NodeHandle>, StateError> {
        self.live_node(node)?;
        if node == self.root {
            return Err(StateError::RootAsChild);
        }

        if let Some(parent) = self.nodes[node.index()].parent {
            self.unlink_from_parent(parent, node)?;
        }

        let retired = self.subtree_preorder(node);
        for handle in &retired {
            self.nodes[handle.index()].removed = true;
        }
        Ok(retired)
    }

    /// Client-visible state of one node as JSON: feature wire id to map
    /// object or list array, empty features omitted, node references as
    /// `{"@node": id}`.
    pub fn snapshot(&self, handle: NodeHandle) -> Option<Value> {
        let node = self.node(handle)?;
        let mut out = Map::new();
        for (ty, feature) in &node.features {
            if !ty.is_client_side() {
                continue;
            }
            let encoded = match feature {
                NodeFeature::Map(map) if !map.is_empty() => Value::Object(
                    map.iter()
                        .map(|(key, value)| (key.to_string(), self.snapshot_value(value)))
                        .collect(),
                ),
                NodeFeature::List(list) if !list.is_empty() => {
                    Value::Array(list.iter().map(|value| self.snapshot_value(value)).collect())
                }
                _ => continue,
            };
            out.insert(ty.wire_id().to_string(), encoded);
        }
        Some(Value::Object(out))
    }

    fn snapshot_value(&self, value: &FeatureValue) -> Value {
        match value {
            FeatureValue::Json(value) | FeatureValue::Constant(value) => value.clone(),
            FeatureValue::Node(child) => {
                let id = self.id_of(*child).map_or(0, |id| id.0);
                json!({ NODE_REF_KEY: id })
            }
        }
    }

    /// Applies a property value that originated on the client. The client
    /// already has the value, so no change is recorded.
    pub(crate) fn put_from_client(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
        key: String,
        value: Value,
    ) -> Result<(), StateError> {
        self.prepare_feature(node, ty, FeatureKind::Map)?;
        let previous = self.map_mut(node, ty).insert(key, FeatureValue::Json(value));
        if let Some(FeatureValue::Node(old)) = previous {
            self.unlink_child(old)?;
        }
        Ok(())
    }

    fn live_node(&self, handle: NodeHandle) -> Result<&StateNode, StateError> {
        let node = self
            .nodes
            .get(handle.index())
            .ok_or(StateError::UnknownNode(handle))?;
        if node.removed {
            return Err(StateError::NodeRemoved(handle));
        }
        Ok(node)
    }

    fn prepare_feature(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
        expected: FeatureKind,
    ) -> Result<(), StateError> {
        self.live_node(node)?;
        if ty.kind() != expected {
            return Err(StateError::WrongFeatureKind {
                feature: ty,
                expected: expected.name(),
                actual: ty.kind().name(),
            });
        }
        self.nodes[node.index()].feature_mut_or_create(ty);
        Ok(())
    }

    fn map_mut(&mut self, node: NodeHandle, ty: NodeFeatureType) -> &mut NodeMap {
        match self.nodes[node.index()].feature_mut_or_create(ty) {
            NodeFeature::Map(map) => map,
            NodeFeature::List(_) => unreachable!("feature kind checked in prepare_feature"),
        }
    }

    fn list_mut(&mut self, node: NodeHandle, ty: NodeFeatureType) -> &mut NodeList {
        match self.nodes[node.index()].feature_mut_or_create(ty) {
            NodeFeature::List(list) => list,
            NodeFeature::Map(_) => unreachable!("feature kind checked in prepare_feature"),
        }
    }

    fn check_child(&self, parent: NodeHandle, child: NodeHandle) -> Result<(), StateError> {
        let child_node = self.live_node(child)?;
        if child == self.root {
            return Err(StateError::RootAsChild);
        }
        if child_node.parent.is_some() {
            return Err(StateError::AlreadyHasParent { child });
        }

        let mut current = Some(parent);
        while let Some(handle) = current {
            if handle == child {
                return Err(StateError::CycleDetected { parent, child });
            }
            current = self.nodes[handle.index()].parent;
        }
        Ok(())
    }

    fn check_children(&self, parent: NodeHandle, values: &[FeatureValue]) -> Result<(), StateError> {
        let mut seen = Vec::new();
        for child in values.iter().filter_map(FeatureValue::as_node) {
            if seen.contains(&child) {
                return Err(StateError::AlreadyHasParent { child });
            }
            self.check_child(parent, child)?;
            seen.push(child);
        }
        Ok(())
    }

    fn link_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), StateError> {
        self.nodes[child.index()].parent = Some(parent);
        if self.nodes[parent.index()].attached {
            self.attach_subtree(child)?;
        }
        Ok(())
    }

    fn unlink_child(&mut self, child: NodeHandle) -> Result<(), StateError> {
        self.nodes[child.index()].parent = None;
        if self.nodes[child.index()].attached {
            self.detach_subtree(child)?;
        }
        Ok(())
    }

    fn unlink_from_parent(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), StateError> {
        let slot = self.nodes[parent.index()]
            .features
            .iter()
            .find_map(|(ty, feature)| match feature {
                NodeFeature::Map(map) => map
                    .iter()
                    .find(|(_, value)| value.as_node() == Some(child))
                    .map(|(key, _)| (*ty, ChildSlot::Key(key.to_string()))),
                NodeFeature::List(list) => list
                    .iter()
                    .position(|value| value.as_node() == Some(child))
                    .map(|index| (*ty, ChildSlot::Index(index))),
            });

        match slot {
            Some((ty, ChildSlot::Key(key))) => {
                self.map_remove(parent, ty, &key)?;
            }
            Some((ty, ChildSlot::Index(index))) => {
                self.list_splice(parent, ty, index, 1, Vec::new())?;
            }
            None => {
                log::warn!("node {parent:?} does not reference its child {child:?}; unlinking anyway");
                self.nodes[child.index()].parent = None;
            }
        }
        Ok(())
    }

    fn subtree_preorder(&self, top: NodeHandle) -> Vec<NodeHandle> {
        let mut order = Vec::new();
        let mut stack = vec![top];
        while let Some(handle) = stack.pop() {
            order.push(handle);
            let children = self.nodes[handle.index()].child_nodes();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    fn assign_id(&mut self, handle: NodeHandle) -> NodeId {
        if let Some(id) = self.nodes[handle.index()].id {
            return id;
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes[handle.index()].id = Some(id);
        self.ids.insert(id, handle);
        id
    }

    fn attach_subtree(&mut self, top: NodeHandle) -> Result<(), StateError> {
        let order = self.subtree_preorder(top);

        for &handle in &order {
            let id = self.assign_id(handle);
            self.nodes[handle.index()].attached = true;
            self.pending.push(NodeChange::Attach { node: id });
        }

        for &handle in &order {
            let catch_up = self.catch_up_changes(handle)?;
            self.pending.extend(catch_up);
        }
        Ok(())
    }

    fn detach_subtree(&mut self, top: NodeHandle) -> Result<(), StateError> {
        for handle in self.subtree_preorder(top) {
            self.nodes[handle.index()].attached = false;
            let node = self.resolve_id(handle)?;
            self.pending.push(NodeChange::Detach { node });
        }
        Ok(())
    }

    fn catch_up_changes(&self, handle: NodeHandle) -> Result<Vec<NodeChange>, StateError> {
        let node = self.resolve_id(handle)?;
        let mut changes = Vec::new();
        for (ty, feature) in &self.nodes[handle.index()].features {
            if !ty.is_client_side() {
                continue;
            }
            match feature {
                NodeFeature::Map(map) => {
                    for (key, value) in map.iter() {
                        changes.push(NodeChange::MapPut {
                            node,
                            feature: *ty,
                            key: key.to_string(),
                            value: self.resolve_value(value)?,
                        });
                    }
                }
                NodeFeature::List(list) if !list.is_empty() => {
                    changes.push(NodeChange::ListSplice {
                        node,
                        feature: *ty,
                        index: 0,
                        removed: 0,
                        added: list
                            .iter()
                            .map(|value| self.resolve_value(value))
                            .collect::<Result<_, _>>()?,
                    });
                }
                NodeFeature::List(_) => {}
            }
        }
        Ok(changes)
    }

    /// Attached nodes always have an id; anything else is a broken tree.
    fn resolve_id(&self, handle: NodeHandle) -> Result<NodeId, StateError> {
        self.nodes[handle.index()]
            .id
            .ok_or(StateError::MissingNodeId(handle))
    }

    fn resolve_value(&self, value: &FeatureValue) -> Result<ChangeValue, StateError> {
        Ok(match value {
            FeatureValue::Json(value) => ChangeValue::Json(value.clone()),
            FeatureValue::Constant(value) => ChangeValue::Constant(value.clone()),
            FeatureValue::Node(child) => ChangeValue::Node(self.resolve_id(*child)?),
        })
    }

    /// Records the change built by `make` when `node` is attached and `ty`
    /// is visible to the client. Values are resolved only in that case, so
    /// detached subtrees never need ids.
    fn record(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
        make: impl FnOnce(&Self, NodeId) -> Result<NodeChange, StateError>,
    ) -> Result<(), StateError> {
        if !self.nodes[node.index()].attached || !ty.is_client_side() {
            return Ok(());
        }
        let id = self.resolve_id(node)?;
        let change = make(self, id)?;
        self.pending.push(change);
        Ok(())
    }

    fn map_put(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
        key: String,
        value: FeatureValue,
    ) -> Result<(), StateError> {
        if self.map_mut(node, ty).get(&key) == Some(&value) {
            return Ok(());
        }
        self.check_children(node, std::slice::from_ref(&value))?;

        let previous = self.map_mut(node, ty).insert(key.clone(), value.clone());
        if let FeatureValue::Node(child) = value {
            self.link_child(node, child)?;
        }
        self.record(node, ty, |tree, id| {
            Ok(NodeChange::MapPut {
                node: id,
                feature: ty,
                key,
                value: tree.resolve_value(&value)?,
            })
        })?;
        if let Some(FeatureValue::Node(old)) = previous {
            self.unlink_child(old)?;
        }
        Ok(())
    }

    fn map_remove(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
        key: &str,
    ) -> Result<Option<FeatureValue>, StateError> {
        let Some(previous) = self.map_mut(node, ty).remove(key) else {
            return Ok(None);
        };
        self.record(node, ty, |_, id| {
            Ok(NodeChange::MapRemove {
                node: id,
                feature: ty,
                key: key.to_string(),
            })
        })?;
        if let FeatureValue::Node(old) = previous {
            self.unlink_child(old)?;
        }
        Ok(Some(previous))
    }

    fn list_splice(
        &mut self,
        node: NodeHandle,
        ty: NodeFeatureType,
        index: usize,
        remove: usize,
        add: Vec<FeatureValue>,
    ) -> Result<Vec<FeatureValue>, StateError> {
        let len = self.list_mut(node, ty).len();
        if index.checked_add(remove).is_none_or(|end| end > len) {
            return Err(StateError::IndexOutOfBounds { index, len });
        }
        if remove == 0 && add.is_empty() {
            return Ok(Vec::new());
        }
        self.check_children(node, &add)?;

        let removed = self.list_mut(node, ty).splice(index, remove, add.clone());
        for child in add.iter().filter_map(FeatureValue::as_node) {
            self.link_child(node, child)?;
        }
        let removed_count = removed.len();
        self.record(node, ty, |tree, id| {
            Ok(NodeChange::ListSplice {
                node: id,
                feature: ty,
                index,
                removed: removed_count,
                added: add
                    .iter()
                    .map(|value| tree.resolve_value(value))
                    .collect::<Result<_, _>>()?,
            })
        })?;
        for old in removed.iter().filter_map(FeatureValue::as_node) {
            self.unlink_child(old)?;
        }
        Ok(removed)
    }

    fn list_clear(&mut self, node: NodeHandle, ty: NodeFeatureType) -> Result<Vec<FeatureValue>, StateError> {
        let removed = self.list_mut(node, ty).take_all();
        if removed.is_empty() {
            return Ok(removed);
        }
        self.record(node, ty, |_, id| Ok(NodeChange::ListClear { node: id, feature: ty }))?;
        for old in removed.iter().filter_map(FeatureValue::as_node) {
            self.unlink_child(old)?;
        }
        Ok(removed)
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

enum ChildSlot {
    Key(String),
    Index(usize),
}

/// Mutable view of one map feature. Every effective mutation records exactly
/// one feature change.
pub struct MapFeatureMut<'a> {
    tree: &'a mut StateTree,
    node: NodeHandle,
    ty: NodeFeatureType,
}

impl MapFeatureMut<'_> {
    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        self.tree.nodes[self.node.index()]
            .map(self.ty)
            .and_then(|map| map.get(key))
    }

    /// Stores `value` under `key`. Storing a node reference adopts the node as
    /// a child; replacing one releases the previous child.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<FeatureValue>) -> Result<(), StateError> {
        self.tree.map_put(self.node, self.ty, key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<FeatureValue>, StateError> {
        self.tree.map_remove(self.node, self.ty, key)
    }
}

/// Mutable view of one list feature.
pub struct ListFeatureMut<'a> {
    tree: &'a mut StateTree,
    node: NodeHandle,
    ty: NodeFeatureType,
}

impl ListFeatureMut<'_> {
    pub fn len(&self) -> usize {
        self.tree.nodes[self.node.index()]
            .list(self.ty)
            .map_or(0, NodeList::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&FeatureValue> {
        self.tree.nodes[self.node.index()]
            .list(self.ty)
            .and_then(|list| list.get(index))
    }

    pub fn push(&mut self, value: impl Into<FeatureValue>) -> Result<(), StateError> {
        let len = self.len();
        self.insert(len, value)
    }

    pub fn insert(&mut self, index: usize, value: impl Into<FeatureValue>) -> Result<(), StateError> {
        self.tree
            .list_splice(self.node, self.ty, index, 0, vec![value.into()])
            .map(|_| ())
    }

    pub fn remove(&mut self, index: usize) -> Result<FeatureValue, StateError> {
        let len = self.len();
        let mut removed = self.tree.list_splice(self.node, self.ty, index, 1, Vec::new())?;
        removed
            .pop()
            .ok_or(StateError::IndexOutOfBounds { index, len })
    }

    pub fn splice(
        &mut self,
        index: usize,
        remove: usize,
        add: Vec<FeatureValue>,
    ) -> Result<Vec<FeatureValue>, StateError> {
        self.tree.list_splice(self.node, self.ty, index, remove, add)
    }

    pub fn clear(&mut self) -> Result<Vec<FeatureValue>, StateError> {
        self.tree.list_clear(self.node, self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeFeatureType::{ClassList, ElementChildren, ElementData, ElementProperties, ComponentMapping};

    fn drain(tree: &mut StateTree) -> Vec<NodeChange> {
        let mut changes = Vec::new();
        tree.collect_changes(|change| changes.push(change));
        changes
    }

    fn element(tree: &mut StateTree, tag: &str) -> NodeHandle {
        let node = tree.create_node();
        tree.map_feature(node, ElementData)
            .expect("map feature")
            .put("tag", tag)
            .expect("put tag");
        node
    }

    #[test]
    fn new_tree_attaches_root_with_first_id() {
        let mut tree = StateTree::new();
        let root = tree.root();

        assert_eq!(tree.id_of(root), Some(NodeId(1)));
        assert_eq!(drain(&mut tree), vec![NodeChange::Attach { node: NodeId(1) }]);
    }

    #[test]
    fn collect_changes_drains_once() {
        let mut tree = StateTree::new();
        drain(&mut tree);
        let root = tree.root();

        tree.map_feature(root, ElementProperties)
            .expect("map")
            .put("title", "hello")
            .expect("put");

        assert_eq!(drain(&mut tree).len(), 1);
        assert!(drain(&mut tree).is_empty());
        assert!(!tree.has_pending_changes());
    }

    #[test]
    fn changes_surface_in_mutation_order_across_nodes() {
        let mut tree = StateTree::new();
        let root = tree.root();
        let child = element(&mut tree, "span");
        tree.list_feature(root, ElementChildren)
            .expect("list")
            .push(child)
            .expect("push");
        drain(&mut tree);

        tree.map_feature(child, ElementProperties).expect("map").put("a", 1_i64).expect("put");
        tree.map_feature(root, ElementProperties).expect("map").put("b", 2_i64).expect("put");
        tree.map_feature(child, ElementProperties).expect("map").put("c", 3_i64).expect("put");

        let keys: Vec<_> = drain(&mut tree)
            .into_iter()
            .map(|change| match change {
                NodeChange::MapPut { key, .. } => key,
                other => panic!("expected put, got {other:?}"),
            })
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn detached_mutations_are_replayed_as_snapshot_on_attach() {
        let mut tree = StateTree::new();
        drain(&mut tree);
        let root = tree.root();
        let child = element(&mut tree, "div");
        let grandchild = element(&mut tree, "b");

        {
            let mut classes = tree.list_feature(child, ClassList).expect("list");
            classes.push("a").expect("push");
            classes.push("b").expect("push");
            classes.remove(0).expect("remove");
        }
        tree.list_feature(child, ElementChildren)
            .expect("list")
            .push(grandchild)
            .expect("push");
        assert!(!tree.has_pending_changes(), "detached nodes stay invisible");

        tree.list_feature(root, ElementChildren)
            .expect("list")
            .push(child)
            .expect("push");
        let changes = drain(&mut tree);

        let child_id = tree.id_of(child).expect("child id");
        let grandchild_id = tree.id_of(grandchild).expect("grandchild id");
        assert_eq!(changes[0], NodeChange::Attach { node: child_id });
        assert_eq!(changes[1], NodeChange::Attach { node: grandchild_id });
        assert!(changes.contains(&NodeChange::ListSplice {
            node: child_id,
            feature: ClassList,
            index: 0,
            removed: 0,
            added: vec![ChangeValue::Json(Value::from("b"))],
        }));
        assert_eq!(
            changes.last(),
            Some(&NodeChange::ListSplice {
                node: NodeId(1),
                feature: ElementChildren,
                index: 0,
                removed: 0,
                added: vec![ChangeValue::Node(child_id)],
            })
        );
    }

    #[test]
    fn prebuilt_subtree_attaches_with_every_reference_resolved() {
        let mut tree = StateTree::new();
        drain(&mut tree);
        let root = tree.root();
        let card = element(&mut tree, "div");
        let body = element(&mut tree, "section");
        let text = element(&mut tree, "p");
        let icon = element(&mut tree, "i");

        tree.list_feature(card, ElementChildren).expect("list").push(body).expect("push body");
        tree.list_feature(body, ElementChildren).expect("list").push(text).expect("push text");
        tree.map_feature(card, ElementProperties)
            .expect("map")
            .put("icon", icon)
            .expect("put icon");
        assert!(!tree.has_pending_changes());
        assert_eq!(tree.id_of(body), None, "ids are assigned on attach");

        tree.list_feature(root, ElementChildren).expect("list").push(card).expect("attach card");
        let changes = drain(&mut tree);

        let id = |handle| tree.id_of(handle).expect("attached node has an id");
        let attached: Vec<_> = changes
            .iter()
            .filter_map(|change| match change {
                NodeChange::Attach { node } => Some(*node),
                _ => None,
            })
            .collect();
        assert_eq!(attached, vec![id(card), id(body), id(text), id(icon)]);
        assert!(changes.contains(&NodeChange::MapPut {
            node: id(card),
            feature: ElementProperties,
            key: "icon".into(),
            value: ChangeValue::Node(id(icon)),
        }));
        assert!(changes.contains(&NodeChange::ListSplice {
            node: id(body),
            feature: ElementChildren,
            index: 0,
            removed: 0,
            added: vec![ChangeValue::Node(id(text))],
        }));
        assert!(changes.iter().all(|change| change.node() != NodeId(0)));
    }

    #[test]
    fn huge_remove_count_is_out_of_bounds() {
        let mut tree = StateTree::new();
        let root = tree.root();
        tree.list_feature(root, ClassList).expect("list").push("a").expect("push");

        let err = tree
            .list_feature(root, ClassList)
            .expect("list")
            .splice(1, usize::MAX, Vec::new())
            .expect_err("overflowing range");
        assert_eq!(err, StateError::IndexOutOfBounds { index: 1, len: 1 });
    }

    #[test]
    fn ids_increase_and_survive_reattach() {
        let mut tree = StateTree::new();
        let root = tree.root();
        let first = element(&mut tree, "a");
        let second = element(&mut tree, "b");

        tree.list_feature(root, ElementChildren).expect("list").push(first).expect("push");
        tree.list_feature(root, ElementChildren).expect("list").push(second).expect("push");
        let first_id = tree.id_of(first).expect("id");
        let second_id = tree.id_of(second).expect("id");
        assert!(first_id < second_id);

        tree.list_feature(root, ElementChildren).expect("list").remove(0).expect("remove");
        assert_eq!(tree.node_by_id(first_id), None);
        drain(&mut tree);

        tree.list_feature(root, ElementChildren).expect("list").push(first).expect("push");
        assert_eq!(tree.id_of(first), Some(first_id));
        assert_eq!(tree.node_by_id(first_id), Some(first));
        assert_eq!(drain(&mut tree)[0], NodeChange::Attach { node: first_id });

        let third = element(&mut tree, "c");
        tree.list_feature(root, ElementChildren).expect("list").push(third).expect("push");
        assert!(tree.id_of(third).expect("id") > second_id);
    }

    #[test]
    fn removing_a_child_emits_detach_after_the_splice() {
        let mut tree = StateTree::new();
        let root = tree.root();
        let child = element(&mut tree, "p");
        tree.list_feature(root, ElementChildren).expect("list").push(child).expect("push");
        drain(&mut tree);

        tree.list_feature(root, ElementChildren).expect("list").clear().expect("clear");
        let changes = drain(&mut tree);
        let child_id = tree.id_of(child).expect("id");

        assert_eq!(
            changes,
            vec![
                NodeChange::ListClear { node: NodeId(1), feature: ElementChildren },
                NodeChange::Detach { node: child_id },
            ]
        );
        assert!(!tree.is_attached(child));
    }

    #[test]
    fn removed_nodes_reject_mutation() {
        let mut tree = StateTree::new();
        let root = tree.root();
        let child = element(&mut tree, "p");
        tree.list_feature(root, ElementChildren).expect("list").push(child).expect("push");

        tree.remove_node(child).expect("remove node");

        assert!(tree.list_feature(root, ElementChildren).expect("list").is_empty());
        match tree.map_feature(child, ElementProperties) {
            Err(StateError::NodeRemoved(handle)) => assert_eq!(handle, child),
            Err(other) => panic!("expected NodeRemoved, got {other:?}"),
            Ok(_) => panic!("expected NodeRemoved, got a feature"),
        }
        assert!(tree.remove_node(root).is_err());
    }

    #[test]
    fn reparenting_and_cycles_are_rejected() {
        let mut tree = StateTree::new();
        let root = tree.root();
        let parent = element(&mut tree, "div");
        let child = element(&mut tree, "span");
        tree.list_feature(parent, ElementChildren).expect("list").push(child).expect("push");

        let err = tree
            .list_feature(root, ElementChildren)
            .expect("list")
            .push(child)
            .expect_err("child already has a parent");
        assert_eq!(err, StateError::AlreadyHasParent { child });

        let err = tree
            .list_feature(child, ElementChildren)
            .expect("list")
            .push(parent)
            .expect_err("cycle");
        assert_eq!(err, StateError::CycleDetected { parent: child, child: parent });

        let err = tree
            .list_feature(parent, ElementChildren)
            .expect("list")
            .push(root)
            .expect_err("root");
        assert_eq!(err, StateError::RootAsChild);
    }

    #[test]
    fn wrong_feature_kind_and_bounds_are_errors() {
        let mut tree = StateTree::new();
        let root = tree.root();
        assert!(matches!(
            tree.list_feature(root, ElementProperties),
            Err(StateError::WrongFeatureKind { .. })
        ));

        let err = tree
            .list_feature(root, ClassList)
            .expect("list")
            .insert(3, "x")
            .expect_err("out of bounds");
        assert_eq!(err, StateError::IndexOutOfBounds { index: 3, len: 0 });
    }

    #[test]
    fn equal_put_and_server_side_features_record_nothing() {
        let mut tree = StateTree::new();
        let root = tree.root();
        tree.map_feature(root, ElementProperties).expect("map").put("x", 1_i64).expect("put");
        drain(&mut tree);

        tree.map_feature(root, ElementProperties).expect("map").put("x", 1_i64).expect("put");
        tree.map_feature(root, ComponentMapping).expect("map").put("component", "Button").expect("put");

        assert!(drain(&mut tree).is_empty());
    }

    #[test]
    fn replacing_a_node_value_detaches_the_previous_child() {
        let mut tree = StateTree::new();
        let root = tree.root();
        let first = element(&mut tree, "a");
        let second = element(&mut tree, "b");
        tree.map_feature(root, ElementProperties).expect("map").put("slot", first).expect("put");
        drain(&mut tree);

        tree.map_feature(root, ElementProperties).expect("map").put("slot", second).expect("put");
        let changes = drain(&mut tree);

        let first_id = tree.id_of(first).expect("id");
        assert_eq!(changes.last(), Some(&NodeChange::Detach { node: first_id }));
        assert_eq!(tree.node(first).and_then(StateNode::parent), None);
        assert!(tree.is_attached(second));
    }

    #[test]
    fn snapshot_uses_node_references() {
        let mut tree = StateTree::new();
        let root = tree.root();
        let child = element(&mut tree, "i");
        tree.list_feature(root, ElementChildren).expect("list").push(child).expect("push");
        tree.map_feature(root, ElementProperties).expect("map").put("empty", Value::Null).expect("put");

        let snapshot = tree.snapshot(root).expect("snapshot");
        let child_id = tree.id_of(child).expect("id").0;
        assert_eq!(snapshot["2"], json!([{ "@node": child_id }]));
        assert_eq!(snapshot["1"], json!({"empty": null}));
    }
}
