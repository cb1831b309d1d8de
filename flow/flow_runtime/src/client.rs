//! Browser-side model of a UI: applies UIDL responses to a plain node map.
//!
//! Used by hosts that render without a browser and by tests that check a
//! server tree and its client copy agree.

use crate::node::{FeatureKind, NodeFeatureType};
use crate::protocol::{
    CHANGES_KEY, CLIENT_TO_SERVER_ID, CONSTANTS_KEY, ClientMessage, DEPENDENCY_KEY, EXECUTE_KEY, META_KEY,
    NODE_REF_KEY, SERVER_SYNC_ID, SYNC_ID_DISABLED, TEMPLATES_KEY,
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
enum ClientFeature {
    Map(Map<String, Value>),
    List(Vec<Value>),
}

impl ClientFeature {
    fn is_empty(&self) -> bool {
        match self {
            Self::Map(map) => map.is_empty(),
            Self::List(list) => list.is_empty(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct ClientNode {
    features: BTreeMap<u8, ClientFeature>,
}

#[derive(Clone, Debug, Default)]
pub struct ClientTree {
    nodes: BTreeMap<u32, ClientNode>,
    constants: Map<String, Value>,
    templates: Map<String, Value>,
    dependencies: Vec<Value>,
    executed: Vec<Value>,
    last_meta: Option<Value>,
    last_sync_id: Option<i64>,
    next_client_id: i64,
}

impl ClientTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one response. The sync id is checked first; a failure part
    /// way through the changes leaves the model half applied and the caller
    /// should [`reset`](Self::reset) and request a full repaint.
    pub fn apply_uidl(&mut self, uidl: &Value) -> Result<(), String> {
        let sync_id = uidl
            .get(SERVER_SYNC_ID)
            .and_then(Value::as_i64)
            .ok_or_else(|| format!("response is missing '{SERVER_SYNC_ID}'"))?;
        validate_sync_id(self.last_sync_id, sync_id)?;

        if let Some(Value::Object(constants)) = uidl.get(CONSTANTS_KEY) {
            for (key, value) in constants {
                self.constants.insert(key.clone(), value.clone());
            }
        }
        if let Some(Value::Object(templates)) = uidl.get(TEMPLATES_KEY) {
            for (id, template) in templates {
                if self.templates.insert(id.clone(), template.clone()).is_some() {
                    return Err(format!("template {id} was sent twice"));
                }
            }
        }
        if let Some(Value::Array(dependencies)) = uidl.get(DEPENDENCY_KEY) {
            self.dependencies.extend(dependencies.iter().cloned());
        }
        if let Some(changes) = uidl.get(CHANGES_KEY) {
            let changes = changes
                .as_array()
                .ok_or_else(|| format!("'{CHANGES_KEY}' must be an array"))?;
            for change in changes {
                self.apply_change(change)?;
            }
        }
        if let Some(Value::Array(execute)) = uidl.get(EXECUTE_KEY) {
            self.executed.extend(execute.iter().cloned());
        }
        self.last_meta = uidl.get(META_KEY).cloned();

        if sync_id != SYNC_ID_DISABLED {
            self.last_sync_id = Some(sync_id);
        }
        if let Some(client_id) = uidl.get(CLIENT_TO_SERVER_ID).and_then(Value::as_i64) {
            self.next_client_id = client_id;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The message the client would send next carrying `rpc`.
    pub fn next_message(&self, rpc: Vec<Value>) -> ClientMessage {
        ClientMessage {
            sync_id: self.last_sync_id.unwrap_or(SYNC_ID_DISABLED),
            client_id: self.next_client_id,
            rpc,
        }
    }

    pub fn contains(&self, node: u32) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Same shape as the server tree's snapshot of the node.
    pub fn snapshot(&self, node: u32) -> Option<Value> {
        let node = self.nodes.get(&node)?;
        let out: Map<String, Value> = node
            .features
            .iter()
            .filter(|(_, feature)| !feature.is_empty())
            .map(|(id, feature)| {
                let encoded = match feature {
                    ClientFeature::Map(map) => Value::Object(map.clone()),
                    ClientFeature::List(list) => Value::Array(list.clone()),
                };
                (id.to_string(), encoded)
            })
            .collect();
        Some(Value::Object(out))
    }

    pub fn templates(&self) -> &Map<String, Value> {
        &self.templates
    }

    pub fn dependencies(&self) -> &[Value] {
        &self.dependencies
    }

    pub fn executed(&self) -> &[Value] {
        &self.executed
    }

    pub fn last_meta(&self) -> Option<&Value> {
        self.last_meta.as_ref()
    }

    pub fn last_sync_id(&self) -> Option<i64> {
        self.last_sync_id
    }

    fn apply_change(&mut self, change: &Value) -> Result<(), String> {
        let node = change
            .get("node")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| format!("change without a valid node id: {change}"))?;
        let kind = change
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("change without a type: {change}"))?;

        match kind {
            "attach" => {
                self.nodes.insert(node, ClientNode::default());
                return Ok(());
            }
            "detach" => {
                self.nodes.remove(&node);
                return Ok(());
            }
            _ => {}
        }

        let feature = change
            .get("feat")
            .and_then(Value::as_u64)
            .and_then(NodeFeatureType::from_wire_id)
            .ok_or_else(|| format!("change without a known feature: {change}"))?;
        let resolved = self.resolve_value(feature, change);
        let target = self
            .nodes
            .get_mut(&node)
            .ok_or_else(|| format!("change for unknown node {node}"))?
            .features
            .entry(feature.wire_id())
            .or_insert_with(|| match feature.kind() {
                FeatureKind::Map => ClientFeature::Map(Map::new()),
                FeatureKind::List => ClientFeature::List(Vec::new()),
            });

        match (kind, target) {
            ("put", ClientFeature::Map(map)) => {
                let key = string_field(change, "key")?;
                let value = resolved.ok_or_else(|| format!("put without a value: {change}"))?;
                map.insert(key.to_string(), value);
                Ok(())
            }
            ("remove", ClientFeature::Map(map)) => {
                let key = string_field(change, "key")?;
                map.remove(key)
                    .map(|_| ())
                    .ok_or_else(|| format!("remove of missing key '{key}' on node {node}"))
            }
            ("splice", ClientFeature::List(list)) => splice(list, change),
            ("clear", ClientFeature::List(list)) => {
                list.clear();
                Ok(())
            }
            (kind, _) => Err(format!(
                "change type '{kind}' does not apply to {} feature {feature:?}",
                feature.kind().name()
            )),
        }
    }

    /// The value carried by a put. Listener values are constant references.
    fn resolve_value(&self, feature: NodeFeatureType, change: &Value) -> Option<Value> {
        if let Some(id) = change.get("nodeValue") {
            return Some(json!({ NODE_REF_KEY: id }));
        }
        let value = change.get("value")?;
        if feature == NodeFeatureType::ElementListeners {
            if let Some(constant) = value.as_str().and_then(|key| self.constants.get(key)) {
                return Some(constant.clone());
            }
        }
        Some(value.clone())
    }
}

fn splice(list: &mut Vec<Value>, change: &Value) -> Result<(), String> {
    let index = change
        .get("index")
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("splice without an index: {change}"))? as usize;
    let remove = change.get("remove").and_then(Value::as_u64).unwrap_or(0);
    let end = usize::try_from(remove)
        .ok()
        .and_then(|remove| index.checked_add(remove))
        .filter(|end| *end <= list.len())
        .ok_or_else(|| {
            format!(
                "splice index out of bounds: index={index} remove={remove} len={}",
                list.len()
            )
        })?;

    // Node entries of a mixed `add` already carry the `{"@node": id}` form.
    let added: Vec<Value> = match (change.get("add"), change.get("addNodes")) {
        (Some(Value::Array(values)), _) => values.clone(),
        (_, Some(Value::Array(ids))) => ids.iter().map(|id| json!({ NODE_REF_KEY: id })).collect(),
        _ => Vec::new(),
    };
    list.splice(index..end, added);
    Ok(())
}

fn string_field<'a>(change: &'a Value, name: &str) -> Result<&'a str, String> {
    change
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("change without '{name}': {change}"))
}

/// The first response is always accepted, after that each one must follow
/// the previous by exactly one. The disabled sentinel skips the check.
pub fn validate_sync_id(last: Option<i64>, sync_id: i64) -> Result<(), String> {
    if sync_id == SYNC_ID_DISABLED {
        return Ok(());
    }
    match last {
        Some(last) if sync_id == last + 1 => Ok(()),
        Some(last) => Err(format!(
            "sync id mismatch: syncId={sync_id}, expected={}",
            last + 1
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_id_accepts_first_and_next_only() {
        assert!(validate_sync_id(None, 7).is_ok());
        assert!(validate_sync_id(Some(7), 8).is_ok());
        assert!(validate_sync_id(Some(7), 7).is_err());
        assert!(validate_sync_id(Some(7), 9).is_err());
        assert!(validate_sync_id(Some(7), SYNC_ID_DISABLED).is_ok());
    }

    #[test]
    fn applies_structure_values_and_constants() {
        let mut client = ClientTree::new();
        client
            .apply_uidl(&json!({
                "syncId": 0,
                "clientId": 0,
                "constants": {"c0": ["event.key"]},
                "changes": [
                    {"node": 1, "type": "attach"},
                    {"node": 2, "type": "attach"},
                    {"node": 2, "type": "put", "feat": 0, "key": "tag", "value": "input"},
                    {"node": 2, "type": "put", "feat": 4, "key": "keydown", "value": "c0"},
                    {"node": 1, "type": "splice", "feat": 2, "index": 0, "addNodes": [2]},
                    {"node": 1, "type": "splice", "feat": 5, "index": 0, "add": ["a", "b"]},
                    {"node": 1, "type": "splice", "feat": 5, "index": 0, "remove": 1},
                ],
            }))
            .expect("apply");

        assert_eq!(
            client.snapshot(1),
            Some(json!({"2": [{"@node": 2}], "5": ["b"]}))
        );
        assert_eq!(
            client.snapshot(2),
            Some(json!({"0": {"tag": "input"}, "4": {"keydown": ["event.key"]}}))
        );
        assert_eq!(client.next_message(Vec::new()).client_id, 0);
    }

    #[test]
    fn detach_forgets_the_node() {
        let mut client = ClientTree::new();
        client
            .apply_uidl(&json!({"syncId": 0, "changes": [
                {"node": 1, "type": "attach"},
                {"node": 1, "type": "detach"},
            ]}))
            .expect("apply");
        assert!(!client.contains(1));
    }

    #[test]
    fn bad_changes_are_errors() {
        let cases = [
            json!({"node": 9, "type": "put", "feat": 1, "key": "x", "value": 1}),
            json!({"node": 1, "type": "splice", "feat": 1, "index": 0}),
            json!({"node": 1, "type": "splice", "feat": 2, "index": 3}),
            json!({"node": 1, "type": "splice", "feat": 2, "index": 0, "remove": u64::MAX}),
            json!({"node": 1, "type": "remove", "feat": 1, "key": "missing"}),
            json!({"node": 1, "type": "teleport", "feat": 1}),
        ];
        for change in cases {
            let mut client = ClientTree::new();
            client
                .apply_uidl(&json!({"syncId": 0, "changes": [{"node": 1, "type": "attach"}]}))
                .expect("attach");
            let result = client.apply_uidl(&json!({"syncId": 1, "changes": [change.clone()]}));
            assert!(result.is_err(), "{change} should be rejected");
        }
    }

    #[test]
    fn skipped_responses_are_rejected() {
        let mut client = ClientTree::new();
        client.apply_uidl(&json!({"syncId": 3})).expect("first");
        let err = client.apply_uidl(&json!({"syncId": 5})).expect_err("gap");
        assert!(err.contains("expected=4"), "{err}");

        client.reset();
        client.apply_uidl(&json!({"syncId": 5})).expect("after reset");
    }

    #[test]
    fn duplicate_templates_are_rejected() {
        let mut client = ClientTree::new();
        let template = json!({"type": "element", "tag": "div", "properties": {}, "children": []});
        client
            .apply_uidl(&json!({"syncId": 0, "templates": {"0": template.clone()}}))
            .expect("first");
        assert!(client.apply_uidl(&json!({"syncId": 1, "templates": {"0": template}})).is_err());
    }
}
