//! Client RPC dispatch.
//!
//! Handlers are looked up by the invocation's `type`. The target node id is
//! resolved before the handler runs; a stale id reaches the handler as
//! `None` and the handler decides what to do with it.

use crate::error::RpcError;
use crate::node::{FeatureKind, NodeFeatureType, NodeHandle, NodeId};
use crate::protocol::{RPC_NODE, RPC_TYPE};
use crate::ui::{DomEvent, Ui};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const EVENT_RPC_TYPE: &str = "event";
pub const MAP_SYNC_RPC_TYPE: &str = "mSync";

/// Caption used when an invocation of an unknown type is reported to the
/// client.
pub const UNSUPPORTED_RPC_CAPTION: &str = "Unsupported RPC";

pub trait RpcInvocationHandler: Send + Sync {
    fn rpc_type(&self) -> &str;

    fn handle(&self, ui: &mut Ui, node: Option<NodeHandle>, invocation: &Value) -> Result<(), RpcError>;
}

pub struct ServerRpcHandler {
    handlers: HashMap<String, Arc<dyn RpcInvocationHandler>>,
}

impl Default for ServerRpcHandler {
    fn default() -> Self {
        let mut handlers = Self::empty();
        handlers.register(EventRpcHandler);
        handlers.register(MapSyncRpcHandler);
        handlers
    }
}

impl ServerRpcHandler {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for its RPC type, replacing any previous one.
    pub fn register(&mut self, handler: impl RpcInvocationHandler + 'static) {
        self.register_shared(Arc::new(handler));
    }

    pub fn register_shared(&mut self, handler: Arc<dyn RpcInvocationHandler>) {
        self.handlers.insert(handler.rpc_type().to_string(), handler);
    }

    /// Replaces every registered handler with `wrap(handler)`.
    pub fn wrap_all(&mut self, wrap: impl Fn(Arc<dyn RpcInvocationHandler>) -> Arc<dyn RpcInvocationHandler>) {
        for handler in self.handlers.values_mut() {
            *handler = wrap(handler.clone());
        }
    }

    pub fn supports(&self, rpc_type: &str) -> bool {
        self.handlers.contains_key(rpc_type)
    }

    pub fn handle(
        &self,
        ui: &mut Ui,
        rpc_type: &str,
        node_id: Option<NodeId>,
        invocation: &Value,
    ) -> Result<(), RpcError> {
        let handler = self
            .handlers
            .get(rpc_type)
            .ok_or_else(|| RpcError::UnsupportedType(rpc_type.to_string()))?;
        let node = node_id.and_then(|id| ui.tree().node_by_id(id));
        handler.handle(ui, node, invocation)
    }

    /// Runs every invocation in order. A failing invocation is logged and
    /// skipped; unsupported types are also reported to the client. Returns
    /// the number of failed invocations.
    pub fn handle_invocations(&self, ui: &mut Ui, invocations: &[Value]) -> usize {
        let mut failed = 0;
        for invocation in invocations {
            let Err(err) = self.handle_invocation(ui, invocation) else {
                continue;
            };
            failed += 1;
            log::warn!("RPC invocation failed: {err}");
            if let RpcError::UnsupportedType(_) = err {
                ui.report_app_error(UNSUPPORTED_RPC_CAPTION, err.to_string());
            }
        }
        failed
    }

    fn handle_invocation(&self, ui: &mut Ui, invocation: &Value) -> Result<(), RpcError> {
        let rpc_type = invocation
            .get(RPC_TYPE)
            .and_then(Value::as_str)
            .ok_or(RpcError::MissingField(RPC_TYPE))?;
        let node_id = match invocation.get(RPC_NODE) {
            None | Some(Value::Null) => None,
            Some(raw) => Some(node_id_from(raw)?),
        };
        self.handle(ui, rpc_type, node_id, invocation)
    }
}

fn node_id_from(raw: &Value) -> Result<NodeId, RpcError> {
    raw.as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .map(NodeId)
        .ok_or_else(|| RpcError::InvalidPayload(format!("node id must be a positive integer, got {raw}")))
}

fn stale_node(rpc_type: &str, invocation: &Value) {
    log::warn!(
        "got {rpc_type} RPC for node {}, which is no longer attached; ignoring",
        invocation.get(RPC_NODE).unwrap_or(&Value::Null)
    );
}

/// `{"type":"event","node":id,"event":name,"data":{...}}`
pub struct EventRpcHandler;

impl RpcInvocationHandler for EventRpcHandler {
    fn rpc_type(&self) -> &str {
        EVENT_RPC_TYPE
    }

    fn handle(&self, ui: &mut Ui, node: Option<NodeHandle>, invocation: &Value) -> Result<(), RpcError> {
        let Some(node) = node else {
            stale_node(EVENT_RPC_TYPE, invocation);
            return Ok(());
        };
        let event_type = invocation
            .get("event")
            .and_then(Value::as_str)
            .ok_or(RpcError::MissingField("event"))?;

        let event = DomEvent {
            node,
            event_type: event_type.to_string(),
            data: invocation.get("data").cloned().unwrap_or(Value::Null),
        };
        if ui.fire_event(&event) == 0 {
            log::debug!("no listeners for '{event_type}' event");
        }
        Ok(())
    }
}

/// `{"type":"mSync","node":id,"feature":1,"property":name,"value":v}`
///
/// The client already has the value, so no change is recorded for it.
pub struct MapSyncRpcHandler;

impl RpcInvocationHandler for MapSyncRpcHandler {
    fn rpc_type(&self) -> &str {
        MAP_SYNC_RPC_TYPE
    }

    fn handle(&self, ui: &mut Ui, node: Option<NodeHandle>, invocation: &Value) -> Result<(), RpcError> {
        let Some(node) = node else {
            stale_node(MAP_SYNC_RPC_TYPE, invocation);
            return Ok(());
        };
        let feature = invocation
            .get("feature")
            .and_then(Value::as_u64)
            .ok_or(RpcError::MissingField("feature"))?;
        let feature = NodeFeatureType::from_wire_id(feature)
            .filter(|ty| ty.kind() == FeatureKind::Map && ty.is_client_side())
            .ok_or_else(|| RpcError::InvalidPayload(format!("feature {feature} cannot be synced from the client")))?;
        if feature != NodeFeatureType::ElementProperties {
            return Err(RpcError::InvalidPayload(format!(
                "only element properties can be synced from the client, got {feature:?}"
            )));
        }
        let property = invocation
            .get("property")
            .and_then(Value::as_str)
            .ok_or(RpcError::MissingField("property"))?;
        let value = invocation
            .get("value")
            .cloned()
            .ok_or(RpcError::MissingField("value"))?;

        ui.tree_mut()
            .put_from_client(node, feature, property.to_string(), value)?;
        Ok(())
    }
}

/// Logs every invocation before handing it to the wrapped handler.
pub struct LoggingRpcHandler {
    inner: Arc<dyn RpcInvocationHandler>,
}

impl LoggingRpcHandler {
    pub fn wrap(inner: Arc<dyn RpcInvocationHandler>) -> Arc<dyn RpcInvocationHandler> {
        Arc::new(Self { inner })
    }
}

impl RpcInvocationHandler for LoggingRpcHandler {
    fn rpc_type(&self) -> &str {
        self.inner.rpc_type()
    }

    fn handle(&self, ui: &mut Ui, node: Option<NodeHandle>, invocation: &Value) -> Result<(), RpcError> {
        let node_id = node.and_then(|node| ui.tree().id_of(node));
        log::info!(
            target: "flow_runtime::rpc",
            "{} rpc node={:?} invocation={invocation}",
            self.inner.rpc_type(),
            node_id.map(|id| id.0)
        );
        self.inner.handle(ui, node, invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FeatureValue;
    use crate::ui::UiId;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ui_with_button() -> (Ui, NodeHandle, NodeId) {
        let mut ui = Ui::new(UiId(0));
        let root = ui.root();
        let button = ui.create_element("button").expect("element");
        ui.append_child(root, button).expect("append");
        ui.tree_mut().collect_changes(|_| {});
        let id = ui.tree().id_of(button).expect("attached id");
        (ui, button, id)
    }

    #[test]
    fn unsupported_type_is_recoverable_and_changes_nothing() {
        let (mut ui, _, id) = ui_with_button();
        let dispatch = ServerRpcHandler::default();

        match dispatch.handle(&mut ui, "teleport", Some(id), &json!({})) {
            Err(RpcError::UnsupportedType(rpc_type)) => assert_eq!(rpc_type, "teleport"),
            other => panic!("expected UnsupportedType, got {other:?}"),
        }
        assert!(!ui.tree().has_pending_changes());
    }

    #[test]
    fn events_reach_listeners_and_stale_ids_are_ignored() {
        let (mut ui, button, id) = ui_with_button();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ui.add_event_listener(button, "click", move |_, event| {
            sink.lock().expect("sink").push(event.data.clone());
        })
        .expect("listener");

        let dispatch = ServerRpcHandler::default();
        let failed = dispatch.handle_invocations(
            &mut ui,
            &[
                json!({"type": "event", "node": id.0, "event": "click", "data": {"button": 0}}),
                json!({"type": "event", "node": 999, "event": "click"}),
            ],
        );
        assert_eq!(failed, 0);
        assert_eq!(*seen.lock().expect("seen"), vec![json!({"button": 0})]);
    }

    #[test]
    fn one_bad_invocation_does_not_stop_the_rest() {
        let (mut ui, button, id) = ui_with_button();
        let dispatch = ServerRpcHandler::default();

        let failed = dispatch.handle_invocations(
            &mut ui,
            &[
                json!({"type": "nope", "node": id.0}),
                json!({"node": id.0}),
                json!({"type": "mSync", "node": id.0, "feature": 1, "property": "value", "value": "typed"}),
            ],
        );
        assert_eq!(failed, 2);
        assert_eq!(ui.pending_app_errors.len(), 1);
        assert_eq!(ui.pending_app_errors[0].caption, UNSUPPORTED_RPC_CAPTION);

        let value = ui
            .tree()
            .node(button)
            .and_then(|node| node.map(NodeFeatureType::ElementProperties))
            .and_then(|map| map.get("value"))
            .cloned();
        assert_eq!(value, Some(FeatureValue::Json(json!("typed"))));
    }

    #[test]
    fn map_sync_does_not_echo_a_change() {
        let (mut ui, _, id) = ui_with_button();
        let dispatch = ServerRpcHandler::default();
        dispatch
            .handle(
                &mut ui,
                MAP_SYNC_RPC_TYPE,
                Some(id),
                &json!({"feature": 1, "property": "checked", "value": true}),
            )
            .expect("sync");
        assert!(!ui.tree().has_pending_changes());
    }

    #[test]
    fn map_sync_rejects_features_the_client_may_not_write() {
        let (mut ui, _, id) = ui_with_button();
        let dispatch = ServerRpcHandler::default();
        for feature in [0, 2, 8, 42] {
            match dispatch.handle(
                &mut ui,
                MAP_SYNC_RPC_TYPE,
                Some(id),
                &json!({"feature": feature, "property": "tag", "value": "script"}),
            ) {
                Err(RpcError::InvalidPayload(_)) => {}
                other => panic!("expected InvalidPayload for feature {feature}, got {other:?}"),
            }
        }
    }

    struct Counting {
        inner: Arc<dyn RpcInvocationHandler>,
        calls: Arc<AtomicUsize>,
    }

    impl RpcInvocationHandler for Counting {
        fn rpc_type(&self) -> &str {
            self.inner.rpc_type()
        }

        fn handle(&self, ui: &mut Ui, node: Option<NodeHandle>, invocation: &Value) -> Result<(), RpcError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.handle(ui, node, invocation)
        }
    }

    #[test]
    fn wrappers_see_every_call_and_still_delegate() {
        let (mut ui, _, id) = ui_with_button();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatch = ServerRpcHandler::default();
        dispatch.wrap_all(LoggingRpcHandler::wrap);
        let counter = calls.clone();
        dispatch.wrap_all(move |inner| {
            Arc::new(Counting {
                inner,
                calls: counter.clone(),
            })
        });

        dispatch
            .handle(
                &mut ui,
                MAP_SYNC_RPC_TYPE,
                Some(id),
                &json!({"feature": 1, "property": "value", "value": 3}),
            )
            .expect("wrapped sync");
        dispatch
            .handle(&mut ui, EVENT_RPC_TYPE, Some(id), &json!({"event": "blur"}))
            .expect("wrapped event");

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert!(dispatch.supports(EVENT_RPC_TYPE));
    }

    #[test]
    fn malformed_node_ids_are_payload_errors() {
        let (mut ui, _, _) = ui_with_button();
        let dispatch = ServerRpcHandler::default();
        let failed = dispatch.handle_invocations(&mut ui, &[json!({"type": "event", "node": "one", "event": "x"})]);
        assert_eq!(failed, 1);
        assert!(ui.pending_app_errors.is_empty());
    }
}
