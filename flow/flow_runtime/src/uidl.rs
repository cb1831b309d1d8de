//! Assembles one UIDL response from everything a UI has accumulated since
//! the previous one.
//!
//! The caller holds the session lock; nothing in here locks.

use crate::change::{ChangeValue, NodeChange};
use crate::config::DeploymentConfiguration;
use crate::error::RequestError;
use crate::metadata::MetadataWriter;
use crate::node::{NodeFeatureType, NodeId, StateNode};
use crate::protocol::{
    CHANGES_KEY, CLIENT_TO_SERVER_ID, CONSTANTS_KEY, DEPENDENCY_KEY, EXECUTE_KEY, META_KEY, SERVER_SYNC_ID,
    SYNC_ID_DISABLED, TEMPLATES_KEY, TIMINGS_KEY,
};
use crate::session::SessionGuard;
use crate::template::{ROOT_TEMPLATE_ID, TemplateId};
use crate::tree::StateTree;
use crate::ui::{JavaScriptInvocation, JsParameter, Ui, UiId};
use serde_json::{Map, Value, json};

/// Marks an encoded JS parameter that is a node reference.
const JS_NODE_PARAMETER: u8 = 0;
/// Marks an encoded JS parameter that is an array, so it cannot be confused
/// with a node reference.
const JS_ARRAY_PARAMETER: u8 = 1;

#[derive(Clone, Debug)]
pub struct UidlWriter {
    sync_id_check_enabled: bool,
    request_timing: bool,
}

impl UidlWriter {
    pub fn new(config: &DeploymentConfiguration) -> Self {
        Self {
            sync_id_check_enabled: config.sync_id_check_enabled,
            request_timing: config.request_timing,
        }
    }

    /// Creates the response for `ui_id`, draining every pending buffer of
    /// that UI and advancing its sync id by one.
    pub fn create_uidl(
        &self,
        session: &mut SessionGuard<'_>,
        ui_id: UiId,
        is_async: bool,
    ) -> Result<Value, RequestError> {
        session.run_pending_access_tasks();

        let messages = session.system_messages().clone();
        let max_inactive_interval = session.max_inactive_interval();
        let cumulative = session.cumulative_request_duration();
        let last = session.last_request_duration().unwrap_or_default();

        let ui = session.ui_mut(ui_id).ok_or(RequestError::UnknownUi(ui_id))?;
        log::debug!("creating response to client for UI {}", ui_id.0);

        let mut response = Map::new();
        let sync_id = if self.sync_id_check_enabled {
            ui.server_sync_id()
        } else {
            SYNC_ID_DISABLED
        };
        response.insert(SERVER_SYNC_ID.into(), json!(sync_id));
        response.insert(
            CLIENT_TO_SERVER_ID.into(),
            json!(ui.last_processed_client_id() + 1),
        );

        let meta = MetadataWriter::create_metadata(
            ui.repaint_all,
            is_async,
            &messages,
            max_inactive_interval,
            &ui.pending_app_errors,
        );
        ui.pending_app_errors.clear();
        if !meta.is_empty() {
            response.insert(META_KEY.into(), Value::Object(meta));
        }

        let mut templates = Map::new();
        let changes = encode_changes(ui, &mut templates);

        if ui.dependencies.has_pending() {
            response.insert(
                DEPENDENCY_KEY.into(),
                Value::Array(ui.dependencies.pending_send_to_client()),
            );
            ui.dependencies.clear_pending_send_to_client();
        }
        if ui.constants.has_new_constants() {
            response.insert(CONSTANTS_KEY.into(), Value::Object(ui.constants.dump_constants()));
        }
        if !changes.is_empty() {
            response.insert(CHANGES_KEY.into(), Value::Array(changes));
        }
        if !templates.is_empty() {
            response.insert(TEMPLATES_KEY.into(), Value::Object(templates));
        }

        let invocations = ui.dump_pending_js();
        if !invocations.is_empty() {
            response.insert(
                EXECUTE_KEY.into(),
                encode_execute_javascript_list(&ui.tree, &invocations),
            );
        }

        if self.request_timing {
            response.insert(
                TIMINGS_KEY.into(),
                json!([cumulative.as_millis() as u64, last.as_millis() as u64]),
            );
        }

        ui.increment_server_sync_id();
        ui.repaint_all = false;

        Ok(Value::Object(response))
    }
}

/// Drains the tree's changes. Templates referenced for the first time are
/// written to `templates` and attached components contribute their
/// dependencies.
fn encode_changes(ui: &mut Ui, templates: &mut Map<String, Value>) -> Vec<Value> {
    let mut drained = Vec::new();
    ui.tree.collect_changes(|change| drained.push(change));

    let mut encoded = Vec::with_capacity(drained.len());
    for change in drained {
        match &change {
            NodeChange::Attach { node } => harvest_component_dependencies(ui, *node),
            NodeChange::MapPut {
                feature: NodeFeatureType::TemplateMap,
                key,
                value: ChangeValue::Json(value),
                ..
            } if key == ROOT_TEMPLATE_ID => {
                match value.as_u64().and_then(|id| u32::try_from(id).ok()) {
                    Some(id) => ui.sent_templates.encode(&ui.templates, TemplateId(id), templates),
                    None => log::warn!("ignoring malformed template id {value}"),
                }
            }
            _ => {}
        }
        encoded.push(change.to_json(&mut ui.constants));
    }
    encoded
}

fn harvest_component_dependencies(ui: &mut Ui, node: NodeId) {
    let Some(handle) = ui.tree.handle_for_id(node) else {
        return;
    };
    let Some(component_type) = ui.component_type(handle) else {
        return;
    };
    let dependencies = ui.components.dependencies_of(component_type).to_vec();
    for dependency in dependencies {
        ui.dependencies.add(dependency);
    }
}

/// Encodes each invocation as `[arg..., expression]`.
pub(crate) fn encode_execute_javascript_list(tree: &StateTree, invocations: &[JavaScriptInvocation]) -> Value {
    Value::Array(
        invocations
            .iter()
            .map(|invocation| {
                let mut entry: Vec<Value> = invocation
                    .parameters
                    .iter()
                    .map(|parameter| encode_js_parameter(tree, parameter))
                    .collect();
                entry.push(Value::String(invocation.expression.clone()));
                Value::Array(entry)
            })
            .collect(),
    )
}

fn encode_js_parameter(tree: &StateTree, parameter: &JsParameter) -> Value {
    match parameter {
        JsParameter::Value(value @ Value::Array(_)) => json!([JS_ARRAY_PARAMETER, value]),
        JsParameter::Value(value) => value.clone(),
        JsParameter::Node(handle) => match tree
            .node(*handle)
            .filter(|node| node.is_attached())
            .and_then(StateNode::id)
        {
            Some(id) => json!([JS_NODE_PARAMETER, id]),
            None => Value::Null,
        },
    }
}
