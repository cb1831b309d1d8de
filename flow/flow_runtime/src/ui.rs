//! Per-UI state: the state tree plus the side channels that are flushed
//! together with it.

use crate::constants::ConstantPool;
use crate::dependency::{ComponentRegistry, Dependency, DependencyList};
use crate::error::StateError;
use crate::node::{FeatureValue, NodeFeatureType, NodeHandle};
use crate::template::{ROOT_TEMPLATE_ID, SentTemplates, TemplateId, TemplateNode, TemplateRegistry};
use crate::tree::StateTree;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Key in the component mapping feature naming the component type.
pub const COMPONENT_KEY: &str = "component";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UiId(pub u32);

/// A client event delivered to server listeners.
#[derive(Clone, Debug)]
pub struct DomEvent {
    pub node: NodeHandle,
    pub event_type: String,
    pub data: Value,
}

pub type EventListener = Arc<dyn Fn(&mut Ui, &DomEvent) + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub enum JsParameter {
    Value(Value),
    Node(NodeHandle),
}

impl From<Value> for JsParameter {
    fn from(value: Value) -> Self {
        JsParameter::Value(value)
    }
}

impl From<NodeHandle> for JsParameter {
    fn from(node: NodeHandle) -> Self {
        JsParameter::Node(node)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JavaScriptInvocation {
    pub expression: String,
    pub parameters: Vec<JsParameter>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppError {
    pub caption: String,
    pub message: String,
}

pub struct Ui {
    id: UiId,
    pub(crate) tree: StateTree,
    pub(crate) dependencies: DependencyList,
    pub(crate) constants: ConstantPool,
    pub(crate) pending_js: Vec<JavaScriptInvocation>,
    pub(crate) templates: TemplateRegistry,
    pub(crate) sent_templates: SentTemplates,
    pub(crate) components: ComponentRegistry,
    pub(crate) pending_app_errors: Vec<AppError>,
    pub(crate) repaint_all: bool,
    listeners: HashMap<(NodeHandle, String), Vec<EventListener>>,
    server_sync_id: i64,
    last_processed_client_id: i64,
    pub(crate) last_response: Option<Value>,
}

impl Ui {
    pub fn new(id: UiId) -> Self {
        Self {
            id,
            tree: StateTree::new(),
            dependencies: DependencyList::default(),
            constants: ConstantPool::default(),
            pending_js: Vec::new(),
            templates: TemplateRegistry::default(),
            sent_templates: SentTemplates::default(),
            components: ComponentRegistry::default(),
            pending_app_errors: Vec::new(),
            repaint_all: true,
            listeners: HashMap::new(),
            server_sync_id: 0,
            last_processed_client_id: -1,
            last_response: None,
        }
    }

    pub fn id(&self) -> UiId {
        self.id
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut StateTree {
        &mut self.tree
    }

    pub fn root(&self) -> NodeHandle {
        self.tree.root()
    }

    pub fn create_element(&mut self, tag: &str) -> Result<NodeHandle, StateError> {
        let node = self.tree.create_node();
        self.tree
            .map_feature(node, NodeFeatureType::ElementData)?
            .put("tag", tag)?;
        Ok(node)
    }

    /// Creates an element owned by a component of `component_type`. Its
    /// registered dependencies are sent when the node is first flushed
    /// attached.
    pub fn create_component(&mut self, component_type: &str, tag: &str) -> Result<NodeHandle, StateError> {
        let node = self.create_element(tag)?;
        self.tree
            .map_feature(node, NodeFeatureType::ComponentMapping)?
            .put(COMPONENT_KEY, component_type)?;
        Ok(node)
    }

    pub fn component_type(&self, node: NodeHandle) -> Option<&str> {
        self.tree
            .node(node)?
            .map(NodeFeatureType::ComponentMapping)?
            .get(COMPONENT_KEY)?
            .as_json()?
            .as_str()
    }

    pub fn append_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), StateError> {
        self.tree
            .list_feature(parent, NodeFeatureType::ElementChildren)?
            .push(child)
    }

    /// Detaches `node` and retires its subtree, dropping the event
    /// listeners of every retired node.
    pub fn remove_node(&mut self, node: NodeHandle) -> Result<(), StateError> {
        let retired = self.tree.remove_node(node)?;
        self.listeners.retain(|(handle, _), _| !retired.contains(handle));
        Ok(())
    }

    pub fn set_property(
        &mut self,
        node: NodeHandle,
        name: &str,
        value: impl Into<FeatureValue>,
    ) -> Result<(), StateError> {
        self.tree
            .map_feature(node, NodeFeatureType::ElementProperties)?
            .put(name, value)
    }

    pub fn set_attribute(&mut self, node: NodeHandle, name: &str, value: &str) -> Result<(), StateError> {
        self.tree
            .map_feature(node, NodeFeatureType::ElementAttributes)?
            .put(name, value)
    }

    pub fn add_class_name(&mut self, node: NodeHandle, class_name: &str) -> Result<(), StateError> {
        let already_present = self
            .tree
            .node(node)
            .and_then(|state| state.list(NodeFeatureType::ClassList))
            .is_some_and(|list| list.iter().any(|value| value.as_json() == Some(&json!(class_name))));
        if already_present {
            return Ok(());
        }
        self.tree
            .list_feature(node, NodeFeatureType::ClassList)?
            .push(class_name)
    }

    pub fn register_template(&mut self, template: TemplateNode) -> TemplateId {
        self.templates.register(template)
    }

    pub fn use_template(&mut self, node: NodeHandle, template: TemplateId) -> Result<(), StateError> {
        self.tree
            .map_feature(node, NodeFeatureType::TemplateMap)?
            .put(ROOT_TEMPLATE_ID, template.0)
    }

    pub fn register_component_dependencies(&mut self, component_type: &str, dependencies: Vec<Dependency>) {
        self.components.register(component_type, dependencies);
    }

    pub fn add_dependency(&mut self, dependency: Dependency) {
        self.dependencies.add(dependency);
    }

    pub fn add_event_listener(
        &mut self,
        node: NodeHandle,
        event_type: &str,
        listener: impl Fn(&mut Ui, &DomEvent) + Send + Sync + 'static,
    ) -> Result<(), StateError> {
        self.add_event_listener_with_data(node, event_type, Vec::new(), listener)
    }

    /// Registers `listener` and tells the client which expressions to
    /// evaluate and send along with the event.
    pub fn add_event_listener_with_data(
        &mut self,
        node: NodeHandle,
        event_type: &str,
        data_expressions: Vec<String>,
        listener: impl Fn(&mut Ui, &DomEvent) + Send + Sync + 'static,
    ) -> Result<(), StateError> {
        self.tree
            .map_feature(node, NodeFeatureType::ElementListeners)?
            .put(event_type, FeatureValue::Constant(json!(data_expressions)))?;
        self.listeners
            .entry((node, event_type.to_string()))
            .or_default()
            .push(Arc::new(listener));
        Ok(())
    }

    /// Runs the listeners registered for the event's node and type. Returns
    /// how many ran.
    pub fn fire_event(&mut self, event: &DomEvent) -> usize {
        let listeners = self
            .listeners
            .get(&(event.node, event.event_type.clone()))
            .cloned()
            .unwrap_or_default();
        for listener in &listeners {
            listener(self, event);
        }
        listeners.len()
    }

    /// Queues `expression` to run on the client after the next response is
    /// applied. Parameters are sent before the expression.
    pub fn execute_js(&mut self, expression: impl Into<String>, parameters: Vec<JsParameter>) {
        self.pending_js.push(JavaScriptInvocation {
            expression: expression.into(),
            parameters,
        });
    }

    pub fn dump_pending_js(&mut self) -> Vec<JavaScriptInvocation> {
        std::mem::take(&mut self.pending_js)
    }

    pub fn report_app_error(&mut self, caption: impl Into<String>, message: impl Into<String>) {
        self.pending_app_errors.push(AppError {
            caption: caption.into(),
            message: message.into(),
        });
    }

    pub fn server_sync_id(&self) -> i64 {
        self.server_sync_id
    }

    pub(crate) fn increment_server_sync_id(&mut self) {
        self.server_sync_id += 1;
    }

    pub fn last_processed_client_id(&self) -> i64 {
        self.last_processed_client_id
    }

    pub(crate) fn set_last_processed_client_id(&mut self, id: i64) {
        self.last_processed_client_id = id;
    }
}
