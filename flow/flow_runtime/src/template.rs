use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};

/// Key in the template map feature whose value is the root template id.
pub const ROOT_TEMPLATE_ID: &str = "root";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub u32);

/// A static element structure shared by every node that uses it.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateNode {
    pub tag: String,
    pub properties: Map<String, Value>,
    pub children: Vec<TemplateId>,
}

impl TemplateNode {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            properties: Map::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_child(mut self, child: TemplateId) -> Self {
        self.children.push(child);
        self
    }

    fn to_json(&self) -> Value {
        json!({
            "type": "element",
            "tag": self.tag,
            "properties": self.properties,
            "children": self.children.iter().map(|id| id.0).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, TemplateNode>,
    next_id: u32,
}

impl TemplateRegistry {
    pub fn register(&mut self, template: TemplateNode) -> TemplateId {
        let id = TemplateId(self.next_id);
        self.next_id += 1;
        self.templates.insert(id, template);
        id
    }

    pub fn get(&self, id: TemplateId) -> Option<&TemplateNode> {
        self.templates.get(&id)
    }
}

/// Tracks which templates a UI has already sent.
#[derive(Debug, Default)]
pub struct SentTemplates {
    sent: HashSet<TemplateId>,
}

impl SentTemplates {
    pub fn is_sent(&self, id: TemplateId) -> bool {
        self.sent.contains(&id)
    }

    /// Writes `id` and any unsent child templates into `out`, children
    /// first. Already sent templates are skipped.
    pub fn encode(&mut self, registry: &TemplateRegistry, id: TemplateId, out: &mut Map<String, Value>) {
        if !self.sent.insert(id) {
            return;
        }
        let Some(template) = registry.get(id) else {
            log::warn!("template {} is referenced but was never registered", id.0);
            return;
        };
        for child in &template.children {
            self.encode(registry, *child, out);
        }
        out.insert(id.0.to_string(), template.to_json());
    }
}
