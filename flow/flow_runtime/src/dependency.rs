use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DependencyType {
    #[serde(rename = "css")]
    Stylesheet,
    #[serde(rename = "js")]
    JavaScript,
    #[serde(rename = "html")]
    HtmlImport,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadMode {
    #[default]
    Eager,
    Lazy,
    Inline,
}

/// A static asset the client has to load before it can render a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Dependency {
    #[serde(rename = "type")]
    pub kind: DependencyType,
    pub url: String,
    #[serde(rename = "loadMode")]
    pub load_mode: LoadMode,
}

impl Dependency {
    pub fn new(kind: DependencyType, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            load_mode: LoadMode::Eager,
        }
    }

    pub fn with_load_mode(mut self, load_mode: LoadMode) -> Self {
        self.load_mode = load_mode;
        self
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Dependencies of one UI. Every URL is sent at most once.
#[derive(Debug, Default)]
pub struct DependencyList {
    known_urls: HashSet<String>,
    pending: Vec<Dependency>,
}

impl DependencyList {
    /// Queues `dependency` unless its URL was added before.
    pub fn add(&mut self, dependency: Dependency) -> bool {
        if !self.known_urls.insert(dependency.url.clone()) {
            return false;
        }
        self.pending.push(dependency);
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_send_to_client(&self) -> Vec<Value> {
        self.pending.iter().map(Dependency::to_json).collect()
    }

    pub fn clear_pending_send_to_client(&mut self) {
        self.pending.clear();
    }
}

/// Static dependencies declared per component type.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    dependencies: HashMap<String, Vec<Dependency>>,
}

impl ComponentRegistry {
    pub fn register(&mut self, component_type: impl Into<String>, dependencies: Vec<Dependency>) {
        self.dependencies
            .entry(component_type.into())
            .or_default()
            .extend(dependencies);
    }

    pub fn dependencies_of(&self, component_type: &str) -> &[Dependency] {
        self.dependencies
            .get(component_type)
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_are_only_queued_once() {
        let mut list = DependencyList::default();
        assert!(list.add(Dependency::new(DependencyType::Stylesheet, "/a.css")));
        assert!(!list.add(Dependency::new(DependencyType::Stylesheet, "/a.css")));

        list.clear_pending_send_to_client();
        assert!(!list.add(Dependency::new(DependencyType::JavaScript, "/a.css")));
        assert!(!list.has_pending());
    }

    #[test]
    fn dependency_json_shape() {
        let mut list = DependencyList::default();
        list.add(Dependency::new(DependencyType::JavaScript, "/app.js").with_load_mode(LoadMode::Lazy));

        assert_eq!(
            list.pending_send_to_client(),
            vec![json!({"type": "js", "url": "/app.js", "loadMode": "LAZY"})]
        );
    }

    #[test]
    fn registry_returns_empty_for_unknown_types() {
        let mut registry = ComponentRegistry::default();
        registry.register("Button", vec![Dependency::new(DependencyType::HtmlImport, "/button.html")]);

        assert_eq!(registry.dependencies_of("Button").len(), 1);
        assert!(registry.dependencies_of("Grid").is_empty());
    }
}
