use serde_json::{Map, Value};
use std::collections::HashMap;

/// Interns JSON values so repeated values are sent once per UI.
#[derive(Debug, Default)]
pub struct ConstantPool {
    keys: HashMap<String, String>,
    new_constants: Map<String, Value>,
}

impl ConstantPool {
    /// Returns the key for `value`, allocating one on first use.
    pub fn intern(&mut self, value: &Value) -> String {
        let canonical = value.to_string();
        if let Some(key) = self.keys.get(&canonical) {
            return key.clone();
        }

        let key = format!("c{}", self.keys.len());
        self.keys.insert(canonical, key.clone());
        self.new_constants.insert(key.clone(), value.clone());
        key
    }

    pub fn has_new_constants(&self) -> bool {
        !self.new_constants.is_empty()
    }

    /// Drains the constants interned since the previous dump.
    pub fn dump_constants(&mut self) -> Map<String, Value> {
        std::mem::take(&mut self.new_constants)
    }
}
