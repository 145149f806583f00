use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-group plugin option: `lock` and `apply` plus arbitrary extra settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginOption(Map<String, Value>);

impl Default for PluginOption {
    fn default() -> Self {
        let mut map = Map::new();
        map.insert("lock".to_string(), Value::Bool(false));
        map.insert("apply".to_string(), Value::Bool(true));
        Self(map)
    }
}

impl PluginOption {
    /// An option with no keys at all, not even `lock`/`apply`.
    pub fn empty() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Objects become options, anything else is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn lock(&self) -> bool {
        self.0.get("lock").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Missing `apply` counts as enabled.
    pub fn apply(&self) -> bool {
        self.0.get("apply").and_then(Value::as_bool).unwrap_or(true)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Deep-merges `source` into `self`; `source` wins on leaves.
    pub fn merge_from(&mut self, source: &PluginOption) {
        merge_maps(&mut self.0, &source.0);
    }

    /// The option a group ends up with: the plugin's template with the
    /// group-local values layered on top.
    pub fn resolve(template: &PluginOption, local: Option<&PluginOption>) -> PluginOption {
        let mut merged = template.clone();
        if let Some(local) = local {
            merged.merge_from(local);
        }
        merged
    }
}

/// Destructive into `target`; recurses where both sides hold an object.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => merge_maps(t, s),
        (t, s) => *t = s.clone(),
    }
}

fn merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match target.get_mut(key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                deep_merge(existing, value)
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Parses a user-typed value: JSON literals where they parse, plain strings otherwise.
pub fn parse_option_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
