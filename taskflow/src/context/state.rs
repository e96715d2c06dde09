//! Shared mutable flow state.

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Thread-safe key/value state shared by every step of one task.
///
/// Providers read it to resolve templated parameters and write their
/// results into it so later steps can reference them.
#[derive(Debug, Default)]
pub struct SharedState {
    data: RwLock<Map<String, Value>>,
}

impl SharedState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state seeded from a task input.
    ///
    /// Object inputs are spread into the top level; the whole input is also
    /// available under `input`.
    #[must_use]
    pub fn from_input(input: &Value) -> Self {
        let mut data = match input {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        data.insert("input".to_string(), input.clone());
        Self {
            data: RwLock::new(data),
        }
    }

    /// Gets a top-level value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Looks up a dot-separated path such as `user.profile.name`.
    ///
    /// Numeric segments index into arrays.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let data = self.data.read();
        let mut segments = path.split('.');
        let mut current = data.get(segments.next()?)?;

        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current.clone())
    }

    /// Sets a top-level value, overwriting any previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.read().clone())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the state is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_object_input() {
        let state = SharedState::from_input(&json!({"user": "ann", "n": 2}));
        assert_eq!(state.get("user"), Some(json!("ann")));
        assert_eq!(state.get("input"), Some(json!({"user": "ann", "n": 2})));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_from_scalar_input() {
        let state = SharedState::from_input(&json!("raw"));
        assert_eq!(state.get("input"), Some(json!("raw")));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_lookup_nested_path() {
        let state = SharedState::new();
        state.set("user", json!({"profile": {"name": "ann"}, "tags": ["a", "b"]}));

        assert_eq!(state.lookup("user.profile.name"), Some(json!("ann")));
        assert_eq!(state.lookup("user.tags.1"), Some(json!("b")));
        assert_eq!(state.lookup("user.missing"), None);
        assert_eq!(state.lookup("user.profile.name.deeper"), None);
        assert_eq!(state.lookup("nobody"), None);
    }

    #[test]
    fn test_set_overwrites() {
        let state = SharedState::new();
        state.set("k", json!(1));
        state.set("k", json!(2));
        assert_eq!(state.get("k"), Some(json!(2)));
        assert!(state.contains_key("k"));
    }
}
