//! Caller-provided search input.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

type ProceedFn = dyn Fn(&Input) -> bool + Send + Sync;

/// Named input values with per-name defaults.
///
/// A value that is present and not `null` wins over the default, so
/// clearing a value with `null` brings the default back.
#[derive(Clone, Default)]
pub struct Input {
    values: IndexMap<String, Value>,
    defaults: IndexMap<String, Value>,
    can_proceed: Option<Arc<ProceedFn>>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input from a JSON object; anything else gives empty input.
    pub fn from_json(json: Value) -> Self {
        let mut input = Self::new();
        if let Value::Object(map) = json {
            input.values.extend(map);
        }
        input
    }

    pub fn with_default(mut self, name: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    /// Gate deciding whether a search should run at all.
    pub fn with_can_proceed<F>(mut self, can_proceed: F) -> Self
    where
        F: Fn(&Input) -> bool + Send + Sync + 'static,
    {
        self.can_proceed = Some(Arc::new(can_proceed));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(value) if !value.is_null() => Some(value),
            _ => self.defaults.get(name),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| !value.is_null())
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Merges `values` over the current ones.
    pub fn add<I, K>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (name, value) in values {
            self.values.insert(name.into(), value);
        }
        self
    }

    pub fn unset(&mut self, name: &str) -> &mut Self {
        self.values.shift_remove(name);
        self
    }

    pub fn can_proceed(&self) -> bool {
        self.can_proceed.as_ref().is_none_or(|check| check(self))
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input").field("values", &self.values).field("defaults", &self.defaults).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_falls_back_to_default() {
        let mut input = Input::new().with_default("page", json!(1));
        assert_eq!(input.get("page"), Some(&json!(1)));
        input.set("page", json!(3));
        assert_eq!(input.get("page"), Some(&json!(3)));
        input.set("page", Value::Null);
        assert_eq!(input.get("page"), Some(&json!(1)));
        assert_eq!(input.get("other"), None);
        assert!(!input.has("other"));
    }

    #[test]
    fn merge_and_unset() {
        let mut input = Input::from_json(json!({"a": 1, "b": 2}));
        input.add([("b", json!(20)), ("c", json!(30))]).unset("a");
        assert_eq!(input.get("a"), None);
        assert_eq!(input.get("b"), Some(&json!(20)));
        assert_eq!(input.get("c"), Some(&json!(30)));
    }

    #[test]
    fn proceed_gate() {
        let input = Input::new().with_can_proceed(|i| i.has("term"));
        assert!(!input.can_proceed());
        let mut input = input;
        input.set("term", json!("x"));
        assert!(input.can_proceed());
        assert!(Input::new().can_proceed());
    }
}
