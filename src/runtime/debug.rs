//! Debug properties exported for external reporting tools.

use std::collections::BTreeMap;

use serde::Serialize;

use super::error::ConfigError;

/// One exported property value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DebugValue {
    Bool(bool),
    Count(u64),
    Text(String),
    List(Vec<String>),
}

impl From<bool> for DebugValue {
    fn from(b: bool) -> Self {
        DebugValue::Bool(b)
    }
}

impl From<u32> for DebugValue {
    fn from(n: u32) -> Self {
        DebugValue::Count(n as u64)
    }
}

impl From<u64> for DebugValue {
    fn from(n: u64) -> Self {
        DebugValue::Count(n)
    }
}

impl From<usize> for DebugValue {
    fn from(n: usize) -> Self {
        DebugValue::Count(n as u64)
    }
}

impl From<String> for DebugValue {
    fn from(s: String) -> Self {
        DebugValue::Text(s)
    }
}

impl From<&str> for DebugValue {
    fn from(s: &str) -> Self {
        DebugValue::Text(s.to_string())
    }
}

impl From<Vec<String>> for DebugValue {
    fn from(items: Vec<String>) -> Self {
        DebugValue::List(items)
    }
}

impl DebugValue {
    pub fn as_count(&self) -> Option<u64> {
        match self {
            DebugValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DebugValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Property map keyed by name, sorted for stable output
pub type DebugProperties = BTreeMap<String, DebugValue>;

pub(crate) fn put(props: &mut DebugProperties, key: &str, value: impl Into<DebugValue>) {
    props.insert(key.to_string(), value.into());
}

/// Render properties as a TOML table
pub fn to_toml(props: &DebugProperties) -> Result<String, ConfigError> {
    Ok(toml::to_string(props)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_toml() {
        let mut props = DebugProperties::new();
        put(&mut props, "call_count", 3u32);
        put(&mut props, "split", false);
        put(&mut props, "name", "fib");
        put(&mut props, "argument_shapes", vec!["long".to_string()]);

        let text = to_toml(&props).unwrap();
        assert!(text.contains("call_count = 3"));
        assert!(text.contains("split = false"));
        assert!(text.contains("name = \"fib\""));
        assert!(text.contains("argument_shapes = [\"long\"]"));
    }
}
