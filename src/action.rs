//! Action identifiers and the call shape shared by the gate and the host.
//!
//! An action key is `"namespace/action"`, split on the last `/`. The
//! namespace keeps its trailing separator, so `full_key == namespace +
//! action_name` always holds; keys without a separator belong to the root
//! namespace `""`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between namespace segments and the action name.
pub const SEPARATOR: char = '/';

/// What the caller passed as the action: a plain key or a structured
/// object carrying a `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionRef {
    Key(String),
    Object(Value),
}

impl ActionRef {
    /// The raw action key, if one can be read.
    pub fn key(&self) -> Option<&str> {
        match self {
            ActionRef::Key(key) => Some(key),
            ActionRef::Object(obj) => obj.get("type").and_then(Value::as_str),
        }
    }

    /// Payload implied by a structured action: every field except `type`.
    pub fn implied_payload(&self) -> Option<Value> {
        match self {
            ActionRef::Key(_) => None,
            ActionRef::Object(Value::Object(map)) => {
                let rest: serde_json::Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| k.as_str() != "type")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(Value::Object(rest))
            }
            ActionRef::Object(_) => None,
        }
    }
}

impl From<&str> for ActionRef {
    fn from(key: &str) -> Self {
        ActionRef::Key(key.to_string())
    }
}

impl From<String> for ActionRef {
    fn from(key: String) -> Self {
        ActionRef::Key(key)
    }
}

impl From<Value> for ActionRef {
    fn from(value: Value) -> Self {
        match value {
            Value::String(key) => ActionRef::Key(key),
            other => ActionRef::Object(other),
        }
    }
}

/// Options forwarded untouched to the host dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Resolve the action against the root of the host's action tree.
    #[serde(default)]
    pub root: bool,
}

impl DispatchOptions {
    pub fn root() -> Self {
        Self { root: true }
    }
}

/// A single dispatch as seen by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCall {
    pub action: ActionRef,
    pub payload: Option<Value>,
    pub options: DispatchOptions,
}

impl DispatchCall {
    pub fn new(action: impl Into<ActionRef>, payload: Option<Value>) -> Self {
        Self {
            action: action.into(),
            payload,
            options: DispatchOptions::default(),
        }
    }

    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// The payload the host will see: explicit, else implied by the action object.
    pub fn effective_payload(&self) -> Option<Value> {
        self.payload
            .clone()
            .or_else(|| self.action.implied_payload())
    }
}

/// Parsed identity of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub full_key: String,
    pub namespace: String,
    pub action_name: String,
}

impl ActionId {
    /// Split a key on its last separator. Returns `None` for keys the gate
    /// cannot manage: empty keys and keys with an empty action name.
    pub fn parse(key: &str) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        let (namespace, action_name) = match key.rfind(SEPARATOR) {
            Some(idx) => key.split_at(idx + SEPARATOR.len_utf8()),
            None => ("", key),
        };
        if action_name.is_empty() {
            return None;
        }
        Some(Self {
            full_key: key.to_string(),
            namespace: namespace.to_string(),
            action_name: action_name.to_string(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_splits_on_last_separator() {
        let id = ActionId::parse("shop/cart/checkout").unwrap();
        assert_eq!(id.namespace, "shop/cart/");
        assert_eq!(id.action_name, "checkout");
        assert_eq!(format!("{}{}", id.namespace, id.action_name), id.full_key);
    }

    #[test]
    fn parse_root_action() {
        let id = ActionId::parse("refresh").unwrap();
        assert!(id.is_root());
        assert_eq!(id.action_name, "refresh");
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(ActionId::parse("").is_none());
        assert!(ActionId::parse("cart/").is_none());
    }

    #[test]
    fn structured_action_implies_payload() {
        let action = ActionRef::from(json!({"type": "cart/add", "id": 7}));
        assert_eq!(action.key(), Some("cart/add"));
        assert_eq!(action.implied_payload(), Some(json!({"id": 7})));

        let call = DispatchCall::new(action, Some(json!({"id": 9})));
        assert_eq!(call.effective_payload(), Some(json!({"id": 9})));
    }

    #[test]
    fn structured_action_without_type_has_no_key() {
        let action = ActionRef::from(json!({"id": 7}));
        assert_eq!(action.key(), None);
    }
}
