//! Declarative `{type, params}` configuration shared by rules and actions.
//!
//! Parameters arrive from YAML files, JSON request bodies and document-store
//! exports. Config nodes are funnelled through [`normalize_config`] and
//! [`normalize_params`] so factories only ever see plain JSON objects where
//! they expect structure. Payload values are passed through untouched.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{InstinctError, Result};

pub type Params = Map<String, Value>;

// ---------------------------------------------------------------------------
// Config shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: Params,
}

impl RuleConfig {
    pub fn new(rule_type: impl Into<String>, params: Params) -> Self {
        Self {
            rule_type: rule_type.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: Params,
}

impl ActionConfig {
    pub fn new(action_type: impl Into<String>, params: Params) -> Self {
        Self {
            action_type: action_type.into(),
            params,
        }
    }
}

fn deserialize_params<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Params, D::Error> {
    match Option::<Value>::deserialize(deserializer)?.map(normalize_params) {
        None | Some(Value::Null) => Ok(Params::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(D::Error::custom(format!(
            "params must be a map, got {}",
            kind_of(&other)
        ))),
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Params keys whose values are nested `{type, params}` nodes (or lists of
/// them) rather than payload.
const NESTED_CONFIG_KEYS: &[&str] = &[
    "children",
    "then_action",
    "else_action",
    "inner_action",
    "rule_config",
];

/// Coerce one `{type, params}` node. The node itself and its `params` may be
/// `{key, value}` pair lists, the shape document stores use for ordered maps.
pub fn normalize_config(value: Value) -> Value {
    match pairs_to_object(value) {
        Value::Object(mut node) => {
            if let Some(params) = node.remove("params") {
                node.insert("params".into(), normalize_params(params));
            }
            Value::Object(node)
        }
        other => other,
    }
}

/// Coerce a params map. Only the map itself and the nested config nodes
/// under [`NESTED_CONFIG_KEYS`] are rewritten; every other value is kept
/// exactly as given, so a pair list that is real payload stays a list.
pub fn normalize_params(value: Value) -> Value {
    match pairs_to_object(value) {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if NESTED_CONFIG_KEYS.contains(&key.as_str()) {
                        let nested = normalize_nested(value);
                        (key, nested)
                    } else {
                        (key, value)
                    }
                })
                .collect(),
        ),
        other => other,
    }
}

fn normalize_nested(value: Value) -> Value {
    match pairs_to_object(value) {
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_config).collect()),
        other => normalize_config(other),
    }
}

/// A list made entirely of `{key, value}` pairs becomes an object. Values
/// are not descended into.
fn pairs_to_object(value: Value) -> Value {
    match value {
        Value::Array(items) if is_pair_list(&items) => {
            let mut map = Map::new();
            for item in items {
                if let Value::Object(mut pair) = item {
                    let key = pair
                        .remove("key")
                        .or_else(|| pair.remove("Key"))
                        .and_then(|k| k.as_str().map(str::to_string));
                    let value = pair
                        .remove("value")
                        .or_else(|| pair.remove("Value"))
                        .unwrap_or(Value::Null);
                    if let Some(key) = key {
                        map.insert(key, value);
                    }
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

fn is_pair_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| match item {
            Value::Object(pair) => {
                pair.len() == 2
                    && matches!(
                        pair.get("key").or_else(|| pair.get("Key")),
                        Some(Value::String(_))
                    )
                    && (pair.contains_key("value") || pair.contains_key("Value"))
            }
            _ => false,
        })
}

/// Deserialize a nested config out of an arbitrary value.
pub fn config_from_value<T: DeserializeOwned>(value: &Value, kind: &str, field: &str) -> Result<T> {
    serde_json::from_value(normalize_config(value.clone())).map_err(|e| {
        InstinctError::invalid_config(kind, format!("'{field}' has an unexpected structure: {e}"))
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

// ---------------------------------------------------------------------------
// Parameter accessors
// ---------------------------------------------------------------------------

pub fn required_str<'p>(params: &'p Params, key: &str, kind: &str) -> Result<&'p str> {
    match params.get(key) {
        Some(Value::String(s)) => Ok(s),
        None | Some(Value::Null) => Err(InstinctError::invalid_config(
            kind,
            format!("missing required parameter '{key}'"),
        )),
        Some(other) => Err(InstinctError::invalid_config(
            kind,
            format!("parameter '{key}' must be a string, got {}", kind_of(other)),
        )),
    }
}

/// Booleans also accept the strings `"true"` and `"false"`, which is what
/// hand-written YAML and form posts tend to produce.
pub fn optional_bool(params: &Params, key: &str, kind: &str) -> Result<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(other) => Err(InstinctError::invalid_config(
            kind,
            format!("parameter '{key}' must be a boolean, got {}", kind_of(other)),
        )),
    }
}

pub fn child_config(params: &Params, key: &str, kind: &str) -> Result<ActionConfig> {
    optional_child_config(params, key, kind)?.ok_or_else(|| {
        InstinctError::invalid_config(kind, format!("missing required parameter '{key}'"))
    })
}

pub fn optional_child_config(params: &Params, key: &str, kind: &str) -> Result<Option<ActionConfig>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => config_from_value(value, kind, key).map(Some),
    }
}

pub fn child_configs(params: &Params, key: &str, kind: &str) -> Result<Vec<ActionConfig>> {
    match params.get(key) {
        None | Some(Value::Null) => Err(InstinctError::invalid_config(
            kind,
            format!("missing required parameter '{key}'"),
        )),
        Some(Value::Array(items)) => {
            let mut configs = Vec::with_capacity(items.len());
            let mut errors = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match config_from_value(item, kind, &format!("{key}[{i}]")) {
                    Ok(config) => configs.push(config),
                    Err(e) => errors.push(e),
                }
            }
            InstinctError::collect(errors)?;
            Ok(configs)
        }
        Some(other) => Err(InstinctError::invalid_config(
            kind,
            format!("parameter '{key}' must be a list, got {}", kind_of(other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn pair_lists_become_config_nodes() {
        let raw = json!([
            {"Key": "type", "Value": "sequential"},
            {"Key": "params", "Value": [
                {"Key": "name", "Value": "seq"},
                {"Key": "children", "Value": [
                    [{"key": "type", "value": "print"}]
                ]}
            ]}
        ]);
        assert_eq!(
            normalize_config(raw),
            json!({
                "type": "sequential",
                "params": {"name": "seq", "children": [{"type": "print"}]}
            })
        );
    }

    #[test]
    fn payload_values_are_untouched() {
        let payload = json!([{"key": "severity", "value": "high"}]);
        let raw = json!({
            "endpoint": "https://tickets.local",
            "headers": payload.clone(),
            "then_action": [
                {"key": "type", "value": "ticket"},
                {"key": "params", "value": {"fields": payload.clone()}}
            ]
        });
        let normalized = normalize_params(raw);
        assert_eq!(normalized["headers"], payload);
        assert_eq!(normalized["then_action"]["type"], json!("ticket"));
        assert_eq!(normalized["then_action"]["params"]["fields"], payload);
    }

    #[test]
    fn ordinary_lists_are_untouched() {
        let raw = json!([{"name": "a"}, {"name": "b"}]);
        assert_eq!(normalize_params(raw.clone()), raw);
        assert_eq!(normalize_params(json!([])), json!([]));
    }

    #[test]
    fn null_params_deserialize_as_empty() {
        let cfg: ActionConfig = serde_yaml::from_str("type: print\nparams:\n").unwrap();
        assert_eq!(cfg.action_type, "print");
        assert!(cfg.params.is_empty());

        let cfg: RuleConfig = serde_json::from_str(r#"{"type": "cel"}"#).unwrap();
        assert!(cfg.params.is_empty());
    }

    #[test]
    fn scalar_params_are_rejected() {
        let err = serde_json::from_str::<ActionConfig>(r#"{"type": "print", "params": 3}"#);
        assert!(err.is_err());
    }

    #[test]
    fn accessors_report_missing_and_mistyped() {
        let p = params(json!({"name": "x", "flag": "false", "n": 1}));
        assert_eq!(required_str(&p, "name", "print").unwrap(), "x");
        assert!(matches!(
            required_str(&p, "message", "print"),
            Err(InstinctError::InvalidConfig { .. })
        ));
        assert!(required_str(&p, "n", "print").is_err());
        assert_eq!(optional_bool(&p, "flag", "iterator").unwrap(), Some(false));
        assert_eq!(optional_bool(&p, "absent", "iterator").unwrap(), None);
        assert!(optional_bool(&p, "n", "iterator").is_err());
    }

    #[test]
    fn child_configs_parse_nested_actions() {
        let p = params(json!({
            "children": [
                {"type": "print", "params": {"name": "a", "message": "hi"}},
                {"type": "print", "params": {"name": "b", "message": "yo"}}
            ]
        }));
        let children = child_configs(&p, "children", "sequential").unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].params["name"], json!("b"));

        let bad = params(json!({"children": [{"params": {}}, {"type": "print"}, 7]}));
        let err = child_configs(&bad, "children", "sequential").unwrap_err();
        assert!(matches!(err, InstinctError::Multiple(ref errors) if errors.len() == 2));
        assert!(err.to_string().contains("children[0]"));
        assert!(err.to_string().contains("children[2]"));
    }
}
