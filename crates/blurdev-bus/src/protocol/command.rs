//! Command triple routed to handlers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::literal;

/// Raw parameters keyed by name, as parsed from a query string or received
/// over the channel.
pub type Params = BTreeMap<String, ParamValue>;

/// Parameters as handed to a handler (evaluated or passed through).
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

/// A single parameter value.
///
/// A query key seen once is `Single`; a repeated key collapses into `Multi`
/// in order of appearance. `Structured` only comes from channel payloads
/// whose params carry JSON other than strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
    Structured(serde_json::Value),
}

impl ParamValue {
    /// Append another occurrence of the same key.
    pub fn push(&mut self, value: String) {
        match self {
            Self::Single(first) => {
                let first = std::mem::take(first);
                *self = Self::Multi(vec![first, value]);
            }
            Self::Multi(values) => values.push(value),
            Self::Structured(existing) => {
                let existing = match existing.take() {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                *self = Self::Multi(vec![existing, value]);
            }
        }
    }

    /// The value with no coercion applied.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Single(s) => serde_json::Value::String(s.clone()),
            Self::Multi(values) => values
                .iter()
                .cloned()
                .map(serde_json::Value::String)
                .collect(),
            Self::Structured(value) => value.clone(),
        }
    }

    /// The value with literal coercion applied to every string independently.
    pub fn evaluate(&self) -> serde_json::Value {
        match self {
            Self::Single(s) => literal::coerce(s),
            Self::Multi(values) => values.iter().map(|v| literal::coerce(v)).collect(),
            Self::Structured(value) => value.clone(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

/// Convert raw params into the map a handler receives.
pub fn prepare_params(params: &Params, evaluate: bool) -> ParamMap {
    params
        .iter()
        .map(|(key, value)| {
            let value = if evaluate {
                value.evaluate()
            } else {
                value.to_json()
            };
            (key.clone(), value)
        })
        .collect()
}

/// `(handler_name, command, params)`, immutable once built.
///
/// Serialises as the ordered array `[handler_name, command, params]`, the
/// shape accepted on the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    handler_name: String,
    command: String,
    params: Params,
}

impl Command {
    pub fn new(handler_name: impl Into<String>, command: impl Into<String>, params: Params) -> Self {
        Self {
            handler_name: handler_name.into(),
            command: command.into(),
            params,
        }
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Interpret a channel payload as a command.
    ///
    /// Accepts `[name, command]` or `[name, command, {params}]` where name and
    /// command are strings. Anything else yields `None`.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let items = payload.as_array()?;
        if !(2..=3).contains(&items.len()) {
            return None;
        }
        let handler_name = items[0].as_str()?;
        let command = items[1].as_str()?;
        let params = match items.get(2) {
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = serde_json::from_value(v.clone())
                        .unwrap_or_else(|_| ParamValue::Structured(v.clone()));
                    (k.clone(), value)
                })
                .collect(),
            Some(_) => return None,
            None => Params::new(),
        };
        Some(Self::new(handler_name, command, params))
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!([self.handler_name, self.command, self.params])
    }
}

impl Serialize for Command {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.handler_name, &self.command, &self.params).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_collapses_into_ordered_list() {
        let mut value = ParamValue::from("value");
        value.push("case".to_string());
        value.push("third".to_string());
        assert_eq!(
            value,
            ParamValue::Multi(vec!["value".into(), "case".into(), "third".into()])
        );
    }

    #[test]
    fn params_serialize_as_scalars_and_lists() {
        let mut params = Params::new();
        params.insert("a".into(), "b".into());
        params.insert("key".into(), vec!["value".to_string(), "case".to_string()].into());
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"a": "b", "key": ["value", "case"]})
        );
    }

    #[test]
    fn untagged_deserialize_picks_narrowest_variant() {
        let single: ParamValue = serde_json::from_value(json!("x")).unwrap();
        let multi: ParamValue = serde_json::from_value(json!(["x", "y"])).unwrap();
        let structured: ParamValue = serde_json::from_value(json!({"nested": 1})).unwrap();
        assert_eq!(single, ParamValue::Single("x".into()));
        assert_eq!(multi, ParamValue::Multi(vec!["x".into(), "y".into()]));
        assert_eq!(structured, ParamValue::Structured(json!({"nested": 1})));
    }

    #[test]
    fn prepare_params_evaluates_each_list_element() {
        let mut params = Params::new();
        params.insert("item".into(), "5".into());
        params.insert("ids".into(), vec!["1".to_string(), "two".to_string()].into());

        let evaluated = prepare_params(&params, true);
        assert_eq!(evaluated["item"], json!(5));
        assert_eq!(evaluated["ids"], json!([1, "two"]));

        let raw = prepare_params(&params, false);
        assert_eq!(raw["item"], json!("5"));
        assert_eq!(raw["ids"], json!(["1", "two"]));
    }

    #[test]
    fn from_payload_accepts_two_and_three_elements() {
        let bare = Command::from_payload(&json!(["blurdev", "showLogger"])).unwrap();
        assert_eq!(bare.handler_name(), "blurdev");
        assert_eq!(bare.command(), "showLogger");
        assert!(bare.params().is_empty());

        let full =
            Command::from_payload(&json!(["treegrunt", "wtf", {"key": ["a", "b"], "n": 3}]))
                .unwrap();
        assert_eq!(
            full.params()["key"],
            ParamValue::Multi(vec!["a".into(), "b".into()])
        );
        assert_eq!(full.params()["n"], ParamValue::Structured(json!(3)));
    }

    #[test]
    fn from_payload_rejects_wrong_shapes() {
        for payload in [
            json!(["only-one"]),
            json!(["a", "b", {}, "extra"]),
            json!([1, "b"]),
            json!(["a", 2]),
            json!(["a", "b", ["not", "a", "map"]]),
            json!({"handler": "a"}),
            json!("blurdev://treegrunt/wtf"),
        ] {
            assert!(Command::from_payload(&payload).is_none(), "{payload}");
        }
    }

    #[test]
    fn payload_shape_survives_reinterpretation() {
        let mut params = Params::new();
        params.insert("user".into(), "Mike Hendricks".into());
        let command = Command::new("treegrunt", "DailyTool", params);

        let payload = command.to_payload();
        assert_eq!(payload, json!(["treegrunt", "DailyTool", {"user": "Mike Hendricks"}]));
        assert_eq!(Command::from_payload(&payload), Some(command));
    }
}
