use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::error::{ConfigError, ConfigResult};

/// The mapping form of a configuration record: field name to value.
pub type Payload = Map<String, Value>;

/// Conversion between a configuration record and its [`Payload`].
///
/// Any serde record gets this for free, records embed it instead of
/// inheriting serialization from a shared base.
pub trait StructuredRecord: Sized {
    fn to_payload(&self) -> Payload;

    fn from_payload(payload: Payload) -> ConfigResult<Self>;

    fn to_json_string(&self) -> String {
        let mut json = serde_json::to_string_pretty(&Value::Object(self.to_payload()))
            .unwrap_or_else(|_| "{}".to_string());
        json.push('\n');
        json
    }

    fn from_json_str(json: &str) -> ConfigResult<Self> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(payload) => Self::from_payload(payload),
            other => Err(ConfigError::InvalidValue {
                field: "<root>",
                reason: format!("expected a JSON object, got {other}"),
            }),
        }
    }
}

impl<T: Serialize + DeserializeOwned> StructuredRecord for T {
    fn to_payload(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(payload)) => payload,
            // Records always serialize to JSON objects.
            _ => Payload::new(),
        }
    }

    fn from_payload(payload: Payload) -> ConfigResult<Self> {
        Ok(serde_json::from_value(Value::Object(payload))?)
    }
}

/// Returns `base` with every key of `overrides` written over it.
///
/// Null values in `base` are dropped, so that optional fields left unset in
/// a set of defaults stay unset unless `overrides` provides them.
pub fn overlay(base: Payload, overrides: Payload) -> Payload {
    let mut result = base
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .collect::<Payload>();
    result.extend(overrides);
    result
}

/// Removes the string discriminator stored under `key` from `payload`.
pub fn take_tag(payload: &mut Payload, key: &'static str) -> ConfigResult<Option<String>> {
    match payload.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(tag)) => Ok(Some(tag)),
        Some(other) => Err(ConfigError::InvalidValue {
            field: key,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// Removes a nested object stored under `key` from `payload`.
pub fn take_object(payload: &mut Payload, key: &'static str) -> ConfigResult<Option<Payload>> {
    match payload.remove(key) {
        None => Ok(None),
        Some(Value::Object(object)) => Ok(Some(object)),
        Some(other) => Err(ConfigError::InvalidValue {
            field: key,
            reason: format!("expected an object, got {other}"),
        }),
    }
}

/// Removes the value stored under `key` from `payload` and deserializes it.
pub fn take_value<T: DeserializeOwned>(payload: &mut Payload, key: &str) -> ConfigResult<Option<T>> {
    match payload.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        a: usize,
        #[serde(default)]
        b: Option<String>,
    }

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(p) => p,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn converts_records_to_and_from_payloads() {
        let record = Dummy {
            a: 3,
            b: Some("x".to_string()),
        };
        let p = record.to_payload();
        assert_eq!(p.get("a"), Some(&json!(3)));
        assert_eq!(Dummy::from_payload(p).unwrap(), record);
    }

    #[test]
    fn rejects_non_object_json() {
        let err = Dummy::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_mistyped_fields() {
        let err = Dummy::from_json_str(r#"{"a": "three"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPayload(_)));
    }

    #[test]
    fn overlay_overrides_and_drops_nulls() {
        let base = payload(json!({"a": 1, "b": null, "c": 3}));
        let overrides = payload(json!({"a": 10}));
        let result = overlay(base, overrides);
        assert_eq!(Value::Object(result), json!({"a": 10, "c": 3}));
    }

    #[test]
    fn take_tag_removes_the_key() {
        let mut p = payload(json!({"model_type": "t5", "d_model": 8}));
        assert_eq!(take_tag(&mut p, "model_type").unwrap(), Some("t5".to_string()));
        assert!(!p.contains_key("model_type"));
        assert_eq!(take_tag(&mut p, "model_type").unwrap(), None);

        let mut p = payload(json!({"model_type": 5}));
        assert!(take_tag(&mut p, "model_type").is_err());
    }

    #[test]
    fn take_value_deserializes() {
        let mut p = payload(json!({"vocab_size": 2048, "add_prenet": "yes"}));
        assert_eq!(take_value::<usize>(&mut p, "vocab_size").unwrap(), Some(2048));
        assert_eq!(take_value::<usize>(&mut p, "vocab_size").unwrap(), None);
        assert!(take_value::<bool>(&mut p, "add_prenet").is_err());
    }

    #[test]
    fn take_object_requires_an_object() {
        let mut p = payload(json!({"decoder": {"a": 1}, "text_encoder": 3}));
        assert_eq!(
            take_object(&mut p, "decoder").unwrap(),
            Some(payload(json!({"a": 1})))
        );
        assert!(take_object(&mut p, "text_encoder").is_err());
        assert_eq!(take_object(&mut p, "missing").unwrap(), None);
    }
}
