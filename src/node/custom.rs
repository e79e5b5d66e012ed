//! Custom kinds: named domain scalars (and containers) that carry their own
//! decode/encode/schema hooks.
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value as Json};

use super::TypeId;
use crate::decode::{Decoder, Rejected};
use crate::encode::Encoder;
use crate::error::{EncodeError, Path};
use crate::schema::SchemaGenerator;
use crate::value::Value;

#[derive(Clone)]
pub struct CustomNode {
    pub kind: Arc<dyn CustomKind>,
    /// Free-form options bag interpreted by the kind.
    pub options: Json,
    /// Type arguments (e.g. the value type of a record).
    pub args: Vec<TypeId>,
}

impl fmt::Debug for CustomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomNode")
            .field("kind", &self.kind.name())
            .field("options", &self.options)
            .field("args", &self.args)
            .finish()
    }
}

pub trait CustomKind: Send + Sync {
    fn name(&self) -> &str;

    /// Values that already are of this kind. A match short-circuits decoding.
    fn matches(&self, _node: &CustomNode, _value: &Value) -> bool {
        false
    }

    /// Decode `input`. On failure, report through `cx.reject(..)`.
    fn decode(&self, node: &CustomNode, input: &Value, path: &Path, cx: &mut Decoder<'_>) -> Result<Value, Rejected>;

    fn encode(&self, node: &CustomNode, value: &Value, path: &Path, cx: &Encoder<'_>) -> Result<Json, EncodeError>;

    /// Published schema. `None` falls back to an untyped schema.
    fn schema(&self, _node: &CustomNode, _generator: &mut SchemaGenerator<'_>) -> Option<Json> {
        None
    }

    /// Whether the input's outer shape is one this kind could decode; used by
    /// shape-selected unions.
    fn accepts_shape(&self, _node: &CustomNode, _input: &Value) -> bool {
        true
    }

    /// Definition-time check of the options bag and type arguments.
    fn check_definition(&self, _node: &CustomNode) -> Result<(), String> {
        Ok(())
    }

    /// The in-memory form this kind decodes to, when other kinds decode to
    /// the same form. Two union variants of different kinds with the same
    /// representation cannot be told apart when encoding.
    fn representation(&self, _node: &CustomNode) -> Option<&str> {
        None
    }
}

pub(super) fn builtin_kinds() -> Vec<Arc<dyn CustomKind>> {
    vec![Arc::new(DateTimeKind), Arc::new(TimestampKind), Arc::new(EmailKind), Arc::new(RecordKind)]
}

fn mismatch(path: &Path, expected: &str, value: &Value) -> EncodeError {
    EncodeError::Mismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: value.kind_label().to_string(),
    }
}

fn options_object_or_null(node: &CustomNode) -> Result<(), String> {
    match node.options {
        Json::Null | Json::Object(_) => Ok(()),
        _ => Err("options must be an object".to_string()),
    }
}

// ------------------------------ date-time --------------------------------- //

/// RFC 3339 string. With `cast`, epoch milliseconds are accepted too.
#[derive(Debug)]
pub struct DateTimeKind;

impl CustomKind for DateTimeKind {
    fn name(&self) -> &str {
        "date-time"
    }

    fn representation(&self, _node: &CustomNode) -> Option<&str> {
        Some("instant")
    }

    fn matches(&self, _node: &CustomNode, value: &Value) -> bool {
        matches!(value, Value::DateTime(_))
    }

    fn decode(&self, _node: &CustomNode, input: &Value, path: &Path, cx: &mut Decoder<'_>) -> Result<Value, Rejected> {
        let parsed = match input {
            Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
            Value::Number(n) if cx.options().cast => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            _ => None,
        };
        match parsed {
            Some(dt) => Ok(Value::DateTime(dt)),
            None => Err(cx.reject(path, "date-time expected", input)),
        }
    }

    fn encode(&self, _node: &CustomNode, value: &Value, path: &Path, _cx: &Encoder<'_>) -> Result<Json, EncodeError> {
        match value {
            Value::DateTime(dt) => Ok(Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
            other => Err(mismatch(path, "date-time", other)),
        }
    }

    fn schema(&self, _node: &CustomNode, _generator: &mut SchemaGenerator<'_>) -> Option<Json> {
        Some(json!({ "type": "string", "format": "date-time" }))
    }

    fn accepts_shape(&self, _node: &CustomNode, input: &Value) -> bool {
        matches!(input, Value::String(_) | Value::DateTime(_))
    }

    fn check_definition(&self, node: &CustomNode) -> Result<(), String> {
        options_object_or_null(node)
    }
}

// ------------------------------ timestamp --------------------------------- //

/// Epoch milliseconds. With `cast`, numeric strings and RFC 3339 are accepted.
#[derive(Debug)]
pub struct TimestampKind;

impl CustomKind for TimestampKind {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn representation(&self, _node: &CustomNode) -> Option<&str> {
        Some("instant")
    }

    fn matches(&self, _node: &CustomNode, value: &Value) -> bool {
        matches!(value, Value::DateTime(_))
    }

    fn decode(&self, _node: &CustomNode, input: &Value, path: &Path, cx: &mut Decoder<'_>) -> Result<Value, Rejected> {
        let from_millis = |ms: i64| Utc.timestamp_millis_opt(ms).single();
        let parsed = match input {
            Value::Number(n) => n.as_i64().and_then(from_millis),
            Value::String(s) if cx.options().cast => match s.trim().parse::<i64>() {
                Ok(ms) => from_millis(ms),
                Err(_) => DateTime::parse_from_rfc3339(s.trim()).ok().map(|d| d.with_timezone(&Utc)),
            },
            _ => None,
        };
        match parsed {
            Some(dt) => Ok(Value::DateTime(dt)),
            None => Err(cx.reject(path, "timestamp expected", input)),
        }
    }

    fn encode(&self, _node: &CustomNode, value: &Value, path: &Path, _cx: &Encoder<'_>) -> Result<Json, EncodeError> {
        match value {
            Value::DateTime(dt) => Ok(Json::from(dt.timestamp_millis())),
            other => Err(mismatch(path, "timestamp", other)),
        }
    }

    fn schema(&self, _node: &CustomNode, _generator: &mut SchemaGenerator<'_>) -> Option<Json> {
        Some(json!({ "type": "integer", "format": "timestamp", "description": "milliseconds since the Unix epoch" }))
    }

    fn accepts_shape(&self, _node: &CustomNode, input: &Value) -> bool {
        matches!(input, Value::Number(_) | Value::DateTime(_))
    }

    fn check_definition(&self, node: &CustomNode) -> Result<(), String> {
        options_object_or_null(node)
    }
}

// -------------------------------- email ----------------------------------- //

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("email pattern compiles")
});

#[derive(Debug)]
pub struct EmailKind;

impl CustomKind for EmailKind {
    fn name(&self) -> &str {
        "email"
    }

    fn decode(&self, _node: &CustomNode, input: &Value, path: &Path, cx: &mut Decoder<'_>) -> Result<Value, Rejected> {
        match input {
            Value::String(s) if EMAIL.is_match(s) => Ok(Value::String(s.clone())),
            _ => Err(cx.reject(path, "email expected", input)),
        }
    }

    fn encode(&self, _node: &CustomNode, value: &Value, path: &Path, _cx: &Encoder<'_>) -> Result<Json, EncodeError> {
        match value {
            Value::String(s) => Ok(Json::String(s.clone())),
            other => Err(mismatch(path, "email", other)),
        }
    }

    fn schema(&self, _node: &CustomNode, _generator: &mut SchemaGenerator<'_>) -> Option<Json> {
        Some(json!({ "type": "string", "format": "email" }))
    }

    fn accepts_shape(&self, _node: &CustomNode, input: &Value) -> bool {
        matches!(input, Value::String(_))
    }

    fn check_definition(&self, node: &CustomNode) -> Result<(), String> {
        options_object_or_null(node)
    }
}

// -------------------------------- record ---------------------------------- //

/// String-keyed map whose values all decode against `args[0]`.
/// Options: `maxProperties`, `pattern` (every key must match).
#[derive(Debug)]
pub struct RecordKind;

impl RecordKind {
    fn value_type(node: &CustomNode) -> Option<TypeId> {
        node.args.first().copied()
    }

    fn max_properties(node: &CustomNode) -> Option<usize> {
        node.options.get("maxProperties").and_then(Json::as_u64).map(|n| n as usize)
    }

    fn key_pattern(node: &CustomNode) -> Option<&str> {
        node.options.get("pattern").and_then(Json::as_str)
    }
}

impl CustomKind for RecordKind {
    fn name(&self) -> &str {
        "record"
    }

    fn decode(&self, node: &CustomNode, input: &Value, path: &Path, cx: &mut Decoder<'_>) -> Result<Value, Rejected> {
        let (Value::Object(entries), Some(item)) = (input, Self::value_type(node)) else {
            return Err(cx.reject(path, "record expected", input));
        };
        if let Some(max) = Self::max_properties(node) {
            if entries.len() > max {
                return Err(cx.reject(path, format!("at most {max} entries expected"), input));
            }
        }
        let keys = match Self::key_pattern(node).map(Regex::new).transpose() {
            Ok(keys) => keys,
            Err(_) => return Err(cx.reject(path, "record key pattern does not compile", input)),
        };
        let mut out = IndexMap::with_capacity(entries.len());
        let mut failed = false;
        for (key, raw) in entries {
            if let Some(keys) = &keys {
                if !keys.is_match(key) {
                    let pattern = keys.as_str();
                    cx.reject(&path.key(key.as_str()), format!("key matching {pattern} expected"), &Value::String(key.clone()));
                    failed = true;
                    if cx.stopped() {
                        break;
                    }
                    continue;
                }
            }
            match cx.decode_at(item, Some(raw), &path.key(key.as_str())) {
                Ok(Some(v)) => {
                    out.insert(key.clone(), v);
                }
                Ok(None) => {}
                Err(Rejected) => {
                    failed = true;
                    if cx.stopped() {
                        break;
                    }
                }
            }
        }
        if failed { Err(Rejected) } else { Ok(Value::Object(out)) }
    }

    fn encode(&self, node: &CustomNode, value: &Value, path: &Path, cx: &Encoder<'_>) -> Result<Json, EncodeError> {
        let (Value::Object(entries), Some(item)) = (value, Self::value_type(node)) else {
            return Err(mismatch(path, "record", value));
        };
        let mut out = serde_json::Map::with_capacity(entries.len());
        for (key, v) in entries {
            out.insert(key.clone(), cx.encode_at(item, v, &path.key(key.as_str()))?);
        }
        Ok(Json::Object(out))
    }

    fn schema(&self, node: &CustomNode, generator: &mut SchemaGenerator<'_>) -> Option<Json> {
        let item = Self::value_type(node)?;
        let mut schema = json!({ "type": "object", "additionalProperties": generator.schema_for(item) });
        if let Some(max) = Self::max_properties(node) {
            schema["maxProperties"] = Json::from(max);
        }
        if let Some(pattern) = Self::key_pattern(node) {
            schema["propertyNames"] = json!({ "pattern": pattern });
        }
        Some(schema)
    }

    fn accepts_shape(&self, _node: &CustomNode, input: &Value) -> bool {
        matches!(input, Value::Object(_))
    }

    fn check_definition(&self, node: &CustomNode) -> Result<(), String> {
        options_object_or_null(node)?;
        if node.args.len() != 1 {
            return Err(format!("record takes exactly one type argument, got {}", node.args.len()));
        }
        match node.options.get("maxProperties") {
            None => {}
            Some(v) if v.as_u64().is_some() => {}
            Some(_) => return Err("maxProperties must be a non-negative integer".to_string()),
        }
        match node.options.get("pattern") {
            None => Ok(()),
            Some(Json::String(pattern)) => Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| format!("invalid key pattern `{pattern}`: {e}")),
            Some(_) => Err("pattern must be a string".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeOptions};
    use crate::error::DefinitionError;
    use crate::node::Registry;

    #[test]
    fn record_keys_follow_pattern() {
        let mut b = Registry::builder();
        let n = b.number();
        let node = b.custom("record", json!({"pattern": "^[a-z]+$"}), vec![n]).unwrap();
        let rec = b.add(node);
        let reg = b.build().unwrap();
        assert!(decode(&reg, rec, &json!({"ok": 1}), &DecodeOptions::default()).is_ok());
        let errors = decode(&reg, rec, &json!({"ok": 1, "NOT LOWER": 2}), &DecodeOptions::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "NOT LOWER");
        assert_eq!(errors[0].error, "key matching ^[a-z]+$ expected");

        let mut generator = SchemaGenerator::new(&reg);
        assert_eq!(generator.schema_for(rec)["propertyNames"], json!({"pattern": "^[a-z]+$"}));
    }

    #[test]
    fn record_pattern_must_compile() {
        let mut b = Registry::builder();
        let n = b.number();
        let node = b.custom("record", json!({"pattern": "(unclosed"}), vec![n]).unwrap();
        b.add(node);
        assert!(matches!(b.build(), Err(DefinitionError::Options { .. })));

        let mut b = Registry::builder();
        let n = b.number();
        let node = b.custom("record", json!({"pattern": 3}), vec![n]).unwrap();
        b.add(node);
        assert!(matches!(b.build(), Err(DefinitionError::Options { .. })));
    }

    #[test]
    fn instants_share_a_representation() {
        let node = |kind: Arc<dyn CustomKind>| CustomNode { kind, options: Json::Null, args: vec![] };
        let dt = node(Arc::new(DateTimeKind));
        let ts = node(Arc::new(TimestampKind));
        assert_eq!(dt.kind.representation(&dt), ts.kind.representation(&ts));
        let email = node(Arc::new(EmailKind));
        assert_eq!(email.kind.representation(&email), None);
    }
}
