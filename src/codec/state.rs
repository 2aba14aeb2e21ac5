//! State codec: host values <-> wire snapshots.
//!
//! The wire form is plain JSON with two reserved single-key markers:
//! - `{"$opaque": {"token": "...", "type": "..."}}` for host objects
//! - `{"$float": "NaN" | "inf" | "-inf"}` for non-finite floats
//!
//! User map keys that begin with `$` get one extra leading `$` so that a
//! map can never be mistaken for a marker.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::{json, Map as JsonMap, Number};

use crate::codec::error::CodecError;
use crate::codec::shape::Shape;
use crate::codec::value::{Opaque, Value};
use crate::protocol::CorrelationId;

const OPAQUE_MARKER: &str = "$opaque";
const FLOAT_MARKER: &str = "$float";

/// Session-scoped table of opaque host objects handed out as tokens
#[derive(Default)]
pub struct OpaqueTable {
    entries: Mutex<HashMap<String, Opaque>>,
}

impl OpaqueTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, token: String, opaque: Opaque) {
        self.entries.lock().insert(token, opaque);
    }

    pub fn resolve(&self, token: &str) -> Option<Opaque> {
        self.entries.lock().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Encoder/decoder bound to one session's opaque table
pub struct StateCodec<'a> {
    opaques: &'a OpaqueTable,
}

impl<'a> StateCodec<'a> {
    pub fn new(opaques: &'a OpaqueTable) -> Self {
        Self { opaques }
    }

    /// Encode a probe context (variable name -> value) for the event `scope`
    pub fn encode_context(
        &self,
        scope: &CorrelationId,
        context: &BTreeMap<String, Value>,
    ) -> serde_json::Value {
        self.encode_firing(scope, context, None).0
    }

    /// Encode a context together with the host's computed result.
    ///
    /// Both share one token counter, so opaque tokens stay unique within `scope`.
    pub fn encode_firing(
        &self,
        scope: &CorrelationId,
        context: &BTreeMap<String, Value>,
        computed: Option<&Value>,
    ) -> (serde_json::Value, Option<serde_json::Value>) {
        let mut encoder = Encoder {
            table: self.opaques,
            scope,
            next_token: 0,
        };
        let mut out = JsonMap::new();
        for (name, value) in context {
            out.insert(escape_key(name), encoder.encode(value));
        }
        let computed = computed.map(|value| encoder.encode(value));
        (serde_json::Value::Object(out), computed)
    }

    /// Encode a single value; opaque tokens are minted under `scope`
    pub fn encode(&self, scope: &CorrelationId, value: &Value) -> serde_json::Value {
        Encoder {
            table: self.opaques,
            scope,
            next_token: 0,
        }
        .encode(value)
    }

    /// Decode a wire payload and coerce it to `shape`
    pub fn decode(&self, raw: &serde_json::Value, shape: &Shape) -> Result<Value, CodecError> {
        let value = self.parse(raw)?;
        conform(value, shape, "$")
    }

    fn parse(&self, raw: &serde_json::Value) -> Result<Value, CodecError> {
        match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => Ok(parse_number(n)),
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| self.parse(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(marker) = map.get(OPAQUE_MARKER) {
                        return self.parse_opaque(marker);
                    }
                    if let Some(marker) = map.get(FLOAT_MARKER) {
                        return parse_special_float(marker);
                    }
                }
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    out.insert(unescape_key(key), self.parse(item)?);
                }
                Ok(Value::Map(out))
            }
        }
    }

    fn parse_opaque(&self, marker: &serde_json::Value) -> Result<Value, CodecError> {
        let token = match marker {
            serde_json::Value::String(token) => token.as_str(),
            serde_json::Value::Object(fields) => fields
                .get("token")
                .and_then(|t| t.as_str())
                .ok_or_else(|| CodecError::Malformed("opaque reference without token".into()))?,
            _ => {
                return Err(CodecError::Malformed(
                    "opaque reference must be a token".into(),
                ))
            }
        };
        self.opaques
            .resolve(token)
            .map(Value::Opaque)
            .ok_or_else(|| CodecError::UnknownOpaque(token.to_string()))
    }
}

struct Encoder<'a> {
    table: &'a OpaqueTable,
    scope: &'a CorrelationId,
    next_token: u32,
}

impl Encoder<'_> {
    fn encode(&mut self, value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => match Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None => marker(FLOAT_MARKER, json!(special_float_name(*f))),
            },
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|item| self.encode(item)).collect())
            }
            Value::Map(map) => {
                let mut out = JsonMap::new();
                for (key, item) in map {
                    out.insert(escape_key(key), self.encode(item));
                }
                serde_json::Value::Object(out)
            }
            Value::Opaque(opaque) => {
                self.next_token += 1;
                let token = format!("{}/{}", self.scope, self.next_token);
                self.table.insert(token.clone(), opaque.clone());
                marker(
                    OPAQUE_MARKER,
                    json!({ "token": token, "type": opaque.type_name() }),
                )
            }
        }
    }
}

fn marker(name: &str, payload: serde_json::Value) -> serde_json::Value {
    let mut out = JsonMap::new();
    out.insert(name.to_string(), payload);
    serde_json::Value::Object(out)
}

fn parse_number(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn special_float_name(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "inf"
    } else {
        "-inf"
    }
}

fn parse_special_float(marker: &serde_json::Value) -> Result<Value, CodecError> {
    match marker.as_str() {
        Some("NaN") => Ok(Value::Float(f64::NAN)),
        Some("inf") => Ok(Value::Float(f64::INFINITY)),
        Some("-inf") => Ok(Value::Float(f64::NEG_INFINITY)),
        _ => Err(CodecError::Malformed(format!(
            "unrecognized float marker: {marker}"
        ))),
    }
}

fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${key}")
    } else {
        key.to_string()
    }
}

fn unescape_key(key: &str) -> String {
    match key.strip_prefix("$$") {
        Some(rest) => format!("${rest}"),
        None => key.to_string(),
    }
}

fn mismatch(path: &str, shape: &Shape, value: &Value) -> CodecError {
    CodecError::TypeMismatch {
        path: path.to_string(),
        expected: shape.to_string(),
        found: value.type_name().to_string(),
    }
}

fn conform(value: Value, shape: &Shape, path: &str) -> Result<Value, CodecError> {
    match (shape, value) {
        (Shape::Any, value) => Ok(value),
        (Shape::Nullable(_), Value::Null) => Ok(Value::Null),
        (Shape::Nullable(inner), value) => conform(value, inner, path),
        (Shape::Null, Value::Null) => Ok(Value::Null),
        (Shape::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (Shape::Int, Value::Int(i)) => Ok(Value::Int(i)),
        (Shape::Int, Value::Float(f)) if is_integral(f) => Ok(Value::Int(f as i64)),
        (Shape::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (Shape::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (Shape::Str, Value::Str(s)) => Ok(Value::Str(s)),
        (Shape::Opaque, Value::Opaque(o)) => Ok(Value::Opaque(o)),
        (Shape::List(inner), Value::List(items)) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| conform(item, inner, &format!("{path}[{idx}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (Shape::Map(inner), Value::Map(map)) => map
            .into_iter()
            .map(|(key, item)| {
                let item_path = format!("{path}.{key}");
                conform(item, inner, &item_path).map(|v| (key, v))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Value::Map),
        (shape, value) => Err(mismatch(path, shape, &value)),
    }
}

fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}
