// ── Values ──
//
// The engine's value type. Two variants have no JSON counterpart:
// `Sensitive` wraps a secret so it can flow into the attribute that consumes
// it without ever being printed, and `Unknown` stands in for late-bound
// attributes (ids, ARNs, DNS names) whose producer has not applied yet.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SENSITIVE_KEY: &str = "$sensitive";

// ── Sensitive ───────────────────────────────────────────────────────

/// A secret string. Compares by content; never prints it.
#[derive(Clone)]
pub struct Sensitive(SecretString);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<SecretString> for Sensitive {
    fn from(s: SecretString) -> Self {
        Self(s)
    }
}

impl PartialEq for Sensitive {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(***)")
    }
}

// ── Value ───────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Sensitive(Sensitive),
    /// Known only after the producing resource applies.
    Unknown,
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn sensitive(s: impl Into<String>) -> Self {
        Self::Sensitive(Sensitive::new(s))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `true` if no `Unknown` appears anywhere inside.
    pub fn is_known(&self) -> bool {
        match self {
            Self::Unknown => false,
            Self::List(items) => items.iter().all(Value::is_known),
            Self::Map(map) => map.values().all(Value::is_known),
            _ => true,
        }
    }

    /// `true` if a sensitive value appears anywhere inside.
    pub fn is_sensitive(&self) -> bool {
        match self {
            Self::Sensitive(_) => true,
            Self::List(items) => items.iter().any(Value::is_sensitive),
            Self::Map(map) => map.values().any(Value::is_sensitive),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.get(key)
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Sensitive(_) => "sensitive string",
            Self::Unknown => "unknown",
        }
    }

    /// Scalar rendering used for string interpolation and lookup filters.
    /// Exposes sensitive content; callers must re-wrap the result.
    pub fn interpolate(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Sensitive(s) => Some(s.expose().to_owned()),
            _ => None,
        }
    }

    // ── Wire conversion ─────────────────────────────────────────────

    /// JSON payload for a platform request. Sensitive values are exposed;
    /// `None` if anything inside is still unknown.
    pub fn to_wire(&self) -> Option<serde_json::Value> {
        Some(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Sensitive(s) => serde_json::Value::String(s.expose().to_owned()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_wire)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| v.to_wire().map(|v| (k.clone(), v)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Self::Unknown => return None,
        })
    }

    pub fn from_wire(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.clone()),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_wire).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_wire(v)))
                    .collect(),
            ),
        }
    }

    /// Whether this value, once exposed, equals what the platform reports.
    pub fn matches_wire(&self, observed: Option<&serde_json::Value>) -> bool {
        match (self.to_wire(), observed) {
            (Some(serde_json::Value::Null), None) => true,
            (Some(ours), Some(theirs)) => &ours == theirs,
            _ => false,
        }
    }
}

// ── Conversions ─────────────────────────────────────────────────────

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

// ── Rendering ───────────────────────────────────────────────────────

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Sensitive(_) => f.write_str("(sensitive value)"),
            Self::Unknown => f.write_str("(known after apply)"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ── State-file encoding ─────────────────────────────────────────────
//
// Sensitive values persist as `{"$sensitive": "..."}` so a reload keeps
// them tainted. Unknown values are never persisted.

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{Error as _, SerializeMap, SerializeSeq};
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for v in items {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            Self::Sensitive(s) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry(SENSITIVE_KEY, s.expose())?;
                m.end()
            }
            Self::Unknown => Err(S::Error::custom("unknown values cannot be persisted")),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        decode_stored(json).map_err(D::Error::custom)
    }
}

fn decode_stored(json: serde_json::Value) -> Result<Value, String> {
    Ok(match json {
        serde_json::Value::Object(mut map) => {
            if map.len() == 1 && map.contains_key(SENSITIVE_KEY) {
                return match map.remove(SENSITIVE_KEY) {
                    Some(serde_json::Value::String(s)) => Ok(Value::sensitive(s)),
                    _ => Err(format!("{SENSITIVE_KEY} must hold a string")),
                };
            }
            Value::Map(
                map.into_iter()
                    .map(|(k, v)| decode_stored(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            )
        }
        serde_json::Value::Array(items) => Value::List(
            items
                .into_iter()
                .map(decode_stored)
                .collect::<Result<_, _>>()?,
        ),
        other => Value::from_wire(&other),
    })
}
