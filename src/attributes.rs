use std::collections::BTreeMap;

use derive_more::From;
use serde::{ser::Error as _, Deserialize, Serialize, Serializer};

/// Attribute name to value mapping.
///
/// `BTreeMap` keeps attribute order stable, so serialized records are deterministic.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A JSON-like value carried by evaluation contexts and flag results.
///
/// Unlike [`serde_json::Value`], `AttributeValue` can hold non-finite numbers (NaN, infinities)
/// that callers may put into a context. Such values are not encodable as JSON: serializing them
/// fails, and [`AttributeValue::is_json_encodable`] reports them upfront.
///
/// ```
/// # use experiment_firehose::AttributeValue;
/// let tier: AttributeValue = "gold".into();
/// let seats: AttributeValue = 3i64.into();
/// assert!(tier.is_json_encodable());
/// assert!(!AttributeValue::Number(f64::NAN).is_json_encodable());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, From)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Boolean(bool),
    /// Whole numbers are kept apart from floats so they round-trip without a trailing `.0`.
    Integer(i64),
    /// Whole numbers above `i64::MAX`. Smaller values are always [`AttributeValue::Integer`].
    #[from(ignore)]
    Unsigned(u64),
    Number(f64),
    String(String),
    Array(Vec<AttributeValue>),
    Object(Attributes),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Return `true` if the value (and everything nested in it) can be written as JSON.
    pub fn is_json_encodable(&self) -> bool {
        match self {
            AttributeValue::Number(n) => n.is_finite(),
            AttributeValue::Array(values) => values.iter().all(AttributeValue::is_json_encodable),
            AttributeValue::Object(map) => map.values().all(AttributeValue::is_json_encodable),
            _ => true,
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Null => serializer.serialize_unit(),
            AttributeValue::Boolean(b) => serializer.serialize_bool(*b),
            AttributeValue::Integer(i) => serializer.serialize_i64(*i),
            AttributeValue::Unsigned(u) => serializer.serialize_u64(*u),
            AttributeValue::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            AttributeValue::Number(n) => Err(S::Error::custom(format_args!(
                "{n} cannot be represented in JSON"
            ))),
            AttributeValue::String(s) => serializer.serialize_str(s),
            AttributeValue::Array(values) => serializer.collect_seq(values),
            AttributeValue::Object(map) => serializer.collect_map(map),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Boolean(b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => AttributeValue::Integer(i),
                (None, Some(u)) => AttributeValue::Unsigned(u),
                // as_f64() only fails for arbitrary-precision numbers, which we don't enable.
                (None, None) => AttributeValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => AttributeValue::String(s),
            serde_json::Value::Array(values) => {
                AttributeValue::Array(values.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => AttributeValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}
