//! Loosely typed input records.
//!
//! Upstream sources (spreadsheets, ERP exports, JSON payloads) disagree on key
//! casing and on how a missing value is spelled. [`RawRecord`] keeps a closed
//! set of primitive variants under lowercased keys; everything downstream reads
//! it through the normalizer.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Single raw input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Null,
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Text form of the value; numbers use Rust's shortest round-trip formatting.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Number(n) => Some(n.to_string()),
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Null => None,
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(value as f64)
    }
}

impl From<i32> for RawValue {
    fn from(value: i32) -> Self {
        RawValue::Number(f64::from(value))
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(RawValue::Null, Into::into)
    }
}

/// Record with case-insensitive keys. A key that is absent is "missing", which
/// the normalizer treats the same way as [`RawValue::Null`].
///
/// # Examples
/// ```rust
/// use fel_core::invoice::raw::{RawRecord, RawValue};
///
/// let record = RawRecord::new()
///     .with("DESCRIPCION", "Servicio")
///     .with("Cantidad", 2.0);
/// assert_eq!(record.get("descripcion"), Some(&RawValue::Text("Servicio".into())));
/// assert_eq!(record.get_any(&["quantity", "cantidad"]), Some(&RawValue::Number(2.0)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, RawValue>", into = "BTreeMap<String, RawValue>")]
pub struct RawRecord {
    fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<RawValue>) {
        self.fields.insert(key.to_lowercase(), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<RawValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(&key.to_lowercase())
    }

    /// First present, non-null value among `aliases`.
    pub fn get_any(&self, aliases: &[&str]) -> Option<&RawValue> {
        aliases
            .iter()
            .filter_map(|alias| self.get(alias))
            .find(|value| !value.is_null())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<BTreeMap<String, RawValue>> for RawRecord {
    fn from(map: BTreeMap<String, RawValue>) -> Self {
        let fields = map
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect();
        Self { fields }
    }
}

impl From<RawRecord> for BTreeMap<String, RawValue> {
    fn from(record: RawRecord) -> Self {
        record.fields
    }
}

impl<K: AsRef<str>, V: Into<RawValue>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (key, value) in iter {
            record.insert(key.as_ref(), value);
        }
        record
    }
}
