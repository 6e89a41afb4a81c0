//! Settings maps and their conflict-checked merging.
//!
//! A task is uniquely defined by its settings: a flat map from string keys to
//! scalar values. The *effective* settings of a task are its own settings
//! folded together with the effective settings of every prerequisite, and
//! two sources are never allowed to disagree on a key.
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::{Display, Formatter};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::core::{Blake3Hasher, Hash32};
use crate::error::{ConflictError, NonFiniteError};

/// A single settings value.
///
/// Serialized without a tag, so a metadata sidecar stays a plain JSON
/// object such as `{"tracker_id":"UBPup","matlab":true}`. Floats compare
/// by their bits, so every value equals itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn feed(&self, hasher: &mut Blake3Hasher) {
        match self {
            Value::Bool(value) => hasher.tag(0).field(&[*value as u8]),
            Value::Int(value) => hasher.tag(1).field(&value.to_le_bytes()),
            Value::Float(value) => hasher.tag(2).field(&value.to_bits().to_le_bytes()),
            Value::Text(value) => hasher.tag(3).field(value.as_bytes()),
        };
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&Utf8Path> for Value {
    fn from(value: &Utf8Path) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Utf8PathBuf> for Value {
    fn from(value: Utf8PathBuf) -> Self {
        Value::Text(value.into_string())
    }
}

/// An ordered settings map. Ordering by key makes both the fingerprint and
/// the serialized sidecar independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Folds `other` into `self`, failing on the first key both maps hold
    /// with different values. On error `self` may already contain some of
    /// the entries of `other`.
    pub fn merge(&mut self, other: &Settings) -> Result<(), ConflictError> {
        for (key, value) in &other.0 {
            match self.0.entry(key.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(value.clone());
                }
                Entry::Occupied(entry) if entry.get() != value => {
                    return Err(ConflictError {
                        key: key.clone(),
                        existing: entry.get().clone(),
                        incoming: value.clone(),
                    });
                }
                Entry::Occupied(_) => {}
            }
        }

        Ok(())
    }

    /// Fails on the first NaN or infinite float, which JSON cannot carry.
    pub fn check_finite(&self) -> Result<(), NonFiniteError> {
        for (key, value) in &self.0 {
            if let Value::Float(float) = value
                && !float.is_finite()
            {
                return Err(NonFiniteError {
                    key: key.clone(),
                    value: *float,
                });
            }
        }

        Ok(())
    }

    /// Order-independent digest of the whole map. Every entry is fed as
    /// length-prefixed key and tagged value, in key order.
    pub fn fingerprint(&self) -> Hash32 {
        let mut hasher = Blake3Hasher::default();

        for (key, value) in &self.0 {
            hasher.field(key.as_bytes());
            value.feed(&mut hasher);
        }

        hasher.into()
    }
}

impl Display for Settings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}

impl<K, V> FromIterator<(K, V)> for Settings
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Settings(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Collects settings before a task is built. Once [`build`](Self::build) is
/// called the map is frozen, so no fingerprint is ever taken against a
/// half-populated map.
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    entries: BTreeMap<String, Value>,
}

impl SettingsBuilder {
    /// Sets `key`, replacing any value set earlier on this builder.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn extend(mut self, settings: Settings) -> Self {
        self.entries.extend(settings.0);
        self
    }

    pub fn build(self) -> Settings {
        Settings(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_disjoint() {
        let mut a: Settings = [("x", 1)].into_iter().collect();
        let b: Settings = [("y", "two")].into_iter().collect::<Settings>();

        a.merge(&b).unwrap();

        assert_eq!(a.len(), 2);
        assert_eq!(a.get("y"), Some(&Value::Text("two".into())));
    }

    #[test]
    fn test_merge_agreeing_duplicate() {
        let mut a: Settings = [("x", 1)].into_iter().collect();
        let b: Settings = [("x", 1)].into_iter().collect();

        assert!(a.merge(&b).is_ok());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_merge_conflict() {
        let mut a: Settings = [("x", 1)].into_iter().collect();
        let b: Settings = [("x", 2)].into_iter().collect();

        let err = a.merge(&b).unwrap_err();
        assert_eq!(err.key, "x");
        assert_eq!(err.existing, Value::Int(1));
        assert_eq!(err.incoming, Value::Int(2));
    }

    #[test]
    fn test_int_and_float_are_distinct() {
        let mut a: Settings = [("x", Value::Int(1))].into_iter().collect();
        let b: Settings = [("x", Value::Float(1.0))].into_iter().collect();

        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_nan_agrees_with_itself() {
        let mut a: Settings = [("rate", f64::NAN)].into_iter().collect();
        let b = a.clone();

        assert!(a.merge(&b).is_ok());
    }

    #[test]
    fn test_check_finite() {
        let finite = Settings::builder().set("rate", 0.5).set("n", 3).build();
        assert!(finite.check_finite().is_ok());

        let infinite = Settings::builder().set("rate", f64::INFINITY).build();
        let err = infinite.check_finite().unwrap_err();
        assert_eq!(err.key, "rate");
    }

    #[test]
    fn test_float_survives_json() {
        let settings = Settings::builder().set("rate", 1.7983738762488435).build();
        let json = serde_json::to_string(&settings).unwrap();

        assert_eq!(serde_json::from_str::<Settings>(&json).unwrap(), settings);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = Settings::builder().set("a", 1).set("b", "x").build();
        let b = Settings::builder().set("b", "x").set("a", 1).build();

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_any_value() {
        let a = Settings::builder().set("a", 1).set("b", "x").build();
        let b = Settings::builder().set("a", 1).set("b", "y").build();
        let c = Settings::builder().set("a", 2).set("b", "x").build();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_does_not_cancel_out() {
        // Swapping values between keys must not collide.
        let a = Settings::builder().set("a", 1).set("b", 2).build();
        let b = Settings::builder().set("a", 2).set("b", 1).build();

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_sidecar_json_shape() {
        let settings = Settings::builder()
            .set("tracker_id", "UBPup")
            .set("matlab", true)
            .set("rate", 0.5)
            .set("count", 3)
            .build();

        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(
            json,
            r#"{"count":3,"matlab":true,"rate":0.5,"tracker_id":"UBPup"}"#
        );

        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_display() {
        let settings = Settings::builder().set("x", 1).set("name", "imu").build();
        assert_eq!(settings.to_string(), r#"{name: "imu", x: 1}"#);
    }
}
