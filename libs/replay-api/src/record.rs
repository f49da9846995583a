use std::sync::Arc;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::schema::{EVENT_TIME, INGESTION_TIME, SUBJECT_ID};
use crate::value::Value;

// ═══════════════════════════════════════════════════════════════
//  UnixNanos
// ═══════════════════════════════════════════════════════════════

/// Logical timestamp in nanoseconds.
///
/// Signed so that it maps losslessly onto the `int64` column it is stored in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixNanos(pub i64);

impl UnixNanos {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for UnixNanos {
    fn from(v: i64) -> Self {
        UnixNanos(v)
    }
}

impl std::fmt::Display for UnixNanos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════
//  TypeKey
// ═══════════════════════════════════════════════════════════════

/// Stable identity of a record type, used as the subscription lookup key.
///
/// Compared by name: two keys built independently from the same name are equal
/// and hash identically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey(Arc<str>);

impl TypeKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        TypeKey(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeKey({})", self.0)
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeKey {
    fn from(s: &str) -> Self {
        TypeKey::new(s)
    }
}

impl From<String> for TypeKey {
    fn from(s: String) -> Self {
        TypeKey(Arc::from(s))
    }
}

impl Serialize for TypeKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TypeKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TypeKey::from(s))
    }
}

// ═══════════════════════════════════════════════════════════════
//  StructuredForm
// ═══════════════════════════════════════════════════════════════

/// Ordered field name → primitive value mapping.
///
/// Serializes as a JSON object with keys in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredForm {
    entries: Vec<(String, Value)>,
}

impl StructuredForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Set a field. An existing field keeps its position; a new one is appended.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

impl FromIterator<(String, Value)> for StructuredForm {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut form = StructuredForm::new();
        for (k, v) in iter {
            form.insert(k, v);
        }
        form
    }
}

impl Serialize for StructuredForm {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StructuredForm {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FormVisitor;

        impl<'de> Visitor<'de> for FormVisitor {
            type Value = StructuredForm;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an object of primitive values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut form = StructuredForm::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    if form.get(&k).is_some() {
                        return Err(serde::de::Error::custom(format!("duplicate field '{k}'")));
                    }
                    form.entries.push((k, v));
                }
                Ok(form)
            }
        }

        deserializer.deserialize_map(FormVisitor)
    }
}

// ═══════════════════════════════════════════════════════════════
//  EventRecord
// ═══════════════════════════════════════════════════════════════

/// Immutable timestamped record flowing through the feed.
///
/// `event_time` drives ordering; `ingestion_time` is carried as metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    type_key: TypeKey,
    subject_id: String,
    event_time: UnixNanos,
    ingestion_time: UnixNanos,
    payload: StructuredForm,
}

impl EventRecord {
    pub fn new(
        type_key: TypeKey,
        subject_id: impl Into<String>,
        event_time: UnixNanos,
        ingestion_time: UnixNanos,
        payload: StructuredForm,
    ) -> Self {
        Self {
            type_key,
            subject_id: subject_id.into(),
            event_time,
            ingestion_time,
            payload,
        }
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn event_time(&self) -> UnixNanos {
        self.event_time
    }

    pub fn ingestion_time(&self) -> UnixNanos {
        self.ingestion_time
    }

    pub fn payload(&self) -> &StructuredForm {
        &self.payload
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Header fields followed by the payload fields.
    pub fn structured(&self) -> StructuredForm {
        let mut form = StructuredForm::with_capacity(3 + self.payload.len());
        form.entries.push((SUBJECT_ID.to_string(), Value::String(self.subject_id.clone())));
        form.entries.push((EVENT_TIME.to_string(), Value::Int64(self.event_time.0)));
        form.entries.push((INGESTION_TIME.to_string(), Value::Int64(self.ingestion_time.0)));
        form.entries.extend(self.payload.entries.iter().cloned());
        form
    }

    /// Inverse of [`EventRecord::structured`]. The header fields must be present
    /// with their declared types; everything else becomes the payload.
    pub fn from_structured(type_key: TypeKey, mut form: StructuredForm) -> Result<Self, CodecError> {
        let subject_id = match form.remove(SUBJECT_ID) {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(CodecError::malformed(format!(
                    "'{SUBJECT_ID}' must be a string, found {}",
                    other.value_type()
                )));
            }
            None => return Err(CodecError::malformed(format!("missing '{SUBJECT_ID}'"))),
        };
        let event_time = take_time(&mut form, EVENT_TIME)?;
        let ingestion_time = take_time(&mut form, INGESTION_TIME)?;
        Ok(Self {
            type_key,
            subject_id,
            event_time,
            ingestion_time,
            payload: form,
        })
    }
}

fn take_time(form: &mut StructuredForm, name: &str) -> Result<UnixNanos, CodecError> {
    match form.remove(name) {
        Some(Value::Int64(v)) => Ok(UnixNanos(v)),
        Some(other) => Err(CodecError::malformed(format!(
            "'{name}' must be int64, found {}",
            other.value_type()
        ))),
        None => Err(CodecError::malformed(format!("missing '{name}'"))),
    }
}
