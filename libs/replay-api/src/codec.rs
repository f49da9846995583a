use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binary;
use crate::error::CodecError;
use crate::record::{EventRecord, StructuredForm, TypeKey, UnixNanos};
use crate::schema::{Field, Schema};
use crate::value::Value;

/// Converter for one record type: structured ↔ binary ↔ columnar schema.
///
/// - `to_structured()` / `from_structured()`: record ↔ ordered field map.
/// - `schema()`: declared field → type mapping for batch writers. Must list
///   exactly the keys `to_structured()` produces, in the same order.
/// - `encode()` / `decode()`: shared binary form built on the two above.
pub trait Codec: Send + Sync {
    fn type_key(&self) -> &TypeKey;
    fn schema(&self) -> &Schema;
    fn to_structured(&self, record: &EventRecord) -> Result<StructuredForm, CodecError>;
    fn from_structured(&self, form: StructuredForm) -> Result<EventRecord, CodecError>;

    fn encode(&self, record: &EventRecord) -> Result<Vec<u8>, CodecError> {
        if record.type_key() != self.type_key() {
            return Err(CodecError::TypeMismatch {
                expected: self.type_key().to_string(),
                actual: record.type_key().to_string(),
            });
        }
        let form = self.to_structured(record)?;
        binary::encode(self.type_key(), self.schema(), &form)
    }

    fn decode(&self, bytes: &[u8]) -> Result<EventRecord, CodecError> {
        let (tag, body) = binary::split_tag(bytes)?;
        if tag != self.type_key().as_str() {
            return Err(CodecError::UnknownType(tag.to_string()));
        }
        let form = binary::decode_body(self.schema(), body)
            .map_err(|e| e.with_context(format!("type '{tag}'")))?;
        self.from_structured(form)
    }
}

// ═══════════════════════════════════════════════════════════════
//  SchemaCodec: data-driven, declared in configuration
// ═══════════════════════════════════════════════════════════════

/// Codec whose layout is fully described by its schema.
#[derive(Debug, Clone)]
pub struct SchemaCodec {
    type_key: TypeKey,
    schema: Schema,
}

impl SchemaCodec {
    pub fn new(type_key: TypeKey, payload: Vec<Field>) -> Result<Self, CodecError> {
        let schema = Schema::with_payload(payload)
            .map_err(|e| CodecError::schema_mismatch(type_key.as_str(), e.to_string()))?;
        Ok(Self { type_key, schema })
    }
}

impl Codec for SchemaCodec {
    fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn to_structured(&self, record: &EventRecord) -> Result<StructuredForm, CodecError> {
        let form = record.structured();
        self.schema
            .check(&form)
            .map_err(|e| CodecError::malformed(format!("type '{}': {e}", self.type_key)))?;
        Ok(form)
    }

    fn from_structured(&self, form: StructuredForm) -> Result<EventRecord, CodecError> {
        self.schema
            .check(&form)
            .map_err(|e| CodecError::malformed(format!("type '{}': {e}", self.type_key)))?;
        EventRecord::from_structured(self.type_key.clone(), form)
    }
}

// ═══════════════════════════════════════════════════════════════
//  CustomEvent: strongly typed records
// ═══════════════════════════════════════════════════════════════

/// A Rust struct that travels through the feed as an [`EventRecord`].
///
/// Identity, data and conversion stay separate: the struct provides its payload
/// accessors, [`TypedCodec`] derives the schema and binary form from them, and
/// the type key is the `TYPE_NAME` constant.
pub trait CustomEvent: Sized + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    /// Declared payload columns, header excluded.
    fn payload_fields() -> Vec<Field>;

    fn subject_id(&self) -> &str;
    fn event_time(&self) -> UnixNanos;
    fn ingestion_time(&self) -> UnixNanos;

    /// Payload values, keyed and ordered as `payload_fields()`.
    fn payload(&self) -> StructuredForm;

    fn from_parts(
        subject_id: String,
        event_time: UnixNanos,
        ingestion_time: UnixNanos,
        payload: &StructuredForm,
    ) -> Result<Self, CodecError>;

    fn type_key() -> TypeKey {
        TypeKey::new(Self::TYPE_NAME)
    }

    fn to_record(&self) -> EventRecord {
        EventRecord::new(
            Self::type_key(),
            self.subject_id(),
            self.event_time(),
            self.ingestion_time(),
            self.payload(),
        )
    }

    fn from_record(record: &EventRecord) -> Result<Self, CodecError> {
        if record.type_key().as_str() != Self::TYPE_NAME {
            return Err(CodecError::TypeMismatch {
                expected: Self::TYPE_NAME.to_string(),
                actual: record.type_key().to_string(),
            });
        }
        Self::from_parts(
            record.subject_id().to_string(),
            record.event_time(),
            record.ingestion_time(),
            record.payload(),
        )
    }
}

/// Codec for a [`CustomEvent`] type. Every conversion goes through the typed
/// struct, so accessors that drift from `payload_fields()` surface as a
/// schema mismatch when the codec is registered.
pub struct TypedCodec<T> {
    type_key: TypeKey,
    schema: Schema,
    _marker: PhantomData<fn() -> T>,
}

impl<T: CustomEvent> TypedCodec<T> {
    pub fn new() -> Result<Self, CodecError> {
        let schema = Schema::with_payload(T::payload_fields())
            .map_err(|e| CodecError::schema_mismatch(T::TYPE_NAME, e.to_string()))?;
        Ok(Self {
            type_key: T::type_key(),
            schema,
            _marker: PhantomData,
        })
    }
}

impl<T: CustomEvent> Codec for TypedCodec<T> {
    fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn to_structured(&self, record: &EventRecord) -> Result<StructuredForm, CodecError> {
        Ok(T::from_record(record)?.to_record().structured())
    }

    fn from_structured(&self, form: StructuredForm) -> Result<EventRecord, CodecError> {
        self.schema
            .check(&form)
            .map_err(|e| CodecError::malformed(format!("type '{}': {e}", self.type_key)))?;
        let record = EventRecord::from_structured(self.type_key.clone(), form)?;
        Ok(T::from_record(&record)?.to_record())
    }
}

/// Read a required typed payload value; used by `CustomEvent::from_parts` impls.
pub fn required<'a, V>(
    payload: &'a StructuredForm,
    name: &str,
    get: impl FnOnce(&'a Value) -> Option<V>,
) -> Result<V, CodecError> {
    let value = payload
        .get(name)
        .ok_or_else(|| CodecError::malformed(format!("missing field '{name}'")))?;
    get(value).ok_or_else(|| {
        CodecError::malformed(format!(
            "field '{name}' has unexpected type {}",
            value.value_type()
        ))
    })
}

// ═══════════════════════════════════════════════════════════════
//  CodecRegistry
// ═══════════════════════════════════════════════════════════════

/// Registered codecs by type key.
///
/// Registration verifies the schema/accessor contract up front; decode-time
/// failures are then purely data errors.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<TypeKey, Arc<dyn Codec>>,
    order: Vec<TypeKey>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry").field("types", &self.order).finish()
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec after probing it.
    ///
    /// The probe builds the zero-valued structured form from `schema()`, runs it
    /// through `from_structured` and back through `to_structured`, and requires the
    /// result to carry exactly the declared fields, in order, with declared types.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<(), CodecError> {
        let key = codec.type_key().clone();
        if self.codecs.contains_key(&key) {
            return Err(CodecError::DuplicateType(key.to_string()));
        }

        let schema = codec.schema();
        schema
            .check_layout()
            .map_err(|e| CodecError::schema_mismatch(key.as_str(), e))?;

        let probe = codec
            .from_structured(schema.zero_form())
            .map_err(|e| CodecError::schema_mismatch(key.as_str(), format!("probe rejected: {e}")))?;
        if probe.type_key() != &key {
            return Err(CodecError::schema_mismatch(
                key.as_str(),
                format!("probe produced record of type '{}'", probe.type_key()),
            ));
        }
        let back = codec
            .to_structured(&probe)
            .map_err(|e| CodecError::schema_mismatch(key.as_str(), format!("probe rejected: {e}")))?;
        schema
            .check(&back)
            .map_err(|e| CodecError::schema_mismatch(key.as_str(), e))?;

        self.order.push(key.clone());
        self.codecs.insert(key, codec);
        Ok(())
    }

    /// Register a [`CustomEvent`] type through its [`TypedCodec`].
    pub fn register_typed<T: CustomEvent>(&mut self) -> Result<(), CodecError> {
        self.register(Arc::new(TypedCodec::<T>::new()?))
    }

    pub fn get(&self, key: &TypeKey) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(key)
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.codecs.contains_key(key)
    }

    /// Type keys in registration order.
    pub fn type_keys(&self) -> &[TypeKey] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn schema(&self, key: &TypeKey) -> Result<&Schema, CodecError> {
        Ok(self.lookup(key)?.schema())
    }

    pub fn encode(&self, record: &EventRecord) -> Result<Vec<u8>, CodecError> {
        self.lookup(record.type_key())?.encode(record)
    }

    /// Decode bytes of any registered type, dispatching on the embedded tag.
    pub fn decode(&self, bytes: &[u8]) -> Result<EventRecord, CodecError> {
        let (tag, _) = binary::split_tag(bytes)?;
        let codec = self
            .codecs
            .get(&TypeKey::new(tag))
            .ok_or_else(|| CodecError::UnknownType(tag.to_string()))?;
        codec.decode(bytes)
    }

    pub fn to_structured(&self, record: &EventRecord) -> Result<StructuredForm, CodecError> {
        self.lookup(record.type_key())?.to_structured(record)
    }

    pub fn from_structured(&self, key: &TypeKey, form: StructuredForm) -> Result<EventRecord, CodecError> {
        self.lookup(key)?.from_structured(form)
    }

    fn lookup(&self, key: &TypeKey) -> Result<&Arc<dyn Codec>, CodecError> {
        self.codecs
            .get(key)
            .ok_or_else(|| CodecError::UnknownType(key.to_string()))
    }
}
