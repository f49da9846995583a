//! Compact binary form of a record.
//!
//! ```text
//! "RPL1" | u16 BE tag_len | tag (utf8) | avro datum
//! ```
//!
//! The datum is the record's structured form encoded against an avro record
//! schema derived from the codec's [`Schema`]: `string` → string,
//! `int64` → long, `float64` → double, `bool` → boolean. Field order is schema
//! order. Avro datum encoding carries no names or type markers, so the tag's
//! codec drives decoding. Output is byte-identical for identical input.

use apache_avro::Schema as AvroSchema;
use apache_avro::types::Value as AvroValue;

use crate::error::CodecError;
use crate::record::{StructuredForm, TypeKey};
use crate::schema::{Field, Schema};
use crate::value::{Value, ValueType};

pub const MAGIC: &[u8; 4] = b"RPL1";

/// Avro record schema for a list of declared fields.
///
/// Field names must be valid avro names (`[A-Za-z_][A-Za-z0-9_]*`).
pub(crate) fn avro_schema(fields: &[Field]) -> Result<AvroSchema, CodecError> {
    let fields: Vec<serde_json::Value> = fields
        .iter()
        .map(|f| serde_json::json!({ "name": f.name, "type": avro_type(f.value_type) }))
        .collect();
    let raw = serde_json::json!({ "type": "record", "name": "event", "fields": fields });
    AvroSchema::parse_str(&raw.to_string()).map_err(|e| CodecError::malformed(format!("avro schema: {e}")))
}

fn avro_type(ty: ValueType) -> &'static str {
    match ty {
        ValueType::String => "string",
        ValueType::Int64 => "long",
        ValueType::Float64 => "double",
        ValueType::Bool => "boolean",
    }
}

fn to_avro(value: &Value) -> AvroValue {
    match value {
        Value::String(s) => AvroValue::String(s.clone()),
        Value::Int64(v) => AvroValue::Long(*v),
        Value::Float64(v) => AvroValue::Double(*v),
        Value::Bool(v) => AvroValue::Boolean(*v),
    }
}

fn from_avro(field: &Field, value: AvroValue) -> Result<Value, CodecError> {
    match (field.value_type, value) {
        (ValueType::String, AvroValue::String(s)) => Ok(Value::String(s)),
        (ValueType::Int64, AvroValue::Long(v)) => Ok(Value::Int64(v)),
        (ValueType::Float64, AvroValue::Double(v)) => Ok(Value::Float64(v)),
        (ValueType::Bool, AvroValue::Boolean(v)) => Ok(Value::Bool(v)),
        (ty, other) => Err(CodecError::malformed(format!(
            "field '{}': expected {ty}, decoded {other:?}",
            field.name
        ))),
    }
}

/// Serialize a structured form that already matches `schema`.
pub fn encode(type_key: &TypeKey, schema: &Schema, form: &StructuredForm) -> Result<Vec<u8>, CodecError> {
    schema
        .check(form)
        .map_err(|e| CodecError::malformed(format!("type '{type_key}': {e}")))?;

    let tag = type_key.as_str().as_bytes();
    let tag_len = u16::try_from(tag.len())
        .map_err(|_| CodecError::malformed(format!("type tag too long: {} bytes", tag.len())))?;

    let datum = AvroValue::Record(
        form.iter()
            .map(|(name, value)| (name.to_string(), to_avro(value)))
            .collect(),
    );
    let body = apache_avro::to_avro_datum(schema.avro(), datum)
        .map_err(|e| CodecError::malformed(format!("type '{type_key}': avro encode: {e}")))?;

    let mut buf = Vec::with_capacity(MAGIC.len() + 2 + tag.len() + body.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&tag_len.to_be_bytes());
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Read the type tag; returns the tag and the remaining datum bytes.
pub fn split_tag(bytes: &[u8]) -> Result<(&str, &[u8]), CodecError> {
    let rest = bytes
        .strip_prefix(MAGIC)
        .ok_or_else(|| CodecError::malformed("bad magic, not a replay record"))?;
    let (tag_len, rest) = rest
        .split_first_chunk::<2>()
        .ok_or_else(|| CodecError::malformed("truncated reading type tag length"))?;
    let (tag, body) = rest
        .split_at_checked(u16::from_be_bytes(*tag_len) as usize)
        .ok_or_else(|| CodecError::malformed("truncated reading type tag"))?;
    Ok((std::str::from_utf8(tag)?, body))
}

/// Decode the avro datum against `schema`.
pub fn decode_body(schema: &Schema, body: &[u8]) -> Result<StructuredForm, CodecError> {
    let mut reader = body;
    let datum = apache_avro::from_avro_datum(schema.avro(), &mut reader, None)
        .map_err(|e| CodecError::malformed(format!("avro decode: {e}")))?;
    if !reader.is_empty() {
        return Err(CodecError::malformed(format!(
            "{} trailing bytes after last field",
            reader.len()
        )));
    }

    let AvroValue::Record(values) = datum else {
        return Err(CodecError::malformed("avro datum is not a record"));
    };
    if values.len() != schema.len() {
        return Err(CodecError::malformed(format!(
            "expected {} fields, decoded {}",
            schema.len(),
            values.len()
        )));
    }

    schema
        .fields()
        .iter()
        .zip(values)
        .map(|(field, (_, value))| -> Result<(String, Value), CodecError> {
            Ok((field.name.clone(), from_avro(field, value)?))
        })
        .collect::<Result<Vec<_>, CodecError>>()
        .map(|entries| entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::with_payload(vec![
            Field::new("signal", ValueType::Int64),
            Field::new("score", ValueType::Float64),
            Field::new("text", ValueType::String),
            Field::new("flag", ValueType::Bool),
        ])
        .unwrap()
    }

    fn form() -> StructuredForm {
        let mut form = schema().zero_form();
        form.insert("subject_id", "EURUSD.XCME");
        form.insert("event_time", 100i64);
        form.insert("ingestion_time", 105i64);
        form.insert("signal", -3i64);
        form.insert("score", 0.25);
        form.insert("text", "héllo");
        form.insert("flag", true);
        form
    }

    #[test]
    fn encoding_is_deterministic_and_decodable() {
        let key = TypeKey::new("tweet");
        let a = encode(&key, &schema(), &form()).unwrap();
        let b = encode(&key, &schema(), &form()).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..4], MAGIC);

        let (tag, body) = split_tag(&a).unwrap();
        assert_eq!(tag, "tweet");
        assert_eq!(decode_body(&schema(), body).unwrap(), form());
    }

    #[test]
    fn body_is_a_plain_avro_datum() {
        let key = TypeKey::new("tweet");
        let bytes = encode(&key, &schema(), &form()).unwrap();
        let (_, body) = split_tag(&bytes).unwrap();

        let mut reader = body;
        let datum = apache_avro::from_avro_datum(schema().avro(), &mut reader, None).unwrap();
        let fields = match datum {
            AvroValue::Record(fields) => fields,
            other => panic!("expected a record, got {other:?}"),
        };
        assert_eq!(fields[0], ("subject_id".to_string(), AvroValue::String("EURUSD.XCME".into())));
        assert_eq!(fields[3], ("signal".to_string(), AvroValue::Long(-3)));
        assert_eq!(fields[6], ("flag".to_string(), AvroValue::Boolean(true)));
    }

    #[test]
    fn every_truncation_is_malformed() {
        let key = TypeKey::new("tweet");
        let bytes = encode(&key, &schema(), &form()).unwrap();
        for cut in 0..bytes.len() {
            let result = split_tag(&bytes[..cut]).and_then(|(_, body)| decode_body(&schema(), body));
            let err = result.expect_err("truncated input must not decode");
            assert!(err.is_malformed(), "cut {cut}: {err}");
        }
    }

    #[test]
    fn trailing_and_mistyped_bytes_are_rejected() {
        let key = TypeKey::new("tweet");
        let mut bytes = encode(&key, &schema(), &form()).unwrap();
        bytes.push(0);
        let (_, body) = split_tag(&bytes).unwrap();
        assert!(decode_body(&schema(), body).unwrap_err().to_string().contains("trailing"));

        // -3 zigzags to byte 5, which is not a valid avro boolean.
        let other = Schema::with_payload(vec![Field::new("signal", ValueType::Bool)]).unwrap();
        let bytes = encode(&key, &schema(), &form()).unwrap();
        let (_, body) = split_tag(&bytes).unwrap();
        assert!(decode_body(&other, body).unwrap_err().is_malformed());

        assert!(split_tag(b"NOPE\x00\x00").unwrap_err().is_malformed());
    }

    #[test]
    fn encode_refuses_form_outside_schema() {
        let mut f = form();
        f.insert("extra", 1i64);
        assert!(encode(&TypeKey::new("tweet"), &schema(), &f).is_err());
    }

    #[test]
    fn field_names_must_be_avro_names() {
        assert!(avro_schema(&[Field::new("signal_1", ValueType::Int64)]).is_ok());
        assert!(avro_schema(&[Field::new("bad-name", ValueType::Int64)]).unwrap_err().is_malformed());
    }
}
