use serde::{Deserialize, Serialize};

use crate::binary;
use crate::error::CodecError;
use crate::record::StructuredForm;
use crate::value::ValueType;

/// Header field: opaque subject reference (e.g. an instrument id).
pub const SUBJECT_ID: &str = "subject_id";
/// Header field: ordering timestamp, nanoseconds.
pub const EVENT_TIME: &str = "event_time";
/// Header field: time the record entered the system, nanoseconds.
pub const INGESTION_TIME: &str = "ingestion_time";

/// Envelope key naming the record type in self-describing forms such as
/// JSON lines. Never a field name.
pub const TYPE_FIELD: &str = "type";

const HEADER: [(&str, ValueType); 3] = [
    (SUBJECT_ID, ValueType::String),
    (EVENT_TIME, ValueType::Int64),
    (INGESTION_TIME, ValueType::Int64),
];

/// A single declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl Field {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Declared field → type mapping of one record type.
///
/// Always starts with the three header fields, followed by the payload fields.
/// Field position is the position in the structured form, in the binary body
/// and in a columnar batch.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    fields: Vec<Field>,
    #[serde(skip)]
    avro: apache_avro::Schema,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Schema {}

impl Schema {
    /// Build a schema from payload fields; header fields are prepended.
    pub fn with_payload(payload: Vec<Field>) -> Result<Self, CodecError> {
        let mut fields: Vec<Field> = HEADER
            .iter()
            .map(|(name, ty)| Field::new(*name, *ty))
            .collect();
        for field in payload {
            if field.name == TYPE_FIELD || fields.iter().any(|f| f.name == field.name) {
                return Err(CodecError::malformed(format!(
                    "duplicate or reserved field name '{}'",
                    field.name
                )));
            }
            fields.push(field);
        }
        Self::from_fields(fields)
    }

    fn from_fields(fields: Vec<Field>) -> Result<Self, CodecError> {
        let avro = binary::avro_schema(&fields)?;
        Ok(Self { fields, avro })
    }

    /// Avro record schema of the binary body.
    pub(crate) fn avro(&self) -> &apache_avro::Schema {
        &self.avro
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn payload_fields(&self) -> &[Field] {
        &self.fields[HEADER.len()..]
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a structured form against the schema: same names, same order,
    /// same primitive types.
    pub fn check(&self, form: &StructuredForm) -> Result<(), String> {
        if form.len() != self.fields.len() {
            return Err(format!(
                "expected {} fields, found {}",
                self.fields.len(),
                form.len()
            ));
        }
        for (field, (name, value)) in self.fields.iter().zip(form.iter()) {
            if field.name != name {
                return Err(format!("expected field '{}', found '{name}'", field.name));
            }
            if field.value_type != value.value_type() {
                return Err(format!(
                    "field '{name}': expected {}, found {}",
                    field.value_type,
                    value.value_type()
                ));
            }
        }
        Ok(())
    }

    /// Check that the schema carries the header fields in front, has no
    /// duplicate names and does not use the `type` envelope key. Schemas built
    /// with `with_payload` always pass.
    pub fn check_layout(&self) -> Result<(), String> {
        for (i, (name, ty)) in HEADER.iter().enumerate() {
            match self.fields.get(i) {
                Some(f) if f.name == *name && f.value_type == *ty => {}
                Some(f) => {
                    return Err(format!(
                        "position {i}: expected header field '{name}' ({ty}), found '{}' ({})",
                        f.name, f.value_type
                    ));
                }
                None => return Err(format!("missing header field '{name}'")),
            }
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name == TYPE_FIELD {
                return Err(format!("field name '{TYPE_FIELD}' is reserved"));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(format!("duplicate field '{}'", field.name));
            }
        }
        Ok(())
    }

    /// Structured form holding the zero value of every field.
    pub fn zero_form(&self) -> StructuredForm {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.value_type.zero()))
            .collect()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            fields: Vec<Field>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let schema = Schema::from_fields(raw.fields).map_err(serde::de::Error::custom)?;
        schema.check_layout().map_err(serde::de::Error::custom)?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn signal_schema() -> Schema {
        Schema::with_payload(vec![Field::new("signal", ValueType::Int64)]).unwrap()
    }

    #[test]
    fn header_fields_come_first() {
        let schema = signal_schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec![SUBJECT_ID, EVENT_TIME, INGESTION_TIME, "signal"]);
        assert_eq!(schema.payload_fields().len(), 1);
        assert!(schema.check_layout().is_ok());
    }

    #[test]
    fn reserved_names_are_rejected() {
        let err = Schema::with_payload(vec![Field::new(EVENT_TIME, ValueType::Int64)]).unwrap_err();
        assert!(err.is_malformed());
        let err = Schema::with_payload(vec![
            Field::new("a", ValueType::Bool),
            Field::new("a", ValueType::Bool),
        ])
        .unwrap_err();
        assert!(err.is_malformed());
        let err = Schema::with_payload(vec![Field::new(TYPE_FIELD, ValueType::String)]).unwrap_err();
        assert!(err.to_string().contains("'type'"), "{err}");
    }

    #[test]
    fn check_reports_order_and_type_mismatches() {
        let schema = signal_schema();
        let mut form = schema.zero_form();
        assert!(schema.check(&form).is_ok());

        form.insert("signal", Value::Float64(1.0));
        let err = schema.check(&form).unwrap_err();
        assert!(err.contains("expected int64"), "{err}");

        let reordered: StructuredForm = vec![
            (EVENT_TIME.to_string(), Value::Int64(0)),
            (SUBJECT_ID.to_string(), Value::from("")),
            (INGESTION_TIME.to_string(), Value::Int64(0)),
            ("signal".to_string(), Value::Int64(0)),
        ]
        .into_iter()
        .collect();
        assert!(schema.check(&reordered).is_err());
    }

    #[test]
    fn deserialized_schema_must_carry_header() {
        let json = r#"{"fields":[{"name":"signal","type":"int64"}]}"#;
        assert!(serde_json::from_str::<Schema>(json).is_err());

        let json = r#"{"fields":[
            {"name":"subject_id","type":"string"},
            {"name":"event_time","type":"int64"},
            {"name":"ingestion_time","type":"int64"},
            {"name":"type","type":"string"}]}"#;
        let err = serde_json::from_str::<Schema>(json).unwrap_err();
        assert!(err.to_string().contains("reserved"), "{err}");

        let json = serde_json::to_string(&signal_schema()).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signal_schema());
    }
}
