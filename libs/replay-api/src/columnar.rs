use std::sync::Arc;

use arrow_array::builder::{BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef};

use crate::codec::Codec;
use crate::error::CodecError;
use crate::record::{EventRecord, StructuredForm, TypeKey};
use crate::schema::Schema;
use crate::value::{Value, ValueType};

/// Arrow schema of a record type: one non-nullable column per declared field.
pub fn arrow_schema(schema: &Schema) -> ArrowSchema {
    let fields: Vec<ArrowField> = schema
        .fields()
        .iter()
        .map(|f| ArrowField::new(f.name.clone(), arrow_type(f.value_type), false))
        .collect();
    ArrowSchema::new(fields)
}

fn arrow_type(ty: ValueType) -> DataType {
    match ty {
        ValueType::String => DataType::Utf8,
        ValueType::Int64 => DataType::Int64,
        ValueType::Float64 => DataType::Float64,
        ValueType::Bool => DataType::Boolean,
    }
}

enum ColumnBuilder {
    String(StringBuilder),
    Int64(Int64Builder),
    Float64(Float64Builder),
    Bool(BooleanBuilder),
}

impl ColumnBuilder {
    fn with_capacity(ty: ValueType, rows: usize) -> Self {
        match ty {
            ValueType::String => ColumnBuilder::String(StringBuilder::with_capacity(rows, rows * 16)),
            ValueType::Int64 => ColumnBuilder::Int64(Int64Builder::with_capacity(rows)),
            ValueType::Float64 => ColumnBuilder::Float64(Float64Builder::with_capacity(rows)),
            ValueType::Bool => ColumnBuilder::Bool(BooleanBuilder::with_capacity(rows)),
        }
    }

    fn append(&mut self, value: Value) -> Result<(), Value> {
        match (self, value) {
            (ColumnBuilder::String(b), Value::String(v)) => b.append_value(v),
            (ColumnBuilder::Int64(b), Value::Int64(v)) => b.append_value(v),
            (ColumnBuilder::Float64(b), Value::Float64(v)) => b.append_value(v),
            (ColumnBuilder::Bool(b), Value::Bool(v)) => b.append_value(v),
            (_, v) => return Err(v),
        }
        Ok(())
    }

    fn finish(self) -> ArrayRef {
        match self {
            ColumnBuilder::String(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Int64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(mut b) => Arc::new(b.finish()),
        }
    }
}

fn value_at(column: &ArrayRef, ty: ValueType, row: usize) -> Option<Value> {
    if column.is_null(row) {
        return None;
    }
    match ty {
        ValueType::String => column
            .as_string_opt::<i32>()
            .map(|c| Value::String(c.value(row).to_string())),
        ValueType::Int64 => column
            .as_primitive_opt::<Int64Type>()
            .map(|c| Value::Int64(c.value(row))),
        ValueType::Float64 => column
            .as_primitive_opt::<Float64Type>()
            .map(|c| Value::Float64(c.value(row))),
        ValueType::Bool => column.as_boolean_opt().map(|c| Value::Bool(c.value(row))),
    }
}

/// Column-oriented batch of records of a single type: an arrow
/// [`RecordBatch`] laid out by the codec's schema, one column per declared
/// field in declared order.
#[derive(Debug, Clone)]
pub struct ColumnBatch {
    type_key: TypeKey,
    schema: Schema,
    batch: RecordBatch,
}

impl ColumnBatch {
    /// Build a batch through `codec.to_structured`, so the columns carry exactly
    /// what the binary form would.
    pub fn from_records(codec: &dyn Codec, records: &[EventRecord]) -> Result<Self, CodecError> {
        let schema = codec.schema().clone();
        let mut builders: Vec<ColumnBuilder> = schema
            .fields()
            .iter()
            .map(|f| ColumnBuilder::with_capacity(f.value_type, records.len()))
            .collect();

        for (row, record) in records.iter().enumerate() {
            if record.type_key() != codec.type_key() {
                return Err(CodecError::TypeMismatch {
                    expected: codec.type_key().to_string(),
                    actual: record.type_key().to_string(),
                });
            }
            let form = codec.to_structured(record)?;
            schema
                .check(&form)
                .map_err(|e| CodecError::malformed(format!("row {row}: {e}")))?;
            let cells = schema.fields().iter().zip(form.into_entries());
            for (builder, (field, (_, value))) in builders.iter_mut().zip(cells) {
                builder.append(value).map_err(|v| {
                    CodecError::malformed(format!(
                        "row {row}: field '{}' expected {}, found {}",
                        field.name,
                        field.value_type,
                        v.value_type()
                    ))
                })?;
            }
        }

        let columns: Vec<ArrayRef> = builders.into_iter().map(ColumnBuilder::finish).collect();
        let batch = RecordBatch::try_new(Arc::new(arrow_schema(&schema)), columns)?;
        Ok(Self {
            type_key: codec.type_key().clone(),
            schema,
            batch,
        })
    }

    /// Wrap an arrow batch read from elsewhere. Its schema must be exactly the
    /// codec's arrow schema.
    pub fn from_arrow(codec: &dyn Codec, batch: RecordBatch) -> Result<Self, CodecError> {
        let expected = arrow_schema(codec.schema());
        if batch.schema().fields() != expected.fields() {
            return Err(CodecError::malformed(format!(
                "type '{}': arrow schema does not match declared fields",
                codec.type_key()
            )));
        }
        Ok(Self {
            type_key: codec.type_key().clone(),
            schema: codec.schema().clone(),
            batch,
        })
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    /// Rebuild the rows, in batch order, through `codec.from_structured`.
    pub fn to_records(&self, codec: &dyn Codec) -> Result<Vec<EventRecord>, CodecError> {
        if codec.type_key() != &self.type_key {
            return Err(CodecError::TypeMismatch {
                expected: codec.type_key().to_string(),
                actual: self.type_key.to_string(),
            });
        }
        (0..self.batch.num_rows())
            .map(|row| {
                let form: StructuredForm = self
                    .schema
                    .fields()
                    .iter()
                    .zip(self.batch.columns())
                    .map(|(field, column)| -> Result<(String, Value), CodecError> {
                        let value = value_at(column, field.value_type, row).ok_or_else(|| {
                            CodecError::malformed(format!(
                                "row {row}: column '{}' has no {} value",
                                field.name, field.value_type
                            ))
                        })?;
                        Ok((field.name.clone(), value))
                    })
                    .collect::<Result<_, CodecError>>()?;
                codec.from_structured(form)
            })
            .collect()
    }
}
