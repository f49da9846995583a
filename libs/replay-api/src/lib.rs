pub mod binary;
pub mod codec;
pub mod columnar;
pub mod error;
pub mod framing;
pub mod record;
pub mod schema;
pub mod value;

pub use codec::{Codec, CodecRegistry, CustomEvent, SchemaCodec, TypedCodec, required};
pub use columnar::{ColumnBatch, arrow_schema};
pub use error::CodecError;
pub use framing::LengthPrefixed;
pub use record::{EventRecord, StructuredForm, TypeKey, UnixNanos};
pub use schema::{Field, Schema, TYPE_FIELD};
pub use value::{Value, ValueType};
