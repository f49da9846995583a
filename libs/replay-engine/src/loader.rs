use std::io::BufRead;
use std::path::Path;

use replay_api::{CodecError, CodecRegistry, EventRecord, LengthPrefixed, StructuredForm, TypeKey, Value};

use crate::config::RecordFormat;
use crate::error::EngineError;

/// Key naming the record type in a JSON-lines record. Schemas reserve it.
pub use replay_api::schema::TYPE_FIELD;

/// Records read from one file. Bad records are skipped and counted.
#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub records: Vec<EventRecord>,
    pub rejected: usize,
}

/// Load a record file in the given format.
pub fn load_file(path: &Path, format: RecordFormat, codecs: &CodecRegistry) -> Result<LoadedRecords, EngineError> {
    let ctx = path.display().to_string();
    let loaded = match format {
        RecordFormat::JsonLines => {
            let file = std::fs::File::open(path).map_err(|e| EngineError::from(e).with_context(&ctx))?;
            read_json_lines(std::io::BufReader::new(file), codecs, &ctx)?
        }
        RecordFormat::Binary => {
            let bytes = std::fs::read(path).map_err(|e| EngineError::from(e).with_context(&ctx))?;
            read_binary(&bytes, codecs, &ctx)
        }
    };
    tracing::info!(
        file = %ctx,
        format = %format,
        records = loaded.records.len(),
        rejected = loaded.rejected,
        "loaded records"
    );
    Ok(loaded)
}

/// Parse one JSON-lines record: `type` plus the structured form.
///
/// Integer literals are widened when the declared field is `float64`.
pub fn parse_json_record(line: &str, codecs: &CodecRegistry) -> Result<EventRecord, CodecError> {
    let mut form: StructuredForm = serde_json::from_str(line)?;
    let type_key = match form.remove(TYPE_FIELD) {
        Some(Value::String(name)) => TypeKey::from(name),
        Some(other) => {
            return Err(CodecError::malformed(format!(
                "'{TYPE_FIELD}' must be a string, found {}",
                other.value_type()
            )));
        }
        None => return Err(CodecError::malformed(format!("missing '{TYPE_FIELD}'"))),
    };

    let schema = codecs.schema(&type_key)?;
    let form: StructuredForm = form
        .into_entries()
        .into_iter()
        .map(|(name, value)| match schema.field(&name) {
            Some(field) => (name, value.coerce_to(field.value_type)),
            None => (name, value),
        })
        .collect();
    codecs.from_structured(&type_key, form)
}

/// Inverse of [`parse_json_record`].
pub fn to_json_record(record: &EventRecord, codecs: &CodecRegistry) -> Result<String, CodecError> {
    let mut form = StructuredForm::new();
    form.insert(TYPE_FIELD, record.type_key().as_str());
    for (name, value) in codecs.to_structured(record)?.into_entries() {
        form.insert(name, value);
    }
    Ok(serde_json::to_string(&form)?)
}

pub fn read_json_lines(
    reader: impl BufRead,
    codecs: &CodecRegistry,
    source: &str,
) -> Result<LoadedRecords, EngineError> {
    let mut loaded = LoadedRecords::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| EngineError::from(e).with_context(source))?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_json_record(&line, codecs) {
            Ok(record) => loaded.records.push(record),
            Err(e) => {
                tracing::warn!(source, line = idx + 1, error = %e, "bad record, skipping");
                loaded.rejected += 1;
            }
        }
    }
    Ok(loaded)
}

/// Decode length-prefixed binary records. A truncated trailing frame counts
/// as one rejected record.
pub fn read_binary(bytes: &[u8], codecs: &CodecRegistry, source: &str) -> LoadedRecords {
    let framing = LengthPrefixed::default();
    let mut loaded = LoadedRecords::default();
    let mut rest = bytes;
    let mut frame_no = 0usize;

    while !rest.is_empty() {
        frame_no += 1;
        let (frame, consumed) = match framing.decode(rest) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::warn!(source, frame = frame_no, bytes = rest.len(), "truncated trailing frame");
                loaded.rejected += 1;
                break;
            }
            Err(e) => {
                tracing::warn!(source, frame = frame_no, error = %e, "bad frame, stopping");
                loaded.rejected += 1;
                break;
            }
        };
        rest = &rest[consumed..];

        match codecs.decode(frame) {
            Ok(record) => loaded.records.push(record),
            Err(e) => {
                tracing::warn!(source, frame = frame_no, error = %e, "bad record, skipping");
                loaded.rejected += 1;
            }
        }
    }
    loaded
}

/// Encode records as length-prefixed binary frames.
pub fn write_binary(records: &[EventRecord], codecs: &CodecRegistry) -> Result<Vec<u8>, CodecError> {
    let framing = LengthPrefixed::default();
    let mut buf = Vec::new();
    for record in records {
        let encoded = codecs.encode(record)?;
        framing.encode(&encoded, &mut buf)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use replay_api::{Field, SchemaCodec, UnixNanos, ValueType};

    fn codecs() -> CodecRegistry {
        let mut codecs = CodecRegistry::new();
        codecs
            .register(Arc::new(
                SchemaCodec::new(
                    TypeKey::new("signal"),
                    vec![Field::new("signal", ValueType::Int64), Field::new("weight", ValueType::Float64)],
                )
                .unwrap(),
            ))
            .unwrap();
        codecs
    }

    const LINES: &str = r#"{"type":"signal","subject_id":"EURUSD","event_time":100,"ingestion_time":101,"signal":1,"weight":2}
not json

{"type":"unknown","subject_id":"X","event_time":1,"ingestion_time":1}
{"type":"signal","subject_id":"EURUSD","event_time":200,"ingestion_time":201,"signal":0,"weight":0.25}
{"type":"signal","subject_id":"EURUSD","event_time":300,"ingestion_time":301,"signal":"x","weight":0.5}
"#;

    #[test]
    fn json_lines_skip_bad_records() {
        let loaded = read_json_lines(LINES.as_bytes(), &codecs(), "test").unwrap();

        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.rejected, 3);
        let first = &loaded.records[0];
        assert_eq!(first.event_time(), UnixNanos(100));
        assert_eq!(first.get("weight"), Some(&Value::Float64(2.0)));
        assert_eq!(first.get("signal"), Some(&Value::Int64(1)));
    }

    #[test]
    fn json_record_round_trips() {
        let codecs = codecs();
        let loaded = read_json_lines(LINES.as_bytes(), &codecs, "test").unwrap();
        let line = to_json_record(&loaded.records[1], &codecs).unwrap();
        assert!(line.starts_with(r#"{"type":"signal","subject_id":"EURUSD","event_time":200"#));
        assert_eq!(parse_json_record(&line, &codecs).unwrap(), loaded.records[1]);
    }

    #[test]
    fn type_key_cannot_be_shadowed_by_a_payload_field() {
        let err = SchemaCodec::new(TypeKey::new("tweet"), vec![Field::new(TYPE_FIELD, ValueType::String)])
            .unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch { .. }), "{err}");

        let mut payload = StructuredForm::new();
        payload.insert("signal", 1i64);
        payload.insert("weight", 0.5);
        payload.insert(TYPE_FIELD, "retweet");
        let record = EventRecord::new(TypeKey::new("signal"), "EURUSD", UnixNanos(1), UnixNanos(1), payload);
        assert!(to_json_record(&record, &codecs()).unwrap_err().is_malformed());

        let mut payload = StructuredForm::new();
        payload.insert("signal", 1i64);
        payload.insert("weight", 0.5);
        let record = EventRecord::new(TypeKey::new("signal"), "EURUSD", UnixNanos(1), UnixNanos(1), payload);
        let line = to_json_record(&record, &codecs()).unwrap();
        assert_eq!(parse_json_record(&line, &codecs()).unwrap().type_key().as_str(), "signal");
    }

    #[test]
    fn binary_file_survives_a_truncated_tail() {
        let codecs = codecs();
        let records = read_json_lines(LINES.as_bytes(), &codecs, "test").unwrap().records;
        let mut bytes = write_binary(&records, &codecs).unwrap();
        bytes.truncate(bytes.len() - 3);

        let loaded = read_binary(&bytes, &codecs, "test");
        assert_eq!(loaded.records, records[..1]);
        assert_eq!(loaded.rejected, 1);
    }

    #[test]
    fn corrupt_frame_body_is_skipped() {
        let codecs = codecs();
        let records = read_json_lines(LINES.as_bytes(), &codecs, "test").unwrap().records;
        let mut bytes = Vec::new();
        LengthPrefixed::default().encode(b"RPL1garbage", &mut bytes).unwrap();
        bytes.extend(write_binary(&records, &codecs).unwrap());

        let loaded = read_binary(&bytes, &codecs, "test");
        assert_eq!(loaded.records, records);
        assert_eq!(loaded.rejected, 1);
    }

    #[test]
    fn load_file_reads_both_formats() {
        let codecs = codecs();
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("signals.jsonl");
        std::fs::write(&jsonl, LINES).unwrap();

        let from_json = load_file(&jsonl, RecordFormat::JsonLines, &codecs).unwrap();
        let bin = dir.path().join("signals.bin");
        std::fs::write(&bin, write_binary(&from_json.records, &codecs).unwrap()).unwrap();
        let from_bin = load_file(&bin, RecordFormat::Binary, &codecs).unwrap();

        assert_eq!(from_bin.records, from_json.records);
        assert_eq!(from_bin.rejected, 0);
        assert!(matches!(
            load_file(&dir.path().join("missing.jsonl"), RecordFormat::JsonLines, &codecs),
            Err(EngineError::Io(_))
        ));
    }
}
