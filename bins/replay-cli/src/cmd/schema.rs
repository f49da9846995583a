use replay_api::arrow_schema;
use replay_engine::{ReplayConfig, build_codecs};

use super::error::CliError;

/// Arrow column layout of every configured type.
pub fn run(config: &ReplayConfig) -> Result<(), CliError> {
    let codecs = build_codecs(config)?;
    let mut schemas = serde_json::Map::new();
    for type_key in codecs.type_keys() {
        let columns: Vec<serde_json::Value> = arrow_schema(codecs.schema(type_key)?)
            .fields()
            .iter()
            .map(|f| {
                serde_json::json!({
                    "name": f.name(),
                    "data_type": f.data_type().to_string(),
                    "nullable": f.is_nullable(),
                })
            })
            .collect();
        schemas.insert(type_key.to_string(), serde_json::Value::Array(columns));
    }
    println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(schemas))?);
    Ok(())
}
