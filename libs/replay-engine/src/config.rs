use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use replay_api::Field;

use crate::error::EngineError;

/// Root configuration of a replay run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayConfig {
    /// Record types, each registered as a schema-driven codec.
    #[serde(default)]
    pub types: Vec<TypeConfig>,

    /// Record files. Declaration order breaks `event_time` ties.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Built-in subscribers with their initial subscriptions.
    #[serde(default)]
    pub subscribers: Vec<SubscriberConfig>,

    /// Directory relative source paths resolve against. Set by `load_with`.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypeConfig {
    pub name: String,
    /// Payload fields in declared order. Header fields are implicit.
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub format: RecordFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// One JSON object per line: `type` plus the structured form.
    #[default]
    JsonLines,
    /// Length-prefixed frames, one encoded record each.
    Binary,
}

impl std::fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordFormat::JsonLines => f.write_str("json_lines"),
            RecordFormat::Binary => f.write_str("binary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriberConfig {
    pub name: String,
    pub kind: SubscriberKind,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberKind {
    Counter,
    Log,
}

impl std::fmt::Display for SubscriberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberKind::Counter => f.write_str("counter"),
            SubscriberKind::Log => f.write_str("log"),
        }
    }
}

/// Parser for one configuration syntax, chosen by file extension.
pub trait ConfigParser {
    fn extensions(&self) -> &[&str];

    fn parse(&self, content: &str) -> Result<ReplayConfig, EngineError>;
}

/// Built-in TOML syntax.
pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<ReplayConfig, EngineError> {
        ReplayConfig::parse(content)
    }
}

impl ReplayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        Self::load_with(path, &[&TomlParser])
    }

    /// Load configuration with the parser matching the file extension.
    pub fn load_with(path: &str, parsers: &[&dyn ConfigParser]) -> Result<Self, EngineError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let parser = parsers
            .iter()
            .find(|p| p.extensions().contains(&ext))
            .ok_or_else(|| EngineError::Config(format!("{path}: no parser for extension '{ext}'")))?;

        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        let mut config = parser.parse(&content).map_err(|e| e.with_context(path))?;
        config.base_dir = Path::new(path).parent().map(Path::to_path_buf);
        config.validate().map_err(|e| e.with_context(path))?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Names must be unique per section and subscribers may only name
    /// declared types.
    pub fn validate(&self) -> Result<(), EngineError> {
        unique("type", self.types.iter().map(|t| t.name.as_str()))?;
        unique("source", self.sources.iter().map(|s| s.name.as_str()))?;
        unique("subscriber", self.subscribers.iter().map(|s| s.name.as_str()))?;

        for sub in &self.subscribers {
            for type_name in &sub.types {
                if !self.types.iter().any(|t| &t.name == type_name) {
                    return Err(EngineError::Config(format!(
                        "subscriber '{}' subscribes to undeclared type '{type_name}'",
                        sub.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Source path resolved against the configuration file's directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(EngineError::Config(format!("duplicate {what} '{name}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_api::ValueType;

    const SAMPLE: &str = r#"
[[types]]
name = "signal"
fields = [
    { name = "signal", type = "int64" },
    { name = "weight", type = "float64" },
]

[[types]]
name = "tweet"
fields = [{ name = "text", type = "string" }]

[[sources]]
name = "signals"
path = "signals.jsonl"

[[sources]]
name = "archive"
path = "/data/archive.bin"
format = "binary"

[[subscribers]]
name = "count"
kind = "counter"
types = ["signal", "tweet"]
"#;

    #[test]
    fn parses_all_sections() {
        let config = ReplayConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.types.len(), 2);
        assert_eq!(
            config.types[0].fields,
            vec![Field::new("signal", ValueType::Int64), Field::new("weight", ValueType::Float64)]
        );
        assert_eq!(config.sources[0].format, RecordFormat::JsonLines);
        assert_eq!(config.sources[1].format, RecordFormat::Binary);
        assert_eq!(config.subscribers[0].kind, SubscriberKind::Counter);
        assert!(config.base_dir.is_none());
    }

    #[test]
    fn validation_catches_duplicates_and_unknown_types() {
        let dup = format!("{SAMPLE}\n[[types]]\nname = \"tweet\"\n");
        let err = ReplayConfig::parse(&dup).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("duplicate type 'tweet'"));

        let unknown = format!("{SAMPLE}\n[[subscribers]]\nname = \"log\"\nkind = \"log\"\ntypes = [\"quote\"]\n");
        let err = ReplayConfig::parse(&unknown).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("undeclared type 'quote'"));
    }

    #[test]
    fn bad_field_type_is_a_config_error() {
        let bad = "[[types]]\nname = \"x\"\nfields = [{ name = \"a\", type = \"decimal\" }]\n";
        assert!(matches!(ReplayConfig::parse(bad), Err(EngineError::Config(_))));
    }

    #[test]
    fn load_with_picks_parser_and_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let path_str = path.to_str().unwrap();

        let config = ReplayConfig::load(path_str).unwrap();
        assert_eq!(config.resolve_path("signals.jsonl"), dir.path().join("signals.jsonl"));
        assert_eq!(config.resolve_path("/data/archive.bin"), PathBuf::from("/data/archive.bin"));

        let yaml = dir.path().join("replay.yaml");
        std::fs::write(&yaml, "").unwrap();
        let err = ReplayConfig::load(yaml.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("no parser for extension 'yaml'"));
    }
}
