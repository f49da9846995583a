use replay_engine::config::{ConfigParser, ReplayConfig};
use replay_engine::error::EngineError;

/// HCL syntax for [`ReplayConfig`]. `types`, `sources` and `subscribers` are
/// list attributes of objects.
pub struct HclParser;

impl ConfigParser for HclParser {
    fn extensions(&self) -> &[&str] {
        &["hcl"]
    }

    fn parse(&self, content: &str) -> Result<ReplayConfig, EngineError> {
        hcl::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_engine::config::{RecordFormat, SubscriberKind, TomlParser};

    const SAMPLE: &str = r#"
types = [
  {
    name   = "signal"
    fields = [{ name = "signal", type = "int64" }]
  },
]

sources = [
  { name = "signals", path = "signals.bin", format = "binary" },
]

subscribers = [
  { name = "count", kind = "counter", types = ["signal"] },
]
"#;

    #[test]
    fn parses_blocks() {
        let config = HclParser.parse(SAMPLE).unwrap();
        assert_eq!(config.types[0].name, "signal");
        assert_eq!(config.sources[0].format, RecordFormat::Binary);
        assert_eq!(config.subscribers[0].kind, SubscriberKind::Counter);
        config.validate().unwrap();
    }

    #[test]
    fn load_with_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.hcl");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ReplayConfig::load_with(path.to_str().unwrap(), &[&TomlParser, &HclParser]).unwrap();
        assert_eq!(config.resolve_path("signals.bin"), dir.path().join("signals.bin"));
        assert!(ReplayConfig::load(path.to_str().unwrap()).is_err());
    }
}
