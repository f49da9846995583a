pub mod convert;
pub mod error;
pub mod run;
pub mod schema;

use replay_config_hcl::HclParser;
use replay_engine::{ReplayConfig, TomlParser};

use error::CliError;

pub fn load_config(path: &str) -> Result<ReplayConfig, CliError> {
    Ok(ReplayConfig::load_with(path, &[&TomlParser, &HclParser])?)
}
