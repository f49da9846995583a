use std::io::Write;
use std::path::Path;

use clap::{Args, ValueEnum};

use replay_engine::config::RecordFormat;
use replay_engine::{ReplayConfig, build_codecs, loader};

use super::error::CliError;

#[derive(Args, Clone, Debug)]
pub struct ConvertArgs {
    /// File to read.
    #[arg(long)]
    pub input: String,

    /// File to write.
    #[arg(long)]
    pub output: String,

    /// Format of the input file.
    #[arg(long, value_enum, default_value_t = Format::JsonLines)]
    pub from: Format,

    /// Format of the output file.
    #[arg(long, value_enum, default_value_t = Format::Binary)]
    pub to: Format,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    JsonLines,
    Binary,
}

impl From<Format> for RecordFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::JsonLines => RecordFormat::JsonLines,
            Format::Binary => RecordFormat::Binary,
        }
    }
}

pub fn run(config: &ReplayConfig, args: &ConvertArgs) -> Result<(), CliError> {
    let codecs = build_codecs(config)?;
    let loaded = loader::load_file(Path::new(&args.input), args.from.into(), &codecs)?;

    let bytes = match args.to {
        Format::Binary => loader::write_binary(&loaded.records, &codecs)?,
        Format::JsonLines => {
            let mut out = Vec::new();
            for record in &loaded.records {
                let line = loader::to_json_record(record, &codecs)?;
                writeln!(out, "{line}").map_err(|e| CliError::io(&args.output, e))?;
            }
            out
        }
    };
    std::fs::write(&args.output, &bytes).map_err(|e| CliError::io(&args.output, e))?;

    tracing::info!(
        input = %args.input,
        output = %args.output,
        records = loaded.records.len(),
        rejected = loaded.rejected,
        bytes = bytes.len(),
        "converted"
    );
    Ok(())
}
