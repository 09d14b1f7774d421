//! Export logs as a JSON array.
//!
//! Dumps the history log, or one daily log with `--day`, for tools that
//! would rather not parse JSON Lines. Malformed lines are skipped the same
//! way every other reader skips them.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::archive;
use crate::config::Config;
use crate::jsonl;
use crate::models::RawRecord;

fn source_path(config: &Config, day: Option<&str>) -> Result<PathBuf> {
    match day {
        Some(d) if d.len() == 8 && d.chars().all(|c| c.is_ascii_digit()) => {
            Ok(archive::daily_path(&config.paths, d))
        }
        Some(d) => bail!("--day must be YYYYMMDD, got {:?}", d),
        None => Ok(config.paths.history.clone()),
    }
}

pub fn export_records(config: &Config, day: Option<&str>) -> Result<Vec<Value>> {
    let path = source_path(config, day)?;
    Ok(jsonl::read_records(&path)?
        .into_iter()
        .map(RawRecord::into_value)
        .collect())
}

/// If `output` is `Some`, writes to that file. Otherwise writes to stdout
/// for piping.
pub fn run_export(config: &Config, day: Option<&str>, output: Option<&Path>) -> Result<()> {
    let records = export_records(config, day)?;
    let json = serde_json::to_string_pretty(&records)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} records to {}", records.len(), path.display());
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}
