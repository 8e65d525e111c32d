//! Input discovery and JSON-lines loading
//!
//! The whole file is parsed before a session starts, so a malformed record
//! aborts the upload before the device is touched.

use crate::config::InputConfig;
use crate::error::{Error, Result};
use crate::session::{Mode, UploadRecords};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Input file for `mode` by naming convention
pub fn resolve_input_path(config: &InputConfig, mode: Mode, mcu_index: usize) -> PathBuf {
    match mode {
        Mode::Coordinator => config.data_dir.join(&config.coordinator_file),
        Mode::Worker => config.data_dir.join(
            config
                .worker_file_pattern
                .replace("{id}", &mcu_index.to_string()),
        ),
    }
}

/// Load and validate every record of an input file
pub fn load_records(path: &Path, mode: Mode) -> Result<UploadRecords> {
    let records = match mode {
        Mode::Coordinator => UploadRecords::Coordinator(read_json_lines(path)?),
        Mode::Worker => UploadRecords::Worker(read_json_lines(path)?),
    };
    log::info!(
        "Loaded {} {} lines from {}",
        records.len(),
        mode,
        path.display()
    );
    Ok(records)
}

/// Parse one JSON value per non-blank line
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(Error::InputNotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path)?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| Error::MalformedRecord {
                path: path.to_path_buf(),
                line: i + 1,
                source,
            })
        })
        .collect()
}
