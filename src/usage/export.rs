//! JSON snapshot export of a computed report

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::usage::models::ReportOutcome;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a report outcome as pretty JSON
pub fn to_json(outcome: &ReportOutcome) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(outcome)?)
}

pub fn from_json(json: &str) -> Result<ReportOutcome, ExportError> {
    Ok(serde_json::from_str(json)?)
}

/// Write the snapshot to any writer, followed by a newline
pub fn write_to<W: Write>(outcome: &ReportOutcome, mut writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, outcome)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write the snapshot to `path`, creating parent directories as needed
pub fn write_snapshot(outcome: &ReportOutcome, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    write_to(outcome, BufWriter::new(file))?;
    debug!("Wrote snapshot to {:?}", path);
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<ReportOutcome, ExportError> {
    let content = fs::read_to_string(path)?;
    from_json(&content)
}
