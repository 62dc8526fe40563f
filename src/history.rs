//! Provenance entries stored under the root `history_json` attribute.
//! https://wiki.earthdata.nasa.gov/display/TRT/In-File+Provenance+Metadata+-+TRT-42

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::paths::basename;

const PROGRAM: &str = "concise";
const PROGRAM_REF: &str = "https://cmr.earthdata.nasa.gov:443/search/concepts/S2153799015-POCLOUD";
const SCHEMA_REF: &str =
    "https://harmony.earthdata.nasa.gov/schemas/history/0.1.0/history-v0.1.0.json";

/// One provenance entry describing a single concatenation run.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub date_time: String,
    pub derived_from: Vec<String>,
    pub program: &'static str,
    pub version: &'static str,
    pub parameters: String,
    pub program_ref: &'static str,
    #[serde(rename = "$schema")]
    pub schema: &'static str,
}

/// Constructs the provenance entry for this concatenation operation.
pub fn construct_history(input_files: &[PathBuf]) -> HistoryEntry {
    HistoryEntry {
        date_time: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        derived_from: input_files.iter().map(|f| basename(f)).collect(),
        program: PROGRAM,
        version: env!("CARGO_PKG_VERSION"),
        parameters: format!("input_files={input_files:?}"),
        program_ref: PROGRAM_REF,
        schema: SCHEMA_REF,
    }
}

/// Retrieves the `history_json` entries carried by a granule's root group.
/// A missing or non-string attribute yields no entries; a present but
/// unparseable attribute is an error.
pub fn retrieve_history(root: &netcdf::Group) -> Result<Vec<Value>> {
    let raw = match root.attribute_value("history_json") {
        Some(value) => value?,
        None => return Ok(Vec::new()),
    };

    match raw {
        netcdf::AttributeValue::Str(text) => Ok(serde_json::from_str(&text)?),
        _ => Ok(Vec::new()),
    }
}

/// Appends the engine entry for this run and serializes the full history
/// list for storage as a root attribute.
pub fn serialize_history(mut entries: Vec<Value>, input_files: &[PathBuf]) -> Result<(Vec<Value>, String)> {
    entries.push(serde_json::to_value(construct_history(input_files))?);
    let serialized = serde_json::to_string(&entries)?;
    Ok((entries, serialized))
}
