//! First phase of the merge: derive a unified output schema from all inputs.
//!
//! Every granule is scanned independently (optionally across a worker pool)
//! and the per-granule results are folded together in input order, so the
//! unified schema never depends on the worker count.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use log::debug;
use rayon::prelude::*;
use serde_json::Value;

use crate::error::{ConciseError, Result};
use crate::history::{retrieve_history, serialize_history};
use crate::paths::group_path;
use crate::schema::{merge_attrs, note_attr, AttrEntry, AttrMap, VariableInfo};

/// The unified schema produced by preprocessing, consumed by output
/// initialization, the merge pipeline, and metadata finalization.
#[derive(Debug)]
pub struct Preprocess {
    pub group_list: Vec<String>,
    pub max_dims: BTreeMap<String, usize>,
    pub var_info: BTreeMap<String, VariableInfo>,
    pub var_metadata: BTreeMap<String, AttrMap>,
    pub group_metadata: BTreeMap<String, AttrMap>,
    pub history_json: Vec<Value>,
}

/// Everything learned from scanning one granule.
#[derive(Debug, Default)]
struct GranuleScan {
    group_list: BTreeSet<String>,
    max_dims: BTreeMap<String, usize>,
    var_info: BTreeMap<String, VariableInfo>,
    var_metadata: BTreeMap<String, AttrMap>,
    group_metadata: BTreeMap<String, AttrMap>,
    history_json: Vec<Value>,
}

/// A granule is empty when every variable it contains, recursively, has
/// zero elements. Empty granules are excluded from the merge entirely.
pub fn is_file_empty(dataset: &netcdf::File) -> Result<bool> {
    let root = dataset.root().ok_or_else(|| ConciseError::InvalidInput {
        reason: format!("{:?} is not a NetCDF4 file", dataset.path().unwrap_or_default()),
    })?;
    Ok(group_is_empty(&root))
}

fn group_is_empty(group: &netcdf::Group) -> bool {
    for var in group.variables() {
        if var.len() != 0 {
            return false;
        }
    }
    for child in group.groups() {
        if !group_is_empty(&child) {
            return false;
        }
    }
    true
}

fn variable_info_from(var: &netcdf::Variable, group_path: &str) -> Result<VariableInfo> {
    let dim_order = var.dimensions().iter().map(|d| d.name()).collect();

    let fill_value = match var.attribute_value("_FillValue") {
        Some(value) => Some(value?),
        None => match var.attribute_value("missing_value") {
            Some(value) => Some(value?),
            None => None,
        },
    };

    Ok(VariableInfo::new(
        var.name(),
        dim_order,
        var.vartype(),
        group_path.to_string(),
        fill_value,
    ))
}

fn process_group(group: &netcdf::Group, path: &str, scan: &mut GranuleScan) -> Result<()> {
    scan.group_list.insert(path.to_string());

    let group_attrs = scan.group_metadata.entry(path.to_string()).or_default();
    for attr in group.attributes() {
        note_attr(group_attrs, attr.name(), attr.value()?);
    }

    for dim in group.dimensions() {
        let dim_path = group_path(path, &dim.name());
        let entry = scan.max_dims.entry(dim_path).or_insert(0);
        *entry = (*entry).max(dim.len());
    }

    for var in group.variables() {
        let var_path = group_path(path, &var.name());
        let info = variable_info_from(&var, path)?;
        scan.var_info.insert(var_path.clone(), info);

        let var_attrs = scan.var_metadata.entry(var_path).or_default();
        for attr in var.attributes() {
            note_attr(var_attrs, attr.name(), attr.value()?);
        }
    }

    for child in group.groups() {
        let child_path = group_path(path, &child.name());
        process_group(&child, &child_path, scan)?;
    }

    Ok(())
}

fn scan_granule(file: &Path) -> Result<GranuleScan> {
    debug!("scanning {file:?}");
    let dataset = netcdf::open(file)?;
    let root = dataset.root().ok_or_else(|| ConciseError::InvalidInput {
        reason: format!("{file:?} is not a NetCDF4 file"),
    })?;

    let mut scan = GranuleScan::default();
    process_group(&root, "/", &mut scan)?;
    scan.history_json = retrieve_history(&root)?;
    Ok(scan)
}

/// Folds per-granule scans into the unified schema. Scans arrive in input
/// order regardless of how many workers produced them:
/// - `max_dims` takes the per-key maximum,
/// - `var_info` takes the union, requiring descriptor equality on keys seen
///   before,
/// - `group_list` takes the sorted union,
/// - metadata maps keep the first value and degrade to inconsistent on any
///   disagreement,
/// - `history_json` entries concatenate, with this run's entry appended last.
fn merge_scans(scans: Vec<GranuleScan>, input_files: &[PathBuf]) -> Result<Preprocess> {
    let mut group_list = BTreeSet::new();
    let mut max_dims = BTreeMap::new();
    let mut var_info: BTreeMap<String, VariableInfo> = BTreeMap::new();
    let mut var_metadata: BTreeMap<String, AttrMap> = BTreeMap::new();
    let mut group_metadata: BTreeMap<String, AttrMap> = BTreeMap::new();
    let mut history_json = Vec::new();

    for scan in scans {
        group_list.extend(scan.group_list);

        for (dim_path, size) in scan.max_dims {
            let entry = max_dims.entry(dim_path).or_insert(0);
            *entry = (*entry).max(size);
        }

        for (var_path, info) in scan.var_info {
            match var_info.get(&var_path) {
                None => {
                    var_info.insert(var_path, info);
                }
                Some(existing) if *existing != info => {
                    return Err(ConciseError::InconsistentSchema { var_path });
                }
                Some(_) => {}
            }
        }

        for (var_path, attrs) in scan.var_metadata {
            merge_attrs(var_metadata.entry(var_path).or_default(), &attrs);
        }
        for (path, attrs) in scan.group_metadata {
            merge_attrs(group_metadata.entry(path).or_default(), &attrs);
        }

        history_json.extend(scan.history_json);
    }

    let (history_json, serialized) = serialize_history(history_json, input_files)?;
    group_metadata
        .entry(String::from("/"))
        .or_default()
        .insert(
            String::from("history_json"),
            AttrEntry::Consistent(netcdf::AttributeValue::Str(serialized)),
        );

    Ok(Preprocess {
        group_list: group_list.into_iter().collect(),
        max_dims,
        var_info,
        var_metadata,
        group_metadata,
        history_json,
    })
}

/// Runs preprocessing over all retained inputs, single-threaded when
/// `process_count` is 1, otherwise across a worker pool of that size.
/// Both modes produce identical results in every field.
pub fn run_preprocess(input_files: &[PathBuf], process_count: usize) -> Result<Preprocess> {
    let pbar = ProgressBar::new(input_files.len() as u64);

    let scans: Vec<GranuleScan> = if process_count == 1 {
        input_files
            .iter()
            .map(|file| {
                let scan = scan_granule(file);
                pbar.inc(1);
                scan
            })
            .collect::<Result<_>>()?
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(process_count)
            .build()
            .map_err(|e| ConciseError::MergeFailed {
                detail: format!("could not build preprocessing pool: {e}"),
            })?;

        pool.install(|| {
            input_files
                .par_iter()
                .map(|file| {
                    let scan = scan_granule(file);
                    pbar.inc(1);
                    scan
                })
                .collect::<Result<_>>()
        })?
    };
    pbar.finish_and_clear();

    merge_scans(scans, input_files)
}
