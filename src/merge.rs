//! Merge orchestration: emptiness filtering, output initialization, payload
//! merging and metadata finalization.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::info;
use netcdf::types::NcVariableType;

use crate::error::{ConciseError, Result};
use crate::paths::{basename, resolve_dim, split_path};
use crate::payload::apply_fill_value;
use crate::preprocess::{is_file_empty, run_preprocess, Preprocess};
use crate::schema::{AttrEntry, AttrMap};
use crate::worker::run_merge;

const SUBSET_INDEX: &str = "subset_index";
const DEFLATE_LEVEL: i32 = 4;

/// Main entrypoint to the merge implementation. Concatenates all non-empty
/// granules in `original_input_files` into a single NetCDF4 product at
/// `output_file`, along a new outer `subset_index` dimension.
///
/// `process_count` defaults to the host CPU count; zero is rejected.
pub fn merge_netcdf_files(
    original_input_files: &[PathBuf],
    output_file: &Path,
    process_count: Option<usize>,
) -> Result<()> {
    let process_count = process_count.unwrap_or_else(rayon::current_num_threads);
    if process_count == 0 {
        return Err(ConciseError::InvalidInput {
            reason: String::from("process_count should be > 0"),
        });
    }

    info!("Preprocessing data...");
    let start = Instant::now();

    // Only concatenate granules that are not empty
    let mut input_files = Vec::new();
    for file in original_input_files {
        let dataset = netcdf::open(file)?;
        if !is_file_empty(&dataset)? {
            input_files.push(file.clone());
        }
    }
    if input_files.is_empty() {
        return Err(ConciseError::InvalidInput {
            reason: String::from("no non-empty input files to merge"),
        });
    }

    let preprocess = run_preprocess(&input_files, process_count)?;
    info!(
        "Preprocessing completed: {:.3}s",
        start.elapsed().as_secs_f64()
    );

    let mut merged_dataset = netcdf::create(output_file)?;
    init_dataset(&mut merged_dataset, &preprocess, &input_files)?;

    info!("Merging datasets...");
    let start = Instant::now();
    run_merge(
        &mut merged_dataset,
        &input_files,
        &preprocess.var_info,
        &preprocess.max_dims,
        process_count,
    )?;
    info!("Merging completed: {:.3}s", start.elapsed().as_secs_f64());

    info!("Finalizing metadata...");
    let start = Instant::now();
    finalize_metadata(&mut merged_dataset, &preprocess)?;
    info!("Metadata completed: {:.3}s", start.elapsed().as_secs_f64());

    info!("Done!");
    Ok(())
}

fn root_mut<'f>(dataset: &'f mut netcdf::FileMut) -> Result<netcdf::GroupMut<'f>> {
    dataset
        .root_mut()
        .ok_or_else(|| ConciseError::InvariantViolation {
            detail: String::from("output file is not NetCDF4"),
        })
}

/// Initializes the output: groups, dimensions (including `subset_index`),
/// the `subset_files` index variable, and one empty deflated variable per
/// schema entry.
fn init_dataset(
    dataset: &mut netcdf::FileMut,
    preprocess: &Preprocess,
    input_files: &[PathBuf],
) -> Result<()> {
    // Create groups; sorted order guarantees parents precede children
    for group in &preprocess.group_list {
        if group == "/" {
            continue;
        }
        let mut root = root_mut(dataset)?;
        root.add_group(&group[1..])?;
    }

    // Create dims
    {
        let mut root = root_mut(dataset)?;
        root.add_dimension(SUBSET_INDEX, input_files.len())?;
    }
    for (dim_path, size) in &preprocess.max_dims {
        let (parent, name) = split_path(dim_path);
        let mut root = root_mut(dataset)?;
        if parent == "/" {
            root.add_dimension(name, *size)?;
        } else {
            let mut group =
                root.group_mut(&parent[1..])
                    .ok_or_else(|| ConciseError::InvariantViolation {
                        detail: format!("group {parent} missing in output"),
                    })?;
            group.add_dimension(name, *size)?;
        }
    }

    // Generate filelist
    {
        let mut root = root_mut(dataset)?;
        let mut subset_files =
            root.add_variable_with_type("subset_files", &[SUBSET_INDEX], &NcVariableType::String)?;
        subset_files.put_attribute(
            "long_name",
            "List of subsetted files used to create this merge product.",
        )?;
        for (i, file) in input_files.iter().enumerate() {
            subset_files.put_string(&basename(file), (vec![i], vec![1]))?;
        }
    }

    // Recreate variables
    for (var_path, info) in &preprocess.var_info {
        let mut dims: Vec<&str> = vec![SUBSET_INDEX];
        dims.extend(info.dim_order().iter().map(String::as_str));

        let mut chunk_sizes = vec![1];
        for dim in info.dim_order() {
            chunk_sizes.push(resolve_dim(&preprocess.max_dims, info.group_path(), dim)?);
        }

        let mut root = root_mut(dataset)?;
        let mut var = root.add_variable_with_type(&var_path[1..], &dims, info.datatype())?;
        // The library rejects chunking and deflate for variable-length
        // types, and chunk extents of zero
        if !matches!(info.datatype(), NcVariableType::String) {
            if chunk_sizes.iter().all(|&c| c > 0) {
                var.set_chunking(&chunk_sizes)?;
            }
            var.set_compression(DEFLATE_LEVEL, false)?;
        }
        if let Some(fill) = info.fill_value() {
            apply_fill_value(&mut var, info.datatype(), fill)?;
        }
    }

    Ok(())
}

/// Prepares an aggregation map for insertion: inconsistent entries and
/// `_FillValue` are dropped, `/` in attribute names is escaped to `_` to
/// satisfy the attribute-name grammar.
/// https://www.unidata.ucar.edu/mailing_lists/archives/netcdfgroup/2012/msg00098.html
fn clean_metadata(attrs: &AttrMap) -> Vec<(String, netcdf::AttributeValue)> {
    let mut cleaned = Vec::new();
    for (name, entry) in attrs {
        let AttrEntry::Consistent(value) = entry else {
            continue;
        };
        if name == "_FillValue" {
            continue;
        }
        cleaned.push((name.replace('/', "_"), value.clone()));
    }
    cleaned
}

/// Applies the aggregated group and variable attributes to the output.
/// The root `subset_files` variable never appears in the schema, so only
/// merged variables receive attributes here.
fn finalize_metadata(dataset: &mut netcdf::FileMut, preprocess: &Preprocess) -> Result<()> {
    for group_path in &preprocess.group_list {
        let Some(attrs) = preprocess.group_metadata.get(group_path) else {
            continue;
        };
        let cleaned = clean_metadata(attrs);

        if group_path == "/" {
            let mut root = root_mut(dataset)?;
            for (name, value) in cleaned {
                root.add_attribute(&name, value)?;
            }
        } else {
            let mut root = root_mut(dataset)?;
            let mut group =
                root.group_mut(&group_path[1..])
                    .ok_or_else(|| ConciseError::InvariantViolation {
                        detail: format!("group {group_path} missing in output"),
                    })?;
            for (name, value) in cleaned {
                group.add_attribute(&name, value)?;
            }
        }
    }

    for (var_path, attrs) in &preprocess.var_metadata {
        let cleaned = clean_metadata(attrs);
        let mut root = root_mut(dataset)?;
        let mut var =
            root.variable_mut(&var_path[1..])
                .ok_or_else(|| ConciseError::InvariantViolation {
                    detail: format!("unknown variable {var_path} in output"),
                })?;
        for (name, value) in cleaned {
            var.put_attribute(&name, value)?;
        }
    }

    Ok(())
}
