//! Group-path construction and scoped dimension lookup shared by the
//! preprocess and merge phases.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConciseError, Result};

/// Builds a Unix-like path for a resource (group, dimension or variable)
/// contained in the group at `parent`.
pub fn group_path(parent: &str, leaf: &str) -> String {
    if parent == "/" {
        format!("/{leaf}")
    } else {
        format!("{parent}/{leaf}")
    }
}

/// Splits a resource path into its parent group path and the leaf name.
/// `"/sst"` resolves to `("/", "sst")`, `"/a/b/sst"` to `("/a/b", "sst")`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", leaf)) => ("/", leaf),
        Some((parent, leaf)) => (parent, leaf),
        None => ("/", path),
    }
}

/// Resolves a dimension name against the aggregated dimension map by
/// ascending from `group_path` towards the root, nearest ancestor first,
/// finally trying the bare name. NetCDF4 inherits dimensions into nested
/// groups, so the first hit wins.
pub fn resolve_dim(
    max_dims: &BTreeMap<String, usize>,
    group_path: &str,
    dim_name: &str,
) -> Result<usize> {
    let group_tree: Vec<&str> = group_path.split('/').collect();

    for i in (1..=group_tree.len()).rev() {
        let path = format!("{}/{}", group_tree[..i].join("/"), dim_name);

        if let Some(size) = max_dims.get(&path) {
            return Ok(*size);
        }
    }

    max_dims
        .get(dim_name)
        .copied()
        .ok_or_else(|| ConciseError::InvariantViolation {
            detail: format!("dimension {dim_name} not resolvable from group {group_path}"),
        })
}

/// Final path component of a filesystem path, used for `subset_files` and
/// provenance entries.
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
