//! Concatenation of NetCDF4 granules along a synthetic `subset_index` axis.
//!
//! The merge runs in two phases: a preprocess pass derives a unified schema
//! (group set, per-group maximum dimensions, union variable catalog,
//! aggregated attributes) from all inputs, then a merge pass reads, pads and
//! writes every variable payload into the output, optionally through a
//! multi-reader/single-writer pipeline.

pub mod error;
pub mod history;
pub mod merge;
pub mod paths;
pub mod payload;
pub mod preprocess;
pub mod schema;
pub mod worker;

pub use error::ConciseError;
pub use merge::merge_netcdf_files;
