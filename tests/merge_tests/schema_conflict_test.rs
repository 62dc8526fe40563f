use super::common::make_granule;
use concise::{merge_netcdf_files, ConciseError};

#[test]
fn test_datatype_conflict_fails_preprocess() {
    // The same variable path with f32 in one granule and f64 in another
    // must abort before anything is written
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "float32.nc", |file| {
        file.add_dimension("obs", 2).unwrap();
        let mut var = file.add_variable::<f32>("temp", &["obs"]).unwrap();
        var.put_values(&[1.0, 2.0], ..).unwrap();
    });
    let b = make_granule(dir.path(), "float64.nc", |file| {
        file.add_dimension("obs", 2).unwrap();
        let mut var = file.add_variable::<f64>("temp", &["obs"]).unwrap();
        var.put_values(&[1.0, 2.0], ..).unwrap();
    });

    let output = dir.path().join("merged.nc");
    let err = merge_netcdf_files(&[a, b], &output, Some(1)).unwrap_err();
    assert!(matches!(err, ConciseError::InconsistentSchema { .. }));
}

#[test]
fn test_dimension_order_conflict_fails_preprocess() {
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "row_major.nc", |file| {
        file.add_dimension("lat", 2).unwrap();
        file.add_dimension("lon", 2).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["lat", "lon"]).unwrap();
        var.put_values(&[1.0, 2.0, 3.0, 4.0], ..).unwrap();
    });
    let b = make_granule(dir.path(), "transposed.nc", |file| {
        file.add_dimension("lat", 2).unwrap();
        file.add_dimension("lon", 2).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["lon", "lat"]).unwrap();
        var.put_values(&[1.0, 2.0, 3.0, 4.0], ..).unwrap();
    });

    let output = dir.path().join("merged.nc");
    let err = merge_netcdf_files(&[a, b], &output, Some(1)).unwrap_err();
    assert!(matches!(err, ConciseError::InconsistentSchema { .. }));
}

#[test]
fn test_fill_value_conflict_fails_preprocess() {
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "fill_a.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.set_fill_value(-9.0_f32).unwrap();
        var.put_values(&[1.0], ..).unwrap();
    });
    let b = make_granule(dir.path(), "fill_b.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.set_fill_value(-5.0_f32).unwrap();
        var.put_values(&[1.0], ..).unwrap();
    });

    let output = dir.path().join("merged.nc");
    let err = merge_netcdf_files(&[a, b], &output, Some(1)).unwrap_err();
    assert!(matches!(err, ConciseError::InconsistentSchema { .. }));
}
