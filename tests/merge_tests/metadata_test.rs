use super::common::make_granule;
use concise::merge_netcdf_files;
use netcdf::AttributeValue;
use std::path::Path;

fn attribute(output: &Path, name: &str) -> Option<AttributeValue> {
    let file = netcdf::open(output).unwrap();
    let root = file.root().unwrap();
    root.attribute_value(name).map(|v| v.unwrap())
}

#[test]
fn test_consistent_attributes_survive_conflicting_are_dropped() {
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "a.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[1.0], ..).unwrap();
        var.put_attribute("units", "K").unwrap();
        var.put_attribute("pass", "ascending").unwrap();
        file.add_attribute("platform", "aqua").unwrap();
        file.add_attribute("day_night_flag", "day").unwrap();
    });
    let b = make_granule(dir.path(), "b.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[2.0], ..).unwrap();
        var.put_attribute("units", "K").unwrap();
        var.put_attribute("pass", "descending").unwrap();
        file.add_attribute("platform", "aqua").unwrap();
        file.add_attribute("day_night_flag", "night").unwrap();
    });

    let output = dir.path().join("merged.nc");
    merge_netcdf_files(&[a, b], &output, Some(1)).unwrap();

    // Group level: equal values survive, conflicts are dropped
    assert_eq!(
        attribute(&output, "platform"),
        Some(AttributeValue::Str(String::from("aqua")))
    );
    assert_eq!(attribute(&output, "day_night_flag"), None);

    // Variable level: same rule
    let file = netcdf::open(&output).unwrap();
    let var = file.variable("sst").unwrap();
    assert_eq!(
        var.attribute_value("units").map(|v| v.unwrap()),
        Some(AttributeValue::Str(String::from("K")))
    );
    assert!(var.attribute_value("pass").is_none());
}

#[test]
fn test_scalar_and_array_attribute_values_conflict() {
    // The same attribute as an array in one granule and a scalar in the
    // other is inconsistent even when numerically equal
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "a.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[1.0], ..).unwrap();
        file.add_attribute("valid_range", vec![0.0_f64, 1.0]).unwrap();
    });
    let b = make_granule(dir.path(), "b.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[2.0], ..).unwrap();
        file.add_attribute("valid_range", 0.0_f64).unwrap();
    });

    let output = dir.path().join("merged.nc");
    merge_netcdf_files(&[a, b], &output, Some(1)).unwrap();

    assert_eq!(attribute(&output, "valid_range"), None);
}

#[test]
fn test_group_attributes_apply_to_nested_groups() {
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "a.nc", |file| {
        let mut data = file.add_group("data").unwrap();
        data.add_attribute("level", "L2").unwrap();
        data.add_dimension("obs", 2).unwrap();
        let mut var = data.add_variable::<f32>("ssh", &["obs"]).unwrap();
        var.put_values(&[1.0, 2.0], ..).unwrap();
    });
    let b = make_granule(dir.path(), "b.nc", |file| {
        let mut data = file.add_group("data").unwrap();
        data.add_attribute("level", "L2").unwrap();
        data.add_dimension("obs", 2).unwrap();
        let mut var = data.add_variable::<f32>("ssh", &["obs"]).unwrap();
        var.put_values(&[3.0, 4.0], ..).unwrap();
    });

    let output = dir.path().join("merged.nc");
    merge_netcdf_files(&[a, b], &output, Some(1)).unwrap();

    let file = netcdf::open(&output).unwrap();
    let root = file.root().unwrap();
    let group = root.group("data").unwrap();
    assert_eq!(
        group.attribute_value("level").map(|v| v.unwrap()),
        Some(AttributeValue::Str(String::from("L2")))
    );
}

#[test]
fn test_subset_files_long_name() {
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "a.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[1.0], ..).unwrap();
    });

    let output = dir.path().join("merged.nc");
    merge_netcdf_files(&[a], &output, Some(1)).unwrap();

    let file = netcdf::open(&output).unwrap();
    let var = file.variable("subset_files").unwrap();
    assert_eq!(
        var.attribute_value("long_name").map(|v| v.unwrap()),
        Some(AttributeValue::Str(String::from(
            "List of subsetted files used to create this merge product."
        )))
    );
}
