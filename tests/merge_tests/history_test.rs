use super::common::{make_granule, read_history};
use concise::merge_netcdf_files;

#[test]
fn test_history_chains_prior_entries_before_engine_entry() {
    // A granule carrying provenance keeps its entries; this run's entry
    // is appended last
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "subsetted.nc", |file| {
        file.add_dimension("obs", 2).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[1.0, 2.0], ..).unwrap();
        file.add_attribute("history_json", r#"[{"program": "l2ss-py"}]"#)
            .unwrap();
    });
    let b = make_granule(dir.path(), "plain.nc", |file| {
        file.add_dimension("obs", 2).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[3.0, 4.0], ..).unwrap();
    });

    let output = dir.path().join("merged.nc");
    merge_netcdf_files(&[a, b], &output, Some(1)).unwrap();

    let history = read_history(&output);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["program"], "l2ss-py");

    let engine = &history[1];
    assert_eq!(engine["program"], "concise");
    assert_eq!(
        engine["derived_from"],
        serde_json::json!(["subsetted.nc", "plain.nc"])
    );
    assert!(engine["date_time"].as_str().unwrap().contains('T'));
    assert!(engine.get("$schema").is_some());
    assert!(engine.get("program_ref").is_some());
    assert!(engine["parameters"]
        .as_str()
        .unwrap()
        .starts_with("input_files="));
}

#[test]
fn test_history_written_without_prior_entries() {
    let dir = tempfile::tempdir().unwrap();

    let a = make_granule(dir.path(), "a.nc", |file| {
        file.add_dimension("obs", 1).unwrap();
        let mut var = file.add_variable::<f32>("sst", &["obs"]).unwrap();
        var.put_values(&[1.0], ..).unwrap();
    });

    let output = dir.path().join("merged.nc");
    merge_netcdf_files(&[a], &output, Some(1)).unwrap();

    let history = read_history(&output);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["program"], "concise");
}
