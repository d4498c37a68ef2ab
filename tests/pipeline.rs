mod common;

use brain_region_extractor::persistence::{
    InMemoryScanStore, PersistenceError, ScanStore, SqlScriptStore,
};
use brain_region_extractor::report::into_serializable;
use brain_region_extractor::{
    Affine, Atlas, AtlasColumns, Extraction, Extractor, ExtractorConfig, Point3D, ScanMeta, Volume,
    VolumeLoader,
};
use common::*;
use ndarray::Array3;
use std::process::Command;

fn extract_from_disk(regions: &[(&str, i64)], config: ExtractorConfig) -> Extraction {
    let dir = create_temp_dir();
    let dictionary = write_dictionary(dir.path(), regions);
    let atlas_path = write_volume(dir.path(), "atlas.nii.gz", &atlas_volume());
    let scan_path = write_volume(dir.path(), "scan.nii", &scan_volume());

    let atlas = Atlas::load(&dictionary, &AtlasColumns::default()).unwrap();
    let atlas_volume = VolumeLoader::load_from_path(&atlas_path).unwrap();
    let scan = VolumeLoader::load_from_path(&scan_path).unwrap();
    let meta = ScanMeta::from_path(&scan_path).unwrap();

    Extractor::new(config)
        .unwrap()
        .run(&atlas, atlas_volume, &scan, &meta)
        .unwrap()
}

#[test]
fn end_to_end_region_statistics() {
    let extraction = extract_from_disk(&[("Test", 1)], ExtractorConfig::default());
    let report = &extraction.report;

    assert_eq!(report.file_name, "scan.nii");
    assert_eq!(report.dimensions, "4x4x4");
    assert_eq!(report.voxel_size, "1.00x1.00x1.00mm");
    assert!(report.file_size > 348);

    let stats = report.region("Test").unwrap();
    assert_eq!(stats.value, 1);
    assert_eq!(stats.voxel_count, 4);
    assert_eq!(stats.mean_intensity, 10.0);
    assert_eq!(stats.std_intensity, 0.0);
    assert_eq!(stats.min_intensity, 10.0);
    assert_eq!(stats.max_intensity, 10.0);
    assert_eq!(stats.median_intensity, 10.0);
    assert_eq!(stats.centroid, Point3D::new(1.0, 1.5, 1.5));
    assert_eq!(
        stats.bounding_box,
        (Point3D::new(1.0, 1.0, 1.0), Point3D::new(1.0, 2.0, 2.0))
    );

    let json = into_serializable(report).unwrap();
    assert_eq!(json["Test"]["centroid"], serde_json::json!([1.0, 1.5, 1.5]));
    assert_eq!(json["Test"]["voxel_count"], 4);
}

#[test]
fn label_missing_from_atlas_is_skipped() {
    let extraction = extract_from_disk(&[("Test", 1), ("Ghost", 99)], ExtractorConfig::default());

    let json = into_serializable(&extraction.report).unwrap();
    let map = json.as_object().unwrap();
    assert_eq!(map.len(), 1);
    assert!(map.contains_key("Test"));
    assert!(!map.contains_key("Ghost"));
    assert_eq!(extraction.skipped.len(), 1);
    assert_eq!(extraction.skipped[0].value, 99);
}

#[test]
fn surfaces_reach_the_sql_script() {
    let mut config = ExtractorConfig::default();
    config.surface.enabled = true;
    let extraction = extract_from_disk(&[("Test", 1)], config);

    let mut store = SqlScriptStore::new(Vec::new(), 4326);
    store.insert(&extraction.to_record()).unwrap();
    let sql = String::from_utf8(store.into_inner()).unwrap();

    assert!(sql.contains(
        "INSERT INTO scan (file_name, file_size, dimensions, voxel_size) VALUES ('scan.nii'"
    ));
    assert!(sql.contains("'4x4x4', '1.00x1.00x1.00mm'"));
    assert!(sql.contains("ST_GeomFromText('POINT Z(1.000000 1.500000 1.500000)', 4326)"));
    assert!(sql.contains("ST_GeomFromText('POLYHEDRALSURFACE Z ((("));
    assert!(sql.contains(", surface) VALUES"));
}

#[test]
fn duplicate_scans_are_rejected_before_writing() {
    let extraction = extract_from_disk(&[("Test", 1)], ExtractorConfig::default());
    let record = extraction.to_record();

    let mut store = InMemoryScanStore::new();
    store.insert(&record).unwrap();
    assert!(matches!(
        store.insert(&record),
        Err(PersistenceError::DuplicateScan(ref name)) if name == "scan.nii"
    ));
    assert_eq!(store.len(), 1);
}

#[test]
fn surface_failure_keeps_region_statistics() {
    let atlas = Volume::from_spacing(Array3::from_elem((4, 4, 4), 1.0), (1.0, 1.0, 1.0));
    let scan = Volume::from_spacing(Array3::from_elem((4, 4, 4), 10.0), (1.0, 1.0, 1.0));
    let dictionary =
        Atlas::from_reader("Label Name,RH Label\nBrain,1\n".as_bytes(), &AtlasColumns::default())
            .unwrap();
    let meta = ScanMeta {
        file_name: "filled.nii".to_string(),
        file_size: 0,
    };
    let mut config = ExtractorConfig::default();
    config.surface.enabled = true;

    let extraction = Extractor::new(config)
        .unwrap()
        .run(&dictionary, atlas, &scan, &meta)
        .unwrap();

    let stats = extraction.report.region("Brain").unwrap();
    assert_eq!(stats.voxel_count, 64);
    assert_eq!(stats.mean_intensity, 10.0);
    assert!(extraction.skipped.is_empty());

    let geometry = &extraction.geometries["Brain"];
    assert!(geometry.surface.is_none());
    assert!(geometry.surface_error.as_deref().unwrap().contains("uniform"));

    let record = extraction.to_record();
    assert_eq!(record.regions.len(), 1);
    assert_eq!(record.regions[0].name, "Brain");
    assert_eq!(record.regions[0].voxel_count, 64);
    assert_eq!(record.regions[0].surface, None);
}

#[test]
fn world_geometry_follows_scan_affine() {
    let shifted = Affine::from_spacing((2.0, 2.0, 2.0), (-4.0, -4.0, -4.0));
    let atlas = Volume::new(atlas_volume().into_data(), shifted, (2.0, 2.0, 2.0));
    let scan = Volume::new(scan_volume().into_data(), shifted, (2.0, 2.0, 2.0));
    let dictionary =
        Atlas::from_reader("Label Name,RH Label\nTest,1\n".as_bytes(), &AtlasColumns::default())
            .unwrap();
    let meta = ScanMeta {
        file_name: "shifted.nii".to_string(),
        file_size: 0,
    };

    let extraction = Extractor::new(ExtractorConfig::default())
        .unwrap()
        .run(&dictionary, atlas, &scan, &meta)
        .unwrap();

    // Statistics stay in voxel-index space; persisted geometry is in world space.
    let stats = extraction.report.region("Test").unwrap();
    assert_eq!(stats.centroid, Point3D::new(1.0, 1.5, 1.5));
    let record = extraction.to_record();
    assert_eq!(record.regions[0].centroid, "POINT Z(-2.000000 -1.000000 -1.000000)");
    assert_eq!(record.voxel_size, "2.00x2.00x2.00mm");
}

#[test]
fn cli_succeeds_with_missing_label() {
    let dir = create_temp_dir();
    let dictionary = write_dictionary(dir.path(), &[("Test", 1), ("Ghost", 99)]);
    let atlas_path = write_volume(dir.path(), "atlas.nii", &atlas_volume());
    let scan_path = write_volume(dir.path(), "scan.nii", &scan_volume());
    let output = dir.path().join("regions.json");

    let status = Command::new(env!("CARGO_BIN_EXE_brain-region-extractor"))
        .arg("extract")
        .arg("--atlas-dictionary")
        .arg(&dictionary)
        .arg("--atlas-image")
        .arg(&atlas_path)
        .arg("--scan")
        .arg(&scan_path)
        .arg("--output")
        .arg(&output)
        .env_remove("BRAIN_REGION_CONFIG")
        .env_remove("BRAIN_REGION_THREADS")
        .env_remove("BRAIN_REGION_SRID")
        .status()
        .unwrap();
    assert!(status.success());

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(json["Test"]["mean_intensity"], 10.0);
    assert!(json.get("Ghost").is_none());
}

#[test]
fn cli_reports_missing_inputs() {
    let dir = create_temp_dir();
    let output = Command::new(env!("CARGO_BIN_EXE_brain-region-extractor"))
        .arg("extract")
        .arg("--atlas-dictionary")
        .arg(dir.path().join("missing.csv"))
        .arg("--atlas-image")
        .arg(dir.path().join("atlas.nii"))
        .arg("--scan")
        .arg(dir.path().join("scan.nii"))
        .env_remove("BRAIN_REGION_CONFIG")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR:"));
    assert!(stderr.contains("missing.csv"));
}
