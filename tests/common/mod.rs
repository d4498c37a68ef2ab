//! Common test utilities and helpers

#![allow(dead_code)]

use brain_region_extractor::nifti_io::save_nifti_to_file;
use brain_region_extractor::{Affine, Volume};
use ndarray::Array3;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Voxels carrying label 1 in the reference atlas.
pub const TEST_VOXELS: [(usize, usize, usize); 4] = [(1, 1, 1), (1, 1, 2), (1, 2, 1), (1, 2, 2)];

/// Create a temporary directory for test files
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// 4x4x4 atlas with label 1 at [`TEST_VOXELS`] and 0 elsewhere.
pub fn atlas_volume() -> Volume {
    let mut data = Array3::zeros((4, 4, 4));
    for index in TEST_VOXELS {
        data[index] = 1.0;
    }
    Volume::new(data, Affine::identity(), (1.0, 1.0, 1.0))
}

/// 4x4x4 scan with intensity 10.0 at [`TEST_VOXELS`] and 0.0 elsewhere.
pub fn scan_volume() -> Volume {
    let mut data = Array3::zeros((4, 4, 4));
    for index in TEST_VOXELS {
        data[index] = 10.0;
    }
    Volume::new(data, Affine::identity(), (1.0, 1.0, 1.0))
}

/// Write an atlas dictionary with the default column names.
pub fn write_dictionary(dir: &Path, regions: &[(&str, i64)]) -> PathBuf {
    let mut csv = String::from("Label Name,RH Label,LH Label\n");
    for (name, value) in regions {
        csv.push_str(&format!("{name},{value},{}\n", value + 1000));
    }
    let path = dir.join("atlas.csv");
    std::fs::write(&path, csv).expect("Failed to write atlas dictionary");
    path
}

pub fn write_volume(dir: &Path, name: &str, volume: &Volume) -> PathBuf {
    let path = dir.join(name);
    save_nifti_to_file(&path, volume).expect("Failed to write NIfTI volume");
    path
}
