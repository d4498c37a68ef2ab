//! Per-scan extraction report and its JSON boundary.

use crate::statistics::RegionStatistics;
use crate::volume::Volume;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Region '{region}' has a non-finite {field}")]
    NonFinite { region: String, field: &'static str },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity of the scan file a report describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub file_name: String,
    pub file_size: u64,
}

impl ScanMeta {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let file_size = if path.is_dir() {
            // DICOM series: the sum of the slice files.
            std::fs::read_dir(path)?
                .filter_map(Result::ok)
                .filter_map(|entry| entry.metadata().ok())
                .filter(|metadata| metadata.is_file())
                .map(|metadata| metadata.len())
                .sum()
        } else {
            std::fs::metadata(path)?.len()
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            file_name,
            file_size,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub file_name: String,
    pub file_size: u64,
    /// `"WxHxD"`
    pub dimensions: String,
    /// `"W.WWxH.HHxD.DDmm"`
    pub voxel_size: String,
    pub regions: Vec<RegionStatistics>,
}

impl ScanReport {
    pub fn new(meta: &ScanMeta, scan: &Volume, regions: Vec<RegionStatistics>) -> Self {
        Self {
            file_name: meta.file_name.clone(),
            file_size: meta.file_size,
            dimensions: scan.dimensions_label(),
            voxel_size: scan.voxel_size_label(),
            regions,
        }
    }

    /// Regions keyed by name; a repeated name keeps the last region.
    pub fn region_map(&self) -> BTreeMap<&str, &RegionStatistics> {
        self.regions
            .iter()
            .map(|region| (region.name.as_str(), region))
            .collect()
    }

    pub fn region(&self, name: &str) -> Option<&RegionStatistics> {
        self.regions.iter().rev().find(|region| region.name == name)
    }
}

fn check_finite(region: &RegionStatistics) -> Result<(), ReportError> {
    let (lo, hi) = &region.bounding_box;
    let fields = [
        ("mean_intensity", region.mean_intensity.is_finite()),
        ("std_intensity", region.std_intensity.is_finite()),
        ("min_intensity", region.min_intensity.is_finite()),
        ("max_intensity", region.max_intensity.is_finite()),
        ("median_intensity", region.median_intensity.is_finite()),
        ("centroid", region.centroid.is_finite()),
        ("bounding_box", lo.is_finite() && hi.is_finite()),
    ];
    match fields.into_iter().find(|(_, finite)| !finite) {
        Some((field, _)) => Err(ReportError::NonFinite {
            region: region.name.clone(),
            field,
        }),
        None => Ok(()),
    }
}

/// Convert a report into the plain JSON region map
/// `{ "<name>": { "name", "value", "voxel_count", ... }, ... }`.
///
/// This is the one place statistics become JSON values: integers stay
/// integers, floats are plain doubles, points become arrays. Non-finite
/// numbers are rejected instead of silently turning into `null`.
pub fn into_serializable(report: &ScanReport) -> Result<Value, ReportError> {
    let regions = report.region_map();
    for region in regions.values() {
        check_finite(region)?;
    }
    Ok(serde_json::to_value(regions)?)
}
