//! Persistence adapter: scan and region rows with world-space geometry.
//!
//! Records mirror the `scan` and `scan_region` tables. Region centroids and
//! bounding boxes are computed in voxel-index space and are moved into world
//! space here, since the geometry columns are only meaningful there.

use crate::affine::Affine;
use crate::report::ScanReport;
use crate::statistics::{RegionStatistics, transform_bounding_box};
use crate::wkt::{bounding_box_surface, point_z};

use log::info;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Scan '{0}' is already recorded")]
    DuplicateScan(String),

    #[error("Region '{region}' of scan '{scan}' has non-finite statistics")]
    NonFinite { scan: String, region: String },

    #[error("Failed to write SQL script: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanRegionRecord {
    pub name: String,
    pub value: i64,
    pub voxel_count: u64,
    pub mean_intensity: f64,
    pub std_intensity: f64,
    pub min_intensity: f64,
    pub max_intensity: f64,
    pub median_intensity: f64,
    /// `POINT Z` in world space.
    pub centroid: String,
    /// `POLYHEDRALSURFACE Z` of the world-space hull of the index box.
    pub bounding_box: String,
    /// Vectorized region surface, when surfaces were extracted.
    pub surface: Option<String>,
}

impl ScanRegionRecord {
    pub fn new(stats: &RegionStatistics, affine: &Affine, surface: Option<String>) -> Self {
        Self {
            name: stats.name.clone(),
            value: stats.value,
            voxel_count: stats.voxel_count,
            mean_intensity: stats.mean_intensity,
            std_intensity: stats.std_intensity,
            min_intensity: stats.min_intensity,
            max_intensity: stats.max_intensity,
            median_intensity: stats.median_intensity,
            centroid: point_z(&stats.centroid.transformed(affine)),
            bounding_box: bounding_box_surface(&transform_bounding_box(&stats.bounding_box, affine)),
            surface,
        }
    }

    fn is_finite(&self) -> bool {
        [
            self.mean_intensity,
            self.std_intensity,
            self.min_intensity,
            self.max_intensity,
            self.median_intensity,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanRecord {
    pub file_name: String,
    pub file_size: u64,
    pub dimensions: String,
    pub voxel_size: String,
    pub regions: Vec<ScanRegionRecord>,
}

impl ScanRecord {
    /// Build the rows for a report. `surface_for` supplies the optional
    /// surface WKT of each region by name.
    pub fn new(
        report: &ScanReport,
        affine: &Affine,
        mut surface_for: impl FnMut(&str) -> Option<String>,
    ) -> Self {
        Self {
            file_name: report.file_name.clone(),
            file_size: report.file_size,
            dimensions: report.dimensions.clone(),
            voxel_size: report.voxel_size.clone(),
            regions: report
                .regions
                .iter()
                .map(|stats| ScanRegionRecord::new(stats, affine, surface_for(&stats.name)))
                .collect(),
        }
    }

    fn check(&self) -> Result<(), PersistenceError> {
        match self.regions.iter().find(|region| !region.is_finite()) {
            Some(region) => Err(PersistenceError::NonFinite {
                scan: self.file_name.clone(),
                region: region.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Destination for scan records. `file_name` is unique: inserting a scan
/// that is already present fails with [`PersistenceError::DuplicateScan`]
/// and writes nothing.
pub trait ScanStore {
    fn contains(&self, file_name: &str) -> bool;

    /// Insert a scan with all its regions, returning the new scan id.
    fn insert(&mut self, scan: &ScanRecord) -> Result<u64, PersistenceError>;
}

#[derive(Debug, Default)]
pub struct InMemoryScanStore {
    scans: Vec<ScanRecord>,
}

impl InMemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<&ScanRecord> {
        self.scans.iter().find(|scan| scan.file_name == file_name)
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }
}

impl ScanStore for InMemoryScanStore {
    fn contains(&self, file_name: &str) -> bool {
        self.get(file_name).is_some()
    }

    fn insert(&mut self, scan: &ScanRecord) -> Result<u64, PersistenceError> {
        if self.contains(&scan.file_name) {
            return Err(PersistenceError::DuplicateScan(scan.file_name.clone()));
        }
        scan.check()?;
        self.scans.push(scan.clone());
        Ok(self.scans.len() as u64)
    }
}

/// Renders every inserted scan as one transactional SQL script on `writer`.
///
/// Geometry columns are written with `ST_GeomFromText(wkt, srid)`.
pub struct SqlScriptStore<W: Write> {
    writer: W,
    srid: i32,
    written: HashSet<String>,
}

impl<W: Write> SqlScriptStore<W> {
    pub fn new(writer: W, srid: i32) -> Self {
        Self {
            writer,
            srid,
            written: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn geometry(&self, wkt: &str) -> String {
        format!("ST_GeomFromText({}, {})", quote(wkt), self.srid)
    }

    fn render(&self, scan: &ScanRecord) -> String {
        let mut sql = String::from("BEGIN;\n");
        let _ = writeln!(
            sql,
            "INSERT INTO scan (file_name, file_size, dimensions, voxel_size) VALUES ({}, {}, {}, {});",
            quote(&scan.file_name),
            scan.file_size,
            quote(&scan.dimensions),
            quote(&scan.voxel_size)
        );

        let scan_id = format!("(SELECT id FROM scan WHERE file_name = {})", quote(&scan.file_name));
        for region in &scan.regions {
            let mut columns = String::from(
                "scan_id, name, value, voxel_count, mean_intensity, std_intensity, \
                 min_intensity, max_intensity, median_intensity, centroid, bounding_box",
            );
            let mut values = format!(
                "{scan_id}, {}, {}, {}, {:?}, {:?}, {:?}, {:?}, {:?}, {}, {}",
                quote(&region.name),
                region.value,
                region.voxel_count,
                region.mean_intensity,
                region.std_intensity,
                region.min_intensity,
                region.max_intensity,
                region.median_intensity,
                self.geometry(&region.centroid),
                self.geometry(&region.bounding_box),
            );
            if let Some(surface) = &region.surface {
                columns.push_str(", surface");
                let _ = write!(values, ", {}", self.geometry(surface));
            }
            let _ = writeln!(sql, "INSERT INTO scan_region ({columns}) VALUES ({values});");
        }

        sql.push_str("COMMIT;\n");
        sql
    }
}

impl<W: Write> ScanStore for SqlScriptStore<W> {
    fn contains(&self, file_name: &str) -> bool {
        self.written.contains(file_name)
    }

    fn insert(&mut self, scan: &ScanRecord) -> Result<u64, PersistenceError> {
        if self.contains(&scan.file_name) {
            return Err(PersistenceError::DuplicateScan(scan.file_name.clone()));
        }
        scan.check()?;

        let sql = self.render(scan);
        self.writer.write_all(sql.as_bytes())?;
        self.writer.flush()?;
        self.written.insert(scan.file_name.clone());
        info!(
            "Wrote SQL for scan '{}' with {} regions",
            scan.file_name,
            scan.regions.len()
        );
        Ok(self.written.len() as u64)
    }
}

/// SQL string literal with embedded quotes doubled.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
