//! Region statistics aggregation.
//!
//! Centroid and bounding box are computed in voxel-index space; callers that
//! need world coordinates apply the volume affine afterwards.

use crate::affine::Affine;
use crate::atlas::AtlasRegion;
use crate::region::RegionMask;

use serde::{Deserialize, Serialize};

/// `(x, y, z)` triple. Whether it is voxel-index or world space is up to the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn transformed(self, affine: &Affine) -> Self {
        affine.apply(self.to_array()).into()
    }
}

impl From<[f64; 3]> for Point3D {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Point3D> for [f64; 3] {
    fn from(point: Point3D) -> Self {
        point.to_array()
    }
}

/// Axis-aligned box as `(min, max)` corners.
pub type BoundingBox = (Point3D, Point3D);

/// World-space hull of a voxel-space box: the 8 transformed corners reduced to
/// their component-wise min and max.
pub fn transform_bounding_box(bounding_box: &BoundingBox, affine: &Affine) -> BoundingBox {
    let (lo, hi) = bounding_box;
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for corner in 0..8 {
        let point = [
            if corner & 1 == 0 { lo.x } else { hi.x },
            if corner & 2 == 0 { lo.y } else { hi.y },
            if corner & 4 == 0 { lo.z } else { hi.z },
        ];
        let world = affine.apply(point);
        for axis in 0..3 {
            min[axis] = min[axis].min(world[axis]);
            max[axis] = max[axis].max(world[axis]);
        }
    }
    (min.into(), max.into())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionStatistics {
    pub name: String,
    pub value: i64,
    pub voxel_count: u64,
    pub mean_intensity: f64,
    pub std_intensity: f64,
    pub min_intensity: f64,
    pub max_intensity: f64,
    pub median_intensity: f64,
    pub centroid: Point3D,
    pub bounding_box: BoundingBox,
}

/// Reduce a region's mask and intensities.
///
/// Returns `None` when either input is empty or the intensities are not
/// finite; the mask engine reports those regions before they get here.
pub fn aggregate(
    region: &AtlasRegion,
    mask: &RegionMask,
    intensities: &[f64],
) -> Option<RegionStatistics> {
    if intensities.is_empty() || mask.is_empty() {
        return None;
    }

    let count = intensities.len() as f64;
    let mean = intensities.iter().sum::<f64>() / count;
    let variance = intensities.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    let min = intensities.iter().copied().fold(f64::INFINITY, f64::min);
    let max = intensities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(min <= max) || !mean.is_finite() {
        return None;
    }

    let (centroid, bounding_box) = index_geometry(mask);

    Some(RegionStatistics {
        name: region.name.clone(),
        value: region.value,
        voxel_count: mask.voxel_count() as u64,
        // Summation error can push the mean a hair outside the sample range.
        mean_intensity: mean.clamp(min, max),
        std_intensity: variance.sqrt(),
        min_intensity: min,
        max_intensity: max,
        median_intensity: median(intensities),
        centroid,
        bounding_box,
    })
}

/// Unweighted index centroid and index bounding box of the true cells.
fn index_geometry(mask: &RegionMask) -> (Point3D, BoundingBox) {
    let mut sum = [0.0f64; 3];
    let mut min = [usize::MAX; 3];
    let mut max = [0usize; 3];

    for (i, j, k) in mask.indices() {
        for (axis, index) in [i, j, k].into_iter().enumerate() {
            sum[axis] += index as f64;
            min[axis] = min[axis].min(index);
            max[axis] = max[axis].max(index);
        }
    }

    let count = mask.voxel_count() as f64;
    let centroid = Point3D::new(sum[0] / count, sum[1] / count, sum[2] / count);
    let to_point = |v: [usize; 3]| Point3D::new(v[0] as f64, v[1] as f64, v[2] as f64);
    (centroid, (to_point(min), to_point(max)))
}

/// Median with the mean of the two middle values for even counts.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
