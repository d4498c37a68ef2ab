//! Region mask engine.

use crate::atlas::AtlasRegion;
use crate::volume::Volume;

use log::warn;
use ndarray::{Array3, Zip};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region '{0}' not found in atlas image")]
    NotInAtlas(String),

    #[error("region '{0}' found in atlas but no corresponding scan data")]
    NoScanData(String),

    #[error("mask shape {mask:?} does not match scan shape {scan:?}; align the volumes first")]
    ShapeMismatch {
        mask: (usize, usize, usize),
        scan: (usize, usize, usize),
    },
}

impl RegionError {
    /// Whether the region should be skipped with a warning rather than failing the run.
    pub fn is_empty_region(&self) -> bool {
        matches!(self, RegionError::NotInAtlas(_) | RegionError::NoScanData(_))
    }
}

/// Boolean voxel mask with the shape of the atlas it was derived from.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionMask {
    mask: Array3<bool>,
    voxel_count: usize,
}

impl RegionMask {
    pub fn new(mask: Array3<bool>) -> Self {
        let voxel_count = mask.iter().filter(|&&inside| inside).count();
        Self { mask, voxel_count }
    }

    pub fn data(&self) -> &Array3<bool> {
        &self.mask
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.mask.dim()
    }

    pub fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    pub fn is_empty(&self) -> bool {
        self.voxel_count == 0
    }

    /// Inclusive index range `(lo, hi)` covering every true cell.
    pub fn extent(&self) -> Option<([usize; 3], [usize; 3])> {
        self.indices().fold(None, |extent, (i, j, k)| {
            let (mut lo, mut hi) = extent.unwrap_or(([i, j, k], [i, j, k]));
            for (axis, index) in [i, j, k].into_iter().enumerate() {
                lo[axis] = lo[axis].min(index);
                hi[axis] = hi[axis].max(index);
            }
            Some((lo, hi))
        })
    }

    /// Voxel indices of the true cells in C order.
    pub fn indices(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.mask
            .indexed_iter()
            .filter_map(|(index, &inside)| inside.then_some(index))
    }
}

/// A region's mask together with the scan intensities under it.
#[derive(Clone, Debug)]
pub struct RegionSample {
    pub mask: RegionMask,
    pub intensities: Vec<f64>,
    /// Mask voxels whose scan sample was not finite.
    pub dropped: usize,
}

/// True wherever the atlas sample equals `label` exactly.
pub fn mask_for(atlas: &Volume, label: i64) -> RegionMask {
    let label = label as f64;
    let mut mask = Array3::from_elem(atlas.dim(), false);
    Zip::from(&mut mask)
        .and(atlas.data())
        .for_each(|inside, &value| *inside = value == label);
    RegionMask::new(mask)
}

/// Scan intensities at mask-true positions, in C order.
///
/// Non-finite scan samples are left out so they cannot poison the statistics.
pub fn apply_mask(scan: &Volume, mask: &RegionMask) -> Result<Vec<f64>, RegionError> {
    if scan.dim() != mask.dim() {
        return Err(RegionError::ShapeMismatch {
            mask: mask.dim(),
            scan: scan.dim(),
        });
    }

    Ok(mask
        .data()
        .iter()
        .zip(scan.data().iter())
        .filter(|(inside, value)| **inside && value.is_finite())
        .map(|(_, &value)| value)
        .collect())
}

/// Mask a region and collect its intensities, signalling empty regions.
pub fn sample_region(
    atlas: &Volume,
    scan: &Volume,
    region: &AtlasRegion,
) -> Result<RegionSample, RegionError> {
    let mask = mask_for(atlas, region.value);
    if mask.is_empty() {
        return Err(RegionError::NotInAtlas(region.name.clone()));
    }

    let intensities = apply_mask(scan, &mask)?;
    if intensities.is_empty() {
        return Err(RegionError::NoScanData(region.name.clone()));
    }

    let dropped = mask.voxel_count() - intensities.len();
    if dropped > 0 {
        warn!(
            "Region '{}': {dropped} of {} voxels have non-finite scan samples and are left out of the statistics",
            region.name,
            mask.voxel_count()
        );
    }

    Ok(RegionSample {
        mask,
        intensities,
        dropped,
    })
}
