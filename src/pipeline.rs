//! Region extraction pipeline.
//!
//! One atlas and one scan per run: the atlas is brought onto the scan grid,
//! then every atlas region is masked, reduced to statistics and optionally
//! vectorized. Regions are independent and run in parallel on rayon.

use crate::affine::Affine;
use crate::alignment::{AffineResampler, AlignmentError, Resampler, align};
use crate::atlas::{Atlas, AtlasRegion};
use crate::config::{ConfigError, ExtractorConfig};
use crate::enums::Interpolation;
use crate::persistence::ScanRecord;
use crate::region::{RegionError, sample_region};
use crate::report::{ScanMeta, ScanReport};
use crate::statistics::{RegionStatistics, aggregate, transform_bounding_box};
use crate::vectorizer::vectorize;
use crate::volume::Volume;
use crate::wkt::{bounding_box_surface, point_z};

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Alignment failed: {0}")]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("Could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// World-space geometry of one region.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionGeometry {
    /// `POINT Z` of the centroid.
    pub centroid: String,
    /// `POLYHEDRALSURFACE Z` of the bounding box hull.
    pub bounding_box: String,
    /// Vectorized surface, when surfaces are enabled and extraction succeeded.
    pub surface: Option<String>,
    /// Why the surface could not be extracted.
    pub surface_error: Option<String>,
}

/// An atlas region left out of the report.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedRegion {
    pub name: String,
    pub value: i64,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct Extraction {
    pub report: ScanReport,
    pub geometries: BTreeMap<String, RegionGeometry>,
    pub skipped: Vec<SkippedRegion>,
    /// Voxel-to-world affine of the scan grid the statistics refer to.
    pub affine: Affine,
}

impl Extraction {
    /// Persistence rows for this scan, carrying surfaces where extracted.
    pub fn to_record(&self) -> ScanRecord {
        ScanRecord::new(&self.report, &self.affine, |name| {
            self.geometries
                .get(name)
                .and_then(|geometry| geometry.surface.clone())
        })
    }
}

enum RegionOutcome {
    Extracted(RegionStatistics, RegionGeometry),
    Skipped(SkippedRegion),
}

pub struct Extractor {
    config: ExtractorConfig,
    resampler: Box<dyn Resampler>,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            resampler: Box::new(AffineResampler),
        })
    }

    /// Replace the resampler used by the alignment gate.
    pub fn with_resampler(mut self, resampler: impl Resampler + 'static) -> Self {
        self.resampler = Box::new(resampler);
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract statistics (and geometry) for every atlas region of `scan`.
    pub fn run(
        &self,
        atlas: &Atlas,
        atlas_volume: Volume,
        scan: &Volume,
        meta: &ScanMeta,
    ) -> Result<Extraction, PipelineError> {
        info!("Processing '{}' with {} atlas regions", meta.file_name, atlas.len());

        let atlas_volume = align(
            atlas_volume,
            scan,
            Interpolation::Nearest,
            self.config.tolerance(),
            self.resampler.as_ref(),
        )?;

        let outcomes = match self.config.threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()?
                .install(|| self.process_regions(atlas, &atlas_volume, scan)),
            None => self.process_regions(atlas, &atlas_volume, scan),
        }?;

        let mut regions = Vec::new();
        let mut geometries = BTreeMap::new();
        let mut skipped = Vec::new();
        for outcome in outcomes {
            match outcome {
                RegionOutcome::Extracted(stats, geometry) => {
                    if let Some(error) = &geometry.surface_error {
                        warn!("Could not vectorize region '{}': {error}", stats.name);
                    }
                    geometries.insert(stats.name.clone(), geometry);
                    regions.push(stats);
                }
                RegionOutcome::Skipped(region) => {
                    warn!("Skipping region '{}': {}", region.name, region.reason);
                    skipped.push(region);
                }
            }
        }

        info!(
            "Extracted {} regions, skipped {}",
            regions.len(),
            skipped.len()
        );

        Ok(Extraction {
            report: ScanReport::new(meta, scan, regions),
            geometries,
            skipped,
            affine: *scan.affine(),
        })
    }

    fn process_regions(
        &self,
        atlas: &Atlas,
        atlas_volume: &Volume,
        scan: &Volume,
    ) -> Result<Vec<RegionOutcome>, RegionError> {
        atlas
            .regions
            .par_iter()
            .map(|region| self.process_region(region, atlas_volume, scan))
            .collect()
    }

    fn process_region(
        &self,
        region: &AtlasRegion,
        atlas_volume: &Volume,
        scan: &Volume,
    ) -> Result<RegionOutcome, RegionError> {
        let skip = |reason: String| {
            RegionOutcome::Skipped(SkippedRegion {
                name: region.name.clone(),
                value: region.value,
                reason,
            })
        };

        let sample = match sample_region(atlas_volume, scan, region) {
            Ok(sample) => sample,
            Err(err) if err.is_empty_region() => return Ok(skip(err.to_string())),
            Err(err) => return Err(err),
        };
        debug!(
            "Region '{}' ({}) covers {} voxels",
            region.name,
            region.value,
            sample.mask.voxel_count()
        );

        let Some(stats) = aggregate(region, &sample.mask, &sample.intensities) else {
            return Ok(skip("statistics are not finite".to_string()));
        };

        let affine = scan.affine();
        let mut geometry = RegionGeometry {
            centroid: point_z(&stats.centroid.transformed(affine)),
            bounding_box: bounding_box_surface(&transform_bounding_box(
                &stats.bounding_box,
                affine,
            )),
            surface: None,
            surface_error: None,
        };

        if self.config.surface.enabled {
            match vectorize(
                &sample.mask,
                scan.spacing(),
                affine,
                &self.config.surface_options(),
            ) {
                Ok(wkt) => geometry.surface = Some(wkt),
                Err(err) => geometry.surface_error = Some(err.to_string()),
            }
        }

        Ok(RegionOutcome::Extracted(stats, geometry))
    }
}
