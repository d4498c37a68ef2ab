//! # Brain region extractor
//!
//! This crate computes per-region statistics and surface geometry for brain
//! scans labelled by an atlas. An atlas is a labelled volume plus a CSV
//! dictionary mapping human-readable region names to the integer labels
//! stored in that volume.
//!
//! Volumes are loaded from NIfTI files (`.nii`, `.nii.gz`) or from a
//! directory of DICOM slices. Before anything is measured the atlas is
//! brought onto the scan's voxel grid: if the two volumes do not share a
//! shape and a numerically close affine, the atlas is resampled with
//! nearest-neighbour interpolation so labels are preserved.
//!
//! For every region the crate then produces:
//!  - intensity statistics (voxel count, mean, population std, min, max, median)
//!  - the voxel-index centroid and bounding box
//!  - optionally, the region surface as a `POLYHEDRALSURFACE Z` well-known
//!    text, extracted with marching cubes, mapped to world space and
//!    optionally decimated
//!
//! Regions whose label never appears in the atlas volume, or that cover no
//! usable scan data, are skipped with a warning. Region work runs in parallel
//! using rayon.
//!
//! # Examples
//!
//! ## Extracting region statistics
//!
//! ```no_run
//! # use brain_region_extractor::{Atlas, ExtractorConfig, Extractor, ScanMeta, VolumeLoader};
//! # use std::path::Path;
//! let config = ExtractorConfig::default();
//! let atlas = Atlas::load(Path::new("CerebrA_LabelDetails.csv"), &config.atlas_columns())
//!     .expect("should have loaded the atlas dictionary");
//! let atlas_volume = VolumeLoader::load_from_path("mni_icbm152_CerebrA.nii")
//!     .expect("should have loaded the atlas image");
//! let scan = VolumeLoader::load_from_path("scan.nii.gz").expect("should have loaded the scan");
//! let meta = ScanMeta::from_path(Path::new("scan.nii.gz")).expect("should have read the scan size");
//!
//! let extraction = Extractor::new(config)
//!     .expect("default configuration is valid")
//!     .run(&atlas, atlas_volume, &scan, &meta)
//!     .expect("should have extracted the regions");
//! for region in &extraction.report.regions {
//!     println!("{}: {:.2}", region.name, region.mean_intensity);
//! }
//! ```
//!
//! ## Vectorizing a mask
//!
//! ```
//! # use brain_region_extractor::{Affine, RegionMask, SurfaceOptions, vectorize};
//! # use ndarray::Array3;
//! let mask = RegionMask::new(Array3::from_shape_fn((5, 5, 5), |(i, j, k)| {
//!     (1..=3).contains(&i) && (1..=3).contains(&j) && (1..=3).contains(&k)
//! }));
//! let wkt = vectorize(&mask, (1.0, 1.0, 1.0), &Affine::identity(), &SurfaceOptions::default())
//!     .expect("a 3x3x3 block has a surface");
//! assert!(wkt.starts_with("POLYHEDRALSURFACE Z"));
//! ```

pub mod affine;
pub mod alignment;
pub mod atlas;
pub mod config;
pub mod decimation;
pub mod enums;
mod interpolator;
pub mod marching_cubes;
pub mod mesh;
pub mod nifti_io;
pub mod persistence;
pub mod pipeline;
pub mod region;
pub mod report;
pub mod statistics;
pub mod vectorizer;
pub mod volume;
pub mod volume_loader;
pub mod wkt;

pub use affine::Affine;
pub use alignment::{AffineResampler, Resampler, Tolerance, align, aligned};
pub use atlas::{Atlas, AtlasColumns, AtlasRegion};
pub use config::ExtractorConfig;
pub use enums::{DataType, Interpolation, SortBy};
pub use mesh::Mesh;
pub use pipeline::{Extraction, Extractor, RegionGeometry, SkippedRegion};
pub use region::{RegionMask, apply_mask, mask_for};
pub use report::{ScanMeta, ScanReport};
pub use statistics::{Point3D, RegionStatistics, aggregate};
pub use vectorizer::{SurfaceOptions, vectorize};
pub use volume::Volume;
pub use volume_loader::VolumeLoader;
