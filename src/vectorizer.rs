//! Surface vectorizer: region mask to world-space `POLYHEDRALSURFACE Z`.

use crate::affine::Affine;
use crate::decimation::{DecimationError, decimate};
use crate::marching_cubes::{MarchingCubesError, marching_cubes};
use crate::mesh::Mesh;
use crate::region::RegionMask;
use crate::wkt::mesh_to_polyhedral_surface;

use log::debug;
use ndarray::{Array3, s};
use thiserror::Error;

/// Iso-level separating background (0.0) from region (1.0).
pub const SURFACE_LEVEL: f64 = 0.5;

/// Meshes at or below this many faces are never decimated.
pub const DEFAULT_FACE_THRESHOLD: usize = 10_000;

pub const DEFAULT_DECIMATE_FACTOR: f64 = 0.5;

#[derive(Debug, Error)]
pub enum VectorizeError {
    #[error("Mask is uniform ({voxels} of {total} voxels set), no surface at level 0.5")]
    UniformMask { voxels: usize, total: usize },

    #[error("Decimate factor must be within (0, 1], got {0}")]
    InvalidDecimateFactor(f64),

    #[error("Surface extraction failed: {0}")]
    MarchingCubes(#[from] MarchingCubesError),

    #[error("Mesh decimation failed: {0}")]
    Decimation(#[from] DecimationError),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceOptions {
    pub simplify: bool,
    pub decimate_factor: f64,
    pub face_threshold: usize,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            simplify: false,
            decimate_factor: DEFAULT_DECIMATE_FACTOR,
            face_threshold: DEFAULT_FACE_THRESHOLD,
        }
    }
}

/// Extract the world-space surface mesh of a region mask.
///
/// Marching cubes runs at level 0.5 with vertices scaled by `spacing`, then
/// every vertex is mapped through `affine`. Only the region's extent is
/// marched, padded by one background voxel so regions touching the grid
/// border still close; the crop and padding offsets are removed before the
/// affine is applied.
pub fn extract_surface(
    mask: &RegionMask,
    spacing: (f64, f64, f64),
    affine: &Affine,
    options: &SurfaceOptions,
) -> Result<Mesh, VectorizeError> {
    if !(options.decimate_factor > 0.0 && options.decimate_factor <= 1.0) {
        return Err(VectorizeError::InvalidDecimateFactor(
            options.decimate_factor,
        ));
    }

    let total = mask.data().len();
    let extent = mask.extent().filter(|_| mask.voxel_count() < total);
    let Some((lo, hi)) = extent else {
        return Err(VectorizeError::UniformMask {
            voxels: mask.voxel_count(),
            total,
        });
    };

    let size = [hi[0] - lo[0] + 1, hi[1] - lo[1] + 1, hi[2] - lo[2] + 1];
    let mut field = Array3::<f64>::zeros((size[0] + 2, size[1] + 2, size[2] + 2));
    field
        .slice_mut(s![1..=size[0], 1..=size[1], 1..=size[2]])
        .zip_mut_with(
            &mask
                .data()
                .slice(s![lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]]),
            |value, &inside| *value = if inside { 1.0 } else { 0.0 },
        );

    let mut mesh = marching_cubes(field.view(), SURFACE_LEVEL, spacing)?;
    let offset = [
        (lo[0] as f64 - 1.0) * spacing.0,
        (lo[1] as f64 - 1.0) * spacing.1,
        (lo[2] as f64 - 1.0) * spacing.2,
    ];
    for vertex in &mut mesh.vertices {
        for (coordinate, shift) in vertex.iter_mut().zip(offset) {
            *coordinate += shift;
        }
    }
    debug!(
        "Marching cubes produced {} vertices and {} faces for {} mask voxels",
        mesh.vertex_count(),
        mesh.face_count(),
        mask.voxel_count()
    );

    let mesh = mesh.transform(affine);

    if options.simplify && mesh.face_count() > options.face_threshold {
        let target = ((mesh.face_count() as f64) * options.decimate_factor) as usize;
        return Ok(decimate(&mesh, target.max(1))?);
    }

    Ok(mesh)
}

/// Vectorize a region mask to `POLYHEDRALSURFACE Z` WKT.
pub fn vectorize(
    mask: &RegionMask,
    spacing: (f64, f64, f64),
    affine: &Affine,
    options: &SurfaceOptions,
) -> Result<String, VectorizeError> {
    let mesh = extract_surface(mask, spacing, affine, options)?;
    Ok(mesh_to_polyhedral_surface(&mesh))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_mask(dim: usize, lo: usize, hi: usize) -> RegionMask {
        RegionMask::new(Array3::from_shape_fn((dim, dim, dim), |(i, j, k)| {
            [i, j, k].iter().all(|&v| v >= lo && v <= hi)
        }))
    }

    #[test]
    fn block_surface_matches_block_extent() {
        let mesh = extract_surface(
            &block_mask(7, 2, 4),
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();

        let (lo, hi) = mesh.bounds().unwrap();
        for axis in 0..3 {
            assert!((lo[axis] - 1.5).abs() < 1e-9);
            assert!((hi[axis] - 4.5).abs() < 1e-9);
        }
        assert_eq!(mesh.boundary_edge_count(), 0);
    }

    #[test]
    fn border_region_is_closed_in_unpadded_frame() {
        let mesh = extract_surface(
            &block_mask(3, 0, 2),
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        );
        // The whole grid is set, which is a uniform mask.
        assert!(matches!(mesh, Err(VectorizeError::UniformMask { .. })));

        let mesh = extract_surface(
            &block_mask(4, 0, 1),
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();
        assert_eq!(mesh.boundary_edge_count(), 0);
        assert_eq!(mesh.bounds(), Some(([-0.5; 3], [1.5; 3])));
    }

    #[test]
    fn surface_is_independent_of_grid_size() {
        let small = vectorize(
            &block_mask(7, 2, 4),
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();
        let large = vectorize(
            &block_mask(40, 2, 4),
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn far_corner_region_keeps_its_position() {
        let mesh = extract_surface(
            &block_mask(12, 8, 10),
            (2.0, 1.0, 0.5),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();
        let (lo, hi) = mesh.bounds().unwrap();
        assert!((lo[0] - 15.0).abs() < 1e-9 && (hi[0] - 21.0).abs() < 1e-9);
        assert!((lo[1] - 7.5).abs() < 1e-9 && (hi[1] - 10.5).abs() < 1e-9);
        assert!((lo[2] - 3.75).abs() < 1e-9 && (hi[2] - 5.25).abs() < 1e-9);
        assert_eq!(mesh.boundary_edge_count(), 0);
    }

    #[test]
    fn affine_maps_into_world_space() {
        let affine = Affine::from_spacing((1.0, 1.0, 1.0), (100.0, -50.0, 10.0));
        let mesh = extract_surface(
            &block_mask(7, 2, 4),
            (1.0, 1.0, 1.0),
            &affine,
            &SurfaceOptions::default(),
        )
        .unwrap();
        let (lo, hi) = mesh.bounds().unwrap();
        assert!((lo[0] - 101.5).abs() < 1e-9);
        assert!((hi[1] + 45.5).abs() < 1e-9);
        assert!((hi[2] - 14.5).abs() < 1e-9);
    }

    #[test]
    fn small_meshes_are_not_decimated() {
        let mask = block_mask(7, 2, 4);
        let plain = extract_surface(
            &mask,
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();
        let simplified = extract_surface(
            &mask,
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions {
                simplify: true,
                ..SurfaceOptions::default()
            },
        )
        .unwrap();
        assert_eq!(plain, simplified);
    }

    #[test]
    fn large_meshes_are_decimated_when_requested() {
        let options = SurfaceOptions {
            simplify: true,
            decimate_factor: 0.5,
            face_threshold: 50,
        };
        let mask = block_mask(9, 1, 7);
        let plain = extract_surface(
            &mask,
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();
        let simplified = extract_surface(&mask, (1.0, 1.0, 1.0), &Affine::identity(), &options)
            .unwrap();
        assert!(plain.face_count() > 50);
        assert!(simplified.face_count() < plain.face_count());
    }

    #[test]
    fn empty_mask_and_bad_factor_fail() {
        let empty = RegionMask::new(Array3::from_elem((4, 4, 4), false));
        assert!(matches!(
            vectorize(&empty, (1.0, 1.0, 1.0), &Affine::identity(), &SurfaceOptions::default()),
            Err(VectorizeError::UniformMask { voxels: 0, .. })
        ));

        let options = SurfaceOptions {
            decimate_factor: 0.0,
            ..SurfaceOptions::default()
        };
        assert!(matches!(
            vectorize(&block_mask(5, 1, 3), (1.0, 1.0, 1.0), &Affine::identity(), &options),
            Err(VectorizeError::InvalidDecimateFactor(_))
        ));
    }

    #[test]
    fn wkt_starts_with_surface_tag() {
        let wkt = vectorize(
            &block_mask(5, 2, 2),
            (1.0, 1.0, 1.0),
            &Affine::identity(),
            &SurfaceOptions::default(),
        )
        .unwrap();
        assert!(wkt.starts_with("POLYHEDRALSURFACE Z ((("));
        assert!(wkt.ends_with(")))"));
        assert_eq!(wkt.matches("((").count(), 8);
    }
}
