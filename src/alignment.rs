//! Coordinate alignment gate.
//!
//! Decides whether two volumes already share a voxel grid and, when they do
//! not, resamples one onto the other through a [`Resampler`].

use crate::enums::Interpolation;
use crate::interpolator::Interpolator;
use crate::volume::Volume;

use log::info;
use ndarray::{Array3, Zip};
use thiserror::Error;

/// Relative tolerance applied when comparing affines.
pub const DEFAULT_RTOL: f64 = 1e-5;
/// Absolute tolerance applied when comparing affines.
pub const DEFAULT_ATOL: f64 = 1e-8;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("Source affine is singular and cannot be inverted")]
    SingularAffine,

    #[error("Target grid is empty ({0}x{1}x{2})")]
    EmptyTarget(usize, usize, usize),
}

/// Tolerances used by [`aligned_with`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
        }
    }
}

/// True iff both volumes have the same shape and numerically close affines.
pub fn aligned(a: &Volume, b: &Volume) -> bool {
    aligned_with(a, b, Tolerance::default())
}

pub fn aligned_with(a: &Volume, b: &Volume, tolerance: Tolerance) -> bool {
    a.dim() == b.dim() && a.affine().is_close(b.affine(), tolerance.rtol, tolerance.atol)
}

/// Brings a volume onto another volume's grid.
///
/// Implementations must leave both inputs untouched and return a volume that
/// owns its own storage.
pub trait Resampler: Sync {
    fn resample(
        &self,
        volume: &Volume,
        target: &Volume,
        interpolation: Interpolation,
    ) -> Result<Volume, AlignmentError>;
}

/// Pull-back resampler: every target voxel is mapped through the target
/// affine and the inverse source affine, then sampled from the source.
#[derive(Clone, Copy, Debug, Default)]
pub struct AffineResampler;

impl Resampler for AffineResampler {
    fn resample(
        &self,
        volume: &Volume,
        target: &Volume,
        interpolation: Interpolation,
    ) -> Result<Volume, AlignmentError> {
        let (tx, ty, tz) = target.dim();
        if tx == 0 || ty == 0 || tz == 0 {
            return Err(AlignmentError::EmptyTarget(tx, ty, tz));
        }

        let world_to_source = volume
            .affine()
            .try_inverse()
            .ok_or(AlignmentError::SingularAffine)?;
        let target_to_world = *target.affine();
        let source = volume.data().view();

        let mut resampled = Array3::<f64>::zeros((tx, ty, tz));
        Zip::indexed(&mut resampled).par_for_each(|(i, j, k), value| {
            let world = target_to_world.apply([i as f64, j as f64, k as f64]);
            let [x, y, z] = world_to_source.apply(world);
            *value = match interpolation {
                Interpolation::Nearest => Interpolator::nearest(&source, x, y, z),
                Interpolation::Continuous => {
                    Interpolator::trilinear_interpolate(&source, x, y, z)
                }
            };
        });

        Ok(Volume::new(resampled, target_to_world, target.spacing()))
    }
}

/// Resample `volume` onto `target` unless the two are already aligned.
pub fn align(
    volume: Volume,
    target: &Volume,
    interpolation: Interpolation,
    tolerance: Tolerance,
    resampler: &dyn Resampler,
) -> Result<Volume, AlignmentError> {
    if aligned_with(&volume, target, tolerance) {
        info!("Volume is already in the target dimensions.");
        return Ok(volume);
    }

    info!(
        "Resampling {} volume onto {} grid ({interpolation} interpolation).",
        volume.dimensions_label(),
        target.dimensions_label()
    );
    resampler.resample(&volume, target, interpolation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;

    fn labelled(dim: (usize, usize, usize), affine: Affine) -> Volume {
        let data = Array3::from_shape_fn(dim, |(i, j, k)| ((i + j + k) % 3) as f64);
        Volume::new(data, affine, (1.0, 1.0, 1.0))
    }

    #[test]
    fn a_volume_is_aligned_with_itself() {
        let volume = labelled((3, 4, 5), Affine::from_spacing((1.5, 1.0, 2.0), (1.0, 2.0, 3.0)));
        assert!(aligned(&volume, &volume));
    }

    #[test]
    fn shape_or_affine_mismatch_is_not_aligned() {
        let a = labelled((3, 3, 3), Affine::identity());
        let b = labelled((3, 3, 4), Affine::identity());
        let c = labelled((3, 3, 3), Affine::from_spacing((1.0, 1.0, 1.0), (0.5, 0.0, 0.0)));
        assert!(!aligned(&a, &b));
        assert!(!aligned(&a, &c));
    }

    #[test]
    fn identity_resample_copies_data() {
        let source = labelled((4, 4, 4), Affine::identity());
        let target = labelled((4, 4, 4), Affine::identity());
        for mode in [Interpolation::Nearest, Interpolation::Continuous] {
            let out = AffineResampler.resample(&source, &target, mode).unwrap();
            assert_eq!(out.data(), source.data());
        }
    }

    #[test]
    fn nearest_keeps_labels_on_finer_grid() {
        let source = labelled((4, 4, 4), Affine::from_spacing((2.0, 2.0, 2.0), (0.0, 0.0, 0.0)));
        let target = Volume::from_spacing(Array3::zeros((8, 8, 8)), (1.0, 1.0, 1.0));
        let out = AffineResampler
            .resample(&source, &target, Interpolation::Nearest)
            .unwrap();
        assert_eq!(out.dim(), (8, 8, 8));
        assert!(out.data().iter().all(|v| [0.0, 1.0, 2.0].contains(v)));
        assert_eq!(out.data()[[2, 2, 2]], source.data()[[1, 1, 1]]);
        assert!(aligned(&out, &target));
    }

    #[test]
    fn translation_shifts_samples_and_pads_with_zero() {
        let source = Volume::from_spacing(Array3::from_elem((3, 3, 3), 5.0), (1.0, 1.0, 1.0));
        let target = Volume::new(
            Array3::zeros((3, 3, 3)),
            Affine::from_spacing((1.0, 1.0, 1.0), (1.0, 0.0, 0.0)),
            (1.0, 1.0, 1.0),
        );
        let out = AffineResampler
            .resample(&source, &target, Interpolation::Continuous)
            .unwrap();
        assert_eq!(out.data()[[0, 1, 1]], 5.0);
        assert_eq!(out.data()[[1, 1, 1]], 5.0);
        assert_eq!(out.data()[[2, 1, 1]], 0.0);
    }

    #[test]
    fn align_skips_resampling_when_aligned() {
        struct Refusing;
        impl Resampler for Refusing {
            fn resample(&self, _: &Volume, _: &Volume, _: Interpolation) -> Result<Volume, AlignmentError> {
                Err(AlignmentError::SingularAffine)
            }
        }

        let volume = labelled((2, 2, 2), Affine::identity());
        let target = volume.clone();
        let out = align(volume, &target, Interpolation::Nearest, Tolerance::default(), &Refusing);
        assert!(out.is_ok());
    }

    #[test]
    fn singular_source_is_rejected() {
        let source = Volume::new(
            Array3::zeros((2, 2, 2)),
            Affine::from_spacing((0.0, 1.0, 1.0), (0.0, 0.0, 0.0)),
            (1.0, 1.0, 1.0),
        );
        let target = Volume::from_spacing(Array3::zeros((2, 2, 2)), (1.0, 1.0, 1.0));
        assert!(matches!(
            AffineResampler.resample(&source, &target, Interpolation::Nearest),
            Err(AlignmentError::SingularAffine)
        ));
    }
}
