use ndarray::ArrayView3;

/// Value assigned to samples that fall outside the source grid.
pub(crate) const OUTSIDE_VALUE: f64 = 0.0;

/// Tolerance for coordinates that land a hair outside the last voxel after
/// an affine round trip.
const EDGE_EPSILON: f64 = 1e-6;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Nearest-neighbour sample at fractional index `(x, y, z)`.
    #[inline]
    pub(crate) fn nearest(volume: &ArrayView3<f64>, x: f64, y: f64, z: f64) -> f64 {
        let (dx, dy, dz) = volume.dim();
        match (
            Self::round_index(x, dx),
            Self::round_index(y, dy),
            Self::round_index(z, dz),
        ) {
            (Some(i), Some(j), Some(k)) => volume[[i, j, k]],
            _ => OUTSIDE_VALUE,
        }
    }

    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f64>, x: f64, y: f64, z: f64) -> f64 {
        let (dx, dy, dz) = volume.dim();
        let (Some(x), Some(y), Some(z)) = (
            Self::clamp_inside(x, dx),
            Self::clamp_inside(y, dy),
            Self::clamp_inside(z, dz),
        ) else {
            return OUTSIDE_VALUE;
        };

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(dx - 1);
        let y1 = (y0 + 1).min(dy - 1);
        let z1 = (z0 + 1).min(dz - 1);

        let fx = x - x0 as f64;
        let fy = y - y0 as f64;
        let fz = z - z0 as f64;

        let c00 = volume[[x0, y0, z0]].mul_add(1.0 - fx, volume[[x1, y0, z0]] * fx);
        let c10 = volume[[x0, y1, z0]].mul_add(1.0 - fx, volume[[x1, y1, z0]] * fx);
        let c01 = volume[[x0, y0, z1]].mul_add(1.0 - fx, volume[[x1, y0, z1]] * fx);
        let c11 = volume[[x0, y1, z1]].mul_add(1.0 - fx, volume[[x1, y1, z1]] * fx);

        let c0 = c00.mul_add(1.0 - fy, c10 * fy);
        let c1 = c01.mul_add(1.0 - fy, c11 * fy);

        c0.mul_add(1.0 - fz, c1 * fz)
    }

    #[inline]
    fn round_index(coordinate: f64, len: usize) -> Option<usize> {
        let rounded = (coordinate + 0.5).floor();
        if rounded >= 0.0 && rounded < len as f64 {
            Some(rounded as usize)
        } else {
            None
        }
    }

    #[inline]
    fn clamp_inside(coordinate: f64, len: usize) -> Option<f64> {
        let last = len.checked_sub(1)? as f64;
        if coordinate < -EDGE_EPSILON || coordinate > last + EDGE_EPSILON {
            return None;
        }
        Some(coordinate.clamp(0.0, last))
    }
}
