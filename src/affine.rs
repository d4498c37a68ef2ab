//! 4x4 voxel-to-world transforms.

use nalgebra::{Matrix4, Vector4};

/// Homogeneous transform mapping voxel index `(i, j, k, 1)` to world `(x, y, z, 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine(Matrix4<f64>);

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// Build from a row-major `[f64; 16]`.
    pub fn from_row_slice(values: &[f64; 16]) -> Self {
        Self(Matrix4::from_row_slice(values))
    }

    /// Diagonal scaling with a translation, the shape of most scanner affines.
    pub fn from_spacing(spacing: (f64, f64, f64), origin: (f64, f64, f64)) -> Self {
        Self::from_row_slice(&[
            spacing.0, 0.0, 0.0, origin.0, //
            0.0, spacing.1, 0.0, origin.1, //
            0.0, 0.0, spacing.2, origin.2, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    /// Row-major copy of the matrix.
    pub fn to_row_array(&self) -> [f64; 16] {
        let mut values = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                values[row * 4 + col] = self.0[(row, col)];
            }
        }
        values
    }

    /// Apply to `(x, y, z, 1)` and drop the homogeneous component.
    #[inline]
    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let v = self.0 * Vector4::new(point[0], point[1], point[2], 1.0);
        [v.x, v.y, v.z]
    }

    pub fn try_inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    /// Element-wise `|a - b| <= atol + rtol * |b|`, the numpy `allclose` rule.
    pub fn is_close(&self, other: &Affine, rtol: f64, atol: f64) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= atol + rtol * b.abs())
    }
}
