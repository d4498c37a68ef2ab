use crate::affine::Affine;
use crate::enums::DataType;

use ndarray::Array3;

/// Voxel spacing used when a header carries no zoom information.
pub const DEFAULT_SPACING: (f64, f64, f64) = (1.0, 1.0, 1.0);

/// A 3-D scalar volume positioned in world space.
///
/// Volumes are never mutated after construction; resampling produces a new one.
#[derive(Clone, Debug)]
pub struct Volume {
    data: Array3<f64>,
    affine: Affine,
    spacing: (f64, f64, f64),
    data_type: Option<DataType>,
}

impl Volume {
    pub fn new(data: Array3<f64>, affine: Affine, spacing: (f64, f64, f64)) -> Self {
        Self {
            data,
            affine,
            spacing: sanitize_spacing(spacing),
            data_type: None,
        }
    }

    /// Record the sample type the volume was stored with.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Volume whose affine is the plain diagonal of its spacing.
    pub fn from_spacing(data: Array3<f64>, spacing: (f64, f64, f64)) -> Self {
        let spacing = sanitize_spacing(spacing);
        Self::new(data, Affine::from_spacing(spacing, (0.0, 0.0, 0.0)), spacing)
    }

    /// Get the dimensions of the volume along its three index axes
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn spacing(&self) -> (f64, f64, f64) {
        self.spacing
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    /// Stored sample type; `None` for resampled or DICOM-derived volumes.
    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// Convert every sample to `data_type`, as it would be stored on disk.
    pub fn cast(self, data_type: DataType) -> Self {
        Self {
            data: self.data.mapv(|value| data_type.cast(value)),
            data_type: Some(data_type),
            ..self
        }
    }

    /// Shape formatted as `"WxHxD"`.
    pub fn dimensions_label(&self) -> String {
        let (w, h, d) = self.dim();
        format!("{w}x{h}x{d}")
    }

    /// Spacing formatted as `"W.WWxH.HHxD.DDmm"`.
    pub fn voxel_size_label(&self) -> String {
        let (x, y, z) = self.spacing;
        format!("{x:.2}x{y:.2}x{z:.2}mm")
    }
}

fn sanitize_spacing(spacing: (f64, f64, f64)) -> (f64, f64, f64) {
    let fix = |value: f64, default: f64| {
        if value.is_finite() && value > 0.0 {
            value
        } else {
            default
        }
    };
    (
        fix(spacing.0, DEFAULT_SPACING.0),
        fix(spacing.1, DEFAULT_SPACING.1),
        fix(spacing.2, DEFAULT_SPACING.2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_record_format() {
        let volume = Volume::from_spacing(Array3::zeros((182, 218, 182)), (1.0, 0.5, 1.25));
        assert_eq!(volume.dimensions_label(), "182x218x182");
        assert_eq!(volume.voxel_size_label(), "1.00x0.50x1.25mm");
    }

    #[test]
    fn missing_spacing_defaults_to_one_millimetre() {
        let volume = Volume::new(Array3::zeros((2, 2, 2)), Affine::identity(), (0.0, f64::NAN, 2.0));
        assert_eq!(volume.spacing(), (1.0, 1.0, 2.0));
    }

    #[test]
    fn cast_rounds_samples_and_records_type() {
        let data = Array3::from_shape_vec((2, 1, 1), vec![3.7, 400.0]).unwrap();
        let volume = Volume::from_spacing(data, (1.0, 1.0, 1.0));
        assert_eq!(volume.data_type(), None);

        let cast = volume.cast(DataType::Uint8);
        assert_eq!(cast.data_type(), Some(DataType::Uint8));
        assert_eq!(cast.data().as_slice().unwrap(), &[3.0, 255.0]);
    }
}
