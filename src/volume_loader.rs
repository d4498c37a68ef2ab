use crate::affine::Affine;
use crate::{enums::SortBy, nifti_io, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::PixelDecoder,
};
use dicom_dictionary_std::tags;
use log::debug;
use ndarray::{Array2, Array3, s};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Unsupported volume format: '{0}'")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti_io::NiftiError),
}

/// Geometry of a single decoded slice.
struct SliceGeometry {
    position: Option<[f64; 3]>,
    orientation: Option<[f64; 6]>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from a NIfTI file or a directory of DICOM files.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        Self::load_from_path_sorted(path, SortBy::default())
    }

    /// Like [`VolumeLoader::load_from_path`], ordering DICOM slices by `sort_by`.
    pub fn load_from_path_sorted(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let path = path.as_ref();
        if path.is_dir() {
            debug!("Loading DICOM series '{}' ordered by {sort_by}", path.display());
            return Self::load_from_directory(path, sort_by);
        }

        let name = path.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            let volume = nifti_io::read_nifti_file(path)?;
            debug!(
                "Loaded NIfTI '{}' ({}, {})",
                path.display(),
                volume.dimensions_label(),
                volume.voxel_size_label()
            );
            return Ok(volume);
        }

        Err(VolumeLoaderError::UnsupportedFormat(path.display().to_string()))
    }

    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut images_with_order: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_image_with_order(dicom_object, &sort_by))
            .collect();

        if images_with_order.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_images(&mut images_with_order, sort_by);

        let (geometry, images): (Vec<_>, Vec<_>) = images_with_order
            .into_iter()
            .map(|(_, geometry, image)| (geometry, image))
            .unzip();

        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let (row_spacing, column_spacing, thickness) =
            Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;
        let slice_step = Self::slice_step(&geometry).unwrap_or(thickness);
        let spacing = (slice_step.abs(), row_spacing, column_spacing);
        let affine = Self::build_affine(&geometry, spacing);

        Ok(Volume::new(volume_array, affine, spacing))
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_image_with_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<(Option<f32>, SliceGeometry, Array2<f64>)> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image_2d = Self::decode_image(dicom_object)?;
        Some((order, Self::slice_geometry(dicom_object), image_2d))
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn slice_geometry(dicom_object: &FileDicomObject<InMemDicomObject>) -> SliceGeometry {
        let multi = |tag| {
            dicom_object
                .element(tag)
                .ok()
                .and_then(|element| element.to_multi_float64().ok())
        };

        SliceGeometry {
            position: multi(tags::IMAGE_POSITION_PATIENT)
                .filter(|values| values.len() >= 3)
                .map(|values| [values[0], values[1], values[2]]),
            orientation: multi(tags::IMAGE_ORIENTATION_PATIENT)
                .filter(|values| values.len() >= 6)
                .map(|v| [v[0], v[1], v[2], v[3], v[4], v[5]]),
        }
    }

    /// Decode the first frame with the modality LUT applied.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f64>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        pixel_data
            .to_ndarray::<f32>()
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]).mapv(f64::from))
    }

    fn sort_images(
        images_with_order: &mut [(Option<f32>, SliceGeometry, Array2<f64>)],
        sort_by: SortBy,
    ) {
        if !matches!(sort_by, SortBy::None) {
            images_with_order
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }
    }

    fn validate_dimensions(images: &[Array2<f64>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<f64>]) -> Array3<f64> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f64>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    /// (row spacing, column spacing, slice thickness) in millimetres.
    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<(f64, f64, f64)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float64()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|element| element.to_float64().ok())
                .unwrap_or(1.0);

            Some((*pixel_spacing.first()?, *pixel_spacing.get(1)?, slice_thickness))
        })
    }

    /// Mean distance between consecutive slice positions.
    fn slice_step(geometry: &[SliceGeometry]) -> Option<f64> {
        let first = geometry.first()?.position?;
        let last = geometry.last()?.position?;
        if geometry.len() < 2 {
            return None;
        }
        let distance = (0..3).map(|a| (last[a] - first[a]).powi(2)).sum::<f64>().sqrt();
        (distance > 0.0).then(|| distance / (geometry.len() - 1) as f64)
    }

    /// Index `(slice, row, column)` to RAS world coordinates.
    ///
    /// DICOM patient space is LPS, so the x and y rows are negated.
    fn build_affine(geometry: &[SliceGeometry], spacing: (f64, f64, f64)) -> Affine {
        let Some(origin) = geometry.first().and_then(|g| g.position) else {
            return Affine::from_spacing(spacing, (0.0, 0.0, 0.0));
        };
        let orientation = geometry
            .first()
            .and_then(|g| g.orientation)
            .unwrap_or([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);

        let row_dir = [orientation[0], orientation[1], orientation[2]];
        let col_dir = [orientation[3], orientation[4], orientation[5]];
        let slice_dir = match geometry.last().and_then(|g| g.position) {
            Some(last) if geometry.len() > 1 && last != origin => {
                let delta = [last[0] - origin[0], last[1] - origin[1], last[2] - origin[2]];
                let norm = (delta[0].powi(2) + delta[1].powi(2) + delta[2].powi(2)).sqrt();
                [delta[0] / norm, delta[1] / norm, delta[2] / norm]
            }
            _ => [
                row_dir[1] * col_dir[2] - row_dir[2] * col_dir[1],
                row_dir[2] * col_dir[0] - row_dir[0] * col_dir[2],
                row_dir[0] * col_dir[1] - row_dir[1] * col_dir[0],
            ],
        };

        let (slice_spacing, row_spacing, column_spacing) = spacing;
        let mut values = [0.0; 16];
        for axis in 0..3 {
            let sign = if axis < 2 { -1.0 } else { 1.0 };
            values[axis * 4] = sign * slice_dir[axis] * slice_spacing;
            values[axis * 4 + 1] = sign * col_dir[axis] * row_spacing;
            values[axis * 4 + 2] = sign * row_dir[axis] * column_spacing;
            values[axis * 4 + 3] = sign * origin[axis];
        }
        values[15] = 1.0;
        Affine::from_row_slice(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axial(z: f64) -> SliceGeometry {
        SliceGeometry {
            position: Some([-100.0, -120.0, z]),
            orientation: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        }
    }

    #[test]
    fn slice_step_averages_positions() {
        let geometry = vec![axial(10.0), axial(12.5), axial(15.0)];
        assert_eq!(VolumeLoader::slice_step(&geometry), Some(2.5));
        assert_eq!(VolumeLoader::slice_step(&geometry[..1]), None);
    }

    #[test]
    fn axial_affine_maps_to_ras() {
        let geometry = vec![axial(10.0), axial(12.0)];
        let affine = VolumeLoader::build_affine(&geometry, (2.0, 0.5, 0.5));

        assert_eq!(affine.apply([0.0, 0.0, 0.0]), [100.0, 120.0, 10.0]);
        // Next slice moves along +z, next column along -x (L -> R flip).
        assert_eq!(affine.apply([1.0, 0.0, 0.0]), [100.0, 120.0, 12.0]);
        assert_eq!(affine.apply([0.0, 0.0, 2.0]), [99.0, 120.0, 10.0]);
        assert_eq!(affine.apply([0.0, 2.0, 0.0]), [100.0, 119.0, 10.0]);
    }

    #[test]
    fn missing_geometry_falls_back_to_spacing() {
        let geometry = vec![SliceGeometry {
            position: None,
            orientation: None,
        }];
        let affine = VolumeLoader::build_affine(&geometry, (3.0, 1.0, 1.0));
        assert_eq!(affine.apply([1.0, 1.0, 1.0]), [3.0, 1.0, 1.0]);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.mgz");
        std::fs::write(&path, b"not a volume").unwrap();
        assert!(matches!(
            VolumeLoader::load_from_path(&path),
            Err(VolumeLoaderError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn empty_directory_has_no_images() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            VolumeLoader::load_from_path(dir.path()),
            Err(VolumeLoaderError::NoValidImages)
        ));
    }

    #[test]
    fn slices_sort_unless_order_is_none() {
        let slices = || {
            vec![
                (Some(3.0), axial(3.0), Array2::from_elem((1, 1), 3.0)),
                (Some(1.0), axial(1.0), Array2::from_elem((1, 1), 1.0)),
                (None, axial(0.0), Array2::from_elem((1, 1), 0.0)),
            ]
        };
        let firsts = |images: &[(Option<f32>, SliceGeometry, Array2<f64>)]| {
            images.iter().map(|(_, _, image)| image[[0, 0]]).collect::<Vec<_>>()
        };

        let mut images = slices();
        VolumeLoader::sort_images(&mut images, SortBy::InstanceNumber);
        assert_eq!(firsts(&images), vec![0.0, 1.0, 3.0]);

        let mut images = slices();
        VolumeLoader::sort_images(&mut images, SortBy::None);
        assert_eq!(firsts(&images), vec![3.0, 1.0, 0.0]);
    }

    #[test]
    fn stacked_slices_keep_order() {
        let images = vec![Array2::from_elem((2, 3), 1.0), Array2::from_elem((2, 3), 2.0)];
        let volume = VolumeLoader::build_volume_array(&images);
        assert_eq!(volume.dim(), (2, 2, 3));
        assert_eq!(volume[[1, 1, 2]], 2.0);
        assert!(VolumeLoader::validate_dimensions(&images).is_ok());
    }
}
