//! NIfTI file I/O
//!
//! Reads `.nii` / `.nii.gz` into a [`Volume`] and writes volumes back as
//! single-file NIfTI-1 images, float32 unless the volume carries a stored
//! [`DataType`].

use crate::affine::Affine;
use crate::enums::DataType;
use crate::volume::{DEFAULT_SPACING, Volume};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::Array3;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use std::io::{Cursor, Write};
use std::path::Path;
use thiserror::Error;

const HEADER_SIZE: usize = 348;
const DATA_OFFSET: usize = 352;

#[derive(Debug, Error)]
pub enum NiftiError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to read NIfTI: {0}")]
    Read(#[from] nifti::NiftiError),

    #[error("Expected at least a 3D volume, got {0}D")]
    NotVolumetric(usize),

    #[error("Dimension {0} does not fit in a NIfTI-1 header")]
    DimensionTooLarge(usize),
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Load a NIfTI image from bytes, slicing anything above 3-D to its first volume.
pub fn load_nifti(bytes: &[u8]) -> Result<Volume, NiftiError> {
    let obj = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))?
    };

    let header = obj.header().clone();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(NiftiError::NotVolumetric(ndim));
    }

    let array = obj.into_volume().into_ndarray::<f64>()?;
    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(NiftiError::NotVolumetric(shape.len()));
    }

    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let data = if shape.len() == 3 {
        Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| array[&[i, j, k][..]])
    } else {
        // Higher dimensions: first index on every trailing axis.
        let mut index = vec![0usize; shape.len()];
        Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
            index[0] = i;
            index[1] = j;
            index[2] = k;
            array[index.as_slice()]
        })
    };

    let volume = Volume::new(data, header_affine(&header), header_spacing(&header));
    Ok(match DataType::from_nifti_code(header.datatype) {
        Some(data_type) => volume.with_data_type(data_type),
        None => volume,
    })
}

/// Read a NIfTI file from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<Volume, NiftiError> {
    let bytes = std::fs::read(path).map_err(|source| NiftiError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_nifti(&bytes)
}

fn header_spacing(header: &NiftiHeader) -> (f64, f64, f64) {
    let zoom = |value: f32, default: f64| {
        let value = f64::from(value).abs();
        if value > 0.0 { value } else { default }
    };
    (
        zoom(header.pixdim[1], DEFAULT_SPACING.0),
        zoom(header.pixdim[2], DEFAULT_SPACING.1),
        zoom(header.pixdim[3], DEFAULT_SPACING.2),
    )
}

/// Voxel-to-world transform: sform if set, then qform, then pixdim scaling.
fn header_affine(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let (s, t, u) = (&header.srow_x, &header.srow_y, &header.srow_z);
        return Affine::from_row_slice(&[
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64, //
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64, //
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64, //
            0.0, 0.0, 0.0, 1.0,
        ]);
    }

    let (vx, vy, vz) = header_spacing(header);
    if header.qform_code > 0 {
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let vz = vz * qfac;

        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
        ];
        return Affine::from_row_slice(&[
            r[0][0] * vx, r[0][1] * vy, r[0][2] * vz, header.quatern_x as f64, //
            r[1][0] * vx, r[1][1] * vy, r[1][2] * vz, header.quatern_y as f64, //
            r[2][0] * vx, r[2][1] * vy, r[2][2] * vz, header.quatern_z as f64, //
            0.0, 0.0, 0.0, 1.0,
        ]);
    }

    Affine::from_spacing((vx, vy, vz), (0.0, 0.0, 0.0))
}

/// Encode a volume as uncompressed NIfTI-1 bytes (sform code 1), in the
/// volume's data type or float32 when it has none.
pub fn save_nifti(volume: &Volume) -> Result<Vec<u8>, NiftiError> {
    let data_type = volume.data_type().unwrap_or(DataType::Float32);
    let (nx, ny, nz) = volume.dim();
    let (vsx, vsy, vsz) = volume.spacing();
    let to_i16 = |d: usize| i16::try_from(d).map_err(|_| NiftiError::DimensionTooLarge(d));

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let dim: [i16; 8] = [3, to_i16(nx)?, to_i16(ny)?, to_i16(nz)?, 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    header[70..72].copy_from_slice(&data_type.nifti_code().to_le_bytes());
    header[72..74].copy_from_slice(&data_type.bitpix().to_le_bytes());

    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(DATA_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());
    // millimetres
    header[123] = 2;
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    let rows = volume.affine().to_row_array();
    for (row, base) in [280usize, 296, 312].into_iter().enumerate() {
        for col in 0..4 {
            let offset = base + col * 4;
            header[offset..offset + 4].copy_from_slice(&(rows[row * 4 + col] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let bytes_per_voxel = data_type.bitpix() as usize / 8;
    let mut buffer = Vec::with_capacity(DATA_OFFSET + nx * ny * nz * bytes_per_voxel);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);

    // NIfTI stores x fastest.
    let data = volume.data();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                data_type.write_le(data[[i, j, k]], &mut buffer);
            }
        }
    }

    Ok(buffer)
}

/// Save a volume to disk, gzip compressed when the name ends in `.nii.gz`.
pub fn save_nifti_to_file(path: &Path, volume: &Volume) -> Result<(), NiftiError> {
    let io_error = |source| NiftiError::Io {
        path: path.display().to_string(),
        source,
    };

    let raw = save_nifti(volume)?;
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).map_err(io_error)?;
        encoder.finish().map_err(io_error)?
    } else {
        raw
    };

    std::fs::write(path, bytes).map_err(io_error)
}
