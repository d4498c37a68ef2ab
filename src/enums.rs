use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Resampling policy used when one volume is brought onto another's grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Label preserving, used for atlas volumes.
    Nearest,
    /// Trilinear, used for scan intensity volumes.
    #[default]
    Continuous,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpolation::Nearest => f.write_str("nearest"),
            Interpolation::Continuous => f.write_str("continuous"),
        }
    }
}

impl FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Interpolation::Nearest),
            "continuous" => Ok(Interpolation::Continuous),
            other => Err(format!(
                "unknown interpolation '{other}', expected 'nearest' or 'continuous'"
            )),
        }
    }
}

/// NIfTI sample type of a stored image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Uint8,
    Int8,
    Int16,
    Float32,
    Float64,
}

impl DataType {
    /// NIfTI-1 `datatype` header code.
    pub fn nifti_code(self) -> i16 {
        match self {
            DataType::Uint8 => 2,
            DataType::Int16 => 4,
            DataType::Float32 => 16,
            DataType::Float64 => 64,
            DataType::Int8 => 256,
        }
    }

    pub fn from_nifti_code(code: i16) -> Option<Self> {
        match code {
            2 => Some(DataType::Uint8),
            4 => Some(DataType::Int16),
            16 => Some(DataType::Float32),
            64 => Some(DataType::Float64),
            256 => Some(DataType::Int8),
            _ => None,
        }
    }

    pub fn bitpix(self) -> i16 {
        match self {
            DataType::Uint8 | DataType::Int8 => 8,
            DataType::Int16 => 16,
            DataType::Float32 => 32,
            DataType::Float64 => 64,
        }
    }

    /// The value as stored in this type. Integer casts truncate toward zero
    /// and saturate at the type bounds; NaN becomes 0.
    pub fn cast(self, value: f64) -> f64 {
        match self {
            DataType::Uint8 => f64::from(value as u8),
            DataType::Int8 => f64::from(value as i8),
            DataType::Int16 => f64::from(value as i16),
            DataType::Float32 => f64::from(value as f32),
            DataType::Float64 => value,
        }
    }

    /// Little-endian encoding of `value` in this type.
    pub(crate) fn write_le(self, value: f64, buffer: &mut Vec<u8>) {
        match self {
            DataType::Uint8 => buffer.push(value as u8),
            DataType::Int8 => buffer.extend_from_slice(&(value as i8).to_le_bytes()),
            DataType::Int16 => buffer.extend_from_slice(&(value as i16).to_le_bytes()),
            DataType::Float32 => buffer.extend_from_slice(&(value as f32).to_le_bytes()),
            DataType::Float64 => buffer.extend_from_slice(&value.to_le_bytes()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::Uint8 => "uint8",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        })
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uint8" => Ok(DataType::Uint8),
            "int8" => Ok(DataType::Int8),
            "int16" => Ok(DataType::Int16),
            "float32" => Ok(DataType::Float32),
            "float64" => Ok(DataType::Float64),
            other => Err(format!(
                "unknown data type '{other}', expected one of uint8, int8, int16, float32, float64"
            )),
        }
    }
}

/// Slice ordering for DICOM series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    /// Keep directory order.
    None,
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortBy::ImagePositionPatient => "position",
            SortBy::TablePosition => "table",
            SortBy::InstanceNumber => "instance",
            SortBy::None => "none",
        })
    }
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "position" => Ok(SortBy::ImagePositionPatient),
            "table" => Ok(SortBy::TablePosition),
            "instance" => Ok(SortBy::InstanceNumber),
            "none" => Ok(SortBy::None),
            other => Err(format!(
                "unknown slice order '{other}', expected one of position, table, instance, none"
            )),
        }
    }
}
