//! Extractor configuration.
//!
//! Values are layered in three tiers:
//! 1. TOML file (`BRAIN_REGION_CONFIG` or an explicit path), all keys optional
//! 2. Environment variables
//! 3. CLI flags, applied by the binary before [`ExtractorConfig::validate`]

use crate::alignment::{DEFAULT_ATOL, DEFAULT_RTOL, Tolerance};
use crate::atlas::{AtlasColumns, DEFAULT_NAME_COLUMN, DEFAULT_VALUE_COLUMN};
use crate::vectorizer::{DEFAULT_DECIMATE_FACTOR, DEFAULT_FACE_THRESHOLD, SurfaceOptions};

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_PATH_VAR: &str = "BRAIN_REGION_CONFIG";
pub const THREADS_VAR: &str = "BRAIN_REGION_THREADS";
pub const SRID_VAR: &str = "BRAIN_REGION_SRID";

/// WGS 84, the reference system of the persisted geography columns.
pub const DEFAULT_SRID: i32 = 4326;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value '{value}' for {key}")]
    InvalidOverride { key: String, value: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub atlas: AtlasConfig,
    pub alignment: AlignmentConfig,
    pub surface: SurfaceConfig,
    pub persistence: PersistenceConfig,
    /// Upper bound on worker threads for the region loop; rayon's default when unset.
    pub threads: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub name_column: String,
    pub value_column: String,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            name_column: DEFAULT_NAME_COLUMN.to_string(),
            value_column: DEFAULT_VALUE_COLUMN.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub enabled: bool,
    pub simplify: bool,
    pub decimate_factor: f64,
    pub face_threshold: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            simplify: false,
            decimate_factor: DEFAULT_DECIMATE_FACTOR,
            face_threshold: DEFAULT_FACE_THRESHOLD,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub srid: i32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { srid: DEFAULT_SRID }
    }
}

impl ExtractorConfig {
    /// Load the config from `path`, or from `BRAIN_REGION_CONFIG`, or use
    /// defaults when neither is given; then apply environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_PATH_VAR).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `BRAIN_REGION_THREADS` and `BRAIN_REGION_SRID` as looked up by `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        let invalid = |key: &str, value: &str| ConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
        };

        if let Some(value) = lookup(THREADS_VAR) {
            let threads = value
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(THREADS_VAR, &value))?;
            self.threads = Some(threads);
        }
        if let Some(value) = lookup(SRID_VAR) {
            self.persistence.srid = value
                .trim()
                .parse::<i32>()
                .map_err(|_| invalid(SRID_VAR, &value))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let fail = |message: String| Err(ConfigError::Validation(message));

        if self.atlas.name_column.trim().is_empty() || self.atlas.value_column.trim().is_empty() {
            return fail("atlas column names must not be empty".to_string());
        }
        let factor = self.surface.decimate_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return fail(format!("surface.decimate_factor must be in (0, 1], got {factor}"));
        }
        for (name, value) in [("rtol", self.alignment.rtol), ("atol", self.alignment.atol)] {
            if !(value >= 0.0 && value.is_finite()) {
                return fail(format!("alignment.{name} must be a non-negative number, got {value}"));
            }
        }
        if self.threads == Some(0) {
            return fail("threads must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn atlas_columns(&self) -> AtlasColumns {
        AtlasColumns {
            name: self.atlas.name_column.clone(),
            value: self.atlas.value_column.clone(),
        }
    }

    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            rtol: self.alignment.rtol,
            atol: self.alignment.atol,
        }
    }

    pub fn surface_options(&self) -> SurfaceOptions {
        SurfaceOptions {
            simplify: self.surface.simplify,
            decimate_factor: self.surface.decimate_factor,
            face_threshold: self.surface.face_threshold,
        }
    }
}
