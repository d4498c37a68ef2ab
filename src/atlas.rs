//! Atlas dictionary: the CSV mapping human-readable region names to labels.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_NAME_COLUMN: &str = "Label Name";
pub const DEFAULT_VALUE_COLUMN: &str = "RH Label";

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("Could not open atlas dictionary '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed atlas dictionary: {0}")]
    Csv(#[from] csv::Error),

    #[error("Atlas dictionary has no '{0}' column")]
    MissingColumn(String),

    #[error("Row {row}: label '{value}' of region '{name}' is not an integer")]
    InvalidLabel {
        row: usize,
        name: String,
        value: String,
    },

    #[error("Row {0} is shorter than the header")]
    ShortRow(usize),
}

/// A named region and the integer label it carries in the atlas volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AtlasRegion {
    pub name: String,
    pub value: i64,
}

#[derive(Clone, Debug)]
pub struct Atlas {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub regions: Vec<AtlasRegion>,
}

/// Which CSV columns hold the region name and label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtlasColumns {
    pub name: String,
    pub value: String,
}

impl Default for AtlasColumns {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME_COLUMN.to_string(),
            value: DEFAULT_VALUE_COLUMN.to_string(),
        }
    }
}

impl Atlas {
    pub fn load(path: &Path, columns: &AtlasColumns) -> Result<Self, AtlasError> {
        let file = File::open(path).map_err(|source| AtlasError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file, columns)
    }

    /// Rows keep file order; duplicate names are kept as separate regions.
    pub fn from_reader(reader: impl Read, columns: &AtlasColumns) -> Result<Self, AtlasError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv.headers()?.iter().map(str::to_string).collect();
        let column = |wanted: &str| {
            headers
                .iter()
                .position(|header| header == wanted)
                .ok_or_else(|| AtlasError::MissingColumn(wanted.to_string()))
        };
        let name_index = column(&columns.name)?;
        let value_index = column(&columns.value)?;

        let mut rows = Vec::new();
        let mut regions = Vec::new();
        for (row_number, record) in csv.records().enumerate() {
            let record = record?;
            let row: Vec<String> = record.iter().map(str::to_string).collect();
            if row.iter().all(String::is_empty) {
                continue;
            }

            let name = row.get(name_index).ok_or(AtlasError::ShortRow(row_number + 1))?;
            let value = row.get(value_index).ok_or(AtlasError::ShortRow(row_number + 1))?;
            let label = value.parse::<i64>().map_err(|_| AtlasError::InvalidLabel {
                row: row_number + 1,
                name: name.clone(),
                value: value.clone(),
            })?;

            regions.push(AtlasRegion {
                name: name.clone(),
                value: label,
            });
            rows.push(row);
        }

        Ok(Self {
            headers,
            rows,
            regions,
        })
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
