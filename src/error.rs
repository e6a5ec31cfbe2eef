//! Error types for loading, normalizing and exporting cost reports.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the library.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested dataset is not in the registry.
    #[error("unknown dataset '{0}'")]
    UnknownDataset(String),

    /// A required canonical column is absent after normalization.
    #[error("dataset '{dataset}': required column '{column}' not found")]
    MissingColumn { dataset: String, column: String },

    /// Two raw headers normalize to the same canonical name.
    #[error("dataset '{dataset}': headers '{first}' and '{second}' both map to '{target}'")]
    AmbiguousColumnMapping {
        dataset: String,
        first: String,
        second: String,
        target: String,
    },

    /// The settings file is inconsistent.
    #[error("invalid settings: {0}")]
    Config(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file is too large to be imported through the spreadsheet API.
    #[error("{path} has {cells} cells, over the limit of {limit}")]
    CellLimitExceeded {
        path: PathBuf,
        cells: usize,
        limit: usize,
    },

    /// No file in the report directory matches a dataset that needs one.
    #[error("no source file for dataset '{dataset}' in {dir}")]
    MissingSourceFile { dataset: String, dir: PathBuf },

    #[error("no CSV files found in {0}")]
    NoCsvFiles(PathBuf),

    #[error("invalid cell reference '{0}'")]
    InvalidCellRef(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, Error>;
