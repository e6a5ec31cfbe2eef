use serde::Deserialize;

use std::{fs, path::Path};

use crate::{
    error::{Error, Result},
    schema::Dataset,
    sheets::Summary,
};

/// Settings compiled into the binary, used when no settings file is given.
const EMBEDDED: &str = include_str!("../settings.json");

/// The spreadsheet API refuses imports larger than this many cells.
pub const DEFAULT_CELL_LIMIT: usize = 5_000_000;

fn default_cell_limit() -> usize {
    DEFAULT_CELL_LIMIT
}

/// Static configuration for a run: dataset schemas, header aliases and
/// summary layouts.
///
/// Loaded once at startup and passed by reference to whatever needs it.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_cell_limit")]
    pub cell_limit: usize,
    pub datasets: Vec<Dataset>,
    #[serde(default)]
    pub summaries: Vec<Summary>,
}

impl Settings {
    /// Reads settings from the JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns errors if the file cannot be read or is not valid settings
    /// JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&text)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))
    }

    /// Returns the settings embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns an error only if the embedded settings are malformed.
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED)
    }

    /// Parses settings from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `text` is not valid settings JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
