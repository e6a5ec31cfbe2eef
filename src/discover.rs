//! Locating the source files for each dataset in a report directory.

use tracing::{info, warn};

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    schema::{Registry, Source},
};

/// A CSV file matched to a dataset, with its dimensions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceFile {
    pub dataset: String,
    pub path: PathBuf,
    /// Number of data rows, not counting the header.
    pub rows: usize,
    pub columns: usize,
}

impl SourceFile {
    /// Measures the CSV file at `path`.
    ///
    /// # Errors
    ///
    /// Returns any errors from opening or parsing the file.
    pub fn measure(dataset: &str, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut rdr = csv::Reader::from_path(&path).map_err(|e| Error::csv(&path, e))?;
        let columns = rdr.byte_headers().map_err(|e| Error::csv(&path, e))?.len();
        let mut rows = 0;
        for result in rdr.byte_records() {
            result.map_err(|e| Error::csv(&path, e))?;
            rows += 1;
        }
        Ok(Self {
            dataset: dataset.to_string(),
            path,
            rows,
            columns,
        })
    }

    /// Returns the number of cells in the file, header included.
    #[must_use]
    pub fn cells(&self) -> usize {
        (self.rows + 1) * self.columns
    }

    /// Checks that the file fits in a spreadsheet of at most `limit` cells.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CellLimitExceeded`] if it doesn't.
    pub fn check_cells(&self, limit: usize) -> Result<()> {
        let cells = self.cells();
        if cells > limit {
            return Err(Error::CellLimitExceeded {
                path: self.path.clone(),
                cells,
                limit,
            });
        }
        Ok(())
    }
}

fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Finds the files in `dir` belonging to the datasets of `source`.
///
/// Each file goes to the first dataset, in registry order, whose
/// `source_file_pattern` matches its name. Files with a header but no data
/// are skipped. Results are in dataset order, then file name order.
///
/// # Errors
///
/// Returns errors if:
/// * The directory cannot be read
/// * It contains no CSV files ([`Error::NoCsvFiles`])
/// * A dataset marked `required_file` has no matching file
///   ([`Error::MissingSourceFile`])
/// * A matching file cannot be parsed
pub fn scan(dir: impl AsRef<Path>, registry: &Registry, source: Source) -> Result<Vec<SourceFile>> {
    let dir = dir.as_ref();
    let files = csv_files(dir)?;
    if files.is_empty() {
        return Err(Error::NoCsvFiles(dir.to_path_buf()));
    }
    let mut claimed = HashSet::new();
    let mut found = Vec::new();
    for dataset in registry.by_source(source) {
        let mut matched = false;
        for path in &files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if claimed.contains(path) || !dataset.source_file_pattern.is_match(name) {
                continue;
            }
            claimed.insert(path.clone());
            matched = true;
            let file = SourceFile::measure(&dataset.name, path)?;
            if file.rows == 0 {
                warn!(dataset = %dataset.name, path = %path.display(), "skipping file with no data");
                continue;
            }
            info!(
                dataset = %dataset.name,
                path = %path.display(),
                rows = file.rows,
                columns = file.columns,
                "found source file"
            );
            found.push(file);
        }
        if !matched && dataset.required_file {
            return Err(Error::MissingSourceFile {
                dataset: dataset.name.clone(),
                dir: dir.to_path_buf(),
            });
        }
    }
    Ok(found)
}
