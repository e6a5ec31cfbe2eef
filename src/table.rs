use csv::StringRecord;
use tracing::{debug, info};

use std::{fs::File, io::Read, path::Path};

use crate::{
    error::{Error, Result},
    normalize::{HeaderMap, Normalizer},
    schema::{Column, Source},
};

/// One data row, with values in the dataset's canonical column order.
///
/// Columns the source file doesn't have are `None`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NormalizedRow(Vec<Option<String>>);

impl NormalizedRow {
    /// Projects `record` onto the canonical columns described by `map`.
    #[must_use]
    pub fn project(map: &HeaderMap, record: &StringRecord, width: usize) -> Self {
        Self(
            (0..width)
                .map(|i| {
                    map.source_index(i)
                        .and_then(|s| record.get(s))
                        .map(str::to_string)
                })
                .collect(),
        )
    }

    /// Returns the value of the `index`th canonical column.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(Option::as_deref)
    }

    #[must_use]
    pub fn values(&self) -> &[Option<String>] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<Option<S>> for NormalizedRow {
    fn from_iter<I: IntoIterator<Item = Option<S>>>(iter: I) -> Self {
        Self(iter.into_iter().map(|v| v.map(Into::into)).collect())
    }
}

/// The normalized contents of one source file.
#[derive(Clone, Debug)]
pub struct Table {
    pub dataset: String,
    pub source: Source,
    /// The dataset's canonical columns, in order.
    pub columns: Vec<Column>,
    rows: Vec<NormalizedRow>,
}

impl Table {
    /// Reads the CSV file at `path` as data for `dataset`.
    ///
    /// The first row must be the header.
    ///
    /// # Errors
    ///
    /// Returns any errors from opening or parsing the file, or from
    /// normalizing its header (see [`Normalizer::resolve`]).
    pub fn from_path(normalizer: &Normalizer, dataset: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let table = Self::read(normalizer, dataset, file, path)?;
        info!(
            dataset,
            path = %path.display(),
            rows = table.len(),
            "read source file"
        );
        Ok(table)
    }

    /// Reads CSV data for `dataset` from `input`; `origin` names the input
    /// in error messages.
    ///
    /// # Errors
    ///
    /// As for [`Table::from_path`].
    pub fn read<R: Read>(
        normalizer: &Normalizer,
        dataset: &str,
        input: R,
        origin: impl AsRef<Path>,
    ) -> Result<Self> {
        let origin = origin.as_ref();
        let mut rdr = csv::Reader::from_reader(input);
        let headers = rdr.headers().map_err(|e| Error::csv(origin, e))?.clone();
        let raw: Vec<&str> = headers.iter().collect();
        let map = normalizer.resolve(dataset, &raw)?;
        let schema = normalizer.registry().get(dataset)?;
        for extra in map.extra() {
            debug!(dataset, column = extra, "dropping column outside schema");
        }
        let width = schema.columns.len();
        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| Error::csv(origin, e))?;
            rows.push(NormalizedRow::project(&map, &record, width));
        }
        Ok(Self {
            dataset: schema.name.clone(),
            source: schema.source,
            columns: schema.columns.clone(),
            rows,
        })
    }

    #[must_use]
    pub fn rows(&self) -> &[NormalizedRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns the value of column `name` in row `row`.
    #[must_use]
    pub fn value(&self, row: usize, name: &str) -> Option<&str> {
        let index = self.column_index(name)?;
        self.rows.get(row)?.get(index)
    }
}

/// Something that normalized tables are handed to.
pub trait Sink {
    /// Accepts the table read from the source file `origin`.
    ///
    /// # Errors
    ///
    /// Returns any error the sink hits while storing the table.
    fn accept(&mut self, table: &Table, origin: &Path) -> Result<()>;
}
