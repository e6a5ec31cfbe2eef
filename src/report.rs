use std::{collections::BTreeMap, fmt::Display, path::Path};

use crate::{
    error::Result,
    table::{Sink, Table},
};

/// Counts for one dataset in an import.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Totals {
    pub files: usize,
    pub rows: usize,
    pub columns: usize,
}

/// Summarizes what an import run read.
///
/// To create a new, empty `ImportReport`, use [`ImportReport::new`]. It is a
/// [`Sink`], so it can be handed tables alongside the real sinks.
///
/// To get a printable version of the report, use its [`Display`]
/// implementation.
#[derive(Debug, Default)]
pub struct ImportReport {
    datasets: BTreeMap<String, Totals>,
    files: usize,
    rows: usize,
}

impl ImportReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `table` in the report.
    pub fn add(&mut self, table: &Table) {
        let totals = self.datasets.entry(table.dataset.clone()).or_default();
        totals.files += 1;
        totals.rows += table.len();
        totals.columns = table.columns.len();
        self.files += 1;
        self.rows += table.len();
    }

    #[must_use]
    pub fn totals(&self, dataset: &str) -> Option<Totals> {
        self.datasets.get(dataset).copied()
    }

    #[must_use]
    pub fn files(&self) -> usize {
        self.files
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns dataset names sorted by row count, descending.
    ///
    /// Datasets with identical row counts are sorted alphabetically.
    #[must_use]
    pub fn datasets_by_rows(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.datasets.keys().map(String::as_str).collect();
        names.sort_by(|a, b| self.datasets[*b].rows.cmp(&self.datasets[*a].rows));
        names
    }
}

impl Sink for ImportReport {
    fn accept(&mut self, table: &Table, _origin: &Path) -> Result<()> {
        self.add(table);
        Ok(())
    }
}

impl Display for ImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .datasets
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max("Dataset".len());
        writeln!(
            f,
            "{:width$} {:>6} {:>10} {:>8}",
            "Dataset", "Files", "Rows", "Columns"
        )?;
        let length = width + 27;
        writeln!(f, "{:-<length$}", "")?;
        for name in self.datasets_by_rows() {
            let totals = self.datasets[name];
            writeln!(
                f,
                "{name:width$} {:>6} {:>10} {:>8}",
                totals.files, totals.rows, totals.columns
            )?;
        }
        writeln!(f, "{:-<length$}", "")?;
        writeln!(f, "{:width$} {:>6} {:>10}", "Total", self.files, self.rows)?;
        Ok(())
    }
}
