//! Preparing normalized tables for a warehouse bulk load.
//!
//! [`Export`] writes, for every table it is handed, a CSV file with the
//! canonical header and a JSON schema file, and records a load job for each.
//! [`Export::finish`] writes the jobs to `load_jobs.json`, ready for the
//! warehouse's own loader.

use serde::Serialize;
use tracing::info;

use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    error::{Error, Result},
    schema::{Column, Source},
    table::{Sink, Table},
};

/// Where loaded tables live: `project.dataset.prefix`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Connection {
    pub project: String,
    pub dataset: String,
    pub prefix: String,
}

impl Connection {
    /// Returns the fully qualified id of the table for `table`.
    #[must_use]
    pub fn table_id(&self, table: &Table) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table_name(table))
    }

    /// Returns the unqualified table name for `table`.
    ///
    /// Usage records all go to one table named by the prefix; every pricing
    /// report dataset gets its own table, `<prefix><dataset>`.
    #[must_use]
    pub fn table_name(&self, table: &Table) -> String {
        match table.source {
            Source::Cur => self.prefix.clone(),
            Source::Mc => format!("{}{}", self.prefix, table.dataset),
        }
    }
}

impl FromStr for Connection {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<_> = s.split('.').collect();
        let [project, dataset, prefix] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "bad connection {s:?} (want PROJECT.DATASET.TABLE_PREFIX)"
            )));
        };
        if project.is_empty() || dataset.is_empty() {
            return Err(Error::Config(format!(
                "bad connection {s:?}: empty project or dataset"
            )));
        }
        // The prefix is the whole table name for usage records, and a file
        // name in the output directory.
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Config(format!(
                "bad connection {s:?}: table prefix must be non-empty letters, digits, '_' or '-'"
            )));
        }
        Ok(Self {
            project: (*project).to_string(),
            dataset: (*dataset).to_string(),
            prefix: (*prefix).to_string(),
        })
    }
}

/// A column in a warehouse table schema.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub mode: &'static str,
}

impl From<&Column> for SchemaField {
    fn from(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            field_type: column.declared_type.warehouse_type(),
            mode: "NULLABLE",
        }
    }
}

/// Returns the warehouse schema for `columns`.
#[must_use]
pub fn schema(columns: &[Column]) -> Vec<SchemaField> {
    columns.iter().map(SchemaField::from).collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    WriteTruncate,
    WriteAppend,
}

/// A single file load into a warehouse table.
#[derive(Clone, Debug, Serialize)]
pub struct LoadJob {
    pub table_id: String,
    pub dataset: String,
    /// The report file the rows were read from.
    pub source_file: PathBuf,
    /// The normalized CSV to load.
    pub data_file: PathBuf,
    pub schema_file: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub write_disposition: WriteDisposition,
    pub skip_leading_rows: usize,
    pub source_format: &'static str,
}

/// A [`Sink`] that writes warehouse load files into a directory.
///
/// The first table for a given warehouse table truncates it; later ones, such
/// as further usage-record files, are appended.
#[derive(Debug)]
pub struct Export {
    out_dir: PathBuf,
    connection: Option<Connection>,
    written: HashSet<String>,
    jobs: Vec<LoadJob>,
}

impl Export {
    /// Creates an export into `out_dir`, creating it if necessary.
    ///
    /// Without a `connection`, tables are named after their dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if `out_dir` cannot be created.
    pub fn new(out_dir: impl Into<PathBuf>, connection: Option<Connection>) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir).map_err(|e| Error::io(&out_dir, e))?;
        Ok(Self {
            out_dir,
            connection,
            written: HashSet::new(),
            jobs: Vec::new(),
        })
    }

    #[must_use]
    pub fn jobs(&self) -> &[LoadJob] {
        &self.jobs
    }

    /// Writes the load job manifest and returns the jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be written.
    pub fn finish(self) -> Result<Vec<LoadJob>> {
        let path = self.out_dir.join("load_jobs.json");
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        serde_json::to_writer_pretty(file, &self.jobs)?;
        Ok(self.jobs)
    }

    fn names(&self, table: &Table) -> (String, String) {
        match &self.connection {
            Some(conn) => (conn.table_name(table), conn.table_id(table)),
            None => (table.dataset.clone(), table.dataset.clone()),
        }
    }
}

fn write_rows(path: &Path, table: &Table, disposition: WriteDisposition) -> Result<()> {
    let file = match disposition {
        WriteDisposition::WriteTruncate => File::create(path),
        WriteDisposition::WriteAppend => OpenOptions::new().append(true).open(path),
    }
    .map_err(|e| Error::io(path, e))?;
    let mut wtr = csv::Writer::from_writer(file);
    if disposition == WriteDisposition::WriteTruncate {
        wtr.write_record(table.columns.iter().map(|c| c.name.as_str()))
            .map_err(|e| Error::csv(path, e))?;
    }
    for row in table.rows() {
        wtr.write_record(row.values().iter().map(|v| v.as_deref().unwrap_or("")))
            .map_err(|e| Error::csv(path, e))?;
    }
    wtr.flush().map_err(|e| Error::io(path, e))
}

impl Sink for Export {
    fn accept(&mut self, table: &Table, origin: &Path) -> Result<()> {
        let (name, table_id) = self.names(table);
        let disposition = if self.written.insert(name.clone()) {
            WriteDisposition::WriteTruncate
        } else {
            WriteDisposition::WriteAppend
        };
        let data_file = self.out_dir.join(format!("{name}.csv"));
        let schema_file = self.out_dir.join(format!("{name}.schema.json"));
        write_rows(&data_file, table, disposition)?;
        if disposition == WriteDisposition::WriteTruncate {
            let file = File::create(&schema_file).map_err(|e| Error::io(&schema_file, e))?;
            serde_json::to_writer_pretty(file, &schema(&table.columns))?;
        }
        info!(
            table = %table_id,
            rows = table.len(),
            columns = table.columns.len(),
            ?disposition,
            "prepared warehouse load"
        );
        self.jobs.push(LoadJob {
            table_id,
            dataset: table.dataset.clone(),
            source_file: origin.to_path_buf(),
            data_file,
            schema_file,
            rows: table.len(),
            columns: table.columns.len(),
            write_disposition: disposition,
            skip_leading_rows: 1,
            source_format: "CSV",
        });
        Ok(())
    }
}
