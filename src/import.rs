//! Running a whole import: discovery, size checks, normalization, and
//! handing every table to the sinks.

use tracing::info;

use std::{fs::File, path::PathBuf};

use crate::{
    discover::scan,
    error::{Error, Result},
    normalize::Normalizer,
    report::ImportReport,
    schema::{Registry, Source},
    settings::Settings,
    sheets::{Layout, SheetsPlan},
    table::{Sink, Table},
    warehouse::{Connection, Export, LoadJob},
};

/// Where spreadsheet summaries read their rows from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SheetsSource {
    /// Rows are uploaded into the spreadsheet, subject to the cell limit.
    Worksheet,
    /// Rows stay in the warehouse tables named by the connection.
    Warehouse,
}

#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Directory containing the report CSV files.
    pub dir: PathBuf,
    /// Directory the load files and requests are written to.
    pub out: PathBuf,
    pub source: Source,
    pub warehouse: Option<Connection>,
    /// Build spreadsheet summary requests too.
    pub sheets: Option<SheetsSource>,
}

impl ImportOptions {
    /// Options for a plain warehouse export of `dir` into `out`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, out: impl Into<PathBuf>, source: Source) -> Self {
        Self {
            dir: dir.into(),
            out: out.into(),
            source,
            warehouse: None,
            sheets: None,
        }
    }

    fn layout(&self) -> Result<Option<Layout>> {
        match (self.sheets, &self.warehouse) {
            (None, _) => Ok(None),
            (Some(SheetsSource::Worksheet), _) => Ok(Some(Layout::Worksheet)),
            (Some(SheetsSource::Warehouse), Some(conn)) => Ok(Some(Layout::Warehouse(conn.clone()))),
            (Some(SheetsSource::Warehouse), None) => Err(Error::Config(
                "summaries over warehouse tables need a warehouse connection \
                 (PROJECT.DATASET.TABLE_PREFIX)"
                    .to_string(),
            )),
        }
    }
}

/// What an import produced.
#[derive(Debug)]
pub struct Imported {
    pub report: ImportReport,
    pub jobs: Vec<LoadJob>,
    /// The spreadsheet request file, if summaries were asked for.
    pub requests: Option<PathBuf>,
}

/// Imports the reports in `options.dir`.
///
/// # Errors
///
/// Returns errors if:
/// * Warehouse summaries are asked for without a warehouse connection
/// * Discovery fails (see [`scan`])
/// * A file is over `settings.cell_limit` and its rows would be uploaded
///   into the spreadsheet
/// * A file cannot be read or normalized
/// * An output file cannot be written
pub fn import(settings: &Settings, registry: &Registry, options: &ImportOptions) -> Result<Imported> {
    let layout = options.layout()?;
    let files = scan(&options.dir, registry, options.source)?;
    if options.sheets == Some(SheetsSource::Worksheet) {
        for file in &files {
            file.check_cells(settings.cell_limit)?;
        }
    }

    let normalizer = Normalizer::new(registry);
    let mut export = Export::new(&options.out, options.warehouse.clone())?;
    let mut plan = layout.map(|l| SheetsPlan::new(registry, &settings.summaries, options.source, l));
    let mut report = ImportReport::new();
    {
        let mut sinks: Vec<&mut dyn Sink> = Vec::with_capacity(3);
        sinks.push(&mut export);
        sinks.push(&mut report);
        if let Some(plan) = plan.as_mut() {
            sinks.push(plan);
        }
        for file in &files {
            let table = Table::from_path(&normalizer, &file.dataset, &file.path)?;
            for sink in &mut sinks {
                sink.accept(&table, &file.path)?;
            }
        }
    }

    let jobs = export.finish()?;
    let requests = match plan {
        Some(plan) => {
            let body = plan.finish()?;
            let path = options.out.join("sheets_requests.json");
            let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
            serde_json::to_writer_pretty(file, &body)?;
            info!(path = %path.display(), "wrote spreadsheet requests");
            Some(path)
        }
        None => None,
    };
    Ok(Imported {
        report,
        jobs,
        requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Settings, Registry) {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        (settings, registry)
    }

    #[test]
    fn import_fn_writes_load_jobs_and_requests() {
        let (settings, registry) = setup();
        let out = tempfile::tempdir().unwrap();
        let mut options = ImportOptions::new("testdata/reports", out.path(), Source::Mc);
        options.warehouse = Some("proj.pricing.calcctl_".parse().unwrap());
        options.sheets = Some(SheetsSource::Warehouse);
        let imported = import(&settings, &registry, &options).unwrap();

        let tables: Vec<_> = imported.jobs.iter().map(|j| j.table_id.as_str()).collect();
        assert_eq!(tables, vec!["proj.pricing.calcctl_mapped", "proj.pricing.calcctl_unmapped"]);
        assert_eq!(imported.report.rows(), 5);
        assert!(out.path().join("load_jobs.json").exists());
        let requests = imported.requests.unwrap();
        assert_eq!(requests, out.path().join("sheets_requests.json"));
        let body: serde_json::Value =
            serde_json::from_reader(File::open(requests).unwrap()).unwrap();
        assert!(!body["requests"].as_array().unwrap().is_empty());
    }

    #[test]
    fn import_fn_without_sheets_writes_no_requests() {
        let (settings, registry) = setup();
        let out = tempfile::tempdir().unwrap();
        let options = ImportOptions::new("testdata/cur", out.path(), Source::Cur);
        let imported = import(&settings, &registry, &options).unwrap();
        assert_eq!(imported.jobs.len(), 2);
        assert!(imported.requests.is_none());
        assert!(!out.path().join("sheets_requests.json").exists());
    }

    #[test]
    fn import_fn_checks_cell_limit_only_for_worksheet_summaries() {
        let (mut settings, registry) = setup();
        settings.cell_limit = 10;
        let out = tempfile::tempdir().unwrap();
        let mut options = ImportOptions::new("testdata/cur", out.path(), Source::Cur);

        options.sheets = Some(SheetsSource::Worksheet);
        assert!(matches!(
            import(&settings, &registry, &options),
            Err(Error::CellLimitExceeded { limit: 10, .. })
        ));

        options.sheets = None;
        assert!(import(&settings, &registry, &options).is_ok());

        options.warehouse = Some("proj.billing.aws_cur".parse().unwrap());
        options.sheets = Some(SheetsSource::Warehouse);
        assert!(import(&settings, &registry, &options).is_ok());
    }

    #[test]
    fn import_fn_rejects_warehouse_summaries_without_connection() {
        let (settings, registry) = setup();
        let out = tempfile::tempdir().unwrap();
        let mut options = ImportOptions::new("testdata/reports", out.path(), Source::Mc);
        options.sheets = Some(SheetsSource::Warehouse);
        assert!(matches!(
            import(&settings, &registry, &options),
            Err(Error::Config(_))
        ));
        assert!(!out.path().join("load_jobs.json").exists());
    }
}
