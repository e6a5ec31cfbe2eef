use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use std::{
    io::{self, IsTerminal},
    path::{Path, PathBuf},
};

use costsheet::{
    import,
    logging::{init_logging, LogConfig, LogFormat},
    warehouse::Connection,
    Error, ImportOptions, Normalizer, Registry, Settings, SheetsSource, Source,
};

/// Normalizes cost-report CSV files for warehouse and spreadsheet reporting.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Settings file to use instead of the built-in settings
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = LogFormatArg::Pretty, global = true)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the registered datasets
    Datasets,
    /// Show how the headers of a CSV file map onto a dataset's columns
    Normalize {
        #[arg(short, long)]
        dataset: String,
        file: PathBuf,
    },
    /// Import a directory of reports
    Import(ImportArgs),
}

#[derive(Debug, clap::Args)]
struct ImportArgs {
    /// Directory containing the report CSV files
    dir: PathBuf,

    /// Directory to write load files and requests to
    #[arg(short, long)]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = SourceArg::Mc)]
    source: SourceArg,

    /// Warehouse tables, as PROJECT.DATASET.TABLE_PREFIX
    #[arg(long)]
    warehouse: Option<Connection>,

    /// Also build spreadsheet summary requests, reading from uploaded
    /// worksheets or from the warehouse tables
    #[arg(long, value_enum)]
    sheets: Option<SheetsArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    /// Migration pricing reports
    Mc,
    /// Usage and cost records
    Cur,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SheetsArg {
    Worksheet,
    Warehouse,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Mc => Source::Mc,
            SourceArg::Cur => Source::Cur,
        }
    }
}

impl From<SheetsArg> for SheetsSource {
    fn from(arg: SheetsArg) -> Self {
        match arg {
            SheetsArg::Worksheet => SheetsSource::Worksheet,
            SheetsArg::Warehouse => SheetsSource::Warehouse,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    init_logging(
        &LogConfig::from_verbosity(cli.verbose)
            .with_format(format)
            .with_ansi(io::stderr().is_terminal()),
    );

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::embedded()?,
    };
    let registry = Registry::from_settings(&settings)?;
    match cli.command {
        Command::Datasets => list_datasets(&registry),
        Command::Normalize { dataset, file } => normalize(&registry, &dataset, &file),
        Command::Import(args) => run_import(&settings, &registry, &args),
    }
}

fn list_datasets(registry: &Registry) -> Result<()> {
    let width = registry
        .datasets()
        .iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0)
        .max("Dataset".len());
    println!("{:width$} {:6} {:>7}  Files", "Dataset", "Source", "Columns");
    for dataset in registry.datasets() {
        let source = match dataset.source {
            Source::Mc => "mc",
            Source::Cur => "cur",
        };
        println!(
            "{:width$} {source:6} {:>7}  {}",
            dataset.name,
            dataset.columns.len(),
            dataset.source_file_pattern
        );
    }
    Ok(())
}

fn normalize(registry: &Registry, dataset: &str, file: &Path) -> Result<()> {
    let normalizer = Normalizer::new(registry);
    let mut rdr = csv::Reader::from_path(file).with_context(|| format!("{}", file.display()))?;
    let raw: Vec<String> = rdr
        .headers()
        .with_context(|| format!("{}", file.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    let map = normalizer.map_header(dataset, &raw)?;
    let width = raw.iter().map(String::len).max().unwrap_or(0);
    for (raw, canonical) in raw.iter().zip(&map.header) {
        println!("{raw:width$} -> {canonical}");
    }
    let schema = registry.get(dataset)?;
    for index in map.missing() {
        let column = &schema.columns[index];
        if column.required {
            println!("missing: {} (required)", column.name);
        } else {
            println!("missing: {}", column.name);
        }
    }
    for extra in map.extra() {
        println!("not in schema: {extra}");
    }
    Ok(())
}

fn run_import(settings: &Settings, registry: &Registry, args: &ImportArgs) -> Result<()> {
    let options = ImportOptions {
        dir: args.dir.clone(),
        out: args.out.clone(),
        source: args.source.into(),
        warehouse: args.warehouse.clone(),
        sheets: args.sheets.map(SheetsSource::from),
    };
    let imported = match import(settings, registry, &options) {
        Err(e @ Error::CellLimitExceeded { .. }) => {
            return Err(anyhow::Error::new(e)
                .context("use --sheets warehouse to summarize large reports"));
        }
        result => result?,
    };
    if let Some(path) = &imported.requests {
        println!("Spreadsheet requests: {}", path.display());
    }
    print!("{}", imported.report);
    for job in &imported.jobs {
        println!(
            "Prepared {} rows and {} columns for {}",
            job.rows, job.columns, job.table_id
        );
    }
    Ok(())
}
