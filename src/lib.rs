#![doc = include_str!("../README.md")]
mod discover;
mod error;
mod import;
mod normalize;
mod report;
mod schema;
mod settings;
mod table;

pub mod logging;
pub mod sheets;
pub mod warehouse;

pub use discover::{scan, SourceFile};
pub use error::{Error, Result};
pub use import::{import, ImportOptions, Imported, SheetsSource};
pub use normalize::{HeaderMap, Normalizer, Rewrite};
pub use report::{ImportReport, Totals};
pub use schema::{Column, Dataset, DeclaredType, Registry, Source};
pub use settings::{Settings, DEFAULT_CELL_LIMIT};
pub use table::{NormalizedRow, Sink, Table};
