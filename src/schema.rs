use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use std::collections::{BTreeMap, HashSet};

use crate::{
    error::{Error, Result},
    normalize::Rewrite,
    settings::Settings,
};

/// The type a column is declared with in the settings.
///
/// Only used to pick a warehouse column type and a spreadsheet cell kind;
/// values are never converted by this crate.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum DeclaredType {
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "FLOAT64", alias = "NUMERIC", alias = "INT64")]
    Numeric,
}

impl DeclaredType {
    /// Returns the warehouse SQL type name for this column type.
    #[must_use]
    pub fn warehouse_type(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Numeric => "FLOAT64",
        }
    }
}

/// Which family of reports a dataset belongs to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Migration pricing reports (`mapped`, `unmapped`, `discount`).
    Mc,
    /// Raw cloud usage and cost records.
    Cur,
}

/// A canonical column of a dataset.
#[derive(Clone, Debug, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: DeclaredType,
    #[serde(default)]
    pub required: bool,
}

/// A named logical table with a fixed schema, plus the rules used to map
/// the headers of its source files onto that schema.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Worksheet title used when the data is uploaded to a spreadsheet.
    pub title: String,
    pub source: Source,
    /// Matched against file names in the report directory.
    #[serde_as(as = "DisplayFromStr")]
    pub source_file_pattern: Regex,
    #[serde(default)]
    pub required_file: bool,
    pub columns: Vec<Column>,
    /// Historical header spellings, keyed by raw header.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Applied in order to headers that are neither canonical nor aliased.
    #[serde(default)]
    pub rewrites: Vec<Rewrite>,
}

impl Dataset {
    /// Returns the position of the canonical column `name`, if any.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    #[must_use]
    pub fn is_canonical(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Looks up a canonical column by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingColumn`] if the dataset declares no such column.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::MissingColumn {
                dataset: self.name.clone(),
                column: name.to_string(),
            })
    }

    /// Returns the canonical column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::Config(format!(
                    "dataset '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
        }
        for (raw, canonical) in &self.aliases {
            if !self.is_canonical(canonical) {
                return Err(Error::Config(format!(
                    "dataset '{}': alias '{raw}' targets unknown column '{canonical}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// The set of datasets known to a run.
///
/// Built once from [`Settings`] and never mutated afterwards.
#[derive(Debug)]
pub struct Registry {
    datasets: Vec<Dataset>,
}

impl Registry {
    /// Builds a registry from dataset definitions, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if two datasets share a name, a dataset
    /// declares a column twice, or an alias targets a column the dataset
    /// doesn't declare.
    pub fn new(datasets: Vec<Dataset>) -> Result<Self> {
        let mut names = HashSet::new();
        for dataset in &datasets {
            if !names.insert(dataset.name.as_str()) {
                return Err(Error::Config(format!(
                    "dataset '{}' is defined twice",
                    dataset.name
                )));
            }
            dataset.validate()?;
        }
        Ok(Self { datasets })
    }

    /// Builds a registry from the datasets in `settings`.
    ///
    /// # Errors
    ///
    /// See [`Registry::new`].
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.datasets.clone())
    }

    /// Returns the dataset called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDataset`] if no dataset has that name.
    pub fn get(&self, name: &str) -> Result<&Dataset> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::UnknownDataset(name.to_string()))
    }

    #[must_use]
    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// Returns the datasets belonging to `source`, in declaration order.
    pub fn by_source(&self, source: Source) -> impl Iterator<Item = &Dataset> {
        self.datasets.iter().filter(move |d| d.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_settings(&Settings::embedded().unwrap()).unwrap()
    }

    #[test]
    fn get_fn_returns_registered_dataset() {
        let registry = registry();
        let mapped = registry.get("mapped").unwrap();
        assert_eq!(mapped.title, "GCP Mapped Data (mapped)");
        assert_eq!(mapped.columns.first().unwrap().name, "ID");
        assert_eq!(
            mapped.column("GCP_Cost").unwrap().declared_type,
            DeclaredType::Numeric
        );
    }

    #[test]
    fn get_fn_returns_unknown_dataset_error() {
        let registry = registry();
        assert!(matches!(
            registry.get("source-merged"),
            Err(Error::UnknownDataset(name)) if name == "source-merged"
        ));
    }

    #[test]
    fn by_source_fn_keeps_declaration_order() {
        let registry = registry();
        let names: Vec<_> = registry
            .by_source(Source::Mc)
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["mapped", "unmapped", "discount"]);
        assert_eq!(registry.by_source(Source::Cur).count(), 1);
    }

    #[test]
    fn declared_type_accepts_warehouse_aliases() {
        let types: Vec<DeclaredType> =
            serde_json::from_str(r#"["STRING", "FLOAT64", "NUMERIC", "INT64"]"#).unwrap();
        assert_eq!(
            types,
            vec![
                DeclaredType::String,
                DeclaredType::Numeric,
                DeclaredType::Numeric,
                DeclaredType::Numeric,
            ]
        );
        assert_eq!(DeclaredType::Numeric.warehouse_type(), "FLOAT64");
    }

    #[test]
    fn new_fn_rejects_alias_to_undeclared_column() {
        let dataset: Dataset = serde_json::from_str(
            r#"{
                "name": "mapped",
                "title": "Mapped",
                "source": "mc",
                "source_file_pattern": "^mapped\\.csv$",
                "columns": [{"name": "ID", "type": "STRING"}],
                "aliases": {"Dest Shape": "Destination_Shape"}
            }"#,
        )
        .unwrap();
        assert!(matches!(Registry::new(vec![dataset]), Err(Error::Config(_))));
    }

    #[test]
    fn new_fn_rejects_duplicate_dataset_names() {
        let dataset: Dataset = serde_json::from_str(
            r#"{
                "name": "cur",
                "title": "CUR",
                "source": "cur",
                "source_file_pattern": "\\.csv$",
                "columns": [{"name": "lineItem_UnblendedCost", "type": "FLOAT64"}]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            Registry::new(vec![dataset.clone(), dataset]),
            Err(Error::Config(_))
        ));
    }
}
