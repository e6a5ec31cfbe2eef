use regex::Regex;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use tracing::debug;

use std::{borrow::Cow, collections::HashMap};

use crate::{
    error::{Error, Result},
    schema::{Dataset, Registry},
};

/// A regex substitution applied to header names.
///
/// In the settings file, a rewrite is written as:
///
/// ```json
/// { "pattern": "^product_", "replacement": "lineItem_" }
/// ```
///
/// `pattern` can be any regular expression supported by [`regex::Regex`], and
/// every match is replaced.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Rewrite {
    #[serde_as(as = "DisplayFromStr")]
    pattern: Regex,
    replacement: String,
}

impl Rewrite {
    /// Creates a rewrite replacing every match of `pattern` with `replacement`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `pattern` is not a valid regular expression.
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("bad rewrite pattern {pattern:?}: {e}")))?;
        Ok(Self {
            pattern,
            replacement: replacement.to_string(),
        })
    }

    /// Applies the rewrite to `name`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use costsheet::Rewrite;
    /// let rewrite = Rewrite::new("^product_", "lineItem_").unwrap();
    /// assert_eq!(rewrite.apply("product_region"), "lineItem_region");
    /// assert_eq!(rewrite.apply("lineItem_UsageType"), "lineItem_UsageType");
    /// ```
    #[must_use]
    pub fn apply<'a>(&self, name: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(name, self.replacement.as_str())
    }
}

/// Returns the canonical spelling of `raw` for `dataset`.
///
/// Canonical names are returned as they are. Otherwise the dataset's alias
/// table is consulted, and failing that its rewrites are applied in order
/// until the name becomes canonical. A name no rule turns into a canonical
/// one comes back with whatever rewrites applied to it.
fn canonical_name(dataset: &Dataset, raw: &str) -> String {
    let raw = raw.trim();
    if dataset.is_canonical(raw) {
        return raw.to_string();
    }
    if let Some(canonical) = dataset.aliases.get(raw) {
        return canonical.clone();
    }
    let mut name = raw.to_string();
    for rewrite in &dataset.rewrites {
        name = rewrite.apply(&name).into_owned();
        if dataset.is_canonical(&name) {
            break;
        }
    }
    name
}

/// Maps raw CSV headers onto the canonical column names of a dataset.
#[derive(Clone, Copy, Debug)]
pub struct Normalizer<'r> {
    registry: &'r Registry,
}

impl<'r> Normalizer<'r> {
    #[must_use]
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Returns the canonical name for a single raw header of `dataset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDataset`] if `dataset` isn't registered.
    pub fn canonical_name(&self, dataset: &str, raw: &str) -> Result<String> {
        Ok(canonical_name(self.registry.get(dataset)?, raw))
    }

    /// Normalizes a whole header row, preserving its length and order.
    ///
    /// # Examples
    ///
    /// ```
    /// # use costsheet::{Normalizer, Registry, Settings};
    /// let registry = Registry::from_settings(&Settings::embedded().unwrap()).unwrap();
    /// let normalizer = Normalizer::new(&registry);
    /// let header = normalizer
    ///     .normalize_header("mapped", &["Dest. Shape", "OS / Licenses Cost", "Memory (GB)"])
    ///     .unwrap();
    /// assert_eq!(header, vec!["Destination_Shape", "OS_Licenses_Cost", "Memory_GB"]);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDataset`] if `dataset` isn't registered, and
    /// [`Error::AmbiguousColumnMapping`] if two raw headers end up with the
    /// same name.
    pub fn normalize_header<S: AsRef<str>>(&self, dataset: &str, raw: &[S]) -> Result<Vec<String>> {
        let dataset = self.registry.get(dataset)?;
        let mut seen: HashMap<String, &str> = HashMap::with_capacity(raw.len());
        let mut header = Vec::with_capacity(raw.len());
        for raw in raw {
            let raw = raw.as_ref();
            let name = canonical_name(dataset, raw);
            if let Some(first) = seen.get(&name) {
                return Err(Error::AmbiguousColumnMapping {
                    dataset: dataset.name.clone(),
                    first: (*first).to_string(),
                    second: raw.to_string(),
                    target: name,
                });
            }
            if name != raw {
                debug!(dataset = %dataset.name, raw, canonical = %name, "renamed column");
            }
            seen.insert(name.clone(), raw);
            header.push(name);
        }
        Ok(header)
    }

    /// Normalizes a header row and locates every canonical column in it,
    /// whether or not required columns are present.
    ///
    /// # Errors
    ///
    /// As for [`Normalizer::normalize_header`].
    pub fn map_header<S: AsRef<str>>(&self, dataset: &str, raw: &[S]) -> Result<HeaderMap> {
        let header = self.normalize_header(dataset, raw)?;
        let dataset = self.registry.get(dataset)?;
        let sources = dataset
            .columns
            .iter()
            .map(|column| header.iter().position(|h| *h == column.name))
            .collect();
        Ok(HeaderMap {
            dataset: dataset.name.clone(),
            header,
            sources,
        })
    }

    /// Like [`Normalizer::map_header`], but every required column must be
    /// present.
    ///
    /// # Errors
    ///
    /// As for [`Normalizer::normalize_header`], plus [`Error::MissingColumn`]
    /// for the first required column that the header doesn't provide.
    pub fn resolve<S: AsRef<str>>(&self, dataset: &str, raw: &[S]) -> Result<HeaderMap> {
        let map = self.map_header(dataset, raw)?;
        let dataset = self.registry.get(dataset)?;
        if let Some(index) = map.missing().find(|&i| dataset.columns[i].required) {
            return Err(Error::MissingColumn {
                dataset: dataset.name.clone(),
                column: dataset.columns[index].name.clone(),
            });
        }
        Ok(map)
    }
}

/// A normalized header row, together with the source position of each of
/// the dataset's canonical columns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderMap {
    pub dataset: String,
    /// Normalized names, in source file order.
    pub header: Vec<String>,
    sources: Vec<Option<usize>>,
}

impl HeaderMap {
    /// Returns the source column index of the `canonical`th canonical column.
    #[must_use]
    pub fn source_index(&self, canonical: usize) -> Option<usize> {
        self.sources.get(canonical).copied().flatten()
    }

    /// Returns the indices of canonical columns absent from the source.
    pub fn missing(&self) -> impl Iterator<Item = usize> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
    }

    /// Returns the normalized names of source columns outside the schema.
    pub fn extra(&self) -> impl Iterator<Item = &str> {
        self.header
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.sources.contains(&Some(*i)))
            .map(|(_, h)| h.as_str())
    }
}
