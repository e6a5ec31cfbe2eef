//! Building spreadsheet `batchUpdate` requests for summary worksheets.
//!
//! The spreadsheet service computes the pivot tables and charts itself; this
//! module only lays out the requests. Column references in [`Summary`]
//! definitions are canonical column names, resolved against the dataset
//! schema when the requests are built.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::DeserializeFromStr;
use tracing::{info, warn};

use std::{collections::BTreeMap, path::Path, str::FromStr};

use crate::{
    error::{Error, Result},
    schema::{DeclaredType, Registry, Source},
    table::{Sink, Table},
    warehouse::Connection,
};

/// Splits an A1-style reference such as `AA12` or `C` into a zero-based
/// column and, if present, a zero-based row.
fn parse_a1(s: &str) -> Option<(usize, Option<usize>)> {
    let split = s.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut column: usize = 0;
    for c in letters.chars() {
        let n = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        column = column.checked_mul(26)?.checked_add(n)?;
    }
    let row = if digits.is_empty() {
        None
    } else {
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let row: usize = digits.parse().ok()?;
        Some(row.checked_sub(1)?)
    };
    Some((column - 1, row))
}

/// A cell position written A1-style, such as `H1` or `AA12`.
#[derive(Clone, Copy, Debug, DeserializeFromStr, Eq, PartialEq)]
pub struct CellRef {
    /// Zero-based column index.
    pub column: usize,
    /// Zero-based row index.
    pub row: usize,
}

impl FromStr for CellRef {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match parse_a1(s) {
            Some((column, Some(row))) => Ok(Self { column, row }),
            _ => Err(Error::InvalidCellRef(s.to_string())),
        }
    }
}

/// A block of cells written A1-style: `B7`, `G1:M1`, `E2:F`, or whole
/// columns such as `H` and `E:F`.
///
/// An end without a row runs to the bottom of the sheet. End indices are
/// exclusive.
#[derive(Clone, Copy, Debug, DeserializeFromStr, Eq, PartialEq)]
pub struct GridRange {
    pub start_column: usize,
    pub end_column: usize,
    pub start_row: Option<usize>,
    pub end_row: Option<usize>,
}

impl FromStr for GridRange {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bad = || Error::InvalidCellRef(s.to_string());
        let (first, last) = match s.split_once(':') {
            Some((first, last)) => (first, Some(last)),
            None => (s, None),
        };
        let (start_column, start_row) = parse_a1(first).ok_or_else(bad)?;
        let (end_column, end_row) = match last {
            Some(last) => parse_a1(last).ok_or_else(bad)?,
            None => (start_column, start_row),
        };
        if end_column < start_column {
            return Err(bad());
        }
        match (start_row, end_row) {
            (None, Some(_)) => return Err(bad()),
            (Some(start), Some(end)) if end < start => return Err(bad()),
            _ => {}
        }
        Ok(Self {
            start_column,
            end_column: end_column + 1,
            start_row,
            end_row: end_row.map(|row| row + 1),
        })
    }
}

impl GridRange {
    fn to_json(self, sheet_id: u32) -> Value {
        let mut range = json!({
            "sheetId": sheet_id,
            "startColumnIndex": self.start_column,
            "endColumnIndex": self.end_column,
        });
        if let Some(row) = self.start_row {
            range["startRowIndex"] = json!(row);
        }
        if let Some(row) = self.end_row {
            range["endRowIndex"] = json!(row);
        }
        range
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummarizeFunction {
    #[default]
    Sum,
    Counta,
    Count,
    Average,
    Max,
    Min,
}

impl SummarizeFunction {
    fn api_name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Counta => "COUNTA",
            Self::Count => "COUNT",
            Self::Average => "AVERAGE",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PivotValue {
    pub column: String,
    /// Display name of the value column; the service picks one if absent.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub function: SummarizeFunction,
}

/// A pivot table over one dataset, placed at `anchor`.
#[derive(Clone, Debug, Deserialize)]
pub struct Pivot {
    pub dataset: String,
    pub anchor: CellRef,
    /// Row grouping columns, outermost first.
    pub rows: Vec<String>,
    pub values: Vec<PivotValue>,
}

/// A pie chart over the output of one of the worksheet's pivots.
///
/// The first row group of the pivot is the domain and its first value column
/// the series.
#[derive(Clone, Debug, Deserialize)]
pub struct PieChart {
    pub title: String,
    pub anchor: CellRef,
    /// Index into the worksheet's `pivots`.
    pub pivot: usize,
}

/// A literal value, or a formula if it starts with `=`.
#[derive(Clone, Debug, Deserialize)]
pub struct Cell {
    pub anchor: CellRef,
    pub value: String,
}

/// A header cell at `anchor`, with `formula` repeated in every row below.
#[derive(Clone, Debug, Deserialize)]
pub struct FormulaColumn {
    pub header: String,
    pub anchor: CellRef,
    pub formula: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumberFormatType {
    Text,
    Number,
    Percent,
    Currency,
    Date,
    Scientific,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NumberFormat {
    #[serde(rename = "type")]
    pub format_type: NumberFormatType,
    /// Display pattern such as `0.0000%`; the locale default if absent.
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Cell formatting for a range of a summary worksheet.
#[derive(Clone, Debug, Deserialize)]
pub struct Format {
    pub range: GridRange,
    #[serde(default)]
    pub number_format: Option<NumberFormat>,
    #[serde(default)]
    pub bold: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    NumberGreater,
    NumberGreaterThanEq,
    NumberLess,
    NumberLessThanEq,
    NumberEq,
    NumberNotEq,
}

/// An RGB colour, each component from 0 to 1.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
pub struct Color {
    #[serde(default)]
    pub red: f64,
    #[serde(default)]
    pub green: f64,
    #[serde(default)]
    pub blue: f64,
}

/// Colours the text of cells in `range` that satisfy `condition` against
/// `value`.
#[derive(Clone, Debug, Deserialize)]
pub struct ConditionalRule {
    pub range: GridRange,
    pub condition: Condition,
    pub value: String,
    pub color: Color,
}

/// A summary worksheet definition.
#[derive(Clone, Debug, Deserialize)]
pub struct Summary {
    pub source: Source,
    pub worksheet: String,
    #[serde(default)]
    pub pivots: Vec<Pivot>,
    #[serde(default)]
    pub charts: Vec<PieChart>,
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub formulas: Vec<FormulaColumn>,
    /// Applied in order, so later formats win where ranges overlap.
    #[serde(default)]
    pub formats: Vec<Format>,
    #[serde(default)]
    pub conditional_rules: Vec<ConditionalRule>,
    /// Columns to fit to their contents once everything else is in place.
    #[serde(default)]
    pub autosize: Option<GridRange>,
}

/// Where summaries read their data from.
#[derive(Clone, Debug)]
pub enum Layout {
    /// Rows are uploaded to one worksheet per dataset.
    Worksheet,
    /// Rows stay in the warehouse and are attached as data sources.
    Warehouse(Connection),
}

#[derive(Debug)]
struct Loaded {
    sheet_id: u32,
    rows: usize,
}

/// A [`Sink`] accumulating the requests for one spreadsheet.
#[derive(Debug)]
pub struct SheetsPlan<'r> {
    registry: &'r Registry,
    summaries: &'r [Summary],
    source: Source,
    layout: Layout,
    loaded: BTreeMap<String, Loaded>,
    requests: Vec<Value>,
    next_sheet_id: u32,
}

fn data_source_id(dataset: &str) -> String {
    format!("ds_{dataset}")
}

fn user_value(value: &str) -> Value {
    if value.starts_with('=') {
        json!({ "formulaValue": value })
    } else {
        json!({ "stringValue": value })
    }
}

fn cell_value(value: Option<&str>, declared_type: DeclaredType) -> Value {
    match (value, declared_type) {
        (None | Some(""), _) => json!({}),
        (Some(v), DeclaredType::Numeric) => match v.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => json!({ "userEnteredValue": { "numberValue": n } }),
            _ => json!({ "userEnteredValue": { "stringValue": v } }),
        },
        (Some(v), DeclaredType::String) => json!({ "userEnteredValue": { "stringValue": v } }),
    }
}

impl<'r> SheetsPlan<'r> {
    #[must_use]
    pub fn new(registry: &'r Registry, summaries: &'r [Summary], source: Source, layout: Layout) -> Self {
        Self {
            registry,
            summaries,
            source,
            layout,
            loaded: BTreeMap::new(),
            requests: Vec::new(),
            // Sheet 0 is the default sheet of a new spreadsheet.
            next_sheet_id: 1,
        }
    }

    fn add_sheet(&mut self, title: &str) -> u32 {
        let sheet_id = self.next_sheet_id;
        self.next_sheet_id += 1;
        self.requests.push(json!({
            "addSheet": { "properties": { "sheetId": sheet_id, "title": title } }
        }));
        sheet_id
    }

    /// Returns the `batchUpdate` body: data requests followed by the
    /// summary worksheets of this plan's source.
    ///
    /// Pivots over datasets that received no data are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDataset`] or [`Error::MissingColumn`] for a
    /// pivot referring to a dataset or column the registry doesn't have, and
    /// [`Error::Config`] for a chart referring to a pivot that doesn't exist.
    pub fn finish(mut self) -> Result<Value> {
        let source = self.source;
        let summaries = self.summaries;
        for summary in summaries.iter().filter(|s| s.source == source) {
            let sheet_id = self.add_sheet(&summary.worksheet);
            for cell in &summary.cells {
                self.requests.push(update_cell(sheet_id, cell.anchor, &cell.value));
            }
            for formula in &summary.formulas {
                self.requests
                    .push(update_cell(sheet_id, formula.anchor, &formula.header));
                self.requests.push(repeat_formula(sheet_id, formula));
            }
            for pivot in &summary.pivots {
                match self.pivot_request(sheet_id, pivot)? {
                    Some(request) => self.requests.push(request),
                    None => warn!(
                        worksheet = %summary.worksheet,
                        dataset = %pivot.dataset,
                        "skipping pivot over dataset with no data"
                    ),
                }
            }
            for chart in &summary.charts {
                let pivot = summary.pivots.get(chart.pivot).ok_or_else(|| {
                    Error::Config(format!(
                        "chart '{}' refers to missing pivot {}",
                        chart.title, chart.pivot
                    ))
                })?;
                if self.loaded.contains_key(&pivot.dataset) {
                    self.requests.push(pie_chart(sheet_id, chart, pivot));
                }
            }
            for format in &summary.formats {
                let request = format_request(sheet_id, format).ok_or_else(|| {
                    Error::Config(format!(
                        "worksheet '{}': format sets neither number_format nor bold",
                        summary.worksheet
                    ))
                })?;
                self.requests.push(request);
            }
            for (index, rule) in summary.conditional_rules.iter().enumerate() {
                let Color { red, green, blue } = rule.color;
                if ![red, green, blue].iter().all(|c| (0.0..=1.0).contains(c)) {
                    return Err(Error::Config(format!(
                        "worksheet '{}': colour components must be between 0 and 1",
                        summary.worksheet
                    )));
                }
                self.requests.push(conditional_rule(sheet_id, index, rule));
            }
            if let Some(columns) = summary.autosize {
                self.requests.push(json!({
                    "autoResizeDimensions": { "dimensions": {
                        "sheetId": sheet_id,
                        "dimension": "COLUMNS",
                        "startIndex": columns.start_column,
                        "endIndex": columns.end_column,
                    }}
                }));
            }
        }
        info!(requests = self.requests.len(), "built spreadsheet requests");
        Ok(json!({ "requests": self.requests }))
    }

    fn pivot_request(&self, sheet_id: u32, pivot: &Pivot) -> Result<Option<Value>> {
        let dataset = self.registry.get(&pivot.dataset)?;
        let mut rows = Vec::with_capacity(pivot.rows.len());
        for name in &pivot.rows {
            dataset.column(name)?;
            rows.push(json!({
                "showTotals": false,
                "sortOrder": "DESCENDING",
                "valueBucket": {},
            }));
        }
        let mut values = Vec::with_capacity(pivot.values.len());
        for value in &pivot.values {
            dataset.column(&value.column)?;
            let mut v = json!({ "summarizeFunction": value.function.api_name() });
            if let Some(name) = &value.name {
                v["name"] = json!(name);
            }
            values.push(v);
        }
        let Some(loaded) = self.loaded.get(&dataset.name) else {
            return Ok(None);
        };
        let mut pivot_table = json!({ "valueLayout": "HORIZONTAL" });
        match &self.layout {
            Layout::Worksheet => {
                // Offsets resolve against the canonical order the rows were
                // uploaded in.
                for (row, name) in rows.iter_mut().zip(&pivot.rows) {
                    row["sourceColumnOffset"] = json!(dataset.column_index(name));
                }
                for (v, value) in values.iter_mut().zip(&pivot.values) {
                    v["sourceColumnOffset"] = json!(dataset.column_index(&value.column));
                }
                pivot_table["source"] = json!({
                    "sheetId": loaded.sheet_id,
                    "startRowIndex": 0,
                    "startColumnIndex": 0,
                    "endRowIndex": loaded.rows + 1,
                    "endColumnIndex": dataset.columns.len(),
                });
            }
            Layout::Warehouse(_) => {
                for (row, name) in rows.iter_mut().zip(&pivot.rows) {
                    row["dataSourceColumnReference"] = json!({ "name": name });
                }
                for (v, value) in values.iter_mut().zip(&pivot.values) {
                    v["dataSourceColumnReference"] = json!({ "name": value.column });
                }
                pivot_table["dataSourceId"] = json!(data_source_id(&dataset.name));
            }
        }
        pivot_table["rows"] = Value::Array(rows);
        pivot_table["values"] = Value::Array(values);
        Ok(Some(json!({
            "updateCells": {
                "rows": [{ "values": [{ "pivotTable": pivot_table }] }],
                "start": {
                    "sheetId": sheet_id,
                    "rowIndex": pivot.anchor.row,
                    "columnIndex": pivot.anchor.column,
                },
                "fields": "pivotTable",
            }
        })))
    }
}

fn update_cell(sheet_id: u32, anchor: CellRef, value: &str) -> Value {
    json!({
        "updateCells": {
            "rows": [{ "values": [{ "userEnteredValue": user_value(value) }] }],
            "start": { "sheetId": sheet_id, "rowIndex": anchor.row, "columnIndex": anchor.column },
            "fields": "userEnteredValue",
        }
    })
}

fn repeat_formula(sheet_id: u32, formula: &FormulaColumn) -> Value {
    json!({
        "repeatCell": {
            "cell": { "userEnteredValue": { "formulaValue": formula.formula } },
            "range": {
                "sheetId": sheet_id,
                "startColumnIndex": formula.anchor.column,
                "endColumnIndex": formula.anchor.column + 1,
                "startRowIndex": formula.anchor.row + 1,
            },
            "fields": "userEnteredValue.formulaValue",
        }
    })
}

fn format_request(sheet_id: u32, format: &Format) -> Option<Value> {
    let mut cell = json!({});
    let mut fields = Vec::new();
    if let Some(number_format) = &format.number_format {
        let mut value = json!({ "type": number_format.format_type });
        if let Some(pattern) = &number_format.pattern {
            value["pattern"] = json!(pattern);
        }
        cell["numberFormat"] = value;
        fields.push("userEnteredFormat.numberFormat");
    }
    if format.bold {
        cell["textFormat"] = json!({ "bold": true });
        fields.push("userEnteredFormat.textFormat.bold");
    }
    if fields.is_empty() {
        return None;
    }
    Some(json!({
        "repeatCell": {
            "cell": { "userEnteredFormat": cell },
            "range": format.range.to_json(sheet_id),
            "fields": fields.join(","),
        }
    }))
}

fn conditional_rule(sheet_id: u32, index: usize, rule: &ConditionalRule) -> Value {
    json!({
        "addConditionalFormatRule": {
            "index": index,
            "rule": {
                "ranges": [rule.range.to_json(sheet_id)],
                "booleanRule": {
                    "condition": {
                        "type": rule.condition,
                        "values": [{ "userEnteredValue": rule.value }],
                    },
                    "format": { "textFormat": { "foregroundColor": {
                        "red": rule.color.red,
                        "green": rule.color.green,
                        "blue": rule.color.blue,
                    }}},
                },
            },
        }
    })
}

fn pie_chart(sheet_id: u32, chart: &PieChart, pivot: &Pivot) -> Value {
    let domain = pivot.anchor.column;
    let series = domain + pivot.rows.len();
    let range = |column: usize| {
        json!({ "sources": [{
            "sheetId": sheet_id,
            "startColumnIndex": column,
            "endColumnIndex": column + 1,
        }]})
    };
    json!({
        "addChart": { "chart": {
            "spec": {
                "title": chart.title,
                "pieChart": {
                    "legendPosition": "RIGHT_LEGEND",
                    "domain": { "sourceRange": range(domain) },
                    "series": { "sourceRange": range(series) },
                    "threeDimensional": false,
                },
            },
            "position": { "overlayPosition": { "anchorCell": {
                "sheetId": sheet_id,
                "rowIndex": chart.anchor.row,
                "columnIndex": chart.anchor.column,
            }}},
        }}
    })
}

impl Sink for SheetsPlan<'_> {
    fn accept(&mut self, table: &Table, _origin: &Path) -> Result<()> {
        if let Some(loaded) = self.loaded.get_mut(&table.dataset) {
            loaded.rows += table.len();
            if let Layout::Worksheet = self.layout {
                let sheet_id = loaded.sheet_id;
                self.requests.push(append_rows(sheet_id, table, false));
            }
            return Ok(());
        }
        let registry = self.registry;
        let dataset = registry.get(&table.dataset)?;
        let sheet_id = if let Layout::Warehouse(conn) = &self.layout {
            let request = json!({
                "addDataSource": { "dataSource": {
                    "dataSourceId": data_source_id(&dataset.name),
                    "spec": { "bigQuery": {
                        "projectId": conn.project,
                        "tableSpec": {
                            "tableProjectId": conn.project,
                            "datasetId": conn.dataset,
                            "tableId": conn.table_name(table),
                        },
                    }},
                }}
            });
            self.requests.push(request);
            0
        } else {
            let sheet_id = self.add_sheet(&dataset.title);
            self.requests.push(append_rows(sheet_id, table, true));
            sheet_id
        };
        self.loaded.insert(
            table.dataset.clone(),
            Loaded {
                sheet_id,
                rows: table.len(),
            },
        );
        Ok(())
    }
}

fn append_rows(sheet_id: u32, table: &Table, with_header: bool) -> Value {
    let mut rows = Vec::with_capacity(table.len() + 1);
    if with_header {
        let header: Vec<_> = table
            .columns
            .iter()
            .map(|c| json!({ "userEnteredValue": { "stringValue": c.name } }))
            .collect();
        rows.push(json!({ "values": header }));
    }
    for row in table.rows() {
        let values: Vec<_> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| cell_value(row.get(i), c.declared_type))
            .collect();
        rows.push(json!({ "values": values }));
    }
    json!({
        "appendCells": {
            "sheetId": sheet_id,
            "rows": rows,
            "fields": "userEnteredValue",
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{normalize::Normalizer, settings::Settings};

    fn requests_of(kind: &str, body: &Value) -> Vec<Value> {
        body["requests"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r.get(kind).cloned())
            .collect()
    }

    #[test]
    fn from_str_fn_parses_a1_references() {
        assert_eq!("A1".parse::<CellRef>().unwrap(), CellRef { column: 0, row: 0 });
        assert_eq!("H1".parse::<CellRef>().unwrap(), CellRef { column: 7, row: 0 });
        assert_eq!("j21".parse::<CellRef>().unwrap(), CellRef { column: 9, row: 20 });
        assert_eq!("AA3".parse::<CellRef>().unwrap(), CellRef { column: 26, row: 2 });
        for bad in ["", "A", "12", "A0", "A1B", "A+1", "AAAAAAAAAAAAAAAAAAAA1"] {
            assert!(
                matches!(bad.parse::<CellRef>(), Err(Error::InvalidCellRef(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn from_str_fn_parses_a1_ranges() {
        assert_eq!(
            "B7".parse::<GridRange>().unwrap(),
            GridRange { start_column: 1, end_column: 2, start_row: Some(6), end_row: Some(7) }
        );
        assert_eq!(
            "G1:M1".parse::<GridRange>().unwrap(),
            GridRange { start_column: 6, end_column: 13, start_row: Some(0), end_row: Some(1) }
        );
        assert_eq!(
            "E2:F".parse::<GridRange>().unwrap(),
            GridRange { start_column: 4, end_column: 6, start_row: Some(1), end_row: None }
        );
        assert_eq!(
            "h".parse::<GridRange>().unwrap(),
            GridRange { start_column: 7, end_column: 8, start_row: None, end_row: None }
        );
        for bad in ["", ":", "F:E", "E:F2", "B7:B3", "2:5", "AAAAAAAAAAAAAAAAAAAA:B"] {
            assert!(bad.parse::<GridRange>().is_err(), "{bad:?} should not parse");
        }
    }

    fn formatted_summary() -> Vec<Summary> {
        serde_json::from_str(
            r#"[{
                "source": "mc",
                "worksheet": "Overview",
                "formats": [
                    { "range": "B7", "number_format": { "type": "PERCENT", "pattern": "0.0000%" } },
                    { "range": "G1:I1", "bold": true },
                    { "range": "E:F", "number_format": { "type": "CURRENCY" }, "bold": true }
                ],
                "conditional_rules": [
                    { "range": "H:I", "condition": "NUMBER_GREATER", "value": "0", "color": { "red": 1 } },
                    { "range": "H:I", "condition": "NUMBER_LESS", "value": "0", "color": { "green": 0.29 } }
                ],
                "autosize": "A:AD"
            }]"#,
        )
        .unwrap()
    }

    #[test]
    fn finish_fn_applies_number_formats() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let summaries = formatted_summary();
        let plan = SheetsPlan::new(&registry, &summaries, Source::Mc, Layout::Worksheet);
        let body = plan.finish().unwrap();
        let repeats = requests_of("repeatCell", &body);
        assert_eq!(repeats.len(), 3);

        assert_eq!(
            repeats[0]["range"],
            json!({
                "sheetId": 1,
                "startColumnIndex": 1,
                "endColumnIndex": 2,
                "startRowIndex": 6,
                "endRowIndex": 7,
            })
        );
        assert_eq!(
            repeats[0]["cell"]["userEnteredFormat"]["numberFormat"],
            json!({ "type": "PERCENT", "pattern": "0.0000%" })
        );
        assert_eq!(repeats[0]["fields"], "userEnteredFormat.numberFormat");

        assert_eq!(repeats[1]["cell"]["userEnteredFormat"]["textFormat"]["bold"], true);
        assert_eq!(repeats[1]["fields"], "userEnteredFormat.textFormat.bold");

        assert_eq!(
            repeats[2]["cell"]["userEnteredFormat"]["numberFormat"],
            json!({ "type": "CURRENCY" })
        );
        assert!(repeats[2]["range"].get("startRowIndex").is_none());
        assert_eq!(
            repeats[2]["fields"],
            "userEnteredFormat.numberFormat,userEnteredFormat.textFormat.bold"
        );
    }

    #[test]
    fn finish_fn_adds_conditional_colour_rules() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let summaries = formatted_summary();
        let plan = SheetsPlan::new(&registry, &summaries, Source::Mc, Layout::Worksheet);
        let body = plan.finish().unwrap();
        let rules = requests_of("addConditionalFormatRule", &body);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["index"], 0);
        assert_eq!(rules[1]["index"], 1);

        let rule = &rules[0]["rule"];
        assert_eq!(
            rule["ranges"][0],
            json!({ "sheetId": 1, "startColumnIndex": 7, "endColumnIndex": 9 })
        );
        assert_eq!(
            rule["booleanRule"]["condition"],
            json!({ "type": "NUMBER_GREATER", "values": [{ "userEnteredValue": "0" }] })
        );
        let red = &rule["booleanRule"]["format"]["textFormat"]["foregroundColor"];
        assert_eq!(red["red"].as_f64(), Some(1.0));
        assert_eq!(red["green"].as_f64(), Some(0.0));

        let green = &rules[1]["rule"]["booleanRule"];
        assert_eq!(green["condition"]["type"], "NUMBER_LESS");
        assert_eq!(
            green["format"]["textFormat"]["foregroundColor"]["green"].as_f64(),
            Some(0.29)
        );
    }

    #[test]
    fn finish_fn_autosizes_columns() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let summaries = formatted_summary();
        let plan = SheetsPlan::new(&registry, &summaries, Source::Mc, Layout::Worksheet);
        let body = plan.finish().unwrap();
        let resize = requests_of("autoResizeDimensions", &body);
        assert_eq!(
            resize,
            vec![json!({ "dimensions": {
                "sheetId": 1,
                "dimension": "COLUMNS",
                "startIndex": 0,
                "endIndex": 30,
            }})]
        );
    }

    #[test]
    fn finish_fn_rejects_empty_format_and_bad_colour() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let mut summaries = formatted_summary();
        summaries[0].formats[0].number_format = None;
        let plan = SheetsPlan::new(&registry, &summaries, Source::Mc, Layout::Worksheet);
        assert!(matches!(plan.finish(), Err(Error::Config(_))));

        let mut summaries = formatted_summary();
        summaries[0].conditional_rules[0].color.green = 75.0;
        let plan = SheetsPlan::new(&registry, &summaries, Source::Mc, Layout::Worksheet);
        assert!(matches!(plan.finish(), Err(Error::Config(_))));
    }

    #[test]
    fn embedded_summaries_format_cost_totals_as_currency() {
        let settings = Settings::embedded().unwrap();
        for summary in &settings.summaries {
            assert!(
                summary.formats.iter().any(|f| f
                    .number_format
                    .as_ref()
                    .is_some_and(|n| n.format_type == NumberFormatType::Currency)),
                "worksheet {} has no currency format",
                summary.worksheet
            );
            assert!(summary.autosize.is_some());
        }
    }

    #[test]
    fn finish_fn_resolves_column_offsets_for_worksheet_layout() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let normalizer = Normalizer::new(&registry);
        let mut plan = SheetsPlan::new(&registry, &settings.summaries, Source::Mc, Layout::Worksheet);
        for name in ["mapped", "unmapped"] {
            let path = Path::new("testdata/reports").join(format!("{name}.csv"));
            let table = Table::from_path(&normalizer, name, &path).unwrap();
            plan.accept(&table, &path).unwrap();
        }
        let body = plan.finish().unwrap();

        let sheets = requests_of("addSheet", &body);
        assert_eq!(sheets[0]["properties"]["title"], "GCP Mapped Data (mapped)");
        assert_eq!(sheets[0]["properties"]["sheetId"], 1);

        let appends = requests_of("appendCells", &body);
        let mapped_rows = appends[0]["rows"].as_array().unwrap();
        assert_eq!(mapped_rows.len(), 4, "header plus three rows");
        assert_eq!(mapped_rows[0]["values"][0]["userEnteredValue"]["stringValue"], "ID");

        let mapped = registry.get("mapped").unwrap();
        let pivot = requests_of("updateCells", &body)
            .into_iter()
            .find_map(|u| u["rows"][0]["values"][0].get("pivotTable").cloned())
            .unwrap();
        assert_eq!(pivot["source"]["sheetId"], 1);
        assert_eq!(pivot["source"]["endRowIndex"], 4);
        assert_eq!(
            pivot["rows"][0]["sourceColumnOffset"],
            json!(mapped.column_index("Source_Product").unwrap())
        );
        assert_eq!(
            pivot["values"][0]["sourceColumnOffset"],
            json!(mapped.column_index("Source_Cost").unwrap())
        );
        assert_eq!(pivot["values"][0]["summarizeFunction"], "SUM");
    }

    #[test]
    fn finish_fn_references_columns_by_name_for_warehouse_layout() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let normalizer = Normalizer::new(&registry);
        let conn: Connection = "proj.billing.aws_cur".parse().unwrap();
        let mut plan = SheetsPlan::new(&registry, &settings.summaries, Source::Cur, Layout::Warehouse(conn));
        let path = Path::new("testdata/cur/cur-2024-01.csv");
        let table = Table::from_path(&normalizer, "cur", path).unwrap();
        plan.accept(&table, path).unwrap();
        let body = plan.finish().unwrap();

        let sources = requests_of("addDataSource", &body);
        assert_eq!(sources.len(), 1);
        let spec = &sources[0]["dataSource"]["spec"]["bigQuery"]["tableSpec"];
        assert_eq!(spec["tableId"], "aws_cur");
        assert_eq!(spec["datasetId"], "billing");

        let pivot = requests_of("updateCells", &body)
            .into_iter()
            .find_map(|u| u["rows"][0]["values"][0].get("pivotTable").cloned())
            .unwrap();
        assert_eq!(pivot["dataSourceId"], "ds_cur");
        assert_eq!(pivot["rows"][0]["dataSourceColumnReference"]["name"], "lineItem_ProductCode");
        assert_eq!(pivot["values"][0]["dataSourceColumnReference"]["name"], "lineItem_UnblendedCost");
        assert!(!requests_of("addChart", &body).is_empty());
    }

    #[test]
    fn finish_fn_skips_pivots_without_data() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let plan = SheetsPlan::new(&registry, &settings.summaries, Source::Mc, Layout::Worksheet);
        let body = plan.finish().unwrap();
        assert!(requests_of("addChart", &body).is_empty());
        assert!(!requests_of("addSheet", &body).is_empty());
        assert!(requests_of("updateCells", &body)
            .iter()
            .all(|u| u["rows"][0]["values"][0].get("pivotTable").is_none()));
    }

    #[test]
    fn finish_fn_rejects_unknown_pivot_column() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let summaries: Vec<Summary> = serde_json::from_str(
            r#"[{
                "source": "mc",
                "worksheet": "Overview",
                "pivots": [{
                    "dataset": "mapped",
                    "anchor": "A1",
                    "rows": ["Bogus_Column"],
                    "values": [{"column": "GCP_Cost"}]
                }]
            }]"#,
        )
        .unwrap();
        let plan = SheetsPlan::new(&registry, &summaries, Source::Mc, Layout::Worksheet);
        assert!(matches!(
            plan.finish(),
            Err(Error::MissingColumn { column, .. }) if column == "Bogus_Column"
        ));
    }

    #[test]
    fn finish_fn_writes_formula_columns_below_header() {
        let settings = Settings::embedded().unwrap();
        let registry = Registry::from_settings(&settings).unwrap();
        let plan = SheetsPlan::new(&registry, &settings.summaries, Source::Mc, Layout::Worksheet);
        let body = plan.finish().unwrap();
        let repeat = &requests_of("repeatCell", &body)[0];
        assert_eq!(repeat["range"]["startRowIndex"], 1);
        assert!(repeat["cell"]["userEnteredValue"]["formulaValue"]
            .as_str()
            .unwrap()
            .starts_with('='));
    }

    #[test]
    fn cell_value_fn_uses_declared_type() {
        assert_eq!(
            cell_value(Some("12.50"), DeclaredType::Numeric),
            json!({ "userEnteredValue": { "numberValue": 12.5 } })
        );
        assert_eq!(
            cell_value(Some("n/a"), DeclaredType::Numeric),
            json!({ "userEnteredValue": { "stringValue": "n/a" } })
        );
        assert_eq!(
            cell_value(Some("12.50"), DeclaredType::String),
            json!({ "userEnteredValue": { "stringValue": "12.50" } })
        );
        assert_eq!(cell_value(None, DeclaredType::String), json!({}));
        for text in ["NaN", "inf", "-infinity"] {
            assert_eq!(
                cell_value(Some(text), DeclaredType::Numeric),
                json!({ "userEnteredValue": { "stringValue": text } })
            );
        }
    }
}
