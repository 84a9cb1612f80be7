//! Client-side copy of the crowd counter table.
//!
//! A [`Snapshot`] is the whole result of the fixed query. It is never patched:
//! every refresh replaces it wholesale. Typed access goes through
//! [`Snapshot::record`], which parses one row on demand because the column
//! set is owned by the analysis pipeline, not by this crate.

use crate::descriptor::RawDescriptor;
use crate::error::CrowdError;
use arrow_array::{ArrayRef, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

pub const TOTAL_ATTENDEES: &str = "TOTAL_ATTENDEES";
pub const RAISED_HANDS: &str = "RAISED_HANDS";
pub const PERCENTAGE_WITH_HANDS_UP: &str = "PERCENTAGE_WITH_HANDS_UP";
pub const CAPTION: &str = "CAPTION";
pub const FILE_NAME: &str = "FILE_NAME";
pub const RAW: &str = "RAW";

/// Columns kept for the detail panel but left out of the table view
pub const HIDDEN_COLUMNS: [&str; 3] = [CAPTION, FILE_NAME, RAW];

/// Column metadata as reported by the remote result set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
        }
    }
}

/// Rows of one statement, in remote column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, ignoring case
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Value at `(row, column)`, `None` when either is missing
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// First column of the first row, the shape of scalar queries
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|r| r.first())
    }

    /// All non-null values of one column rendered as strings
    pub fn strings(&self, column: &str) -> Result<Vec<String>, CrowdError> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| CrowdError::MissingColumn(column.to_string()))?;
        Ok(self
            .rows
            .iter()
            .filter_map(|r| r.get(idx).and_then(cell_text))
            .collect())
    }
}

/// Text form of a cell; JSON null has none
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// One row of the backing table, typed
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub index: usize,
    pub total_attendees: u64,
    pub raised_hands: u64,
    pub percentage_with_hands_up: Option<f64>,
    pub caption: Option<String>,
    pub file_name: Option<RawDescriptor>,
    pub raw: Option<Value>,
}

/// Full result of the fixed table query
#[derive(Debug, Clone)]
pub struct Snapshot {
    result: ResultSet,
    fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(result: ResultSet) -> Self {
        Self {
            result,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.result.columns
    }

    pub fn result(&self) -> &ResultSet {
        &self.result
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.len()
    }

    /// Columns shown in the table view
    pub fn visible_columns(&self) -> Vec<(usize, &Column)> {
        self.result
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                !HIDDEN_COLUMNS
                    .iter()
                    .any(|hidden| c.name.eq_ignore_ascii_case(hidden))
            })
            .collect()
    }

    /// Parse one row into a [`SessionRecord`]
    pub fn record(&self, index: usize) -> Result<SessionRecord, CrowdError> {
        if !self.contains(index) {
            return Err(CrowdError::InvalidSelection {
                index,
                len: self.len(),
            });
        }
        let cell = |name: &str| self.result.cell(index, name).unwrap_or(&Value::Null);

        let total_attendees = parse_count(cell(TOTAL_ATTENDEES))
            .map_err(|reason| CrowdError::invalid_row(index, format!("{TOTAL_ATTENDEES}: {reason}")))?;
        let raised_hands = parse_count(cell(RAISED_HANDS))
            .map_err(|reason| CrowdError::invalid_row(index, format!("{RAISED_HANDS}: {reason}")))?;
        let percentage_with_hands_up = parse_optional_float(cell(PERCENTAGE_WITH_HANDS_UP))
            .map_err(|reason| {
                CrowdError::invalid_row(index, format!("{PERCENTAGE_WITH_HANDS_UP}: {reason}"))
            })?;

        let file_name = match cell(FILE_NAME) {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            other => Some(RawDescriptor::from(other)),
        };
        let raw = match cell(RAW) {
            Value::Null => None,
            other => Some(other.clone()),
        };

        Ok(SessionRecord {
            index,
            total_attendees,
            raised_hands,
            percentage_with_hands_up,
            caption: cell_text(cell(CAPTION)),
            file_name,
            raw,
        })
    }

    /// Visible columns as an Arrow batch, prefixed with the row number
    pub fn to_record_batch(&self) -> Result<RecordBatch, CrowdError> {
        let visible = self.visible_columns();

        let mut fields = vec![Field::new("#", DataType::UInt64, false)];
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(UInt64Array::from(
            (0..self.len() as u64).collect::<Vec<_>>(),
        ))];

        for (idx, column) in visible {
            fields.push(Field::new(column.name.as_str(), DataType::Utf8, true));
            let values: Vec<Option<String>> = self
                .result
                .rows
                .iter()
                .map(|row| row.get(idx).and_then(cell_text))
                .collect();
            arrays.push(Arc::new(StringArray::from(values)));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Table view rendered with Arrow's pretty printer
    pub fn pretty(&self) -> Result<String, CrowdError> {
        let batch = self.to_record_batch()?;
        Ok(arrow_cast::pretty::pretty_format_batches(&[batch])?.to_string())
    }
}

fn parse_count(value: &Value) -> Result<u64, String> {
    match value {
        Value::Null => Err("missing value".to_string()),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(integral_count))
            .ok_or_else(|| format!("{n} is not a non-negative integer")),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_count))
                .ok_or_else(|| format!("{s:?} is not a non-negative integer"))
        }
        other => Err(format!("unexpected value {other}")),
    }
}

fn integral_count(f: f64) -> Option<u64> {
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0).then_some(f as u64)
}

fn parse_optional_float(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{n} is not a number")),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("{s:?} is not a number")),
        other => Err(format!("unexpected value {other}")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn crowd_columns() -> Vec<Column> {
        vec![
            Column::new(TOTAL_ATTENDEES, "fixed"),
            Column::new(RAISED_HANDS, "fixed"),
            Column::new(PERCENTAGE_WITH_HANDS_UP, "real"),
            Column::new(CAPTION, "text"),
            Column::new(FILE_NAME, "object"),
            Column::new(RAW, "variant"),
        ]
    }

    pub(crate) fn crowd_row(total: u64, hands: u64, pct: Option<f64>, path: &str) -> Vec<Value> {
        vec![
            json!(total.to_string()),
            json!(hands.to_string()),
            pct.map(|p| json!(format!("{p:.6}"))).unwrap_or(Value::Null),
            json!(format!("Session at {path}")),
            json!(format!(
                r#"{{"STAGE":"@KAMESH_DEMOS.CONFERENCES.SNAPS","RELATIVE_PATH":"{path}","SIZE":2048,"CONTENT_TYPE":"image/jpeg"}}"#
            )),
            json!("{}"),
        ]
    }

    #[test]
    fn test_record_parses_string_encoded_numbers() {
        let snapshot = Snapshot::new(ResultSet::new(
            crowd_columns(),
            vec![crowd_row(50, 12, Some(24.0), "a.jpg")],
        ));

        let record = snapshot.record(0).expect("row parses");
        assert_eq!(record.total_attendees, 50);
        assert_eq!(record.raised_hands, 12);
        assert_eq!(record.percentage_with_hands_up, Some(24.0));
        assert_eq!(record.caption.as_deref(), Some("Session at a.jpg"));
        assert!(matches!(record.file_name, Some(RawDescriptor::Encoded(_))));
    }

    #[test]
    fn test_record_accepts_json_numbers_and_null_percentage() {
        let snapshot = Snapshot::new(ResultSet::new(
            crowd_columns(),
            vec![vec![
                json!(40),
                json!(10.0),
                Value::Null,
                Value::Null,
                json!({"RELATIVE_PATH": "b.png"}),
                Value::Null,
            ]],
        ));

        let record = snapshot.record(0).expect("row parses");
        assert_eq!(record.total_attendees, 40);
        assert_eq!(record.raised_hands, 10);
        assert_eq!(record.percentage_with_hands_up, None);
        assert!(matches!(record.file_name, Some(RawDescriptor::Structured(_))));
        assert!(record.raw.is_none());
    }

    #[test]
    fn test_record_out_of_bounds() {
        let snapshot = Snapshot::new(ResultSet::new(
            crowd_columns(),
            vec![crowd_row(5, 1, None, "a.jpg")],
        ));
        match snapshot.record(3) {
            Err(CrowdError::InvalidSelection { index: 3, len: 1 }) => {}
            other => panic!("expected invalid selection, got {other:?}"),
        }
    }

    #[test]
    fn test_record_rejects_negative_counts() {
        let mut row = crowd_row(5, 1, None, "a.jpg");
        row[0] = json!("-3");
        let snapshot = Snapshot::new(ResultSet::new(crowd_columns(), vec![row]));
        assert!(matches!(
            snapshot.record(0),
            Err(CrowdError::InvalidRow { index: 0, .. })
        ));
    }

    #[test]
    fn test_visible_columns_hide_detail_fields() {
        let snapshot = Snapshot::new(ResultSet::new(crowd_columns(), vec![]));
        let names: Vec<&str> = snapshot
            .visible_columns()
            .into_iter()
            .map(|(_, c)| c.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![TOTAL_ATTENDEES, RAISED_HANDS, PERCENTAGE_WITH_HANDS_UP]
        );
    }

    #[test]
    fn test_pretty_table() {
        let snapshot = Snapshot::new(ResultSet::new(
            crowd_columns(),
            vec![
                crowd_row(50, 12, Some(24.0), "a.jpg"),
                crowd_row(20, 5, None, "b.jpg"),
            ],
        ));
        let table = snapshot.pretty().expect("renders");
        assert!(table.contains("TOTAL_ATTENDEES"));
        assert!(table.contains("24.000000"));
        assert!(!table.contains("FILE_NAME"));
        assert!(!table.contains("RELATIVE_PATH"));
    }

    #[test]
    fn test_result_set_strings() {
        let result = ResultSet::new(
            vec![Column::new("created_on", "text"), Column::new("name", "text")],
            vec![
                vec![json!("2025-01-01"), json!("KAMESH_DEMOS")],
                vec![json!("2025-01-02"), Value::Null],
            ],
        );
        assert_eq!(result.strings("NAME").expect("column"), vec!["KAMESH_DEMOS"]);
        assert!(matches!(
            result.strings("missing"),
            Err(CrowdError::MissingColumn(_))
        ));
    }
}
