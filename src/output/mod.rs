/// Tabular output: an in-memory table of typed cells, and writers that
/// emit it as CSV (`csv`) or as sheets of an XLSX workbook (`xlsx`).

pub mod csv;
pub mod xlsx;

use chrono::NaiveDateTime;
use serde_json::Value;

/// Timestamp rendering used in CSV output.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static NULL_CELL: Cell = Cell::Null;

/// One cell of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
    Timestamp(NaiveDateTime),
}

impl Cell {
    /// Text rendering; `Null` is the empty string.
    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Integer(i) => i.to_string(),
            Cell::Number(n) => n.to_string(),
            Cell::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(ts: NaiveDateTime) -> Self {
        Cell::Timestamp(ts)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Cell::Null, Into::into)
    }
}

impl From<&Value> for Cell {
    /// Scalars map to their natural cell; arrays and objects are kept as
    /// compact JSON text.
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Text(b.to_string()),
            Value::String(s) => Cell::Text(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Integer(i),
                None => n.as_f64().map_or(Cell::Null, Cell::Number),
            },
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Ordered columns and rows of cells.
///
/// Rows shorter than the header are padded with nulls on output; longer rows
/// are truncated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<I, T>(columns: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows as exactly `columns.len()` cells each.
    pub(crate) fn aligned_rows(&self) -> impl Iterator<Item = Vec<&Cell>> {
        let width = self.columns.len();
        self.rows.iter().map(move |row| {
            (0..width).map(|i| row.get(i).unwrap_or(&NULL_CELL)).collect()
        })
    }
}
