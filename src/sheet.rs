// src/sheet.rs
//
// Raw spreadsheet access: loads the first worksheet of an uploaded workbook
// into normalized rows, and resolves heterogeneous cell values to calendar
// days. Everything downstream (scanner, reconciler) works on these rows.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("could not read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook contains no worksheets")]
    NoWorksheet,
}

// --- Cell Normalizer ---

/// A normalized scalar cell value. Strings are trimmed, absent/unusable cells
/// collapse to `Empty`, native spreadsheet dates become `Day` with the
/// time-of-day already discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Day(NaiveDate),
    Number(f64),
    Empty,
}

impl Cell {
    pub fn from_data(value: &Data) -> Self {
        match value {
            Data::String(s) | Data::DurationIso(s) => text_cell(s),
            Data::DateTimeIso(s) => match resolve_day_str(s.trim()) {
                Some(day) => Cell::Day(day),
                None => text_cell(s),
            },
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(naive) => Cell::Day(naive.date()),
                None => Cell::Empty,
            },
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }

    /// Idempotent re-normalization: trimming an already-trimmed string (or any
    /// non-string cell) returns the value unchanged.
    pub fn normalize(self) -> Self {
        match self {
            Cell::Text(s) => text_cell(&s),
            other => other,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// String form used when a cell feeds a free-text field (employee ids and
    /// punch times). Numeric ids like `1171.0` render without the fraction.
    pub fn display_string(&self) -> Option<String> {
        match self {
            Cell::Text(s) => Some(s.clone()),
            Cell::Day(d) => Some(d.format("%Y-%m-%d").to_string()),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            Cell::Number(n) => Some(n.to_string()),
            Cell::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

fn text_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Cell::Empty
    } else {
        Cell::Text(trimmed.to_string())
    }
}

// --- Date Resolver ---

// Formats seen across real biometric exports. Day-first variants are tried
// before month-first, so an ambiguous "03/04/2025" reads as 3 April.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%Y/%m/%d",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Resolve a cell to a calendar day, discarding any time-of-day component.
/// Returns `None` when the cell does not represent a date.
pub fn resolve_day(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Day(day) => Some(*day),
        Cell::Text(s) => resolve_day_str(s),
        Cell::Number(_) | Cell::Empty => None,
    }
}

fn resolve_day_str(s: &str) -> Option<NaiveDate> {
    for format in DATE_FORMATS {
        if let Ok(day) = NaiveDate::parse_from_str(s, format) {
            return Some(day);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }
    None
}

// --- Workbook loading ---

/// Read the first worksheet of the uploaded workbook into normalized rows.
/// Total unreadability is the only fatal failure in the pipeline; anything
/// row-shaped gets through and is judged by the scanner.
pub fn load_rows(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, SheetError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(SheetError::NoWorksheet)?;
    let range = workbook.worksheet_range(&sheet_name)?;

    // Range coordinates are relative to the first used cell; pad the leading
    // columns so cell indices stay absolute for the positional layout.
    let start_col = range.start().map_or(0, |(_, col)| col as usize);
    let mut rows = Vec::with_capacity(range.height());
    for raw_row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col];
        cells.extend(raw_row.iter().map(Cell::from_data));
        rows.push(cells);
    }
    Ok(rows)
}
