// src/scanner.rs
//
// Layout-aware row scanner. Biometric exports arrive in two shapes: a
// block-style layout where labelled header rows ("Emp Code:", "Employee
// Name :", "Att. Date") introduce each employee's section, and a compact
// positional layout where the date and punch times sit at fixed column
// offsets. The scanner walks the sheet once, carrying the most recently seen
// employee as a running cursor, and emits a candidate record for every data
// row that lands on the target day.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::sheet::{resolve_day, Cell};

pub const EMP_CODE_LABEL: &str = "Emp Code:";
pub const ATT_DATE_LABEL: &str = "Att. Date";
pub const EMPLOYEE_NAME_LABEL: &str = "Employee Name :";

// An "Employee Name :" row does not have to be adjacent to its "Emp Code:"
// row, but it must show up within this many rows of it.
const NAME_LOOKAHEAD_ROWS: usize = 4;

/// Column placement for the positional layout. Exports disagree on where the
/// punch columns sit, so the offsets are configuration, not constants.
#[derive(Debug, Clone)]
pub struct SheetLayout {
    /// Columns probed for a date cell, in order.
    pub date_columns: Vec<usize>,
    /// Punch-time offsets relative to the column the date was found in.
    pub in_time_offset: usize,
    pub out_time_offset: usize,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            date_columns: vec![0, 1],
            in_time_offset: 1,
            out_time_offset: 2,
        }
    }
}

/// What one physical row means, decided by a prioritized list of matchers.
/// Label rows win over positional data rows.
#[derive(Debug, Clone, PartialEq)]
pub enum RowKind {
    EmpCode(String),
    EmployeeName(String),
    AttDateMarker,
    Data {
        date: NaiveDate,
        in_time: Option<String>,
        out_time: Option<String>,
    },
    Blank,
    Unrecognized,
}

pub fn classify_row(row: &[Cell], layout: &SheetLayout) -> RowKind {
    if row.iter().all(Cell::is_empty) {
        return RowKind::Blank;
    }
    if let Some(value) = match_label_value(row, EMP_CODE_LABEL) {
        return RowKind::EmpCode(value);
    }
    if find_label(row, ATT_DATE_LABEL).is_some() {
        return RowKind::AttDateMarker;
    }
    if let Some(value) = match_label_value(row, EMPLOYEE_NAME_LABEL) {
        return RowKind::EmployeeName(value);
    }
    match_data_row(row, layout).unwrap_or(RowKind::Unrecognized)
}

fn find_label(row: &[Cell], label: &str) -> Option<usize> {
    row.iter().position(|cell| cell.as_text() == Some(label))
}

/// The value of a header/value pair is the cell immediately following the
/// label cell on the same row.
fn match_label_value(row: &[Cell], label: &str) -> Option<String> {
    let label_at = find_label(row, label)?;
    row.get(label_at + 1).and_then(Cell::display_string)
}

fn match_data_row(row: &[Cell], layout: &SheetLayout) -> Option<RowKind> {
    for &col in &layout.date_columns {
        let Some(cell) = row.get(col) else { continue };
        if let Some(date) = resolve_day(cell) {
            let punch = |offset: usize| row.get(col + offset).and_then(Cell::display_string);
            return Some(RowKind::Data {
                date,
                in_time: punch(layout.in_time_offset),
                out_time: punch(layout.out_time_offset),
            });
        }
    }
    None
}

/// The scanner's running cursor: whose attendance are we currently reading.
/// Exactly one is live per scan; a new "Emp Code:" row overwrites it.
#[derive(Debug, Default)]
struct EmployeeContext {
    employee_id: Option<String>,
    employee_name: Option<String>,
}

/// An attendance observation for the target day, extracted from the sheet and
/// not yet checked against the employee directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub employee_id: String,
    /// Name as captured from the sheet, if any. The directory wins over this.
    pub employee_name: Option<String>,
    pub attendance_date: NaiveDate,
    pub in_time: String,
    pub out_time: String,
    pub source_row: usize,
}

pub const MISSING_PUNCH: &str = "N/A";

/// Single pass over the sheet. Rows for other days are silently out of scope;
/// a data row seen before any employee block is a structural anomaly and is
/// dropped with a warning. Neither produces a ledger entry.
pub fn scan_rows(
    rows: &[Vec<Cell>],
    target_day: NaiveDate,
    layout: &SheetLayout,
) -> Vec<CandidateRecord> {
    let mut ctx = EmployeeContext::default();
    let mut expecting_block_date = false;
    let mut candidates = Vec::new();

    for (idx, row) in rows.iter().enumerate() {
        // Incomplete physical rows carry nothing usable.
        if row.len() < 2 {
            continue;
        }

        // After an "Att. Date" marker the next row holds the block's date;
        // probe it positionally before any label matching gets a chance.
        let kind = if expecting_block_date {
            match_data_row(row, layout).unwrap_or_else(|| classify_row(row, layout))
        } else {
            classify_row(row, layout)
        };

        match kind {
            RowKind::Blank => continue, // blank rows never touch the context
            RowKind::EmpCode(id) => {
                expecting_block_date = false;
                if id.is_empty() {
                    warn!("row {}: 'Emp Code:' label with empty value, context cleared", idx);
                    ctx = EmployeeContext::default();
                    continue;
                }
                ctx.employee_id = Some(id);
                ctx.employee_name = lookahead_name(rows, idx);
            }
            // Name rows are consumed by the lookahead from their "Emp Code:"
            // row; a stray one outside any window attaches to nothing.
            RowKind::EmployeeName(_) => {
                expecting_block_date = false;
            }
            RowKind::AttDateMarker => {
                expecting_block_date = true;
            }
            RowKind::Data {
                date,
                in_time,
                out_time,
            } => {
                expecting_block_date = false;
                if date != target_day {
                    debug!("row {}: date {} outside target day, skipping", idx, date);
                    continue;
                }
                let Some(employee_id) = ctx.employee_id.clone() else {
                    warn!(
                        "row {}: attendance data before any employee block, dropping",
                        idx
                    );
                    continue;
                };
                candidates.push(CandidateRecord {
                    employee_id,
                    employee_name: ctx.employee_name.clone(),
                    attendance_date: date,
                    in_time: in_time.unwrap_or_else(|| MISSING_PUNCH.to_string()),
                    out_time: out_time.unwrap_or_else(|| MISSING_PUNCH.to_string()),
                    source_row: idx,
                });
            }
            RowKind::Unrecognized => {
                expecting_block_date = false;
            }
        }
    }
    candidates
}

fn lookahead_name(rows: &[Vec<Cell>], emp_code_row: usize) -> Option<String> {
    rows.iter()
        .skip(emp_code_row + 1)
        .take(NAME_LOOKAHEAD_ROWS)
        .find_map(|row| match_label_value(row, EMPLOYEE_NAME_LABEL))
}
