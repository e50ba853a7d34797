// src/reconcile.rs
//
// Directory reconciliation and the outcome ledger. Candidates extracted by
// the scanner are joined against an immutable snapshot of the employee
// directory, notifications are dispatched one at a time in scan order, and
// every candidate terminates as exactly one ledger entry.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::notify::NotificationSink;
use crate::scanner::{scan_rows, CandidateRecord, SheetLayout};
use crate::sheet::{self, Cell, SheetError};

// --- Employee directory ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeEntry {
    #[serde(rename = "employeeId")]
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Read-only view of the directory, fetched in full before a scan starts so
/// the whole batch sees one consistent state.
pub type DirectorySnapshot = HashMap<String, EmployeeEntry>;

/// Parse a roster upload: one employee per row, id/name/email at columns
/// 0/1/2. Rows missing any of the three are skipped.
pub fn parse_roster_rows(rows: &[Vec<Cell>]) -> Vec<EmployeeEntry> {
    rows.iter()
        .filter_map(|row| {
            let field = |col: usize| row.get(col).and_then(Cell::display_string);
            match (field(0), field(1), field(2)) {
                (Some(employee_id), Some(name), Some(email)) => Some(EmployeeEntry {
                    employee_id,
                    name,
                    email,
                }),
                _ => None,
            }
        })
        .collect()
}

// --- Outcome ledger ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeStatus {
    /// Notification accepted by the transport.
    Sent,
    /// Directory entry exists but carries no email address.
    NoEmail,
    /// Dispatch was attempted and failed; detail carries the error.
    SendError,
    /// Attendance exists but the employee is not in the directory.
    Unmatched,
    /// Delivery globally disabled (dry run); nothing was dispatched.
    Skipped,
}

/// One ledger entry per candidate, in scan order. This is the batch's audit
/// trail and the only artifact returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    #[serde(rename = "employeeId")]
    pub employee_id: String,
    pub name: String,
    pub date: NaiveDate,
    #[serde(rename = "inTime")]
    pub in_time: String,
    #[serde(rename = "outTime")]
    pub out_time: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// When false the whole batch runs as a dry run: reconciliation happens,
    /// no notification leaves the process.
    pub enabled: bool,
    /// Upper bound per send, so one unreachable endpoint cannot stall the
    /// rest of the batch.
    pub timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(30),
        }
    }
}

const FALLBACK_NAME: &str = "Employee";

/// Directory name wins over the sheet-captured name; the sheet name is
/// optional free text and less trustworthy.
fn resolve_name(directory_name: Option<&str>, sheet_name: Option<&str>) -> String {
    [directory_name, sheet_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}

fn subject_for(date: NaiveDate) -> String {
    format!("Attendance Report - {}", date.format("%Y-%m-%d"))
}

fn body_for(name: &str, date: NaiveDate, in_time: &str, out_time: &str) -> String {
    format!(
        "Hello {},\n\n\
         Your attendance details for {}:\n\
         In Time: {}\n\
         Out Time: {}\n\n\
         Regards,\nHR Team\n",
        name,
        date.format("%Y-%m-%d"),
        in_time,
        out_time
    )
}

/// Reconcile candidates against the directory and dispatch notifications.
/// Dispatch is sequential and awaited: an outcome is finalized only once its
/// send has actually succeeded, failed, or timed out. Duplicate candidates
/// are not merged; the ledger mirrors the export's granularity.
pub async fn reconcile_candidates(
    candidates: Vec<CandidateRecord>,
    directory: &DirectorySnapshot,
    sink: &dyn NotificationSink,
    policy: &DispatchPolicy,
) -> Vec<OutcomeRecord> {
    let mut ledger = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let outcome = reconcile_one(candidate, directory, sink, policy).await;
        ledger.push(outcome);
    }
    ledger
}

async fn reconcile_one(
    candidate: CandidateRecord,
    directory: &DirectorySnapshot,
    sink: &dyn NotificationSink,
    policy: &DispatchPolicy,
) -> OutcomeRecord {
    let sheet_name = candidate.employee_name.as_deref();

    let outcome = |name: String, status: OutcomeStatus, detail: Option<String>| OutcomeRecord {
        employee_id: candidate.employee_id.clone(),
        name,
        date: candidate.attendance_date,
        in_time: candidate.in_time.clone(),
        out_time: candidate.out_time.clone(),
        status,
        detail,
    };

    let Some(entry) = directory.get(&candidate.employee_id) else {
        warn!(
            "employee {} not found in directory, excluded from notification",
            candidate.employee_id
        );
        return outcome(resolve_name(None, sheet_name), OutcomeStatus::Unmatched, None);
    };

    let name = resolve_name(Some(entry.name.as_str()), sheet_name);

    if entry.email.trim().is_empty() {
        warn!("employee {} has no email address", candidate.employee_id);
        return outcome(name, OutcomeStatus::NoEmail, None);
    }

    if !policy.enabled {
        return outcome(
            name,
            OutcomeStatus::Skipped,
            Some("notification delivery disabled".to_string()),
        );
    }

    let subject = subject_for(candidate.attendance_date);
    let body = body_for(
        &name,
        candidate.attendance_date,
        &candidate.in_time,
        &candidate.out_time,
    );

    match tokio::time::timeout(policy.timeout, sink.send(&entry.email, &subject, &body)).await {
        Ok(Ok(())) => outcome(name, OutcomeStatus::Sent, None),
        Ok(Err(err)) => {
            warn!(
                "sending notification for employee {} failed: {}",
                candidate.employee_id, err
            );
            outcome(name, OutcomeStatus::SendError, Some(err.to_string()))
        }
        Err(_) => {
            warn!(
                "sending notification for employee {} timed out after {:?}",
                candidate.employee_id, policy.timeout
            );
            outcome(
                name,
                OutcomeStatus::SendError,
                Some(format!("send timed out after {}s", policy.timeout.as_secs())),
            )
        }
    }
}

// --- One-pass pipeline ---

/// What the caller gets back: either this complete report (possibly with
/// failed or skipped entries) or a single batch-level error. Never a silently
/// truncated ledger.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub message: String,
    #[serde(rename = "matchedRows")]
    pub matched_rows: usize,
    pub results: Vec<OutcomeRecord>,
}

/// Scan, reconcile and dispatch one uploaded workbook as a single linear
/// pass. Only an unreadable workbook is fatal.
pub async fn process_attendance_sheet(
    bytes: &[u8],
    target_day: NaiveDate,
    directory: &DirectorySnapshot,
    sink: &dyn NotificationSink,
    layout: &SheetLayout,
    policy: &DispatchPolicy,
) -> Result<BatchReport, SheetError> {
    let rows = sheet::load_rows(bytes)?;
    info!("read {} rows from workbook", rows.len());

    let candidates = scan_rows(&rows, target_day, layout);
    info!(
        "{} candidate records matched target day {}",
        candidates.len(),
        target_day
    );

    let results = reconcile_candidates(candidates, directory, sink, policy).await;
    Ok(BatchReport {
        message: "Processing complete".to_string(),
        matched_rows: results.len(),
        results,
    })
}
