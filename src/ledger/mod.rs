// Case, invoice and dispatch ledger persistence
pub mod models;
pub mod repository;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{AppError, AppResult};
use models::*;

/// Persistence seam for everything the stage engine reads or writes.
///
/// The dispatch ledger is append-only: `record_dispatch` is insert-or-ignore
/// on (invoice_number, stage) and reports whether a row was written.
#[async_trait]
pub trait DunningStore: Send + Sync {
    // ========== CASES & INVOICES ==========

    async fn case_exists(&self, invoice_number: &str) -> AppResult<bool>;

    /// Create invoice and case atomically. Returns false when the invoice was already known.
    async fn create_case(&self, new_case: &NewCase) -> AppResult<bool>;

    async fn get_case(&self, case_number: &str) -> AppResult<Option<CaseRecord>>;

    async fn list_cases(&self, status: Option<CaseStatus>) -> AppResult<Vec<CaseRecord>>;

    /// Active cases whose invoice is due on one of `due_dates`
    async fn active_cases_due_on(&self, due_dates: &[NaiveDate]) -> AppResult<Vec<CaseRecord>>;

    async fn active_cases_created_since(&self, since: DateTime<Utc>) -> AppResult<Vec<CaseRecord>>;

    async fn update_financials(&self, invoice_number: &str, update: &FinancialUpdate) -> AppResult<()>;

    async fn set_debt_status(&self, invoice_number: &str, label: &str) -> AppResult<()>;

    /// Conditional status change; returns false when the case was no longer in `from`.
    async fn transition_case(
        &self,
        case_number: &str,
        from: CaseStatus,
        to: CaseStatus,
    ) -> AppResult<bool>;

    // ========== DISPATCH LEDGER ==========

    async fn has_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<bool>;

    async fn find_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<Option<DispatchRecord>>;

    async fn record_dispatch(&self, dispatch: NewDispatch) -> AppResult<bool>;

    /// Newest first
    async fn dispatches_for(&self, invoice_number: &str) -> AppResult<Vec<DispatchRecord>>;

    // ========== OPERATIONAL STATUS LOG ==========

    async fn append_sync_run(&self, run: &SyncRun) -> AppResult<()>;

    async fn recent_sync_runs(&self, limit: i64) -> AppResult<Vec<SyncRun>>;
}

/// Validate case status state machine transitions
/// Valid transitions:
/// - Active → ClosedPaid, ClosedUnpaid
/// - Terminal states → NO TRANSITIONS ALLOWED
pub fn validate_transition(from: CaseStatus, to: CaseStatus) -> AppResult<()> {
    match (from, to) {
        (CaseStatus::Active, CaseStatus::ClosedPaid)
        | (CaseStatus::Active, CaseStatus::ClosedUnpaid) => Ok(()),
        _ => Err(AppError::InvalidTransition { from, to }),
    }
}
