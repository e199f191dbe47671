use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::ledger::models::{CaseRecord, CaseStatus, DispatchRecord, Invoice, Stage};

/// Stage progress derived from ledger entries. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaseProgress {
    /// Highest dispatched stage, if any
    pub stage: Option<Stage>,
    pub ordinal: u8,
    pub percent: u8,
}

impl CaseProgress {
    /// Max-fold over the ordinals of `entries`
    pub fn from_ledger(entries: &[DispatchRecord], total_stages: usize) -> Self {
        let stage = entries.iter().map(|entry| entry.stage).max_by_key(Stage::ordinal);
        let ordinal = stage.map(|s| s.ordinal()).unwrap_or(0);

        let percent = if total_stages == 0 {
            0
        } else {
            (usize::from(ordinal) * 100 / total_stages) as u8
        };

        Self {
            stage,
            ordinal,
            percent,
        }
    }
}

/// Row of the case listing
#[derive(Debug, Clone, Serialize)]
pub struct CaseSummary {
    pub case_number: String,
    pub client_id: String,
    pub client_tax_id: Option<String>,
    pub client_company_name: Option<String>,
    /// Minor currency units
    pub remaining_amount: i64,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub days_past_due: Option<i64>,
    pub progress_percent: u8,
    pub current_stage: Option<Stage>,
    pub status: CaseStatus,
}

impl CaseSummary {
    pub fn build(record: &CaseRecord, entries: &[DispatchRecord], total_stages: usize, today: NaiveDate) -> Self {
        let progress = CaseProgress::from_ledger(entries, total_stages);

        Self {
            case_number: record.case.case_number.clone(),
            client_id: record.case.client_id.clone(),
            client_tax_id: record.case.client_tax_id.clone(),
            client_company_name: record.case.client_company_name.clone(),
            remaining_amount: record.invoice.remaining_amount,
            currency: record.invoice.currency.clone(),
            due_date: record.invoice.due_date,
            days_past_due: record.invoice.days_past_due(today),
            progress_percent: progress.percent,
            current_stage: progress.stage,
            status: record.case.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseDetail {
    pub summary: CaseSummary,
    pub invoice: Invoice,
    /// Newest first
    pub dispatches: Vec<DispatchRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseDetail {
    pub fn build(record: CaseRecord, mut entries: Vec<DispatchRecord>, total_stages: usize, today: NaiveDate) -> Self {
        entries.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        let summary = CaseSummary::build(&record, &entries, total_stages, today);

        Self {
            summary,
            created_at: record.case.created_at,
            updated_at: record.case.updated_at,
            invoice: record.invoice,
            dispatches: entries,
        }
    }
}
