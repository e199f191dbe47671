use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Escalation stage of the dunning sequence.
///
/// Declaration order is escalation order; `ordinal()` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[sqlx(type_name = "dunning_stage", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reminder,
    Overdue,
    Demand,
    PreEscalation,
    Escalated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reminder => "reminder",
            Stage::Overdue => "overdue",
            Stage::Demand => "demand",
            Stage::PreEscalation => "pre_escalation",
            Stage::Escalated => "escalated",
        }
    }

    /// Every stage in escalation order
    pub fn all() -> Vec<Stage> {
        vec![
            Stage::Reminder,
            Stage::Overdue,
            Stage::Demand,
            Stage::PreEscalation,
            Stage::Escalated,
        ]
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Stage::Reminder => 1,
            Stage::Overdue => 2,
            Stage::Demand => 3,
            Stage::PreEscalation => 4,
            Stage::Escalated => 5,
        }
    }

    /// Offset in days relative to the due date when settings hold nothing
    pub fn default_offset(&self) -> i32 {
        match self {
            Stage::Reminder => -1,
            Stage::Overdue => 7,
            Stage::Demand => 14,
            Stage::PreEscalation => 21,
            Stage::Escalated => 30,
        }
    }

    /// Label shown to operators and stored as the invoice's debt status
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Reminder => "Reminder of upcoming payment due date",
            Stage::Overdue => "Notice of missed payment due date",
            Stage::Demand => "Demand for payment",
            Stage::PreEscalation => {
                "Notice of intent to refer to external collection and publish on the debt exchange"
            }
            Stage::Escalated => "Case referred to external collection agency",
        }
    }

    pub fn template_key(&self) -> &'static str {
        match self {
            Stage::Reminder => "stage_1",
            Stage::Overdue => "stage_2",
            Stage::Demand => "stage_3",
            Stage::PreEscalation => "stage_4",
            Stage::Escalated => "stage_5",
        }
    }
}

impl FromStr for Stage {
    type Err = AppError;

    /// Accepts the stage key (`overdue`) or the template key (`stage_2`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Stage::all()
            .into_iter()
            .find(|stage| stage.as_str() == needle || stage.template_key() == needle)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown stage: {}", s)))
    }
}

/// Case lifecycle status
///
/// `ClosedPaid` and `ClosedUnpaid` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "case_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Active,
    ClosedPaid,
    ClosedUnpaid,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaseStatus::Active => "active",
            CaseStatus::ClosedPaid => "closed_paid",
            CaseStatus::ClosedUnpaid => "closed_unpaid",
        };
        write!(f, "{}", s)
    }
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaseStatus::Active)
    }
}

/// How a ledger entry came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "dispatch_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Automatic,
    Manual,
}

/// Invoice status as reported by the external system of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalStatus {
    Draft,
    Sent,
    Printed,
    Paid,
    #[serde(other)]
    Unknown,
}

impl ExternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalStatus::Draft => "draft",
            ExternalStatus::Sent => "sent",
            ExternalStatus::Printed => "printed",
            ExternalStatus::Paid => "paid",
            ExternalStatus::Unknown => "unknown",
        }
    }
}

/// Amount still owed, in minor currency units
pub fn remaining_amount(gross: i64, paid: i64) -> i64 {
    (gross - paid).max(0)
}

/// Case entity - one debt-collection workflow per invoice
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Case {
    /// Equal to the invoice number
    pub case_number: String,
    pub client_id: String,
    pub client_tax_id: Option<String>,
    pub client_company_name: Option<String>,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Financial snapshot of the invoice behind a case
///
/// Amounts are integer minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_number: String,
    /// Identifier used to re-fetch the invoice from the source
    pub external_id: String,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub gross_amount: i64,
    pub paid_amount: i64,
    pub remaining_amount: i64,
    pub currency: String,
    pub external_status: String,
    pub debt_status: Option<String>,
    /// Comma-separated list, as received from the client profile
    pub recipient_emails: Option<String>,
    pub client_address: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Signed day distance between `today` and the due date
    pub fn days_past_due(&self, today: NaiveDate) -> Option<i64> {
        self.due_date.map(|due| (today - due).num_days())
    }

    /// Syntactically valid addresses from the recipient field
    pub fn recipients(&self) -> Vec<String> {
        parse_recipients(self.recipient_emails.as_deref().unwrap_or_default())
    }
}

/// Split a comma-separated recipient field into usable addresses
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|candidate| validator::validate_email(*candidate))
        .map(str::to_string)
        .collect()
}

/// A case together with its invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case: Case,
    pub invoice: Invoice,
}

/// Ledger entry - one notification actually dispatched
///
/// INVARIANT: (invoice_number, stage) is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DispatchRecord {
    pub id: Uuid,
    pub invoice_number: String,
    pub stage: Stage,
    pub sent_at: DateTime<Utc>,
    pub mode: DispatchMode,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Input for appending to the ledger
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub invoice_number: String,
    pub stage: Stage,
    pub mode: DispatchMode,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl NewDispatch {
    pub fn into_record(self, sent_at: DateTime<Utc>) -> DispatchRecord {
        DispatchRecord {
            id: Uuid::new_v4(),
            invoice_number: self.invoice_number,
            stage: self.stage,
            sent_at,
            mode: self.mode,
            recipient: self.recipient,
            subject: self.subject,
            body: self.body,
        }
    }
}

/// Everything needed to open a new case
#[derive(Debug, Clone)]
pub struct NewCase {
    pub invoice_number: String,
    pub external_id: String,
    pub client_id: String,
    pub client_tax_id: Option<String>,
    pub client_company_name: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub gross_amount: i64,
    pub paid_amount: i64,
    pub currency: String,
    pub external_status: ExternalStatus,
    pub recipient_emails: Option<String>,
    pub client_address: Option<String>,
}

/// Refreshed financial state for an existing invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialUpdate {
    pub due_date: Option<NaiveDate>,
    pub gross_amount: i64,
    pub paid_amount: i64,
    pub external_status: ExternalStatus,
}

impl FinancialUpdate {
    pub fn remaining(&self) -> i64 {
        remaining_amount(self.gross_amount, self.paid_amount)
    }

    /// Settled in full according to the system of record
    pub fn is_fully_paid(&self) -> bool {
        self.external_status == ExternalStatus::Paid || self.paid_amount >= self.gross_amount
    }
}

/// Kind of batch run recorded in the operational status log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "sync_run_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Reconciliation,
    Dispatch,
    Full,
}

/// Per-category failure counters of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorCounts {
    pub source: u32,
    pub template: u32,
    pub delivery: u32,
    pub persistence: u32,
}

impl ErrorCounts {
    pub fn total(&self) -> u32 {
        self.source + self.template + self.delivery + self.persistence
    }

    pub fn merge(&mut self, other: &ErrorCounts) {
        self.source += other.source;
        self.template += other.template;
        self.delivery += other.delivery;
        self.persistence += other.persistence;
    }
}

/// Operational status record - one per batch run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncRun {
    pub id: Uuid,
    pub run_type: RunType,
    pub processed: i32,
    pub duration_seconds: f64,
    pub created: i32,
    pub updated: i32,
    pub closed: i32,
    pub external_calls: i32,
    pub errors: sqlx::types::Json<ErrorCounts>,
    pub created_at: DateTime<Utc>,
}
