use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppResult, DeliveryError, SourceError};
use crate::ledger::models::{ExternalStatus, FinancialUpdate, Stage};

/// Invoice as reported by the external system of record
///
/// Amounts are minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInvoice {
    pub external_id: String,
    pub number: String,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub gross_amount: i64,
    pub paid_amount: i64,
    pub currency: String,
    pub status: ExternalStatus,
    pub client_id: Option<String>,
    pub client_tax_id: Option<String>,
    pub client_company_name: Option<String>,
}

impl SourceInvoice {
    pub fn financials(&self) -> FinancialUpdate {
        FinancialUpdate {
            due_date: self.due_date,
            gross_amount: self.gross_amount,
            paid_amount: self.paid_amount,
            external_status: self.status,
        }
    }
}

/// Client contact data used for addressing notices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientProfile {
    pub client_id: String,
    pub company_name: Option<String>,
    pub tax_id: Option<String>,
    /// Comma-separated, as stored by the provider
    pub email: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub flat_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

impl ClientProfile {
    /// "00-950, Marszałkowska 10/4, Warszawa"; empty parts are left out.
    pub fn formatted_address(&self) -> Option<String> {
        let mut street_line = self.street.clone().unwrap_or_default();
        if let Some(number) = self.street_number.as_deref().filter(|n| !n.is_empty()) {
            street_line = format!("{} {}", street_line, number).trim().to_string();
            if let Some(flat) = self.flat_number.as_deref().filter(|f| !f.is_empty()) {
                street_line = format!("{}/{}", street_line, flat);
            }
        }

        let parts: Vec<String> = [
            self.postal_code.clone().unwrap_or_default(),
            street_line,
            self.city.clone().unwrap_or_default(),
        ]
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Listing filter understood by the invoice source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub due_on: NaiveDate,
    pub statuses: Vec<ExternalStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    pub fn first(limit: u32) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// External invoice system of record
#[async_trait]
pub trait InvoiceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// An empty page marks the end of the listing.
    async fn list(&self, filter: &InvoiceFilter, page: Page) -> Result<Vec<SourceInvoice>, SourceError>;

    async fn detail(&self, external_id: &str) -> Result<SourceInvoice, SourceError>;

    async fn client_detail(&self, client_id: &str) -> Result<ClientProfile, SourceError>;
}

/// Outbound message transport. Implementations do not retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, address: &str, subject: &str, body_html: &str) -> Result<(), DeliveryError>;
}

/// Runtime-editable stage offsets
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stages without a stored value are absent from the map.
    async fn stage_offsets(&self) -> AppResult<HashMap<Stage, i32>>;

    async fn save_stage_offsets(&self, offsets: &HashMap<Stage, i32>) -> AppResult<()>;
}
