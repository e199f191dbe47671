use async_trait::async_trait;
use chrono::NaiveDate;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::traits::{ClientProfile, InvoiceFilter, InvoiceSource, Page, SourceInvoice};
use crate::error::{AppError, AppResult, SourceError};
use crate::ledger::models::ExternalStatus;

const LIST_FIELDS: &str =
    "uuid,number,invoice_date,payment_date,gross_price,paid_price,currency,status,client_id,client_tax_code,client_company_name";

/// inFakt REST client (API v3)
pub struct InfaktClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl InfaktClient {
    pub fn new(base_url: String, api_key: String, requests_per_minute: u32) -> AppResult<Self> {
        let per_minute = NonZeroU32::new(requests_per_minute).ok_or_else(|| {
            AppError::Config("source_requests_per_minute must be greater than zero".to_string())
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        what: &str,
    ) -> Result<T, SourceError> {
        // Provider enforces a call-volume limit; wait for a slot instead of getting 429s.
        self.limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .header("X-inFakt-ApiKey", &self.api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(what.to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            warn!("⚠️ inFakt returned {} for {}", status, what);
            return Err(SourceError::Transient(format!("{} returned HTTP {}", what, status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Malformed(format!(
                "{} returned HTTP {}: {}",
                what, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Malformed(format!("{}: {}", what, e)))
    }
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    #[serde(default)]
    entities: Vec<InfaktInvoice>,
}

#[derive(Debug, Deserialize)]
struct InfaktInvoice {
    uuid: String,
    number: String,
    invoice_date: Option<NaiveDate>,
    payment_date: Option<NaiveDate>,
    gross_price: Option<i64>,
    paid_price: Option<i64>,
    currency: Option<String>,
    status: ExternalStatus,
    client_id: Option<serde_json::Value>,
    client_tax_code: Option<String>,
    client_company_name: Option<String>,
}

impl TryFrom<InfaktInvoice> for SourceInvoice {
    type Error = SourceError;

    /// A missing gross amount would read as "nothing owed", so it is rejected.
    fn try_from(inv: InfaktInvoice) -> Result<Self, Self::Error> {
        let gross_amount = inv.gross_price.ok_or_else(|| {
            SourceError::Malformed(format!("invoice {} has no gross_price", inv.number))
        })?;

        Ok(SourceInvoice {
            external_id: inv.uuid,
            number: inv.number,
            invoice_date: inv.invoice_date,
            due_date: inv.payment_date,
            gross_amount,
            paid_amount: inv.paid_price.unwrap_or(0),
            currency: inv.currency.unwrap_or_else(|| "PLN".to_string()),
            status: inv.status,
            client_id: inv.client_id.as_ref().and_then(json_id),
            client_tax_id: inv.client_tax_code.filter(|s| !s.is_empty()),
            client_company_name: inv.client_company_name.filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ClientPayload {
    #[serde(default)]
    id: serde_json::Value,
    company_name: Option<String>,
    nip: Option<String>,
    email: Option<String>,
    street: Option<String>,
    street_number: Option<String>,
    flat_number: Option<String>,
    postal_code: Option<String>,
    city: Option<String>,
}

/// Ids come back as numbers or strings depending on the endpoint
fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl InvoiceSource for InfaktClient {
    fn name(&self) -> &'static str {
        "inFakt"
    }

    async fn list(&self, filter: &InvoiceFilter, page: Page) -> Result<Vec<SourceInvoice>, SourceError> {
        let mut invoices = Vec::new();

        // The API filters one status per query
        for status in &filter.statuses {
            let query = vec![
                ("offset".to_string(), page.offset.to_string()),
                ("limit".to_string(), page.limit.to_string()),
                ("fields".to_string(), LIST_FIELDS.to_string()),
                ("order".to_string(), "invoice_date desc".to_string()),
                ("q[payment_date_eq]".to_string(), filter.due_on.format("%Y-%m-%d").to_string()),
                ("q[status_eq]".to_string(), status.as_str().to_string()),
            ];
            let list: InvoiceList = self.get_json("/invoices.json", &query, "invoice list").await?;
            for entity in list.entities {
                match SourceInvoice::try_from(entity) {
                    Ok(invoice) => invoices.push(invoice),
                    // One broken row must not hide the rest of the page
                    Err(e) => warn!("⚠️ Skipping listed invoice: {}", e),
                }
            }
        }

        Ok(invoices)
    }

    async fn detail(&self, external_id: &str) -> Result<SourceInvoice, SourceError> {
        let invoice: InfaktInvoice = self
            .get_json(
                &format!("/invoices/{}.json", external_id),
                &[],
                &format!("invoice {}", external_id),
            )
            .await?;
        SourceInvoice::try_from(invoice)
    }

    async fn client_detail(&self, client_id: &str) -> Result<ClientProfile, SourceError> {
        let client: ClientPayload = self
            .get_json(
                &format!("/clients/{}.json", client_id),
                &[],
                &format!("client {}", client_id),
            )
            .await?;

        Ok(ClientProfile {
            client_id: json_id(&client.id).unwrap_or_else(|| client_id.to_string()),
            company_name: client.company_name,
            tax_id: client.nip,
            email: client.email,
            street: client.street,
            street_number: client.street_number,
            flat_number: client.flat_number,
            postal_code: client.postal_code,
            city: client.city,
        })
    }
}
