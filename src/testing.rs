// Fixtures and scripted collaborators for engine tests

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::adapters::traits::{
    ClientProfile, InvoiceFilter, InvoiceSource, Notifier, Page, SettingsStore, SourceInvoice,
};
use crate::error::{AppError, AppResult, DeliveryError, SourceError};
use crate::ledger::memory::InMemoryLedger;
use crate::ledger::models::{
    remaining_amount, Case, CaseRecord, CaseStatus, DispatchRecord, ExternalStatus, FinancialUpdate,
    Invoice, NewCase, NewDispatch, Stage, SyncRun,
};
use crate::ledger::DunningStore;
use crate::notifications::templates::{CreditorDetails, MessageTemplates};

pub const CLIENT_EMAIL: &str = "biuro@klient.pl";

pub fn new_case(number: &str, due: NaiveDate, gross: i64, paid: i64) -> NewCase {
    NewCase {
        invoice_number: number.to_string(),
        external_id: format!("uuid-{}", number),
        client_id: "7".to_string(),
        client_tax_id: Some("5250001009".to_string()),
        client_company_name: Some("Klient Sp. z o.o.".to_string()),
        invoice_date: Some(due - chrono::Duration::days(14)),
        due_date: Some(due),
        gross_amount: gross,
        paid_amount: paid,
        currency: "PLN".to_string(),
        external_status: ExternalStatus::Sent,
        recipient_emails: Some(CLIENT_EMAIL.to_string()),
        client_address: Some("00-950, Marszałkowska 10/4, Warszawa".to_string()),
    }
}

pub fn case_record(number: &str, due: NaiveDate, gross: i64, paid: i64) -> CaseRecord {
    let new = new_case(number, due, gross, paid);
    let now = Utc::now();
    CaseRecord {
        case: Case {
            case_number: new.invoice_number.clone(),
            client_id: new.client_id,
            client_tax_id: new.client_tax_id,
            client_company_name: new.client_company_name,
            status: CaseStatus::Active,
            created_at: now,
            updated_at: now,
        },
        invoice: Invoice {
            invoice_number: new.invoice_number,
            external_id: new.external_id,
            invoice_date: new.invoice_date,
            due_date: new.due_date,
            gross_amount: gross,
            paid_amount: paid,
            remaining_amount: remaining_amount(gross, paid),
            currency: new.currency,
            external_status: new.external_status.as_str().to_string(),
            debt_status: None,
            recipient_emails: new.recipient_emails,
            client_address: new.client_address,
            updated_at: now,
        },
    }
}

pub fn source_invoice(number: &str, due: NaiveDate, gross: i64, paid: i64, status: ExternalStatus) -> SourceInvoice {
    SourceInvoice {
        external_id: format!("uuid-{}", number),
        number: number.to_string(),
        invoice_date: Some(due - chrono::Duration::days(14)),
        due_date: Some(due),
        gross_amount: gross,
        paid_amount: paid,
        currency: "PLN".to_string(),
        status,
        client_id: Some("7".to_string()),
        client_tax_id: Some("5250001009".to_string()),
        client_company_name: Some("Klient Sp. z o.o.".to_string()),
    }
}

pub fn templates() -> MessageTemplates {
    MessageTemplates::builtin(CreditorDetails {
        name: "Laboratorium Sp. z o.o.".to_string(),
        email: "rozliczenia@lab.pl".to_string(),
        phone: "451000000".to_string(),
        bank_account: "27 1140 0000 0000 0000 0000 1001".to_string(),
    })
}

/// Records every delivery attempt; addresses in `rejecting` always fail transiently
#[derive(Default)]
pub struct FakeNotifier {
    pub attempts: AtomicU32,
    delivered: Mutex<Vec<(String, String)>>,
    rejecting: HashSet<String>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            rejecting: addresses.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// (address, subject) pairs that went through
    pub async fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, address: &str, subject: &str, _body_html: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.rejecting.contains(address) || self.rejecting.contains("*") {
            return Err(DeliveryError::Transport {
                address: address.to_string(),
                message: "connection reset".to_string(),
            });
        }

        self.delivered
            .lock()
            .await
            .push((address.to_string(), subject.to_string()));
        Ok(())
    }
}

/// Invoice source serving canned listings and details
#[derive(Default)]
pub struct FakeSource {
    listings: Mutex<HashMap<NaiveDate, Vec<SourceInvoice>>>,
    details: Mutex<HashMap<String, SourceInvoice>>,
    clients: Mutex<HashMap<String, ClientProfile>>,
    /// Remaining transient failures per external id
    flaky: Mutex<HashMap<String, u32>>,
    /// Every listing page comes back full, whatever the filter
    endless: AtomicBool,
    listing_down: AtomicBool,
    pub list_calls: AtomicU32,
    pub detail_calls: AtomicU32,
    pub client_calls: AtomicU32,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `invoice` show up in listings for its due date and in detail lookups
    pub async fn publish(&self, invoice: SourceInvoice) {
        if let Some(due) = invoice.due_date {
            self.listings.lock().await.entry(due).or_default().push(invoice.clone());
        }
        self.set_detail(invoice).await;
    }

    pub async fn set_detail(&self, invoice: SourceInvoice) {
        self.details
            .lock()
            .await
            .insert(invoice.external_id.clone(), invoice);
    }

    pub async fn add_client(&self, profile: ClientProfile) {
        self.clients
            .lock()
            .await
            .insert(profile.client_id.clone(), profile);
    }

    pub async fn fail_transiently(&self, external_id: &str, times: u32) {
        self.flaky.lock().await.insert(external_id.to_string(), times);
    }

    pub fn endless() -> Self {
        let source = Self::default();
        source.endless.store(true, Ordering::SeqCst);
        source
    }

    /// Listing calls fail transiently from now on; details keep working
    pub fn take_listing_down(&self) {
        self.listing_down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InvoiceSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list(&self, filter: &InvoiceFilter, page: Page) -> Result<Vec<SourceInvoice>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self.listing_down.load(Ordering::SeqCst) {
            return Err(SourceError::Transient("listing unavailable".to_string()));
        }

        if self.endless.load(Ordering::SeqCst) {
            return Ok((page.offset..page.offset + page.limit)
                .map(|n| {
                    let number = format!("FV/{}/2024", n + 1);
                    source_invoice(&number, filter.due_on, 10_000, 0, ExternalStatus::Sent)
                })
                .collect());
        }

        let listings = self.listings.lock().await;
        let matching: Vec<SourceInvoice> = listings
            .get(&filter.due_on)
            .map(|invoices| {
                invoices
                    .iter()
                    .filter(|inv| filter.statuses.contains(&inv.status))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn detail(&self, external_id: &str) -> Result<SourceInvoice, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(remaining) = self.flaky.lock().await.get_mut(external_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Transient(format!("{} timed out", external_id)));
            }
        }

        self.details
            .lock()
            .await
            .get(external_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(external_id.to_string()))
    }

    async fn client_detail(&self, client_id: &str) -> Result<ClientProfile, SourceError> {
        self.client_calls.fetch_add(1, Ordering::SeqCst);

        self.clients
            .lock()
            .await
            .get(client_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("client {}", client_id)))
    }
}

/// Ledger whose selected operations fail as if the database timed out
pub struct FailingStore {
    inner: Arc<InMemoryLedger>,
    candidate_queries: bool,
    updates_for: HashSet<String>,
    dispatches_for: HashSet<String>,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            candidate_queries: false,
            updates_for: HashSet::new(),
            dispatches_for: HashSet::new(),
        }
    }

    /// `active_cases_due_on` and `active_cases_created_since` fail
    pub fn failing_candidate_queries(mut self) -> Self {
        self.candidate_queries = true;
        self
    }

    pub fn failing_updates_for(mut self, invoice_number: &str) -> Self {
        self.updates_for.insert(invoice_number.to_string());
        self
    }

    pub fn failing_dispatch_for(mut self, invoice_number: &str) -> Self {
        self.dispatches_for.insert(invoice_number.to_string());
        self
    }

    fn unavailable() -> AppError {
        AppError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl DunningStore for FailingStore {
    async fn case_exists(&self, invoice_number: &str) -> AppResult<bool> {
        self.inner.case_exists(invoice_number).await
    }

    async fn create_case(&self, new_case: &NewCase) -> AppResult<bool> {
        self.inner.create_case(new_case).await
    }

    async fn get_case(&self, case_number: &str) -> AppResult<Option<CaseRecord>> {
        self.inner.get_case(case_number).await
    }

    async fn list_cases(&self, status: Option<CaseStatus>) -> AppResult<Vec<CaseRecord>> {
        self.inner.list_cases(status).await
    }

    async fn active_cases_due_on(&self, due_dates: &[NaiveDate]) -> AppResult<Vec<CaseRecord>> {
        if self.candidate_queries {
            return Err(Self::unavailable());
        }
        self.inner.active_cases_due_on(due_dates).await
    }

    async fn active_cases_created_since(&self, since: DateTime<Utc>) -> AppResult<Vec<CaseRecord>> {
        if self.candidate_queries {
            return Err(Self::unavailable());
        }
        self.inner.active_cases_created_since(since).await
    }

    async fn update_financials(&self, invoice_number: &str, update: &FinancialUpdate) -> AppResult<()> {
        if self.updates_for.contains(invoice_number) {
            return Err(Self::unavailable());
        }
        self.inner.update_financials(invoice_number, update).await
    }

    async fn set_debt_status(&self, invoice_number: &str, label: &str) -> AppResult<()> {
        self.inner.set_debt_status(invoice_number, label).await
    }

    async fn transition_case(
        &self,
        case_number: &str,
        from: CaseStatus,
        to: CaseStatus,
    ) -> AppResult<bool> {
        self.inner.transition_case(case_number, from, to).await
    }

    async fn has_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<bool> {
        self.inner.has_dispatch(invoice_number, stage).await
    }

    async fn find_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<Option<DispatchRecord>> {
        self.inner.find_dispatch(invoice_number, stage).await
    }

    async fn record_dispatch(&self, dispatch: NewDispatch) -> AppResult<bool> {
        if self.dispatches_for.contains(&dispatch.invoice_number) {
            return Err(Self::unavailable());
        }
        self.inner.record_dispatch(dispatch).await
    }

    async fn dispatches_for(&self, invoice_number: &str) -> AppResult<Vec<DispatchRecord>> {
        self.inner.dispatches_for(invoice_number).await
    }

    async fn append_sync_run(&self, run: &SyncRun) -> AppResult<()> {
        self.inner.append_sync_run(run).await
    }

    async fn recent_sync_runs(&self, limit: i64) -> AppResult<Vec<SyncRun>> {
        self.inner.recent_sync_runs(limit).await
    }
}

#[async_trait]
impl SettingsStore for FailingStore {
    async fn stage_offsets(&self) -> AppResult<HashMap<Stage, i32>> {
        self.inner.stage_offsets().await
    }

    async fn save_stage_offsets(&self, offsets: &HashMap<Stage, i32>) -> AppResult<()> {
        self.inner.save_stage_offsets(offsets).await
    }
}
