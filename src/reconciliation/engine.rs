use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::adapters::retry::RetryPolicy;
use crate::adapters::traits::{
    ClientProfile, InvoiceFilter, InvoiceSource, Page, SettingsStore, SourceInvoice,
};
use crate::error::{AppError, AppResult};
use crate::ledger::models::{CaseRecord, CaseStatus, ErrorCounts, ExternalStatus, NewCase};
use crate::ledger::DunningStore;
use crate::stage_engine::catalog::StageCatalog;
use crate::stage_engine::dispatcher::count_error;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Intake looks for invoices due this many days ahead
    pub intake_lead_days: i64,
    /// Cases younger than this are always refreshed
    pub freshness_window_days: i64,
    pub page_size: u32,
    pub max_intake_pages: u32,
    pub source_retry: RetryPolicy,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            intake_lead_days: 2,
            freshness_window_days: 30,
            page_size: 100,
            max_intake_pages: 50,
            source_retry: RetryPolicy::exponential(3, std::time::Duration::from_millis(500)),
        }
    }
}

/// Counters of one reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub listed: u32,
    pub created: u32,
    pub skipped_known: u32,
    pub skipped_paid: u32,
    pub refresh_candidates: u32,
    pub updated: u32,
    pub closed_paid: u32,
    pub external_calls: u32,
    pub errors: ErrorCounts,
}

impl ReconciliationReport {
    pub fn processed(&self) -> u32 {
        self.listed + self.refresh_candidates
    }
}

/// Keeps local cases consistent with the external invoice system
pub struct ReconciliationEngine {
    store: Arc<dyn DunningStore>,
    settings: Arc<dyn SettingsStore>,
    source: Arc<dyn InvoiceSource>,
    config: ReconciliationConfig,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn DunningStore>,
        settings: Arc<dyn SettingsStore>,
        source: Arc<dyn InvoiceSource>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            settings,
            source,
            config,
        }
    }

    /// Intake pass followed by refresh pass.
    ///
    /// Failures are counted into the report; the partial report is always returned.
    pub async fn run(&self, today: NaiveDate) -> AppResult<ReconciliationReport> {
        info!("🔄 Reconciling against {} for {}", self.source.name(), today);

        let mut report = ReconciliationReport::default();
        let opened = self.intake(today, &mut report).await;
        self.refresh(today, &opened, &mut report).await;

        info!(
            "✓ Reconciliation done: {} created, {} updated, {} closed paid, {} errors, {} calls",
            report.created,
            report.updated,
            report.closed_paid,
            report.errors.total(),
            report.external_calls
        );
        Ok(report)
    }

    // ========== INTAKE ==========

    /// Returns the case numbers opened in this pass
    async fn intake(&self, today: NaiveDate, report: &mut ReconciliationReport) -> HashSet<String> {
        let filter = InvoiceFilter {
            due_on: today + Duration::days(self.config.intake_lead_days),
            statuses: vec![ExternalStatus::Sent, ExternalStatus::Printed],
        };
        let mut clients: HashMap<String, Option<ClientProfile>> = HashMap::new();
        let mut opened = HashSet::new();
        let mut page = Page::first(self.config.page_size);
        let mut pages = 0;

        loop {
            if pages >= self.config.max_intake_pages {
                warn!(
                    "⚠️ Intake stopped at page cap ({} pages) for due date {}",
                    pages, filter.due_on
                );
                break;
            }
            pages += 1;

            let mut calls = 0;
            let batch = self
                .config
                .source_retry
                .run("invoice listing", || {
                    calls += 1;
                    self.source.list(&filter, page)
                })
                .await;
            report.external_calls += calls;

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    // Without this page the following offsets are meaningless
                    error!("❌ Invoice listing failed at offset {}: {}", page.offset, e);
                    report.errors.source += 1;
                    break;
                }
            };

            if batch.is_empty() {
                break;
            }

            for invoice in batch {
                report.listed += 1;
                let number = invoice.number.clone();
                match self.intake_invoice(invoice, &mut clients, report).await {
                    Ok(true) => {
                        opened.insert(number);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("❌ Intake of invoice {} failed: {}", number, e);
                        count_error(&mut report.errors, &e);
                    }
                }
            }

            page = page.next();
        }

        opened
    }

    async fn intake_invoice(
        &self,
        invoice: SourceInvoice,
        clients: &mut HashMap<String, Option<ClientProfile>>,
        report: &mut ReconciliationReport,
    ) -> AppResult<bool> {
        if self.store.case_exists(&invoice.number).await? {
            report.skipped_known += 1;
            return Ok(false);
        }

        let financials = invoice.financials();
        if financials.is_fully_paid() {
            debug!("Invoice {} already paid, no case opened", invoice.number);
            report.skipped_paid += 1;
            return Ok(false);
        }

        let profile = match invoice.client_id.as_deref() {
            Some(client_id) => self.client_profile(client_id, clients, report).await,
            None => None,
        };

        let new_case = NewCase {
            invoice_number: invoice.number.clone(),
            external_id: invoice.external_id,
            client_id: invoice.client_id.unwrap_or_default(),
            client_tax_id: invoice
                .client_tax_id
                .or_else(|| profile.as_ref().and_then(|p| p.tax_id.clone())),
            client_company_name: invoice
                .client_company_name
                .or_else(|| profile.as_ref().and_then(|p| p.company_name.clone())),
            invoice_date: invoice.invoice_date,
            due_date: invoice.due_date,
            gross_amount: invoice.gross_amount,
            paid_amount: invoice.paid_amount,
            currency: invoice.currency,
            external_status: invoice.status,
            recipient_emails: profile.as_ref().and_then(|p| p.email.clone()),
            client_address: profile.as_ref().and_then(ClientProfile::formatted_address),
        };

        let created = self.store.create_case(&new_case).await?;
        if created {
            info!("📂 Case opened for invoice {}", new_case.invoice_number);
            report.created += 1;
        } else {
            report.skipped_known += 1;
        }
        Ok(created)
    }

    /// Client profile, fetched at most once per client per run
    async fn client_profile(
        &self,
        client_id: &str,
        clients: &mut HashMap<String, Option<ClientProfile>>,
        report: &mut ReconciliationReport,
    ) -> Option<ClientProfile> {
        if let Some(cached) = clients.get(client_id) {
            return cached.clone();
        }

        let mut calls = 0;
        let fetched = self
            .config
            .source_retry
            .run("client lookup", || {
                calls += 1;
                self.source.client_detail(client_id)
            })
            .await;
        report.external_calls += calls;

        let profile = match fetched {
            Ok(profile) => Some(profile),
            Err(e) => {
                // The case is still opened; it just has no contact data yet
                warn!("⚠️ Client {} lookup failed: {}", client_id, e);
                report.errors.source += 1;
                None
            }
        };

        clients.insert(client_id.to_string(), profile.clone());
        profile
    }

    // ========== REFRESH ==========

    async fn refresh(
        &self,
        today: NaiveDate,
        opened: &HashSet<String>,
        report: &mut ReconciliationReport,
    ) {
        let candidates = match self.refresh_candidates(today, opened).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("❌ Selecting refresh candidates failed: {}", e);
                count_error(&mut report.errors, &e);
                return;
            }
        };

        info!("🔍 Refreshing {} candidate cases", candidates.len());
        report.refresh_candidates = candidates.len() as u32;

        for (case_number, record) in candidates {
            if let Err(e) = self.refresh_case(&record, report).await {
                error!("❌ Refresh of case {} failed: {}", case_number, e);
                count_error(&mut report.errors, &e);
            }
        }
    }

    /// Due on a stage-eve date or opened recently, minus cases this run's intake opened
    async fn refresh_candidates(
        &self,
        today: NaiveDate,
        opened: &HashSet<String>,
    ) -> AppResult<BTreeMap<String, CaseRecord>> {
        let catalog = StageCatalog::load(self.settings.as_ref()).await;

        let due_dates = catalog.refresh_due_dates(today);
        let fresh_since = Utc.from_utc_datetime(
            &(today - Duration::days(self.config.freshness_window_days)).and_time(chrono::NaiveTime::MIN),
        );

        let mut candidates: BTreeMap<String, CaseRecord> = BTreeMap::new();
        for record in self.store.active_cases_due_on(&due_dates).await? {
            candidates.insert(record.case.case_number.clone(), record);
        }
        for record in self.store.active_cases_created_since(fresh_since).await? {
            candidates.entry(record.case.case_number.clone()).or_insert(record);
        }
        candidates.retain(|case_number, _| !opened.contains(case_number));

        Ok(candidates)
    }

    async fn refresh_case(&self, record: &CaseRecord, report: &mut ReconciliationReport) -> AppResult<()> {
        let external_id = record.invoice.external_id.as_str();

        let mut calls = 0;
        let fetched = self
            .config
            .source_retry
            .run("invoice detail", || {
                calls += 1;
                self.source.detail(external_id)
            })
            .await;
        report.external_calls += calls;

        let invoice = fetched.map_err(AppError::from)?;
        let update = invoice.financials();

        self.store
            .update_financials(&record.invoice.invoice_number, &update)
            .await?;
        report.updated += 1;

        if update.is_fully_paid()
            && self
                .store
                .transition_case(&record.case.case_number, CaseStatus::Active, CaseStatus::ClosedPaid)
                .await?
        {
            info!("💰 Case {} closed as paid", record.case.case_number);
            report.closed_paid += 1;
        }
        Ok(())
    }
}
