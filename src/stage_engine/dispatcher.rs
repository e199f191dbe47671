// Dispatch scheduler - decides what to send today and drives case closure
//
// The ledger is the only memory of what was sent. A stage is dispatched when
// its offset matches today exactly and no ledger entry exists for it yet.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::adapters::retry::RetryPolicy;
use crate::adapters::traits::{Notifier, SettingsStore};
use crate::error::{AppError, AppResult, DeliveryError};
use crate::ledger::models::{
    CaseRecord, CaseStatus, DispatchMode, DispatchRecord, ErrorCounts, NewDispatch, Stage,
};
use crate::ledger::DunningStore;
use crate::notifications::templates::MessageTemplates;
use crate::stage_engine::catalog::StageCatalog;

/// Delivery retry configuration
#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    /// Attempts per address
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Result of dispatching one stage for one case
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent { record: DispatchRecord },
    /// `record` is the existing entry; its `sent_at` is the original send time.
    AlreadySent { record: DispatchRecord },
}

impl DispatchOutcome {
    pub fn record(&self) -> &DispatchRecord {
        match self {
            DispatchOutcome::Sent { record } | DispatchOutcome::AlreadySent { record } => record,
        }
    }
}

/// Counters of one automatic dispatch pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub cases_checked: u32,
    pub sent: u32,
    pub already_sent: u32,
    pub closed_unpaid: u32,
    pub skipped_no_due_date: u32,
    pub skipped_no_recipients: u32,
    pub errors: ErrorCounts,
}

pub struct DispatchScheduler {
    store: Arc<dyn DunningStore>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    templates: Arc<MessageTemplates>,
    delivery_retry: RetryPolicy,
}

impl DispatchScheduler {
    pub fn new(
        store: Arc<dyn DunningStore>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        templates: Arc<MessageTemplates>,
        delivery: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            settings,
            notifier,
            templates,
            delivery_retry: RetryPolicy::fixed(delivery.max_attempts, delivery.backoff),
        }
    }

    /// Automatic pass over every active case for `today`
    pub async fn run(&self, today: NaiveDate) -> AppResult<DispatchReport> {
        let catalog = StageCatalog::load(self.settings.as_ref()).await;
        let cases = self.store.list_cases(Some(CaseStatus::Active)).await?;

        info!("📨 Dispatch pass for {}: {} active cases", today, cases.len());

        let mut report = DispatchReport::default();

        for record in cases {
            report.cases_checked += 1;
            let case_number = record.case.case_number.clone();

            let Some(due_date) = record.invoice.due_date else {
                report.skipped_no_due_date += 1;
                continue;
            };

            if record.invoice.recipients().is_empty() {
                debug!("Case {} has no usable recipient, skipping", case_number);
                report.skipped_no_recipients += 1;
                continue;
            }

            for stage in catalog.stages_due_on(due_date, today) {
                match self
                    .dispatch_stage(&record, stage, DispatchMode::Automatic, &catalog)
                    .await
                {
                    Ok(DispatchOutcome::Sent { .. }) => report.sent += 1,
                    Ok(DispatchOutcome::AlreadySent { .. }) => report.already_sent += 1,
                    Err(e) => {
                        error!("❌ Dispatch of {} for case {} failed: {}", stage, case_number, e);
                        count_error(&mut report.errors, &e);
                    }
                }
            }

            match self.close_if_terminal(&case_number, &catalog).await {
                Ok(true) => report.closed_unpaid += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("❌ Closing case {} failed: {}", case_number, e);
                    count_error(&mut report.errors, &e);
                }
            }
        }

        info!(
            "✓ Dispatch pass done: {} sent, {} already sent, {} closed unpaid, {} errors",
            report.sent,
            report.already_sent,
            report.closed_unpaid,
            report.errors.total()
        );

        Ok(report)
    }

    /// Operator-triggered dispatch of one stage, regardless of offsets
    pub async fn trigger_manual_dispatch(
        &self,
        case_number: &str,
        stage: Stage,
    ) -> AppResult<DispatchOutcome> {
        let record = self
            .store
            .get_case(case_number)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Case {}", case_number)))?;

        if record.case.status.is_terminal() {
            return Err(AppError::CaseClosed {
                case_number: case_number.to_string(),
                status: record.case.status,
            });
        }

        let catalog = StageCatalog::load(self.settings.as_ref()).await;
        let outcome = self
            .dispatch_stage(&record, stage, DispatchMode::Manual, &catalog)
            .await?;

        if let DispatchOutcome::Sent { .. } = outcome {
            info!("✓ Manual dispatch of {} for case {}", stage, case_number);
            self.close_if_terminal(case_number, &catalog).await?;
        }

        Ok(outcome)
    }

    async fn dispatch_stage(
        &self,
        record: &CaseRecord,
        stage: Stage,
        mode: DispatchMode,
        catalog: &StageCatalog,
    ) -> AppResult<DispatchOutcome> {
        let invoice_number = &record.invoice.invoice_number;

        // Idempotency check before any delivery attempt
        if let Some(existing) = self.store.find_dispatch(invoice_number, stage).await? {
            debug!("Stage {} already logged for {}", stage, invoice_number);
            return Ok(DispatchOutcome::AlreadySent { record: existing });
        }

        let message = self.templates.render(stage, record, catalog)?;

        let recipients = record.invoice.recipients();
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients(invoice_number.clone()).into());
        }

        let mut delivered = Vec::with_capacity(recipients.len());
        for address in &recipients {
            let label = format!("delivery of {} to {}", stage, address);
            let result = self
                .delivery_retry
                .run(&label, || {
                    self.notifier
                        .send(address, &message.subject, &message.body_html)
                })
                .await;

            match result {
                Ok(()) => delivered.push(address.clone()),
                Err(e) => warn!("⚠️ Giving up on {}: {}", address, e),
            }
        }

        if delivered.is_empty() {
            return Err(DeliveryError::AllRecipientsFailed {
                invoice_number: invoice_number.clone(),
                stage,
            }
            .into());
        }

        let inserted = self
            .store
            .record_dispatch(NewDispatch {
                invoice_number: invoice_number.clone(),
                stage,
                mode,
                recipient: delivered.join(", "),
                subject: message.subject,
                body: message.body_html,
            })
            .await?;

        let logged = self
            .store
            .find_dispatch(invoice_number, stage)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Ledger entry for {} vanished", invoice_number)))?;

        if !inserted {
            warn!("⚠️ Stage {} for {} was logged concurrently", stage, invoice_number);
            return Ok(DispatchOutcome::AlreadySent { record: logged });
        }

        // The ledger entry is authoritative; a stale label is only cosmetic.
        if let Err(e) = self
            .store
            .set_debt_status(invoice_number, stage.display_name())
            .await
        {
            warn!("⚠️ Could not update debt status of {}: {}", invoice_number, e);
        }

        info!(
            "📧 {} sent for {} to {} recipient(s)",
            stage,
            invoice_number,
            delivered.len()
        );

        Ok(DispatchOutcome::Sent { record: logged })
    }

    /// Close the case as unpaid once the terminal stage is in the ledger
    async fn close_if_terminal(&self, case_number: &str, catalog: &StageCatalog) -> AppResult<bool> {
        if !self
            .store
            .has_dispatch(case_number, catalog.terminal_stage())
            .await?
        {
            return Ok(false);
        }

        let closed = self
            .store
            .transition_case(case_number, CaseStatus::Active, CaseStatus::ClosedUnpaid)
            .await?;

        if closed {
            info!("🔒 Case {} closed unpaid after terminal stage", case_number);
        }
        Ok(closed)
    }
}

/// Bucket a per-record failure into the run's error counters
pub fn count_error(errors: &mut ErrorCounts, error: &AppError) {
    match error {
        AppError::Source(_) => errors.source += 1,
        AppError::Template(_) => errors.template += 1,
        AppError::Delivery(_) => errors.delivery += 1,
        _ => errors.persistence += 1,
    }
}
