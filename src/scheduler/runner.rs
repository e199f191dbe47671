// Batch runner - serialises runs and records them in the status log

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::{ErrorCounts, RunType, SyncRun};
use crate::ledger::DunningStore;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::stage_engine::dispatcher::{count_error, DispatchReport};
use crate::stage_engine::DispatchScheduler;

/// Response for a run accepted into the background
#[derive(Debug, Serialize)]
pub struct SyncAcceptedResponse {
    pub status: String,
    pub message: String,
    pub run_type: RunType,
}

pub struct BatchRunner {
    store: Arc<dyn DunningStore>,
    reconciliation: Arc<ReconciliationEngine>,
    dispatcher: Arc<DispatchScheduler>,
    // Scheduled and operator-triggered runs never overlap; the second waits.
    run_lock: Mutex<()>,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn DunningStore>,
        reconciliation: Arc<ReconciliationEngine>,
        dispatcher: Arc<DispatchScheduler>,
    ) -> Self {
        Self {
            store,
            reconciliation,
            dispatcher,
            run_lock: Mutex::new(()),
        }
    }

    pub fn dispatcher(&self) -> &DispatchScheduler {
        &self.dispatcher
    }

    /// Calendar day batch runs operate on
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    pub async fn run(&self, run_type: RunType, today: NaiveDate) -> AppResult<SyncRun> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();

        info!("🔄 Starting {:?} run for {}", run_type, today);

        let mut run = SyncTally::default();

        if matches!(run_type, RunType::Reconciliation | RunType::Full) {
            match self.reconciliation.run(today).await {
                Ok(report) => run.add_reconciliation(&report),
                Err(e) => {
                    error!("❌ Reconciliation aborted: {}", e);
                    count_error(&mut run.errors, &e);
                }
            }
        }

        if matches!(run_type, RunType::Dispatch | RunType::Full) {
            match self.dispatcher.run(today).await {
                Ok(report) => run.add_dispatch(&report),
                Err(e) => {
                    error!("❌ Dispatch aborted: {}", e);
                    count_error(&mut run.errors, &e);
                }
            }
        }

        let record = run.into_record(run_type, started.elapsed().as_secs_f64());
        self.store.append_sync_run(&record).await?;

        info!(
            "✓ {:?} run finished in {:.1}s ({} errors)",
            run_type,
            record.duration_seconds,
            record.errors.total()
        );
        Ok(record)
    }

    /// Start a run in the background and return at once
    pub fn trigger(self: &Arc<Self>, run_type: RunType) -> SyncAcceptedResponse {
        let runner = self.clone();

        tokio::spawn(async move {
            if let Err(e) = runner.run(run_type, Self::today()).await {
                error!("❌ Background {:?} run failed: {}", run_type, e);
            }
        });

        SyncAcceptedResponse {
            status: "accepted".to_string(),
            message: "Run queued; poll the sync status log for the outcome".to_string(),
            run_type,
        }
    }

    pub fn trigger_reconciliation(self: &Arc<Self>) -> SyncAcceptedResponse {
        self.trigger(RunType::Reconciliation)
    }

    pub async fn recent_runs(&self, limit: i64) -> AppResult<Vec<SyncRun>> {
        self.store.recent_sync_runs(limit).await
    }
}

#[derive(Debug, Default)]
struct SyncTally {
    processed: u32,
    created: u32,
    updated: u32,
    closed: u32,
    external_calls: u32,
    errors: ErrorCounts,
}

impl SyncTally {
    fn add_reconciliation(&mut self, report: &ReconciliationReport) {
        self.processed += report.processed();
        self.created += report.created;
        self.updated += report.updated;
        self.closed += report.closed_paid;
        self.external_calls += report.external_calls;
        self.errors.merge(&report.errors);
    }

    fn add_dispatch(&mut self, report: &DispatchReport) {
        self.processed += report.cases_checked;
        self.closed += report.closed_unpaid;
        self.errors.merge(&report.errors);
    }

    fn into_record(self, run_type: RunType, duration_seconds: f64) -> SyncRun {
        SyncRun {
            id: Uuid::new_v4(),
            run_type,
            processed: clamp(self.processed),
            duration_seconds,
            created: clamp(self.created),
            updated: clamp(self.updated),
            closed: clamp(self.closed),
            external_calls: clamp(self.external_calls),
            errors: sqlx::types::Json(self.errors),
            created_at: Utc::now(),
        }
    }
}

fn clamp(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::retry::RetryPolicy;
    use crate::ledger::memory::InMemoryLedger;
    use crate::ledger::models::{CaseStatus, ExternalStatus, Stage};
    use crate::reconciliation::ReconciliationConfig;
    use crate::stage_engine::DeliveryConfig;
    use crate::testing::{source_invoice, templates, FakeNotifier, FakeSource};
    use crate::adapters::traits::ClientProfile;
    use chrono::TimeZone;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn runner(store: Arc<InMemoryLedger>, source: Arc<FakeSource>, notifier: Arc<FakeNotifier>) -> Arc<BatchRunner> {
        let reconciliation = ReconciliationEngine::new(
            store.clone(),
            store.clone(),
            source,
            ReconciliationConfig {
                source_retry: RetryPolicy::fixed(3, Duration::ZERO),
                ..ReconciliationConfig::default()
            },
        );
        let dispatcher = DispatchScheduler::new(
            store.clone(),
            store.clone(),
            notifier,
            Arc::new(templates()),
            DeliveryConfig {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
        );
        Arc::new(BatchRunner::new(store, Arc::new(reconciliation), Arc::new(dispatcher)))
    }

    #[tokio::test]
    async fn test_full_run_intakes_then_dispatches_and_logs() {
        let store = Arc::new(InMemoryLedger::new());
        let source = Arc::new(FakeSource::new());
        let notifier = Arc::new(FakeNotifier::new());

        // Invoice due in 2 days gets a case today; its reminder fires tomorrow
        let today = date(2024, 3, 13);
        let due = date(2024, 3, 15);
        source
            .add_client(ClientProfile {
                client_id: "7".into(),
                email: Some("biuro@klient.pl".into()),
                ..Default::default()
            })
            .await;
        source
            .publish(source_invoice("FV/1/2024", due, 10_000, 0, ExternalStatus::Sent))
            .await;

        let runner = runner(store.clone(), source, notifier.clone());
        let run = runner.run(RunType::Full, today).await.unwrap();
        assert_eq!(run.created, 1);
        assert_eq!(notifier.attempt_count(), 0);

        let next = runner.run(RunType::Dispatch, date(2024, 3, 14)).await.unwrap();
        assert_eq!(next.run_type, RunType::Dispatch);
        assert!(store.has_dispatch("FV/1/2024", Stage::Reminder).await.unwrap());

        let log = runner.recent_runs(10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].run_type, RunType::Dispatch);
        assert_eq!(log[1].run_type, RunType::Full);
    }

    #[tokio::test]
    async fn test_paid_case_is_closed_before_terminal_dispatch() {
        let store = Arc::new(InMemoryLedger::new());
        let source = Arc::new(FakeSource::new());
        let notifier = Arc::new(FakeNotifier::new());

        let due = date(2024, 3, 15);
        let opened = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        store
            .seed(crate::testing::new_case("FV/2/2024", due, 10_000, 0), opened)
            .await;
        source
            .set_detail(source_invoice("FV/2/2024", due, 10_000, 10_000, ExternalStatus::Paid))
            .await;

        let runner = runner(store.clone(), source, notifier.clone());

        // Day before escalation: refresh catches the payment first
        let run = runner.run(RunType::Full, date(2024, 4, 13)).await.unwrap();
        assert_eq!(run.closed, 1);

        runner.run(RunType::Full, date(2024, 4, 14)).await.unwrap();

        let record = store.get_case("FV/2/2024").await.unwrap().unwrap();
        assert_eq!(record.case.status, CaseStatus::ClosedPaid);
        assert!(!store.has_dispatch("FV/2/2024", Stage::Escalated).await.unwrap());
        assert_eq!(notifier.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_duplicate_dispatch() {
        let store = Arc::new(InMemoryLedger::new());
        let source = Arc::new(FakeSource::new());
        let notifier = Arc::new(FakeNotifier::new());

        store
            .create_case(&crate::testing::new_case("FV/3/2024", date(2024, 3, 15), 10_000, 0))
            .await
            .unwrap();

        let runner = runner(store.clone(), source, notifier.clone());
        let today = date(2024, 3, 22);
        let (a, b) = tokio::join!(
            runner.run(RunType::Dispatch, today),
            runner.run(RunType::Dispatch, today)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(store.dispatch_count().await, 1);
        assert_eq!(notifier.attempt_count(), 1);
    }
}
