use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::models::*;
use super::{validate_transition, DunningStore};
use crate::adapters::traits::SettingsStore;
use crate::error::{AppError, AppResult};

/// Map-backed store used by engine and router tests
#[derive(Default)]
pub struct InMemoryLedger {
    cases: RwLock<HashMap<String, Case>>,
    invoices: RwLock<HashMap<String, Invoice>>,
    dispatches: RwLock<Vec<DispatchRecord>>,
    runs: RwLock<Vec<SyncRun>>,
    offsets: RwLock<HashMap<Stage, i32>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a case directly, bypassing intake. Useful for arranging fixtures.
    pub async fn seed(&self, new_case: NewCase, created_at: DateTime<Utc>) {
        let record = Self::build(&new_case, created_at);
        self.cases
            .write()
            .await
            .insert(record.case.case_number.clone(), record.case);
        self.invoices
            .write()
            .await
            .insert(record.invoice.invoice_number.clone(), record.invoice);
    }

    pub async fn dispatch_count(&self) -> usize {
        self.dispatches.read().await.len()
    }

    fn build(new_case: &NewCase, now: DateTime<Utc>) -> CaseRecord {
        CaseRecord {
            case: Case {
                case_number: new_case.invoice_number.clone(),
                client_id: new_case.client_id.clone(),
                client_tax_id: new_case.client_tax_id.clone(),
                client_company_name: new_case.client_company_name.clone(),
                status: CaseStatus::Active,
                created_at: now,
                updated_at: now,
            },
            invoice: Invoice {
                invoice_number: new_case.invoice_number.clone(),
                external_id: new_case.external_id.clone(),
                invoice_date: new_case.invoice_date,
                due_date: new_case.due_date,
                gross_amount: new_case.gross_amount,
                paid_amount: new_case.paid_amount,
                remaining_amount: remaining_amount(new_case.gross_amount, new_case.paid_amount),
                currency: new_case.currency.clone(),
                external_status: new_case.external_status.as_str().to_string(),
                debt_status: None,
                recipient_emails: new_case.recipient_emails.clone(),
                client_address: new_case.client_address.clone(),
                updated_at: now,
            },
        }
    }

    async fn records_where<F>(&self, keep: F) -> Vec<CaseRecord>
    where
        F: Fn(&Case, &Invoice) -> bool,
    {
        let cases = self.cases.read().await;
        let invoices = self.invoices.read().await;
        let mut records: Vec<CaseRecord> = cases
            .values()
            .filter_map(|case| {
                invoices.get(&case.case_number).and_then(|invoice| {
                    keep(case, invoice).then(|| CaseRecord {
                        case: case.clone(),
                        invoice: invoice.clone(),
                    })
                })
            })
            .collect();
        records.sort_by(|a, b| a.case.case_number.cmp(&b.case.case_number));
        records
    }
}

#[async_trait]
impl DunningStore for InMemoryLedger {
    async fn case_exists(&self, invoice_number: &str) -> AppResult<bool> {
        Ok(self.invoices.read().await.contains_key(invoice_number))
    }

    async fn create_case(&self, new_case: &NewCase) -> AppResult<bool> {
        let mut cases = self.cases.write().await;
        if cases.contains_key(&new_case.invoice_number) {
            return Ok(false);
        }

        let record = Self::build(new_case, Utc::now());
        self.invoices
            .write()
            .await
            .insert(record.invoice.invoice_number.clone(), record.invoice);
        cases.insert(record.case.case_number.clone(), record.case);
        Ok(true)
    }

    async fn get_case(&self, case_number: &str) -> AppResult<Option<CaseRecord>> {
        Ok(self
            .records_where(|case, _| case.case_number == case_number)
            .await
            .into_iter()
            .next())
    }

    async fn list_cases(&self, status: Option<CaseStatus>) -> AppResult<Vec<CaseRecord>> {
        Ok(self
            .records_where(|case, _| status.map_or(true, |s| case.status == s))
            .await)
    }

    async fn active_cases_due_on(&self, due_dates: &[NaiveDate]) -> AppResult<Vec<CaseRecord>> {
        Ok(self
            .records_where(|case, invoice| {
                case.status == CaseStatus::Active
                    && invoice
                        .due_date
                        .map_or(false, |due| due_dates.contains(&due))
            })
            .await)
    }

    async fn active_cases_created_since(&self, since: DateTime<Utc>) -> AppResult<Vec<CaseRecord>> {
        Ok(self
            .records_where(|case, _| case.status == CaseStatus::Active && case.created_at >= since)
            .await)
    }

    async fn update_financials(&self, invoice_number: &str, update: &FinancialUpdate) -> AppResult<()> {
        let mut invoices = self.invoices.write().await;
        let invoice = invoices
            .get_mut(invoice_number)
            .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found", invoice_number)))?;

        invoice.due_date = update.due_date;
        invoice.gross_amount = update.gross_amount;
        invoice.paid_amount = update.paid_amount;
        invoice.remaining_amount = update.remaining();
        invoice.external_status = update.external_status.as_str().to_string();
        invoice.updated_at = Utc::now();
        Ok(())
    }

    async fn set_debt_status(&self, invoice_number: &str, label: &str) -> AppResult<()> {
        if let Some(invoice) = self.invoices.write().await.get_mut(invoice_number) {
            invoice.debt_status = Some(label.to_string());
        }
        Ok(())
    }

    async fn transition_case(
        &self,
        case_number: &str,
        from: CaseStatus,
        to: CaseStatus,
    ) -> AppResult<bool> {
        validate_transition(from, to)?;

        let mut cases = self.cases.write().await;
        match cases.get_mut(case_number) {
            Some(case) if case.status == from => {
                case.status = to;
                case.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn has_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<bool> {
        Ok(self.find_dispatch(invoice_number, stage).await?.is_some())
    }

    async fn find_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<Option<DispatchRecord>> {
        Ok(self
            .dispatches
            .read()
            .await
            .iter()
            .find(|d| d.invoice_number == invoice_number && d.stage == stage)
            .cloned())
    }

    async fn record_dispatch(&self, dispatch: NewDispatch) -> AppResult<bool> {
        // Check and insert under one write guard, same as the unique constraint.
        let mut dispatches = self.dispatches.write().await;
        if dispatches
            .iter()
            .any(|d| d.invoice_number == dispatch.invoice_number && d.stage == dispatch.stage)
        {
            return Ok(false);
        }
        dispatches.push(dispatch.into_record(Utc::now()));
        Ok(true)
    }

    async fn dispatches_for(&self, invoice_number: &str) -> AppResult<Vec<DispatchRecord>> {
        let mut records: Vec<DispatchRecord> = self
            .dispatches
            .read()
            .await
            .iter()
            .filter(|d| d.invoice_number == invoice_number)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then(b.stage.cmp(&a.stage)));
        Ok(records)
    }

    async fn append_sync_run(&self, run: &SyncRun) -> AppResult<()> {
        self.runs.write().await.push(run.clone());
        Ok(())
    }

    async fn recent_sync_runs(&self, limit: i64) -> AppResult<Vec<SyncRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SettingsStore for InMemoryLedger {
    async fn stage_offsets(&self) -> AppResult<HashMap<Stage, i32>> {
        Ok(self.offsets.read().await.clone())
    }

    async fn save_stage_offsets(&self, offsets: &HashMap<Stage, i32>) -> AppResult<()> {
        self.offsets.write().await.extend(offsets.iter().map(|(k, v)| (*k, *v)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::new_case;

    #[tokio::test]
    async fn test_record_dispatch_is_insert_or_ignore() {
        let store = InMemoryLedger::new();
        let dispatch = NewDispatch {
            invoice_number: "FV/1/2024".into(),
            stage: Stage::Reminder,
            mode: DispatchMode::Automatic,
            recipient: "a@firma.pl".into(),
            subject: "s".into(),
            body: "b".into(),
        };

        assert!(store.record_dispatch(dispatch.clone()).await.unwrap());
        assert!(!store.record_dispatch(dispatch).await.unwrap());
        assert_eq!(store.dispatch_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_case_twice_keeps_first() {
        let store = InMemoryLedger::new();
        let case = new_case("FV/2/2024", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 10_000, 0);

        assert!(store.create_case(&case).await.unwrap());
        assert!(!store.create_case(&case).await.unwrap());
        assert_eq!(store.list_cases(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = InMemoryLedger::new();
        let case = new_case("FV/3/2024", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 10_000, 0);
        store.create_case(&case).await.unwrap();

        assert!(store
            .transition_case("FV/3/2024", CaseStatus::Active, CaseStatus::ClosedPaid)
            .await
            .unwrap());
        // Already closed: the second closer loses
        assert!(!store
            .transition_case("FV/3/2024", CaseStatus::Active, CaseStatus::ClosedUnpaid)
            .await
            .unwrap());

        let record = store.get_case("FV/3/2024").await.unwrap().unwrap();
        assert_eq!(record.case.status, CaseStatus::ClosedPaid);
    }
}
