use super::models::*;
use super::{validate_transition, DunningStore};
use crate::adapters::traits::SettingsStore;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{prelude::FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{info, warn};

const CASE_COLUMNS: &str = r#"
    c.case_number, c.client_id, c.client_tax_id, c.client_company_name,
    c.status, c.created_at, c.updated_at,
    i.external_id, i.invoice_date, i.due_date, i.gross_amount, i.paid_amount,
    i.remaining_amount, i.currency, i.external_status, i.debt_status,
    i.recipient_emails, i.client_address, i.updated_at AS invoice_updated_at
"#;

/// Flat join row of `cases` and `invoices`
#[derive(Debug, FromRow)]
struct CaseRow {
    case_number: String,
    client_id: String,
    client_tax_id: Option<String>,
    client_company_name: Option<String>,
    status: CaseStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    external_id: String,
    invoice_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    gross_amount: i64,
    paid_amount: i64,
    remaining_amount: i64,
    currency: String,
    external_status: String,
    debt_status: Option<String>,
    recipient_emails: Option<String>,
    client_address: Option<String>,
    invoice_updated_at: DateTime<Utc>,
}

impl From<CaseRow> for CaseRecord {
    fn from(row: CaseRow) -> Self {
        CaseRecord {
            invoice: Invoice {
                invoice_number: row.case_number.clone(),
                external_id: row.external_id,
                invoice_date: row.invoice_date,
                due_date: row.due_date,
                gross_amount: row.gross_amount,
                paid_amount: row.paid_amount,
                remaining_amount: row.remaining_amount,
                currency: row.currency,
                external_status: row.external_status,
                debt_status: row.debt_status,
                recipient_emails: row.recipient_emails,
                client_address: row.client_address,
                updated_at: row.invoice_updated_at,
            },
            case: Case {
                case_number: row.case_number,
                client_id: row.client_id,
                client_tax_id: row.client_tax_id,
                client_company_name: row.client_company_name,
                status: row.status,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        }
    }
}

/// Ledger repository - THE source of truth for case state and dispatch history
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    async fn fetch_cases(&self, filter: &str) -> AppResult<Vec<CaseRecord>> {
        let sql = format!(
            "SELECT {} FROM cases c JOIN invoices i ON i.invoice_number = c.case_number {} ORDER BY i.due_date DESC NULLS LAST",
            CASE_COLUMNS, filter
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(CaseRecord::from).collect())
    }
}

#[async_trait]
impl DunningStore for LedgerRepository {
    // ========== CASES & INVOICES ==========

    async fn case_exists(&self, invoice_number: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM invoices WHERE invoice_number = $1)",
        )
        .bind(invoice_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create_case(&self, new_case: &NewCase) -> AppResult<bool> {
        let mut tx = self.begin_tx().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO cases (case_number, client_id, client_tax_id, client_company_name, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (case_number) DO NOTHING
            "#,
        )
        .bind(&new_case.invoice_number)
        .bind(&new_case.client_id)
        .bind(&new_case.client_tax_id)
        .bind(&new_case.client_company_name)
        .bind(CaseStatus::Active)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_number, external_id, invoice_date, due_date,
                gross_amount, paid_amount, remaining_amount, currency,
                external_status, recipient_emails, client_address
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&new_case.invoice_number)
        .bind(&new_case.external_id)
        .bind(new_case.invoice_date)
        .bind(new_case.due_date)
        .bind(new_case.gross_amount)
        .bind(new_case.paid_amount)
        .bind(remaining_amount(new_case.gross_amount, new_case.paid_amount))
        .bind(&new_case.currency)
        .bind(new_case.external_status.as_str())
        .bind(&new_case.recipient_emails)
        .bind(&new_case.client_address)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_case(&self, case_number: &str) -> AppResult<Option<CaseRecord>> {
        let sql = format!(
            "SELECT {} FROM cases c JOIN invoices i ON i.invoice_number = c.case_number WHERE c.case_number = $1",
            CASE_COLUMNS
        );
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(case_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(CaseRecord::from))
    }

    async fn list_cases(&self, status: Option<CaseStatus>) -> AppResult<Vec<CaseRecord>> {
        match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM cases c JOIN invoices i ON i.invoice_number = c.case_number WHERE c.status = $1 ORDER BY i.due_date DESC NULLS LAST",
                    CASE_COLUMNS
                );
                let rows = sqlx::query_as::<_, CaseRow>(&sql)
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(rows.into_iter().map(CaseRecord::from).collect())
            }
            None => self.fetch_cases("").await,
        }
    }

    async fn active_cases_due_on(&self, due_dates: &[NaiveDate]) -> AppResult<Vec<CaseRecord>> {
        if due_dates.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM cases c JOIN invoices i ON i.invoice_number = c.case_number WHERE c.status = $1 AND i.due_date = ANY($2)",
            CASE_COLUMNS
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(CaseStatus::Active)
            .bind(due_dates)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(CaseRecord::from).collect())
    }

    async fn active_cases_created_since(&self, since: DateTime<Utc>) -> AppResult<Vec<CaseRecord>> {
        let sql = format!(
            "SELECT {} FROM cases c JOIN invoices i ON i.invoice_number = c.case_number WHERE c.status = $1 AND c.created_at >= $2",
            CASE_COLUMNS
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(CaseStatus::Active)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(CaseRecord::from).collect())
    }

    async fn update_financials(&self, invoice_number: &str, update: &FinancialUpdate) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET due_date = $2, gross_amount = $3, paid_amount = $4,
                remaining_amount = $5, external_status = $6, updated_at = NOW()
            WHERE invoice_number = $1
            "#,
        )
        .bind(invoice_number)
        .bind(update.due_date)
        .bind(update.gross_amount)
        .bind(update.paid_amount)
        .bind(update.remaining())
        .bind(update.external_status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("Financial update matched no invoice: {}", invoice_number);
        }

        Ok(())
    }

    async fn set_debt_status(&self, invoice_number: &str, label: &str) -> AppResult<()> {
        sqlx::query("UPDATE invoices SET debt_status = $2, updated_at = NOW() WHERE invoice_number = $1")
            .bind(invoice_number)
            .bind(label)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn transition_case(
        &self,
        case_number: &str,
        from: CaseStatus,
        to: CaseStatus,
    ) -> AppResult<bool> {
        validate_transition(from, to)?;

        let result = sqlx::query(
            r#"
            UPDATE cases
            SET status = $3, updated_at = NOW()
            WHERE case_number = $1 AND status = $2
            "#,
        )
        .bind(case_number)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========== DISPATCH LEDGER ==========

    async fn has_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM dispatch_log WHERE invoice_number = $1 AND stage = $2)",
        )
        .bind(invoice_number)
        .bind(stage)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find_dispatch(&self, invoice_number: &str, stage: Stage) -> AppResult<Option<DispatchRecord>> {
        let record = sqlx::query_as::<_, DispatchRecord>(
            r#"
            SELECT id, invoice_number, stage, sent_at, mode, recipient, subject, body
            FROM dispatch_log
            WHERE invoice_number = $1 AND stage = $2
            "#,
        )
        .bind(invoice_number)
        .bind(stage)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn record_dispatch(&self, dispatch: NewDispatch) -> AppResult<bool> {
        let record = dispatch.into_record(Utc::now());

        // The unique constraint is the idempotency guarantee; a lost race writes nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO dispatch_log (id, invoice_number, stage, sent_at, mode, recipient, subject, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (invoice_number, stage) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.invoice_number)
        .bind(record.stage)
        .bind(record.sent_at)
        .bind(record.mode)
        .bind(&record.recipient)
        .bind(&record.subject)
        .bind(&record.body)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn dispatches_for(&self, invoice_number: &str) -> AppResult<Vec<DispatchRecord>> {
        let records = sqlx::query_as::<_, DispatchRecord>(
            r#"
            SELECT id, invoice_number, stage, sent_at, mode, recipient, subject, body
            FROM dispatch_log
            WHERE invoice_number = $1
            ORDER BY sent_at DESC
            "#,
        )
        .bind(invoice_number)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    // ========== OPERATIONAL STATUS LOG ==========

    async fn append_sync_run(&self, run: &SyncRun) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (
                id, run_type, processed, duration_seconds, created, updated,
                closed, external_calls, errors, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run.id)
        .bind(run.run_type)
        .bind(run.processed)
        .bind(run.duration_seconds)
        .bind(run.created)
        .bind(run.updated)
        .bind(run.closed)
        .bind(run.external_calls)
        .bind(&run.errors)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        info!("📝 Sync run recorded: {:?} ({} processed)", run.run_type, run.processed);
        Ok(())
    }

    async fn recent_sync_runs(&self, limit: i64) -> AppResult<Vec<SyncRun>> {
        let runs = sqlx::query_as::<_, SyncRun>(
            r#"
            SELECT id, run_type, processed, duration_seconds, created, updated,
                   closed, external_calls, errors, created_at
            FROM sync_status
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }
}

/// Row of `notification_settings`
#[derive(Debug, FromRow)]
struct OffsetRow {
    stage: Stage,
    offset_days: i32,
}

#[async_trait]
impl SettingsStore for LedgerRepository {
    async fn stage_offsets(&self) -> AppResult<HashMap<Stage, i32>> {
        let rows = sqlx::query_as::<_, OffsetRow>(
            "SELECT stage, offset_days FROM notification_settings",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (row.stage, row.offset_days)).collect())
    }

    async fn save_stage_offsets(&self, offsets: &HashMap<Stage, i32>) -> AppResult<()> {
        let mut tx = self.begin_tx().await?;

        for (stage, offset_days) in offsets {
            sqlx::query(
                r#"
                INSERT INTO notification_settings (stage, offset_days)
                VALUES ($1, $2)
                ON CONFLICT (stage)
                DO UPDATE SET offset_days = EXCLUDED.offset_days, updated_at = NOW()
                "#,
            )
            .bind(stage)
            .bind(offset_days)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("⚙️ Stage offsets saved: {} stages", offsets.len());
        Ok(())
    }
}
