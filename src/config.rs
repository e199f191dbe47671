use config::{Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::adapters::retry::RetryPolicy;
use crate::error::{AppError, AppResult};
use crate::notifications::CreditorDetails;
use crate::reconciliation::ReconciliationConfig;
use crate::scheduler::ScheduleConfig;
use crate::stage_engine::DeliveryConfig;

/// Service configuration, read from defaults, an optional `dunning.toml`
/// and the process environment (`DATABASE_URL`, `INFAKT_API_KEY`, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,

    pub infakt_api_key: String,
    pub infakt_base_url: String,
    pub source_requests_per_minute: u32,
    pub source_max_attempts: u32,
    pub source_backoff_ms: u64,

    pub resend_api_key: String,
    pub resend_base_url: String,
    pub resend_from_email: String,
    pub delivery_max_attempts: u32,
    pub delivery_backoff_secs: u64,

    pub creditor_name: String,
    pub creditor_email: String,
    pub creditor_phone: String,
    pub creditor_bank_account: String,

    pub scheduler_enabled: bool,
    pub execution_hour: u32,

    pub intake_lead_days: i64,
    pub freshness_window_days: i64,
    pub page_size: u32,
    pub max_intake_pages: u32,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let config: Config = config::Config::builder()
            .set_default("database_url", "postgresql://localhost/dunning")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("infakt_api_key", "")?
            .set_default("infakt_base_url", "https://api.infakt.pl/api/v3")?
            .set_default("source_requests_per_minute", 60_i64)?
            .set_default("source_max_attempts", 3_i64)?
            .set_default("source_backoff_ms", 500_i64)?
            .set_default("resend_api_key", "")?
            .set_default("resend_base_url", "https://api.resend.com")?
            .set_default("resend_from_email", "")?
            .set_default("delivery_max_attempts", 3_i64)?
            .set_default("delivery_backoff_secs", 5_i64)?
            .set_default("creditor_name", "")?
            .set_default("creditor_email", "")?
            .set_default("creditor_phone", "")?
            .set_default("creditor_bank_account", "")?
            .set_default("scheduler_enabled", true)?
            .set_default("execution_hour", 6_i64)?
            .set_default("intake_lead_days", 2_i64)?
            .set_default("freshness_window_days", 30_i64)?
            .set_default("page_size", 100_i64)?
            .set_default("max_intake_pages", 50_i64)?
            .add_source(File::with_name("dunning").required(false))
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.infakt_api_key.trim().is_empty() {
            return Err(AppError::Config("INFAKT_API_KEY must be set".to_string()));
        }
        if self.resend_api_key.trim().is_empty() || self.resend_from_email.trim().is_empty() {
            return Err(AppError::Config(
                "RESEND_API_KEY and RESEND_FROM_EMAIL must be set".to_string(),
            ));
        }
        if self.execution_hour > 23 {
            return Err(AppError::Config(format!(
                "EXECUTION_HOUR must be 0-23, got {}",
                self.execution_hour
            )));
        }
        if self.page_size == 0 {
            return Err(AppError::Config("PAGE_SIZE must be positive".to_string()));
        }
        Ok(())
    }

    pub fn reconciliation(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            intake_lead_days: self.intake_lead_days,
            freshness_window_days: self.freshness_window_days,
            page_size: self.page_size,
            max_intake_pages: self.max_intake_pages,
            source_retry: RetryPolicy::exponential(
                self.source_max_attempts,
                Duration::from_millis(self.source_backoff_ms),
            ),
        }
    }

    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: self.delivery_max_attempts,
            backoff: Duration::from_secs(self.delivery_backoff_secs),
        }
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            enabled: self.scheduler_enabled,
            execution_hour: self.execution_hour,
        }
    }

    pub fn creditor(&self) -> CreditorDetails {
        CreditorDetails {
            name: self.creditor_name.clone(),
            email: self.creditor_email.clone(),
            phone: self.creditor_phone.clone(),
            bank_account: self.creditor_bank_account.clone(),
        }
    }
}
