// Daily dunning scheduler
//
// Executes once a day at the configured UTC hour:
// - reconciliation against the invoice source (new cases, payments)
// - dispatch of every stage due today
// Both steps run as one `full` batch so a payment seen this morning
// stops today's notice.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

use crate::ledger::models::RunType;
use crate::scheduler::runner::BatchRunner;

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// UTC hour to execute the batch (0-23)
    pub execution_hour: u32,
}

/// Coordinates the daily batch run
pub struct DunningScheduler {
    config: ScheduleConfig,
    runner: Arc<BatchRunner>,
}

impl DunningScheduler {
    pub fn new(config: ScheduleConfig, runner: Arc<BatchRunner>) -> Self {
        Self { config, runner }
    }

    /// Start the scheduler (runs in background)
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("⏸️ Daily scheduler disabled");
            return None;
        }

        let config = self.config.clone();
        let runner = self.runner.clone();

        Some(tokio::spawn(async move {
            Self::run_daily_scheduler(&config, &runner).await
        }))
    }

    async fn run_daily_scheduler(config: &ScheduleConfig, runner: &Arc<BatchRunner>) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_daily_execution(now, config.execution_hour);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next dunning run scheduled for: {} UTC",
                    next_execution.format("%Y-%m-%d %H:%M:%S")
                );

                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            info!("🔄 Starting daily dunning cycle");

            match runner.run(RunType::Full, BatchRunner::today()).await {
                Ok(run) => info!(
                    "✓ Daily cycle completed: {} processed, {} closed",
                    run.processed, run.closed
                ),
                Err(e) => error!("❌ Daily cycle failed: {:?}", e),
            }
        }
    }

    /// Calculate next daily execution time
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let at = NaiveTime::from_hms_opt(execution_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
        let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));

        // If execution time has passed today, schedule for tomorrow
        if today <= now {
            today + chrono::Duration::days(1)
        } else {
            today
        }
    }
}
