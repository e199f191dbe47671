use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::adapters::traits::SettingsStore;
use crate::error::{AppError, AppResult};
use crate::ledger::models::Stage;

/// Accepted range for a configured offset, in days
pub const MAX_OFFSET_DAYS: i32 = 365;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StageDefinition {
    pub stage: Stage,
    pub name: &'static str,
    pub ordinal: u8,
    /// Signed distance from the due date; negative fires before it
    pub offset_days: i32,
}

/// Ordered escalation stages with their live offsets
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::from_offsets(&HashMap::new())
    }
}

impl StageCatalog {
    /// Stages missing from `offsets` keep their built-in default.
    pub fn from_offsets(offsets: &HashMap<Stage, i32>) -> Self {
        let stages = Stage::all()
            .into_iter()
            .map(|stage| StageDefinition {
                stage,
                name: stage.display_name(),
                ordinal: stage.ordinal(),
                offset_days: offsets
                    .get(&stage)
                    .copied()
                    .unwrap_or_else(|| stage.default_offset()),
            })
            .collect();

        Self { stages }
    }

    /// Read offsets fresh from the settings store.
    ///
    /// A failing store yields the defaults so a run is never blocked on settings.
    pub async fn load(settings: &dyn SettingsStore) -> Self {
        match settings.stage_offsets().await {
            Ok(offsets) => Self::from_offsets(&offsets),
            Err(e) => {
                warn!("⚠️ Could not read stage offsets, using defaults: {}", e);
                Self::default()
            }
        }
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn offset(&self, stage: Stage) -> i32 {
        self.stages
            .iter()
            .find(|def| def.stage == stage)
            .map(|def| def.offset_days)
            .unwrap_or_else(|| stage.default_offset())
    }

    /// Highest-ordinal stage; dispatching it without payment closes the case
    pub fn terminal_stage(&self) -> Stage {
        self.stages
            .iter()
            .max_by_key(|def| def.ordinal)
            .map(|def| def.stage)
            .unwrap_or(Stage::Escalated)
    }

    pub fn total_stages(&self) -> usize {
        self.stages.len()
    }

    /// Stages whose offset equals `today - due_date` exactly.
    ///
    /// A day on which no run happened is not caught up later.
    pub fn stages_due_on(&self, due_date: NaiveDate, today: NaiveDate) -> Vec<Stage> {
        let elapsed = (today - due_date).num_days();
        self.stages
            .iter()
            .filter(|def| i64::from(def.offset_days) == elapsed)
            .map(|def| def.stage)
            .collect()
    }

    pub fn scheduled_date(&self, stage: Stage, due_date: NaiveDate) -> NaiveDate {
        due_date + Duration::days(i64::from(self.offset(stage)))
    }

    /// Due dates of invoices that have a stage firing tomorrow
    pub fn refresh_due_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let tomorrow = today + Duration::days(1);
        self.stages
            .iter()
            .map(|def| tomorrow - Duration::days(i64::from(def.offset_days)))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Stages ordered after `stage`, with the dates they would fire on
    pub fn later_stages(&self, stage: Stage, due_date: NaiveDate) -> Vec<(Stage, NaiveDate)> {
        self.stages
            .iter()
            .filter(|def| def.ordinal > stage.ordinal())
            .map(|def| (def.stage, self.scheduled_date(def.stage, due_date)))
            .collect()
    }
}

/// Reject offsets outside the accepted range
pub fn validate_offsets(offsets: &HashMap<Stage, i32>) -> AppResult<()> {
    for (stage, days) in offsets {
        if days.abs() > MAX_OFFSET_DAYS {
            return Err(AppError::InvalidInput(format!(
                "Offset for stage {} must be within -{}..={} days, got {}",
                stage, MAX_OFFSET_DAYS, MAX_OFFSET_DAYS, days
            )));
        }
    }
    Ok(())
}
