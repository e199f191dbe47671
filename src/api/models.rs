use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationError};

use crate::ledger::models::{CaseStatus, Stage};
use crate::stage_engine::catalog::MAX_OFFSET_DAYS;
use crate::stage_engine::StageDefinition;

// ========== REQUEST MODELS ==========

#[derive(Debug, Deserialize)]
pub struct ListCasesQuery {
    pub status: Option<CaseStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SyncStatusQuery {
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<i64>,
}

/// Offsets to change; stages left out keep their current value
#[derive(Debug, Default, Deserialize, Validate)]
pub struct StageOffsetsRequest {
    #[validate(custom = "validate_offset_days")]
    pub reminder: Option<i32>,
    #[validate(custom = "validate_offset_days")]
    pub overdue: Option<i32>,
    #[validate(custom = "validate_offset_days")]
    pub demand: Option<i32>,
    #[validate(custom = "validate_offset_days")]
    pub pre_escalation: Option<i32>,
    #[validate(custom = "validate_offset_days")]
    pub escalated: Option<i32>,
}

fn validate_offset_days(days: i32) -> Result<(), ValidationError> {
    if days.abs() > MAX_OFFSET_DAYS {
        return Err(ValidationError::new("offset_out_of_range"));
    }
    Ok(())
}

impl StageOffsetsRequest {
    pub fn into_offsets(self) -> HashMap<Stage, i32> {
        [
            (Stage::Reminder, self.reminder),
            (Stage::Overdue, self.overdue),
            (Stage::Demand, self.demand),
            (Stage::PreEscalation, self.pre_escalation),
            (Stage::Escalated, self.escalated),
        ]
        .into_iter()
        .filter_map(|(stage, days)| days.map(|d| (stage, d)))
        .collect()
    }
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub database: bool,
}

#[derive(Debug, Serialize)]
pub struct StageSettingsResponse {
    pub stages: Vec<StageDefinition>,
}
