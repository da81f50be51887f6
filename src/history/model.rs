use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fasting::FastingState;

/// One finished fast. Everything but `note` is fixed once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedFast {
    pub id: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds.
    pub end_time: i64,
    pub duration: i64,
    pub max_fasting_state: FastingState,
    #[serde(default)]
    pub note: Option<String>,
}

impl CompletedFast {
    pub fn new(start_time: i64, end_time: i64, max_fasting_state: FastingState) -> Self {
        let end_time = end_time.max(start_time);
        Self {
            id: Uuid::new_v4().to_string(),
            start_time,
            end_time,
            duration: end_time - start_time,
            max_fasting_state,
            note: None,
        }
    }
}

/// Aggregates over the session log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total_fasts: usize,
    pub total_duration_ms: i64,
    pub longest_duration_ms: i64,
    pub average_duration_ms: i64,
    pub deepest_state: FastingState,
}

impl HistorySummary {
    pub fn from_fasts(fasts: &[CompletedFast]) -> Self {
        if fasts.is_empty() {
            return Self::default();
        }

        let total_duration_ms: i64 = fasts.iter().map(|fast| fast.duration).sum();
        Self {
            total_fasts: fasts.len(),
            total_duration_ms,
            longest_duration_ms: fasts.iter().map(|fast| fast.duration).max().unwrap_or(0),
            average_duration_ms: total_duration_ms / fasts.len() as i64,
            deepest_state: fasts
                .iter()
                .map(|fast| fast.max_fasting_state)
                .max()
                .unwrap_or_default(),
        }
    }
}
