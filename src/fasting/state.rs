//! Fasting progression and the pure elapsed-time classifier.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Named stages of a fast, ordered by the hour at which each begins.
///
/// Stored as its ordinal (0..=4) both in the timer namespace and inside
/// serialized completed fasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FastingState {
    NotFasting,
    EarlyFast,
    Ketosis,
    Autophagy,
    DeepFasting,
}

impl Default for FastingState {
    fn default() -> Self {
        FastingState::NotFasting
    }
}

impl FastingState {
    /// All variants in threshold order.
    pub const ALL: [FastingState; 5] = [
        FastingState::NotFasting,
        FastingState::EarlyFast,
        FastingState::Ketosis,
        FastingState::Autophagy,
        FastingState::DeepFasting,
    ];

    /// Elapsed hours at which this stage begins.
    pub const fn threshold_hours(self) -> i64 {
        match self {
            FastingState::NotFasting => 0,
            FastingState::EarlyFast => 5,
            FastingState::Ketosis => 13,
            FastingState::Autophagy => 17,
            FastingState::DeepFasting => 25,
        }
    }

    pub const fn threshold_millis(self) -> i64 {
        self.threshold_hours() * MILLIS_PER_HOUR
    }

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Inverse of [`FastingState::ordinal`]. Out-of-range values yield `None`.
    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FastingState::NotFasting => "NotFasting",
            FastingState::EarlyFast => "EarlyFast",
            FastingState::Ketosis => "Ketosis",
            FastingState::Autophagy => "Autophagy",
            FastingState::DeepFasting => "DeepFasting",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            FastingState::NotFasting => "Not fasting",
            FastingState::EarlyFast => "Early fast",
            FastingState::Ketosis => "Ketosis",
            FastingState::Autophagy => "Autophagy",
            FastingState::DeepFasting => "Deep fasting",
        }
    }
}

impl fmt::Display for FastingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl From<FastingState> for u8 {
    fn from(state: FastingState) -> Self {
        state.ordinal()
    }
}

impl TryFrom<u8> for FastingState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        FastingState::from_ordinal(i64::from(value))
            .ok_or_else(|| format!("unknown fasting state ordinal {value}"))
    }
}

/// Highest-threshold state reached after `elapsed_hours`. Negative input
/// is treated as zero.
pub fn classify(elapsed_hours: i64) -> FastingState {
    let hours = elapsed_hours.max(0);
    FastingState::ALL
        .iter()
        .rev()
        .copied()
        .find(|state| state.threshold_hours() <= hours)
        .unwrap_or(FastingState::NotFasting)
}

/// Classifies a millisecond duration using whole elapsed hours.
pub fn classify_millis(elapsed_ms: i64) -> FastingState {
    classify(whole_hours(elapsed_ms))
}

pub fn whole_hours(elapsed_ms: i64) -> i64 {
    elapsed_ms.max(0) / MILLIS_PER_HOUR
}

/// Immediate successor in threshold order, `None` at the ceiling.
pub fn next_state(current: FastingState) -> Option<FastingState> {
    FastingState::ALL
        .get(usize::from(current.ordinal()) + 1)
        .copied()
}

/// Hours remaining until the stage after the one `elapsed_hours` falls in.
pub fn hours_until_next(elapsed_hours: i64) -> Option<i64> {
    let hours = elapsed_hours.max(0);
    next_state(classify(hours)).map(|next| next.threshold_hours() - hours)
}

/// Milliseconds until the next threshold is crossed, `None` at the ceiling.
pub fn millis_until_next(elapsed_ms: i64) -> Option<i64> {
    let elapsed = elapsed_ms.max(0);
    next_state(classify_millis(elapsed)).map(|next| next.threshold_millis() - elapsed)
}
