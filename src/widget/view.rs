use serde::Serialize;

use crate::{fasting::FastingState, timer::TimerSnapshot};

/// Colour and icon a surface uses for a fasting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateAppearance {
    pub color: &'static str,
    pub icon: &'static str,
}

pub fn appearance(state: FastingState) -> StateAppearance {
    match state {
        FastingState::NotFasting => StateAppearance {
            color: "#9E9E9E",
            icon: "ic_state_not_fasting",
        },
        FastingState::EarlyFast => StateAppearance {
            color: "#FFC107",
            icon: "ic_state_early_fast",
        },
        FastingState::Ketosis => StateAppearance {
            color: "#FF9800",
            icon: "ic_state_ketosis",
        },
        FastingState::Autophagy => StateAppearance {
            color: "#4CAF50",
            icon: "ic_state_autophagy",
        },
        FastingState::DeepFasting => StateAppearance {
            color: "#3F51B5",
            icon: "ic_state_deep_fasting",
        },
    }
}

/// Everything a home-screen surface draws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetView {
    pub is_running: bool,
    pub state: FastingState,
    pub elapsed_hours: i64,
    pub hours_until_next: Option<i64>,
    pub appearance: StateAppearance,
}

impl WidgetView {
    pub fn from_snapshot(snapshot: &TimerSnapshot) -> Self {
        Self {
            is_running: snapshot.is_running,
            state: snapshot.current_state,
            elapsed_hours: snapshot.elapsed_hours(),
            hours_until_next: snapshot
                .is_running
                .then(|| snapshot.hours_until_next())
                .flatten(),
            appearance: appearance(snapshot.current_state),
        }
    }

    pub fn toggle_label(&self) -> &'static str {
        if self.is_running {
            "End fast"
        } else {
            "Start fast"
        }
    }
}
