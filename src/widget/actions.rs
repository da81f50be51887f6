use std::{fmt, str::FromStr};

use crate::{history::CompletedFast, timer::AdjustRejection};

const ACTION_PREFIX: &str = "fastrack.widget.";

/// Taps a widget can deliver, addressed by an identifier that survives the
/// hop between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetAction {
    Toggle,
    ResetConfirmed,
    AdjustTime,
    Refresh,
}

impl WidgetAction {
    pub const ALL: [WidgetAction; 4] = [
        WidgetAction::Toggle,
        WidgetAction::ResetConfirmed,
        WidgetAction::AdjustTime,
        WidgetAction::Refresh,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            WidgetAction::Toggle => "toggle",
            WidgetAction::ResetConfirmed => "reset-confirmed",
            WidgetAction::AdjustTime => "adjust-time",
            WidgetAction::Refresh => "refresh",
        }
    }

    pub fn identifier(self) -> String {
        format!("{ACTION_PREFIX}{}", self.short_name())
    }
}

impl fmt::Display for WidgetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for WidgetAction {
    type Err = String;

    /// Accepts either the full identifier or its short name.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let name = raw.strip_prefix(ACTION_PREFIX).unwrap_or(raw);
        WidgetAction::ALL
            .iter()
            .copied()
            .find(|action| action.short_name() == name)
            .ok_or_else(|| format!("unknown widget action '{raw}'"))
    }
}

/// What happened in response to a tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapOutcome {
    Started,
    /// The fast is running; the host must confirm before sending
    /// [`WidgetAction::ResetConfirmed`].
    ConfirmReset,
    Reset(Option<CompletedFast>),
    /// The host should open its adjustment interface and then call
    /// `WidgetSync::apply_adjustment`.
    AdjustmentRequested,
    Adjusted,
    AdjustRejected(AdjustRejection),
    Refreshed,
}
