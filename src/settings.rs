use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Implements ordinal (de)serialization for a fieldless selector enum.
macro_rules! ordinal_selector {
    ($name:ident { $($variant:ident = $ordinal:literal),+ $(,)? }) => {
        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $ordinal,)+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = String;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($ordinal => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), " ordinal {}"),
                        other
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DateFormat {
    #[default]
    DayMonthYear,
    MonthDayYear,
    YearMonthDay,
}

ordinal_selector!(DateFormat {
    DayMonthYear = 0,
    MonthDayYear = 1,
    YearMonthDay = 2,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TimeFormat {
    #[default]
    TwentyFourHour,
    TwelveHour,
}

ordinal_selector!(TimeFormat {
    TwentyFourHour = 0,
    TwelveHour = 1,
});

impl DateFormat {
    pub fn pattern(self) -> &'static str {
        match self {
            DateFormat::DayMonthYear => "%d/%m/%Y",
            DateFormat::MonthDayYear => "%m/%d/%Y",
            DateFormat::YearMonthDay => "%Y-%m-%d",
        }
    }
}

impl TimeFormat {
    pub fn pattern(self, show_seconds: bool) -> &'static str {
        match (self, show_seconds) {
            (TimeFormat::TwentyFourHour, true) => "%H:%M:%S",
            (TimeFormat::TwentyFourHour, false) => "%H:%M",
            (TimeFormat::TwelveHour, true) => "%I:%M:%S %p",
            (TimeFormat::TwelveHour, false) => "%I:%M %p",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

ordinal_selector!(Theme {
    System = 0,
    Light = 1,
    Dark = 2,
});

/// How eagerly widgets refresh; scales every adaptive refresh interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WidgetUpdateFrequency {
    High,
    #[default]
    Normal,
    BatterySaver,
}

ordinal_selector!(WidgetUpdateFrequency {
    High = 0,
    Normal = 1,
    BatterySaver = 2,
});

impl WidgetUpdateFrequency {
    pub fn multiplier(self) -> f64 {
        match self {
            WidgetUpdateFrequency::High => 0.5,
            WidgetUpdateFrequency::Normal => 1.0,
            WidgetUpdateFrequency::BatterySaver => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub date_format: DateFormat,
    pub time_format: TimeFormat,
    pub show_seconds: bool,
    pub theme: Theme,
    pub notifications_enabled: bool,
    pub widget_update_frequency: WidgetUpdateFrequency,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            date_format: DateFormat::default(),
            time_format: TimeFormat::default(),
            show_seconds: true,
            theme: Theme::default(),
            notifications_enabled: true,
            widget_update_frequency: WidgetUpdateFrequency::default(),
        }
    }
}

impl UserSettings {
    pub fn format_datetime<Tz>(&self, at: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let pattern = format!(
            "{} {}",
            self.date_format.pattern(),
            self.time_format.pattern(self.show_seconds)
        );
        at.format(&pattern).to_string()
    }

    /// Formats epoch milliseconds in local time.
    pub fn format_timestamp(&self, epoch_ms: i64) -> String {
        match Local.timestamp_millis_opt(epoch_ms).single() {
            Some(at) => self.format_datetime(&at),
            None => format!("@{epoch_ms}"),
        }
    }
}

/// Settings document backed by a JSON file. Other processes may rewrite
/// the file; call [`SettingsStore::reload`] to pick their changes up.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = read_settings(&path)?;
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> UserSettings {
        self.read().clone()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.read().notifications_enabled
    }

    pub fn widget_update_frequency(&self) -> WidgetUpdateFrequency {
        self.read().widget_update_frequency
    }

    /// Applies `change` and writes the whole document back.
    pub fn update<F>(&self, change: F) -> Result<UserSettings>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        change(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    pub fn reload(&self) -> Result<()> {
        let data = read_settings(&self.path)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_settings(path: &Path) -> Result<UserSettings> {
    if !path.exists() {
        return Ok(UserSettings::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
        warn!("Settings file {} is malformed, using defaults: {err}", path.display());
        UserSettings::default()
    }))
}
