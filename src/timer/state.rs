use anyhow::Result;
use log::warn;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db::prefs::{get_value, put_value, TIMER_NAMESPACE},
    fasting::{classify_millis, FastingState},
    history::CompletedFast,
};

const KEY_IS_RUNNING: &str = "isRunning";
const KEY_START_TIME: &str = "startTime";
const KEY_ELAPSED_TIME: &str = "elapsedTime";
const KEY_MAX_STATE: &str = "maxFastingState";

/// Why a start-time adjustment was refused. Nothing is mutated when one of
/// these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdjustRejection {
    #[error("no fast in progress to adjust")]
    NothingToAdjust,
    #[error("start time cannot be in the future")]
    StartInFuture,
    #[error("elapsed time cannot be negative")]
    NegativeElapsed,
    #[error("start time must be after the Unix epoch")]
    StartOutOfRange,
}

/// The singleton timer document shared by every engine instance.
///
/// While `is_running`, the elapsed time is `now - start_time_ms` and
/// `elapsed_ms` is stale. While stopped, `elapsed_ms` is frozen and
/// `start_time_ms + elapsed_ms` is the instant the timer was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    pub is_running: bool,
    pub start_time_ms: i64,
    pub elapsed_ms: i64,
    pub max_state: FastingState,
}

impl TimerRecord {
    pub fn elapsed_at(&self, now_ms: i64) -> i64 {
        if self.is_running {
            now_ms.saturating_sub(self.start_time_ms).max(0)
        } else {
            self.elapsed_ms.max(0)
        }
    }

    pub fn current_state_at(&self, now_ms: i64) -> FastingState {
        classify_millis(self.elapsed_at(now_ms))
    }

    /// Running, or holding accumulated time from an earlier run.
    pub fn has_progress(&self) -> bool {
        self.is_running || self.elapsed_ms > 0
    }

    /// Returns `false` when already running.
    pub fn start(&mut self, now_ms: i64) -> bool {
        if self.is_running {
            return false;
        }
        // Resume from the accumulated snapshot rather than from zero.
        self.start_time_ms = now_ms.saturating_sub(self.elapsed_ms.max(0));
        self.is_running = true;
        true
    }

    /// Returns `false` when not running.
    pub fn stop(&mut self, now_ms: i64) -> bool {
        if !self.is_running {
            return false;
        }
        self.elapsed_ms = self.elapsed_at(now_ms);
        self.is_running = false;
        self.observe(now_ms);
        true
    }

    /// Zeroes the record, returning the fast it described if there was one.
    pub fn reset(&mut self, now_ms: i64) -> Option<CompletedFast> {
        let completed = if self.has_progress() {
            let elapsed = self.elapsed_at(now_ms);
            let peak = self.max_state.max(classify_millis(elapsed));
            let end_time = if self.is_running {
                now_ms
            } else if self.start_time_ms > 0 {
                self.start_time_ms.saturating_add(elapsed)
            } else {
                now_ms
            };
            let start_time = end_time.saturating_sub(elapsed);
            Some(CompletedFast::new(start_time, end_time, peak))
        } else {
            None
        };

        *self = TimerRecord::default();
        completed
    }

    /// Moves the start instant earlier by `delta_ms` (later when negative).
    pub fn adjust_start(&mut self, delta_ms: i64, now_ms: i64) -> Result<(), AdjustRejection> {
        if !self.has_progress() {
            return Err(AdjustRejection::NothingToAdjust);
        }

        let new_start = self.start_time_ms.saturating_sub(delta_ms);
        if self.is_running {
            if new_start > now_ms {
                return Err(AdjustRejection::StartInFuture);
            }
            // A running record must keep a positive start.
            if new_start <= 0 {
                return Err(AdjustRejection::StartOutOfRange);
            }
            self.start_time_ms = new_start;
        } else {
            let new_elapsed = self.elapsed_ms.saturating_add(delta_ms);
            if new_elapsed < 0 {
                return Err(AdjustRejection::NegativeElapsed);
            }
            if new_start > now_ms {
                return Err(AdjustRejection::StartInFuture);
            }
            if new_start <= 0 {
                return Err(AdjustRejection::StartOutOfRange);
            }
            self.start_time_ms = new_start;
            self.elapsed_ms = new_elapsed;
        }

        self.observe(now_ms);
        Ok(())
    }

    /// Raises the peak state if the current classification exceeds it and
    /// returns the newly reached state. The peak never decreases here.
    pub fn observe(&mut self, now_ms: i64) -> Option<FastingState> {
        let current = self.current_state_at(now_ms);
        if current > self.max_state {
            self.max_state = current;
            Some(current)
        } else {
            None
        }
    }

    /// Reads the record from the timer namespace. Missing or unparsable
    /// keys fall back to their defaults.
    pub fn load(conn: &Connection) -> Result<Self> {
        let is_running = read_key(conn, KEY_IS_RUNNING, |raw| raw.parse::<bool>().ok())?;
        let start_time_ms = read_key(conn, KEY_START_TIME, |raw| raw.parse::<i64>().ok())?;
        let elapsed_ms = read_key(conn, KEY_ELAPSED_TIME, |raw| raw.parse::<i64>().ok())?;
        let max_state = read_key(conn, KEY_MAX_STATE, |raw| {
            raw.parse::<i64>().ok().and_then(FastingState::from_ordinal)
        })?;

        let mut record = Self {
            is_running: is_running.unwrap_or(false),
            start_time_ms: start_time_ms.unwrap_or(0),
            elapsed_ms: elapsed_ms.unwrap_or(0),
            max_state: max_state.unwrap_or_default(),
        };

        if record.is_running && record.start_time_ms <= 0 {
            warn!("Persisted timer marked running without a start time; treating as stopped");
            record.is_running = false;
        }

        Ok(record)
    }

    pub fn store(&self, conn: &Connection) -> Result<()> {
        put_value(conn, TIMER_NAMESPACE, KEY_IS_RUNNING, &self.is_running.to_string())?;
        put_value(conn, TIMER_NAMESPACE, KEY_START_TIME, &self.start_time_ms.to_string())?;
        put_value(conn, TIMER_NAMESPACE, KEY_ELAPSED_TIME, &self.elapsed_ms.to_string())?;
        put_value(
            conn,
            TIMER_NAMESPACE,
            KEY_MAX_STATE,
            &self.max_state.ordinal().to_string(),
        )?;
        Ok(())
    }
}

fn read_key<T>(
    conn: &Connection,
    key: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<Option<T>> {
    let Some(raw) = get_value(conn, TIMER_NAMESPACE, key)? else {
        return Ok(None);
    };
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!("Ignoring malformed timer value {key}={raw:?}");
    }
    Ok(parsed)
}
