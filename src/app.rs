use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::{
    config::AppConfig,
    db::Database,
    history::{CompletedFast, HistoryStore},
    notifications::{NotificationForwarder, Notifier},
    settings::SettingsStore,
    timer::{Clock, FastingTimer, TimerOptions},
    widget::WidgetSync,
};

/// Everything one process needs, built once at entry and handed to each
/// consumer.
pub struct FastingApp {
    settings: Arc<SettingsStore>,
    timer: FastingTimer,
    history: HistoryStore,
    widgets: WidgetSync,
    notifications: Mutex<Option<NotificationForwarder>>,
}

impl FastingApp {
    pub async fn open(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.ensure_data_dir()?;

        let db = Database::new(config.database_path())
            .with_context(|| format!("failed to open {}", config.database_path().display()))?;
        let settings = Arc::new(SettingsStore::new(config.settings_path())?);

        let options = TimerOptions {
            tick_interval: config.tick_interval,
        };
        let timer = FastingTimer::load(db.clone(), clock, options).await;
        let history = HistoryStore::new(db);
        let widgets = WidgetSync::new(timer.clone(), history.clone(), Arc::clone(&settings));
        let forwarder = NotificationForwarder::spawn(&timer, Arc::clone(&settings), notifier);

        info!("Opened fasting data in {}", config.data_dir.display());

        Ok(Self {
            settings,
            timer,
            history,
            widgets,
            notifications: Mutex::new(Some(forwarder)),
        })
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn timer(&self) -> &FastingTimer {
        &self.timer
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn widgets(&self) -> &WidgetSync {
        &self.widgets
    }

    /// Resets the timer and keeps the resulting session in the history.
    pub async fn complete_fast(&self) -> Result<Option<CompletedFast>> {
        let Some(fast) = self.timer.reset().await else {
            return Ok(None);
        };
        self.history.save(fast.clone()).await?;
        Ok(Some(fast))
    }

    /// The host moved out of view. The fast itself keeps running in storage.
    pub async fn on_background(&self) {
        self.save_state().await;
        self.release_resources().await;
    }

    /// The host is visible again: pick up changes made elsewhere and resume
    /// ticking if a fast is running.
    pub async fn on_foreground(&self) {
        if let Err(err) = self.settings.reload() {
            warn!("Failed to reload settings: {err:#}");
        }
        let snapshot = self.timer.reload().await;
        info!(
            "Foregrounded: running={} elapsed={}ms",
            snapshot.is_running, snapshot.elapsed_ms
        );
    }

    pub async fn on_low_memory(&self) {
        self.save_state().await;
        self.release_resources().await;
    }

    pub async fn save_state(&self) {
        if let Err(err) = self.timer.save_state().await {
            warn!("Failed to save timer state: {err:#}");
        }
    }

    pub async fn release_resources(&self) {
        self.timer.release_resources().await;
    }

    /// Stops every background task. No writes happen after this returns.
    pub async fn shutdown(&self) {
        self.widgets.stop().await;
        if let Some(forwarder) = self.notifications.lock().await.take() {
            forwarder.stop().await;
        }
        self.timer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fasting::MILLIS_PER_HOUR,
        notifications::LogNotifier,
        timer::ManualClock,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open(dir: &TempDir, clock: Arc<ManualClock>) -> FastingApp {
        let config = AppConfig {
            data_dir: dir.path().join("data"),
            tick_interval: Duration::from_secs(3600),
            debug: false,
        };
        FastingApp::open(config, clock, Arc::new(LogNotifier))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn complete_fast_lands_in_history() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let app = open(&dir, clock.clone()).await;

        assert_eq!(app.complete_fast().await.unwrap(), None);

        app.timer().start().await;
        clock.advance(16 * MILLIS_PER_HOUR);
        let fast = app.complete_fast().await.unwrap().expect("fast recorded");
        assert_eq!(app.history().all().await.unwrap(), vec![fast]);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn lifecycle_callbacks_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let app = open(&dir, clock.clone()).await;
        app.timer().start().await;

        app.on_background().await;
        app.on_background().await;
        app.on_low_memory().await;
        assert!(app.timer().is_running().await);

        app.on_foreground().await;
        app.on_foreground().await;
        clock.advance(MILLIS_PER_HOUR);
        assert_eq!(app.timer().current_elapsed_time().await, MILLIS_PER_HOUR);

        app.shutdown().await;
        app.shutdown().await;
    }

    #[tokio::test]
    async fn reopening_restores_the_running_fast() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let first = open(&dir, clock.clone()).await;
        first.timer().start().await;
        first.shutdown().await;
        drop(first);

        clock.advance(3 * MILLIS_PER_HOUR);
        let second = open(&dir, clock.clone()).await;
        let snapshot = second.timer().snapshot().await;
        assert!(snapshot.is_running);
        assert_eq!(snapshot.elapsed_ms, 3 * MILLIS_PER_HOUR);
        second.shutdown().await;
    }
}
