use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock, Weak},
    time::Duration,
};

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::{sync::Mutex, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{
    history::HistoryStore,
    settings::SettingsStore,
    timer::{FastingTimer, TimerSnapshot},
};

use super::{
    actions::{TapOutcome, WidgetAction},
    schedule::{refresh_interval, FALLBACK_INTERVAL},
    view::WidgetView,
};

// Set to false to silence per-pass refresh logging.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_warn};

pub type SurfaceId = u32;

/// One placed home-screen widget.
pub trait WidgetSurface: Send + Sync {
    fn id(&self) -> SurfaceId;
    fn render(&self, view: &WidgetView) -> Result<()>;
}

/// Prints each render to the log. The CLI host registers one of these.
#[derive(Debug, Clone, Copy)]
pub struct LogSurface {
    id: SurfaceId,
}

impl LogSurface {
    pub fn new(id: SurfaceId) -> Self {
        Self { id }
    }
}

impl WidgetSurface for LogSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn render(&self, view: &WidgetView) -> Result<()> {
        let countdown = view
            .hours_until_next
            .map(|hours| format!(", next state in {hours}h"))
            .unwrap_or_default();
        info!(
            "[widget {}] {} | {}h{} | {} [{}]",
            self.id,
            view.state,
            view.elapsed_hours,
            countdown,
            view.toggle_label(),
            view.appearance.color
        );
        Ok(())
    }
}

struct RefreshLoop {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct SyncInner {
    timer: FastingTimer,
    history: HistoryStore,
    settings: Arc<SettingsStore>,
    surfaces: RwLock<BTreeMap<SurfaceId, Arc<dyn WidgetSurface>>>,
    refresh: Mutex<Option<RefreshLoop>>,
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        if let Some(refresh) = self.refresh.get_mut().take() {
            refresh.cancel.cancel();
            refresh.handle.abort();
        }
    }
}

/// Keeps placed widgets in step with the persisted timer.
///
/// The refresh loop runs while at least one surface is registered. Every
/// render pass re-reads the timer from storage, so changes made by other
/// instances show up on the next pass.
#[derive(Clone)]
pub struct WidgetSync {
    inner: Arc<SyncInner>,
}

impl WidgetSync {
    pub fn new(timer: FastingTimer, history: HistoryStore, settings: Arc<SettingsStore>) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                timer,
                history,
                settings,
                surfaces: RwLock::new(BTreeMap::new()),
                refresh: Mutex::new(None),
            }),
        }
    }

    pub fn surface_count(&self) -> usize {
        self.inner
            .surfaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn is_refreshing(&self) -> bool {
        self.inner.refresh.lock().await.is_some()
    }

    /// Registers a surface. Replaces any surface with the same id. Starts
    /// the refresh loop for the first surface, otherwise renders right away.
    pub async fn add_surface(&self, surface: Arc<dyn WidgetSurface>) {
        let id = surface.id();
        self.inner
            .surfaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, surface);
        debug!("Widget surface {id} added");

        let mut refresh = self.inner.refresh.lock().await;
        if refresh.is_none() {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(refresh_loop(Arc::downgrade(&self.inner), cancel.clone()));
            *refresh = Some(RefreshLoop { handle, cancel });
            info!("Widget refresh loop started");
            return;
        }
        drop(refresh);

        if let Err(err) = self.render_all().await {
            warn!("{err:#}");
        }
    }

    /// Unregisters a surface. Removing the last one stops the refresh loop.
    pub async fn remove_surface(&self, id: SurfaceId) -> bool {
        let (removed, remaining) = {
            let mut surfaces = self
                .inner
                .surfaces
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (surfaces.remove(&id).is_some(), surfaces.len())
        };

        if removed {
            debug!("Widget surface {id} removed");
        }
        if remaining == 0 {
            self.stop().await;
        }
        removed
    }

    /// Stops the refresh loop and waits for it. No render runs after this
    /// returns.
    pub async fn stop(&self) {
        let refresh = self.inner.refresh.lock().await.take();
        if let Some(refresh) = refresh {
            refresh.cancel.cancel();
            if let Err(err) = refresh.handle.await {
                if !err.is_cancelled() {
                    warn!("Widget refresh loop ended abnormally: {err}");
                }
            }
            info!("Widget refresh loop stopped");
        }
    }

    /// Re-reads the timer and pushes it to every surface. Fails if any
    /// surface failed; the others are still rendered.
    pub async fn render_all(&self) -> Result<TimerSnapshot> {
        let snapshot = self.inner.timer.reload().await;
        let view = WidgetView::from_snapshot(&snapshot);

        let surfaces: Vec<_> = self
            .inner
            .surfaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let mut failures = Vec::new();
        for surface in &surfaces {
            if let Err(err) = surface.render(&view) {
                failures.push(format!("surface {}: {err:#}", surface.id()));
            }
        }

        if failures.is_empty() {
            Ok(snapshot)
        } else {
            Err(anyhow!(
                "{} of {} widget surfaces failed to render: {}",
                failures.len(),
                surfaces.len(),
                failures.join("; ")
            ))
        }
    }

    /// Applies a tap delivered by a surface.
    pub async fn handle_action(&self, action: WidgetAction) -> TapOutcome {
        debug!("Widget action {}", action.identifier());
        let outcome = match action {
            WidgetAction::Toggle => {
                if self.inner.timer.reload().await.is_running {
                    return TapOutcome::ConfirmReset;
                }
                self.inner.timer.start().await;
                TapOutcome::Started
            }
            WidgetAction::ResetConfirmed => {
                let completed = self.inner.timer.reset().await;
                if let Some(fast) = &completed {
                    if let Err(err) = self.inner.history.save(fast.clone()).await {
                        warn!("Failed to record completed fast {}: {err:#}", fast.id);
                    }
                }
                TapOutcome::Reset(completed)
            }
            WidgetAction::AdjustTime => return TapOutcome::AdjustmentRequested,
            WidgetAction::Refresh => TapOutcome::Refreshed,
        };

        self.render_or_log().await;
        outcome
    }

    /// Applies an adjustment chosen after [`TapOutcome::AdjustmentRequested`]
    /// and re-renders immediately.
    pub async fn apply_adjustment(&self, delta_ms: i64) -> TapOutcome {
        match self.inner.timer.adjust_start_time(delta_ms).await {
            Ok(()) => {
                self.render_or_log().await;
                TapOutcome::Adjusted
            }
            Err(rejection) => TapOutcome::AdjustRejected(rejection),
        }
    }

    async fn render_or_log(&self) {
        if let Err(err) = self.render_all().await {
            warn!("{err:#}");
        }
    }

    /// One refresh pass. A failing or panicking render is contained and
    /// answered with the fallback interval.
    async fn refresh_pass(&self) -> Duration {
        let pass = self.clone();
        match tokio::spawn(async move { pass.render_all().await }).await {
            Ok(Ok(snapshot)) => {
                if let Err(err) = self.inner.settings.reload() {
                    log_warn!("Failed to reload settings for widget refresh: {err:#}");
                }
                let delay =
                    refresh_interval(&snapshot, self.inner.settings.widget_update_frequency());
                log_debug!("Next widget refresh in {}s", delay.as_secs());
                delay
            }
            Ok(Err(err)) => {
                log_warn!("Widget refresh failed: {err:#}");
                FALLBACK_INTERVAL
            }
            Err(err) => {
                log_error!("Widget refresh panicked: {err}");
                FALLBACK_INTERVAL
            }
        }
    }
}

async fn refresh_loop(inner: Weak<SyncInner>, cancel: CancellationToken) {
    loop {
        let delay = {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            WidgetSync { inner }.refresh_pass().await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::Database,
        fasting::{FastingState, MILLIS_PER_HOUR},
        settings::WidgetUpdateFrequency,
        timer::{AdjustRejection, ManualClock, TimerOptions},
        widget::schedule::{FIRST_HOUR_INTERVAL, IDLE_INTERVAL},
    };
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct RecordingSurface {
        id: SurfaceId,
        views: StdMutex<Vec<WidgetView>>,
    }

    impl RecordingSurface {
        fn with_id(id: SurfaceId) -> Arc<Self> {
            Arc::new(Self {
                id,
                ..Default::default()
            })
        }

        fn last(&self) -> Option<WidgetView> {
            self.views.lock().unwrap().last().cloned()
        }

        fn renders(&self) -> usize {
            self.views.lock().unwrap().len()
        }
    }

    impl WidgetSurface for RecordingSurface {
        fn id(&self) -> SurfaceId {
            self.id
        }

        fn render(&self, view: &WidgetView) -> Result<()> {
            self.views.lock().unwrap().push(view.clone());
            Ok(())
        }
    }

    struct FailingSurface;

    impl WidgetSurface for FailingSurface {
        fn id(&self) -> SurfaceId {
            99
        }

        fn render(&self, _view: &WidgetView) -> Result<()> {
            Err(anyhow!("launcher went away"))
        }
    }

    struct PanickingSurface;

    impl WidgetSurface for PanickingSurface {
        fn id(&self) -> SurfaceId {
            98
        }

        fn render(&self, _view: &WidgetView) -> Result<()> {
            panic!("render blew up");
        }
    }

    struct Fixture {
        dir: TempDir,
        db: Database,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db = Database::new(dir.path().join("widget.sqlite3")).unwrap();
            Self {
                dir,
                db,
                clock: Arc::new(ManualClock::new(T0)),
            }
        }

        async fn timer(&self) -> FastingTimer {
            let options = TimerOptions {
                tick_interval: Duration::from_secs(3600),
            };
            FastingTimer::load(self.db.clone(), self.clock.clone(), options).await
        }

        fn settings(&self) -> Arc<SettingsStore> {
            Arc::new(SettingsStore::new(self.dir.path().join("settings.json")).unwrap())
        }

        async fn sync(&self) -> WidgetSync {
            WidgetSync::new(
                self.timer().await,
                HistoryStore::new(self.db.clone()),
                self.settings(),
            )
        }
    }

    /// Registers a surface without starting the refresh loop, so renders
    /// come only from the calls under test.
    fn attach(sync: &WidgetSync, surface: Arc<dyn WidgetSurface>) {
        sync.inner
            .surfaces
            .write()
            .unwrap()
            .insert(surface.id(), surface);
    }

    #[tokio::test]
    async fn refresh_loop_follows_surface_count() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        assert!(!sync.is_refreshing().await);

        sync.add_surface(RecordingSurface::with_id(1)).await;
        sync.add_surface(RecordingSurface::with_id(2)).await;
        assert!(sync.is_refreshing().await);
        assert_eq!(sync.surface_count(), 2);

        assert!(sync.remove_surface(1).await);
        assert!(sync.is_refreshing().await);
        assert!(!sync.remove_surface(1).await);
        assert!(sync.remove_surface(2).await);
        assert!(!sync.is_refreshing().await);
    }

    #[tokio::test]
    async fn toggle_starts_then_asks_for_confirmation() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        let surface = RecordingSurface::with_id(1);
        attach(&sync, surface.clone());

        assert_eq!(sync.handle_action(WidgetAction::Toggle).await, TapOutcome::Started);
        assert!(surface.last().unwrap().is_running);

        let renders = surface.renders();
        assert_eq!(
            sync.handle_action(WidgetAction::Toggle).await,
            TapOutcome::ConfirmReset
        );
        // Still running; confirmation is the host's job.
        assert!(sync.inner.timer.is_running().await);
        assert_eq!(surface.renders(), renders);
        sync.inner.timer.shutdown().await;
    }

    #[tokio::test]
    async fn confirmed_reset_records_history() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        let surface = RecordingSurface::with_id(1);
        attach(&sync, surface.clone());

        sync.handle_action(WidgetAction::Toggle).await;
        fx.clock.advance(14 * MILLIS_PER_HOUR);
        sync.inner.timer.tick().await;

        let TapOutcome::Reset(Some(fast)) = sync.handle_action(WidgetAction::ResetConfirmed).await
        else {
            panic!("expected a completed fast");
        };
        assert_eq!(fast.duration, 14 * MILLIS_PER_HOUR);
        assert_eq!(fast.max_fasting_state, FastingState::Ketosis);

        let history = HistoryStore::new(fx.db.clone()).all().await.unwrap();
        assert_eq!(history, vec![fast]);

        let view = surface.last().unwrap();
        assert!(!view.is_running);
        assert_eq!(view.elapsed_hours, 0);
    }

    #[tokio::test]
    async fn reset_without_progress_saves_nothing() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        assert_eq!(
            sync.handle_action(WidgetAction::ResetConfirmed).await,
            TapOutcome::Reset(None)
        );
        assert!(HistoryStore::new(fx.db.clone()).all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adjustment_renders_immediately() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        let surface = RecordingSurface::with_id(1);
        attach(&sync, surface.clone());

        assert_eq!(
            sync.handle_action(WidgetAction::AdjustTime).await,
            TapOutcome::AdjustmentRequested
        );
        assert_eq!(
            sync.apply_adjustment(MILLIS_PER_HOUR).await,
            TapOutcome::AdjustRejected(AdjustRejection::NothingToAdjust)
        );

        sync.handle_action(WidgetAction::Toggle).await;
        assert_eq!(
            sync.apply_adjustment(6 * MILLIS_PER_HOUR).await,
            TapOutcome::Adjusted
        );
        let view = surface.last().unwrap();
        assert_eq!(view.elapsed_hours, 6);
        assert_eq!(view.state, FastingState::EarlyFast);
        sync.inner.timer.shutdown().await;
    }

    #[tokio::test]
    async fn renders_reflect_other_instances() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        let app = fx.timer().await;
        let surface = RecordingSurface::with_id(1);
        attach(&sync, surface.clone());

        app.start().await;
        fx.clock.advance(2 * MILLIS_PER_HOUR);
        let snapshot = sync.render_all().await.unwrap();
        assert!(snapshot.is_running);
        assert_eq!(surface.last().unwrap().elapsed_hours, 2);

        sync.inner.timer.shutdown().await;
        app.shutdown().await;
    }

    #[tokio::test]
    async fn failing_surface_does_not_block_others() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        let surface = RecordingSurface::with_id(1);
        attach(&sync, surface.clone());
        attach(&sync, Arc::new(FailingSurface));

        let err = sync.render_all().await.unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert_eq!(surface.renders(), 1);
    }

    #[tokio::test]
    async fn refresh_pass_schedules_from_state() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        sync.inner
            .settings
            .update(|s| s.widget_update_frequency = WidgetUpdateFrequency::Normal)
            .unwrap();

        assert_eq!(sync.refresh_pass().await, IDLE_INTERVAL);

        sync.inner.timer.start().await;
        assert_eq!(sync.refresh_pass().await, FIRST_HOUR_INTERVAL);
        sync.inner.timer.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_pass_contains_failures_and_panics() {
        let fx = Fixture::new();
        let sync = fx.sync().await;
        attach(&sync, Arc::new(FailingSurface));
        assert_eq!(sync.refresh_pass().await, FALLBACK_INTERVAL);

        attach(&sync, Arc::new(PanickingSurface));
        assert_eq!(sync.refresh_pass().await, FALLBACK_INTERVAL);
    }
}
