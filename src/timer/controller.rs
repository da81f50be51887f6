use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    fasting::{hours_until_next, whole_hours, FastingState},
    history::CompletedFast,
};

use super::{AdjustRejection, Clock, TimerRecord};

// Set to false to silence tick and storage-fallback logging in this module.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const EVENT_CAPACITY: usize = 64;

/// Read-only view of the timer at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub is_running: bool,
    pub start_time_ms: i64,
    pub elapsed_ms: i64,
    pub current_state: FastingState,
    pub max_state: FastingState,
}

impl TimerSnapshot {
    pub fn from_record(record: &TimerRecord, now_ms: i64) -> Self {
        let elapsed_ms = record.elapsed_at(now_ms);
        Self {
            is_running: record.is_running,
            start_time_ms: record.start_time_ms,
            elapsed_ms,
            current_state: record.current_state_at(now_ms),
            max_state: record.max_state,
        }
    }

    pub fn elapsed_hours(&self) -> i64 {
        whole_hours(self.elapsed_ms)
    }

    pub fn hours_until_next(&self) -> Option<i64> {
        hours_until_next(self.elapsed_hours())
    }
}

#[derive(Debug, Clone)]
pub enum TimerEvent {
    /// Emitted after every operation and every tick.
    StateChanged(TimerSnapshot),
    /// The peak state advanced while the timer was ticking.
    FastingStateReached(FastingState),
    /// A reset produced a session. The caller of `reset` decides whether it
    /// is kept.
    FastCompleted(CompletedFast),
}

#[derive(Debug, Clone)]
pub struct TimerOptions {
    pub tick_interval: Duration,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

struct CachedRecord {
    record: TimerRecord,
    /// Set when the last mutation could not be written. The cached record
    /// then stays authoritative until a write succeeds.
    dirty: bool,
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Ticker {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

struct TimerInner {
    cached: Mutex<CachedRecord>,
    db: Database,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<TimerEvent>,
    ticker: Mutex<Option<Ticker>>,
    tick_interval: Duration,
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.cancel.cancel();
            ticker.handle.abort();
        }
    }
}

/// One live instance of the fasting timer.
///
/// Several instances (in this process or others) may share one database.
/// Each operation re-reads the persisted record inside a write transaction,
/// applies itself, and writes the result back before returning, so the
/// stored record is the source of truth rather than this instance's cache.
#[derive(Clone)]
pub struct FastingTimer {
    inner: Arc<TimerInner>,
}

impl FastingTimer {
    /// Builds an instance from the persisted record and starts ticking if
    /// that record says a fast is running.
    pub async fn load(db: Database, clock: Arc<dyn Clock>, options: TimerOptions) -> Self {
        let record = match db.execute(|conn| TimerRecord::load(conn)).await {
            Ok(record) => record,
            Err(err) => {
                warn!("Failed to read persisted timer, starting from defaults: {err:#}");
                TimerRecord::default()
            }
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let timer = Self {
            inner: Arc::new(TimerInner {
                cached: Mutex::new(CachedRecord {
                    record,
                    dirty: false,
                }),
                db,
                clock,
                events,
                ticker: Mutex::new(None),
                tick_interval: options.tick_interval,
            }),
        };

        timer.sync_ticker(record.is_running).await;
        timer
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.inner.events.subscribe()
    }

    pub fn now_millis(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let record = self.inner.cached.lock().await.record;
        TimerSnapshot::from_record(&record, self.now_millis())
    }

    pub async fn current_elapsed_time(&self) -> i64 {
        self.snapshot().await.elapsed_ms
    }

    pub async fn current_state(&self) -> FastingState {
        self.snapshot().await.current_state
    }

    pub async fn max_state(&self) -> FastingState {
        self.inner.cached.lock().await.record.max_state
    }

    pub async fn is_running(&self) -> bool {
        self.inner.cached.lock().await.record.is_running
    }

    /// Returns `false` when a fast was already running.
    pub async fn start(&self) -> bool {
        let (record, started) = self.mutate(|record, now| record.start(now)).await;
        if started {
            info!("Fast started at {}", record.start_time_ms);
        }
        self.after_mutation(&record).await;
        started
    }

    /// Returns `false` when no fast was running.
    pub async fn stop(&self) -> bool {
        let (record, stopped) = self.mutate(|record, now| record.stop(now)).await;
        if stopped {
            info!("Fast stopped after {} ms", record.elapsed_ms);
        }
        self.after_mutation(&record).await;
        stopped
    }

    /// Zeroes the timer. Returns the session it held, if any; nothing is
    /// written to the history here.
    pub async fn reset(&self) -> Option<CompletedFast> {
        let (record, completed) = self.mutate(|record, now| record.reset(now)).await;
        self.after_mutation(&record).await;

        if let Some(fast) = &completed {
            info!(
                "Fast {} completed: {} ms, peak {}",
                fast.id,
                fast.duration,
                fast.max_fasting_state.as_str()
            );
            self.emit(TimerEvent::FastCompleted(fast.clone()));
        }
        completed
    }

    /// Starts a stopped timer or stops a running one, against the persisted
    /// running flag. Returns whether the timer is now running.
    pub async fn toggle(&self) -> bool {
        let (record, _) = self
            .mutate(|record, now| {
                if record.is_running {
                    record.stop(now)
                } else {
                    record.start(now)
                }
            })
            .await;
        self.after_mutation(&record).await;
        record.is_running
    }

    /// Shifts the start instant earlier by `delta_ms` (later when negative).
    pub async fn adjust_start_time(&self, delta_ms: i64) -> Result<(), AdjustRejection> {
        let (record, outcome) = self
            .mutate(move |record, now| record.adjust_start(delta_ms, now))
            .await;

        match outcome {
            Ok(()) => {
                info!("Start time adjusted by {delta_ms} ms");
                self.after_mutation(&record).await;
            }
            Err(rejection) => info!("Start time adjustment of {delta_ms} ms rejected: {rejection}"),
        }
        outcome
    }

    /// Re-reads the persisted record and brings the ticker in line with it.
    pub async fn reload(&self) -> TimerSnapshot {
        let record = {
            let mut cached = self.inner.cached.lock().await;
            if !cached.dirty {
                match self.inner.db.execute(|conn| TimerRecord::load(conn)).await {
                    Ok(record) => cached.record = record,
                    Err(err) => warn!("Failed to reload timer, keeping cached state: {err:#}"),
                }
            }
            cached.record
        };

        self.sync_ticker(record.is_running).await;
        TimerSnapshot::from_record(&record, self.now_millis())
    }

    /// Writes the cached record if an earlier write failed. Calling it again
    /// after a successful save does nothing.
    pub async fn save_state(&self) -> Result<()> {
        let mut cached = self.inner.cached.lock().await;
        if !cached.dirty {
            return Ok(());
        }

        let record = cached.record;
        self.inner.db.transact(move |tx| record.store(tx)).await?;
        cached.dirty = false;
        info!("Reconciled cached timer state with storage");
        Ok(())
    }

    /// Stops the ticker without touching the fast itself. The next
    /// [`FastingTimer::reload`] restarts it if the fast is still running.
    pub async fn release_resources(&self) {
        self.cancel_ticker().await;
    }

    /// Tears the instance down. Once this returns, the instance performs no
    /// further writes.
    pub async fn shutdown(&self) {
        self.cancel_ticker().await;
        if let Err(err) = self.save_state().await {
            warn!("Failed to save timer state on shutdown: {err:#}");
        }
    }

    /// One periodic recomputation. Returns whether the fast is still running.
    pub(crate) async fn tick(&self) -> bool {
        let (record, reached) = self
            .mutate(|record, now| {
                if record.is_running {
                    record.observe(now)
                } else {
                    None
                }
            })
            .await;

        let snapshot = TimerSnapshot::from_record(&record, self.now_millis());
        log_debug!(
            "tick: elapsed={}ms state={}",
            snapshot.elapsed_ms,
            snapshot.current_state.as_str()
        );
        self.emit(TimerEvent::StateChanged(snapshot));

        if let Some(state) = reached {
            info!("Reached fasting state {}", state.as_str());
            self.emit(TimerEvent::FastingStateReached(state));
        }
        record.is_running
    }

    /// Runs `op` against the persisted record inside one write transaction
    /// and caches the result. When storage fails, `op` is applied to the
    /// cached record instead and the cache is marked dirty.
    async fn mutate<T, F>(&self, op: F) -> (TimerRecord, T)
    where
        F: Fn(&mut TimerRecord, i64) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let mut cached = self.inner.cached.lock().await;
        let now = self.now_millis();
        let op = Arc::new(op);
        let persisted_op = Arc::clone(&op);
        let base = cached.dirty.then_some(cached.record);

        let outcome = self
            .inner
            .db
            .transact(move |tx| {
                let mut record = match base {
                    Some(record) => record,
                    None => TimerRecord::load(tx)?,
                };
                let before = record;
                let value = persisted_op(&mut record, now);
                if base.is_some() || record != before {
                    record.store(tx)?;
                }
                Ok((record, value))
            })
            .await;

        let (record, value) = match outcome {
            Ok((record, value)) => {
                cached.dirty = false;
                (record, value)
            }
            Err(err) => {
                log_warn!("Timer storage unavailable, continuing in memory: {err:#}");
                let mut record = cached.record;
                let value = op(&mut record, now);
                cached.dirty = true;
                (record, value)
            }
        };

        cached.record = record;
        (record, value)
    }

    async fn after_mutation(&self, record: &TimerRecord) {
        self.sync_ticker(record.is_running).await;
        self.emit(TimerEvent::StateChanged(TimerSnapshot::from_record(
            record,
            self.now_millis(),
        )));
    }

    fn emit(&self, event: TimerEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn sync_ticker(&self, running: bool) {
        if running {
            self.spawn_ticker().await;
        } else {
            self.cancel_ticker().await;
        }
    }

    async fn spawn_ticker(&self) {
        let mut slot = self.inner.ticker.lock().await;
        if slot.as_ref().is_some_and(Ticker::is_live) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::downgrade(&self.inner),
            self.inner.tick_interval,
            cancel.clone(),
        ));
        *slot = Some(Ticker { handle, cancel });
    }

    /// Cancels the ticker and waits for it, so no tick is mid-write when this
    /// returns. Must not be called from the ticker task itself.
    async fn cancel_ticker(&self) {
        let ticker = self.inner.ticker.lock().await.take();
        if let Some(ticker) = ticker {
            ticker.cancel.cancel();
            if let Err(err) = ticker.handle.await {
                if !err.is_cancelled() {
                    warn!("Timer ticker ended abnormally: {err}");
                }
            }
        }
    }
}

async fn tick_loop(inner: Weak<TimerInner>, period: Duration, cancel: CancellationToken) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let timer = FastingTimer { inner };
                if !timer.tick().await {
                    // Stopped elsewhere; the next operation or reload
                    // respawns the ticker if needed.
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}
