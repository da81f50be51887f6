use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    fasting::{next_state, FastingState},
    settings::SettingsStore,
    timer::{FastingTimer, TimerEvent},
};

/// Presents "you reached a new fasting state" to the user.
pub trait Notifier: Send + Sync {
    fn fasting_state_reached(&self, state: FastingState) -> Result<()>;
}

/// Writes notifications to the log. Used by the CLI host.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn fasting_state_reached(&self, state: FastingState) -> Result<()> {
        info!("[notification] {}", notification_text(state));
        Ok(())
    }
}

pub fn notification_text(state: FastingState) -> String {
    match next_state(state) {
        Some(next) => format!(
            "You reached {state}. {next} begins at {}h.",
            next.threshold_hours()
        ),
        None => format!("You reached {state}."),
    }
}

/// Forwards one engine event to `notifier` if it is a state transition and
/// the user allows notifications. Returns whether anything was delivered.
pub fn forward_event(
    event: &TimerEvent,
    settings: &SettingsStore,
    notifier: &dyn Notifier,
) -> Result<bool> {
    let TimerEvent::FastingStateReached(state) = event else {
        return Ok(false);
    };

    if !settings.notifications_enabled() {
        debug!("Notifications disabled; not announcing {}", state.as_str());
        return Ok(false);
    }

    notifier
        .fasting_state_reached(*state)
        .with_context(|| format!("failed to announce {}", state.as_str()))?;
    Ok(true)
}

pub struct NotificationForwarder {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl NotificationForwarder {
    pub fn spawn(
        timer: &FastingTimer,
        settings: Arc<SettingsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(forward_loop(
            timer.subscribe(),
            settings,
            notifier,
            cancel.clone(),
        ));
        Self { handle, cancel }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            warn!("Notification forwarder ended abnormally: {err}");
        }
    }
}

async fn forward_loop(
    mut events: broadcast::Receiver<TimerEvent>,
    settings: Arc<SettingsStore>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if let Err(err) = forward_event(&event, &settings, notifier.as_ref()) {
                        warn!("{err:#}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification forwarder skipped {skipped} timer events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
