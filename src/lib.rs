pub mod app;
pub mod config;
pub mod db;
pub mod fasting;
pub mod history;
pub mod notifications;
pub mod settings;
pub mod timer;
pub mod utils;
pub mod widget;

pub use app::FastingApp;
pub use config::AppConfig;
pub use fasting::FastingState;
pub use history::{CompletedFast, HistoryStore};
pub use timer::{FastingTimer, TimerSnapshot};
pub use widget::{WidgetAction, WidgetSync};

/// Initializes logging for a host binary. `RUST_LOG` overrides `level`.
pub fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
