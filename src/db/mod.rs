mod connection;
mod migrations;
pub mod prefs;

pub use connection::Database;
pub use prefs::{HISTORY_NAMESPACE, TIMER_NAMESPACE};
