pub mod model;
pub mod store;

pub use model::{CompletedFast, HistorySummary};
pub use store::HistoryStore;
