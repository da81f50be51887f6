pub mod clock;
pub mod controller;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{FastingTimer, TimerEvent, TimerOptions, TimerSnapshot};
pub use state::{AdjustRejection, TimerRecord};
