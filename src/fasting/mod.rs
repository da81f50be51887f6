pub mod state;

pub use state::{
    classify, classify_millis, hours_until_next, millis_until_next, next_state, whole_hours,
    FastingState, MILLIS_PER_HOUR,
};
