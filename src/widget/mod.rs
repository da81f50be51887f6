pub mod actions;
pub mod schedule;
pub mod sync;
pub mod view;

pub use actions::{TapOutcome, WidgetAction};
pub use sync::{LogSurface, SurfaceId, WidgetSurface, WidgetSync};
pub use view::{appearance, StateAppearance, WidgetView};
