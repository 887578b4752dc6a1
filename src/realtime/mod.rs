pub mod hub;
pub mod ws;

pub use hub::{RealtimeEvent, RealtimeHub};
pub use ws::realtime_ws;
