pub mod errors;
pub mod event;
pub mod health;
pub mod ids;
pub mod role;

pub use errors::BusError;
pub use event::PushEvent;
pub use health::{classify, missed_heartbeats, LinkQuality};
pub use ids::{ConnectionId, EventId};
pub use role::{BroadcastFilter, Role};
