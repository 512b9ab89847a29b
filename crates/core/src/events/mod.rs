//! Realtime message schema and per-organization fan-out.

pub mod bus;
pub mod message;

pub use bus::EventBus;
pub use message::{NotificationLevel, RealtimeMessage, RealtimePayload};
