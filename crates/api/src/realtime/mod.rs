//! Realtime WebSocket surface.

pub mod socket;
pub mod token;

pub use socket::realtime_routes;
pub use token::{SocketClaims, SocketTokenService};
