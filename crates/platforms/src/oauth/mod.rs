//! OAuth credential lifecycle: refresh, single-flight, revocation.

pub mod lifecycle;
pub mod refresh;
pub mod singleflight;

pub use lifecycle::OAuthLifecycle;
pub use refresh::TokenRefreshClient;
pub use singleflight::RefreshFlights;
