pub mod connections;
pub mod connectors;
pub mod credentials;
pub mod error;
pub mod oauth;

pub use connections::{ConnectionRepository, InMemoryConnectionRepository, PostgresConnectionRepository};
pub use connectors::{ActivityStream, Connector, GoogleConnector, MicrosoftConnector, SlackConnector};
pub use credentials::{CredentialStore, InMemoryCredentialStore, PostgresCredentialStore};
pub use error::{PlatformError, Result};
pub use oauth::{OAuthLifecycle, RefreshFlights, TokenRefreshClient};
