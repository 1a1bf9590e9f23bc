//! Rate-limited client: the shared gateway to the upstream API.
//!
//! | Type | Role |
//! |------|------|
//! | [`LimitedClient`] | Remote gate + local bucket + stale-connection retry around every call |
//! | [`Fetcher`] | `fetch(path)` with authorization and status → error mapping |
//! | [`CredentialProvider`] | Client-credentials exchange, refreshed exclusively |

pub mod auth;
mod builder;
mod core;
mod fetch;
pub mod signals;

pub use auth::{AuthConfig, Credential, CredentialProvider};
pub use builder::LimitedClientBuilder;
pub use self::core::LimitedClient;
pub use fetch::Fetcher;
pub use signals::{InflightSnapshot, SignalsSnapshot};
