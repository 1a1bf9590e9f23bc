//! HTTP transport and proxy rotation.

mod http;
pub mod proxy;

pub use http::{HttpTransport, HttpTransportConfig};
pub use proxy::ProxyRotator;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
