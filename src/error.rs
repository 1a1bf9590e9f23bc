use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "api_base_url", "proxy_file")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., the offending value)
    pub details: Option<String>,
    /// Source of the error (e.g., "credentials", "cursor")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the ingestion runtime.
///
/// The upstream-facing variants (`NotFound`, `Fetch`, `RateLimited`, `Transport`, `Decode`)
/// carry the retry semantics callers rely on; see [`Error::is_retryable`].
#[derive(Debug, Error)]
pub enum Error {
    /// Upstream reports the resource is gone. Callers retire the id.
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    /// Non-2xx, non-404 response. Transient.
    #[error("Fetch failed: HTTP {status} for {path}")]
    Fetch { status: u16, path: String },

    /// Upstream answered 429. The remote gate is already blocked when this is returned.
    #[error("Remote rate limit reached (429) for {path}")]
    RateLimited { path: String },

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// Malformed payload. The raw body is kept so callers can persist it for inspection.
    #[error("Decode error: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        payload: bytes::Bytes,
    },

    /// Credential exchange failed. `fatal` errors must not be retried.
    #[error("Authentication error: {message}")]
    Auth { message: String, fatal: bool },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::runtime_with_context(msg, ErrorContext::default())
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn decode(source: serde_json::Error, payload: bytes::Bytes) -> Self {
        Error::Decode { source, payload }
    }

    /// Whether retrying the same unit of work later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch { .. } | Error::RateLimited { .. } | Error::Transport(_) => true,
            Error::Auth { fatal, .. } => !fatal,
            Error::Io(_) | Error::Runtime { .. } => true,
            Error::NotFound { .. } | Error::Decode { .. } | Error::Configuration { .. } => false,
        }
    }

    /// Errors the process entry point should exit on instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Auth { fatal: true, .. } | Error::Configuration { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::Fetch { status: 502, path: "/scores".into() }.is_retryable());
        assert!(Error::RateLimited { path: "/scores".into() }.is_retryable());
        assert!(!Error::NotFound { path: "/users/1".into() }.is_retryable());

        let bad = serde_json::from_slice::<serde_json::Value>(b"{nope").unwrap_err();
        let decode = Error::decode(bad, bytes::Bytes::from_static(b"{nope"));
        assert!(!decode.is_retryable());
        assert!(!decode.is_fatal());
    }

    #[test]
    fn test_auth_fatality() {
        let fatal = Error::Auth { message: "invalid_client".into(), fatal: true };
        let transient = Error::Auth { message: "503".into(), fatal: false };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());
        assert!(!transient.is_fatal());
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_context_display() {
        let err = Error::configuration_with_context(
            "invalid proxy url",
            ErrorContext::new()
                .with_field_path("proxy_file")
                .with_details("line 3"),
        );
        let msg = err.to_string();
        assert!(msg.contains("invalid proxy url"));
        assert!(msg.contains("field: proxy_file"));
        assert!(msg.contains("details: line 3"));
        assert_eq!(err.context().unwrap().details.as_deref(), Some("line 3"));
    }
}
