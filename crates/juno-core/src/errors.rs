use std::time::Duration;

/// Typed error hierarchy for generative-model and embedding calls.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not configured: {0}")]
    NotConfigured(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Operational
    #[error("empty completion")]
    EmptyCompletion,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    /// Timeouts count as retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ProviderOverloaded
                | Self::NetworkError(_)
                | Self::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::NotConfigured(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotConfigured(_) => "not_configured",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::EmptyCompletion => "empty_completion",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
