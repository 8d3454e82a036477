use thiserror::Error;

/// Top-level error type for the `stackform-api` crate.
///
/// Covers every failure mode of a control-plane call: transport,
/// throttling, eventual consistency, and outright rejection.
/// `stackform-core` maps these into engine-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// API key missing or rejected by the gateway.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Control plane ───────────────────────────────────────────────
    /// Throttled by the control plane. Includes retry-after in seconds.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Control plane temporarily unavailable (HTTP 502/503/504).
    #[error("Control plane unavailable: {message}")]
    Unavailable { message: String },

    /// A just-created dependency is not yet visible to the service
    /// consuming it (e.g. an IAM role not yet propagated).
    #[error("{kind} '{id}' not yet visible: {message}")]
    NotYetVisible {
        kind: String,
        id: String,
        message: String,
    },

    /// The control plane refused the request. Never retried.
    #[error("{kind} request rejected (HTTP {status}): {message}")]
    Rejected {
        kind: String,
        message: String,
        code: Option<String>,
        status: u16,
    },

    /// The resource does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    // ── Data ────────────────────────────────────────────────────────
    /// A success response did not parse. The body itself is never kept:
    /// it may echo sensitive attributes.
    #[error("Deserialization error: {message} ({bytes} byte body)")]
    Deserialization { message: String, bytes: usize },

    /// Sandbox snapshot could not be read or written.
    #[error("Sandbox snapshot error: {0}")]
    Snapshot(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Unavailable { .. }
            | Self::NotYetVisible { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::NotFound { .. } => true,
            _ => false,
        }
    }

    /// Extract the control-plane error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_visibility_are_transient() {
        assert!(Error::RateLimited { retry_after_secs: 2 }.is_transient());
        assert!(
            Error::NotYetVisible {
                kind: "aws_iam_role".into(),
                id: "role-1".into(),
                message: "propagating".into(),
            }
            .is_transient()
        );
        assert!(!Error::Rejected {
            kind: "aws_lb".into(),
            message: "invalid subnet".into(),
            code: Some("invalid_parameter".into()),
            status: 400,
        }
        .is_transient());
    }
}
