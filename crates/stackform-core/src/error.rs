// ── Core error types ──
//
// User-facing errors from stackform-core. Consumers never see HTTP status
// codes or JSON parse failures directly; the `From<stackform_api::Error>`
// impl translates transport-layer errors into engine-level variants.

use std::fmt;

use thiserror::Error;

use crate::model::Address;

/// A reference that names something never declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// The declaration holding the reference (`aws_lb.shared`, `output.webui_url`).
    pub from: String,
    /// What it points at (`var.vpc_id`, `aws_lb.missing.arn`).
    pub to: String,
}

impl fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A resource whose observed state diverged from both state and config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftedResource {
    pub address: Address,
    pub attributes: Vec<String>,
}

impl fmt::Display for DriftedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.attributes.join(", "))
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_cycles(cycles: &[Vec<Address>]) -> String {
    cycles
        .iter()
        .map(|c| format!("[{}]", join(c)))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Missing required variable(s): {}", .names.join(", "))]
    MissingVariables { names: Vec<String> },

    #[error("Variable '{name}' expects {expected}, got {found}")]
    InvalidVariable {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Value provided for undeclared variable '{name}'")]
    UndeclaredVariable { name: String },

    #[error("Duplicate declaration: {address}")]
    DuplicateDeclaration { address: String },

    #[error("Dangling reference(s): {}", join(.refs))]
    DanglingReferences { refs: Vec<DanglingReference> },

    #[error("Invalid reference {from} -> {to}: {reason}")]
    InvalidReference {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Dependency cycle: {}", join_cycles(.cycles))]
    DependencyCycle { cycles: Vec<Vec<Address>> },

    #[error("Output '{output}' exposes sensitive variable '{variable}' but is not marked sensitive")]
    SensitiveOutput { output: String, variable: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Lookup {address} failed ({filter}): {reason}")]
    Lookup {
        address: String,
        filter: String,
        reason: String,
    },

    // ── Evaluation errors ────────────────────────────────────────────
    #[error("Cannot evaluate {context}: {message}")]
    Evaluation { context: String, message: String },

    #[error("{address} has no attribute '{attribute}'")]
    UnknownAttribute { address: Address, attribute: String },

    // ── Targeting errors ─────────────────────────────────────────────
    #[error("Target {address} is not declared")]
    UnknownTarget { address: String },

    #[error("Target {target} depends on {dependency}, which has no recorded state")]
    MissingDependencyState { target: Address, dependency: Address },

    // ── Drift ────────────────────────────────────────────────────────
    #[error("Drift detected outside stackform: {}", join(.resources))]
    Drift { resources: Vec<DriftedResource> },

    // ── State ────────────────────────────────────────────────────────
    #[error("State file {path}: {message}")]
    State { path: String, message: String },

    // ── Platform errors (wrapped, not exposed raw) ───────────────────
    #[error("Cannot reach control plane at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Platform call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Platform error: {message}")]
    Platform {
        message: String,
        code: Option<String>,
        status: Option<u16>,
        transient: bool,
    },

    // ── Apply ────────────────────────────────────────────────────────
    #[error("Apply cancelled")]
    Cancelled,

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Configuration problems detected before any external call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingVariables { .. }
                | Self::InvalidVariable { .. }
                | Self::UndeclaredVariable { .. }
                | Self::DuplicateDeclaration { .. }
                | Self::DanglingReferences { .. }
                | Self::InvalidReference { .. }
                | Self::DependencyCycle { .. }
                | Self::SensitiveOutput { .. }
                | Self::Config { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<stackform_api::Error> for CoreError {
    fn from(err: stackform_api::Error) -> Self {
        let transient = err.is_transient();
        match err {
            stackform_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            stackform_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            stackform_api::Error::Transport(ref e) if e.is_connect() => {
                CoreError::ConnectionFailed {
                    url: e
                        .url()
                        .map_or_else(|| "<unknown>".into(), ToString::to_string),
                    reason: e.to_string(),
                }
            }
            stackform_api::Error::Transport(ref e) if e.is_timeout() => {
                CoreError::Timeout { timeout_secs: 0 }
            }
            stackform_api::Error::Rejected {
                kind,
                message,
                code,
                status,
            } => CoreError::Platform {
                message: format!("{kind}: {message}"),
                code,
                status: Some(status),
                transient,
            },
            other => CoreError::Platform {
                message: other.to_string(),
                code: None,
                status: None,
                transient,
            },
        }
    }
}
