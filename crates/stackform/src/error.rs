//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use stackform_config::ConfigError;
use stackform_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const DRIFT: i32 = 6;
    pub const PLATFORM: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const PARTIAL: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Usage ────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(stackform::validation))]
    Validation { field: String, reason: String },

    #[error("'{action}' requires confirmation")]
    #[diagnostic(
        code(stackform::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(stackform::configuration),
        help("Fix the declarations or variables; nothing was sent to the platform.")
    )]
    Configuration { message: String },

    #[error("Missing required variable(s): {names}")]
    #[diagnostic(
        code(stackform::missing_variables),
        help(
            "Supply them with --var name=value, a vars file, or STACKFORM_VAR_<name>.\n\
             Sensitive values can be stored with: stackform config set-secret <name>"
        )
    )]
    MissingVariables { names: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(stackform::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: stackform config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No API key configured for profile '{profile}'")]
    #[diagnostic(
        code(stackform::no_credentials),
        help(
            "Configure one with: stackform config init\n\
             Or set api_key_env in the profile, or use --sandbox."
        )
    )]
    NoCredentials { profile: String },

    #[error("Configuration file problem: {message}")]
    #[diagnostic(code(stackform::config_file))]
    ConfigFile { message: String },

    // ── Lookups & addresses ──────────────────────────────────────────
    #[error("Lookup {address} failed ({filter}): {reason}")]
    #[diagnostic(
        code(stackform::lookup),
        help("Check the region and the variables feeding this lookup's filters.")
    )]
    Lookup {
        address: String,
        filter: String,
        reason: String,
    },

    #[error("{what} '{identifier}' not found")]
    #[diagnostic(code(stackform::not_found), help("Run: stackform {list_command}"))]
    NotFound {
        what: String,
        identifier: String,
        list_command: String,
    },

    // ── Drift ────────────────────────────────────────────────────────
    #[error("Drift detected outside stackform: {resources}")]
    #[diagnostic(
        code(stackform::drift),
        help(
            "The platform no longer matches recorded state or configuration.\n\
             Inspect with: stackform refresh, or update the declarations to match."
        )
    )]
    Drift { resources: String },

    // ── Platform ─────────────────────────────────────────────────────
    #[error("Cannot reach control plane at {url}")]
    #[diagnostic(
        code(stackform::connection_failed),
        help("Check the profile endpoint, or run with --sandbox.\n{reason}")
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(stackform::auth_failed),
        help("Verify the API key for this profile.")
    )]
    AuthFailed { message: String },

    #[error("Platform error: {message}")]
    #[diagnostic(code(stackform::platform))]
    Platform { message: String },

    #[error("Platform call timed out after {seconds}s")]
    #[diagnostic(
        code(stackform::timeout),
        help("Increase the timeout with --timeout or check control-plane health.")
    )]
    Timeout { seconds: u64 },

    // ── Apply ────────────────────────────────────────────────────────
    #[error("Apply finished with failures: {counts}")]
    #[diagnostic(
        code(stackform::partial_apply),
        help("{details}\nState records everything that completed; fix the cause and re-run.")
    )]
    PartialApply { counts: String, details: String },

    #[error("State file {path}: {message}")]
    #[diagnostic(code(stackform::state))]
    State { path: String, message: String },

    #[error("Internal error: {0}")]
    #[diagnostic(code(stackform::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Configuration { .. }
            | Self::MissingVariables { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoCredentials { .. }
            | Self::ConfigFile { .. } => exit_code::CONFIG,
            Self::Lookup { .. } | Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Drift { .. } => exit_code::DRIFT,
            Self::ConnectionFailed { .. } | Self::AuthFailed { .. } | Self::Platform { .. } => {
                exit_code::PLATFORM
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::PartialApply { .. } => exit_code::PARTIAL,
            Self::State { .. } | Self::Internal(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingVariables { names } => CliError::MissingVariables {
                names: names.join(", "),
            },

            CoreError::Lookup {
                address,
                filter,
                reason,
            } => CliError::Lookup {
                address,
                filter,
                reason,
            },

            CoreError::UnknownTarget { address } => CliError::NotFound {
                what: "target".into(),
                identifier: address,
                list_command: "graph".into(),
            },

            CoreError::Drift { resources } => CliError::Drift {
                resources: resources
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            },

            CoreError::ConnectionFailed { url, reason } => {
                CliError::ConnectionFailed { url, reason }
            }

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::State { path, message } => CliError::State { path, message },

            CoreError::Internal(message) => CliError::Internal(message),

            e @ (CoreError::Platform { .. }
            | CoreError::Cancelled
            | CoreError::Evaluation { .. }
            | CoreError::UnknownAttribute { .. }) => CliError::Platform {
                message: e.to_string(),
            },

            // Everything left is a static configuration problem
            other => CliError::Configuration {
                message: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { name, available } => {
                CliError::ProfileNotFound { name, available }
            }
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::ConfigFile {
                message: other.to_string(),
            },
        }
    }
}
