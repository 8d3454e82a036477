//! Shared configuration for the stackform CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! variable bindings, and translation to `stackform_core::EngineConfig`.
//! Core never reads these types; it receives a pre-built `EngineConfig`.

pub mod vars;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stackform_core::{ApplyOptions, EngineConfig, PlatformTarget, RetryPolicy};

pub use vars::{VarSources, parse_var_flag, resolve_bindings};

/// Keyring service name for every stored secret.
pub const KEYRING_SERVICE: &str = "stackform";

/// Endpoint value selecting the in-process sandbox.
pub const SANDBOX_ENDPOINT: &str = "sandbox";

pub const DEFAULT_STATE_PATH: &str = "stackform.state.json";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no API key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found (available: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("variables file {path}: {reason}")]
    VarsFile { path: String, reason: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// The named profile. An unconfigured `default` profile falls back to
    /// the sandbox so a fresh install works without any setup.
    pub fn profile(&self, name: &str) -> Result<Profile, ConfigError> {
        match self.profiles.get(name) {
            Some(p) => Ok(p.clone()),
            None if name == "default" => Ok(Profile::default()),
            None => Err(ConfigError::UnknownProfile {
                name: name.into(),
                available: if self.profiles.is_empty() {
                    "none".into()
                } else {
                    self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
                },
            }),
        }
    }

    /// `explicit`, else the configured default, else `default`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Refresh state from the platform before planning.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            concurrency: default_concurrency(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            refresh: default_refresh(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> usize {
    5
}
fn default_refresh() -> bool {
    true
}
fn default_endpoint() -> String {
    SANDBOX_ENDPOINT.into()
}
fn default_region() -> String {
    stackform_core::DEFAULT_REGION.into()
}

/// A named deployment target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Control-plane gateway URL, or `sandbox`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// State file location, relative to the working directory.
    pub state_path: Option<PathBuf>,

    /// API key (plaintext; prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Path to a custom CA certificate for the gateway.
    pub ca_cert: Option<PathBuf>,

    /// TOML file of variable values.
    pub vars_file: Option<PathBuf>,

    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub max_retries: Option<usize>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            region: default_region(),
            state_path: None,
            api_key: None,
            api_key_env: None,
            ca_cert: None,
            vars_file: None,
            concurrency: None,
            timeout: None,
            max_retries: None,
        }
    }
}

impl Profile {
    pub fn is_sandbox(&self) -> bool {
        self.endpoint == SANDBOX_ENDPOINT
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "stackform", "stackform").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("stackform");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then the TOML file at `path`, then `STACKFORM_` environment
/// variables (`__` separates nesting, e.g. `STACKFORM_DEFAULTS__CONCURRENCY`).
/// `STACKFORM_VAR_*` is left to variable binding.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(
            Env::prefixed("STACKFORM_")
                .filter(|key| !key.as_str().to_ascii_lowercase().starts_with("var_"))
                .split("__"),
        );

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secrets ─────────────────────────────────────────────────────────

fn keyring_entry(account: &str) -> Result<keyring::Entry, ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, account).map_err(|e| ConfigError::Keyring(e.to_string()))
}

fn variable_account(profile_name: &str, variable: &str) -> String {
    format!("{profile_name}/var/{variable}")
}

/// Store a sensitive variable value in the system keyring.
pub fn store_secret(profile_name: &str, variable: &str, value: &str) -> Result<(), ConfigError> {
    keyring_entry(&variable_account(profile_name, variable))?
        .set_password(value)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// A sensitive variable value previously stored with [`store_secret`].
pub fn keyring_secret(profile_name: &str, variable: &str) -> Option<SecretString> {
    keyring_entry(&variable_account(profile_name, variable))
        .ok()?
        .get_password()
        .ok()
        .map(SecretString::from)
}

/// Store the gateway API key for `profile_name` in the system keyring.
pub fn store_api_key(profile_name: &str, key: &str) -> Result<(), ConfigError> {
    keyring_entry(&format!("{profile_name}/api-key"))?
        .set_password(key)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Resolve the gateway API key: profile's `api_key_env`, then keyring,
/// then plaintext in config.
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring_entry(&format!("{profile_name}/api-key")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation to core ─────────────────────────────────────────────

/// Flag-level overrides applied on top of a profile.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Force the sandbox regardless of the profile endpoint.
    pub sandbox: bool,
    pub state_path: Option<PathBuf>,
    pub region: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub max_retries: Option<usize>,
    pub refresh: Option<bool>,
}

/// A profile translated for one run.
#[derive(Debug)]
pub struct ResolvedProfile {
    pub name: String,
    pub engine: EngineConfig,
    pub state_path: PathBuf,
    /// Where the sandbox persists its resources between runs, if sandboxed.
    pub sandbox_snapshot: Option<PathBuf>,
    pub vars_file: Option<PathBuf>,
}

/// Sandbox snapshot lives beside the state file: `<state>.sandbox.json`.
pub fn sandbox_snapshot_path(state_path: &Path) -> PathBuf {
    let mut name = state_path
        .file_stem()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".sandbox.json");
    state_path.with_file_name(name)
}

/// Translate profile `name` plus `overrides` into an `EngineConfig`.
///
/// This is the single boundary where config types cross into core types.
pub fn resolve_profile(
    config: &Config,
    name: &str,
    overrides: &Overrides,
) -> Result<ResolvedProfile, ConfigError> {
    let profile = config.profile(name)?;
    let defaults = &config.defaults;

    let state_path = overrides
        .state_path
        .clone()
        .or_else(|| profile.state_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));

    let concurrency = overrides
        .concurrency
        .or(profile.concurrency)
        .unwrap_or(defaults.concurrency);
    if concurrency == 0 {
        return Err(ConfigError::Validation {
            field: "concurrency".into(),
            reason: "must be at least 1".into(),
        });
    }
    let timeout = Duration::from_secs(
        overrides
            .timeout
            .or(profile.timeout)
            .unwrap_or(defaults.timeout),
    );
    let retry = RetryPolicy {
        max_retries: overrides
            .max_retries
            .or(profile.max_retries)
            .unwrap_or(defaults.max_retries),
        ..RetryPolicy::default()
    };

    let (target, sandbox_snapshot) = if overrides.sandbox || profile.is_sandbox() {
        let snapshot = sandbox_snapshot_path(&state_path);
        (
            PlatformTarget::Sandbox {
                snapshot: Some(snapshot.clone()),
            },
            Some(snapshot),
        )
    } else {
        let url: url::Url = profile
            .endpoint
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "endpoint".into(),
                reason: format!("expected a URL or '{SANDBOX_ENDPOINT}', got '{}'", profile.endpoint),
            })?;
        let api_key = resolve_api_key(&profile, name)?;
        (
            PlatformTarget::Http {
                url,
                api_key: Some(api_key),
                ca_cert: profile.ca_cert.clone(),
            },
            None,
        )
    };

    let engine = EngineConfig {
        target,
        region: overrides
            .region
            .clone()
            .unwrap_or_else(|| profile.region.clone()),
        refresh: overrides.refresh.unwrap_or(defaults.refresh),
        apply: ApplyOptions {
            concurrency,
            timeout,
            retry,
            ..ApplyOptions::default()
        },
    };

    Ok(ResolvedProfile {
        name: name.into(),
        engine,
        state_path,
        sandbox_snapshot,
        vars_file: profile.vars_file,
    })
}
