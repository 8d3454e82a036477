// ── Runtime engine configuration ──
//
// Describes which control plane to talk to and how hard to push it. The
// CLI builds an `EngineConfig` from profiles and flags; core never reads
// config files.

use std::path::PathBuf;

use secrecy::SecretString;
use stackform_api::{AnyPlatform, HttpPlatform, SandboxPlatform, TlsMode, TransportConfig};
use url::Url;

use crate::apply::ApplyOptions;
use crate::error::CoreError;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Where resources are provisioned.
#[derive(Debug, Clone)]
pub enum PlatformTarget {
    /// In-process control plane, optionally persisted between runs.
    Sandbox { snapshot: Option<PathBuf> },
    /// Control-plane gateway over HTTP.
    Http {
        url: Url,
        api_key: Option<SecretString>,
        ca_cert: Option<PathBuf>,
    },
}

impl Default for PlatformTarget {
    fn default() -> Self {
        Self::Sandbox { snapshot: None }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub target: PlatformTarget,
    pub region: String,
    /// Read every recorded resource back before planning.
    pub refresh: bool,
    pub apply: ApplyOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target: PlatformTarget::default(),
            region: DEFAULT_REGION.into(),
            refresh: true,
            apply: ApplyOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Open the configured control plane.
    pub fn connect(&self) -> Result<AnyPlatform, CoreError> {
        match &self.target {
            PlatformTarget::Sandbox { snapshot: Some(path) } => Ok(AnyPlatform::Sandbox(
                SandboxPlatform::load_or_seed(path, &self.region)?,
            )),
            PlatformTarget::Sandbox { snapshot: None } => {
                Ok(AnyPlatform::Sandbox(SandboxPlatform::seeded(&self.region)))
            }
            PlatformTarget::Http {
                url,
                api_key,
                ca_cert,
            } => {
                let transport = TransportConfig {
                    tls: ca_cert.clone().map_or(TlsMode::System, TlsMode::CustomCa),
                    timeout: self.apply.timeout,
                    api_key: api_key.clone(),
                };
                Ok(AnyPlatform::Http(HttpPlatform::new(
                    url.clone(),
                    &self.region,
                    &transport,
                )?))
            }
        }
    }
}
