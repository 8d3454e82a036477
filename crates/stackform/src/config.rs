//! Glue between global flags and `stackform-config`.
//!
//! Core never sees these types -- it receives a pre-built `EngineConfig`
//! and `VariableBindings`.

use stackform_config::{Config, Overrides, ResolvedProfile, VarSources};
use stackform_core::{StackDefinition, VariableBindings};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub fn load_config() -> Result<Config, CliError> {
    Ok(stackform_config::load_config()?)
}

pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    cfg.active_profile_name(global.profile.as_deref())
}

fn overrides(global: &GlobalOpts) -> Overrides {
    Overrides {
        sandbox: global.sandbox,
        state_path: global.state.clone(),
        region: global.region.clone(),
        concurrency: global.concurrency,
        timeout: global.timeout,
        max_retries: global.max_retries,
        refresh: global.refresh,
    }
}

/// The active profile with flag overrides applied.
pub fn resolve(global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let cfg = load_config()?;
    let name = active_profile_name(global, &cfg);
    let resolved = stackform_config::resolve_profile(&cfg, &name, &overrides(global))?;
    tracing::debug!(
        profile = %resolved.name,
        state = %resolved.state_path.display(),
        region = %resolved.engine.region,
        "profile resolved"
    );
    Ok(resolved)
}

/// Variable bindings for `stack` from vars file, environment, flags, and
/// keyring. A declared `region` variable left unbound follows the profile.
pub fn bindings(
    global: &GlobalOpts,
    resolved: &ResolvedProfile,
    stack: &StackDefinition,
) -> Result<VariableBindings, CliError> {
    let sources = VarSources {
        file: global.var_file.clone().or_else(|| resolved.vars_file.clone()),
        flags: global.vars.clone(),
    };
    let mut bindings =
        stackform_config::resolve_bindings(stack, &sources, std::env::vars(), |variable| {
            stackform_config::keyring_secret(&resolved.name, variable)
        })?;
    if stack.variables.contains_key("region") && !bindings.contains("region") {
        bindings.set("region", resolved.engine.region.clone());
    }
    Ok(bindings)
}
