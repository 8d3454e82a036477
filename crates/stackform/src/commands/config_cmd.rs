//! Config subcommand handlers.

use std::io::{BufRead, IsTerminal};

use dialoguer::{Input, Select};
use secrecy::{ExposeSecret, SecretString};

use stackform_config::{self as cfgstore, Config, DEFAULT_STATE_PATH, Profile, SANDBOX_ENDPOINT};
use stackform_core::{DEFAULT_REGION, stack};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn profile_not_found(cfg: &Config, name: String) -> CliError {
    let available: Vec<_> = cfg.profiles.keys().cloned().collect();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Plaintext keys never leave `config show`.
fn redacted(mut cfg: Config) -> Config {
    for profile in cfg.profiles.values_mut() {
        if profile.api_key.is_some() {
            profile.api_key = Some("********".into());
        }
    }
    cfg
}

fn read_secret(from_stdin: bool, prompt: &str) -> Result<SecretString, CliError> {
    let value = if from_stdin || !std::io::stdin().is_terminal() {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_owned()
    } else {
        rpassword::prompt_password(prompt).map_err(prompt_err)?
    };
    if value.is_empty() {
        return Err(CliError::Validation {
            field: "secret".into(),
            reason: "value cannot be empty".into(),
        });
    }
    Ok(SecretString::from(value))
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),

        ConfigCommand::Show => {
            let cfg = redacted(config::load_config()?);
            let out = output::render_single(
                global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("<unrenderable: {e}>")),
                |c| c.default_profile.clone().unwrap_or_default(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            let active = config::active_profile_name(global, &cfg);
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured; the built-in sandbox profile is used.");
                eprintln!("Create one with: stackform config init");
            } else {
                for (name, profile) in &cfg.profiles {
                    let marker = if *name == active { " *" } else { "" };
                    println!("{name}{marker}\t{}\t{}", profile.endpoint, profile.region);
                }
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(&cfg, name));
            }
            cfg.default_profile = Some(name.clone());
            cfgstore::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetSecret { variable, stdin } => {
            let stack = stack::by_name(&global.stack)?;
            let declared = stack.variables.get(&variable).ok_or_else(|| CliError::Validation {
                field: "variable".into(),
                reason: format!("stack '{}' declares no variable '{variable}'", stack.name),
            })?;
            if !declared.sensitive {
                return Err(CliError::Validation {
                    field: "variable".into(),
                    reason: format!("'{variable}' is not sensitive; pass it with --var instead"),
                });
            }

            let cfg = config::load_config()?;
            let profile_name = config::active_profile_name(global, &cfg);
            let secret = read_secret(stdin, &format!("{variable}: "))?;
            cfgstore::store_secret(&profile_name, &variable, secret.expose_secret())?;
            eprintln!("✓ '{variable}' stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init() -> Result<(), CliError> {
    let config_path = cfgstore::config_path();
    eprintln!("stackform configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let mut cfg = config::load_config()?;

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    let targets = &["Sandbox (local simulation)", "Control-plane gateway"];
    let target = Select::new()
        .with_prompt("Where should stacks be applied?")
        .items(targets)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let mut profile = Profile::default();
    if target == 0 {
        profile.endpoint = SANDBOX_ENDPOINT.into();
    } else {
        let endpoint: String = Input::new()
            .with_prompt("Gateway URL")
            .interact_text()
            .map_err(prompt_err)?;
        if endpoint.parse::<url::Url>().is_err() {
            return Err(CliError::Validation {
                field: "endpoint".into(),
                reason: format!("invalid URL: {endpoint}"),
            });
        }
        profile.endpoint = endpoint;

        let key = read_secret(false, "API key: ")?;
        let choices = &[
            "Store in system keyring (recommended)",
            "Save to config file (plaintext)",
        ];
        let store = Select::new()
            .with_prompt("Where to store the API key?")
            .items(choices)
            .default(0)
            .interact()
            .map_err(prompt_err)?;
        if store == 0 {
            cfgstore::store_api_key(&profile_name, key.expose_secret())?;
            eprintln!("   ✓ API key stored in system keyring");
        } else {
            profile.api_key = Some(key.expose_secret().to_owned());
        }
    }

    profile.region = Input::new()
        .with_prompt("Region")
        .default(DEFAULT_REGION.to_owned())
        .interact_text()
        .map_err(prompt_err)?;

    let state_path: String = Input::new()
        .with_prompt("State file")
        .default(DEFAULT_STATE_PATH.to_owned())
        .interact_text()
        .map_err(prompt_err)?;
    profile.state_path = Some(state_path.into());

    if cfg.profiles.is_empty() || cfg.default_profile.is_none() {
        cfg.default_profile = Some(profile_name.clone());
    }
    cfg.profiles.insert(profile_name.clone(), profile);
    cfgstore::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Profile: {profile_name}");
    eprintln!("\n  Store the WebUI secret: stackform config set-secret webui_secret_key");
    eprintln!("  Then try: stackform plan --var vpc_id=<vpc-id>");
    Ok(())
}
