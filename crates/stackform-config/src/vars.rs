// ── Variable bindings ──
//
// Values for a stack's variables come from three layers, later winning:
// a TOML vars file, `STACKFORM_VAR_<name>` environment variables, then
// `--var name=value` flags. A sensitive variable left unbound falls back
// to the keyring.

use std::collections::BTreeMap;
use std::path::Path;

use secrecy::SecretString;

use stackform_core::{StackDefinition, Value, VariableBindings};

use crate::ConfigError;

pub const ENV_PREFIX: &str = "STACKFORM_VAR_";

/// Where variable values come from, besides the environment.
#[derive(Debug, Clone, Default)]
pub struct VarSources {
    pub file: Option<std::path::PathBuf>,
    /// Raw `name=value` flags, in command-line order.
    pub flags: Vec<String>,
}

/// Split a `name=value` flag. The value may itself contain `=`.
pub fn parse_var_flag(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_owned(), value.to_owned()))
        }
        _ => Err(ConfigError::Validation {
            field: "--var".into(),
            reason: format!("expected name=value, got '{raw}'"),
        }),
    }
}

/// Read a TOML table of variable values.
pub fn load_vars_file(path: &Path) -> Result<BTreeMap<String, Value>, ConfigError> {
    let err = |reason: String| ConfigError::VarsFile {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
    let table: toml::Table = raw.parse().map_err(|e: toml::de::Error| err(e.to_string()))?;
    Ok(table.into_iter().map(|(k, v)| (k, from_toml(v))).collect())
}

fn from_toml(v: toml::Value) -> Value {
    match v {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(t) => Value::Map(t.into_iter().map(|(k, v)| (k, from_toml(v))).collect()),
    }
}

/// Environment entries naming a declared variable. The suffix after
/// `STACKFORM_VAR_` matches case-insensitively; anything else is ignored.
pub fn env_bindings<I>(stack: &StackDefinition, env: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = (String, String)>,
{
    env.into_iter()
        .filter_map(|(key, value)| {
            let suffix = key.strip_prefix(ENV_PREFIX)?;
            stack
                .variables
                .keys()
                .find(|name| name.eq_ignore_ascii_case(suffix))
                .map(|name| (name.clone(), Value::String(value)))
        })
        .collect()
}

/// Merge every layer into bindings for `stack`.
///
/// Names that `stack` does not declare are kept so validation can reject
/// them by name. `secret` is consulted for sensitive variables nothing
/// else bound.
pub fn resolve_bindings<I, S>(
    stack: &StackDefinition,
    sources: &VarSources,
    env: I,
    secret: S,
) -> Result<VariableBindings, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
    S: Fn(&str) -> Option<SecretString>,
{
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    if let Some(path) = &sources.file {
        merged.extend(load_vars_file(path)?);
    }
    merged.extend(env_bindings(stack, env));
    for raw in &sources.flags {
        let (name, value) = parse_var_flag(raw)?;
        merged.insert(name, Value::String(value));
    }

    let mut bindings = VariableBindings::new();
    for (name, value) in merged {
        let sensitive = stack.variables.get(&name).is_some_and(|d| d.sensitive);
        match value {
            Value::String(s) if sensitive => bindings.set_secret(name, SecretString::from(s)),
            other => bindings.set(name, other),
        }
    }

    for decl in stack.variables.values().filter(|d| d.sensitive) {
        if bindings.contains(&decl.name) {
            continue;
        }
        if let Some(value) = secret(&decl.name) {
            bindings.set_secret(decl.name.clone(), value);
        }
    }
    Ok(bindings)
}
