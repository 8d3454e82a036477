//! Shared helpers for command handlers.

use std::io::IsTerminal;

use stackform_core::Address;

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
///
/// Without a terminal to prompt on, `--yes` is required.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// Parse `--target` values into addresses.
pub fn parse_targets(raw: &[String]) -> Result<Vec<Address>, CliError> {
    raw.iter().map(|t| parse_address(t, "--target")).collect()
}

pub fn parse_address(raw: &str, field: &str) -> Result<Address, CliError> {
    raw.parse().map_err(|e: stackform_core::model::AddressParseError| {
        CliError::Validation {
            field: field.into(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_target_is_a_usage_error() {
        let err = parse_targets(&["aws_lb".into()]);
        assert!(matches!(err, Err(CliError::Validation { .. })));
        assert!(parse_targets(&["aws_lb.shared".into()]).is_ok());
    }
}
