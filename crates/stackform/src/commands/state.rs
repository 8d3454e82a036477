//! `state list | show | rm`: inspect and edit recorded state offline.

use std::collections::BTreeMap;

use serde::Serialize;
use tabled::Tabled;

use stackform_core::{Address, ResourceState};

use crate::cli::{GlobalOpts, OutputFormat, StateArgs, StateCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Views ───────────────────────────────────────────────────────────

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// A recorded resource with every value rendered, secrets redacted.
#[derive(Serialize)]
struct ResourceView {
    address: String,
    kind: String,
    id: String,
    updated_at: String,
    dependencies: Vec<String>,
    attributes: BTreeMap<String, String>,
}

impl ResourceView {
    fn new(address: &Address, state: &ResourceState) -> Self {
        Self {
            address: address.to_string(),
            kind: state.kind.to_string(),
            id: state.id.clone(),
            updated_at: state.updated_at.to_rfc3339(),
            dependencies: state.dependencies.iter().map(ToString::to_string).collect(),
            attributes: state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        }
    }

    fn detail(&self) -> String {
        let mut lines = vec![
            format!("Address:      {}", self.address),
            format!("ID:           {}", self.id),
            format!("Updated:      {}", self.updated_at),
        ];
        if !self.dependencies.is_empty() {
            lines.push(format!("Depends on:   {}", self.dependencies.join(", ")));
        }
        lines.push("Attributes:".into());
        lines.extend(self.attributes.iter().map(|(k, v)| format!("  {k} = {v}")));
        lines.join("\n")
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: StateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut state = super::open_state(global)?;

    match args.command {
        StateCommand::List => {
            let views: Vec<ResourceView> = state
                .resources()
                .iter()
                .map(|(a, s)| ResourceView::new(a, s))
                .collect();
            if views.is_empty() && global.output == OutputFormat::Table {
                if !global.quiet {
                    eprintln!("No resources recorded.");
                }
                return Ok(());
            }
            let out = output::render_list(
                global.output,
                &views,
                |v| StateRow {
                    address: v.address.clone(),
                    id: v.id.clone(),
                    updated: v.updated_at.clone(),
                },
                |v| v.address.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        StateCommand::Show { address } => {
            let parsed = util::parse_address(&address, "address")?;
            let recorded = state.get(&parsed).ok_or_else(|| CliError::NotFound {
                what: "resource".into(),
                identifier: address.clone(),
                list_command: "state list".into(),
            })?;
            let view = ResourceView::new(&parsed, recorded);
            let out = output::render_single(global.output, &view, ResourceView::detail, |v| {
                v.id.clone()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        StateCommand::Rm { addresses } => {
            let parsed = addresses
                .iter()
                .map(|a| util::parse_address(a, "address"))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(missing) = parsed.iter().find(|a| state.get(a).is_none()) {
                return Err(CliError::NotFound {
                    what: "resource".into(),
                    identifier: missing.to_string(),
                    list_command: "state list".into(),
                });
            }
            if !util::confirm(
                &format!(
                    "Forget {} resource(s)? They stay on the platform but stackform stops managing them.",
                    parsed.len()
                ),
                "state rm",
                global.yes,
            )? {
                return Ok(());
            }
            for address in &parsed {
                state.commit(address, None)?;
                tracing::info!(address = %address, "removed from state");
            }
            if !global.quiet {
                eprintln!("✓ Removed {} resource(s) from state", parsed.len());
            }
            Ok(())
        }
    }
}
