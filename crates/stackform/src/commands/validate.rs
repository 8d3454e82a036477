//! `validate`: static checks only, no platform connection.

use serde::Serialize;
use stackform_core::{graph, stack};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output::{self, Painter};

#[derive(Serialize)]
struct Validation {
    stack: String,
    valid: bool,
    variables: usize,
    lookups: usize,
    resources: usize,
    outputs: usize,
    advisories: Vec<String>,
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let stack = stack::by_name(&global.stack)?;
    let bindings = config::bindings(global, &resolved, &stack)?;
    let validated = graph::validate(&stack, &bindings)?;

    let report = Validation {
        stack: stack.name.clone(),
        valid: true,
        variables: stack.variables.len(),
        lookups: stack.lookups.len(),
        resources: stack.resources.len(),
        outputs: stack.outputs.len(),
        advisories: validated.advisories().to_vec(),
    };
    let painter = Painter::new(global.color);

    let out = output::render_single(
        global.output,
        &report,
        |r| {
            let mut lines = vec![format!(
                "{} Stack '{}' is valid: {} resources, {} lookups, {} outputs",
                painter.ok("✓"),
                r.stack,
                r.resources,
                r.lookups,
                r.outputs
            )];
            lines.extend(
                r.advisories
                    .iter()
                    .map(|a| format!("  {} {a}", painter.bad("!"))),
            );
            lines.join("\n")
        },
        |r| r.stack.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
