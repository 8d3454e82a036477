//! `plan`: build the graph, refresh, and print the diff.

use serde::Serialize;
use stackform_core::{Action, Address, Plan, PlanRefresh, PlanSummary};

use crate::cli::{GlobalOpts, OutputFormat, PlanArgs};
use crate::error::CliError;
use crate::output::{self, Painter};

use super::{Session, util};

// ── Serialized view ─────────────────────────────────────────────────

#[derive(Serialize)]
struct PlanView<'a> {
    #[serde(flatten)]
    plan: &'a Plan,
    summary: PlanSummary,
    refreshed: RefreshView<'a>,
}

#[derive(Serialize)]
struct RefreshView<'a> {
    checked: usize,
    vanished: &'a [Address],
    adopted: &'a [Address],
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: PlanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let targets = util::parse_targets(&args.target.targets)?;
    let mut session = Session::open(global)?;

    let (plan, refreshed) = if args.destroy {
        (
            session.engine.plan_destroy(&session.state, &targets)?,
            PlanRefresh::default(),
        )
    } else {
        let graph = session
            .engine
            .build(&session.stack, &session.bindings)
            .await?;
        session
            .engine
            .plan(&graph, &mut session.state, &targets)
            .await?
    };

    let out = render(global.output, &plan, &refreshed, session.painter)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Render a plan in the selected format.
pub fn render(
    format: OutputFormat,
    plan: &Plan,
    refreshed: &PlanRefresh,
    painter: Painter,
) -> Result<String, CliError> {
    let view = PlanView {
        plan,
        summary: plan.summary(),
        refreshed: RefreshView {
            checked: refreshed.checked,
            vanished: &refreshed.vanished,
            adopted: &refreshed.adopted,
        },
    };
    output::render_single(
        format,
        &view,
        |v| describe(v.plan, refreshed, painter),
        |v| {
            v.plan
                .changes()
                .map(|p| format!("{} {}", p.action, p.address))
                .collect::<Vec<_>>()
                .join("\n")
        },
    )
}

fn describe(plan: &Plan, refreshed: &PlanRefresh, painter: Painter) -> String {
    let mut lines = Vec::new();

    if refreshed.checked > 0 {
        lines.push(painter.muted(&format!(
            "Refreshed {} recorded resource(s).",
            refreshed.checked
        )));
        for address in &refreshed.vanished {
            lines.push(painter.muted(&format!(
                "  {address} was deleted outside stackform and will be recreated"
            )));
        }
        for address in &refreshed.adopted {
            lines.push(painter.muted(&format!(
                "  {address} changed outside stackform; the change matches the configuration"
            )));
        }
        lines.push(String::new());
    }

    if !plan.has_changes() {
        lines.push(painter.ok("No changes. The platform matches the configuration."));
        return lines.join("\n");
    }

    let verb = if plan.destroy { "destroy" } else { "apply" };
    lines.push(painter.heading(&format!(
        "Stack '{}' will {verb} the following changes{}:",
        plan.stack,
        if plan.targeted { " (targeted)" } else { "" }
    )));
    lines.push(String::new());

    for p in plan.changes() {
        let symbol = painter.action(p.action, &format!("{:>3}", p.action.symbol()));
        let mut header = format!("{symbol} {}", p.address);
        if p.action == Action::Replace {
            header.push_str(if p.create_before_destroy {
                " (create before destroy)"
            } else {
                " (destroy then create)"
            });
        }
        lines.push(header);
        if let Some(note) = &p.note {
            lines.push(painter.muted(&format!("      # {note}")));
        }
        for change in &p.changes {
            lines.push(format!("      {change}"));
        }
    }

    lines.push(String::new());
    lines.push(format!("Plan: {}.", plan.summary()));
    lines.join("\n")
}
