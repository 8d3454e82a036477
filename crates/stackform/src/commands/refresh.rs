//! `refresh`: bring state up to date with the platform and surface drift.

use serde::Serialize;
use stackform_core::Address;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::Session;

#[derive(Serialize)]
struct RefreshView<'a> {
    checked: usize,
    vanished: &'a [Address],
    updated: &'a [Address],
    drifted: Vec<String>,
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let mut session = Session::open(global)?;
    let report = session.engine.refresh(&session.stack, &mut session.state).await?;
    let painter = session.painter;

    let view = RefreshView {
        checked: report.checked,
        vanished: &report.vanished,
        updated: &report.updated,
        drifted: report.drifted.iter().map(ToString::to_string).collect(),
    };
    let out = output::render_single(
        global.output,
        &view,
        |v| {
            let mut lines = vec![painter.ok(&format!(
                "Refreshed {} resource(s): {} gone, {} updated",
                v.checked,
                v.vanished.len(),
                v.updated.len()
            ))];
            lines.extend(v.vanished.iter().map(|a| format!("  - {a} (deleted outside stackform)")));
            lines.extend(v.updated.iter().map(|a| format!("  ~ {a}")));
            lines.extend(
                v.drifted
                    .iter()
                    .map(|d| painter.bad(&format!("  ! {d} changed outside stackform"))),
            );
            lines.join("\n")
        },
        |v| {
            v.vanished
                .iter()
                .chain(v.updated)
                .map(ToString::to_string)
                .chain(v.drifted.iter().cloned())
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);

    if report.drifted.is_empty() {
        Ok(())
    } else {
        Err(CliError::Drift {
            resources: view.drifted.join("; "),
        })
    }
}
