//! `apply` and `destroy`: plan, confirm, walk, report.
//!
//! Progress comes from the engine's event channel and is drawn with
//! `indicatif`. Ctrl-C cancels the walk: in-flight resources finish and
//! are recorded, nothing new starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stackform_core::{
    Action, Address, ApplyEvent, ApplyReport, EventSender, OutputValue, Phase, Plan,
    PlanRefresh, ResourceStatus,
};

use crate::cli::{GlobalOpts, OutputFormat, TargetArgs};
use crate::error::CliError;
use crate::output::{self, Painter};

use super::{Session, plan, util};

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle_apply(args: TargetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let targets = util::parse_targets(&args.targets)?;
    let mut session = Session::open(global)?;

    let graph = Arc::new(
        session
            .engine
            .build(&session.stack, &session.bindings)
            .await?,
    );
    let (plan, refreshed) = session
        .engine
        .plan(&graph, &mut session.state, &targets)
        .await?;
    show_plan(global, &plan, &refreshed, session.painter)?;

    if plan.has_changes()
        && !util::confirm("Apply these changes?", "apply", global.yes)?
    {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let (cancel, watcher) = cancel_on_interrupt();
    let (events, progress) = track(&plan, session.painter, show_progress(global));
    let result = session
        .engine
        .apply(graph, &plan, &mut session.state, cancel, Some(events))
        .await;
    watcher.abort();
    let _ = progress.await;

    session.save_sandbox()?;
    report(global, &result?, session.painter, "Apply")
}

pub async fn handle_destroy(args: TargetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let targets = util::parse_targets(&args.targets)?;
    let mut session = Session::open(global)?;

    let plan = session.engine.plan_destroy(&session.state, &targets)?;
    if !plan.has_changes() {
        if !global.quiet {
            eprintln!("Nothing to destroy.");
        }
        return Ok(());
    }
    show_plan(global, &plan, &PlanRefresh::default(), session.painter)?;

    let count = plan.summary().delete;
    if !util::confirm(
        &format!("Destroy {count} resource(s)? This cannot be undone."),
        "destroy",
        global.yes,
    )? {
        eprintln!("Destroy cancelled.");
        return Ok(());
    }

    let (cancel, watcher) = cancel_on_interrupt();
    let (events, progress) = track(&plan, session.painter, show_progress(global));
    let result = session
        .engine
        .destroy(&plan, &mut session.state, cancel, Some(events))
        .await;
    watcher.abort();
    let _ = progress.await;

    session.save_sandbox()?;
    report(global, &result?, session.painter, "Destroy")
}

// ── Plan preview ────────────────────────────────────────────────────

fn show_plan(
    global: &GlobalOpts,
    plan: &Plan,
    refreshed: &PlanRefresh,
    painter: Painter,
) -> Result<(), CliError> {
    // Structured formats print only the final report
    if global.output != OutputFormat::Table || global.quiet {
        return Ok(());
    }
    let out = plan::render(OutputFormat::Table, plan, refreshed, painter)?;
    output::print_output(&out, false);
    println!();
    Ok(())
}

fn show_progress(global: &GlobalOpts) -> bool {
    global.output == OutputFormat::Table && !global.quiet
}

// ── Cancellation & progress ─────────────────────────────────────────

fn cancel_on_interrupt() -> (CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted: waiting for in-flight resources, starting nothing new");
            token.cancel();
        }
    });
    (cancel, watcher)
}

/// Follow apply events until the engine drops its sender.
fn track(plan: &Plan, painter: Painter, visible: bool) -> (EventSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ApplyEvent>();

    // A replacement finishes after two events: the new instance applied
    // and the old one destroyed.
    let mut remaining: HashMap<Address, u8> = plan
        .changes()
        .map(|p| (p.address.clone(), if p.action == Action::Replace { 2 } else { 1 }))
        .collect();

    let bar = if visible {
        let bar = ProgressBar::new(u64::try_from(remaining.len()).unwrap_or(u64::MAX));
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30}] {pos}/{len} {wide_msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let finished = match event.phase {
                Phase::Planned => continue,
                Phase::Applying | Phase::Destroying => {
                    bar.set_message(format!("{} {}", event.phase, event.address));
                    continue;
                }
                Phase::Applied | Phase::Destroyed => {
                    bar.println(format!(
                        "  {} {} {}",
                        painter.ok("✓"),
                        event.address,
                        event.phase
                    ));
                    let left = remaining.entry(event.address.clone()).or_insert(1);
                    *left = left.saturating_sub(1);
                    *left == 0
                }
                Phase::Failed | Phase::Skipped => {
                    bar.println(format!(
                        "  {} {} {}",
                        painter.bad("✗"),
                        event.address,
                        event.phase
                    ));
                    remaining.insert(event.address.clone(), 0);
                    true
                }
            };
            if finished {
                bar.inc(1);
            }
        }
        bar.finish_and_clear();
    });
    (tx, task)
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Serialize)]
struct ResultView {
    address: String,
    action: Action,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
struct ReportView<'a> {
    applied: usize,
    destroyed: usize,
    unchanged: usize,
    failed: usize,
    skipped: usize,
    cancelled: bool,
    results: Vec<ResultView>,
    outputs: &'a IndexMap<String, OutputValue>,
}

fn detail(status: &ResourceStatus) -> Option<String> {
    match status {
        ResourceStatus::Failed(e) => Some(e.to_string()),
        ResourceStatus::Skipped(reason) => Some(reason.to_string()),
        _ => None,
    }
}

fn report(
    global: &GlobalOpts,
    report: &ApplyReport,
    painter: Painter,
    verb: &str,
) -> Result<(), CliError> {
    let summary = &report.summary;
    let counts = summary.counts();
    let view = ReportView {
        applied: counts.applied,
        destroyed: counts.destroyed,
        unchanged: counts.unchanged,
        failed: counts.failed,
        skipped: counts.skipped,
        cancelled: summary.cancelled,
        results: summary
            .results
            .iter()
            .map(|r| ResultView {
                address: r.address.to_string(),
                action: r.action,
                status: r.status.label(),
                detail: detail(&r.status),
            })
            .collect(),
        outputs: &report.outputs,
    };

    let out = output::render_single(
        global.output,
        &view,
        |v| {
            let mut lines = Vec::new();
            let rows: Vec<ResultRow> = v
                .results
                .iter()
                .filter(|r| r.status != "unchanged")
                .map(|r| ResultRow {
                    address: r.address.clone(),
                    action: r.action.to_string(),
                    status: if r.status == "failed" || r.status == "skipped" {
                        painter.bad(r.status)
                    } else {
                        painter.ok(r.status)
                    },
                    detail: r.detail.clone().unwrap_or_default(),
                })
                .collect();
            if !rows.is_empty() {
                lines.push(output::render_table(&rows));
            }
            let headline = format!("{verb} finished: {counts}");
            lines.push(if summary.is_success() {
                painter.ok(&headline)
            } else {
                painter.bad(&headline)
            });
            if !v.outputs.is_empty() {
                lines.push(String::new());
                lines.push(painter.heading("Outputs:"));
                for (name, value) in v.outputs {
                    lines.push(format!("  {name} = {}", value.render()));
                }
            }
            lines.join("\n")
        },
        |v| {
            v.results
                .iter()
                .filter(|r| r.status != "unchanged")
                .map(|r| format!("{} {}", r.status, r.address))
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);

    if summary.is_success() {
        return Ok(());
    }
    let mut details: Vec<String> = summary
        .failures()
        .map(|(address, err)| format!("{address}: {err}"))
        .collect();
    if summary.cancelled {
        details.push("the run was cancelled before every resource started".into());
    }
    Err(CliError::PartialApply {
        counts: counts.to_string(),
        details: details.join("\n"),
    })
}
