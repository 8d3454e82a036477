//! `graph`: the validated dependency graph, in evaluation order.

use std::fmt::Write as _;

use serde::Serialize;
use tabled::Tabled;

use stackform_core::{Address, Edge, EdgeKind, graph, stack};

use crate::cli::{GlobalOpts, GraphArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct NodeView {
    position: usize,
    address: String,
    depends_on: Vec<String>,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

pub fn handle(args: &GraphArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let stack = stack::by_name(&global.stack)?;
    let bindings = config::bindings(global, &resolved, &stack)?;
    let validated = graph::validate(&stack, &bindings)?;

    if args.dot {
        let out = dot(&stack.name, validated.order(), validated.edges());
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    let nodes = nodes(validated.order(), validated.edges());
    let out = output::render_list(
        global.output,
        &nodes,
        |n| NodeRow {
            position: n.position,
            address: n.address.clone(),
            depends_on: n.depends_on.join(", "),
        },
        |n| n.address.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn nodes(order: &[Address], edges: &[Edge]) -> Vec<NodeView> {
    order
        .iter()
        .enumerate()
        .map(|(i, address)| {
            let mut depends_on: Vec<String> = edges
                .iter()
                .filter(|e| &e.from == address)
                .map(|e| e.to.to_string())
                .collect();
            depends_on.sort();
            depends_on.dedup();
            NodeView {
                position: i + 1,
                address: address.to_string(),
                depends_on,
            }
        })
        .collect()
}

/// Graphviz DOT, edges pointing from consumer to producer.
fn dot(stack: &str, order: &[Address], edges: &[Edge]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{stack}\" {{");
    let _ = writeln!(out, "  rankdir=RL;");
    let _ = writeln!(out, "  node [shape=box];");
    for address in order {
        let _ = writeln!(out, "  \"{address}\";");
    }
    for edge in edges {
        let label = match &edge.kind {
            EdgeKind::Reference { attribute } => attribute.as_str(),
            EdgeKind::DependsOn => "depends_on",
        };
        let _ = writeln!(out, "  \"{}\" -> \"{}\" [label=\"{label}\"];", edge.from, edge.to);
    }
    out.push('}');
    out
}
