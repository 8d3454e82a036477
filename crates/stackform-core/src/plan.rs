// ── Planning ──
//
// Diffs the desired attributes of every resource against recorded state
// and decides one action per resource. Attributes of resources about to
// be created or replaced are `Unknown` to their consumers, so a
// replacement ripples through every attribute that reads from it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use petgraph::graph::DiGraph;
use serde::{Serialize, Serializer};
use strum::Display;
use tracing::debug;

use crate::error::CoreError;
use crate::graph::{ResourceGraph, resolver};
use crate::model::{Address, Lifecycle, ResourceKind, Value};
use crate::state::ResourceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoOp,
    Create,
    Update,
    Replace,
    Delete,
}

impl Action {
    /// Plan symbol, as printed in front of each address.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::NoOp => " ",
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
        }
    }
}

/// One attribute's before/after. Values render through `Display`, so
/// sensitive content never reaches a serialized plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub name: String,
    #[serde(serialize_with = "rendered")]
    pub before: Option<Value>,
    #[serde(serialize_with = "rendered")]
    pub after: Option<Value>,
    pub forces_replacement: bool,
}

fn rendered<S: Serializer>(value: &Option<Value>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => s.serialize_some(&v.to_string()),
        None => s.serialize_none(),
    }
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| "(none)".to_owned(), ToString::to_string);
        write!(f, "{}: {} -> {}", self.name, show(&self.before), show(&self.after))?;
        if self.forces_replacement {
            f.write_str(" (forces replacement)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourcePlan {
    pub address: Address,
    pub kind: ResourceKind,
    pub action: Action,
    pub create_before_destroy: bool,
    pub changes: Vec<AttributeChange>,
    /// Id of the existing instance, if any.
    pub prior_id: Option<String>,
    /// Why the action was chosen when the diff alone does not say.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.unchanged
        )
    }
}

/// Everything one apply (or destroy) will do.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub stack: String,
    /// Declared resources in apply order, unchanged ones included.
    pub resources: Vec<ResourcePlan>,
    /// Resources to delete, consumers first.
    pub deletions: Vec<ResourcePlan>,
    pub targeted: bool,
    pub destroy: bool,
}

impl Plan {
    pub fn summary(&self) -> PlanSummary {
        let mut s = PlanSummary::default();
        for p in self.resources.iter().chain(&self.deletions) {
            match p.action {
                Action::NoOp => s.unchanged += 1,
                Action::Create => s.create += 1,
                Action::Update => s.update += 1,
                Action::Replace => s.replace += 1,
                Action::Delete => s.delete += 1,
            }
        }
        s
    }

    pub fn has_changes(&self) -> bool {
        self.resources
            .iter()
            .chain(&self.deletions)
            .any(|p| p.action != Action::NoOp)
    }

    /// Every entry that is not a no-op, deletions first.
    pub fn changes(&self) -> impl Iterator<Item = &ResourcePlan> {
        self.deletions
            .iter()
            .chain(&self.resources)
            .filter(|p| p.action != Action::NoOp)
    }

    pub fn get(&self, address: &Address) -> Option<&ResourcePlan> {
        self.resources
            .iter()
            .chain(&self.deletions)
            .find(|p| &p.address == address)
    }
}

// ── Diff ────────────────────────────────────────────────────────────

/// Decide the action for one resource.
pub fn diff(
    kind: ResourceKind,
    desired: &BTreeMap<String, Value>,
    prior: Option<&ResourceState>,
    lifecycle: &Lifecycle,
) -> (Action, Vec<AttributeChange>) {
    let Some(prior) = prior else {
        let changes = desired
            .iter()
            .map(|(name, v)| AttributeChange {
                name: name.clone(),
                before: None,
                after: Some(v.clone()),
                forces_replacement: false,
            })
            .collect();
        return (Action::Create, changes);
    };

    let names: BTreeSet<&String> = desired.keys().chain(prior.inputs.keys()).collect();
    let mut changes = Vec::new();
    for name in names {
        if lifecycle.ignore_changes.contains(name) {
            continue;
        }
        let before = prior.inputs.get(name);
        let after = desired.get(name);
        let unknown = after.is_some_and(|v| !v.is_known());
        if !unknown && before == after {
            continue;
        }
        changes.push(AttributeChange {
            name: name.clone(),
            before: before.cloned(),
            after: after.cloned(),
            forces_replacement: kind.forces_replacement(name),
        });
    }

    let action = if changes.iter().any(|c| c.forces_replacement) {
        Action::Replace
    } else if changes.is_empty() {
        Action::NoOp
    } else {
        Action::Update
    };
    (action, changes)
}

// ── Plan construction ───────────────────────────────────────────────

/// Plan `graph` against `state`. With `targets`, only those resources are
/// planned; everything they read outside the set must already have state.
pub fn plan_apply(
    graph: &ResourceGraph,
    state: &BTreeMap<Address, ResourceState>,
    targets: &[Address],
) -> Result<Plan, CoreError> {
    for target in targets {
        if !graph.contains(target) && !state.contains_key(target) {
            return Err(CoreError::UnknownTarget {
                address: target.to_string(),
            });
        }
    }
    let in_scope = |a: &Address| targets.is_empty() || targets.contains(a);

    let mut pending: HashSet<Address> = HashSet::new();
    let mut resources = Vec::new();
    for node in graph.apply_order() {
        if !in_scope(&node.address) {
            continue;
        }
        for producer in &node.producers {
            if !in_scope(producer) && !state.contains_key(producer) {
                return Err(CoreError::MissingDependencyState {
                    target: node.address.clone(),
                    dependency: producer.clone(),
                });
            }
        }

        let desired = graph
            .context(state, &pending)
            .eval_attributes(&node.attributes, &node.address)?;
        let prior = state.get(&node.address);
        let (action, changes) = diff(node.kind, &desired, prior, &node.lifecycle);
        if matches!(action, Action::Create | Action::Replace) {
            pending.insert(node.address.clone());
        }
        debug!(address = %node.address, %action, changes = changes.len(), "planned");

        resources.push(ResourcePlan {
            address: node.address.clone(),
            kind: node.kind,
            action,
            create_before_destroy: node.lifecycle.create_before_destroy,
            changes,
            prior_id: prior.map(|p| p.id.clone()),
            note: None,
        });
    }

    let orphans: Vec<Address> = state
        .keys()
        .filter(|a| !graph.contains(a) && in_scope(a))
        .cloned()
        .collect();
    let deletions = deletion_order(state, &orphans)?
        .into_iter()
        .filter_map(|a| state.get(&a).map(|s| delete_plan(a, s, "no longer declared")))
        .collect();

    Ok(Plan {
        stack: graph.stack_name().to_owned(),
        resources,
        deletions,
        targeted: !targets.is_empty(),
        destroy: false,
    })
}

/// Plan deleting everything in `state`, or with `targets` those resources
/// and everything recorded as depending on them.
pub fn plan_destroy(
    stack: &str,
    state: &BTreeMap<Address, ResourceState>,
    targets: &[Address],
) -> Result<Plan, CoreError> {
    for target in targets {
        if !state.contains_key(target) {
            return Err(CoreError::UnknownTarget {
                address: target.to_string(),
            });
        }
    }

    let selected: Vec<Address> = if targets.is_empty() {
        state.keys().cloned().collect()
    } else {
        let mut seen: BTreeSet<Address> = targets.iter().cloned().collect();
        let mut frontier: Vec<Address> = targets.to_vec();
        while let Some(next) = frontier.pop() {
            for (address, s) in state {
                if s.dependencies.contains(&next) && seen.insert(address.clone()) {
                    frontier.push(address.clone());
                }
            }
        }
        seen.into_iter().collect()
    };

    let deletions = deletion_order(state, &selected)?
        .into_iter()
        .filter_map(|a| state.get(&a).map(|s| delete_plan(a, s, "destroy requested")))
        .collect();
    Ok(Plan {
        stack: stack.to_owned(),
        resources: Vec::new(),
        deletions,
        targeted: !targets.is_empty(),
        destroy: true,
    })
}

fn delete_plan(address: Address, state: &ResourceState, note: &str) -> ResourcePlan {
    ResourcePlan {
        kind: state.kind,
        action: Action::Delete,
        create_before_destroy: false,
        changes: state
            .inputs
            .iter()
            .map(|(name, v)| AttributeChange {
                name: name.clone(),
                before: Some(v.clone()),
                after: None,
                forces_replacement: false,
            })
            .collect(),
        prior_id: Some(state.id.clone()),
        note: Some(note.to_owned()),
        address,
    }
}

/// Order `addresses` consumers-first using the dependencies recorded in
/// state. Ties follow address order.
fn deletion_order(
    state: &BTreeMap<Address, ResourceState>,
    addresses: &[Address],
) -> Result<Vec<Address>, CoreError> {
    let mut graph: DiGraph<&Address, ()> = DiGraph::with_capacity(addresses.len(), 0);
    let nodes: BTreeMap<&Address, _> = addresses.iter().map(|a| (a, graph.add_node(a))).collect();
    for address in addresses {
        let Some(s) = state.get(address) else {
            continue;
        };
        for dep in &s.dependencies {
            if let (Some(consumer), Some(producer)) = (nodes.get(address), nodes.get(dep)) {
                // Consumers are deleted before their producers.
                graph.update_edge(*consumer, *producer, ());
            }
        }
    }
    resolver::topological_order(&graph)
        .map(|order| {
            order
                .into_iter()
                .filter_map(|n| graph.node_weight(n).map(|a| (*a).clone()))
                .collect()
        })
        .map_err(|_| CoreError::Internal("recorded dependencies form a cycle".into()))
}
