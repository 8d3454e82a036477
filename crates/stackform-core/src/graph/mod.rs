// ── Resource graph ──
//
// The validated, lookup-resolved form of a stack. Resources are kept in
// declaration order alongside a precomputed apply order; every reference
// is an explicit typed edge. A `ResourceGraph` is immutable once built and
// is shared read-only by every apply task.

pub mod builder;
pub mod eval;
pub mod resolver;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use indexmap::IndexMap;

use crate::model::{Address, Expr, Lifecycle, OutputDecl, ResourceKind, Value};
use crate::state::ResourceState;

pub use builder::{ValidatedStack, resolve, validate};
pub use eval::EvalContext;

/// Why a consumer depends on a producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The consumer's `attribute` reads something from the producer.
    Reference { attribute: String },
    /// An explicit `depends_on` ordering hint.
    DependsOn,
}

/// A directed edge: `from` (consumer) needs `to` (producer).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: Address,
    pub to: Address,
    pub kind: EdgeKind,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EdgeKind::Reference { attribute } => {
                write!(f, "{} -> {} (via {attribute})", self.from, self.to)
            }
            EdgeKind::DependsOn => write!(f, "{} -> {} (depends_on)", self.from, self.to),
        }
    }
}

/// One managed resource in the graph.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub address: Address,
    pub kind: ResourceKind,
    pub attributes: BTreeMap<String, Expr>,
    pub lifecycle: Lifecycle,
    /// Resources this one must wait for, in declaration order.
    pub producers: Vec<Address>,
}

#[derive(Debug, Clone)]
pub struct ResourceGraph {
    stack: String,
    nodes: Vec<ResourceNode>,
    index: HashMap<Address, usize>,
    order: Vec<usize>,
    edges: Vec<Edge>,
    variables: BTreeMap<String, Value>,
    lookups: BTreeMap<Address, Value>,
    locals: BTreeMap<String, Value>,
    outputs: IndexMap<String, OutputDecl>,
}

impl ResourceGraph {
    pub fn stack_name(&self) -> &str {
        &self.stack
    }

    /// Resources in declaration order.
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn node(&self, address: &Address) -> Option<&ResourceNode> {
        self.index.get(address).and_then(|i| self.nodes.get(*i))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Producers before consumers; ties broken by declaration order.
    pub fn apply_order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|i| self.nodes.get(*i))
    }

    /// Consumers before producers.
    pub fn destroy_order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().rev().filter_map(|i| self.nodes.get(*i))
    }

    /// Every typed edge, lookups and locals included.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    pub fn lookups(&self) -> &BTreeMap<Address, Value> {
        &self.lookups
    }

    pub fn locals(&self) -> &BTreeMap<String, Value> {
        &self.locals
    }

    pub fn outputs(&self) -> &IndexMap<String, OutputDecl> {
        &self.outputs
    }

    /// Resources that list `address` as a producer.
    pub fn consumers<'a>(&'a self, address: &'a Address) -> impl Iterator<Item = &'a Address> {
        self.nodes
            .iter()
            .filter(move |n| n.producers.contains(address))
            .map(|n| &n.address)
    }

    /// `roots` plus everything that transitively consumes them.
    pub fn with_consumers(&self, roots: &[Address]) -> BTreeSet<Address> {
        let mut seen: BTreeSet<Address> = roots.iter().cloned().collect();
        let mut queue: VecDeque<Address> = roots.iter().cloned().collect();
        while let Some(next) = queue.pop_front() {
            for consumer in self.consumers(&next) {
                if seen.insert(consumer.clone()) {
                    queue.push_back(consumer.clone());
                }
            }
        }
        seen
    }

    /// An evaluation context over this graph's resolved inputs.
    pub fn context<'a>(
        &'a self,
        resources: &'a BTreeMap<Address, ResourceState>,
        pending: &'a HashSet<Address>,
    ) -> EvalContext<'a> {
        EvalContext {
            variables: &self.variables,
            lookups: &self.lookups,
            locals: &self.locals,
            resources,
            pending,
        }
    }
}
