// ── Graph builder ──
//
// Two stages. `validate` is pure: it resolves variables, checks every
// reference, orders lookups, locals, and resources, and rejects cycles, so
// configuration errors surface before any platform call. `resolve` then
// runs the lookups and evaluates the locals in dependency order and yields
// the `ResourceGraph` the planner consumes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use petgraph::graph::{DiGraph, NodeIndex};
use stackform_api::{Filter, LookupQuery, Platform};
use tracing::{debug, info, warn};

use super::eval::EvalContext;
use super::resolver::topological_order;
use super::{Edge, EdgeKind, ResourceGraph, ResourceNode};
use crate::apply::retry::{RetryPolicy, call_with_retry};
use crate::error::{CoreError, DanglingReference};
use crate::model::{
    Address, Cardinality, Expr, LookupDecl, Reference, ResourceKind, StackDefinition, VarType,
    Value, VariableBindings, VariableDecl,
};

/// A stack that passed every static check. Holds no platform data yet.
#[derive(Debug, Clone)]
pub struct ValidatedStack {
    stack: StackDefinition,
    variables: BTreeMap<String, Value>,
    order: Vec<Address>,
    edges: Vec<Edge>,
    advisories: Vec<String>,
}

impl ValidatedStack {
    pub fn stack(&self) -> &StackDefinition {
        &self.stack
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Lookups, locals, and resources in evaluation order.
    pub fn order(&self) -> &[Address] {
        &self.order
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Non-fatal findings worth showing an operator.
    pub fn advisories(&self) -> &[String] {
        &self.advisories
    }
}

/// Run every static check against `stack` with `bindings`.
///
/// Checks run in a fixed order (variables, references, cycles, sensitive
/// outputs) and the first failing stage is reported in full.
pub fn validate(
    stack: &StackDefinition,
    bindings: &VariableBindings,
) -> Result<ValidatedStack, CoreError> {
    let variables = resolve_variables(stack, bindings)?;
    check_references(stack)?;
    let (order, edges) = order_nodes(stack)?;
    check_sensitive_outputs(stack)?;

    let advisories = advisories(stack);
    for advisory in &advisories {
        warn!(stack = %stack.name, "{advisory}");
    }
    debug!(
        stack = %stack.name,
        nodes = order.len(),
        edges = edges.len(),
        "stack validated"
    );

    Ok(ValidatedStack {
        stack: stack.clone(),
        variables,
        order,
        edges,
        advisories,
    })
}

// ── Variables ───────────────────────────────────────────────────────

fn resolve_variables(
    stack: &StackDefinition,
    bindings: &VariableBindings,
) -> Result<BTreeMap<String, Value>, CoreError> {
    let bound = |decl: &VariableDecl| bindings.get(&decl.name).filter(|v| !v.is_null());

    let missing: Vec<String> = stack
        .variables
        .values()
        .filter(|decl| decl.is_required() && bound(decl).is_none())
        .map(|decl| decl.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::MissingVariables { names: missing });
    }

    if let Some(name) = bindings
        .names()
        .find(|n| !stack.variables.contains_key(*n))
    {
        return Err(CoreError::UndeclaredVariable {
            name: name.to_owned(),
        });
    }

    let mut out = BTreeMap::new();
    for decl in stack.variables.values() {
        let value = match bound(decl) {
            Some(v) => coerce(decl, v.clone())?,
            None => decl.default.clone().unwrap_or(Value::Null),
        };
        let value = match value {
            Value::String(s) if decl.sensitive => Value::sensitive(s),
            other => other,
        };
        out.insert(decl.name.clone(), value);
    }
    Ok(out)
}

/// Check `value` against the declared type, accepting the string forms a
/// command line or environment variable would carry.
fn coerce(decl: &VariableDecl, value: Value) -> Result<Value, CoreError> {
    let mismatch = |found: &Value| CoreError::InvalidVariable {
        name: decl.name.clone(),
        expected: decl.var_type.to_string(),
        found: found.type_name().to_owned(),
    };

    match (decl.var_type, value) {
        (VarType::String, v @ (Value::String(_) | Value::Sensitive(_))) => Ok(v),
        (VarType::String, v @ (Value::Number(_) | Value::Bool(_))) => {
            Ok(Value::String(v.interpolate().unwrap_or_default()))
        }
        (VarType::Number, v @ Value::Number(_)) | (VarType::Bool, v @ Value::Bool(_)) => Ok(v),
        (VarType::Number, Value::String(s)) => serde_json::from_str::<serde_json::Number>(s.trim())
            .map(Value::Number)
            .map_err(|_| CoreError::InvalidVariable {
                name: decl.name.clone(),
                expected: "number".into(),
                found: format!("\"{s}\""),
            }),
        (VarType::Bool, Value::String(s)) => match s.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(CoreError::InvalidVariable {
                name: decl.name.clone(),
                expected: "bool".into(),
                found: format!("\"{s}\""),
            }),
        },
        (VarType::List, v @ Value::List(_)) => Ok(v),
        (_, other) => Err(mismatch(&other)),
    }
}

// ── References ──────────────────────────────────────────────────────

fn check_references(stack: &StackDefinition) -> Result<(), CoreError> {
    let mut dangling = Vec::new();
    let mut check = |from: String, reference: &Reference| {
        let declared = match reference {
            Reference::Var(name) => stack.variables.contains_key(name),
            Reference::Node { target, .. } => stack.declares(target),
        };
        if !declared {
            dangling.push(DanglingReference {
                from,
                to: reference.describe(),
            });
        }
    };

    for decl in stack.lookups.values() {
        for r in decl.references() {
            check(decl.address.to_string(), &r);
        }
    }
    for decl in stack.locals.values() {
        for r in decl.expr.references() {
            check(decl.address().to_string(), &r);
        }
    }
    for decl in stack.resources.values() {
        for (_, r) in decl.references() {
            check(decl.address.to_string(), &r);
        }
        for target in &decl.depends_on {
            let r = Reference::Node {
                target: target.clone(),
                attribute: None,
            };
            check(decl.address.to_string(), &r);
        }
    }
    for decl in stack.outputs.values() {
        for r in decl.expr.references() {
            check(format!("output.{}", decl.name), &r);
        }
    }
    if !dangling.is_empty() {
        return Err(CoreError::DanglingReferences { refs: dangling });
    }

    // Lookups and locals resolve before anything is applied.
    let early = stack
        .lookups
        .values()
        .map(|d| (d.address.clone(), d.references()))
        .chain(stack.locals.values().map(|d| (d.address(), d.expr.references())));
    for (from, refs) in early {
        if let Some(r) = refs.iter().find(|r| {
            matches!(r, Reference::Node { target, .. } if target.is_resource())
        }) {
            return Err(CoreError::InvalidReference {
                from: from.to_string(),
                to: r.describe(),
                reason: "lookups and locals cannot read managed resources".into(),
            });
        }
    }
    Ok(())
}

// ── Ordering ────────────────────────────────────────────────────────

fn order_nodes(stack: &StackDefinition) -> Result<(Vec<Address>, Vec<Edge>), CoreError> {
    let addresses: Vec<Address> = stack
        .lookups
        .keys()
        .cloned()
        .chain(stack.locals.values().map(|d| d.address()))
        .chain(stack.resources.keys().cloned())
        .collect();

    let mut graph: DiGraph<Address, ()> = DiGraph::with_capacity(addresses.len(), 0);
    let mut index: HashMap<Address, NodeIndex> = HashMap::with_capacity(addresses.len());
    for address in &addresses {
        index.insert(address.clone(), graph.add_node(address.clone()));
    }

    let edges = collect_edges(stack);
    for edge in &edges {
        if let (Some(producer), Some(consumer)) = (index.get(&edge.to), index.get(&edge.from)) {
            graph.update_edge(*producer, *consumer, ());
        }
    }

    match topological_order(&graph) {
        Ok(order) => Ok((
            order
                .into_iter()
                .filter_map(|n| graph.node_weight(n).cloned())
                .collect(),
            edges,
        )),
        Err(cycles) => Err(CoreError::DependencyCycle {
            cycles: cycles
                .into_iter()
                .map(|c| {
                    c.into_iter()
                        .filter_map(|n| graph.node_weight(n).cloned())
                        .collect()
                })
                .collect(),
        }),
    }
}

fn collect_edges(stack: &StackDefinition) -> Vec<Edge> {
    let mut edges: Vec<Edge> = Vec::new();
    let mut push = |edge: Edge| {
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    };
    let node_targets = |refs: Vec<Reference>| {
        refs.into_iter().filter_map(|r| match r {
            Reference::Node { target, .. } => Some(target),
            Reference::Var(_) => None,
        })
    };

    for decl in stack.lookups.values() {
        for (filter, expr) in &decl.filters {
            for target in node_targets(expr.references()) {
                push(Edge {
                    from: decl.address.clone(),
                    to: target,
                    kind: EdgeKind::Reference {
                        attribute: filter.clone(),
                    },
                });
            }
        }
    }
    for decl in stack.locals.values() {
        for target in node_targets(decl.expr.references()) {
            push(Edge {
                from: decl.address(),
                to: target,
                kind: EdgeKind::Reference {
                    attribute: "value".into(),
                },
            });
        }
    }
    for decl in stack.resources.values() {
        for (attribute, r) in decl.references() {
            if let Reference::Node { target, .. } = r {
                push(Edge {
                    from: decl.address.clone(),
                    to: target,
                    kind: EdgeKind::Reference { attribute },
                });
            }
        }
        for target in &decl.depends_on {
            push(Edge {
                from: decl.address.clone(),
                to: target.clone(),
                kind: EdgeKind::DependsOn,
            });
        }
    }
    edges
}

// ── Sensitivity ─────────────────────────────────────────────────────

fn check_sensitive_outputs(stack: &StackDefinition) -> Result<(), CoreError> {
    for decl in stack.outputs.values().filter(|o| !o.sensitive) {
        if let Some(variable) = sensitive_source(stack, &decl.expr) {
            return Err(CoreError::SensitiveOutput {
                output: decl.name.clone(),
                variable,
            });
        }
    }
    Ok(())
}

/// The first sensitive variable `expr` can observe, following locals and
/// declared resource attributes. Only called on acyclic stacks.
fn sensitive_source(stack: &StackDefinition, expr: &Expr) -> Option<String> {
    expr.references().into_iter().find_map(|r| match r {
        Reference::Var(name) => stack
            .variables
            .get(&name)
            .filter(|v| v.sensitive)
            .map(|_| name),
        Reference::Node {
            target: Address::Local(name),
            ..
        } => stack
            .locals
            .get(&name)
            .and_then(|l| sensitive_source(stack, &l.expr)),
        Reference::Node {
            target,
            attribute: Some(attribute),
        } => stack
            .resources
            .get(&target)
            .and_then(|d| d.attributes.get(&attribute))
            .and_then(|e| sensitive_source(stack, e)),
        Reference::Node { .. } => None,
    })
}

// ── Advisories ──────────────────────────────────────────────────────

const WORLD: &str = "0.0.0.0/0";
const SSH_PORT: i64 = 22;

fn advisories(stack: &StackDefinition) -> Vec<String> {
    stack
        .resources
        .values()
        .filter(|d| d.kind == ResourceKind::AwsSecurityGroup)
        .filter(|d| d.attributes.get("ingress").is_some_and(opens_ssh_to_world))
        .map(|d| format!("{} allows SSH (port {SSH_PORT}) from {WORLD}", d.address))
        .collect()
}

fn opens_ssh_to_world(ingress: &Expr) -> bool {
    let literal_port = |rule: &BTreeMap<String, Expr>, key: &str| match rule.get(key) {
        Some(Expr::Literal(Value::Number(n))) => n.as_i64(),
        _ => None,
    };
    let Expr::List(rules) = ingress else {
        return false;
    };
    rules.iter().any(|rule| {
        let Expr::Map(rule) = rule else {
            return false;
        };
        let covers_ssh = matches!(
            (literal_port(rule, "from_port"), literal_port(rule, "to_port")),
            (Some(from), Some(to)) if from <= SSH_PORT && SSH_PORT <= to
        );
        let world = matches!(
            rule.get("cidr_blocks"),
            Some(Expr::List(cidrs)) if cidrs.iter().any(|c| matches!(c, Expr::Literal(Value::String(s)) if s == WORLD))
        );
        covers_ssh && world
    })
}

// ── Resolution ──────────────────────────────────────────────────────

/// Resolve lookups and locals against `platform` and assemble the graph.
pub async fn resolve<P: Platform>(
    validated: ValidatedStack,
    platform: &P,
    retry: &RetryPolicy,
    timeout: Duration,
) -> Result<ResourceGraph, CoreError> {
    let ValidatedStack {
        stack,
        variables,
        order,
        edges,
        ..
    } = validated;

    let no_resources = BTreeMap::new();
    let no_pending = HashSet::new();
    let mut lookups: BTreeMap<Address, Value> = BTreeMap::new();
    let mut locals: BTreeMap<String, Value> = BTreeMap::new();

    for address in &order {
        match address {
            Address::Data { .. } => {
                let Some(decl) = stack.lookups.get(address) else {
                    continue;
                };
                let (filters, described) = {
                    let ctx = EvalContext {
                        variables: &variables,
                        lookups: &lookups,
                        locals: &locals,
                        resources: &no_resources,
                        pending: &no_pending,
                    };
                    lookup_filters(decl, &ctx)?
                };
                let value = run_lookup(decl, filters, &described, platform, retry, timeout).await?;
                lookups.insert(address.clone(), value);
            }
            Address::Local(name) => {
                let Some(decl) = stack.locals.get(name) else {
                    continue;
                };
                let value = EvalContext {
                    variables: &variables,
                    lookups: &lookups,
                    locals: &locals,
                    resources: &no_resources,
                    pending: &no_pending,
                }
                .eval(&decl.expr, &format!("local.{name}"))?;
                if decl.non_empty && value.as_list().is_some_and(<[Value]>::is_empty) {
                    return Err(CoreError::Lookup {
                        address: address.to_string(),
                        filter: decl.expr.describe(),
                        reason: "selection is empty".into(),
                    });
                }
                debug!(local = %name, value = %value, "local evaluated");
                locals.insert(name.clone(), value);
            }
            Address::Resource { .. } => {}
        }
    }

    let position = |a: &Address| stack.resources.get_index_of(a).unwrap_or(usize::MAX);
    let nodes: Vec<ResourceNode> = stack
        .resources
        .values()
        .map(|decl| {
            let mut producers: Vec<Address> = Vec::new();
            for edge in edges.iter().filter(|e| e.from == decl.address && e.to.is_resource()) {
                if !producers.contains(&edge.to) {
                    producers.push(edge.to.clone());
                }
            }
            producers.sort_by_key(position);
            ResourceNode {
                address: decl.address.clone(),
                kind: decl.kind,
                attributes: decl.attributes.clone(),
                lifecycle: decl.lifecycle.clone(),
                producers,
            }
        })
        .collect();
    let index: HashMap<Address, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.address.clone(), i))
        .collect();
    let apply_order: Vec<usize> = order.iter().filter_map(|a| index.get(a).copied()).collect();

    Ok(ResourceGraph {
        stack: stack.name.clone(),
        nodes,
        index,
        order: apply_order,
        edges,
        variables,
        lookups,
        locals,
        outputs: stack.outputs.clone(),
    })
}

/// Evaluate a lookup's filters to wire form plus a printable summary that
/// never exposes sensitive values.
fn lookup_filters(
    decl: &LookupDecl,
    ctx: &EvalContext<'_>,
) -> Result<(Vec<Filter>, String), CoreError> {
    let mut filters = Vec::with_capacity(decl.filters.len());
    let mut described = Vec::with_capacity(decl.filters.len());
    for (name, expr) in &decl.filters {
        let context = format!("{} filter {name}", decl.address);
        let value = ctx.eval(expr, &context)?;
        let items: Vec<&Value> = match &value {
            Value::List(items) => items.iter().collect(),
            other => vec![other],
        };
        let values = items
            .iter()
            .map(|v| {
                v.interpolate().ok_or_else(|| CoreError::Evaluation {
                    context: context.clone(),
                    message: format!("filter values must be scalars, got {}", v.type_name()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let filter = Filter::new(name.clone(), values);
        described.push(if value.is_sensitive() {
            format!("{name} in [(sensitive value)]")
        } else {
            filter.to_string()
        });
        filters.push(filter);
    }
    Ok((filters, described.join(", ")))
}

async fn run_lookup<P: Platform>(
    decl: &LookupDecl,
    filters: Vec<Filter>,
    described: &str,
    platform: &P,
    retry: &RetryPolicy,
    timeout: Duration,
) -> Result<Value, CoreError> {
    let query = LookupQuery {
        kind: decl.kind.as_str().to_owned(),
        filters,
    };
    let items = call_with_retry(retry, timeout, &decl.address, "lookup", || {
        platform.lookup(&query)
    })
    .await?;
    info!(address = %decl.address, matches = items.len(), "lookup resolved");

    let fail = |reason: String| CoreError::Lookup {
        address: decl.address.to_string(),
        filter: described.to_owned(),
        reason,
    };
    let mut values: Vec<Value> = items
        .into_iter()
        .map(|item| Value::from_wire(&serde_json::Value::Object(item)))
        .collect();

    match decl.cardinality {
        Cardinality::One => match values.len() {
            0 => Err(fail("no matching item".into())),
            1 => Ok(values.remove(0)),
            n => Err(fail(format!("{n} items matched, expected exactly one"))),
        },
        Cardinality::Many => {
            if values.is_empty() {
                return Err(fail("no matching items".into()));
            }
            let ids = values.iter().filter_map(|v| v.get("id")).cloned().collect();
            Ok(Value::Map(BTreeMap::from([
                ("ids".to_owned(), Value::List(ids)),
                ("items".to_owned(), Value::List(values)),
            ])))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{LocalDecl, LookupKind, OutputDecl, ResourceDecl};
    use stackform_api::SandboxPlatform;

    fn sg(name: &str) -> Address {
        Address::resource(ResourceKind::AwsSecurityGroup, name)
    }

    fn base() -> crate::model::StackBuilder {
        StackDefinition::builder("test")
            .variable(VariableDecl::new("vpc_id", VarType::String))
            .variable(VariableDecl::new("secret", VarType::String).sensitive())
            .variable(VariableDecl::new("size", VarType::Number).default(1_i64))
    }

    fn bindings() -> VariableBindings {
        VariableBindings::new()
            .with("vpc_id", "vpc-123")
            .with("secret", "s3cr3t")
    }

    #[test]
    fn missing_variables_are_all_named() {
        let stack = base().build().unwrap();
        let err = validate(&stack, &VariableBindings::new()).unwrap_err();
        assert!(
            matches!(err, CoreError::MissingVariables { ref names } if names == &["vpc_id", "secret"])
        );
    }

    #[test]
    fn numbers_coerce_from_strings() {
        let stack = base().build().unwrap();
        let ok = validate(&stack, &bindings().with("size", "3")).unwrap();
        assert_eq!(ok.variables()["size"], Value::from(3_i64));
        assert!(ok.variables()["secret"].is_sensitive());

        let err = validate(&stack, &bindings().with("size", "three")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidVariable { ref name, .. } if name == "size"));
    }

    #[test]
    fn undeclared_binding_is_rejected() {
        let stack = base().build().unwrap();
        let err = validate(&stack, &bindings().with("typo", "x")).unwrap_err();
        assert!(matches!(err, CoreError::UndeclaredVariable { ref name } if name == "typo"));
    }

    #[test]
    fn dangling_references_are_listed() {
        let stack = base()
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "alb")
                    .attr("vpc_id", Expr::var("vpc"))
                    .depends_on(&sg("missing")),
            )
            .build()
            .unwrap();
        let err = validate(&stack, &bindings()).unwrap_err();
        let CoreError::DanglingReferences { refs } = err else {
            panic!("expected dangling references, got {err}");
        };
        let targets: Vec<_> = refs.iter().map(|r| r.to.as_str()).collect();
        assert_eq!(targets, ["var.vpc", "aws_security_group.missing"]);
    }

    #[test]
    fn cycles_name_every_member() {
        let stack = base()
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "a")
                    .attr("peer", Expr::attr(&sg("c"), "id")),
            )
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "b")
                    .attr("peer", Expr::attr(&sg("a"), "id")),
            )
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "c")
                    .attr("peer", Expr::attr(&sg("b"), "id")),
            )
            .resource(ResourceDecl::new(ResourceKind::AwsSecurityGroup, "d"))
            .build()
            .unwrap();
        let err = validate(&stack, &bindings()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DependencyCycle { ref cycles } if cycles == &[vec![sg("a"), sg("b"), sg("c")]]
        ));
    }

    #[test]
    fn locals_cannot_read_resources() {
        let stack = base()
            .resource(ResourceDecl::new(ResourceKind::AwsSecurityGroup, "a"))
            .local(LocalDecl::new("peer", Expr::attr(&sg("a"), "id")))
            .build()
            .unwrap();
        assert!(matches!(
            validate(&stack, &bindings()),
            Err(CoreError::InvalidReference { .. })
        ));
    }

    #[test]
    fn sensitive_output_through_resource_is_rejected() {
        let td = Address::resource(ResourceKind::AwsEcsTaskDefinition, "webui");
        let stack = base()
            .resource(
                ResourceDecl::new(ResourceKind::AwsEcsTaskDefinition, "webui")
                    .attr("secret", Expr::var("secret")),
            )
            .output(OutputDecl::new("leak", Expr::attr(&td, "secret")))
            .build()
            .unwrap();
        let err = validate(&stack, &bindings()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::SensitiveOutput { ref output, ref variable } if output == "leak" && variable == "secret"
        ));

        let stack = base()
            .output(OutputDecl::new("secret", Expr::var("secret")).sensitive())
            .build()
            .unwrap();
        assert!(validate(&stack, &bindings()).is_ok());
    }

    #[test]
    fn world_open_ssh_is_flagged() {
        let rule = |from: i64, to: i64, cidr: &str| {
            Expr::map([
                ("from_port", Expr::lit(from)),
                ("to_port", Expr::lit(to)),
                ("cidr_blocks", Expr::list([Expr::lit(cidr)])),
            ])
        };
        let stack = base()
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "open")
                    .attr("ingress", Expr::list([rule(22, 22, WORLD)])),
            )
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "closed")
                    .attr("ingress", Expr::list([rule(22, 22, "10.0.0.0/8"), rule(80, 80, WORLD)])),
            )
            .build()
            .unwrap();
        let ok = validate(&stack, &bindings()).unwrap();
        assert_eq!(
            ok.advisories(),
            ["aws_security_group.open allows SSH (port 22) from 0.0.0.0/0"]
        );
    }

    #[tokio::test]
    async fn ambiguous_lookup_names_its_filter() {
        let stack = base()
            .lookup(
                LookupDecl::one(LookupKind::AwsSubnets, "any")
                    .filter("vpc-id", Expr::lit(stackform_api::SANDBOX_VPC_ID)),
            )
            .build()
            .unwrap();
        let validated = validate(&stack, &bindings()).unwrap();
        let sandbox = SandboxPlatform::seeded("us-east-1");
        let err = resolve(validated, &sandbox, &RetryPolicy::fast(0), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Lookup data.aws_subnets.any failed (vpc-id in [vpc-0sandbox]): 5 items matched, expected exactly one"
        );
    }

    #[tokio::test]
    async fn resolves_lookups_and_orders_resources() {
        let vpc = Address::data(LookupKind::AwsVpc, "selected");
        let stack = base()
            .lookup(LookupDecl::one(LookupKind::AwsVpc, "selected").filter("vpc-id", Expr::var("vpc_id")))
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "instances")
                    .attr("ingress_from", Expr::attr(&sg("alb"), "id")),
            )
            .resource(
                ResourceDecl::new(ResourceKind::AwsSecurityGroup, "alb")
                    .attr("vpc_id", Expr::attr(&vpc, "id")),
            )
            .build()
            .unwrap();
        let validated = validate(
            &stack,
            &bindings().with("vpc_id", stackform_api::SANDBOX_VPC_ID),
        )
        .unwrap();
        let sandbox = SandboxPlatform::seeded("us-east-1");
        let graph = resolve(validated, &sandbox, &RetryPolicy::fast(0), Duration::from_secs(1))
            .await
            .unwrap();

        let order: Vec<String> = graph.apply_order().map(|n| n.address.to_string()).collect();
        assert_eq!(
            order,
            ["aws_security_group.alb", "aws_security_group.instances"]
        );
        assert_eq!(graph.node(&sg("instances")).unwrap().producers, vec![sg("alb")]);
        assert_eq!(
            graph.lookups()[&vpc].get("cidr_block"),
            Some(&Value::from("10.0.0.0/16"))
        );
    }
}
