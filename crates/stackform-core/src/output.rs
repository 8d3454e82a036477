// ── Output projection ──
//
// Computes declared outputs from final resource state. An output that
// reads from a resource which failed, was skipped, or has no state is
// reported unavailable with the reason; a stale value is never shown.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::apply::{ApplySummary, ResourceStatus};
use crate::graph::ResourceGraph;
use crate::model::{Address, Reference, Value};
use crate::state::{ResourceState, StoredOutput};

#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Known { value: Value, sensitive: bool },
    Unavailable { reason: String },
}

impl OutputValue {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known { .. })
    }

    /// Plain rendering: bare strings, redacted secrets.
    pub fn render(&self) -> String {
        match self {
            Self::Known {
                sensitive: true, ..
            } => "(sensitive value)".into(),
            Self::Known {
                value: Value::String(s),
                ..
            } => s.clone(),
            Self::Known { value, .. } => value.to_string(),
            Self::Unavailable { reason } => format!("(unavailable: {reason})"),
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for OutputValue {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = s.serialize_map(Some(2))?;
        match self {
            Self::Known {
                sensitive: true, ..
            } => {
                map.serialize_entry("status", "known")?;
                map.serialize_entry("sensitive", &true)?;
            }
            Self::Known { value, .. } => {
                map.serialize_entry("status", "known")?;
                map.serialize_entry("value", &value.to_wire())?;
            }
            Self::Unavailable { reason } => {
                map.serialize_entry("status", "unavailable")?;
                map.serialize_entry("reason", reason)?;
            }
        }
        map.end()
    }
}

impl From<OutputValue> for StoredOutput {
    fn from(v: OutputValue) -> Self {
        match v {
            OutputValue::Known { value, sensitive } => StoredOutput::Known { value, sensitive },
            OutputValue::Unavailable { reason } => StoredOutput::Unavailable { reason },
        }
    }
}

impl From<StoredOutput> for OutputValue {
    fn from(v: StoredOutput) -> Self {
        match v {
            StoredOutput::Known { value, sensitive } => OutputValue::Known { value, sensitive },
            StoredOutput::Unavailable { reason } => OutputValue::Unavailable { reason },
        }
    }
}

/// Project every declared output of `graph`.
pub fn project(
    graph: &ResourceGraph,
    state: &BTreeMap<Address, ResourceState>,
    summary: Option<&ApplySummary>,
) -> IndexMap<String, OutputValue> {
    let no_pending = HashSet::new();
    let ctx = graph.context(state, &no_pending);

    graph
        .outputs()
        .values()
        .map(|decl| {
            let blocked = decl.expr.references().into_iter().find_map(|r| match r {
                Reference::Node { target, .. } if target.is_resource() => {
                    unavailable_reason(&target, state, summary)
                }
                _ => None,
            });
            let value = match blocked {
                Some(reason) => OutputValue::Unavailable { reason },
                None => match ctx.eval(&decl.expr, &format!("output.{}", decl.name)) {
                    Ok(v) if v.is_known() => OutputValue::Known {
                        sensitive: decl.sensitive || v.is_sensitive(),
                        value: v,
                    },
                    Ok(_) => OutputValue::Unavailable {
                        reason: "value not known yet".into(),
                    },
                    Err(e) => OutputValue::Unavailable {
                        reason: e.to_string(),
                    },
                },
            };
            (decl.name.clone(), value)
        })
        .collect()
}

fn unavailable_reason(
    target: &Address,
    state: &BTreeMap<Address, ResourceState>,
    summary: Option<&ApplySummary>,
) -> Option<String> {
    match summary.and_then(|s| s.status_of(target)) {
        Some(ResourceStatus::Failed(e)) => return Some(format!("{target} failed: {e}")),
        Some(ResourceStatus::Skipped(reason)) => {
            return Some(format!("{target} was skipped: {reason}"));
        }
        _ => {}
    }
    if state.contains_key(target) {
        None
    } else {
        Some(format!("{target} has no recorded state"))
    }
}

/// Stored outputs as last projected.
pub fn stored(outputs: &BTreeMap<String, StoredOutput>) -> IndexMap<String, OutputValue> {
    outputs
        .iter()
        .map(|(k, v)| (k.clone(), OutputValue::from(v.clone())))
        .collect()
}
