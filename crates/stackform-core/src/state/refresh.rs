// ── Refresh ──
//
// Reads every recorded resource back from the platform and reconciles the
// answer with state. A resource that vanished is forgotten (and so planned
// for re-creation). An input that changed out-of-band is adopted when the
// configuration already wants the observed value; otherwise it is drift
// and must be resolved by an operator.

use std::collections::BTreeMap;
use std::time::Duration;

use stackform_api::{Platform, Record};
use tracing::{debug, info, warn};

use super::{ResourceState, StateStore};
use crate::apply::retry::{RetryPolicy, call_with_retry};
use crate::error::{CoreError, DriftedResource};
use crate::model::{Address, Lifecycle, Value};

/// What the platform reports for one recorded resource.
#[derive(Debug, Clone)]
pub enum Observation {
    Present(Record),
    Vanished,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub checked: usize,
    pub vanished: Vec<Address>,
    /// Resources whose recorded attributes changed to match the platform.
    pub updated: Vec<Address>,
    /// Inputs changed out-of-band and left unrecorded; the next plan either
    /// adopts them (when the configuration agrees) or stops on them.
    pub drifted: Vec<DriftedResource>,
}

/// Read every resource recorded in `state`.
pub async fn observe<P: Platform>(
    platform: &P,
    state: &StateStore,
    retry: &RetryPolicy,
    timeout: Duration,
) -> Result<BTreeMap<Address, Observation>, CoreError> {
    let mut out = BTreeMap::new();
    for (address, recorded) in state.resources() {
        let kind = recorded.kind.as_str();
        let record = call_with_retry(retry, timeout, address, "read", || {
            platform.read(kind, &recorded.id)
        })
        .await?;
        debug!(address = %address, present = record.is_some(), "observed");
        out.insert(
            address.clone(),
            record.map_or(Observation::Vanished, Observation::Present),
        );
    }
    Ok(out)
}

/// Result of reconciling one resource's observation with state and config.
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// The state to carry forward; `None` if the resource vanished.
    pub state: Option<ResourceState>,
    /// Inputs that drifted to a value the configuration does not want.
    pub ambiguous: Vec<String>,
    /// Whether `state` differs from what was recorded.
    pub changed: bool,
}

/// Reconcile `prior` with what the platform reports, given the desired
/// inputs (unknown values never count as agreement).
pub fn reconcile(
    address: &Address,
    prior: &ResourceState,
    observation: &Observation,
    desired: &BTreeMap<String, Value>,
    lifecycle: &Lifecycle,
) -> Reconciled {
    let record = match observation {
        Observation::Vanished => {
            warn!(address = %address, id = %prior.id, "resource deleted outside stackform, will recreate");
            return Reconciled {
                state: None,
                ambiguous: Vec::new(),
                changed: true,
            };
        }
        Observation::Present(record) => record,
    };

    let mut inputs = prior.inputs.clone();
    let mut ambiguous = Vec::new();
    for name in prior.drifted_inputs(record) {
        let observed = record.attributes.get(&name);
        let wanted = desired.get(&name);
        if lifecycle.ignore_changes.contains(&name) {
            debug!(address = %address, attribute = %name, "ignored attribute changed, following platform");
            adopt(&mut inputs, &name, observed);
        } else if let Some(wanted) = wanted.filter(|w| w.is_known() && w.matches_wire(observed)) {
            info!(address = %address, attribute = %name, "adopting out-of-band change that matches configuration");
            inputs.insert(name, wanted.clone());
        } else {
            ambiguous.push(name);
        }
    }

    let next = ResourceState::from_record(prior.kind, record, inputs, prior.dependencies.clone());
    let changed = next.inputs != prior.inputs || next.attributes != prior.attributes;
    Reconciled {
        state: Some(if changed {
            next
        } else {
            prior.clone()
        }),
        ambiguous,
        changed,
    }
}

fn adopt(inputs: &mut BTreeMap<String, Value>, name: &str, observed: Option<&serde_json::Value>) {
    match observed {
        Some(v) => {
            inputs.insert(name.to_owned(), Value::from_wire(v));
        }
        None => {
            inputs.remove(name);
        }
    }
}

/// Bring state up to date with what the platform reports. Vanished
/// resources are forgotten and computed attributes refreshed; changed inputs
/// are only adopted when listed in `ignored`, and otherwise reported as
/// drift without touching the recorded value. Backs the explicit `refresh`
/// command.
pub async fn refresh_state<P: Platform>(
    platform: &P,
    state: &mut StateStore,
    ignored: &BTreeMap<Address, Vec<String>>,
    retry: &RetryPolicy,
    timeout: Duration,
) -> Result<RefreshReport, CoreError> {
    let observations = observe(platform, state, retry, timeout).await?;
    let mut report = RefreshReport {
        checked: observations.len(),
        ..Default::default()
    };

    for (address, observation) in observations {
        let Some(prior) = state.get(&address).cloned() else {
            continue;
        };
        match observation {
            Observation::Vanished => {
                warn!(address = %address, "resource no longer exists, removing from state");
                state.commit(&address, None)?;
                report.vanished.push(address);
            }
            Observation::Present(record) => {
                let ignore = ignored.get(&address).map_or(&[][..], Vec::as_slice);
                let mut inputs = prior.inputs.clone();
                let mut drifted = Vec::new();
                for name in prior.drifted_inputs(&record) {
                    if ignore.contains(&name) {
                        adopt(&mut inputs, &name, record.attributes.get(&name));
                    } else {
                        drifted.push(name);
                    }
                }
                let next =
                    ResourceState::from_record(prior.kind, &record, inputs, prior.dependencies.clone());
                if next.inputs != prior.inputs || next.attributes != prior.attributes {
                    info!(address = %address, "state updated from platform");
                    state.commit(&address, Some(next))?;
                    report.updated.push(address.clone());
                }
                if !drifted.is_empty() {
                    warn!(address = %address, attributes = ?drifted, "inputs changed outside stackform");
                    report.drifted.push(DriftedResource {
                        address,
                        attributes: drifted,
                    });
                }
            }
        }
    }
    Ok(report)
}
