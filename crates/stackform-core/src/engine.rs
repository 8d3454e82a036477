// ── Engine facade ──
//
// The single entry point for consumers. Owns the platform handle and the
// runtime configuration, and sequences the pipeline: validate, resolve
// lookups, refresh state, plan, apply, project outputs. Each stage is also
// callable on its own so the CLI can stop after any of them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use stackform_api::{AnyPlatform, Platform};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apply::{self, ApplySummary, EventSender};
use crate::config::EngineConfig;
use crate::error::{CoreError, DriftedResource};
use crate::graph::{self, ResourceGraph, ValidatedStack};
use crate::model::{Address, StackDefinition, VariableBindings};
use crate::output::{self, OutputValue};
use crate::plan::{self, Plan};
use crate::state::refresh::{self, Observation};
use crate::state::{RefreshReport, ResourceState, StateStore, StoredOutput};

/// Result of an apply or destroy walk.
#[derive(Debug)]
pub struct ApplyReport {
    pub summary: ApplySummary,
    pub outputs: IndexMap<String, OutputValue>,
}

/// What plan-time refresh did to state before diffing.
#[derive(Debug, Clone, Default)]
pub struct PlanRefresh {
    pub checked: usize,
    pub vanished: Vec<Address>,
    pub adopted: Vec<Address>,
}

pub struct Engine<P: Platform> {
    platform: Arc<P>,
    config: EngineConfig,
}

impl Engine<AnyPlatform> {
    /// Open the control plane named by `config`.
    pub fn connect(config: EngineConfig) -> Result<Self, CoreError> {
        let platform = config.connect()?;
        debug!(
            region = %config.region,
            sandbox = platform.is_sandbox(),
            "engine connected"
        );
        Ok(Self::new(Arc::new(platform), config))
    }
}

impl<P: Platform> Engine<P> {
    pub fn new(platform: Arc<P>, config: EngineConfig) -> Self {
        Self { platform, config }
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Build ────────────────────────────────────────────────────────

    /// Static checks only. Never calls the platform.
    pub fn validate(
        &self,
        stack: &StackDefinition,
        bindings: &VariableBindings,
    ) -> Result<ValidatedStack, CoreError> {
        graph::validate(stack, bindings)
    }

    /// Validate, then resolve lookups and locals into a resource graph.
    pub async fn build(
        &self,
        stack: &StackDefinition,
        bindings: &VariableBindings,
    ) -> Result<ResourceGraph, CoreError> {
        let validated = self.validate(stack, bindings)?;
        graph::resolve(
            validated,
            &*self.platform,
            &self.config.apply.retry,
            self.config.apply.timeout,
        )
        .await
    }

    // ── Plan ─────────────────────────────────────────────────────────

    /// Plan `graph` against `state`, refreshing state first when enabled.
    ///
    /// Refresh forgets resources deleted out-of-band and adopts out-of-band
    /// changes the configuration already wants. Any other drift aborts the
    /// plan before state is touched.
    pub async fn plan(
        &self,
        graph: &ResourceGraph,
        state: &mut StateStore,
        targets: &[Address],
    ) -> Result<(Plan, PlanRefresh), CoreError> {
        let refreshed = if self.config.refresh && !state.is_empty() {
            self.reconcile_for_plan(graph, state).await?
        } else {
            PlanRefresh::default()
        };
        let plan = plan::plan_apply(graph, state.resources(), targets)?;
        info!(stack = %plan.stack, summary = %plan.summary(), "plan ready");
        Ok((plan, refreshed))
    }

    async fn reconcile_for_plan(
        &self,
        graph: &ResourceGraph,
        state: &mut StateStore,
    ) -> Result<PlanRefresh, CoreError> {
        let observations = refresh::observe(
            &*self.platform,
            state,
            &self.config.apply.retry,
            self.config.apply.timeout,
        )
        .await?;

        let no_pending = HashSet::new();
        let mut report = PlanRefresh {
            checked: observations.len(),
            ..Default::default()
        };
        let mut changes: Vec<(Address, Option<ResourceState>)> = Vec::new();
        let mut drifted = Vec::new();

        for (address, observation) in &observations {
            let Some(prior) = state.get(address) else {
                continue;
            };
            let Some(node) = graph.node(address) else {
                // Orphans are deleted by the plan; only a vanished one
                // changes what that plan does.
                if matches!(observation, Observation::Vanished) {
                    warn!(address = %address, "orphaned resource already gone");
                    changes.push((address.clone(), None));
                    report.vanished.push(address.clone());
                }
                continue;
            };

            let desired = graph
                .context(state.resources(), &no_pending)
                .eval_attributes(&node.attributes, address)?;
            let reconciled =
                refresh::reconcile(address, prior, observation, &desired, &node.lifecycle);
            if !reconciled.ambiguous.is_empty() {
                drifted.push(DriftedResource {
                    address: address.clone(),
                    attributes: reconciled.ambiguous,
                });
                continue;
            }
            if reconciled.changed {
                if reconciled.state.is_none() {
                    report.vanished.push(address.clone());
                } else {
                    report.adopted.push(address.clone());
                }
                changes.push((address.clone(), reconciled.state));
            }
        }

        if !drifted.is_empty() {
            return Err(CoreError::Drift { resources: drifted });
        }
        for (address, next) in changes {
            state.commit(&address, next)?;
        }
        Ok(report)
    }

    /// Plan deleting everything recorded in `state`, or the targets and
    /// their recorded consumers.
    pub fn plan_destroy(&self, state: &StateStore, targets: &[Address]) -> Result<Plan, CoreError> {
        plan::plan_destroy(&state.file().stack, state.resources(), targets)
    }

    // ── Apply ────────────────────────────────────────────────────────

    /// Execute `plan`, then project and store outputs.
    pub async fn apply(
        &self,
        graph: Arc<ResourceGraph>,
        plan: &Plan,
        state: &mut StateStore,
        cancel: CancellationToken,
        events: Option<EventSender>,
    ) -> Result<ApplyReport, CoreError> {
        let summary = apply::execute(
            Arc::clone(&self.platform),
            Some(Arc::clone(&graph)),
            plan,
            state,
            self.config.apply.clone(),
            cancel,
            events,
        )
        .await?;

        let outputs = output::project(&graph, state.resources(), Some(&summary));
        store_outputs(state, &outputs, &summary)?;
        info!(counts = %summary.counts(), "apply finished");
        Ok(ApplyReport { summary, outputs })
    }

    /// Execute a destroy plan. Outputs are cleared once nothing is left and
    /// otherwise marked unavailable.
    pub async fn destroy(
        &self,
        plan: &Plan,
        state: &mut StateStore,
        cancel: CancellationToken,
        events: Option<EventSender>,
    ) -> Result<ApplyReport, CoreError> {
        let summary = apply::execute(
            Arc::clone(&self.platform),
            None,
            plan,
            state,
            self.config.apply.clone(),
            cancel,
            events,
        )
        .await?;

        let outputs: IndexMap<String, OutputValue> = if state.is_empty() {
            IndexMap::new()
        } else {
            state
                .outputs()
                .keys()
                .map(|name| {
                    (
                        name.clone(),
                        OutputValue::Unavailable {
                            reason: "stack partially destroyed".into(),
                        },
                    )
                })
                .collect()
        };
        store_outputs(state, &outputs, &summary)?;
        info!(counts = %summary.counts(), "destroy finished");
        Ok(ApplyReport { summary, outputs })
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Bring state up to date with the platform. Only attributes the stack
    /// lists under `ignore_changes` are adopted; other drift is reported.
    pub async fn refresh(
        &self,
        stack: &StackDefinition,
        state: &mut StateStore,
    ) -> Result<RefreshReport, CoreError> {
        let ignored: BTreeMap<Address, Vec<String>> = stack
            .resources
            .iter()
            .filter(|(_, decl)| !decl.lifecycle.ignore_changes.is_empty())
            .map(|(address, decl)| (address.clone(), decl.lifecycle.ignore_changes.clone()))
            .collect();
        refresh::refresh_state(
            &*self.platform,
            state,
            &ignored,
            &self.config.apply.retry,
            self.config.apply.timeout,
        )
        .await
    }
}

fn stored_outputs(outputs: &IndexMap<String, OutputValue>) -> BTreeMap<String, StoredOutput> {
    outputs
        .iter()
        .map(|(k, v)| (k.clone(), StoredOutput::from(v.clone())))
        .collect()
}

/// A partial walk still hands back its summary; an unwritable state file
/// then only costs the outputs on disk.
fn store_outputs(
    state: &mut StateStore,
    outputs: &IndexMap<String, OutputValue>,
    summary: &ApplySummary,
) -> Result<(), CoreError> {
    match state.set_outputs(stored_outputs(outputs)) {
        Err(e) if !summary.is_success() => {
            warn!(error = %e, "could not persist outputs after a partial apply");
            Ok(())
        }
        other => other,
    }
}
