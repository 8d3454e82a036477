//! Declarative resource-graph engine behind the `stackform` CLI.
//!
//! This crate owns the stack model, dependency resolution, planning, and
//! convergence logic. It talks to a control plane only through the
//! [`Platform`] trait from `stackform-api`:
//!
//! - **[`Engine`]**: Facade sequencing the pipeline:
//!   [`build()`](Engine::build) validates declarations and resolves lookups,
//!   [`plan()`](Engine::plan) refreshes state and diffs,
//!   [`apply()`](Engine::apply) walks the plan and projects outputs.
//!
//! - **Stack model** ([`model`]): [`StackDefinition`] built from typed
//!   declarations whose attributes are [`Expr`] trees. References are
//!   explicit nodes, so edges are collected statically.
//!
//! - **[`ResourceGraph`]**: Validated, lookup-resolved DAG with a
//!   deterministic apply order. Cycles are reported as strongly connected
//!   components before any platform call.
//!
//! - **[`Plan`]**: Per-resource actions (no-op, create, update, replace,
//!   delete) with redacted attribute diffs.
//!
//! - **Applier** ([`apply`]): Bounded-concurrency DAG walk with retries,
//!   create-before-destroy readiness, failure propagation, and
//!   cancellation. State is persisted after every finished resource.
//!
//! - **[`StateStore`]**: JSON state file with serial and lineage, written
//!   atomically.
//!
//! - **Stacks** ([`stack`]): The bundled GPU LLM-serving stack.

pub mod apply;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod output;
pub mod plan;
pub mod stack;
pub mod state;

// ── Primary re-exports ──────────────────────────────────────────────
pub use apply::retry::{RetryPolicy, WaitConfig};
pub use apply::{
    ApplyCounts, ApplyEvent, ApplyOptions, ApplySummary, EventSender, Phase, ResourceResult,
    ResourceStatus, SkipReason,
};
pub use config::{DEFAULT_REGION, EngineConfig, PlatformTarget};
pub use engine::{ApplyReport, Engine, PlanRefresh};
pub use error::{CoreError, DanglingReference, DriftedResource};
pub use graph::{Edge, EdgeKind, ResourceGraph, ResourceNode, ValidatedStack};
pub use output::OutputValue;
pub use plan::{Action, AttributeChange, Plan, PlanSummary, ResourcePlan};
pub use state::{RefreshReport, ResourceState, StateStore, StoredOutput};

pub use model::{
    Address, Expr, Lifecycle, LookupKind, ResourceKind, StackDefinition, Value, VarType,
    VariableBindings,
};

// Platform types consumers need without a direct stackform-api dependency.
pub use stackform_api::{AnyPlatform, Platform, SandboxPlatform};
