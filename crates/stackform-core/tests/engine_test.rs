#![allow(clippy::unwrap_used)]
// End-to-end engine tests against the in-process sandbox control plane.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stackform_api::{
    Attributes, CreateRequest, Error as PlatformError, Fault, FaultKind, LookupQuery, Operation,
    Platform, Record, SANDBOX_VPC_ID, SandboxPlatform,
};
use stackform_core::model::{Expr, ResourceDecl, VariableDecl};
use stackform_core::stack::llm_serving;
use stackform_core::{
    Action, Address, ApplyEvent, ApplyOptions, CoreError, Engine, EngineConfig, OutputValue, Phase,
    ResourceKind, ResourceStatus, RetryPolicy, SkipReason, StackDefinition, StateStore, Value,
    VarType, VariableBindings, WaitConfig,
};

const SECRET: &str = "s3cr3t-webui-key";

// ── Helpers ─────────────────────────────────────────────────────────

fn engine() -> Engine<SandboxPlatform> {
    engine_with(SandboxPlatform::seeded("us-east-1"))
}

fn engine_with(sandbox: SandboxPlatform) -> Engine<SandboxPlatform> {
    engine_on(sandbox, 4)
}

fn engine_on<P: Platform>(platform: P, concurrency: usize) -> Engine<P> {
    let config = EngineConfig {
        apply: ApplyOptions {
            concurrency,
            timeout: Duration::from_millis(200),
            retry: RetryPolicy::fast(3),
            readiness: WaitConfig::fast(),
        },
        ..EngineConfig::default()
    };
    Engine::new(Arc::new(platform), config)
}

fn bindings() -> VariableBindings {
    VariableBindings::new()
        .with("vpc_id", SANDBOX_VPC_ID)
        .with("webui_secret_key", Value::sensitive(SECRET))
}

fn addr(kind: ResourceKind, name: &str) -> Address {
    Address::resource(kind, name)
}

fn sandbox(engine: &Engine<SandboxPlatform>) -> &SandboxPlatform {
    engine.platform()
}

/// Build, plan, and apply the LLM stack from scratch.
async fn converge<P: Platform>(engine: &Engine<P>, state: &mut StateStore) -> stackform_core::ApplyReport {
    let stack = llm_serving::definition().unwrap();
    let graph = Arc::new(engine.build(&stack, &bindings()).await.unwrap());
    let (plan, _) = engine.plan(&graph, state, &[]).await.unwrap();
    engine
        .apply(graph, &plan, state, CancellationToken::new(), None)
        .await
        .unwrap()
}

/// Delegates to a sandbox, holding every write open for `delay` and
/// recording how many writes were in flight at once.
struct Instrumented {
    inner: SandboxPlatform,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    panic_on: Option<(&'static str, &'static str)>,
}

impl Instrumented {
    fn new(delay: Duration) -> Self {
        Self {
            inner: SandboxPlatform::seeded("us-east-1"),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            panic_on: None,
        }
    }

    /// Panic instead of creating `kind.name`.
    fn panicking_on(kind: &'static str, name: &'static str) -> Self {
        Self {
            panic_on: Some((kind, name)),
            ..Self::new(Duration::ZERO)
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn hold<T>(&self, write: impl Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let out = write.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

impl Platform for Instrumented {
    async fn lookup(&self, query: &LookupQuery) -> Result<Vec<Attributes>, PlatformError> {
        self.inner.lookup(query).await
    }

    async fn read(&self, kind: &str, id: &str) -> Result<Option<Record>, PlatformError> {
        self.inner.read(kind, id).await
    }

    async fn create(&self, request: &CreateRequest) -> Result<Record, PlatformError> {
        if matches!(self.panic_on, Some((kind, name)) if kind == request.kind && name == request.name) {
            panic!("client crashed creating {}.{}", request.kind, request.name);
        }
        self.hold(self.inner.create(request)).await
    }

    async fn update(&self, kind: &str, id: &str, attributes: &Attributes) -> Result<Record, PlatformError> {
        self.hold(self.inner.update(kind, id, attributes)).await
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<(), PlatformError> {
        self.hold(self.inner.delete(kind, id)).await
    }

    async fn is_ready(&self, kind: &str, id: &str) -> Result<bool, PlatformError> {
        self.inner.is_ready(kind, id).await
    }
}

fn cluster_stack(clusters: &[&str], create_before_destroy: bool) -> StackDefinition {
    let mut builder = StackDefinition::builder("clusters").variable(
        VariableDecl::new("suffix", VarType::String).default("v1"),
    );
    for name in clusters {
        let mut decl = ResourceDecl::new(ResourceKind::AwsEcsCluster, *name).attr(
            "name",
            Expr::concat([Expr::lit(format!("{name}-")), Expr::var("suffix")]),
        );
        if create_before_destroy {
            decl = decl.create_before_destroy();
        }
        builder = builder.resource(decl);
    }
    builder.build().unwrap()
}

// ── Build ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_apply_order_is_deterministic() {
    let engine = engine();
    let stack = llm_serving::definition().unwrap();

    let order = |g: &stackform_core::ResourceGraph| {
        g.apply_order()
            .map(|n| n.address.to_string())
            .collect::<Vec<_>>()
    };
    let first = order(&engine.build(&stack, &bindings()).await.unwrap());
    let second = order(&engine.build(&stack, &bindings()).await.unwrap());

    assert_eq!(first.len(), 25);
    assert_eq!(first, second);
    assert_eq!(first[0], "aws_iam_role.ecs_instance");
}

#[tokio::test]
async fn test_cycle_fails_before_any_platform_call() {
    let a = addr(ResourceKind::AwsSecurityGroup, "a");
    let b = addr(ResourceKind::AwsSecurityGroup, "b");
    let stack = StackDefinition::builder("cyclic")
        .resource(
            ResourceDecl::new(ResourceKind::AwsSecurityGroup, "a")
                .attr("name", Expr::lit("a"))
                .attr("peer", Expr::attr(&b, "id")),
        )
        .resource(
            ResourceDecl::new(ResourceKind::AwsSecurityGroup, "b")
                .attr("name", Expr::lit("b"))
                .attr("peer", Expr::attr(&a, "id")),
        )
        .build()
        .unwrap();

    let engine = engine();
    let err = engine
        .build(&stack, &VariableBindings::new())
        .await
        .unwrap_err();

    match err {
        CoreError::DependencyCycle { cycles } => assert_eq!(cycles, vec![vec![a, b]]),
        other => panic!("expected cycle, got {other}"),
    }
    assert!(sandbox(&engine).calls().is_empty());
}

#[tokio::test]
async fn test_missing_vpc_id_is_named_without_platform_calls() {
    let engine = engine();
    let stack = llm_serving::definition().unwrap();
    let mut b = bindings();
    b.remove("vpc_id");

    let err = engine.build(&stack, &b).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("vpc_id"));
    assert!(sandbox(&engine).calls().is_empty());
}

#[tokio::test]
async fn test_gpu_subnets_follow_offered_zones() {
    let engine = engine();
    let stack = llm_serving::definition().unwrap();
    let graph = engine.build(&stack, &bindings()).await.unwrap();

    assert_eq!(
        graph.locals()["gpu_zones"],
        Value::List(vec!["us-east-1a".into(), "us-east-1c".into()])
    );
    assert_eq!(
        graph.locals()["gpu_private_subnet_ids"],
        Value::List(vec!["subnet-private-a".into(), "subnet-private-c".into()])
    );
}

#[tokio::test]
async fn test_no_gpu_zone_fails_the_build() {
    let sandbox = SandboxPlatform::seeded("us-east-1");
    sandbox.seed_lookup("aws_ec2_instance_type_offerings", Vec::new());
    let engine = engine_with(sandbox);
    let stack = llm_serving::definition().unwrap();

    let err = engine.build(&stack, &bindings()).await.unwrap_err();
    assert!(matches!(err, CoreError::Lookup { .. }), "{err}");
}

// ── Apply ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_apply_projects_outputs() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let report = converge(&engine, &mut state).await;

    assert!(report.summary.is_success(), "{:?}", report.summary);
    assert_eq!(report.summary.counts().applied, 25);
    assert_eq!(state.resources().len(), 25);

    let lb = state.get(&addr(ResourceKind::AwsLb, "shared")).unwrap();
    let dns = lb.attribute("dns_name").unwrap().as_str().unwrap().to_owned();
    assert!(dns.ends_with(".us-east-1.elb.amazonaws.com"));

    assert_eq!(
        report.outputs["model_pull_command"].render(),
        format!(r#"curl -X POST http://{dns}/api/pull -d '{{"name": "deepseek-r1:7b"}}'"#)
    );
    assert_eq!(report.outputs["webui_url"].render(), format!("http://{dns}"));
    assert_eq!(report.outputs["shared_lb_dns"].render(), dns);
    assert_eq!(state.outputs().len(), 3);

    let asg = state.get(&addr(ResourceKind::AwsAutoscalingGroup, "gpu")).unwrap();
    assert_eq!(
        asg.attribute("vpc_zone_identifier").unwrap(),
        &Value::List(vec!["subnet-private-a".into(), "subnet-private-c".into()])
    );
}

#[tokio::test]
async fn test_reapply_issues_zero_writes() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    converge(&engine, &mut state).await;
    sandbox(&engine).clear_calls();

    let stack = llm_serving::definition().unwrap();
    let graph = Arc::new(engine.build(&stack, &bindings()).await.unwrap());
    let (plan, refreshed) = engine.plan(&graph, &mut state, &[]).await.unwrap();
    assert_eq!(refreshed.checked, 25);
    assert!(!plan.has_changes(), "{:?}", plan.summary());

    let report = engine
        .apply(graph, &plan, &mut state, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(report.summary.counts().unchanged, 25);
    assert!(sandbox(&engine).writes().is_empty());
}

#[tokio::test]
async fn test_secret_reaches_only_its_consumer() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let stack = llm_serving::definition().unwrap();
    let graph = Arc::new(engine.build(&stack, &bindings()).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();

    let rendered_plan = serde_json::to_string(&plan).unwrap();
    assert!(!rendered_plan.contains(SECRET));
    for change in plan.changes().flat_map(|p| &p.changes) {
        assert!(!change.to_string().contains(SECRET));
    }

    let report = engine
        .apply(graph, &plan, &mut state, CancellationToken::new(), None)
        .await
        .unwrap();
    for value in report.outputs.values() {
        assert!(!value.render().contains(SECRET));
    }

    // Only the WebUI task definition carries the secret to the platform.
    let carriers: Vec<String> = state
        .resources()
        .iter()
        .filter_map(|(address, s)| {
            let record = sandbox(&engine).get(s.kind.as_str(), &s.id)?;
            serde_json::to_string(&record.attributes)
                .unwrap()
                .contains(SECRET)
                .then_some(address.to_string())
        })
        .collect();
    assert_eq!(carriers, vec!["aws_ecs_task_definition.webui".to_owned()]);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let engine = engine();
    sandbox(&engine).inject(Fault::new(
        Operation::Create,
        "aws_lb",
        2,
        FaultKind::RateLimited,
    ));
    sandbox(&engine).inject(Fault::new(
        Operation::Create,
        "aws_ecs_cluster",
        1,
        FaultKind::Hang,
    ));
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let report = converge(&engine, &mut state).await;

    assert!(report.summary.is_success(), "{:?}", report.summary);
    let lb_creates = sandbox(&engine)
        .writes()
        .into_iter()
        .filter(|c| c.op == Operation::Create && c.kind == "aws_lb")
        .count();
    assert_eq!(lb_creates, 3);
    assert_eq!(sandbox(&engine).resources_of("aws_lb").len(), 1);
}

#[tokio::test]
async fn test_failure_skips_dependents_only() {
    let engine = engine();
    sandbox(&engine).inject(Fault::new(
        Operation::Create,
        "aws_lb",
        1,
        FaultKind::Rejected("subnets span too few zones".into()),
    ));
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let report = converge(&engine, &mut state).await;
    let summary = &report.summary;
    let lb = addr(ResourceKind::AwsLb, "shared");

    assert!(!summary.is_success());
    assert!(matches!(summary.status_of(&lb), Some(ResourceStatus::Failed(_))));
    for skipped in [
        addr(ResourceKind::AwsLbListener, "http"),
        addr(ResourceKind::AwsLbListenerRule, "ollama_api"),
        addr(ResourceKind::AwsEcsTaskDefinition, "webui"),
        addr(ResourceKind::AwsEcsService, "ollama"),
        addr(ResourceKind::AwsEcsService, "webui"),
    ] {
        assert!(
            matches!(
                summary.status_of(&skipped),
                Some(ResourceStatus::Skipped(SkipReason::DependencyFailed { upstream })) if upstream == &lb
            ),
            "{skipped} should be skipped"
        );
        assert!(state.get(&skipped).is_none());
    }
    for applied in [
        addr(ResourceKind::AwsEcsCluster, "llm"),
        addr(ResourceKind::AwsEcsTaskDefinition, "ollama"),
        addr(ResourceKind::AwsAutoscalingGroup, "gpu"),
    ] {
        assert!(matches!(summary.status_of(&applied), Some(ResourceStatus::Applied)));
    }

    match &report.outputs["model_pull_command"] {
        OutputValue::Unavailable { reason } => assert!(reason.contains("aws_lb.shared failed")),
        other => panic!("expected unavailable output, got {other}"),
    }
}

#[tokio::test]
async fn test_cancelled_apply_starts_nothing() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let stack = llm_serving::definition().unwrap();
    let graph = Arc::new(engine.build(&stack, &bindings()).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine
        .apply(graph, &plan, &mut state, cancel, None)
        .await
        .unwrap();

    assert!(report.summary.cancelled);
    assert_eq!(report.summary.counts().skipped, 25);
    assert!(sandbox(&engine).writes().is_empty());
    assert!(state.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_walk_drains_in_flight_work() {
    let engine = engine_on(Instrumented::new(Duration::from_millis(5)), 2);
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let stack = llm_serving::definition().unwrap();
    let graph = Arc::new(engine.build(&stack, &bindings()).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<ApplyEvent>();
    let stop = cancel.clone();
    let watcher = async move {
        while let Some(event) = rx.recv().await {
            if event.phase == Phase::Applying {
                stop.cancel();
                break;
            }
        }
    };
    let (report, ()) = tokio::join!(
        engine.apply(graph, &plan, &mut state, cancel, Some(tx)),
        watcher
    );
    let summary = report.unwrap().summary;
    let counts = summary.counts();

    assert!(summary.cancelled);
    assert_eq!(counts.failed, 0);
    assert!((1..=2).contains(&counts.applied), "{counts}");
    assert_eq!(counts.applied + counts.skipped, 25);
    for result in &summary.results {
        match &result.status {
            ResourceStatus::Applied => assert!(state.get(&result.address).is_some()),
            ResourceStatus::Skipped(SkipReason::Cancelled) => {
                assert!(state.get(&result.address).is_none());
            }
            other => panic!("{} ended as {other:?}", result.address),
        }
    }
    assert_eq!(state.resources().len(), counts.applied);
    assert_eq!(engine.platform().inner.resource_count(), counts.applied);
}

#[tokio::test]
async fn test_concurrency_limit_bounds_in_flight_writes() {
    let engine = engine_on(Instrumented::new(Duration::from_millis(5)), 2);
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let report = converge(&engine, &mut state).await;

    assert!(report.summary.is_success(), "{:?}", report.summary);
    assert_eq!(engine.platform().peak(), 2);
}

#[tokio::test]
async fn test_panicking_task_fails_only_its_resource() {
    let engine = engine_on(Instrumented::panicking_on("aws_cloudwatch_log_group", "webui"), 4);
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let report = converge(&engine, &mut state).await;
    let summary = &report.summary;
    let logs = addr(ResourceKind::AwsCloudwatchLogGroup, "webui");

    assert!(matches!(
        summary.status_of(&logs),
        Some(ResourceStatus::Failed(CoreError::Internal(_)))
    ));
    for skipped in [
        addr(ResourceKind::AwsEcsTaskDefinition, "webui"),
        addr(ResourceKind::AwsEcsService, "webui"),
    ] {
        assert!(
            matches!(
                summary.status_of(&skipped),
                Some(ResourceStatus::Skipped(SkipReason::DependencyFailed { upstream })) if upstream == &logs
            ),
            "{skipped} should be skipped"
        );
    }
    let counts = summary.counts();
    assert_eq!((counts.applied, counts.failed, counts.skipped), (22, 1, 2));
    assert_eq!(state.resources().len(), 22);
    assert_eq!(state.outputs().len(), 3);
}

#[tokio::test]
async fn test_state_write_failure_stops_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let engine = engine();
    let mut state = StateStore::open(&path, llm_serving::STACK_NAME).unwrap();
    let stack = llm_serving::definition().unwrap();
    let graph = Arc::new(engine.build(&stack, &bindings()).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();

    // Renaming the temp file onto a directory fails.
    std::fs::create_dir(&path).unwrap();
    let cancel = CancellationToken::new();
    let report = engine
        .apply(graph, &plan, &mut state, cancel.clone(), None)
        .await
        .unwrap();
    let summary = &report.summary;
    let counts = summary.counts();

    assert!(!cancel.is_cancelled());
    assert!(!summary.cancelled);
    assert_eq!(counts.applied, 0);
    assert!(counts.failed >= 1, "{counts}");
    assert_eq!(counts.failed + counts.skipped, 25);
    for result in &summary.results {
        match &result.status {
            ResourceStatus::Failed(e) => assert!(matches!(e, CoreError::State { .. }), "{e}"),
            ResourceStatus::Skipped(SkipReason::Cancelled) => {}
            other => panic!("{} ended as {other:?}", result.address),
        }
    }
    // Created resources stay tracked in memory even though the file is stale.
    assert_eq!(state.resources().len(), counts.failed);
    assert_eq!(sandbox(&engine).resource_count(), counts.failed);
}

#[tokio::test]
async fn test_create_retry_after_lost_response_reuses_the_record() {
    let engine = engine();
    sandbox(&engine).inject(Fault::new(
        Operation::Create,
        "aws_lb",
        1,
        FaultKind::LostResponse,
    ));
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let report = converge(&engine, &mut state).await;

    assert!(report.summary.is_success(), "{:?}", report.summary);
    let lb_creates = sandbox(&engine)
        .writes()
        .into_iter()
        .filter(|c| c.op == Operation::Create && c.kind == "aws_lb")
        .count();
    assert_eq!(lb_creates, 2);
    let lbs = sandbox(&engine).resources_of("aws_lb");
    assert_eq!(lbs.len(), 1);
    assert_eq!(state.get(&addr(ResourceKind::AwsLb, "shared")).unwrap().id, lbs[0].id);
}

#[tokio::test]
async fn test_create_before_destroy_replaces_in_order() {
    let engine = engine();
    sandbox(&engine).delay_readiness("aws_ecs_cluster", 2);
    let stack = cluster_stack(&["main"], true);
    let main = addr(ResourceKind::AwsEcsCluster, "main");
    let mut state = StateStore::in_memory("clusters");

    let graph = Arc::new(engine.build(&stack, &VariableBindings::new()).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();
    engine
        .apply(graph, &plan, &mut state, CancellationToken::new(), None)
        .await
        .unwrap();
    let old_id = state.get(&main).unwrap().id.clone();

    let renamed = VariableBindings::new().with("suffix", "v2");
    let graph = Arc::new(engine.build(&stack, &renamed).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();
    assert_eq!(plan.get(&main).unwrap().action, Action::Replace);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = engine
        .apply(graph, &plan, &mut state, CancellationToken::new(), Some(tx))
        .await
        .unwrap();
    assert!(report.summary.is_success());

    let mut events: Vec<ApplyEvent> = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    let new_id = state.get(&main).unwrap().id.clone();
    assert_ne!(new_id, old_id);
    let position = |phase: Phase, id: &str| {
        events
            .iter()
            .position(|e| e.phase == phase && e.instance_id.as_deref() == Some(id))
            .unwrap()
    };
    assert!(position(Phase::Applied, &new_id) < position(Phase::Destroying, &old_id));
    assert!(sandbox(&engine).get("aws_ecs_cluster", &old_id).is_none());
}

#[tokio::test]
async fn test_orphans_are_deleted() {
    let engine = engine();
    let mut state = StateStore::in_memory("clusters");

    let both = cluster_stack(&["blue", "green"], false);
    let graph = Arc::new(engine.build(&both, &VariableBindings::new()).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();
    engine
        .apply(graph, &plan, &mut state, CancellationToken::new(), None)
        .await
        .unwrap();

    let one = cluster_stack(&["blue"], false);
    let graph = Arc::new(engine.build(&one, &VariableBindings::new()).await.unwrap());
    let (plan, _) = engine.plan(&graph, &mut state, &[]).await.unwrap();
    let green = addr(ResourceKind::AwsEcsCluster, "green");
    assert_eq!(plan.deletions.len(), 1);
    assert_eq!(plan.deletions[0].address, green);

    engine
        .apply(graph, &plan, &mut state, CancellationToken::new(), None)
        .await
        .unwrap();
    assert!(state.get(&green).is_none());
    assert_eq!(sandbox(&engine).resources_of("aws_ecs_cluster").len(), 1);
}

// ── Targeting ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_targeted_apply_reads_producers_from_state() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    let stack = llm_serving::definition().unwrap();
    let graph = Arc::new(engine.build(&stack, &bindings()).await.unwrap());

    let cluster = addr(ResourceKind::AwsEcsCluster, "llm");
    let template = addr(ResourceKind::AwsLaunchTemplate, "gpu");

    let err = engine
        .plan(&graph, &mut state, std::slice::from_ref(&template))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::MissingDependencyState { ref target, .. } if target == &template));

    let (plan, _) = engine
        .plan(&graph, &mut state, std::slice::from_ref(&cluster))
        .await
        .unwrap();
    assert_eq!(plan.resources.len(), 1);
    engine
        .apply(Arc::clone(&graph), &plan, &mut state, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(state.resources().len(), 1);

    let unknown = addr(ResourceKind::AwsEcsCluster, "missing");
    let err = engine
        .plan(&graph, &mut state, &[unknown])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownTarget { .. }));
}

// ── Drift ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_conflicting_drift_aborts_plan() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    converge(&engine, &mut state).await;

    let svc = addr(ResourceKind::AwsEcsService, "ollama");
    let id = state.get(&svc).unwrap().id.clone();
    assert!(sandbox(&engine).tamper("aws_ecs_service", &id, "desired_count", json!(3)));
    let serial = state.serial();

    let stack = llm_serving::definition().unwrap();
    let graph = engine.build(&stack, &bindings()).await.unwrap();
    let err = engine.plan(&graph, &mut state, &[]).await.unwrap_err();

    match err {
        CoreError::Drift { resources } => {
            assert_eq!(resources.len(), 1);
            assert_eq!(resources[0].address, svc);
            assert_eq!(resources[0].attributes, vec!["desired_count".to_owned()]);
        }
        other => panic!("expected drift, got {other}"),
    }
    assert_eq!(state.serial(), serial);
}

#[tokio::test]
async fn test_ignored_and_vanished_drift_is_reconciled() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    converge(&engine, &mut state).await;

    let asg = addr(ResourceKind::AwsAutoscalingGroup, "gpu");
    let logs = addr(ResourceKind::AwsCloudwatchLogGroup, "ollama");
    let asg_id = state.get(&asg).unwrap().id.clone();
    let logs_id = state.get(&logs).unwrap().id.clone();
    sandbox(&engine).tamper("aws_autoscaling_group", &asg_id, "desired_capacity", json!(2));
    sandbox(&engine).remove("aws_cloudwatch_log_group", &logs_id);

    let stack = llm_serving::definition().unwrap();
    let graph = engine.build(&stack, &bindings()).await.unwrap();
    let (plan, refreshed) = engine.plan(&graph, &mut state, &[]).await.unwrap();

    assert_eq!(refreshed.vanished, vec![logs.clone()]);
    assert_eq!(refreshed.adopted, vec![asg.clone()]);
    assert_eq!(plan.get(&asg).unwrap().action, Action::NoOp);
    assert_eq!(plan.get(&logs).unwrap().action, Action::Create);
    assert_eq!(
        state.get(&asg).unwrap().inputs["desired_capacity"],
        Value::from(2_i64)
    );
}

// ── Destroy ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_destroy_removes_everything() {
    let engine = engine();
    let mut state = StateStore::in_memory(llm_serving::STACK_NAME);
    converge(&engine, &mut state).await;

    let plan = engine.plan_destroy(&state, &[]).unwrap();
    assert_eq!(plan.deletions.len(), 25);
    let position = |a: &Address| plan.deletions.iter().position(|p| &p.address == a).unwrap();
    assert!(
        position(&addr(ResourceKind::AwsEcsService, "webui"))
            < position(&addr(ResourceKind::AwsEcsService, "ollama"))
    );
    assert!(
        position(&addr(ResourceKind::AwsLbListener, "http"))
            < position(&addr(ResourceKind::AwsLb, "shared"))
    );

    let report = engine
        .destroy(&plan, &mut state, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(report.summary.counts().destroyed, 25);
    assert!(state.is_empty());
    assert!(state.outputs().is_empty());
    assert_eq!(sandbox(&engine).resource_count(), 0);
}
