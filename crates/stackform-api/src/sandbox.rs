// In-memory control plane
//
// Behaves like the HTTP gateway: generated ids and ARNs, idempotency-key
// dedup, filterable lookups, and readiness. Every call is recorded so
// callers can assert on exactly what was sent. Faults can be scripted per
// operation and kind to exercise retry and failure paths.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::platform::Platform;
use crate::record::{Attributes, CreateRequest, Filter, LookupQuery, Record};

/// VPC id seeded by [`SandboxPlatform::seeded`].
pub const SANDBOX_VPC_ID: &str = "vpc-0sandbox";

const SANDBOX_ACCOUNT: &str = "000000000000";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Call log ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Lookup,
    Read,
    Create,
    Update,
    Delete,
    Ready,
}

/// One recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Operation,
    pub kind: String,
    /// Resource id, or the logical name for creates.
    pub target: String,
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self.op,
            Operation::Create | Operation::Update | Operation::Delete
        )
    }
}

// ── Fault injection ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum FaultKind {
    RateLimited,
    NotYetVisible,
    Unavailable,
    Rejected(String),
    /// Never answer; only a caller-side timeout ends the call.
    Hang,
    /// Apply the write, then fail as if the connection dropped before the
    /// response arrived.
    LostResponse,
}

/// Fail the next `times` calls of `op` against `kind`.
#[derive(Debug, Clone)]
pub struct Fault {
    pub op: Operation,
    pub kind: String,
    pub times: u32,
    pub fault: FaultKind,
}

impl Fault {
    pub fn new(op: Operation, kind: impl Into<String>, times: u32, fault: FaultKind) -> Self {
        Self {
            op,
            kind: kind.into(),
            times,
            fault,
        }
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct StoredResource {
    kind: String,
    record: Record,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    region: String,
    counter: u64,
    resources: Vec<StoredResource>,
    lookups: BTreeMap<String, Vec<Attributes>>,
}

// ── Platform ────────────────────────────────────────────────────────

pub struct SandboxPlatform {
    region: String,
    resources: DashMap<(String, String), Record>,
    lookups: DashMap<String, Vec<Attributes>>,
    idempotency: DashMap<Uuid, (String, String)>,
    readiness_delay: DashMap<String, u32>,
    pending_ready: DashMap<(String, String), u32>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<Call>>,
    counter: AtomicU64,
}

impl SandboxPlatform {
    /// An empty control plane: no lookup data, no resources.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            resources: DashMap::new(),
            lookups: DashMap::new(),
            idempotency: DashMap::new(),
            readiness_delay: DashMap::new(),
            pending_ready: DashMap::new(),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// A control plane pre-populated with one VPC (`vpc-0sandbox`), private
    /// subnets in zones a/b/c, public subnets in a/b, and g4dn.xlarge
    /// offered in zones a, c, and d (d is not an available zone).
    pub fn seeded(region: impl Into<String>) -> Self {
        let sandbox = Self::new(region);
        let r = sandbox.region.clone();

        sandbox.seed_lookup(
            "aws_vpc",
            vec![object(json!({
                "id": SANDBOX_VPC_ID,
                "vpc_id": SANDBOX_VPC_ID,
                "cidr_block": "10.0.0.0/16",
                "state": "available",
            }))],
        );

        let mut subnets = Vec::new();
        for (i, zone) in ["a", "b", "c"].iter().enumerate() {
            subnets.push(subnet(&format!("subnet-private-{zone}"), &format!("{r}{zone}"), "private", i));
        }
        for (i, zone) in ["a", "b"].iter().enumerate() {
            subnets.push(subnet(&format!("subnet-public-{zone}"), &format!("{r}{zone}"), "public", i + 10));
        }
        sandbox.seed_lookup("aws_subnets", subnets);

        sandbox.seed_lookup(
            "aws_availability_zones",
            ["a", "b", "c"]
                .iter()
                .map(|z| {
                    object(json!({
                        "zone_name": format!("{r}{z}"),
                        "zone_id": format!("use1-az{z}"),
                        "state": "available",
                        "opt_in_status": "opt-in-not-required",
                    }))
                })
                .collect(),
        );

        let mut offerings = Vec::new();
        for z in ["a", "c", "d"] {
            offerings.push(offering("g4dn.xlarge", &format!("{r}{z}")));
        }
        for z in ["a", "b", "c", "d"] {
            offerings.push(offering("t3.micro", &format!("{r}{z}")));
        }
        sandbox.seed_lookup("aws_ec2_instance_type_offerings", offerings);

        sandbox
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Replace the lookup items served for `kind`.
    pub fn seed_lookup(&self, kind: impl Into<String>, items: Vec<Attributes>) {
        self.lookups.insert(kind.into(), items);
    }

    pub fn inject(&self, fault: Fault) {
        lock(&self.faults).push(fault);
    }

    /// Newly created resources of `kind` report not-ready for `polls` checks.
    pub fn delay_readiness(&self, kind: impl Into<String>, polls: u32) {
        self.readiness_delay.insert(kind.into(), polls);
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn get(&self, kind: &str, id: &str) -> Option<Record> {
        self.resources
            .get(&(kind.to_owned(), id.to_owned()))
            .map(|r| r.value().clone())
    }

    pub fn resources_of(&self, kind: &str) -> Vec<Record> {
        let mut out: Vec<Record> = self
            .resources
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    // ── Out-of-band changes ──────────────────────────────────────────

    /// Change an attribute behind the engine's back.
    pub fn tamper(&self, kind: &str, id: &str, attribute: &str, value: Value) -> bool {
        match self.resources.get_mut(&(kind.to_owned(), id.to_owned())) {
            Some(mut record) => {
                record.attributes.insert(attribute.to_owned(), value);
                true
            }
            None => false,
        }
    }

    /// Delete a resource behind the engine's back.
    pub fn remove(&self, kind: &str, id: &str) -> bool {
        self.resources
            .remove(&(kind.to_owned(), id.to_owned()))
            .is_some()
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Load a snapshot written by [`save`](Self::save), or seed a fresh
    /// control plane if `path` does not exist.
    pub fn load_or_seed(path: &Path, region: &str) -> Result<Self, Error> {
        if !path.exists() {
            debug!(path = %path.display(), "no sandbox snapshot, seeding");
            return Ok(Self::seeded(region));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Snapshot(format!("{}: {e}", path.display())))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| Error::Snapshot(format!("{}: {e}", path.display())))?;

        let sandbox = Self::new(snapshot.region);
        sandbox.counter.store(snapshot.counter, Ordering::SeqCst);
        for stored in snapshot.resources {
            sandbox
                .resources
                .insert((stored.kind, stored.record.id.clone()), stored.record);
        }
        for (kind, items) in snapshot.lookups {
            sandbox.lookups.insert(kind, items);
        }
        Ok(sandbox)
    }

    /// Write the current control-plane contents to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let mut resources: Vec<StoredResource> = self
            .resources
            .iter()
            .map(|e| StoredResource {
                kind: e.key().0.clone(),
                record: e.value().clone(),
            })
            .collect();
        resources.sort_by(|a, b| (&a.kind, &a.record.id).cmp(&(&b.kind, &b.record.id)));

        let snapshot = Snapshot {
            region: self.region.clone(),
            counter: self.counter.load(Ordering::SeqCst),
            resources,
            lookups: self
                .lookups
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        let body = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::Snapshot(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(|e| Error::Snapshot(format!("{}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| Error::Snapshot(format!("{}: {e}", path.display())))
    }

    // ── Internals ────────────────────────────────────────────────────

    fn record_call(&self, op: Operation, kind: &str, target: &str) {
        lock(&self.calls).push(Call {
            op,
            kind: kind.to_owned(),
            target: target.to_owned(),
        });
    }

    fn take_fault(&self, op: Operation, kind: &str) -> Option<FaultKind> {
        let mut faults = lock(&self.faults);
        let pos = faults
            .iter()
            .position(|f| f.op == op && f.kind == kind && f.times > 0)?;
        let fault = faults.get_mut(pos)?;
        fault.times -= 1;
        let kind = fault.fault.clone();
        if fault.times == 0 {
            faults.remove(pos);
        }
        Some(kind)
    }

    /// Record the call, then fail it if a fault is scripted. `Ok(true)`
    /// means the write should land but its response be lost.
    async fn enter(&self, op: Operation, kind: &str, target: &str) -> Result<bool, Error> {
        self.record_call(op, kind, target);
        tokio::task::yield_now().await;

        let Some(fault) = self.take_fault(op, kind) else {
            return Ok(false);
        };
        debug!(?op, kind, target, ?fault, "injecting fault");
        Err(match fault {
            FaultKind::LostResponse => return Ok(true),
            FaultKind::RateLimited => Error::RateLimited { retry_after_secs: 0 },
            FaultKind::NotYetVisible => Error::NotYetVisible {
                kind: kind.to_owned(),
                id: target.to_owned(),
                message: "dependency still propagating".into(),
            },
            FaultKind::Unavailable => Error::Unavailable {
                message: "service temporarily unavailable".into(),
            },
            FaultKind::Rejected(message) => Error::Rejected {
                kind: kind.to_owned(),
                message,
                code: Some("invalid_parameter".into()),
                status: 400,
            },
            FaultKind::Hang => std::future::pending().await,
        })
    }

    /// Land a create, replaying the original record for a repeated key.
    fn insert(&self, request: &CreateRequest) -> Record {
        if let Some(existing) = self
            .idempotency
            .get(&request.idempotency_key)
            .map(|e| e.value().clone())
            .and_then(|(kind, id)| self.get(&kind, &id))
        {
            debug!(kind = %request.kind, id = %existing.id, "idempotent replay");
            return existing;
        }

        let serial = self.next_serial();
        let short = request.kind.strip_prefix("aws_").unwrap_or(&request.kind);
        let id = format!("{}-{serial:08x}", short.replace('_', "-"));

        let mut attributes = request.attributes.clone();
        for (k, v) in self.computed(&request.kind, &request.name, serial, &request.attributes) {
            attributes.entry(k).or_insert(v);
        }
        attributes.insert("id".into(), json!(id));

        let record = Record {
            id: id.clone(),
            attributes,
        };
        let key = (request.kind.clone(), id);
        if let Some(polls) = self.readiness_delay.get(&request.kind).map(|e| *e.value()) {
            self.pending_ready.insert(key.clone(), polls);
        }
        self.idempotency
            .insert(request.idempotency_key, key.clone());
        self.resources.insert(key, record.clone());
        record
    }

    fn next_serial(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn computed(&self, kind: &str, name: &str, serial: u64, attrs: &Attributes) -> Attributes {
        let short = kind.strip_prefix("aws_").unwrap_or(kind);
        let service = short.split('_').next().unwrap_or(short);
        let display_name = attrs
            .get("name")
            .or_else(|| attrs.get("name_prefix"))
            .or_else(|| attrs.get("family"))
            .and_then(Value::as_str)
            .unwrap_or(name)
            .trim_end_matches('-')
            .to_owned();
        let region = &self.region;

        let mut out = Attributes::new();
        match kind {
            "aws_lb" => {
                out.insert(
                    "dns_name".into(),
                    json!(format!("{display_name}-{serial}.{region}.elb.amazonaws.com")),
                );
                out.insert(
                    "arn".into(),
                    json!(format!(
                        "arn:aws:elasticloadbalancing:{region}:{SANDBOX_ACCOUNT}:loadbalancer/app/{display_name}/{serial:016x}"
                    )),
                );
            }
            "aws_ecs_task_definition" => {
                let revision = self
                    .resources
                    .iter()
                    .filter(|e| {
                        e.key().0 == kind
                            && e.value().attributes.get("family") == attrs.get("family")
                    })
                    .count()
                    + 1;
                out.insert("revision".into(), json!(revision));
                out.insert(
                    "arn".into(),
                    json!(format!(
                        "arn:aws:ecs:{region}:{SANDBOX_ACCOUNT}:task-definition/{display_name}:{revision}"
                    )),
                );
            }
            "aws_launch_template" => {
                out.insert("latest_version".into(), json!(1));
            }
            _ => {}
        }
        if !out.contains_key("arn") {
            out.insert(
                "arn".into(),
                json!(format!(
                    "arn:aws:{service}:{region}:{SANDBOX_ACCOUNT}:{short}/{display_name}-{serial}"
                )),
            );
        }
        if matches!(kind, "aws_iam_role" | "aws_ecs_cluster" | "aws_ecs_capacity_provider") {
            out.entry("name").or_insert_with(|| json!(display_name));
        }
        out
    }
}

impl Platform for SandboxPlatform {
    async fn lookup(&self, query: &LookupQuery) -> Result<Vec<Attributes>, Error> {
        self.enter(Operation::Lookup, &query.kind, "-").await?;

        let items = self
            .lookups
            .get(&query.kind)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(items
            .into_iter()
            .filter(|item| query.filters.iter().all(|f| matches_filter(item, f)))
            .collect())
    }

    async fn read(&self, kind: &str, id: &str) -> Result<Option<Record>, Error> {
        self.enter(Operation::Read, kind, id).await?;
        Ok(self.get(kind, id))
    }

    async fn create(&self, request: &CreateRequest) -> Result<Record, Error> {
        let lose_response = self
            .enter(Operation::Create, &request.kind, &request.name)
            .await?;
        let record = self.insert(request);
        if lose_response {
            return Err(lost_response());
        }
        Ok(record)
    }

    async fn update(&self, kind: &str, id: &str, attributes: &Attributes) -> Result<Record, Error> {
        let lose_response = self.enter(Operation::Update, kind, id).await?;

        let mut entry = self
            .resources
            .get_mut(&(kind.to_owned(), id.to_owned()))
            .ok_or_else(|| Error::NotFound {
                kind: kind.to_owned(),
                id: id.to_owned(),
            })?;
        for (k, v) in attributes {
            if v.is_null() {
                entry.attributes.remove(k);
            } else {
                entry.attributes.insert(k.clone(), v.clone());
            }
        }
        if kind == "aws_launch_template" {
            let next = entry
                .attributes
                .get("latest_version")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                + 1;
            entry.attributes.insert("latest_version".into(), json!(next));
        }
        if lose_response {
            return Err(lost_response());
        }
        Ok(entry.value().clone())
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<(), Error> {
        let lose_response = self.enter(Operation::Delete, kind, id).await?;
        self.resources.remove(&(kind.to_owned(), id.to_owned()));
        if lose_response {
            return Err(lost_response());
        }
        Ok(())
    }

    async fn is_ready(&self, kind: &str, id: &str) -> Result<bool, Error> {
        self.enter(Operation::Ready, kind, id).await?;

        let key = (kind.to_owned(), id.to_owned());
        if !self.resources.contains_key(&key) {
            return Err(Error::NotFound {
                kind: kind.to_owned(),
                id: id.to_owned(),
            });
        }
        let Some(mut remaining) = self.pending_ready.get_mut(&key) else {
            return Ok(true);
        };
        if *remaining == 0 {
            drop(remaining);
            self.pending_ready.remove(&key);
            return Ok(true);
        }
        *remaining -= 1;
        Ok(false)
    }
}

fn lost_response() -> Error {
    Error::Unavailable {
        message: "connection reset before the response arrived".into(),
    }
}

// ── Lookup filtering ────────────────────────────────────────────────

/// `tag:Key` reads `tags.Key`; other names match the attribute with
/// dashes or underscores.
fn filter_target<'a>(item: &'a Attributes, name: &str) -> Option<&'a Value> {
    if let Some(tag) = name.strip_prefix("tag:") {
        return item.get("tags")?.get(tag);
    }
    item.get(name)
        .or_else(|| item.get(&name.replace('-', "_")))
}

fn matches_filter(item: &Attributes, filter: &Filter) -> bool {
    let scalar = |v: &Value| match v {
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(v.to_string()),
        _ => None,
    };
    match filter_target(item, &filter.name) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(scalar)
            .any(|v| filter.values.contains(&v)),
        Some(v) => scalar(v).is_some_and(|v| filter.values.contains(&v)),
        None => false,
    }
}

fn object(v: Value) -> Attributes {
    match v {
        Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

fn subnet(id: &str, zone: &str, tier: &str, index: usize) -> Attributes {
    object(json!({
        "id": id,
        "subnet_id": id,
        "vpc_id": SANDBOX_VPC_ID,
        "availability_zone": zone,
        "cidr_block": format!("10.0.{index}.0/24"),
        "tags": { "Tier": tier, "Name": format!("sandbox-{tier}-{zone}") },
    }))
}

fn offering(instance_type: &str, zone: &str) -> Attributes {
    object(json!({
        "instance_type": instance_type,
        "location": zone,
        "location_type": "availability-zone",
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn create_req(kind: &str, name: &str, key: Uuid) -> CreateRequest {
        CreateRequest {
            kind: kind.into(),
            name: name.into(),
            attributes: object(json!({ "name": name })),
            idempotency_key: key,
        }
    }

    #[tokio::test]
    async fn lookup_filters_by_tag_and_vpc() {
        let sandbox = SandboxPlatform::seeded("us-east-1");
        let query = LookupQuery {
            kind: "aws_subnets".into(),
            filters: vec![
                Filter::new("vpc-id", vec![SANDBOX_VPC_ID.into()]),
                Filter::new("tag:Tier", vec!["public".into()]),
            ],
        };
        let items = sandbox.lookup(&query).await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["subnet-public-a", "subnet-public-b"]);
    }

    #[tokio::test]
    async fn create_is_idempotent_per_key() {
        let sandbox = SandboxPlatform::new("us-east-1");
        let key = Uuid::new_v4();
        let first = sandbox
            .create(&create_req("aws_ecs_cluster", "llm", key))
            .await
            .unwrap();
        let second = sandbox
            .create(&create_req("aws_ecs_cluster", "llm", key))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(sandbox.resource_count(), 1);
    }

    #[tokio::test]
    async fn load_balancer_gets_dns_name() {
        let sandbox = SandboxPlatform::new("us-west-2");
        let record = sandbox
            .create(&create_req("aws_lb", "llm-shared-alb", Uuid::new_v4()))
            .await
            .unwrap();
        let dns = record.attributes["dns_name"].as_str().unwrap();
        assert!(dns.starts_with("llm-shared-alb-"));
        assert!(dns.ends_with(".us-west-2.elb.amazonaws.com"));
    }

    #[tokio::test]
    async fn scripted_fault_fires_then_clears() {
        let sandbox = SandboxPlatform::new("us-east-1");
        sandbox.inject(Fault::new(
            Operation::Create,
            "aws_iam_role",
            1,
            FaultKind::RateLimited,
        ));
        let req = create_req("aws_iam_role", "r", Uuid::new_v4());
        assert!(matches!(
            sandbox.create(&req).await,
            Err(Error::RateLimited { .. })
        ));
        assert!(sandbox.create(&req).await.is_ok());
        assert_eq!(sandbox.writes().len(), 2);
    }

    #[tokio::test]
    async fn lost_response_still_lands_the_write() {
        let sandbox = SandboxPlatform::new("us-east-1");
        sandbox.inject(Fault::new(
            Operation::Create,
            "aws_lb",
            1,
            FaultKind::LostResponse,
        ));
        let req = create_req("aws_lb", "shared", Uuid::new_v4());
        let err = sandbox.create(&req).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(sandbox.resource_count(), 1);

        let landed = sandbox.resources_of("aws_lb")[0].id.clone();
        assert_eq!(sandbox.create(&req).await.unwrap().id, landed);
        assert_eq!(sandbox.resource_count(), 1);
    }

    #[tokio::test]
    async fn readiness_delay_counts_down() {
        let sandbox = SandboxPlatform::new("us-east-1");
        sandbox.delay_readiness("aws_autoscaling_group", 2);
        let rec = sandbox
            .create(&create_req("aws_autoscaling_group", "gpu", Uuid::new_v4()))
            .await
            .unwrap();
        assert!(!sandbox.is_ready("aws_autoscaling_group", &rec.id).await.unwrap());
        assert!(!sandbox.is_ready("aws_autoscaling_group", &rec.id).await.unwrap());
        assert!(sandbox.is_ready("aws_autoscaling_group", &rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");

        let sandbox = SandboxPlatform::seeded("us-east-1");
        let rec = sandbox
            .create(&create_req("aws_ecs_cluster", "llm", Uuid::new_v4()))
            .await
            .unwrap();
        sandbox.save(&path).unwrap();

        let reloaded = SandboxPlatform::load_or_seed(&path, "us-east-1").unwrap();
        assert_eq!(reloaded.get("aws_ecs_cluster", &rec.id), Some(rec));
        let next = reloaded
            .create(&create_req("aws_ecs_cluster", "other", Uuid::new_v4()))
            .await
            .unwrap();
        assert_ne!(next.id, reloaded.resources_of("aws_ecs_cluster")[0].id);
    }
}
