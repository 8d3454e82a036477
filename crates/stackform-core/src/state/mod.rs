// ── Persisted state ──
//
// The last-known attributes of every managed resource, keyed by address.
// This is the only input to no-op decisions; the platform is queried to
// refresh it, never trusted implicitly.

pub mod refresh;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Address, ResourceKind, Value};

pub use refresh::{Observation, RefreshReport};
pub use store::StateStore;

pub const STATE_VERSION: u32 = 1;

/// What stackform last observed for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub id: String,
    /// The desired inputs this resource was last converged to.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Every attribute: platform-reported values with `inputs` overlaid.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Producers at the time of the last apply; orders orphan deletion.
    #[serde(default)]
    pub dependencies: Vec<Address>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    /// Build state from a platform record. Inputs overlay the record so
    /// sensitive inputs stay wrapped.
    pub fn from_record(
        kind: ResourceKind,
        record: &stackform_api::Record,
        inputs: BTreeMap<String, Value>,
        dependencies: Vec<Address>,
    ) -> Self {
        let mut attributes: BTreeMap<String, Value> = record
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_wire(v)))
            .collect();
        for (k, v) in &inputs {
            attributes.insert(k.clone(), v.clone());
        }
        attributes.insert("id".into(), Value::String(record.id.clone()));
        Self {
            kind,
            id: record.id.clone(),
            inputs,
            attributes,
            dependencies,
            updated_at: Utc::now(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Input attributes whose observed value differs from the last-known one.
    pub fn drifted_inputs(&self, record: &stackform_api::Record) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|(k, v)| !v.matches_wire(record.attributes.get(k.as_str())))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// An output value as last projected after an apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoredOutput {
    Known { value: Value, sensitive: bool },
    Unavailable { reason: String },
}

/// On-disk layout of the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    /// Bumped on every write.
    pub serial: u64,
    /// Identifies one state history; never changes after creation.
    pub lineage: Uuid,
    pub stack: String,
    #[serde(default)]
    pub resources: BTreeMap<Address, ResourceState>,
    #[serde(default)]
    pub outputs: BTreeMap<String, StoredOutput>,
}

impl StateFile {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: Uuid::new_v4(),
            stack: stack.into(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> stackform_api::Record {
        stackform_api::Record {
            id: "td-1".into(),
            attributes: json!({
                "family": "open-webui",
                "secret": "s3cr3t",
                "arn": "arn:aws:ecs:us-east-1:0:task-definition/open-webui:1"
            })
            .as_object()
            .unwrap()
            .clone(),
        }
    }

    #[test]
    fn inputs_overlay_record_attributes() {
        let inputs = BTreeMap::from([
            ("family".to_owned(), Value::from("open-webui")),
            ("secret".to_owned(), Value::sensitive("s3cr3t")),
        ]);
        let state = ResourceState::from_record(
            ResourceKind::AwsEcsTaskDefinition,
            &record(),
            inputs,
            Vec::new(),
        );
        assert!(state.attribute("secret").unwrap().is_sensitive());
        assert_eq!(
            state.attribute("arn").unwrap().as_str(),
            Some("arn:aws:ecs:us-east-1:0:task-definition/open-webui:1")
        );
        assert_eq!(state.attribute("id").unwrap().as_str(), Some("td-1"));
        assert!(state.drifted_inputs(&record()).is_empty());
    }

    #[test]
    fn drift_compares_exposed_inputs() {
        let inputs = BTreeMap::from([("family".to_owned(), Value::from("ollama"))]);
        let state =
            ResourceState::from_record(ResourceKind::AwsEcsTaskDefinition, &record(), inputs, Vec::new());
        assert_eq!(state.drifted_inputs(&record()), vec!["family".to_owned()]);
    }
}
