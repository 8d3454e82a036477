// Wire types shared by every platform implementation.
//
// Attribute payloads are plain JSON objects. Sensitivity is tracked by
// `stackform-core`; by the time a value reaches this layer it is exposed,
// so the request types below never print attribute values in `Debug`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attribute map as carried on the wire.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A provisioned resource as reported by the control plane.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One `name = values` filter of a lookup query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in [{}]", self.name, self.values.join(", "))
    }
}

/// Read-only query against existing infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupQuery {
    pub kind: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Create call payload. The idempotency key is generated once per logical
/// create and reused across retries.
#[derive(Clone, Serialize)]
pub struct CreateRequest {
    pub kind: String,
    pub name: String,
    pub attributes: Attributes,
    #[serde(skip)]
    pub idempotency_key: Uuid,
}

impl fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("idempotency_key", &self.idempotency_key)
            .finish()
    }
}

/// Response envelope for lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    pub items: Vec<Attributes>,
}

/// Error envelope returned by the gateway on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_request_debug_hides_values() {
        let mut attributes = Attributes::new();
        attributes.insert("WEBUI_SECRET_KEY".into(), json!("hunter2"));
        let req = CreateRequest {
            kind: "aws_ecs_task_definition".into(),
            name: "webui".into(),
            attributes,
            idempotency_key: Uuid::nil(),
        };
        let dbg = format!("{req:?}");
        assert!(dbg.contains("WEBUI_SECRET_KEY"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn filter_display() {
        let f = Filter::new("tag:Tier", vec!["private".into()]);
        assert_eq!(f.to_string(), "tag:Tier in [private]");
    }
}
