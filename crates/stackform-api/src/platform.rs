// The seam between the engine and whatever provisions resources.
//
// Every call is a single-shot request; retry, timeout, and backoff live in
// the engine so that all platforms behave the same under failure.

use std::future::Future;
use std::path::Path;

use crate::error::Error;
use crate::http::HttpPlatform;
use crate::record::{Attributes, CreateRequest, LookupQuery, Record};
use crate::sandbox::SandboxPlatform;

/// Create/read/update/delete plus lookups and readiness against one
/// control plane.
pub trait Platform: Send + Sync + 'static {
    /// Run a read-only lookup; returns every matching item.
    fn lookup(
        &self,
        query: &LookupQuery,
    ) -> impl Future<Output = Result<Vec<Attributes>, Error>> + Send;

    /// Fetch a resource. `Ok(None)` means it no longer exists.
    fn read(
        &self,
        kind: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Record>, Error>> + Send;

    /// Create a resource. Repeating a request with the same idempotency key
    /// returns the original record instead of creating a second one.
    fn create(&self, request: &CreateRequest)
    -> impl Future<Output = Result<Record, Error>> + Send;

    /// Update a resource in place.
    fn update(
        &self,
        kind: &str,
        id: &str,
        attributes: &Attributes,
    ) -> impl Future<Output = Result<Record, Error>> + Send;

    /// Delete a resource. Deleting something already gone succeeds.
    fn delete(&self, kind: &str, id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Whether a resource is serving (instances healthy, tasks running).
    fn is_ready(&self, kind: &str, id: &str) -> impl Future<Output = Result<bool, Error>> + Send;
}

// ── Runtime selection ───────────────────────────────────────────────

/// Either platform, chosen at runtime from configuration.
pub enum AnyPlatform {
    Http(HttpPlatform),
    Sandbox(SandboxPlatform),
}

impl AnyPlatform {
    /// Write the sandbox snapshot to `path`. No-op for the HTTP gateway.
    pub fn persist(&self, path: &Path) -> Result<(), Error> {
        match self {
            Self::Http(_) => Ok(()),
            Self::Sandbox(s) => s.save(path),
        }
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, Self::Sandbox(_))
    }
}

impl Platform for AnyPlatform {
    async fn lookup(&self, query: &LookupQuery) -> Result<Vec<Attributes>, Error> {
        match self {
            Self::Http(p) => p.lookup(query).await,
            Self::Sandbox(p) => p.lookup(query).await,
        }
    }

    async fn read(&self, kind: &str, id: &str) -> Result<Option<Record>, Error> {
        match self {
            Self::Http(p) => p.read(kind, id).await,
            Self::Sandbox(p) => p.read(kind, id).await,
        }
    }

    async fn create(&self, request: &CreateRequest) -> Result<Record, Error> {
        match self {
            Self::Http(p) => p.create(request).await,
            Self::Sandbox(p) => p.create(request).await,
        }
    }

    async fn update(&self, kind: &str, id: &str, attributes: &Attributes) -> Result<Record, Error> {
        match self {
            Self::Http(p) => p.update(kind, id, attributes).await,
            Self::Sandbox(p) => p.update(kind, id, attributes).await,
        }
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<(), Error> {
        match self {
            Self::Http(p) => p.delete(kind, id).await,
            Self::Sandbox(p) => p.delete(kind, id).await,
        }
    }

    async fn is_ready(&self, kind: &str, id: &str) -> Result<bool, Error> {
        match self {
            Self::Http(p) => p.is_ready(kind, id).await,
            Self::Sandbox(p) => p.is_ready(kind, id).await,
        }
    }
}
