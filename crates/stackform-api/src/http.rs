// HTTP gateway client
//
// Wraps `reqwest::Client` with the gateway's URL layout and status-code
// mapping. Region is sent as a header on every call; the API key is a
// default header baked in by `TransportConfig`.
//
//   POST   /v1/lookups/{kind}              -> { "items": [...] }
//   GET    /v1/resources/{kind}/{id}       -> Record
//   POST   /v1/resources/{kind}            -> Record   (Idempotency-Key header)
//   PATCH  /v1/resources/{kind}/{id}       -> Record
//   DELETE /v1/resources/{kind}/{id}       -> 204
//   GET    /v1/resources/{kind}/{id}/ready -> { "ready": bool }

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::platform::Platform;
use crate::record::{Attributes, CreateRequest, ErrorBody, LookupQuery, LookupResponse, Record};
use crate::transport::TransportConfig;

const REGION_HEADER: &str = "X-Stackform-Region";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

#[derive(Deserialize)]
struct Readiness {
    ready: bool,
}

/// Platform backed by a provisioning gateway speaking JSON over HTTP.
pub struct HttpPlatform {
    http: reqwest::Client,
    base_url: Url,
    region: String,
}

impl HttpPlatform {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the gateway root (e.g. `https://provisioner.internal`).
    pub fn new(
        base_url: Url,
        region: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, region))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, region: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            region: region.into(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/v1/{path}"))?)
    }

    fn resource_url(&self, kind: &str, id: &str) -> Result<Url, Error> {
        self.url(&format!("resources/{kind}/{id}"))
    }

    // ── Response handling ────────────────────────────────────────────

    /// Map a response to `T`, translating gateway status codes into the
    /// error taxonomy the engine's retry policy keys on.
    async fn parse<T: DeserializeOwned>(
        kind: &str,
        id: &str,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status.is_success() {
            let body = resp.text().await.map_err(Error::Transport)?;
            trace!(bytes = body.len(), "response body");
            // Bodies echo attributes, secrets included; report only where
            // parsing broke.
            return serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: format!(
                    "{:?} error at line {} column {}",
                    e.classify(),
                    e.line(),
                    e.column()
                ),
                bytes: body.len(),
            });
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        let envelope: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let message = envelope
            .message
            .unwrap_or_else(|| preview(&body));

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Authentication { message },
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
                retry_after_secs: retry_after.unwrap_or(1),
            },
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                Error::Unavailable { message }
            }
            StatusCode::NOT_FOUND if envelope.code.as_deref() == Some("not_yet_visible") => {
                Error::NotYetVisible {
                    kind: kind.to_owned(),
                    id: id.to_owned(),
                    message,
                }
            }
            StatusCode::NOT_FOUND => Error::NotFound {
                kind: kind.to_owned(),
                id: id.to_owned(),
            },
            _ => Error::Rejected {
                kind: kind.to_owned(),
                message,
                code: envelope.code,
                status: status.as_u16(),
            },
        })
    }
}

impl Platform for HttpPlatform {
    async fn lookup(&self, query: &LookupQuery) -> Result<Vec<Attributes>, Error> {
        let url = self.url(&format!("lookups/{}", query.kind))?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(REGION_HEADER, &self.region)
            .json(&json!({ "filters": query.filters }))
            .send()
            .await?;

        let page: LookupResponse = Self::parse(&query.kind, "-", resp).await?;
        Ok(page.items)
    }

    async fn read(&self, kind: &str, id: &str) -> Result<Option<Record>, Error> {
        let url = self.resource_url(kind, id)?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(REGION_HEADER, &self.region)
            .send()
            .await?;

        match Self::parse(kind, id, resp).await {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, request: &CreateRequest) -> Result<Record, Error> {
        let url = self.url(&format!("resources/{}", request.kind))?;
        debug!("POST {} (key {})", url, request.idempotency_key);

        let resp = self
            .http
            .post(url)
            .header(REGION_HEADER, &self.region)
            .header(IDEMPOTENCY_HEADER, request.idempotency_key.to_string())
            .json(request)
            .send()
            .await?;

        Self::parse(&request.kind, &request.name, resp).await
    }

    async fn update(&self, kind: &str, id: &str, attributes: &Attributes) -> Result<Record, Error> {
        let url = self.resource_url(kind, id)?;
        debug!("PATCH {}", url);

        let resp = self
            .http
            .patch(url)
            .header(REGION_HEADER, &self.region)
            .json(&json!({ "attributes": attributes }))
            .send()
            .await?;

        Self::parse(kind, id, resp).await
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<(), Error> {
        let url = self.resource_url(kind, id)?;
        debug!("DELETE {}", url);

        let resp = self
            .http
            .delete(url)
            .header(REGION_HEADER, &self.region)
            .send()
            .await?;

        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(());
        }
        match Self::parse::<serde_json::Value>(kind, id, resp).await {
            Ok(_) | Err(Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn is_ready(&self, kind: &str, id: &str) -> Result<bool, Error> {
        let url = self.url(&format!("resources/{kind}/{id}/ready"))?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(REGION_HEADER, &self.region)
            .send()
            .await?;

        let readiness: Readiness = Self::parse(kind, id, resp).await?;
        Ok(readiness.ready)
    }
}
