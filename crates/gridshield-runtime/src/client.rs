//! [`CloudClient`] – the one seam between the shield and the vendor cloud.
//!
//! The dispatch loop calls exactly one operation per attempt:
//! [`CloudClient::invoke`].  Implementations own authentication,
//! serialization, and connection handling; the shield owns pacing, timeouts,
//! and retries, and never reaches around the trait.
//!
//! [`HttpCloudClient`] is the production implementation: a thin reqwest
//! wrapper that POSTs the intent's kind and target list as JSON to the
//! vendor's control endpoint.

use async_trait::async_trait;
use gridshield_types::{ControlIntent, RequestKind, ShieldError, Target};
use serde::Serialize;

/// A device control backend the shield can dispatch against.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Apply `intent` to the device.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::Api`] when the backend rejects or cannot apply
    /// the change.  Errors are treated as transient by the dispatch loop and
    /// retried up to its budget.
    async fn invoke(&self, intent: &ControlIntent) -> Result<(), ShieldError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shape
// ─────────────────────────────────────────────────────────────────────────────

/// JSON body POSTed to the control endpoint.
#[derive(Serialize)]
struct ControlFrame<'a> {
    kind: RequestKind,
    targets: &'a [Target],
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpCloudClient
// ─────────────────────────────────────────────────────────────────────────────

/// Async client for the vendor's HTTP control API.
///
/// Construct once and reuse across dispatch attempts; the underlying
/// [`reqwest::Client`] pools connections.
pub struct HttpCloudClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpCloudClient {
    /// Create a client for `base_url` (e.g. `"https://api.example-energy.io"`)
    /// authenticating with `api_key` as a bearer token.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn control_url(&self) -> String {
        format!("{}/control", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn invoke(&self, intent: &ControlIntent) -> Result<(), ShieldError> {
        let targets = intent.targets();
        let frame = ControlFrame {
            kind: intent.kind(),
            targets: &targets,
        };

        self.client
            .post(self.control_url())
            .bearer_auth(&self.api_key)
            .json(&frame)
            .send()
            .await
            .map_err(|e| ShieldError::Api(e.to_string()))?
            .error_for_status()
            .map_err(|e| ShieldError::Api(e.to_string()))?;

        Ok(())
    }
}
