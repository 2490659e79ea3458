//! Thin typed wrapper over the REL HTTP API. Mirrors the shape of the
//! fleet's other external-service clients: a small config struct, a
//! constructor that validates connectivity, and one method per wire call —
//! no business logic lives here, that's the engine's job.

pub mod error;
pub mod types;

pub use error::RelError;
pub use types::*;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RelClientConfig {
    pub endpoint: String,
    pub key: String,
    pub insecure: bool,
}

#[derive(Clone)]
pub struct RelClient {
    http: Client,
    endpoint: String,
    key: String,
}

impl RelClient {
    pub fn new(config: RelClientConfig) -> Result<Self, RelError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint,
            key: config.key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    async fn send<B: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RelError> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.key)
            .json(body)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RelError::NotFound);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(RelError::Api { status, message });
        }
        Ok(resp.json::<R>().await?)
    }

    /// Writes a batch of relationship updates in one REL transaction.
    /// `Touch` is idempotent — writing the same tuple twice is not an error.
    pub async fn write_relationships(&self, updates: &[RelationshipUpdate]) -> Result<WriteResult, RelError> {
        debug!(count = updates.len(), "writing relationships to REL");
        self.send("/v1/relationships/write", &serde_json::json!({ "updates": updates }))
            .await
    }

    pub async fn delete_relationships(&self, filter: &RelationshipFilter) -> Result<WriteResult, RelError> {
        self.send("/v1/relationships/delete", filter).await
    }

    pub async fn read_relationships(&self, filter: &RelationshipFilter) -> Result<Vec<Relationship>, RelError> {
        #[derive(serde::Deserialize)]
        struct ReadResponse {
            relationships: Vec<Relationship>,
        }
        let resp: ReadResponse = self.send("/v1/relationships/read", filter).await?;
        Ok(resp.relationships)
    }

    pub async fn check_permission(&self, req: &CheckRequest) -> Result<CheckResult, RelError> {
        self.send("/v1/permissions/check", req).await
    }

    /// Pushes `schema_text` as the live REL schema. Callers should only call
    /// this when the compiled text differs from what was last pushed — REL
    /// itself does not expose a no-op fast path.
    pub async fn write_schema(&self, schema_text: &str) -> Result<(), RelError> {
        let _: serde_json::Value = self
            .send("/v1/schema/write", &serde_json::json!({ "schema": schema_text }))
            .await?;
        Ok(())
    }

    /// Best-effort compensating write, used when the engine must undo a
    /// partially-applied batch. Failures here are logged, not propagated —
    /// the caller already has a primary error to report.
    pub async fn try_compensate(&self, updates: &[RelationshipUpdate]) {
        if let Err(e) = self.write_relationships(updates).await {
            warn!(error = %e, "compensating REL write failed, tuples may be missing");
        }
    }
}
