//! Causality token manager (§4.F): lets permission checks avoid the latency
//! of fully-consistent reads while preserving read-your-writes for resources
//! that mutated recently.

use crate::rel::types::Relationship;
use crate::store::Store;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct TokenManager {
    store: Store,
    ttl: Duration,
}

impl TokenManager {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Every resource id appearing on either side of a written tuple gets
    /// the new token recorded against it. Failures are logged and dropped —
    /// a token-write failure must never roll back the business transaction
    /// that produced it (§4.F), so this takes no transaction context.
    pub async fn record_write(&self, relationships: &[Relationship], token: &str) {
        let mut ids = HashSet::new();
        for rel in relationships {
            ids.insert(rel.resource.object_id.clone());
            ids.insert(rel.subject.object.object_id.clone());
        }
        for id in ids {
            if let Err(e) = self.store.upsert_zed_token(&id, token, self.ttl).await {
                warn!(resource_id = %id, error = %e, "failed to record causality token, dropping");
            }
        }
    }

    /// Looks up the latest unexpired token for `resource_id`. An expired or
    /// absent token degrades to `None` (never an error) — the caller issues
    /// a `MinimizeLatency` check in that case.
    pub async fn token_for_check(&self, resource_id: &str) -> Option<String> {
        match self.store.get_latest_zed_token(&[resource_id.to_string()]).await {
            Ok(Some(entry)) => Some(entry.zedtoken),
            Ok(None) => None,
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "failed to read causality token, degrading to minimize_latency");
                None
            }
        }
    }
}
