//! The engine: the only component permitted to mutate REL state or the SQL
//! role tables. Everything above it (the HTTP surface, the CLI, the event
//! subscriber) talks to a `Resource` and an `Engine`, never to `Store` or
//! `RelClient` directly.

pub mod diff;
pub mod error;
pub mod permissions;
pub mod relationships;
pub mod resource;
pub mod role_bindings;
pub mod roles;
pub mod roles_v2;

pub use error::EngineError;
pub use relationships::RelationshipSpec;
pub use resource::Resource;

use crate::policy::Policy;
use crate::rel::RelClient;
use crate::store::Store;
use crate::tokens::TokenManager;

/// Process-wide authorization engine. Cheap to clone (every field is an
/// `Arc`-backed handle or plain string) so it can be shared across request
/// tasks and the event subscriber behind a single `Arc<Engine>` — or cloned
/// directly, since nothing here needs `&'static` aliasing.
#[derive(Clone)]
pub struct Engine {
    pub(crate) policy: Policy,
    pub(crate) store: Store,
    pub(crate) rel: RelClient,
    pub(crate) tokens: TokenManager,
    pub(crate) namespace: String,
}

impl Engine {
    pub fn new(policy: Policy, store: Store, rel: RelClient, tokens: TokenManager, namespace: String) -> Self {
        Self {
            policy,
            store,
            rel,
            tokens,
            namespace,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn rel_client(&self) -> &RelClient {
        &self.rel
    }

    pub fn new_resource_from_id(&self, id: crate::ident::PrefixedId) -> Result<Resource, EngineError> {
        Resource::from_id(&self.policy, id)
    }

    pub fn new_resource_from_id_string(&self, s: &str) -> Result<Resource, EngineError> {
        Resource::from_id_string(&self.policy, s)
    }

    pub async fn subject_has_permission(
        &self,
        subject: &Resource,
        action: &str,
        resource: &Resource,
    ) -> Result<(), EngineError> {
        permissions::subject_has_permission(&self.policy, &self.rel, &self.tokens, &self.namespace, subject, action, resource)
            .await
    }

    pub async fn create_relationships(
        &self,
        specs: &[RelationshipSpec],
    ) -> Result<(), EngineError> {
        let (relationships, token) =
            relationships::create_relationships(&self.policy, &self.rel, &self.namespace, specs).await?;
        self.tokens.record_write(&relationships, &token).await;
        Ok(())
    }

    pub async fn delete_relationships(
        &self,
        relationships: &[crate::rel::types::Relationship],
    ) -> Result<(), EngineError> {
        relationships::delete_relationships(&self.rel, relationships).await?;
        Ok(())
    }

    pub async fn delete_resource_relationships(&self, resource: &Resource) -> Result<(), EngineError> {
        relationships::delete_resource_relationships(&self.rel, &self.namespace, resource).await
    }

    pub async fn delete_outgoing_relationships(&self, resource: &Resource) -> Result<(), EngineError> {
        relationships::delete_outgoing_relationships(&self.rel, &self.namespace, resource).await
    }

    pub async fn list_relationships_from(&self, resource: &Resource) -> Result<Vec<crate::rel::types::Relationship>, EngineError> {
        relationships::list_relationships_from(&self.rel, &self.namespace, resource).await
    }

    pub async fn list_relationships_to(&self, resource: &Resource) -> Result<Vec<crate::rel::types::Relationship>, EngineError> {
        relationships::list_relationships_to(&self.rel, &self.namespace, resource).await
    }
}

/// Builds an `Engine` whose `Store`/`RelClient` never touch the network —
/// safe for tests that exercise validation or tuple-shaping logic without
/// running a query or an HTTP call. Any test that actually calls
/// `store`/`rel` methods needs a real backend instead.
#[cfg(test)]
pub(crate) fn test_engine(policy: Policy) -> Engine {
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/unused").unwrap();
    let store = Store::from_pool(pool);
    let rel = RelClient::new(crate::rel::RelClientConfig {
        endpoint: "http://localhost:1".to_string(),
        key: "test".to_string(),
        insecure: true,
    })
    .unwrap();
    let tokens = TokenManager::new(store.clone(), Duration::from_secs(3600));
    Engine::new(policy, store, rel, tokens, "test".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::PrefixedId;

    #[test]
    fn new_resource_from_id_rejects_unknown_prefix() {
        let policy = Policy::default_policy().unwrap();
        let err = Resource::from_id(&policy, PrefixedId::parse("zzzzzzz-abc").unwrap()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidNamespace(_)));
    }

    #[test]
    fn new_resource_from_id_resolves_known_prefix() {
        let policy = Policy::default_policy().unwrap();
        let resource = Resource::from_id_string(&policy, "tnntten-root").unwrap();
        assert_eq!(resource.type_name, "tenant");
    }
}
