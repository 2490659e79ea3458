use crate::engine::{EngineError, Resource};
use crate::policy::Policy;
use crate::rel::types::{CheckRequest, Consistency, SubjectRef};
use crate::rel::RelClient;
use crate::tokens::TokenManager;

/// Checks whether `subject` may perform `action` on `resource`, per §4.E/§4.F.
/// Picks `AtLeastAsFresh(token)` when a recent causality token is on file for
/// the resource, `MinimizeLatency` otherwise.
pub async fn subject_has_permission(
    policy: &Policy,
    rel: &RelClient,
    tokens: &TokenManager,
    namespace: &str,
    subject: &Resource,
    action: &str,
    resource: &Resource,
) -> Result<(), EngineError> {
    if !policy.action_is_bound(&resource.type_name, action) {
        return Err(EngineError::InvalidAction(action.to_string()));
    }

    let token = tokens.token_for_check(&resource.id_string()).await;
    let (consistency, at_least_as_fresh_token) = match token {
        Some(t) => (Consistency::AtLeastAsFresh, Some(t)),
        None => (Consistency::MinimizeLatency, None),
    };

    let req = CheckRequest {
        resource: resource.to_object_ref(namespace),
        permission: action.to_string(),
        subject: SubjectRef::new(subject.to_object_ref(namespace)),
        consistency,
        at_least_as_fresh_token,
    };

    let result = rel.check_permission(&req).await?;
    if result.decision.allowed() {
        Ok(())
    } else {
        Err(EngineError::ActionNotAssigned {
            subject: subject.id_string(),
            action: action.to_string(),
            resource: resource.id_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;

    #[tokio::test]
    async fn rejects_action_not_bound_on_resource_type_before_touching_rel() {
        let policy = Policy::default_policy().unwrap();
        let engine = test_engine(policy);
        let tenant = Resource::from_id_string(engine.policy(), "tnntten-root").unwrap();
        let user = Resource::from_id_string(engine.policy(), "idntusr-abc").unwrap();

        let err = subject_has_permission(
            engine.policy(),
            engine.rel_client(),
            &engine.tokens,
            engine.namespace(),
            &user,
            "no_such_action",
            &tenant,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::InvalidAction(a) if a == "no_such_action"));
    }
}
