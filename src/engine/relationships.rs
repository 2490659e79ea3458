use crate::engine::{EngineError, Resource};
use crate::policy::Policy;
use crate::rel::types::{Operation, Relationship, RelationshipFilter, RelationshipUpdate, SubjectRef};
use crate::rel::RelClient;
use tracing::error;

/// One relationship to create or delete, expressed in terms of resources
/// rather than raw `ObjectRef`s — the engine's callers never construct wire
/// types directly.
#[derive(Debug, Clone)]
pub struct RelationshipSpec {
    pub resource: Resource,
    pub relation: String,
    pub subject: Resource,
    pub subject_relation: Option<String>,
}

fn validate_spec(policy: &Policy, spec: &RelationshipSpec) -> Result<(), EngineError> {
    let rt = policy
        .type_by_name(&spec.resource.type_name)
        .ok_or_else(|| EngineError::InvalidType(spec.resource.type_name.clone()))?;

    let relation = rt.relationship(&spec.relation).ok_or_else(|| EngineError::InvalidRelationship {
        relation: spec.relation.clone(),
        resource_type: spec.resource.type_name.clone(),
        subject_type: spec.subject.type_name.clone(),
    })?;

    let matches = relation.target_types.iter().any(|t| {
        t.type_name == spec.subject.type_name && t.subject_relation == spec.subject_relation
    });
    if !matches {
        return Err(EngineError::InvalidRelationship {
            relation: spec.relation.clone(),
            resource_type: spec.resource.type_name.clone(),
            subject_type: spec.subject.type_name.clone(),
        });
    }
    Ok(())
}

fn to_relationship(namespace: &str, spec: &RelationshipSpec) -> Relationship {
    let subject_obj = spec.subject.to_object_ref(namespace);
    let subject = match &spec.subject_relation {
        Some(r) => SubjectRef::with_relation(subject_obj, r.clone()),
        None => SubjectRef::new(subject_obj),
    };
    Relationship {
        resource: spec.resource.to_object_ref(namespace),
        relation: spec.relation.clone(),
        subject,
    }
}

/// Validates every spec against the policy, then writes them all in one
/// REL batch (`Touch`, idempotent). Returns the REL-assigned causality
/// token so the caller can hand it to the token manager.
pub async fn create_relationships(
    policy: &Policy,
    rel: &RelClient,
    namespace: &str,
    specs: &[RelationshipSpec],
) -> Result<(Vec<Relationship>, String), EngineError> {
    for spec in specs {
        validate_spec(policy, spec)?;
    }
    let relationships: Vec<Relationship> = specs.iter().map(|s| to_relationship(namespace, s)).collect();
    let updates: Vec<RelationshipUpdate> = relationships
        .iter()
        .cloned()
        .map(|relationship| RelationshipUpdate {
            operation: Operation::Touch,
            relationship,
        })
        .collect();
    let result = rel.write_relationships(&updates).await?;
    Ok((relationships, result.zed_token))
}

/// Deletes each tuple named by `relationships`. If any deletion fails partway
/// through the batch, the already-deleted tuples are best-effort recreated
/// (§4.E) and the original error is surfaced.
pub async fn delete_relationships(
    rel: &RelClient,
    relationships: &[Relationship],
) -> Result<String, EngineError> {
    let mut deleted = Vec::new();
    let mut last_token = String::new();

    for relationship in relationships {
        let filter = RelationshipFilter {
            resource_type: Some(relationship.resource.object_type.clone()),
            resource_id: Some(relationship.resource.object_id.clone()),
            relation: Some(relationship.relation.clone()),
            subject_type: Some(relationship.subject.object.object_type.clone()),
            subject_id: Some(relationship.subject.object.object_id.clone()),
            subject_relation: relationship.subject.relation.clone(),
        };
        match rel.delete_relationships(&filter).await {
            Ok(result) => {
                last_token = result.zed_token;
                deleted.push(relationship.clone());
            }
            Err(e) => {
                if !deleted.is_empty() {
                    error!(error = %e, count = deleted.len(), "partial relationship delete failed, recreating deleted tuples");
                    let recreate: Vec<RelationshipUpdate> = deleted
                        .into_iter()
                        .map(|relationship| RelationshipUpdate {
                            operation: Operation::Touch,
                            relationship,
                        })
                        .collect();
                    rel.try_compensate(&recreate).await;
                }
                return Err(EngineError::from(e));
            }
        }
    }
    Ok(last_token)
}

/// Deletes every tuple where `resource` appears as the subject, at its own
/// namespace/type (§4.E `delete_resource_relationships`).
pub async fn delete_resource_relationships(
    rel: &RelClient,
    namespace: &str,
    resource: &Resource,
) -> Result<(), EngineError> {
    let filter = RelationshipFilter::for_subject(&resource.to_object_ref(namespace));
    rel.delete_relationships(&filter).await?;
    Ok(())
}

/// Deletes every tuple where `resource` appears as the resource side — the
/// edges `synthesize` wrote pointing out of it (`owner`, `parent`,
/// `member`, ...). Used by the event path's update/delete teardown, which
/// must undo what it created, not what points at it.
pub async fn delete_outgoing_relationships(
    rel: &RelClient,
    namespace: &str,
    resource: &Resource,
) -> Result<(), EngineError> {
    let filter = RelationshipFilter::for_resource(&resource.to_object_ref(namespace));
    rel.delete_relationships(&filter).await?;
    Ok(())
}

/// Plumbing relations (`grant`, `role`, `subject`, and any `<action>_rel`)
/// are internal to role/role-binding realization and excluded from the
/// public listing views.
fn is_plumbing_relation(relation: &str) -> bool {
    relation == "grant" || relation == "role" || relation == "subject" || relation.ends_with("_rel")
}

pub async fn list_relationships_from(
    rel: &RelClient,
    namespace: &str,
    resource: &Resource,
) -> Result<Vec<Relationship>, EngineError> {
    let filter = RelationshipFilter::for_resource(&resource.to_object_ref(namespace));
    let all = rel.read_relationships(&filter).await?;
    Ok(all.into_iter().filter(|r| !is_plumbing_relation(&r.relation)).collect())
}

pub async fn list_relationships_to(
    rel: &RelClient,
    namespace: &str,
    resource: &Resource,
) -> Result<Vec<Relationship>, EngineError> {
    let filter = RelationshipFilter::for_subject(&resource.to_object_ref(namespace));
    let all = rel.read_relationships(&filter).await?;
    Ok(all.into_iter().filter(|r| !is_plumbing_relation(&r.relation)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_plumbing_relation_filters_wiring_relations() {
        assert!(is_plumbing_relation("grant"));
        assert!(is_plumbing_relation("role"));
        assert!(is_plumbing_relation("subject"));
        assert!(is_plumbing_relation("loadbalancer_get_rel"));
        assert!(!is_plumbing_relation("owner"));
        assert!(!is_plumbing_relation("parent"));
    }

    #[test]
    fn validate_spec_accepts_declared_relationship() {
        let policy = Policy::default_policy().unwrap();
        let parent = Resource::from_id_string(&policy, "tnntten-parent").unwrap();
        let child = Resource::from_id_string(&policy, "tnntten-child").unwrap();
        let spec = RelationshipSpec {
            resource: child,
            relation: "parent".to_string(),
            subject: parent,
            subject_relation: None,
        };
        validate_spec(&policy, &spec).unwrap();
    }

    #[test]
    fn validate_spec_rejects_undeclared_relation() {
        let policy = Policy::default_policy().unwrap();
        let tenant = Resource::from_id_string(&policy, "tnntten-root").unwrap();
        let user = Resource::from_id_string(&policy, "idntusr-abc").unwrap();
        let spec = RelationshipSpec {
            resource: tenant,
            relation: "nonexistent".to_string(),
            subject: user,
            subject_relation: None,
        };
        let err = validate_spec(&policy, &spec).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRelationship { .. }));
    }

    #[test]
    fn validate_spec_rejects_wrong_subject_type() {
        let policy = Policy::default_policy().unwrap();
        let tenant = Resource::from_id_string(&policy, "tnntten-root").unwrap();
        let user = Resource::from_id_string(&policy, "idntusr-abc").unwrap();
        let spec = RelationshipSpec {
            resource: tenant,
            relation: "parent".to_string(),
            subject: user,
            subject_relation: None,
        };
        let err = validate_spec(&policy, &spec).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRelationship { .. }));
    }

    #[test]
    fn to_relationship_carries_namespace_and_relation() {
        let policy = Policy::default_policy().unwrap();
        let group = Resource::from_id_string(&policy, "idntgrp-g1").unwrap();
        let tenant = Resource::from_id_string(&policy, "tnntten-root").unwrap();
        let spec = RelationshipSpec {
            resource: group,
            relation: "owner".to_string(),
            subject: tenant,
            subject_relation: None,
        };
        let rel = to_relationship("acme", &spec);
        assert_eq!(rel.resource.namespace, "acme");
        assert_eq!(rel.relation, "owner");
        assert_eq!(rel.subject.object.object_type, "tenant");
    }
}
