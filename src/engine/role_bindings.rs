//! v2 role-binding lifecycle (§4.E). A role-binding is the object that
//! actually carries a grant: `resource#grant@role_binding`, with
//! `role_binding#role@role` and one `role_binding#subject@subject` per bound
//! subject.

use crate::engine::{Engine, EngineError, Resource};
use crate::ident::PrefixedId;
use crate::rel::types::{Operation, Relationship, RelationshipFilter, RelationshipUpdate, SubjectRef};
use crate::store::models::RoleBinding;
use futures::stream::{self, StreamExt};
use tracing::warn;

const DEFAULT_FANOUT: usize = 8;

impl Engine {
    fn role_binding_type_name(&self) -> Result<String, EngineError> {
        Ok(self
            .policy
            .rbac()
            .ok_or_else(|| EngineError::InvalidArgument("policy has no rbac block".to_string()))?
            .role_binding_resource
            .clone())
    }

    fn role_binding_resource(&self, id: uuid::Uuid) -> Result<Resource, EngineError> {
        let type_name = self.role_binding_type_name()?;
        let prefix = self
            .policy
            .type_by_name(&type_name)
            .ok_or_else(|| EngineError::InvalidType(type_name.clone()))?
            .id_prefix
            .clone();
        Ok(Resource {
            type_name,
            id: PrefixedId {
                prefix,
                suffix: id.simple().to_string(),
            },
        })
    }

    /// A role is bindable on `resource` if `resource` owns it directly or
    /// inherits it through the ownership chain walked by `list_roles_v2`.
    async fn role_bindable_on(&self, resource: &Resource, role_id: uuid::Uuid) -> Result<bool, EngineError> {
        let roles = self.list_roles_v2(resource).await?;
        Ok(roles.iter().any(|(r, _)| r.id == role_id))
    }

    fn subject_ref(&self, subject: &Resource, subject_relation: Option<&str>) -> SubjectRef {
        let object = subject.to_object_ref(&self.namespace);
        match subject_relation {
            Some(r) => SubjectRef::with_relation(object, r),
            None => SubjectRef::new(object),
        }
    }

    /// One subject to bind, optionally expanded through a membership
    /// relation (e.g. `group#member`).
    pub async fn create_role_binding(
        &self,
        actor: &str,
        resource: &Resource,
        role_id: uuid::Uuid,
        manager: Option<&str>,
        subjects: &[(Resource, Option<String>)],
    ) -> Result<RoleBinding, EngineError> {
        if subjects.is_empty() {
            return Err(EngineError::CreateRoleBindingWithNoSubjects);
        }

        self.get_role_v2(role_id).await?;
        if !self.role_bindable_on(resource, role_id).await? {
            return Err(EngineError::RoleNotFound(role_id.to_string()));
        }

        let rbac = self
            .policy
            .rbac()
            .ok_or_else(|| EngineError::InvalidArgument("policy has no rbac block".to_string()))?;
        for (subject, subject_relation) in subjects {
            let candidate = match subject_relation {
                Some(r) => format!("{}#{}", subject.type_name, r),
                None => subject.type_name.clone(),
            };
            if !rbac.role_binding_subjects.iter().any(|s| s == &candidate) {
                return Err(EngineError::InvalidRoleBindingSubjectType {
                    subject_type: candidate,
                    resource_type: resource.type_name.clone(),
                });
            }
        }

        let id = uuid::Uuid::new_v4();
        let binding_resource = self.role_binding_resource(id)?;
        let role = self.role_v2_resource(role_id)?;

        let mut ctx = self.store.begin().await?;
        let row = match self
            .store
            .create_role_binding(&mut ctx, id, &resource.id_string(), manager, actor)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                ctx.rollback().await.ok();
                return Err(EngineError::from(e));
            }
        };

        let mut updates = vec![
            RelationshipUpdate {
                operation: Operation::Touch,
                relationship: Relationship {
                    resource: binding_resource.to_object_ref(&self.namespace),
                    relation: "role".to_string(),
                    subject: SubjectRef::new(role.to_object_ref(&self.namespace)),
                },
            },
            RelationshipUpdate {
                operation: Operation::Touch,
                relationship: Relationship {
                    resource: resource.to_object_ref(&self.namespace),
                    relation: "grant".to_string(),
                    subject: SubjectRef::new(binding_resource.to_object_ref(&self.namespace)),
                },
            },
        ];
        for (subject, subject_relation) in subjects {
            updates.push(RelationshipUpdate {
                operation: Operation::Touch,
                relationship: Relationship {
                    resource: binding_resource.to_object_ref(&self.namespace),
                    relation: "subject".to_string(),
                    subject: self.subject_ref(subject, subject_relation.as_deref()),
                },
            });
        }

        let write_result = match self.rel.write_relationships(&updates).await {
            Ok(r) => r,
            Err(e) => {
                ctx.rollback().await.ok();
                return Err(EngineError::from(e));
            }
        };

        if let Err(e) = ctx.commit().await {
            let inverse: Vec<RelationshipUpdate> = updates
                .into_iter()
                .map(|u| RelationshipUpdate {
                    operation: Operation::Delete,
                    relationship: u.relationship,
                })
                .collect();
            self.rel.try_compensate(&inverse).await;
            return Err(EngineError::from(e));
        }

        let relationships: Vec<Relationship> = updates.into_iter().map(|u| u.relationship).collect();
        self.tokens.record_write(&relationships, &write_result.zed_token).await;

        Ok(row)
    }

    pub async fn get_role_binding(&self, id: uuid::Uuid) -> Result<RoleBinding, EngineError> {
        self.store.get_role_binding(id).await.map_err(|e| match e {
            crate::store::StoreError::NotFound => EngineError::RoleBindingNotFound(id.to_string()),
            other => EngineError::from(other),
        })
    }

    /// Reads `resource#grant@role_binding:*`, then fans out a bounded number
    /// of concurrent fetches per binding. A `NotFound` on a specific binding
    /// (a dangling grant) is downgraded to a warning and skipped; any other
    /// error aborts the whole listing.
    pub async fn list_role_bindings(
        &self,
        resource: &Resource,
        role_id: Option<uuid::Uuid>,
    ) -> Result<Vec<RoleBinding>, EngineError> {
        let filter = RelationshipFilter {
            resource_type: Some(resource.type_name.clone()),
            resource_id: Some(resource.id_string()),
            relation: Some("grant".to_string()),
            subject_type: None,
            subject_id: None,
            subject_relation: None,
        };
        let grants = self.rel.read_relationships(&filter).await?;
        let mut ids: Vec<String> = grants.into_iter().map(|g| g.subject.object.object_id).collect();

        if let Some(role_id) = role_id {
            let role = self.role_v2_resource(role_id)?;
            let role_filter = RelationshipFilter {
                resource_type: Some(self.role_binding_type_name()?),
                resource_id: None,
                relation: Some("role".to_string()),
                subject_type: Some(role.type_name.clone()),
                subject_id: Some(role.id_string()),
                subject_relation: None,
            };
            let bound: std::collections::HashSet<String> = self
                .rel
                .read_relationships(&role_filter)
                .await?
                .into_iter()
                .map(|r| r.resource.object_id)
                .collect();
            ids.retain(|id| bound.contains(id));
        }

        let results: Vec<Result<Option<RoleBinding>, EngineError>> = stream::iter(ids)
            .map(|object_id| async move {
                let parsed = PrefixedId::parse(&object_id).map_err(EngineError::from)?;
                let binding_id = uuid::Uuid::parse_str(&parsed.suffix)
                    .map_err(|_| EngineError::InvalidArgument(object_id.clone()))?;
                match self.store.get_role_binding(binding_id).await {
                    Ok(row) => Ok(Some(row)),
                    Err(crate::store::StoreError::NotFound) => {
                        warn!(role_binding = %object_id, "dangling grant, skipping");
                        Ok(None)
                    }
                    Err(e) => Err(EngineError::from(e)),
                }
            })
            .buffer_unordered(DEFAULT_FANOUT)
            .collect()
            .await;

        let mut out = Vec::new();
        for result in results {
            if let Some(row) = result? {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Locks the binding, diffs its current subjects against `subjects`,
    /// writes the delta, updates the SQL row.
    pub async fn update_role_binding(
        &self,
        actor: &str,
        id: uuid::Uuid,
        subjects: &[(Resource, Option<String>)],
    ) -> Result<RoleBinding, EngineError> {
        let binding_resource = self.role_binding_resource(id)?;

        let filter = RelationshipFilter {
            resource_type: Some(binding_resource.type_name.clone()),
            resource_id: Some(binding_resource.id_string()),
            relation: Some("subject".to_string()),
            subject_type: None,
            subject_id: None,
            subject_relation: None,
        };
        let current = self.rel.read_relationships(&filter).await?;
        let current_wire: Vec<String> = current.iter().map(|r| subject_wire(&r.subject)).collect();
        let incoming_wire: Vec<String> = subjects
            .iter()
            .map(|(s, rel)| subject_wire(&self.subject_ref(s, rel.as_deref())))
            .collect();

        let (to_add, to_remove) = crate::engine::diff::diff(&current_wire, &incoming_wire);

        let mut ctx = self.store.begin().await?;
        if let Err(e) = self.store.lock_role_binding_for_update(&mut ctx, id).await {
            ctx.rollback().await.ok();
            return Err(match e {
                crate::store::StoreError::NotFound => EngineError::RoleBindingNotFound(id.to_string()),
                other => EngineError::from(other),
            });
        }

        let row = match self.store.update_role_binding(&mut ctx, id, actor).await {
            Ok(row) => row,
            Err(e) => {
                ctx.rollback().await.ok();
                return Err(EngineError::from(e));
            }
        };

        let mut updates = Vec::new();
        for wire in &to_add {
            updates.push(RelationshipUpdate {
                operation: Operation::Touch,
                relationship: wire_to_relationship(&binding_resource, "subject", wire, &self.namespace),
            });
        }
        for wire in &to_remove {
            updates.push(RelationshipUpdate {
                operation: Operation::Delete,
                relationship: wire_to_relationship(&binding_resource, "subject", wire, &self.namespace),
            });
        }

        let write_result = if updates.is_empty() {
            None
        } else {
            match self.rel.write_relationships(&updates).await {
                Ok(r) => Some(r),
                Err(e) => {
                    ctx.rollback().await.ok();
                    return Err(EngineError::from(e));
                }
            }
        };

        if let Err(e) = ctx.commit().await {
            let inverse: Vec<RelationshipUpdate> = updates
                .into_iter()
                .map(|u| RelationshipUpdate {
                    operation: match u.operation {
                        Operation::Touch => Operation::Delete,
                        Operation::Delete => Operation::Touch,
                        Operation::Create => Operation::Delete,
                    },
                    relationship: u.relationship,
                })
                .collect();
            self.rel.try_compensate(&inverse).await;
            return Err(EngineError::from(e));
        }

        if let Some(result) = write_result {
            let relationships: Vec<Relationship> = updates.into_iter().map(|u| u.relationship).collect();
            self.tokens.record_write(&relationships, &result.zed_token).await;
        }

        Ok(row)
    }

    /// Locks the binding, deletes every tuple it owns (its `subject` edges,
    /// its `role` edge, and the `grant` edge pointing at it), then the row.
    pub async fn delete_role_binding(&self, resource: &Resource, id: uuid::Uuid) -> Result<(), EngineError> {
        let binding_resource = self.role_binding_resource(id)?;

        let owned_filter = RelationshipFilter::for_resource(&binding_resource.to_object_ref(&self.namespace));
        let owned = self.rel.read_relationships(&owned_filter).await?;

        let grant_filter = RelationshipFilter {
            resource_type: Some(resource.type_name.clone()),
            resource_id: Some(resource.id_string()),
            relation: Some("grant".to_string()),
            subject_type: Some(binding_resource.type_name.clone()),
            subject_id: Some(binding_resource.id_string()),
            subject_relation: None,
        };
        let grant = self.rel.read_relationships(&grant_filter).await?;

        let mut ctx = self.store.begin().await?;
        if let Err(e) = self.store.lock_role_binding_for_update(&mut ctx, id).await {
            ctx.rollback().await.ok();
            return Err(match e {
                crate::store::StoreError::NotFound => EngineError::RoleBindingNotFound(id.to_string()),
                other => EngineError::from(other),
            });
        }
        if let Err(e) = self.store.delete_role_binding(&mut ctx, id).await {
            ctx.rollback().await.ok();
            return Err(match e {
                crate::store::StoreError::NotFound => EngineError::RoleBindingNotFound(id.to_string()),
                other => EngineError::from(other),
            });
        }

        let mut to_delete = owned;
        to_delete.extend(grant);
        let deletes: Vec<RelationshipUpdate> = to_delete
            .into_iter()
            .map(|relationship| RelationshipUpdate {
                operation: Operation::Delete,
                relationship,
            })
            .collect();

        if !deletes.is_empty() {
            if let Err(e) = self.rel.write_relationships(&deletes).await {
                ctx.rollback().await.ok();
                return Err(EngineError::from(e));
            }
        }

        if let Err(e) = ctx.commit().await {
            let reinsert: Vec<RelationshipUpdate> = deletes
                .into_iter()
                .map(|u| RelationshipUpdate {
                    operation: Operation::Touch,
                    relationship: u.relationship,
                })
                .collect();
            self.rel.try_compensate(&reinsert).await;
            return Err(EngineError::from(e));
        }

        Ok(())
    }
}

fn subject_wire(subject: &SubjectRef) -> String {
    match &subject.relation {
        Some(r) => format!("{}#{}", subject.object.as_wire(), r),
        None => subject.object.as_wire(),
    }
}

fn wire_to_relationship(resource: &Resource, relation: &str, wire: &str, namespace: &str) -> Relationship {
    let (object_part, subject_relation) = match wire.rsplit_once('#') {
        Some((obj, rel)) => (obj, Some(rel.to_string())),
        None => (wire, None),
    };
    let (ns_type, object_id) = object_part.split_once(':').unwrap_or((object_part, ""));
    let (_ns, object_type) = ns_type.split_once('/').unwrap_or(("", ns_type));
    Relationship {
        resource: resource.to_object_ref(namespace),
        relation: relation.to_string(),
        subject: crate::rel::types::SubjectRef {
            object: crate::rel::types::ObjectRef::new(namespace, object_type, object_id),
            relation: subject_relation,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;
    use crate::policy::Policy;

    fn engine() -> Engine {
        test_engine(Policy::default_policy().unwrap())
    }

    #[test]
    fn subject_wire_round_trips_through_wire_to_relationship() {
        let e = engine();
        let binding = e.role_binding_resource(uuid::Uuid::new_v4()).unwrap();
        let user = Resource::from_id_string(&e.policy, "idntusr-abc").unwrap();

        let without_relation = e.subject_ref(&user, None);
        let wire = subject_wire(&without_relation);
        assert_eq!(wire, format!("test/user:{}", user.id_string()));
        let round_tripped = wire_to_relationship(&binding, "subject", &wire, "test");
        assert_eq!(round_tripped.subject.object.object_type, "user");
        assert_eq!(round_tripped.subject.object.object_id, user.id_string());
        assert!(round_tripped.subject.relation.is_none());
    }

    #[test]
    fn subject_wire_preserves_subject_relation() {
        let e = engine();
        let binding = e.role_binding_resource(uuid::Uuid::new_v4()).unwrap();
        let group = Resource::from_id_string(&e.policy, "idntgrp-abc").unwrap();

        let with_relation = e.subject_ref(&group, Some("member"));
        let wire = subject_wire(&with_relation);
        assert!(wire.ends_with("#member"));
        let round_tripped = wire_to_relationship(&binding, "subject", &wire, "test");
        assert_eq!(round_tripped.subject.object.object_type, "group");
        assert_eq!(round_tripped.subject.relation.as_deref(), Some("member"));
    }

    #[test]
    fn subject_ref_without_relation_has_no_relation() {
        let e = engine();
        let client = Resource::from_id_string(&e.policy, "idntcli-abc").unwrap();
        let subject = e.subject_ref(&client, None);
        assert_eq!(subject.object, client.to_object_ref("test"));
        assert!(subject.relation.is_none());
    }

    #[test]
    fn role_binding_resource_uses_role_binding_prefix() {
        let e = engine();
        let id = uuid::Uuid::new_v4();
        let binding = e.role_binding_resource(id).unwrap();
        assert_eq!(binding.type_name, "rolebinding");
        assert_eq!(binding.id.prefix, "rolebndgv2");
        assert_eq!(binding.id.suffix, id.simple().to_string());
    }
}
