//! v1 role lifecycle: a role is a named bag of actions realized directly on
//! the owning resource as `<action>_rel` edges that point through the role's
//! own `subject` relation (§4.E). Subjects are attached to the role, not to
//! the resource, by `assign_subject_role`/`unassign_subject_role`.

use crate::engine::{Engine, EngineError, Resource};
use crate::ident::PrefixedId;
use crate::rel::types::{Operation, Relationship, RelationshipUpdate, SubjectRef};
use crate::store::models::Role;
use tracing::error;

impl Engine {
    fn role_prefix(&self) -> Result<String, EngineError> {
        let rbac = self
            .policy
            .schema()
            .rbac
            .as_ref()
            .ok_or_else(|| EngineError::InvalidArgument("policy has no rbac block".to_string()))?;
        let rt = self
            .policy
            .type_by_name(&rbac.role_resource)
            .ok_or_else(|| EngineError::InvalidType(rbac.role_resource.clone()))?;
        Ok(rt.id_prefix.clone())
    }

    fn role_resource(&self, id: &uuid::Uuid) -> Result<Resource, EngineError> {
        let prefix = self.role_prefix()?;
        Ok(Resource {
            type_name: self
                .policy
                .schema()
                .rbac
                .as_ref()
                .expect("checked above")
                .role_resource
                .clone(),
            id: PrefixedId {
                prefix,
                suffix: id.simple().to_string(),
            },
        })
    }

    fn action_rel_updates(
        &self,
        owner: &Resource,
        role: &Resource,
        actions: &[String],
        operation: Operation,
    ) -> Vec<RelationshipUpdate> {
        actions
            .iter()
            .map(|action| RelationshipUpdate {
                operation,
                relationship: Relationship {
                    resource: owner.to_object_ref(&self.namespace),
                    relation: format!("{action}_rel"),
                    subject: SubjectRef::with_relation(role.to_object_ref(&self.namespace), "subject"),
                },
            })
            .collect()
    }

    /// Creates a v1 role owned by `owner`, granting `actions`. Actions must
    /// already be bound on `owner`'s type in the active policy.
    pub async fn create_role(
        &self,
        actor: &str,
        owner: &Resource,
        name: &str,
        actions: &[String],
    ) -> Result<Role, EngineError> {
        for action in actions {
            if !self.policy.action_is_bound(&owner.type_name, action) {
                return Err(EngineError::InvalidAction(action.clone()));
            }
        }

        let id = uuid::Uuid::new_v4();
        let role_resource = self.role_resource(&id)?;

        let mut ctx = self.store.begin().await?;
        let row = match self
            .store
            .create_role(&mut ctx, id, name, &owner.id_string(), actor)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                ctx.rollback().await.ok();
                return Err(EngineError::from(e));
            }
        };

        let updates = self.action_rel_updates(owner, &role_resource, actions, Operation::Touch);
        let write_result = match self.rel.write_relationships(&updates).await {
            Ok(r) => r,
            Err(e) => {
                ctx.rollback().await.ok();
                return Err(EngineError::from(e));
            }
        };

        if let Err(e) = ctx.commit().await {
            error!(role = %id, error = %e, "role commit failed after REL write, dangling relationships tolerated");
            return Err(EngineError::from(e));
        }

        let relationships: Vec<Relationship> = updates.into_iter().map(|u| u.relationship).collect();
        self.tokens.record_write(&relationships, &write_result.zed_token).await;

        Ok(row)
    }

    pub async fn get_role(&self, id: uuid::Uuid) -> Result<Role, EngineError> {
        self.store.get_role(id).await.map_err(|e| match e {
            crate::store::StoreError::NotFound => EngineError::RoleNotFound(id.to_string()),
            other => EngineError::from(other),
        })
    }

    pub async fn list_roles(&self, owner: &Resource) -> Result<Vec<Role>, EngineError> {
        Ok(self.store.list_roles(&owner.id_string()).await?)
    }

    /// Diffs `new_actions` (if provided) against the role's current REL
    /// edges, writing the delta. A `None` leaves actions untouched; an
    /// unchanged set is a no-op beyond `updated_at`.
    pub async fn update_role(
        &self,
        actor: &str,
        owner: &Resource,
        id: uuid::Uuid,
        new_name: Option<&str>,
        new_actions: Option<&[String]>,
    ) -> Result<Role, EngineError> {
        let role_resource = self.role_resource(&id)?;
        let new_name = new_name.filter(|n| !n.is_empty());

        let mut to_add = Vec::new();
        let mut to_remove = Vec::new();
        if let Some(actions) = new_actions {
            for action in actions {
                if !self.policy.action_is_bound(&owner.type_name, action) {
                    return Err(EngineError::InvalidAction(action.clone()));
                }
            }
            let current = self.current_role_actions(owner, &role_resource).await?;
            let (add, remove) = crate::engine::diff::diff(&current, actions);
            to_add = add;
            to_remove = remove;
        }

        let mut ctx = self.store.begin().await?;
        let row = match self.store.update_role(&mut ctx, id, new_name, actor).await {
            Ok(row) => row,
            Err(e) => {
                ctx.rollback().await.ok();
                return Err(match e {
                    crate::store::StoreError::NotFound => EngineError::RoleNotFound(id.to_string()),
                    other => EngineError::from(other),
                });
            }
        };

        let add_updates = self.action_rel_updates(owner, &role_resource, &to_add, Operation::Touch);
        let remove_updates = self.action_rel_updates(owner, &role_resource, &to_remove, Operation::Delete);
        let mut all_updates = add_updates.clone();
        all_updates.extend(remove_updates.clone());

        let write_result = if all_updates.is_empty() {
            None
        } else {
            match self.rel.write_relationships(&all_updates).await {
                Ok(r) => Some(r),
                Err(e) => {
                    ctx.rollback().await.ok();
                    return Err(EngineError::from(e));
                }
            }
        };

        if let Err(e) = ctx.commit().await {
            if !add_updates.is_empty() {
                let inverse: Vec<RelationshipUpdate> = add_updates
                    .into_iter()
                    .map(|u| RelationshipUpdate {
                        operation: Operation::Delete,
                        relationship: u.relationship,
                    })
                    .collect();
                self.rel.try_compensate(&inverse).await;
            }
            if !remove_updates.is_empty() {
                let inverse: Vec<RelationshipUpdate> = remove_updates
                    .into_iter()
                    .map(|u| RelationshipUpdate {
                        operation: Operation::Touch,
                        relationship: u.relationship,
                    })
                    .collect();
                self.rel.try_compensate(&inverse).await;
            }
            return Err(EngineError::from(e));
        }

        if let Some(result) = write_result {
            let relationships: Vec<Relationship> = all_updates.into_iter().map(|u| u.relationship).collect();
            self.tokens.record_write(&relationships, &result.zed_token).await;
        }

        Ok(row)
    }

    async fn current_role_actions(&self, owner: &Resource, role: &Resource) -> Result<Vec<String>, EngineError> {
        let filter = crate::rel::types::RelationshipFilter::for_resource(&owner.to_object_ref(&self.namespace));
        let all = self.rel.read_relationships(&filter).await?;
        let role_wire = role.to_object_ref(&self.namespace).as_wire();
        Ok(all
            .into_iter()
            .filter(|r| r.relation.ends_with("_rel") && r.subject.object.as_wire() == role_wire)
            .map(|r| r.relation.trim_end_matches("_rel").to_string())
            .collect())
    }

    /// Deletes the role, tearing down every `<action>_rel` edge it holds on
    /// `owner`. Callers must first ensure no role-binding references it
    /// (v1 has no binding layer of its own; this applies to v2 only, see
    /// `roles_v2::delete_role_v2`).
    pub async fn delete_role(&self, owner: &Resource, id: uuid::Uuid) -> Result<(), EngineError> {
        let role_resource = self.role_resource(&id)?;
        let current = self.current_role_actions(owner, &role_resource).await?;
        let deletes = self.action_rel_updates(owner, &role_resource, &current, Operation::Delete);

        let mut ctx = self.store.begin().await?;
        if let Err(e) = self.store.delete_role(&mut ctx, id).await {
            ctx.rollback().await.ok();
            return Err(match e {
                crate::store::StoreError::NotFound => EngineError::RoleNotFound(id.to_string()),
                other => EngineError::from(other),
            });
        }

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
            if !reinsert.is_empty() {
                self.rel.try_compensate(&reinsert).await;
            }
            return Err(EngineError::from(e));
        }

        Ok(())
    }

    /// Writes `role#subject@subject` (v1 only).
    pub async fn assign_subject_role(&self, id: uuid::Uuid, subject: &Resource) -> Result<(), EngineError> {
        let role_resource = self.role_resource(&id)?;
        let update = RelationshipUpdate {
            operation: Operation::Touch,
            relationship: Relationship {
                resource: role_resource.to_object_ref(&self.namespace),
                relation: "subject".to_string(),
                subject: SubjectRef::new(subject.to_object_ref(&self.namespace)),
            },
        };
        let result = self.rel.write_relationships(&[update.clone()]).await?;
        self.tokens.record_write(&[update.relationship], &result.zed_token).await;
        Ok(())
    }

    pub async fn unassign_subject_role(&self, id: uuid::Uuid, subject: &Resource) -> Result<(), EngineError> {
        let role_resource = self.role_resource(&id)?;
        let filter = crate::rel::types::RelationshipFilter {
            resource_type: Some(role_resource.type_name.clone()),
            resource_id: Some(role_resource.id_string()),
            relation: Some("subject".to_string()),
            subject_type: Some(subject.type_name.clone()),
            subject_id: Some(subject.id_string()),
            subject_relation: None,
        };
        self.rel.delete_relationships(&filter).await?;
        Ok(())
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
    fn role_resource_uses_role_resource_prefix() {
        let e = engine();
        let id = uuid::Uuid::new_v4();
        let role = e.role_resource(&id).unwrap();
        assert_eq!(role.type_name, "role");
        assert_eq!(role.id.prefix, "permrv2");
        assert_eq!(role.id.suffix, id.simple().to_string());
    }

    #[test]
    fn action_rel_updates_target_role_subject_relation() {
        let e = engine();
        let owner = Resource::from_id_string(&e.policy, "tnntten-root").unwrap();
        let role = e.role_resource(&uuid::Uuid::new_v4()).unwrap();
        let actions = vec!["tenant_get".to_string(), "tenant_update".to_string()];
        let updates = e.action_rel_updates(&owner, &role, &actions, Operation::Touch);

        assert_eq!(updates.len(), 2);
        for (update, action) in updates.iter().zip(&actions) {
            assert_eq!(update.relationship.relation, format!("{action}_rel"));
            assert_eq!(update.relationship.resource.object_id, owner.id_string());
            assert_eq!(update.relationship.subject.object.object_id, role.id_string());
            assert_eq!(update.relationship.subject.relation.as_deref(), Some("subject"));
        }
    }

    #[test]
    fn action_rel_updates_empty_actions_is_empty() {
        let e = engine();
        let owner = Resource::from_id_string(&e.policy, "tnntten-root").unwrap();
        let role = e.role_resource(&uuid::Uuid::new_v4()).unwrap();
        assert!(e.action_rel_updates(&owner, &role, &[], Operation::Touch).is_empty());
    }
}
