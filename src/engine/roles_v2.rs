//! v2 role lifecycle (§4.E). A v2 role lives on a `roleOwner` resource and
//! grants a set of policy-wide v2 actions through the role's `<action>_rel`
//! relation, realized as a type-level wildcard tuple per `(action,
//! roleSubjectType)` — `role:X#loadbalancer_get@user:*`, for instance. A
//! role-binding's `subject & role-><action>_rel` permission then narrows
//! that wildcard down to whichever subjects the binding actually names.

use crate::engine::diff::diff;
use crate::engine::{Engine, EngineError, Resource};
use crate::ident::PrefixedId;
use crate::rel::types::{ObjectRef, Operation, Relationship, RelationshipFilter, RelationshipUpdate, SubjectRef};
use crate::store::models::Role;
use std::collections::HashSet;
use tracing::error;

const WILDCARD: &str = "*";

impl Engine {
    fn role_v2_type_name(&self) -> Result<String, EngineError> {
        Ok(self
            .policy
            .rbac()
            .ok_or_else(|| EngineError::InvalidArgument("policy has no rbac block".to_string()))?
            .role_resource
            .clone())
    }

    pub(crate) fn role_v2_resource(&self, id: uuid::Uuid) -> Result<Resource, EngineError> {
        let type_name = self.role_v2_type_name()?;
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

    /// A wildcard subject reference for `type_name`, honoring a
    /// `Type#relation` role-subject-type entry (e.g. `group#member`).
    fn wildcard_subject(&self, role_subject_type: &str) -> SubjectRef {
        match role_subject_type.split_once('#') {
            Some((ty, rel)) => SubjectRef::with_relation(ObjectRef::new(&self.namespace, ty, WILDCARD), rel),
            None => SubjectRef::new(ObjectRef::new(&self.namespace, role_subject_type, WILDCARD)),
        }
    }

    fn action_wildcard_updates(
        &self,
        role: &Resource,
        actions: &[String],
        operation: Operation,
    ) -> Result<Vec<RelationshipUpdate>, EngineError> {
        let rbac = self
            .policy
            .rbac()
            .ok_or_else(|| EngineError::InvalidArgument("policy has no rbac block".to_string()))?;
        let mut updates = Vec::new();
        for action in actions {
            for subject_type in &rbac.role_subject_types {
                updates.push(RelationshipUpdate {
                    operation,
                    relationship: Relationship {
                        resource: role.to_object_ref(&self.namespace),
                        relation: format!("{action}_rel"),
                        subject: self.wildcard_subject(subject_type),
                    },
                });
            }
        }
        Ok(updates)
    }

    fn owner_update(&self, role: &Resource, owner: &Resource, operation: Operation) -> RelationshipUpdate {
        RelationshipUpdate {
            operation,
            relationship: Relationship {
                resource: role.to_object_ref(&self.namespace),
                relation: "owner".to_string(),
                subject: SubjectRef::new(owner.to_object_ref(&self.namespace)),
            },
        }
    }

    fn validate_v2_actions(&self, actions: &[String]) -> Result<(), EngineError> {
        let known = self.policy.v2_actions();
        for action in actions {
            if !known.contains(action) {
                return Err(EngineError::InvalidAction(action.clone()));
            }
        }
        Ok(())
    }

    fn validate_role_owner(&self, owner: &Resource) -> Result<(), EngineError> {
        let rbac = self
            .policy
            .rbac()
            .ok_or_else(|| EngineError::InvalidArgument("policy has no rbac block".to_string()))?;
        if !rbac.role_owners.iter().any(|o| o == &owner.type_name) {
            return Err(EngineError::ResourceDoesNotSupportRoleBindingV2(owner.id_string()));
        }
        Ok(())
    }

    pub async fn create_role_v2(
        &self,
        actor: &str,
        owner: &Resource,
        name: &str,
        actions: &[String],
    ) -> Result<Role, EngineError> {
        self.validate_role_owner(owner)?;
        self.validate_v2_actions(actions)?;

        let id = uuid::Uuid::new_v4();
        let role = self.role_v2_resource(id)?;

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

        let mut updates = vec![self.owner_update(&role, owner, Operation::Touch)];
        updates.extend(self.action_wildcard_updates(&role, actions, Operation::Touch)?);

        let write_result = match self.rel.write_relationships(&updates).await {
            Ok(r) => r,
            Err(e) => {
                ctx.rollback().await.ok();
                return Err(EngineError::from(e));
            }
        };

        if let Err(e) = ctx.commit().await {
            error!(role = %id, error = %e, "role_v2 commit failed after REL write, dangling relationships tolerated");
            return Err(EngineError::from(e));
        }

        let relationships: Vec<Relationship> = updates.into_iter().map(|u| u.relationship).collect();
        self.tokens.record_write(&relationships, &write_result.zed_token).await;

        Ok(row)
    }

    pub async fn get_role_v2(&self, id: uuid::Uuid) -> Result<Role, EngineError> {
        self.store.get_role(id).await.map_err(|e| match e {
            crate::store::StoreError::NotFound => EngineError::RoleNotFound(id.to_string()),
            other => EngineError::from(other),
        })
    }

    /// Owned roles on `resource`, plus roles inherited by walking
    /// `roleBindingMode.inheritPermissionsFrom` relations up the ownership
    /// chain. Cycle-safe: visits each resource id at most once.
    pub async fn list_roles_v2(&self, resource: &Resource) -> Result<Vec<(Role, bool)>, EngineError> {
        let mut out = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![(resource.clone(), false)];

        while let Some((current, inherited)) = frontier.pop() {
            if !visited.insert(current.id_string()) {
                continue;
            }
            let rows = self.store.list_roles(&current.id_string()).await?;
            out.extend(rows.into_iter().map(|r| (r, inherited)));

            if let Some(rt) = self.policy.type_by_name(&current.type_name) {
                if let Some(mode) = &rt.role_binding_mode {
                    for relation in &mode.inherit_permissions_from {
                        let filter = RelationshipFilter::for_resource(&current.to_object_ref(&self.namespace));
                        let rels = self.rel.read_relationships(&filter).await?;
                        for rel in rels.into_iter().filter(|r| &r.relation == relation) {
                            if let Ok(parsed) = PrefixedId::parse(&rel.subject.object.object_id) {
                                if let Ok(parent) = Resource::from_id(&self.policy, parsed) {
                                    frontier.push((parent, true));
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    async fn current_role_v2_actions(&self, role: &Resource) -> Result<Vec<String>, EngineError> {
        let filter = RelationshipFilter::for_resource(&role.to_object_ref(&self.namespace));
        let all = self.rel.read_relationships(&filter).await?;
        let mut actions: Vec<String> = all
            .into_iter()
            .filter(|r| r.relation.ends_with("_rel"))
            .map(|r| r.relation.trim_end_matches("_rel").to_string())
            .collect();
        actions.sort();
        actions.dedup();
        Ok(actions)
    }

    pub async fn update_role_v2(
        &self,
        actor: &str,
        id: uuid::Uuid,
        new_name: Option<&str>,
        new_actions: Option<&[String]>,
    ) -> Result<Role, EngineError> {
        let role = self.role_v2_resource(id)?;
        let new_name = new_name.filter(|n| !n.is_empty());

        let (to_add, to_remove) = match new_actions {
            Some(actions) => {
                self.validate_v2_actions(actions)?;
                let current = self.current_role_v2_actions(&role).await?;
                diff(&current, actions)
            }
            None => (Vec::new(), Vec::new()),
        };

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

        let add_updates = self.action_wildcard_updates(&role, &to_add, Operation::Touch)?;
        let remove_updates = self.action_wildcard_updates(&role, &to_remove, Operation::Delete)?;
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

    /// Fails `DeleteRoleInUse` if any role-binding still references this
    /// role (a `role_binding#role@role` edge exists).
    pub async fn delete_role_v2(&self, owner: &Resource, id: uuid::Uuid) -> Result<(), EngineError> {
        let role = self.role_v2_resource(id)?;
        let rbac = self
            .policy
            .rbac()
            .ok_or_else(|| EngineError::InvalidArgument("policy has no rbac block".to_string()))?;

        let in_use_filter = RelationshipFilter {
            resource_type: Some(rbac.role_binding_resource.clone()),
            resource_id: None,
            relation: Some("role".to_string()),
            subject_type: Some(role.type_name.clone()),
            subject_id: Some(role.id_string()),
            subject_relation: None,
        };
        let in_use = self.rel.read_relationships(&in_use_filter).await?;
        if !in_use.is_empty() {
            return Err(EngineError::DeleteRoleInUse(id.to_string()));
        }

        let current_actions = self.current_role_v2_actions(&role).await?;
        let mut deletes = self.action_wildcard_updates(&role, &current_actions, Operation::Delete)?;
        deletes.push(self.owner_update(&role, owner, Operation::Delete));

        let mut ctx = self.store.begin().await?;
        if let Err(e) = self.store.delete_role(&mut ctx, id).await {
            ctx.rollback().await.ok();
            return Err(match e {
                crate::store::StoreError::NotFound => EngineError::RoleNotFound(id.to_string()),
                other => EngineError::from(other),
            });
        }

        if let Err(e) = self.rel.write_relationships(&deletes).await {
            ctx.rollback().await.ok();
            return Err(EngineError::from(e));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;
    use crate::policy::Policy;

    fn engine() -> Engine {
        test_engine(Policy::default_policy().unwrap())
    }

    #[test]
    fn wildcard_subject_plain_type() {
        let e = engine();
        let subject = e.wildcard_subject("user");
        assert_eq!(subject.object.object_type, "user");
        assert_eq!(subject.object.object_id, WILDCARD);
        assert!(subject.relation.is_none());
    }

    #[test]
    fn wildcard_subject_with_relation() {
        let e = engine();
        let subject = e.wildcard_subject("group#member");
        assert_eq!(subject.object.object_type, "group");
        assert_eq!(subject.object.object_id, WILDCARD);
        assert_eq!(subject.relation.as_deref(), Some("member"));
    }

    #[test]
    fn action_wildcard_updates_count_matches_invariant() {
        let e = engine();
        let rbac = e.policy.rbac().unwrap();
        let role = e.role_v2_resource(uuid::Uuid::new_v4()).unwrap();
        let actions = vec!["loadbalancer_get".to_string(), "loadbalancer_update".to_string()];
        let updates = e.action_wildcard_updates(&role, &actions, Operation::Touch).unwrap();
        assert_eq!(updates.len(), actions.len() * rbac.role_subject_types.len());
    }

    #[test]
    fn validate_v2_actions_rejects_unknown_action() {
        let e = engine();
        let err = e.validate_v2_actions(&["no_such_action".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(a) if a == "no_such_action"));
    }

    #[test]
    fn validate_v2_actions_accepts_known_action() {
        let e = engine();
        e.validate_v2_actions(&["loadbalancer_get".to_string()]).unwrap();
    }

    #[test]
    fn validate_role_owner_rejects_non_owner_type() {
        let e = engine();
        let user = Resource::from_id_string(&e.policy, "idntusr-abc").unwrap();
        let err = e.validate_role_owner(&user).unwrap_err();
        assert!(matches!(err, EngineError::ResourceDoesNotSupportRoleBindingV2(_)));
    }

    #[test]
    fn validate_role_owner_accepts_tenant() {
        let e = engine();
        let tenant = Resource::from_id_string(&e.policy, "tnntten-root").unwrap();
        e.validate_role_owner(&tenant).unwrap();
    }
}
