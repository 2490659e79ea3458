use crate::ident::IdentifierError;
use crate::policy::PolicyError;
use crate::rel::RelError;
use crate::store::StoreError;
use thiserror::Error;

/// The engine's domain error taxonomy (§7). Every fallible engine operation
/// returns this type; nothing above the engine ever sees a raw `sqlx::Error`
/// or `reqwest::Error`. Wrapping adds context but never changes the kind a
/// caller matches on.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown resource id prefix in {0:?}")]
    InvalidNamespace(String),
    #[error("unknown resource type {0:?}")]
    InvalidType(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("relationship {relation:?} is not valid from {resource_type} to {subject_type}")]
    InvalidRelationship {
        relation: String,
        resource_type: String,
        subject_type: String,
    },

    #[error("role {0} not found")]
    RoleNotFound(String),
    #[error("role {name:?} already exists on {resource_id}")]
    RoleAlreadyExists { name: String, resource_id: String },
    #[error("role name {name:?} is already taken on {resource_id}")]
    RoleNameTaken { name: String, resource_id: String },
    #[error("resource {0} already has the maximum number of roles")]
    RoleHasTooManyResources(String),
    #[error("role {0} cannot be deleted while role-bindings reference it")]
    DeleteRoleInUse(String),

    #[error("role-binding {0} not found")]
    RoleBindingNotFound(String),
    #[error("subject type {subject_type:?} is not valid for role-bindings on {resource_type:?}")]
    InvalidRoleBindingSubjectType {
        subject_type: String,
        resource_type: String,
    },
    #[error("resource {0} does not support v2 role-bindings")]
    ResourceDoesNotSupportRoleBindingV2(String),
    #[error("a role-binding must have at least one subject")]
    CreateRoleBindingWithNoSubjects,

    #[error("action {action:?} is not assigned to {subject} on {resource}")]
    ActionNotAssigned {
        subject: String,
        action: String,
        resource: String,
    },
    #[error("action {0:?} is not a valid action in the active policy")]
    InvalidAction(String),

    #[error("scope not assigned")]
    ScopeNotAssigned,

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("REL error: {0}")]
    Rel(#[from] RelError),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::RoleNotFound(_)
                | EngineError::RoleBindingNotFound(_)
                | EngineError::Store(StoreError::NotFound)
                | EngineError::Rel(RelError::NotFound)
        )
    }
}
