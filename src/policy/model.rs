//! Wire shape of a policy document (what `serde_yaml` parses) and the
//! validated, union-free shape the rest of the system consumes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Document shape (one per file; several are merged into a Policy).
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub resource_types: Vec<ResourceTypeDoc>,
    pub unions: Vec<UnionDoc>,
    pub actions: Vec<ActionDoc>,
    pub action_bindings: Vec<ActionBindingDoc>,
    pub rbac: Option<RbacDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTypeDoc {
    pub name: String,
    pub id_prefix: String,
    #[serde(default)]
    pub relationships: Vec<RelationshipDoc>,
    #[serde(default)]
    pub role_binding_mode: Option<RoleBindingModeDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDoc {
    pub relation: String,
    pub target_types: Vec<TargetTypeDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetTypeDoc {
    /// Name of a resource type *or* a union, resolved during expansion.
    pub type_name: String,
    #[serde(default)]
    pub subject_relation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBindingModeDoc {
    /// Relations (e.g. `parent`, `owner`) that this type inherits
    /// role-binding-derived permissions from.
    pub inherit_permissions_from: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDoc {
    pub name: String,
    /// Each member is either a resource type name, another union name, or
    /// `Type#relation` to reference a subject-relation.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDoc {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBindingDoc {
    pub action: String,
    /// Resource type or union this binding applies to; unions fan out to one
    /// binding per member during expansion.
    pub r#type: String,
    pub conditions: Vec<ConditionDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionDoc {
    RoleBinding,
    RoleBindingV2,
    RelationshipAction { relation: String, action: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacDoc {
    pub role_resource: String,
    pub role_binding_resource: String,
    pub role_owners: Vec<String>,
    pub role_subject_types: Vec<String>,
    pub role_binding_subjects: Vec<String>,
}

// ---------------------------------------------------------------------------
// Validated, union-free shape.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TargetType {
    pub type_name: String,
    pub subject_relation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub relation: String,
    pub target_types: Vec<TargetType>,
}

#[derive(Debug, Clone)]
pub struct RoleBindingMode {
    pub inherit_permissions_from: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResourceType {
    pub name: String,
    pub id_prefix: String,
    pub relationships: Vec<Relationship>,
    pub actions: Vec<String>,
    pub role_binding_mode: Option<RoleBindingMode>,
}

impl ResourceType {
    pub fn relationship(&self, relation: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.relation == relation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    RoleBinding,
    RoleBindingV2,
    RelationshipAction { relation: String, action: String },
}

#[derive(Debug, Clone)]
pub struct ActionBinding {
    pub action: String,
    pub type_name: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
pub struct Rbac {
    pub role_resource: String,
    pub role_binding_resource: String,
    pub role_owners: Vec<String>,
    pub role_subject_types: Vec<String>,
    pub role_binding_subjects: Vec<String>,
}

/// The validated, expansion-complete policy schema. `BTreeMap` gives the
/// schema compiler deterministic iteration for free without dragging in an
/// ordered-map crate the rest of the fleet doesn't use.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub resource_types: BTreeMap<String, ResourceType>,
    /// Keyed by `(type_name, action)`; expansion guarantees uniqueness.
    pub action_bindings: BTreeMap<(String, String), ActionBinding>,
    pub rbac: Option<Rbac>,
}
