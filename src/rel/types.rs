use serde::{Deserialize, Serialize};

/// A REL object reference: `<namespace>/<type>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    pub fn as_wire(&self) -> String {
        format!("{}/{}:{}", self.namespace, self.object_type, self.object_id)
    }
}

/// The subject side of a tuple — an object, optionally qualified by a
/// subject-relation (e.g. `group:g1#member`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub object: ObjectRef,
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(object: ObjectRef) -> Self {
        Self { object, relation: None }
    }

    pub fn with_relation(object: ObjectRef, relation: impl Into<String>) -> Self {
        Self {
            object,
            relation: Some(relation.into()),
        }
    }
}

/// One relationship tuple: `resource#relation@subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub resource: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Touch,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    pub operation: Operation,
    pub relationship: Relationship,
}

/// A filter describing a set of tuples (any field left `None` is a
/// wildcard). Used by `delete_relationships` and `read_relationships`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
}

impl RelationshipFilter {
    pub fn for_resource(resource: &ObjectRef) -> Self {
        Self {
            resource_type: Some(resource.object_type.clone()),
            resource_id: Some(resource.object_id.clone()),
            ..Default::default()
        }
    }

    pub fn for_subject(subject: &ObjectRef) -> Self {
        Self {
            subject_type: Some(subject.object_type.clone()),
            subject_id: Some(subject.object_id.clone()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    MinimizeLatency,
    AtLeastAsFresh,
    FullyConsistent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub resource: ObjectRef,
    pub permission: String,
    pub subject: SubjectRef,
    pub consistency: Consistency,
    pub at_least_as_fresh_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    HasPermission,
    NoPermission,
}

impl Decision {
    pub fn allowed(self) -> bool {
        matches!(self, Decision::HasPermission)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub zed_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub decision: Decision,
    pub zed_token: String,
}
