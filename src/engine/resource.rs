use crate::engine::EngineError;
use crate::ident::PrefixedId;
use crate::policy::Policy;
use crate::rel::types::ObjectRef;

/// A resource resolved against the active policy: its prefixed id plus the
/// resource type the prefix maps to.
#[derive(Debug, Clone)]
pub struct Resource {
    pub type_name: String,
    pub id: PrefixedId,
}

impl Resource {
    pub fn from_id(policy: &Policy, id: PrefixedId) -> Result<Self, EngineError> {
        let rt = policy
            .type_for_prefix(&id.prefix)
            .ok_or_else(|| EngineError::InvalidNamespace(id.as_string()))?;
        Ok(Self {
            type_name: rt.name.clone(),
            id,
        })
    }

    pub fn from_id_string(policy: &Policy, s: &str) -> Result<Self, EngineError> {
        let id = PrefixedId::parse(s).map_err(|_| EngineError::InvalidNamespace(s.to_string()))?;
        Self::from_id(policy, id)
    }

    pub fn id_string(&self) -> String {
        self.id.as_string()
    }

    pub fn to_object_ref(&self, namespace: &str) -> ObjectRef {
        ObjectRef::new(namespace, self.type_name.clone(), self.id.as_string())
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
