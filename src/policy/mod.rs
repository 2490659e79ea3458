pub mod model;
pub mod validate;

use model::{Condition, PolicyDocument, ResourceType, Schema};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
pub use validate::PolicyError;

/// The canonical v2 policy document, embedded in the binary so a fresh
/// deployment has a working schema before any operator-supplied document
/// exists. See [`super::policy`] module docs for how it's loaded.
const DEFAULT_POLICY_YAML: &str = include_str!("../../policy_defaults/default.yaml");

#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("reading policy file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing policy file {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Validation(#[from] PolicyError),
}

/// An immutable, validated policy. Cheap to clone (wraps an `Arc`) so it can
/// be handed to every component that needs a read-only view of the schema.
#[derive(Debug, Clone)]
pub struct Policy {
    schema: Arc<Schema>,
    prefix_index: Arc<HashMap<String, String>>,
}

impl Policy {
    pub fn from_documents(docs: &[PolicyDocument]) -> Result<Self, PolicyError> {
        let schema = validate::merge_and_validate(docs)?;
        let prefix_index = schema
            .resource_types
            .values()
            .map(|rt| (rt.id_prefix.clone(), rt.name.clone()))
            .collect();
        Ok(Self {
            schema: Arc::new(schema),
            prefix_index: Arc::new(prefix_index),
        })
    }

    /// Loads the embedded canonical policy.
    pub fn default_policy() -> Result<Self, PolicyLoadError> {
        let doc: PolicyDocument =
            serde_yaml::from_str(DEFAULT_POLICY_YAML).expect("embedded default policy must parse");
        Ok(Self::from_documents(&[doc])?)
    }

    /// Loads from a path that is either a single YAML file or a directory of
    /// `*.yaml`/`*.yml` files (read in sorted filename order so merges are
    /// reproducible).
    pub fn load_path(path: &Path) -> Result<Self, PolicyLoadError> {
        let mut files: Vec<std::path::PathBuf> = if path.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(path)
                .map_err(|e| PolicyLoadError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
                .collect();
            entries.sort();
            entries
        } else {
            vec![path.to_path_buf()]
        };
        files.sort();

        let mut docs = Vec::new();
        for file in &files {
            let contents = std::fs::read_to_string(file).map_err(|e| PolicyLoadError::Io {
                path: file.display().to_string(),
                source: e,
            })?;
            let doc: PolicyDocument =
                serde_yaml::from_str(&contents).map_err(|e| PolicyLoadError::Parse {
                    path: file.display().to_string(),
                    source: e,
                })?;
            docs.push(doc);
        }
        Ok(Self::from_documents(&docs)?)
    }

    /// Loads the policy per configuration: the configured path if present,
    /// otherwise the embedded default.
    pub fn load(policy_path: Option<&str>) -> Result<Self, PolicyLoadError> {
        match policy_path {
            Some(p) => Self::load_path(Path::new(p)),
            None => Self::default_policy(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn type_by_name(&self, name: &str) -> Option<&ResourceType> {
        self.schema.resource_types.get(name)
    }

    pub fn type_for_prefix(&self, prefix: &str) -> Option<&ResourceType> {
        let name = self.prefix_index.get(prefix)?;
        self.schema.resource_types.get(name)
    }

    pub fn action_is_bound(&self, type_name: &str, action: &str) -> bool {
        self.schema
            .action_bindings
            .contains_key(&(type_name.to_string(), action.to_string()))
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.schema.resource_types.values()
    }

    /// Every action bound anywhere via `RoleBindingV2` — the vocabulary a v2
    /// role may grant, independent of which specific owner type declared it.
    pub fn v2_actions(&self) -> BTreeSet<String> {
        self.schema
            .action_bindings
            .values()
            .filter(|b| b.conditions.iter().any(|c| *c == Condition::RoleBindingV2))
            .map(|b| b.action.clone())
            .collect()
    }

    pub fn rbac(&self) -> Option<&model::Rbac> {
        self.schema.rbac.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_loads_and_validates() {
        let policy = Policy::default_policy().expect("default policy must be valid");
        assert!(policy.type_by_name("tenant").is_some());
        assert!(policy.type_for_prefix("loadbal").is_some());
        assert!(policy.action_is_bound("loadbalancer", "loadbalancer_get"));
        assert!(!policy.action_is_bound("loadbalancer", "loadbalancer_nonexistent"));
    }
}
