//! Prefixed resource identifiers.
//!
//! Every object in the system is addressed by a short prefix (which determines
//! its [`ResourceType`](crate::policy::ResourceType)) plus an opaque suffix, e.g.
//! `tnntten-root` or `idntusr-u1`. This module only knows how to split/join that
//! shape and mint fresh suffixes; resolving a prefix to a declared resource type
//! is the policy's job (see [`crate::policy::Policy::type_for_prefix`]).

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier {0:?} has no prefix separator")]
    MissingSeparator(String),
    #[error("identifier {0:?} has an empty prefix or suffix")]
    EmptyPart(String),
}

/// A parsed `<prefix>-<suffix>` identifier. Carries no opinion about whether
/// the prefix is registered in any particular policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefixedId {
    pub prefix: String,
    pub suffix: String,
}

impl PrefixedId {
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let (prefix, suffix) = s
            .split_once('-')
            .ok_or_else(|| IdentifierError::MissingSeparator(s.to_string()))?;
        if prefix.is_empty() || suffix.is_empty() {
            return Err(IdentifierError::EmptyPart(s.to_string()));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    pub fn as_string(&self) -> String {
        format!("{}-{}", self.prefix, self.suffix)
    }

    /// Mints a fresh id under `prefix`. The suffix is a lowercase, hyphen-free
    /// encoding of a v4 UUID — opaque by contract, not a format callers should
    /// depend on.
    pub fn generate(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            suffix: Uuid::new_v4().simple().to_string(),
        }
    }
}

impl std::fmt::Display for PrefixedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.prefix, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_and_suffix() {
        let id = PrefixedId::parse("tnntten-root").unwrap();
        assert_eq!(id.prefix, "tnntten");
        assert_eq!(id.suffix, "root");
        assert_eq!(id.as_string(), "tnntten-root");
    }

    #[test]
    fn rejects_missing_separator() {
        assert_eq!(
            PrefixedId::parse("nosep"),
            Err(IdentifierError::MissingSeparator("nosep".to_string()))
        );
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(PrefixedId::parse("-suffix").is_err());
        assert!(PrefixedId::parse("prefix-").is_err());
    }

    #[test]
    fn generate_round_trips() {
        let id = PrefixedId::generate("idntusr");
        let reparsed = PrefixedId::parse(&id.as_string()).unwrap();
        assert_eq!(id, reparsed);
    }
}
