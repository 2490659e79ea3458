//! Compiles a validated [`Policy`] into REL's text schema language.
//!
//! The emitter is intentionally a pile of `String` formatting rather than an
//! AST + pretty-printer: the output is small, line-oriented, and every piece
//! is sorted before being written so two runs over the same policy produce
//! byte-identical text (callers rely on that to decide whether a schema push
//! is even necessary).

use crate::policy::model::{Condition, Schema};
use crate::policy::Policy;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Compiles `policy` into REL schema text. Pure function of the policy;
/// never touches the network or any store.
pub fn compile(policy: &Policy) -> String {
    let schema = policy.schema();
    let v2_actions = all_v2_actions(schema);
    let role_owners: BTreeSet<&str> = schema
        .rbac
        .as_ref()
        .map(|r| r.role_owners.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let mut out = String::new();

    for rt in schema.resource_types.values() {
        // The two RBAC meta-types get bespoke bodies below; skip them here.
        if is_rbac_meta_type(schema, &rt.name) {
            continue;
        }
        write_resource_type(&mut out, schema, rt, &v2_actions, &role_owners);
    }

    if let Some(rbac) = &schema.rbac {
        write_role_type(&mut out, schema, rbac, &v2_actions);
        write_role_binding_type(&mut out, rbac, &v2_actions);
    }

    out
}

fn is_rbac_meta_type(schema: &Schema, type_name: &str) -> bool {
    match &schema.rbac {
        Some(r) => type_name == r.role_resource || type_name == r.role_binding_resource,
        None => false,
    }
}

fn all_v2_actions(schema: &Schema) -> BTreeSet<String> {
    schema
        .action_bindings
        .values()
        .filter(|b| b.conditions.iter().any(|c| *c == Condition::RoleBindingV2))
        .map(|b| b.action.clone())
        .collect()
}

fn write_resource_type(
    out: &mut String,
    schema: &Schema,
    rt: &crate::policy::model::ResourceType,
    v2_actions: &BTreeSet<String>,
    role_owners: &BTreeSet<&str>,
) {
    let _ = writeln!(out, "definition {} {{", rt.name);

    for rel in &rt.relationships {
        let _ = writeln!(out, "    relation {}: {}", rel.relation, format_targets(&rel.target_types));
    }

    let has_v1 = schema
        .action_bindings
        .values()
        .any(|b| b.type_name == rt.name && b.conditions.iter().any(|c| *c == Condition::RoleBinding));
    if has_v1 {
        if let Some(rbac) = &schema.rbac {
            // v1 actions are granted through the role's `subject` relation
            // rather than directly to a subject type: one tuple per action
            // links the resource to the role, and the role's own `subject`
            // tuples (written by assign_subject_role) determine who holds it.
            for action in direct_actions(schema, &rt.name, Condition::RoleBinding) {
                let _ = writeln!(out, "    relation {action}_rel: {}#subject", rbac.role_resource);
            }
        }
    }

    let is_owner = role_owners.contains(rt.name.as_str());
    if is_owner {
        if let Some(rbac) = &schema.rbac {
            let _ = writeln!(out, "    relation grant: {}", rbac.role_binding_resource);
        }
    }

    // Direct v1/RelationshipAction-bound actions.
    for action in direct_actions_all(schema, &rt.name) {
        if is_owner && v2_actions.contains(&action) {
            continue; // emitted in the unified v2 loop below
        }
        let expr = permission_expr(schema, &rt.name, &action, &[]);
        let _ = writeln!(out, "    permission {action} = {expr}");
    }

    if is_owner {
        for action in v2_actions {
            let inherited = rt
                .role_binding_mode
                .as_ref()
                .map(|m| m.inherit_permissions_from.as_slice())
                .unwrap_or(&[]);
            let expr = permission_expr(schema, &rt.name, action, inherited);
            let _ = writeln!(out, "    permission {action} = {expr}");
        }
    } else if let Some(mode) = &rt.role_binding_mode {
        // Bindable-but-not-owner types (e.g. loadbalancer) still chase
        // inherited permissions even though they have no `grant` relation
        // of their own.
        for action in direct_actions(schema, &rt.name, Condition::RoleBindingV2) {
            let expr = permission_expr(schema, &rt.name, &action, &mode.inherit_permissions_from);
            let _ = writeln!(out, "    permission {action} = {expr}");
        }
    }

    let _ = writeln!(out, "}}\n");
}

fn write_role_type(
    out: &mut String,
    schema: &Schema,
    rbac: &crate::policy::model::Rbac,
    v2_actions: &BTreeSet<String>,
) {
    let _ = writeln!(out, "definition {} {{", rbac.role_resource);
    let _ = writeln!(out, "    relation owner: {}", format_subject_targets(&rbac.role_owners));
    let _ = writeln!(
        out,
        "    relation subject: {}",
        format_subject_targets(&rbac.role_binding_subjects)
    );
    for action in v2_actions {
        let _ = writeln!(
            out,
            "    relation {action}_rel: {}",
            format_subject_targets(&rbac.role_subject_types)
        );
    }
    let _ = writeln!(out, "}}\n");
    let _ = schema;
}

fn write_role_binding_type(
    out: &mut String,
    rbac: &crate::policy::model::Rbac,
    v2_actions: &BTreeSet<String>,
) {
    let _ = writeln!(out, "definition {} {{", rbac.role_binding_resource);
    let _ = writeln!(out, "    relation role: {}", rbac.role_resource);
    let _ = writeln!(out, "    relation subject: {}", format_subject_targets(&rbac.role_binding_subjects));
    for action in v2_actions {
        let _ = writeln!(out, "    permission {action} = subject & role->{action}_rel");
    }
    let _ = writeln!(out, "}}\n");
}

/// Every action bound on `type_name` regardless of condition kind, sorted.
fn direct_actions_all(schema: &Schema, type_name: &str) -> BTreeSet<String> {
    schema
        .action_bindings
        .values()
        .filter(|b| b.type_name == type_name)
        .map(|b| b.action.clone())
        .collect()
}

fn direct_actions(schema: &Schema, type_name: &str, want: Condition) -> BTreeSet<String> {
    schema
        .action_bindings
        .values()
        .filter(|b| b.type_name == type_name && b.conditions.iter().any(|c| *c == want))
        .map(|b| b.action.clone())
        .collect()
}

/// Builds the right-hand side of `permission <action> = ...` for a directly
/// bound action, OR-ing in inheritance hops for role-owner/bindable types.
fn permission_expr(schema: &Schema, type_name: &str, action: &str, inherit_from: &[String]) -> String {
    let mut terms = BTreeSet::new();

    if let Some(binding) = schema
        .action_bindings
        .get(&(type_name.to_string(), action.to_string()))
    {
        for condition in &binding.conditions {
            match condition {
                Condition::RoleBinding => {
                    terms.insert(format!("{action}_rel"));
                }
                Condition::RoleBindingV2 => {
                    terms.insert("grant->".to_string() + action);
                }
                Condition::RelationshipAction { relation, action: inner } => {
                    terms.insert(format!("{relation}->{inner}"));
                }
            }
        }
    } else {
        // Action not directly bound here but the type is a role owner that
        // must still be able to grant it (see module docs).
        terms.insert("grant->".to_string() + action);
    }

    for rel in inherit_from {
        terms.insert(format!("{rel}->{action}"));
    }

    terms.into_iter().collect::<Vec<_>>().join(" + ")
}

fn format_targets(targets: &[crate::policy::model::TargetType]) -> String {
    let mut parts: Vec<String> = targets
        .iter()
        .map(|t| match &t.subject_relation {
            Some(r) => format!("{}#{}", t.type_name, r),
            None => t.type_name.clone(),
        })
        .collect();
    parts.sort();
    parts.join(" | ")
}

fn format_subject_targets(names: &[String]) -> String {
    let mut parts: Vec<String> = names
        .iter()
        .map(|n| match n.split_once('#') {
            Some((t, r)) => format!("{t}#{r}"),
            None => n.clone(),
        })
        .collect();
    parts.sort();
    parts.join(" | ")
}

/// Groups bindings by type for callers that want a structured view instead
/// of raw text (e.g. diagnostics tooling).
pub fn bindings_by_type(schema: &Schema) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for binding in schema.action_bindings.values() {
        out.entry(binding.type_name.clone()).or_default().push(binding.action.clone());
    }
    for actions in out.values_mut() {
        actions.sort();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;

    #[test]
    fn compiles_default_policy_deterministically() {
        let policy = Policy::default_policy().unwrap();
        let a = compile(&policy);
        let b = compile(&policy);
        assert_eq!(a, b, "schema compilation must be byte-for-byte reproducible");
        assert!(a.contains("definition tenant"));
        assert!(a.contains("definition loadbalancer"));
        assert!(a.contains("permission loadbalancer_get"));
    }

    #[test]
    fn loadbalancer_inherits_owner_permission() {
        let policy = Policy::default_policy().unwrap();
        let text = compile(&policy);
        let lb_def = text.split("definition loadbalancer {").nth(1).unwrap();
        let lb_body = lb_def.split("}").next().unwrap();
        assert!(lb_body.contains("permission loadbalancer_get = grant->loadbalancer_get + owner->loadbalancer_get"));
    }
}
