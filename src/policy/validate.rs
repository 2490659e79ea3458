//! Two-phase policy validation: union expansion, then referential integrity.

use super::model::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("duplicate resource type {0:?}")]
    DuplicateResourceType(String),
    #[error("duplicate union {0:?}")]
    DuplicateUnion(String),
    #[error("duplicate action {0:?}")]
    DuplicateAction(String),
    #[error("duplicate id prefix {prefix:?} used by both {first:?} and {second:?}")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },
    #[error("action binding for (type={type_name:?}, action={action:?}) is declared more than once")]
    DuplicateActionBinding { type_name: String, action: String },
    #[error("union {0:?} references unknown member {1:?}")]
    UnknownUnionMember(String, String),
    #[error("union membership graph has a cycle through {0:?}")]
    UnionCycle(String),
    #[error("relationship {relation:?} on type {type_name:?} targets unknown type {target:?}")]
    UnknownRelationshipTarget {
        type_name: String,
        relation: String,
        target: String,
    },
    #[error("action binding on type {type_name:?} references unknown action {action:?}")]
    UnknownAction { type_name: String, action: String },
    #[error("action binding targets unknown type {0:?}")]
    UnknownBindingType(String),
    #[error(
        "RelationshipAction condition on type {type_name:?} references relation {relation:?} \
         which is not declared on that type"
    )]
    UnknownRelationActionRelation { type_name: String, relation: String },
    #[error(
        "RelationshipAction condition on type {type_name:?} via relation {relation:?} requires \
         action {action:?} to be bound on target type {target:?}, but it is not"
    )]
    RelationActionNotBoundOnTarget {
        type_name: String,
        relation: String,
        action: String,
        target: String,
    },
    #[error("rbac block references unknown type {0:?}")]
    UnknownRbacType(String),
}

/// Merges an ordered sequence of documents (lists concatenate; any duplicate
/// within a merged list is fatal) and runs the two validation phases.
pub fn merge_and_validate(docs: &[PolicyDocument]) -> Result<Schema, PolicyError> {
    let merged = merge(docs)?;
    let expanded = expand_unions(&merged)?;
    check_integrity(&expanded)?;
    Ok(expanded)
}

struct Merged {
    resource_types: Vec<ResourceTypeDoc>,
    unions: Vec<UnionDoc>,
    actions: Vec<ActionDoc>,
    action_bindings: Vec<ActionBindingDoc>,
    rbac: Option<RbacDoc>,
}

fn merge(docs: &[PolicyDocument]) -> Result<Merged, PolicyError> {
    let mut resource_types = Vec::new();
    let mut seen_types = HashSet::new();
    let mut unions = Vec::new();
    let mut seen_unions = HashSet::new();
    let mut actions = Vec::new();
    let mut seen_actions = HashSet::new();
    let mut action_bindings = Vec::new();
    let mut seen_prefixes: HashMap<String, String> = HashMap::new();
    let mut rbac = None;

    for doc in docs {
        for rt in &doc.resource_types {
            if !seen_types.insert(rt.name.clone()) {
                return Err(PolicyError::DuplicateResourceType(rt.name.clone()));
            }
            if let Some(first) = seen_prefixes.insert(rt.id_prefix.clone(), rt.name.clone()) {
                return Err(PolicyError::DuplicatePrefix {
                    prefix: rt.id_prefix.clone(),
                    first,
                    second: rt.name.clone(),
                });
            }
            resource_types.push(rt.clone());
        }
        for u in &doc.unions {
            if !seen_unions.insert(u.name.clone()) {
                return Err(PolicyError::DuplicateUnion(u.name.clone()));
            }
            unions.push(u.clone());
        }
        for a in &doc.actions {
            if !seen_actions.insert(a.name.clone()) {
                return Err(PolicyError::DuplicateAction(a.name.clone()));
            }
            actions.push(a.clone());
        }
        action_bindings.extend(doc.action_bindings.iter().cloned());
        if let Some(r) = &doc.rbac {
            // Later documents override; the spec doesn't say rbac blocks
            // concatenate (there's exactly one rbac block per deployment).
            rbac = Some(r.clone());
        }
    }

    Ok(Merged {
        resource_types,
        unions,
        actions,
        action_bindings,
        rbac,
    })
}

fn expand_unions(merged: &Merged) -> Result<Schema, PolicyError> {
    let type_names: HashSet<&str> = merged.resource_types.iter().map(|t| t.name.as_str()).collect();
    let unions_by_name: HashMap<&str, &UnionDoc> =
        merged.unions.iter().map(|u| (u.name.as_str(), u)).collect();

    // Expand every union (recursively, detecting cycles) into the flat set
    // of resource-type names / subject-relation refs it denotes.
    let mut memo: HashMap<String, Vec<String>> = HashMap::new();
    for u in &merged.unions {
        expand_union_member(&u.name, &unions_by_name, &type_names, &mut memo, &mut Vec::new())?;
    }

    let mut resource_types = BTreeMap::new();
    for rt in &merged.resource_types {
        let relationships = rt
            .relationships
            .iter()
            .map(|r| expand_relationship(r, &unions_by_name, &type_names, &memo))
            .collect::<Result<Vec<_>, _>>()?;
        resource_types.insert(
            rt.name.clone(),
            ResourceType {
                name: rt.name.clone(),
                id_prefix: rt.id_prefix.clone(),
                relationships,
                actions: Vec::new(), // populated below from action bindings
                role_binding_mode: rt.role_binding_mode.as_ref().map(|m| RoleBindingMode {
                    inherit_permissions_from: m.inherit_permissions_from.clone(),
                }),
            },
        );
    }

    let mut action_bindings: BTreeMap<(String, String), ActionBinding> = BTreeMap::new();
    for binding in &merged.action_bindings {
        let members = expand_binding_type(&binding.r#type, &unions_by_name, &type_names, &memo)?;
        let conditions = binding
            .conditions
            .iter()
            .map(to_condition)
            .collect::<Vec<_>>();
        for member in members {
            let key = (member.clone(), binding.action.clone());
            if action_bindings.contains_key(&key) {
                return Err(PolicyError::DuplicateActionBinding {
                    type_name: member,
                    action: binding.action.clone(),
                });
            }
            action_bindings.insert(
                key,
                ActionBinding {
                    action: binding.action.clone(),
                    type_name: member,
                    conditions: conditions.clone(),
                },
            );
        }
    }

    for ((type_name, action), _) in &action_bindings {
        if let Some(rt) = resource_types.get_mut(type_name) {
            if !rt.actions.contains(action) {
                rt.actions.push(action.clone());
            }
        }
    }
    for rt in resource_types.values_mut() {
        rt.actions.sort();
    }

    let rbac = merged.rbac.as_ref().map(|r| Rbac {
        role_resource: r.role_resource.clone(),
        role_binding_resource: r.role_binding_resource.clone(),
        role_owners: r.role_owners.clone(),
        role_subject_types: r.role_subject_types.clone(),
        role_binding_subjects: r.role_binding_subjects.clone(),
    });

    Ok(Schema {
        resource_types,
        action_bindings,
        rbac,
    })
}

/// Recursively resolves a union name to the flat list of leaf members
/// (resource type names, or `Type#relation` subject-relation references).
/// `path` tracks the in-progress expansion stack for cycle detection.
fn expand_union_member<'a>(
    name: &str,
    unions: &HashMap<&'a str, &'a UnionDoc>,
    type_names: &HashSet<&str>,
    memo: &mut HashMap<String, Vec<String>>,
    path: &mut Vec<String>,
) -> Result<Vec<String>, PolicyError> {
    if let Some(cached) = memo.get(name) {
        return Ok(cached.clone());
    }
    if path.contains(&name.to_string()) {
        return Err(PolicyError::UnionCycle(name.to_string()));
    }
    let Some(union) = unions.get(name) else {
        // Not a union; must be resolved at the use site (could be a plain type).
        return Ok(vec![name.to_string()]);
    };

    path.push(name.to_string());
    let mut out = Vec::new();
    for member in &union.members {
        let base = member.split('#').next().unwrap_or(member);
        if unions.contains_key(base) {
            let expanded = expand_union_member(base, unions, type_names, memo, path)?;
            out.extend(expanded);
        } else if type_names.contains(base) {
            out.push(member.clone());
        } else {
            return Err(PolicyError::UnknownUnionMember(
                name.to_string(),
                member.clone(),
            ));
        }
    }
    path.pop();
    out.sort();
    out.dedup();
    memo.insert(name.to_string(), out.clone());
    Ok(out)
}

fn expand_relationship(
    rel: &RelationshipDoc,
    unions: &HashMap<&str, &UnionDoc>,
    type_names: &HashSet<&str>,
    memo: &HashMap<String, Vec<String>>,
) -> Result<Relationship, PolicyError> {
    let mut target_types = Vec::new();
    for target in &rel.target_types {
        if let Some(members) = memo.get(&target.type_name) {
            for member in members {
                target_types.push(parse_target_member(member));
            }
        } else if type_names.contains(target.type_name.as_str()) {
            target_types.push(TargetType {
                type_name: target.type_name.clone(),
                subject_relation: target.subject_relation.clone(),
            });
        } else if unions.contains_key(target.type_name.as_str()) {
            // Union declared but not yet memoized (shouldn't happen given
            // the pre-pass above, but fall through defensively).
            return Err(PolicyError::UnknownUnionMember(
                target.type_name.clone(),
                target.type_name.clone(),
            ));
        } else {
            return Err(PolicyError::UnknownRelationshipTarget {
                type_name: String::new(),
                relation: rel.relation.clone(),
                target: target.type_name.clone(),
            });
        }
    }
    target_types.sort();
    target_types.dedup();
    Ok(Relationship {
        relation: rel.relation.clone(),
        target_types,
    })
}

fn parse_target_member(member: &str) -> TargetType {
    match member.split_once('#') {
        Some((type_name, relation)) => TargetType {
            type_name: type_name.to_string(),
            subject_relation: Some(relation.to_string()),
        },
        None => TargetType {
            type_name: member.to_string(),
            subject_relation: None,
        },
    }
}

fn expand_binding_type(
    type_ref: &str,
    unions: &HashMap<&str, &UnionDoc>,
    type_names: &HashSet<&str>,
    memo: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, PolicyError> {
    if type_names.contains(type_ref) {
        return Ok(vec![type_ref.to_string()]);
    }
    if let Some(members) = memo.get(type_ref) {
        return Ok(members
            .iter()
            .map(|m| m.split('#').next().unwrap_or(m).to_string())
            .collect());
    }
    if unions.contains_key(type_ref) {
        return Err(PolicyError::UnknownUnionMember(
            type_ref.to_string(),
            type_ref.to_string(),
        ));
    }
    Err(PolicyError::UnknownBindingType(type_ref.to_string()))
}

fn to_condition(doc: &ConditionDoc) -> Condition {
    match doc {
        ConditionDoc::RoleBinding => Condition::RoleBinding,
        ConditionDoc::RoleBindingV2 => Condition::RoleBindingV2,
        ConditionDoc::RelationshipAction { relation, action } => Condition::RelationshipAction {
            relation: relation.clone(),
            action: action.clone(),
        },
    }
}

fn check_integrity(schema: &Schema) -> Result<(), PolicyError> {
    for rt in schema.resource_types.values() {
        for rel in &rt.relationships {
            for target in &rel.target_types {
                if !schema.resource_types.contains_key(&target.type_name) {
                    return Err(PolicyError::UnknownRelationshipTarget {
                        type_name: rt.name.clone(),
                        relation: rel.relation.clone(),
                        target: target.type_name.clone(),
                    });
                }
            }
        }
    }

    for ((type_name, _action), binding) in &schema.action_bindings {
        if !schema.resource_types.contains_key(type_name) {
            return Err(PolicyError::UnknownBindingType(type_name.clone()));
        }
        for condition in &binding.conditions {
            if let Condition::RelationshipAction { relation, action: inner_action } = condition {
                let rt = schema.resource_types.get(type_name).expect("checked above");
                let Some(rel_decl) = rt.relationship(relation) else {
                    return Err(PolicyError::UnknownRelationActionRelation {
                        type_name: type_name.clone(),
                        relation: relation.clone(),
                    });
                };
                for target in &rel_decl.target_types {
                    let bound = schema
                        .action_bindings
                        .contains_key(&(target.type_name.clone(), inner_action.clone()));
                    if !bound {
                        return Err(PolicyError::RelationActionNotBoundOnTarget {
                            type_name: type_name.clone(),
                            relation: relation.clone(),
                            action: inner_action.clone(),
                            target: target.type_name.clone(),
                        });
                    }
                }
            }
        }
    }

    if let Some(rbac) = &schema.rbac {
        for type_name in rbac
            .role_owners
            .iter()
            .chain(rbac.role_subject_types.iter())
            .chain(rbac.role_binding_subjects.iter())
        {
            let base = type_name.split('#').next().unwrap_or(type_name);
            if !schema.resource_types.contains_key(base) {
                return Err(PolicyError::UnknownRbacType(type_name.clone()));
            }
        }
    }

    Ok(())
}
