use std::collections::HashSet;
use std::hash::Hash;

/// Set-difference diff: returns `(to_add, to_remove)` such that
/// `(current ∪ to_add) \ to_remove = incoming` and `to_add ∩ to_remove = ∅`.
/// Duplicates on either side are collapsed by construction (both inputs and
/// outputs are sets).
pub fn diff<T>(current: &[T], incoming: &[T]) -> (Vec<T>, Vec<T>)
where
    T: Eq + Hash + Clone,
{
    let current_set: HashSet<&T> = current.iter().collect();
    let incoming_set: HashSet<&T> = incoming.iter().collect();

    let to_add: Vec<T> = incoming_set
        .difference(&current_set)
        .map(|v| (*v).clone())
        .collect();
    let to_remove: Vec<T> = current_set
        .difference(&incoming_set)
        .map(|v| (*v).clone())
        .collect();

    (to_add, to_remove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn diff_satisfies_set_identity() {
        let current = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let incoming = vec!["b".to_string(), "c".to_string(), "d".to_string()];

        let (to_add, to_remove) = diff(&current, &incoming);

        let mut result: HashSet<String> = current.iter().cloned().collect();
        for a in &to_add {
            result.insert(a.clone());
        }
        for r in &to_remove {
            result.remove(r);
        }
        let expected: HashSet<String> = incoming.iter().cloned().collect();
        assert_eq!(result, expected);

        let add_set: HashSet<&String> = to_add.iter().collect();
        let remove_set: HashSet<&String> = to_remove.iter().collect();
        assert!(add_set.is_disjoint(&remove_set));
    }

    #[test]
    fn no_op_on_identical_sets() {
        let current = vec![1, 2, 3];
        let incoming = vec![3, 2, 1];
        let (to_add, to_remove) = diff(&current, &incoming);
        assert!(to_add.is_empty());
        assert!(to_remove.is_empty());
    }

    #[test]
    fn duplicates_collapse() {
        let current = vec![1, 1, 2];
        let incoming = vec![2, 2, 3];
        let (mut to_add, mut to_remove) = diff(&current, &incoming);
        to_add.sort();
        to_remove.sort();
        assert_eq!(to_add, vec![3]);
        assert_eq!(to_remove, vec![1]);
    }
}
