//! Permission-scoped views over the unit tree.
//!
//! The system administrator sees every unit, a sub-admin sees their own unit
//! and its descendants, everybody else sees nothing. Every traversal tracks the
//! ids it has visited and fails with [`AppError::CorruptHierarchy`] when a
//! parent chain loops back on itself.

use std::collections::{HashMap, HashSet};

use crate::errors::AppError;
use crate::models::unit::{Unit, UnitNode};
use crate::models::user::User;

fn children_index(units: &[Unit]) -> HashMap<&str, Vec<&str>> {
    let mut index: HashMap<&str, Vec<&str>> = HashMap::new();
    for unit in units {
        if let Some(parent_id) = unit.parent_id.as_deref() {
            index.entry(parent_id).or_default().push(unit.id.as_str());
        }
    }
    index
}

fn corrupt(unit_id: &str) -> AppError {
    log::error!("Unit hierarchy contains a cycle through {}", unit_id);
    AppError::CorruptHierarchy(format!("Unit {} appears twice in its own subtree", unit_id))
}

/// Ids of all units below `root_id`, excluding `root_id` itself.
pub fn descendants(root_id: &str, units: &[Unit]) -> Result<HashSet<String>, AppError> {
    let index = children_index(units);
    let mut visited: HashSet<&str> = HashSet::from([root_id]);
    let mut found = HashSet::new();
    let mut stack = vec![root_id];

    while let Some(current) = stack.pop() {
        for &child in index.get(current).into_iter().flatten() {
            if !visited.insert(child) {
                return Err(corrupt(child));
            }
            found.insert(child.to_string());
            stack.push(child);
        }
    }

    Ok(found)
}

/// Walks every parent chain and fails on the first loop. Dangling parents are tolerated.
pub fn validate_forest(units: &[Unit]) -> Result<(), AppError> {
    let parents: HashMap<&str, Option<&str>> = units
        .iter()
        .map(|unit| (unit.id.as_str(), unit.parent_id.as_deref()))
        .collect();

    for unit in units {
        let mut seen: HashSet<&str> = HashSet::from([unit.id.as_str()]);
        let mut cursor = unit.parent_id.as_deref();
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                return Err(corrupt(parent));
            }
            cursor = parents.get(parent).copied().flatten();
        }
    }

    Ok(())
}

pub fn is_descendant(ancestor_id: &str, candidate: &str, units: &[Unit]) -> Result<bool, AppError> {
    Ok(descendants(ancestor_id, units)?.contains(candidate))
}

pub fn visible_unit_ids(units: &[Unit], user: &User) -> Result<HashSet<String>, AppError> {
    if user.is_system_admin() {
        return Ok(units.iter().map(|unit| unit.id.clone()).collect());
    }
    if !user.can_manage_users || !units.iter().any(|unit| unit.id == user.unit_id) {
        return Ok(HashSet::new());
    }

    let mut ids = descendants(&user.unit_id, units)?;
    ids.insert(user.unit_id.clone());
    Ok(ids)
}

pub fn visible_units<'a>(units: &'a [Unit], user: &User) -> Result<Vec<&'a Unit>, AppError> {
    let ids = visible_unit_ids(units, user)?;
    Ok(units.iter().filter(|unit| ids.contains(&unit.id)).collect())
}

pub fn visible_users<'a>(
    units: &[Unit],
    users: &'a [User],
    user: &User,
) -> Result<Vec<&'a User>, AppError> {
    let ids = visible_unit_ids(units, user)?;
    Ok(users.iter().filter(|u| ids.contains(&u.unit_id)).collect())
}

pub fn root_nodes<'a>(visible: &[&'a Unit], user: &User) -> Vec<&'a Unit> {
    if user.is_system_admin() {
        visible.iter().copied().filter(|unit| unit.is_root()).collect()
    } else {
        visible
            .iter()
            .copied()
            .filter(|unit| unit.id == user.unit_id)
            .collect()
    }
}

/// Nested view of the visible units, starting from [`root_nodes`].
pub fn build_tree(units: &[Unit], users: &[User], user: &User) -> Result<Vec<UnitNode>, AppError> {
    let visible = visible_units(units, user)?;

    let mut staff: HashMap<&str, usize> = HashMap::new();
    for u in users {
        *staff.entry(u.unit_id.as_str()).or_default() += 1;
    }

    let mut by_parent: HashMap<&str, Vec<&Unit>> = HashMap::new();
    for unit in visible.iter().copied() {
        if let Some(parent_id) = unit.parent_id.as_deref() {
            by_parent.entry(parent_id).or_default().push(unit);
        }
    }
    for children in by_parent.values_mut() {
        children.sort_by(|a, b| a.name.cmp(&b.name));
    }

    fn node(
        unit: &Unit,
        by_parent: &HashMap<&str, Vec<&Unit>>,
        staff: &HashMap<&str, usize>,
        path: &mut HashSet<String>,
    ) -> Result<UnitNode, AppError> {
        if !path.insert(unit.id.clone()) {
            return Err(corrupt(&unit.id));
        }
        let children = by_parent
            .get(unit.id.as_str())
            .into_iter()
            .flatten()
            .map(|child| node(child, by_parent, staff, path))
            .collect::<Result<Vec<_>, _>>()?;
        path.remove(&unit.id);

        Ok(UnitNode {
            unit: unit.clone(),
            staff_count: staff.get(unit.id.as_str()).copied().unwrap_or(0),
            children,
        })
    }

    let mut roots = root_nodes(&visible, user);
    roots.sort_by(|a, b| a.name.cmp(&b.name));

    let mut path = HashSet::new();
    roots
        .into_iter()
        .map(|root| node(root, &by_parent, &staff, &mut path))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn ids<'a>(units: impl IntoIterator<Item = &'a Unit>) -> Vec<&'a str> {
        let mut ids: Vec<&str> = units.into_iter().map(|u| u.id.as_str()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn descendants_stay_inside_subtree_and_exclude_root() {
        let units = branch();
        let mut found: Vec<String> = descendants("A", &units).unwrap().into_iter().collect();
        found.sort();
        assert_eq!(found, vec!["B", "C", "D"]);
        assert_eq!(descendants("B", &units).unwrap(), HashSet::from(["C".to_string()]));
        assert!(descendants("C", &units).unwrap().is_empty());
        assert!(descendants("missing", &units).unwrap().is_empty());
    }

    #[test]
    fn descendants_fail_on_cycles() {
        let units = vec![unit("A", Some("C"), 0), unit("B", Some("A"), 1), unit("C", Some("B"), 2)];
        assert!(matches!(descendants("A", &units), Err(AppError::CorruptHierarchy(_))));
        assert!(validate_forest(&units).is_err());
        assert!(validate_forest(&branch()).is_ok());
    }

    #[test]
    fn self_parented_unit_is_corrupt() {
        let units = vec![unit("A", Some("A"), 0)];
        assert!(descendants("A", &units).is_err());
        assert!(validate_forest(&units).is_err());
    }

    #[test]
    fn sub_admin_sees_own_subtree() {
        let units = branch();
        let sub_admin = user("s1", "B", true);

        let visible = visible_units(&units, &sub_admin).unwrap();
        assert_eq!(ids(visible.iter().copied()), vec!["B", "C"]);
        assert_eq!(ids(root_nodes(&visible, &sub_admin)), vec!["B"]);
    }

    #[test]
    fn system_admin_sees_everything_with_roots() {
        let units = branch();
        let admin = admin("A");

        let visible = visible_units(&units, &admin).unwrap();
        assert_eq!(visible.len(), units.len());
        assert_eq!(ids(root_nodes(&visible, &admin)), vec!["A", "E"]);
    }

    #[test]
    fn plain_user_sees_nothing() {
        let units = branch();
        let staff = user("u1", "A", false);
        assert!(visible_units(&units, &staff).unwrap().is_empty());
    }

    #[test]
    fn visible_users_match_scoped_units() {
        let units = branch();
        let users = vec![
            user("a", "A", false),
            user("b", "B", false),
            user("c", "C", false),
            user("d", "D", false),
        ];
        let sub_admin = user("s1", "B", true);

        let mut visible: Vec<&str> = visible_users(&units, &users, &sub_admin)
            .unwrap()
            .into_iter()
            .map(|u| u.id.as_str())
            .collect();
        visible.sort();
        assert_eq!(visible, vec!["b", "c"]);
    }

    #[test]
    fn sub_admin_of_deleted_unit_sees_empty_tree() {
        let units = vec![unit("A", None, 0), unit("C", Some("B"), 2)];
        let sub_admin = user("s1", "B", true);
        assert!(visible_units(&units, &sub_admin).unwrap().is_empty());
        assert!(build_tree(&units, &[], &sub_admin).unwrap().is_empty());
    }

    #[test]
    fn tree_nests_children_and_counts_staff() {
        let units = branch();
        let users = vec![user("b1", "B", false), user("b2", "B", false), user("c1", "C", false)];

        let tree = build_tree(&units, &users, &admin("A")).unwrap();
        assert_eq!(tree.len(), 2);
        let a = &tree[0];
        assert_eq!(a.unit.id, "A");
        assert_eq!(a.children.len(), 2);
        let b = &a.children[0];
        assert_eq!(b.unit.id, "B");
        assert_eq!(b.staff_count, 2);
        assert_eq!(b.children[0].unit.id, "C");
        assert_eq!(b.children[0].staff_count, 1);
    }
}
