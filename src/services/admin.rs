//! Mutation rules of the admin console.
//!
//! Every function validates completely before touching `Entities`, so a
//! rejected mutation leaves the data set as it was. Persisting the returned
//! records is left to the caller.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;
use crate::hierarchy;
use crate::models::unit::Unit;
use crate::models::user::{Role, User, SYSTEM_ADMIN_CODE};
use crate::store::Entities;
use crate::utils::password::PasswordHasher;
use crate::utils::validation::{non_blank, require};

pub const UNIT_CODE_PREFIX: &str = "DV";
const UNIT_CODE_DIGITS: u32 = 6;
const MAX_CODE_ATTEMPTS: usize = 1_000;

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewUnit {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub manager_ids: Vec<String>,
    #[validate(length(max = 256))]
    #[serde(default)]
    pub address: Option<String>,
    #[validate(length(max = 32))]
    #[serde(default)]
    pub phone: Option<String>,
}

/// Partial unit update. `parentId: null` moves the unit to the root.
#[derive(Deserialize, Validate, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UnitUpdate {
    #[validate(length(min = 1, max = 128))]
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
    #[serde(default)]
    pub manager_ids: Option<Vec<String>>,
    #[validate(length(max = 256))]
    #[serde(default)]
    pub address: Option<String>,
    #[validate(length(max = 32))]
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[validate(length(max = 32))]
    #[serde(default)]
    pub hrm_code: Option<String>,
    #[validate(length(max = 128))]
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub title: Role,
    pub unit_id: String,
    #[validate(length(max = 64))]
    pub username: String,
    #[validate(length(max = 128))]
    pub password: String,
    #[serde(default)]
    pub can_manage_users: bool,
    #[validate(url)]
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[validate(length(max = 32))]
    #[serde(default)]
    pub hrm_code: Option<String>,
    #[validate(length(min = 1, max = 128))]
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub title: Option<Role>,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[validate(length(min = 1, max = 64))]
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub can_manage_users: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub avatar: Option<Option<String>>,
}

pub fn require_admin_scope(actor: &User) -> Result<(), AppError> {
    if actor.has_admin_scope() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Administrative rights required".to_string()))
    }
}

fn ensure_visible_unit(entities: &Entities, visible: &HashSet<String>, unit_id: &str) -> Result<(), AppError> {
    if entities.unit(unit_id).is_none() {
        return Err(AppError::NotFound(format!("Unit {} not found", unit_id)));
    }
    if !visible.contains(unit_id) {
        return Err(AppError::Forbidden(format!("Unit {} is outside your scope", unit_id)));
    }
    Ok(())
}

fn visible_user<'a>(entities: &'a Entities, visible: &HashSet<String>, user_id: &str) -> Result<&'a User, AppError> {
    let user = entities
        .user(user_id)
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
    if !visible.contains(&user.unit_id) {
        return Err(AppError::Forbidden(format!("User {} is outside your scope", user_id)));
    }
    Ok(user)
}

fn protect_system_admin(actor: &User, target: &User) -> Result<(), AppError> {
    if target.is_system_admin() && !actor.is_system_admin() {
        return Err(AppError::Forbidden(
            "Only the system administrator can manage that account".to_string(),
        ));
    }
    Ok(())
}

fn ensure_managers(entities: &Entities, visible: &HashSet<String>, manager_ids: &[String]) -> Result<(), AppError> {
    for id in manager_ids {
        visible_user(entities, visible, id)
            .map_err(|_| AppError::BadRequest(format!("Manager {} is not a visible user", id)))?;
    }
    Ok(())
}

fn is_reserved(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(SYSTEM_ADMIN_CODE)
}

fn username_taken(entities: &Entities, username: &str, except_id: Option<&str>) -> bool {
    entities
        .users
        .iter()
        .any(|user| user.username.eq_ignore_ascii_case(username) && Some(user.id.as_str()) != except_id)
}

fn hrm_code_taken(entities: &Entities, hrm_code: &str, except_id: Option<&str>) -> bool {
    entities
        .users
        .iter()
        .any(|user| user.hrm_code.eq_ignore_ascii_case(hrm_code) && Some(user.id.as_str()) != except_id)
}

/// `DV` followed by six random digits, regenerated until it collides with no existing unit.
pub fn generate_unit_code<R: Rng>(units: &[Unit], rng: &mut R) -> Result<String, AppError> {
    let upper = 10u32.pow(UNIT_CODE_DIGITS);
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = format!(
            "{}{:0width$}",
            UNIT_CODE_PREFIX,
            rng.gen_range(0..upper),
            width = UNIT_CODE_DIGITS as usize
        );
        if !units.iter().any(|unit| unit.id == code) {
            return Ok(code);
        }
    }
    Err(AppError::Conflict("Unable to allocate a free unit code".to_string()))
}

pub fn create_unit<R: Rng>(
    entities: &mut Entities,
    actor: &User,
    input: NewUnit,
    rng: &mut R,
) -> Result<Unit, AppError> {
    require_admin_scope(actor)?;
    let name = require(&input.name, "Unit name")?;
    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;

    let parent_id = non_blank(input.parent_id.as_deref());
    let level = match &parent_id {
        Some(parent_id) => {
            ensure_visible_unit(entities, &visible, parent_id)?;
            entities.unit(parent_id).map(|parent| parent.level + 1).unwrap_or(0)
        }
        None if actor.is_system_admin() => 0,
        None => {
            return Err(AppError::Forbidden(
                "Only the system administrator can create root units".to_string(),
            ))
        }
    };
    ensure_managers(entities, &visible, &input.manager_ids)?;

    let unit = Unit {
        id: generate_unit_code(&entities.units, rng)?,
        parent_id,
        name,
        manager_ids: input.manager_ids,
        address: non_blank(input.address.as_deref()),
        phone: non_blank(input.phone.as_deref()),
        level,
    };
    entities.units.push(unit.clone());
    log::info!("{} created unit {} ({})", actor.username, unit.id, unit.name);
    Ok(unit)
}

fn relevel(units: &mut [Unit], root_id: &str) -> Result<Vec<String>, AppError> {
    let mut subtree: Vec<String> = vec![root_id.to_string()];
    let below = hierarchy::descendants(root_id, units)?;
    // Parents first, so each unit sees its parent's new level.
    let mut frontier = vec![root_id.to_string()];
    while let Some(current) = frontier.pop() {
        for unit in units.iter() {
            if unit.parent_id.as_deref() == Some(current.as_str()) && below.contains(&unit.id) {
                subtree.push(unit.id.clone());
                frontier.push(unit.id.clone());
            }
        }
    }

    let mut changed = Vec::new();
    for id in subtree {
        let parent_level = {
            let unit = units.iter().find(|unit| unit.id == id);
            unit.and_then(|unit| unit.parent_id.as_deref())
                .and_then(|parent_id| units.iter().find(|unit| unit.id == parent_id))
                .map(|parent| parent.level)
        };
        let level = parent_level.map(|level| level + 1).unwrap_or(0);
        if let Some(unit) = units.iter_mut().find(|unit| unit.id == id) {
            if unit.level != level {
                unit.level = level;
                changed.push(id);
            }
        }
    }
    Ok(changed)
}

/// Applies a partial update. Returns every unit that changed, the target first.
pub fn update_unit(
    entities: &mut Entities,
    actor: &User,
    unit_id: &str,
    input: UnitUpdate,
) -> Result<Vec<Unit>, AppError> {
    require_admin_scope(actor)?;
    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;
    ensure_visible_unit(entities, &visible, unit_id)?;

    let name = match &input.name {
        Some(name) => Some(require(name, "Unit name")?),
        None => None,
    };

    let new_parent = match input.parent_id {
        None => None,
        Some(parent) => {
            let parent = non_blank(parent.as_deref());
            if !actor.is_system_admin() && actor.unit_id == unit_id {
                return Err(AppError::Forbidden("You cannot move your own unit".to_string()));
            }
            match &parent {
                None if !actor.is_system_admin() => {
                    return Err(AppError::Forbidden(
                        "Only the system administrator can move units to the root".to_string(),
                    ))
                }
                None => {}
                Some(parent_id) => {
                    if parent_id == unit_id
                        || hierarchy::is_descendant(unit_id, parent_id, &entities.units)?
                    {
                        return Err(AppError::BadRequest(
                            "A unit cannot be moved under itself or its own subtree".to_string(),
                        ));
                    }
                    ensure_visible_unit(entities, &visible, parent_id)?;
                }
            }
            Some(parent)
        }
    };

    if let Some(manager_ids) = &input.manager_ids {
        ensure_managers(entities, &visible, manager_ids)?;
    }

    let unit = entities
        .units
        .iter_mut()
        .find(|unit| unit.id == unit_id)
        .ok_or_else(|| AppError::NotFound(format!("Unit {} not found", unit_id)))?;
    if let Some(name) = name {
        unit.name = name;
    }
    if let Some(manager_ids) = input.manager_ids {
        unit.manager_ids = manager_ids;
    }
    if let Some(address) = input.address {
        unit.address = non_blank(Some(&address));
    }
    if let Some(phone) = input.phone {
        unit.phone = non_blank(Some(&phone));
    }
    let moved = new_parent.is_some();
    if let Some(parent) = new_parent {
        unit.parent_id = parent;
    }

    let mut changed_ids = vec![unit_id.to_string()];
    if moved {
        for id in relevel(&mut entities.units, unit_id)? {
            if !changed_ids.contains(&id) {
                changed_ids.push(id);
            }
        }
    }
    log::info!("{} updated unit {}", actor.username, unit_id);

    Ok(changed_ids
        .iter()
        .filter_map(|id| entities.unit(id).cloned())
        .collect())
}

pub fn delete_unit(entities: &mut Entities, actor: &User, unit_id: &str) -> Result<Unit, AppError> {
    require_admin_scope(actor)?;
    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;
    ensure_visible_unit(entities, &visible, unit_id)?;

    if actor.unit_id == unit_id {
        return Err(AppError::Forbidden("You cannot delete your own unit".to_string()));
    }
    if entities
        .units
        .iter()
        .any(|unit| unit.parent_id.as_deref() == Some(unit_id))
    {
        return Err(AppError::Conflict("Unit still has child units".to_string()));
    }
    if entities.users.iter().any(|user| user.unit_id == unit_id) {
        return Err(AppError::Conflict("Unit still contains staff".to_string()));
    }

    let index = entities
        .units
        .iter()
        .position(|unit| unit.id == unit_id)
        .ok_or_else(|| AppError::NotFound(format!("Unit {} not found", unit_id)))?;
    let unit = entities.units.remove(index);
    log::info!("{} deleted unit {}", actor.username, unit_id);
    Ok(unit)
}

pub fn create_user(
    entities: &mut Entities,
    actor: &User,
    input: NewUser,
    hasher: &PasswordHasher,
) -> Result<User, AppError> {
    require_admin_scope(actor)?;
    let username = require(&input.username, "Username")?;
    if input.password.is_empty() {
        return Err(AppError::BadRequest("Password is required".to_string()));
    }
    let hrm_code = non_blank(input.hrm_code.as_deref()).unwrap_or_default();
    if is_reserved(&username) || is_reserved(&hrm_code) {
        return Err(AppError::BadRequest(format!("{} is a reserved identity", SYSTEM_ADMIN_CODE)));
    }
    if username_taken(entities, &username, None) {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }
    if !hrm_code.is_empty() && hrm_code_taken(entities, &hrm_code, None) {
        return Err(AppError::Conflict("HRM code already exists".to_string()));
    }

    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;
    let unit_id = require(&input.unit_id, "Unit")?;
    ensure_visible_unit(entities, &visible, &unit_id)?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        hrm_code,
        full_name: non_blank(Some(&input.full_name)).unwrap_or_else(|| username.clone()),
        title: input.title,
        unit_id,
        username,
        password: hasher.hash(&input.password)?,
        is_first_login: true,
        can_manage_users: input.can_manage_users,
        avatar: non_blank(input.avatar.as_deref()),
    };
    entities.users.push(user.clone());
    log::info!("{} created user {} ({})", actor.username, user.id, user.username);
    Ok(user)
}

pub fn update_user(
    entities: &mut Entities,
    actor: &User,
    user_id: &str,
    input: UserUpdate,
) -> Result<User, AppError> {
    require_admin_scope(actor)?;
    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;
    let mut updated = visible_user(entities, &visible, user_id)?.clone();
    protect_system_admin(actor, &updated)?;
    let was_admin = updated.is_system_admin();

    if let Some(username) = &input.username {
        updated.username = require(username, "Username")?;
    }
    if let Some(hrm_code) = &input.hrm_code {
        updated.hrm_code = hrm_code.trim().to_string();
    }
    if updated.is_system_admin() != was_admin {
        return Err(AppError::BadRequest(format!(
            "The {} identity cannot be assigned or removed",
            SYSTEM_ADMIN_CODE
        )));
    }
    if username_taken(entities, &updated.username, Some(user_id)) {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }
    if !updated.hrm_code.is_empty() && hrm_code_taken(entities, &updated.hrm_code, Some(user_id)) {
        return Err(AppError::Conflict("HRM code already exists".to_string()));
    }
    if let Some(unit_id) = &input.unit_id {
        ensure_visible_unit(entities, &visible, unit_id)?;
        updated.unit_id = unit_id.clone();
    }
    if let Some(full_name) = &input.full_name {
        updated.full_name = require(full_name, "Full name")?;
    }
    if let Some(title) = input.title {
        updated.title = title;
    }
    if let Some(can_manage_users) = input.can_manage_users {
        updated.can_manage_users = can_manage_users;
    }
    if let Some(avatar) = input.avatar {
        updated.avatar = non_blank(avatar.as_deref());
    }

    if let Some(user) = entities.user_mut(user_id) {
        *user = updated.clone();
    }
    log::info!("{} updated user {}", actor.username, user_id);
    Ok(updated)
}

pub fn delete_user(entities: &mut Entities, actor: &User, user_id: &str) -> Result<(User, Vec<Unit>), AppError> {
    require_admin_scope(actor)?;
    if actor.id == user_id {
        return Err(AppError::Forbidden("You cannot delete your own account".to_string()));
    }
    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;
    protect_system_admin(actor, visible_user(entities, &visible, user_id)?)?;

    let index = entities
        .users
        .iter()
        .position(|user| user.id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
    let user = entities.users.remove(index);

    let mut touched = Vec::new();
    for unit in entities.units.iter_mut() {
        let before = unit.manager_ids.len();
        unit.manager_ids.retain(|id| id != user_id);
        if unit.manager_ids.len() != before {
            touched.push(unit.clone());
        }
    }
    log::info!("{} deleted user {}", actor.username, user_id);
    Ok((user, touched))
}

pub fn reset_password(
    entities: &mut Entities,
    actor: &User,
    user_id: &str,
    hasher: &PasswordHasher,
    default_password: &str,
) -> Result<User, AppError> {
    require_admin_scope(actor)?;
    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;
    protect_system_admin(actor, visible_user(entities, &visible, user_id)?)?;

    let password = hasher.hash(default_password)?;
    let user = entities
        .user_mut(user_id)
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
    user.password = password;
    user.is_first_login = true;
    log::info!("{} reset the password of user {}", actor.username, user_id);
    Ok(user.clone())
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnMapping {
    pub hrm_code: String,
    pub full_name: String,
    pub username: String,
    pub title: String,
    pub unit_code: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            hrm_code: "HRM_CODE".to_string(),
            full_name: "HO_TEN".to_string(),
            username: "USERNAME".to_string(),
            title: "CHUC_DANH".to_string(),
            unit_code: "MA_DON_VI".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRow {
    pub hrm_code: String,
    pub full_name: String,
    pub username: String,
    pub title: String,
    pub unit_code: String,
}

impl ColumnMapping {
    /// Reads one spreadsheet row. Header names match case-insensitively; numeric cells are stringified.
    pub fn extract(&self, row: &serde_json::Map<String, serde_json::Value>) -> ImportRow {
        let cell = |header: &str| -> String {
            row.iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(header.trim()))
                .map(|(_, value)| match value {
                    serde_json::Value::String(text) => text.trim().to_string(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        ImportRow {
            hrm_code: cell(&self.hrm_code),
            full_name: cell(&self.full_name),
            username: cell(&self.username),
            title: cell(&self.title),
            unit_code: cell(&self.unit_code),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub rejected: Vec<RejectedRow>,
}

fn parse_title(raw: &str) -> Option<Role> {
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(role) => Some(role),
        Err(err) => {
            log::warn!("{}, defaulting to {}", err, Role::Staff);
            Some(Role::Staff)
        }
    }
}

/// Upserts users from spreadsheet rows, in order. Inserted users share one
/// hash of the default password, computed before any row is applied.
pub fn import_users(
    entities: &mut Entities,
    actor: &User,
    rows: &[ImportRow],
    hasher: &PasswordHasher,
    default_password: &str,
) -> Result<(ImportReport, Vec<User>), AppError> {
    require_admin_scope(actor)?;
    let visible = hierarchy::visible_unit_ids(&entities.units, actor)?;
    let default_hash = if rows.is_empty() {
        String::new()
    } else {
        hasher.hash(default_password)?
    };
    let mut report = ImportReport::default();
    let mut touched: Vec<String> = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let line = index + 1;
        if row.hrm_code.is_empty() || row.username.is_empty() {
            report.rejected.push(RejectedRow {
                row: line,
                reason: "HRM code and username are required".to_string(),
            });
            continue;
        }
        if is_reserved(&row.hrm_code) || is_reserved(&row.username) {
            report.rejected.push(RejectedRow {
                row: line,
                reason: format!("{} is a reserved identity", SYSTEM_ADMIN_CODE),
            });
            continue;
        }
        if !visible.contains(&row.unit_code) || entities.unit(&row.unit_code).is_none() {
            log::debug!("Import row {} skipped: unit '{}' outside scope", line, row.unit_code);
            report.skipped += 1;
            continue;
        }

        let by_hrm = entities
            .users
            .iter()
            .position(|user| user.hrm_code.eq_ignore_ascii_case(&row.hrm_code));
        let by_username = entities
            .users
            .iter()
            .position(|user| user.username.eq_ignore_ascii_case(&row.username));

        let existing = match (by_hrm, by_username) {
            (Some(a), Some(b)) if a != b => {
                report.rejected.push(RejectedRow {
                    row: line,
                    reason: format!("Username {} belongs to another user", row.username),
                });
                continue;
            }
            (found, other) => found.or(other),
        };

        match existing {
            Some(position) => {
                if !visible.contains(&entities.users[position].unit_id) {
                    log::debug!("Import row {} skipped: matched user outside scope", line);
                    report.skipped += 1;
                    continue;
                }
                let user = &mut entities.users[position];
                user.hrm_code = row.hrm_code.clone();
                user.username = row.username.clone();
                if !row.full_name.is_empty() {
                    user.full_name = row.full_name.clone();
                }
                if let Some(title) = parse_title(&row.title) {
                    user.title = title;
                }
                user.unit_id = row.unit_code.clone();
                report.updated += 1;
                if !touched.contains(&user.id) {
                    touched.push(user.id.clone());
                }
            }
            None => {
                let user = User {
                    id: Uuid::new_v4().to_string(),
                    hrm_code: row.hrm_code.clone(),
                    full_name: if row.full_name.is_empty() {
                        row.username.clone()
                    } else {
                        row.full_name.clone()
                    },
                    title: parse_title(&row.title).unwrap_or_default(),
                    unit_id: row.unit_code.clone(),
                    username: row.username.clone(),
                    password: default_hash.clone(),
                    is_first_login: true,
                    can_manage_users: false,
                    avatar: None,
                };
                touched.push(user.id.clone());
                entities.users.push(user);
                report.inserted += 1;
            }
        }
    }

    log::info!(
        "{} imported users: {} inserted, {} updated, {} skipped, {} rejected",
        actor.username,
        report.inserted,
        report.updated,
        report.skipped,
        report.rejected.len()
    );
    let users = touched
        .iter()
        .filter_map(|id| entities.user(id).cloned())
        .collect();
    Ok((report, users))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hierarchy::fixtures::{admin, branch, unit, user};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(&Config::for_tests().hashing).unwrap()
    }

    fn entities() -> Entities {
        Entities {
            units: branch(),
            users: vec![admin("A"), user("sub", "B", true), user("c1", "C", false)],
            ..Entities::default()
        }
    }

    fn new_unit(name: &str, parent: Option<&str>) -> NewUnit {
        NewUnit {
            name: name.to_string(),
            parent_id: parent.map(str::to_string),
            ..NewUnit::default()
        }
    }

    #[test]
    fn unit_codes_stay_unique_across_many_creations() {
        let mut entities = entities();
        let actor = admin("A");
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..300 {
            create_unit(&mut entities, &actor, new_unit(&format!("N{}", i), Some("A")), &mut rng).unwrap();
        }
        let codes: HashSet<&str> = entities.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(codes.len(), entities.units.len());
        assert!(entities
            .units
            .iter()
            .filter(|u| u.id.starts_with(UNIT_CODE_PREFIX))
            .all(|u| u.id.len() == UNIT_CODE_PREFIX.len() + 6));
    }

    #[test]
    fn created_unit_level_follows_parent() {
        let mut entities = entities();
        let mut rng = StdRng::seed_from_u64(1);
        let sub = user("sub", "B", true);

        let child = create_unit(&mut entities, &sub, new_unit("Team", Some("C")), &mut rng).unwrap();
        assert_eq!(child.level, 3);

        let root = create_unit(&mut entities, &admin("A"), new_unit("Other", None), &mut rng).unwrap();
        assert_eq!(root.level, 0);
    }

    #[test]
    fn sub_admin_cannot_create_outside_scope_or_at_root() {
        let mut entities = entities();
        let mut rng = StdRng::seed_from_u64(1);
        let sub = user("sub", "B", true);
        let before = entities.units.clone();

        let outside = create_unit(&mut entities, &sub, new_unit("X", Some("D")), &mut rng);
        assert!(matches!(outside, Err(AppError::Forbidden(_))));
        let root = create_unit(&mut entities, &sub, new_unit("X", None), &mut rng);
        assert!(matches!(root, Err(AppError::Forbidden(_))));
        assert_eq!(entities.units, before);
    }

    #[test]
    fn plain_user_cannot_mutate() {
        let mut entities = entities();
        let mut rng = StdRng::seed_from_u64(1);
        let staff = user("c1", "C", false);
        let result = create_unit(&mut entities, &staff, new_unit("X", Some("C")), &mut rng);
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn delete_unit_with_children_or_staff_is_rejected_unchanged() {
        let mut entities = entities();
        let actor = admin("A");
        let before = entities.clone();

        assert!(matches!(delete_unit(&mut entities, &actor, "B"), Err(AppError::Conflict(_))));
        assert!(matches!(delete_unit(&mut entities, &actor, "C"), Err(AppError::Conflict(_))));
        assert_eq!(entities.units, before.units);
        assert_eq!(entities.users, before.users);

        let removed = delete_unit(&mut entities, &actor, "D").unwrap();
        assert_eq!(removed.id, "D");
        assert!(entities.unit("D").is_none());
    }

    #[test]
    fn sub_admin_cannot_delete_own_unit() {
        let mut entities = Entities {
            units: vec![unit("A", None, 0), unit("B", Some("A"), 1)],
            users: vec![],
            ..Entities::default()
        };
        let sub = user("sub", "B", true);
        assert!(matches!(delete_unit(&mut entities, &sub, "B"), Err(AppError::Forbidden(_))));
        assert!(entities.unit("B").is_some());
    }

    #[test]
    fn reparent_relevels_subtree() {
        let mut entities = entities();
        let actor = admin("A");
        let update = UnitUpdate {
            parent_id: Some(Some("E".to_string())),
            ..UnitUpdate::default()
        };

        let changed = update_unit(&mut entities, &actor, "B", update).unwrap();
        assert_eq!(changed[0].id, "B");
        assert_eq!(entities.unit("B").unwrap().parent_id.as_deref(), Some("E"));
        assert_eq!(entities.unit("B").unwrap().level, 1);
        assert_eq!(entities.unit("C").unwrap().level, 2);

        let to_root = UnitUpdate {
            parent_id: Some(None),
            ..UnitUpdate::default()
        };
        let changed = update_unit(&mut entities, &actor, "B", to_root).unwrap();
        assert_eq!(entities.unit("B").unwrap().level, 0);
        assert_eq!(entities.unit("C").unwrap().level, 1);
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn reparent_under_own_subtree_is_rejected() {
        let mut entities = entities();
        let actor = admin("A");
        let update = UnitUpdate {
            parent_id: Some(Some("C".to_string())),
            ..UnitUpdate::default()
        };
        let before = entities.units.clone();
        assert!(matches!(
            update_unit(&mut entities, &actor, "A", update),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(entities.units, before);
    }

    #[test]
    fn rename_keeps_hierarchy() {
        let mut entities = entities();
        let update = UnitUpdate {
            name: Some("Sales".to_string()),
            ..UnitUpdate::default()
        };
        let changed = update_unit(&mut entities, &user("sub", "B", true), "C", update).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(entities.unit("C").unwrap().name, "Sales");
        assert_eq!(entities.unit("C").unwrap().parent_id.as_deref(), Some("B"));
    }

    #[test]
    fn create_user_requires_credentials_and_unique_username() {
        let mut entities = entities();
        let actor = user("sub", "B", true);
        let input = NewUser {
            full_name: "New Hire".to_string(),
            unit_id: "C".to_string(),
            username: "hire".to_string(),
            password: "Secret@1".to_string(),
            ..NewUser::default()
        };

        let missing = NewUser {
            password: String::new(),
            ..input.clone()
        };
        assert!(matches!(
            create_user(&mut entities, &actor, missing, &hasher()),
            Err(AppError::BadRequest(_))
        ));

        let created = create_user(&mut entities, &actor, input.clone(), &hasher()).unwrap();
        assert!(created.is_first_login);
        assert_ne!(created.password, "Secret@1");
        assert!(hasher().verify("Secret@1", &created.password));

        assert!(matches!(
            create_user(&mut entities, &actor, input, &hasher()),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn create_user_rejects_reserved_identity_and_foreign_unit() {
        let mut entities = entities();
        let actor = user("sub", "B", true);
        let reserved = NewUser {
            unit_id: "C".to_string(),
            username: "admin".to_string(),
            password: "x".to_string(),
            ..NewUser::default()
        };
        assert!(matches!(
            create_user(&mut entities, &actor, reserved, &hasher()),
            Err(AppError::BadRequest(_))
        ));

        let foreign = NewUser {
            unit_id: "D".to_string(),
            username: "someone".to_string(),
            password: "x".to_string(),
            ..NewUser::default()
        };
        assert!(matches!(
            create_user(&mut entities, &actor, foreign, &hasher()),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn users_cannot_delete_themselves() {
        let mut entities = entities();
        let actor = admin("A");
        assert!(matches!(
            delete_user(&mut entities, &actor, "admin"),
            Err(AppError::Forbidden(_))
        ));
        assert!(entities.user("admin").is_some());
    }

    #[test]
    fn deleting_user_clears_manager_references() {
        let mut entities = entities();
        entities.units[2].manager_ids = vec!["c1".to_string()];
        let (user, touched) = delete_user(&mut entities, &admin("A"), "c1").unwrap();
        assert_eq!(user.id, "c1");
        assert_eq!(touched.len(), 1);
        assert!(entities.unit("C").unwrap().manager_ids.is_empty());
    }

    #[test]
    fn update_user_cannot_claim_admin_identity() {
        let mut entities = entities();
        let update = UserUpdate {
            hrm_code: Some("admin".to_string()),
            ..UserUpdate::default()
        };
        assert!(matches!(
            update_user(&mut entities, &admin("A"), "c1", update),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(entities.user("c1").unwrap().hrm_code, "HRM-c1");
    }

    #[test]
    fn reset_password_restores_default_and_forces_change() {
        let mut entities = entities();
        let user = reset_password(&mut entities, &admin("A"), "c1", &hasher(), "Vnpt@123").unwrap();
        assert!(user.is_first_login);
        assert!(hasher().verify("Vnpt@123", &user.password));
        assert_eq!(entities.user("c1").unwrap().password, user.password);
    }

    /// The system admin and a sub-admin director share the root unit.
    fn shared_root() -> (Entities, User) {
        let director = user("director", "A", true);
        let entities = Entities {
            units: vec![unit("A", None, 0)],
            users: vec![admin("A"), director.clone()],
            ..Entities::default()
        };
        (entities, director)
    }

    #[test]
    fn sub_admin_cannot_reset_system_admin_password() {
        let (mut entities, director) = shared_root();
        assert!(matches!(
            reset_password(&mut entities, &director, "admin", &hasher(), "Vnpt@123"),
            Err(AppError::Forbidden(_))
        ));
        let stored = entities.user("admin").unwrap();
        assert_eq!(stored.password, "plain");
        assert!(!stored.is_first_login);
    }

    #[test]
    fn sub_admin_cannot_delete_system_admin() {
        let (mut entities, director) = shared_root();
        assert!(matches!(
            delete_user(&mut entities, &director, "admin"),
            Err(AppError::Forbidden(_))
        ));
        assert!(entities.user("admin").is_some());
    }

    #[test]
    fn sub_admin_cannot_edit_or_demote_system_admin() {
        let (mut entities, director) = shared_root();
        let update = UserUpdate {
            can_manage_users: Some(false),
            username: Some("demoted".to_string()),
            ..UserUpdate::default()
        };
        assert!(matches!(
            update_user(&mut entities, &director, "admin", update),
            Err(AppError::Forbidden(_))
        ));
        let stored = entities.user("admin").unwrap();
        assert!(stored.can_manage_users);
        assert_eq!(stored.username, "admin");

        let update = UserUpdate {
            full_name: Some("Root Admin".to_string()),
            ..UserUpdate::default()
        };
        let updated = update_user(&mut entities, &admin("A"), "admin", update).unwrap();
        assert_eq!(updated.full_name, "Root Admin");
    }

    fn row(hrm: &str, username: &str, unit: &str) -> ImportRow {
        ImportRow {
            hrm_code: hrm.to_string(),
            full_name: format!("Name {}", username),
            username: username.to_string(),
            title: "Specialist".to_string(),
            unit_code: unit.to_string(),
        }
    }

    #[test]
    fn import_updates_matches_and_inserts_new_codes() {
        let mut entities = entities();
        let actor = user("sub", "B", true);
        let rows = vec![
            row("HRM-c1", "c1-renamed", "B"),
            row("HRM-new", "newbie", "C"),
            row("HRM-out", "outsider", "D"),
            row("", "nocode", "C"),
        ];

        let (report, users) = import_users(&mut entities, &actor, &rows, &hasher(), "Vnpt@123").unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].row, 4);
        assert_eq!(users.len(), 2);

        let updated = entities.user("c1").unwrap();
        assert_eq!(updated.username, "c1-renamed");
        assert_eq!(updated.unit_id, "B");
        assert_eq!(updated.title, Role::Specialist);

        let inserted = entities.user_by_username("newbie").unwrap();
        assert!(inserted.is_first_login);
        assert!(hasher().verify("Vnpt@123", &inserted.password));
        assert!(entities.user_by_username("outsider").is_none());
    }

    #[test]
    fn import_inserts_share_one_default_hash() {
        let mut entities = entities();
        let rows = vec![row("HRM-x", "x", "C"), row("HRM-y", "y", "D")];
        let (report, users) = import_users(&mut entities, &admin("A"), &rows, &hasher(), "Vnpt@123").unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(users[0].password, users[1].password);
        assert!(hasher().verify("Vnpt@123", &users[0].password));
    }

    #[test]
    fn import_matches_by_username_too() {
        let mut entities = entities();
        let rows = vec![row("NEW-CODE", "c1", "C")];
        let (report, _) = import_users(&mut entities, &admin("A"), &rows, &hasher(), "Vnpt@123").unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(entities.user("c1").unwrap().hrm_code, "NEW-CODE");
    }

    #[test]
    fn mapping_reads_custom_headers() {
        let mapping = ColumnMapping {
            username: "Login".to_string(),
            ..ColumnMapping::default()
        };
        let row: serde_json::Map<String, serde_json::Value> = serde_json::from_value(serde_json::json!({
            "hrm_code": 1042,
            "HO_TEN": " Nguyen Van A ",
            "login": "vana",
            "MA_DON_VI": "DV000001"
        }))
        .unwrap();
        let extracted = mapping.extract(&row);
        assert_eq!(extracted.hrm_code, "1042");
        assert_eq!(extracted.full_name, "Nguyen Van A");
        assert_eq!(extracted.username, "vana");
        assert_eq!(extracted.title, "");
        assert_eq!(extracted.unit_code, "DV000001");
    }
}
