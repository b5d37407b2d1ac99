use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SYSTEM_ADMIN_CODE: &str = "ADMIN";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Director,
    DeputyDirector,
    Manager,
    DeputyManager,
    Specialist,
    #[default]
    Staff,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Director => "Director",
            Role::DeputyDirector => "Deputy Director",
            Role::Manager => "Manager",
            Role::DeputyManager => "Deputy Manager",
            Role::Specialist => "Specialist",
            Role::Staff => "Staff",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the snake_case code or the display label, ignoring case and separators.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match normalized.as_str() {
            "director" | "giamdoc" => Ok(Role::Director),
            "deputydirector" | "phogiamdoc" => Ok(Role::DeputyDirector),
            "manager" | "truongphong" => Ok(Role::Manager),
            "deputymanager" | "photruongphong" => Ok(Role::DeputyManager),
            "specialist" | "chuyenvien" => Ok(Role::Specialist),
            "staff" | "nhanvien" => Ok(Role::Staff),
            _ => Err(format!("Unknown title '{}'", value)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub hrm_code: String,
    pub full_name: String,
    #[serde(default)]
    pub title: Role,
    pub unit_id: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub is_first_login: bool,
    #[serde(default)]
    pub can_manage_users: bool,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl User {
    /// The distinguished system administrator, identified by the reserved code.
    pub fn is_system_admin(&self) -> bool {
        self.hrm_code.eq_ignore_ascii_case(SYSTEM_ADMIN_CODE)
            || self.username.eq_ignore_ascii_case(SYSTEM_ADMIN_CODE)
    }

    pub fn is_sub_admin(&self) -> bool {
        !self.is_system_admin() && self.can_manage_users
    }

    pub fn has_admin_scope(&self) -> bool {
        self.is_system_admin() || self.can_manage_users
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            hrm_code: self.hrm_code.clone(),
            full_name: self.full_name.clone(),
            title: self.title,
            unit_id: self.unit_id.clone(),
            username: self.username.clone(),
            is_first_login: self.is_first_login,
            can_manage_users: self.can_manage_users,
            is_system_admin: self.is_system_admin(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub hrm_code: String,
    pub full_name: String,
    pub title: Role,
    pub unit_id: String,
    pub username: String,
    pub is_first_login: bool,
    pub can_manage_users: bool,
    pub is_system_admin: bool,
    pub avatar: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_titles_leniently() {
        assert_eq!("deputy_director".parse::<Role>().unwrap(), Role::DeputyDirector);
        assert_eq!("Deputy Director".parse::<Role>().unwrap(), Role::DeputyDirector);
        assert_eq!("Giam Doc".parse::<Role>().unwrap(), Role::Director);
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn profile_hides_password() {
        let user = User {
            id: "u1".into(),
            hrm_code: "admin".into(),
            full_name: "Root".into(),
            title: Role::Director,
            unit_id: "DV000001".into(),
            username: "root".into(),
            password: "secret".into(),
            is_first_login: false,
            can_manage_users: false,
            avatar: None,
        };
        assert!(user.is_system_admin());
        let json = serde_json::to_value(user.profile()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["isSystemAdmin"], true);
    }
}
