use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::AppError;
use crate::models::user::{User, UserProfile};
use crate::store::Entities;
use crate::utils::password::PasswordHasher;

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub is_first_login: bool,
    pub user: UserProfile,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 128))]
    pub current_password: String,
    #[validate(length(min = 8, max = 64))]
    pub new_password: String,
}

/// Matches credentials against the user set. Usernames compare case-insensitively.
pub fn verify_credentials<'a>(
    entities: &'a Entities,
    hasher: &PasswordHasher,
    username: &str,
    password: &str,
) -> Result<&'a User, AppError> {
    let invalid = || AppError::Unauthorized("Invalid username or password".to_string());
    let user = entities.user_by_username(username).ok_or_else(invalid)?;
    if hasher.verify(password, &user.password) {
        Ok(user)
    } else {
        log::warn!("Failed login for {}", user.username);
        Err(invalid())
    }
}

pub fn change_password(
    entities: &mut Entities,
    hasher: &PasswordHasher,
    user_id: &str,
    input: &ChangePasswordRequest,
) -> Result<User, AppError> {
    let user = entities
        .user(user_id)
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;
    if !hasher.verify(&input.current_password, &user.password) {
        return Err(AppError::Unauthorized("Current password is incorrect".to_string()));
    }
    if input.current_password == input.new_password {
        return Err(AppError::BadRequest(
            "New password must differ from the current one".to_string(),
        ));
    }

    let password = hasher.hash(&input.new_password)?;
    let user = entities
        .user_mut(user_id)
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;
    user.password = password;
    user.is_first_login = false;
    log::info!("User {} changed their password", user.username);
    Ok(user.clone())
}
