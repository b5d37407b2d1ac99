pub mod auth;
pub mod kpi;
pub mod task;
pub mod unit;
pub mod user;

use actix_web::{web, HttpRequest};

use crate::errors::AppError;
use crate::models::user::User;
use crate::state::AppState;
use crate::utils::jwt::bearer_token;

pub(crate) async fn token_user(req: &HttpRequest, state: &AppState) -> Result<User, AppError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|auth| auth.to_str().ok());
    let token = bearer_token(header).ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;
    let claims = state.jwt.validate_token(token)?;

    let entities = state.store.read().await;
    entities
        .user(&claims.sub)
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("User not found or unauthorized".to_string()))
}

/// Like [`token_user`], but refuses users who still have to change their password.
pub(crate) async fn current_user(req: &HttpRequest, state: &AppState) -> Result<User, AppError> {
    let user = token_user(req, state).await?;
    if user.is_first_login {
        return Err(AppError::Forbidden("Password change required".to_string()));
    }
    Ok(user)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/v1/auth/login").route(web::post().to(auth::login)))
        .service(web::resource("/v1/auth/change-password").route(web::post().to(auth::change_password)))
        .service(web::resource("/v1/me").route(web::get().to(auth::me)))
        .service(web::resource("/v1/units/tree").route(web::get().to(unit::unit_tree)))
        .service(
            web::resource("/v1/units")
                .route(web::get().to(unit::get_units))
                .route(web::post().to(unit::create_unit)),
        )
        .service(
            web::resource("/v1/units/{id}")
                .route(web::patch().to(unit::update_unit))
                .route(web::delete().to(unit::delete_unit)),
        )
        .service(web::resource("/v1/users/import").route(web::post().to(user::import_users)))
        .service(
            web::resource("/v1/users")
                .route(web::get().to(user::get_users))
                .route(web::post().to(user::create_user)),
        )
        .service(
            web::resource("/v1/users/{id}")
                .route(web::patch().to(user::update_user))
                .route(web::delete().to(user::delete_user)),
        )
        .service(web::resource("/v1/users/{id}/reset-password").route(web::post().to(user::reset_password)))
        .service(
            web::resource("/v1/tasks")
                .route(web::get().to(task::get_tasks))
                .route(web::post().to(task::create_task)),
        )
        .service(
            web::resource("/v1/tasks/{id}")
                .route(web::patch().to(task::update_task))
                .route(web::delete().to(task::delete_task)),
        )
        .service(web::resource("/v1/tasks/{id}/extension").route(web::post().to(task::request_extension)))
        .service(
            web::resource("/v1/tasks/{id}/extension/decision").route(web::post().to(task::decide_extension)),
        )
        .service(web::resource("/v1/kpis/summary").route(web::get().to(kpi::get_summary)))
        .service(
            web::resource("/v1/kpis")
                .route(web::get().to(kpi::get_kpis))
                .route(web::post().to(kpi::upsert_kpis)),
        );
}
