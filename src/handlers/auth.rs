use actix_web::{web, HttpRequest, HttpResponse};

use crate::errors::AppError;
use crate::handlers::token_user;
use crate::services::auth::{self as auth_service, ChangePasswordRequest, LoginRequest, LoginResponse};
use crate::state::AppState;
use crate::utils::validation::validate_payload;

pub async fn login(
    state: web::Data<AppState>,
    req: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&req.0)?;

    let entities = state.store.read().await;
    let user = auth_service::verify_credentials(&entities, &state.hasher, &req.username, &req.password)?;
    let token = state.jwt.generate_token(&user.id)?;
    log::info!("User {} logged in", user.username);

    Ok(HttpResponse::Ok().json(LoginResponse {
        token,
        is_first_login: user.is_first_login,
        user: user.profile(),
    }))
}

pub async fn change_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&payload.0)?;
    let actor = token_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let user = auth_service::change_password(&mut entities, &state.hasher, &actor.id, &payload)?;
    state.store.save_user(&user).await?;

    Ok(HttpResponse::Ok().json(user.profile()))
}

pub async fn me(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let user = token_user(&req, &state).await?;
    Ok(HttpResponse::Ok().json(user.profile()))
}
