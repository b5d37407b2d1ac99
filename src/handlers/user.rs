use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::Collection;
use crate::errors::AppError;
use crate::handlers::current_user;
use crate::hierarchy;
use crate::models::user::UserProfile;
use crate::services::admin::{self, ColumnMapping, ImportReport, NewUser, UserUpdate};
use crate::state::AppState;
use crate::utils::validation::validate_payload;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueryParams {
    unit_id: Option<String>,
    name: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[serde(default)]
    mapping: Option<ColumnMapping>,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    #[serde(flatten)]
    report: ImportReport,
    users: Vec<UserProfile>,
}

pub async fn get_users(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<UserQueryParams>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;
    let entities = state.store.read().await;

    let name = query.name.as_deref().map(str::to_lowercase);
    let mut users: Vec<UserProfile> = hierarchy::visible_users(&entities.units, &entities.users, &actor)?
        .into_iter()
        .filter(|user| query.unit_id.as_deref().map_or(true, |unit_id| user.unit_id == unit_id))
        .filter(|user| {
            name.as_deref().map_or(true, |name| {
                user.full_name.to_lowercase().contains(name) || user.username.to_lowercase().contains(name)
            })
        })
        .map(|user| user.profile())
        .collect();
    users.sort_by(|a, b| a.full_name.cmp(&b.full_name));

    let users: Vec<UserProfile> = users
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(HttpResponse::Ok().json(users))
}

pub async fn create_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    new_user: web::Json<NewUser>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&new_user.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let user = admin::create_user(&mut entities, &actor, new_user.into_inner(), &state.hasher)?;
    state.store.save_user(&user).await?;

    Ok(HttpResponse::Created().json(user.profile()))
}

pub async fn import_users(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<ImportRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;
    let payload = payload.into_inner();
    let mapping = payload.mapping.unwrap_or_default();
    let rows: Vec<_> = payload.rows.iter().map(|row| mapping.extract(row)).collect();

    let mut entities = state.store.write().await;
    let (report, users) = admin::import_users(
        &mut entities,
        &actor,
        &rows,
        &state.hasher,
        &state.config.default_password,
    )?;
    state.store.save_users(&users).await?;

    Ok(HttpResponse::Ok().json(ImportResponse {
        report,
        users: users.iter().map(|user| user.profile()).collect(),
    }))
}

pub async fn update_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    user_id: web::Path<String>,
    updates: web::Json<UserUpdate>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&updates.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let user = admin::update_user(&mut entities, &actor, &user_id, updates.into_inner())?;
    state.store.save_user(&user).await?;

    Ok(HttpResponse::Ok().json(user.profile()))
}

pub async fn delete_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let (user, units) = admin::delete_user(&mut entities, &actor, &user_id)?;
    state.store.remove(Collection::Users, &user.id).await;
    state.store.save_units(&units).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "User deleted successfully",
        "id": user.id,
    })))
}

pub async fn reset_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let user = admin::reset_password(
        &mut entities,
        &actor,
        &user_id,
        &state.hasher,
        &state.config.default_password,
    )?;
    state.store.save_user(&user).await?;

    Ok(HttpResponse::Ok().json(user.profile()))
}
