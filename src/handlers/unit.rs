use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::db::Collection;
use crate::errors::AppError;
use crate::handlers::current_user;
use crate::hierarchy;
use crate::models::unit::Unit;
use crate::services::admin::{self, NewUnit, UnitUpdate};
use crate::state::AppState;
use crate::utils::validation::validate_payload;

pub async fn get_units(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;
    let entities = state.store.read().await;

    let mut units: Vec<&Unit> = hierarchy::visible_units(&entities.units, &actor)?;
    units.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));

    Ok(HttpResponse::Ok().json(units))
}

pub async fn unit_tree(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;
    let entities = state.store.read().await;
    let tree = hierarchy::build_tree(&entities.units, &entities.users, &actor)?;
    Ok(HttpResponse::Ok().json(tree))
}

pub async fn create_unit(
    req: HttpRequest,
    state: web::Data<AppState>,
    new_unit: web::Json<NewUnit>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&new_unit.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let unit = admin::create_unit(&mut entities, &actor, new_unit.into_inner(), &mut rand::thread_rng())?;
    state.store.save_unit(&unit).await?;

    Ok(HttpResponse::Created().json(unit))
}

pub async fn update_unit(
    req: HttpRequest,
    state: web::Data<AppState>,
    unit_id: web::Path<String>,
    updates: web::Json<UnitUpdate>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&updates.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let changed = admin::update_unit(&mut entities, &actor, &unit_id, updates.into_inner())?;
    state.store.save_units(&changed).await?;

    let unit = changed
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("Unit not found".to_string()))?;
    Ok(HttpResponse::Ok().json(unit))
}

pub async fn delete_unit(
    req: HttpRequest,
    state: web::Data<AppState>,
    unit_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let unit = admin::delete_unit(&mut entities, &actor, &unit_id)?;
    state.store.remove(Collection::Units, &unit.id).await;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Unit deleted successfully",
        "id": unit.id,
    })))
}
