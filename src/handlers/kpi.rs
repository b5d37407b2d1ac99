use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::errors::AppError;
use crate::handlers::current_user;
use crate::services::kpi::{self, KpiBatch};
use crate::state::AppState;
use crate::utils::validation::validate_payload;

#[derive(Deserialize)]
pub struct PeriodQuery {
    period: String,
}

pub async fn get_kpis(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;
    let entities = state.store.read().await;
    let records = kpi::list_kpis(&entities, &actor, &query.period)?;
    Ok(HttpResponse::Ok().json(records))
}

pub async fn upsert_kpis(
    req: HttpRequest,
    state: web::Data<AppState>,
    batch: web::Json<KpiBatch>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&batch.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let saved = kpi::upsert_kpis(&mut entities, &actor, batch.into_inner())?;
    state.store.save_kpis(&saved).await?;

    Ok(HttpResponse::Ok().json(saved))
}

pub async fn get_summary(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;
    let entities = state.store.read().await;
    let summary = kpi::summarize(&entities, &actor, &query.period)?;
    Ok(HttpResponse::Ok().json(summary))
}
