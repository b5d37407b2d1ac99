use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::db::Collection;
use crate::errors::AppError;
use crate::handlers::current_user;
use crate::models::task::Task;
use crate::models::user::User;
use crate::services::tasks::{self, ExtensionDecision, ExtensionInput, NewTask, TaskUpdate};
use crate::state::AppState;
use crate::store::Entities;
use crate::utils::validation::validate_payload;

fn task_list(entities: &Entities, actor: &User) -> Result<HttpResponse, AppError> {
    let mut visible: Vec<&Task> = tasks::visible_tasks(entities, actor)?;
    visible.sort_by(|a, b| a.deadline.cmp(&b.deadline));
    Ok(HttpResponse::Ok().json(visible))
}

pub async fn get_tasks(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;
    let now = Utc::now();

    {
        let entities = state.store.read().await;
        if !tasks::any_overdue(&entities.tasks, now) {
            return task_list(&entities, &actor);
        }
    }

    let mut entities = state.store.write().await;
    let overdue = tasks::mark_overdue(&mut entities.tasks, now);
    if !overdue.is_empty() {
        log::info!("Marked {} tasks overdue", overdue.len());
        state.store.save_tasks(&overdue).await?;
    }
    task_list(&entities, &actor)
}

pub async fn create_task(
    req: HttpRequest,
    state: web::Data<AppState>,
    new_task: web::Json<NewTask>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&new_task.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let task = tasks::create_task(&mut entities, &actor, new_task.into_inner(), Utc::now())?;
    state.store.save_task(&task).await?;

    Ok(HttpResponse::Created().json(task))
}

pub async fn update_task(
    req: HttpRequest,
    state: web::Data<AppState>,
    task_id: web::Path<String>,
    updates: web::Json<TaskUpdate>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&updates.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let task = tasks::update_task(&mut entities, &actor, &task_id, updates.into_inner(), Utc::now())?;
    state.store.save_task(&task).await?;

    Ok(HttpResponse::Ok().json(task))
}

pub async fn delete_task(
    req: HttpRequest,
    state: web::Data<AppState>,
    task_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let task = tasks::delete_task(&mut entities, &actor, &task_id)?;
    state.store.remove(Collection::Tasks, &task.id).await;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Task deleted successfully",
        "id": task.id,
    })))
}

pub async fn request_extension(
    req: HttpRequest,
    state: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<ExtensionInput>,
) -> Result<HttpResponse, AppError> {
    validate_payload(&payload.0)?;
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let task = tasks::request_extension(&mut entities, &actor, &task_id, payload.into_inner())?;
    state.store.save_task(&task).await?;

    Ok(HttpResponse::Ok().json(task))
}

pub async fn decide_extension(
    req: HttpRequest,
    state: web::Data<AppState>,
    task_id: web::Path<String>,
    decision: web::Json<ExtensionDecision>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &state).await?;

    let mut entities = state.store.write().await;
    let task = tasks::decide_extension(&mut entities, &actor, &task_id, decision.into_inner())?;
    state.store.save_task(&task).await?;

    Ok(HttpResponse::Ok().json(task))
}
