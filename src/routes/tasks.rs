//! Task endpoints.
//!
//! Downstream consumers of the authentication core: every handler passes the
//! session claims through `require_backup_codes` and implements none of the
//! gating logic itself. Grace-period and emergency sessions are rejected here
//! with the structured flags the client keys on.

use actix_web::{get, post, web, HttpResponse, Responder};
use uuid::Uuid;
use validator::Validate;

use crate::auth::extractors::AuthenticatedUser;
use crate::auth::middleware::require_backup_codes;
use crate::error::AppError;
use crate::models::task::{Task, TaskInput};
use crate::AppState;

/// List the authenticated user's tasks.
#[get("")]
pub async fn get_tasks(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    require_backup_codes(&user.0)?;

    let tasks = state.store.list_tasks(user.0.sub).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// Create a task owned by the authenticated user.
#[post("")]
pub async fn create_task(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    task_data: web::Json<TaskInput>,
) -> Result<impl Responder, AppError> {
    require_backup_codes(&user.0)?;
    task_data.validate()?;

    let task = Task::new(task_data.into_inner(), user.0.sub);
    state.store.insert_task(task.clone()).await?;
    Ok(HttpResponse::Created().json(task))
}

/// Fetch a single task by id, scoped to the authenticated user.
#[get("/{id}")]
pub async fn get_task(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<impl Responder, AppError> {
    require_backup_codes(&user.0)?;

    let task = state
        .store
        .find_task(path.into_inner(), user.0.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;
    Ok(HttpResponse::Ok().json(task))
}
