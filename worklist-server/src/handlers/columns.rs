use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Utc;
use std::sync::Arc;
use worklist_core::{model::validate_column, Column, Permission};

use super::{load_panel, panels::prune_views};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    AppState,
};

/// GET /panels/{id}/columns
pub async fn list_columns(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Column>>> {
    let panel = load_panel(&state, &user, &id, Permission::Viewer)?;
    Ok(Json(panel.columns))
}

/// Append a column (POST /panels/{id}/columns)
pub async fn add_column(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Result<Json<Column>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Column>)> {
    let Json(column) = body?;
    let mut panel = load_panel(&state, &user, &id, Permission::Editor)?;

    validate_column(&column)?;
    if panel.column(&column.id).is_some() {
        return Err(ApiError::Conflict(format!(
            "Column {} already exists on panel {}",
            column.id, id
        )));
    }

    panel.columns.push(column.clone());
    panel.updated_at = Utc::now();
    state.store.update_panel(&panel)?;

    Ok((StatusCode::CREATED, Json(column)))
}

/// Replace a column in place (PUT /panels/{id}/columns/{column_id})
pub async fn replace_column(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, column_id)): Path<(String, String)>,
    body: Result<Json<Column>, JsonRejection>,
) -> ApiResult<Json<Column>> {
    let Json(mut column) = body?;
    let mut panel = load_panel(&state, &user, &id, Permission::Editor)?;

    // The path names the column
    column.id = column_id.clone();
    validate_column(&column)?;

    let slot = panel
        .columns
        .iter_mut()
        .find(|c| c.id == column_id)
        .ok_or_else(|| ApiError::NotFound(format!("Column not found: {}", column_id)))?;
    *slot = column.clone();

    panel.updated_at = Utc::now();
    state.store.update_panel(&panel)?;

    Ok(Json(column))
}

/// Remove a column and every view reference to it (DELETE /panels/{id}/columns/{column_id})
pub async fn remove_column(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, column_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let mut panel = load_panel(&state, &user, &id, Permission::Editor)?;

    let before = panel.columns.len();
    panel.columns.retain(|c| c.id != column_id);
    if panel.columns.len() == before {
        return Err(ApiError::NotFound(format!("Column not found: {}", column_id)));
    }

    panel.updated_at = Utc::now();
    state.store.update_panel(&panel)?;
    prune_views(&state, &panel)?;

    Ok(StatusCode::NO_CONTENT)
}
