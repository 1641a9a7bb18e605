use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use worklist_core::{Filter, Permission, Sort, View};

use super::{load_panel, new_id};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInput {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub visible_columns: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl ViewInput {
    fn apply_to(self, view: &mut View) {
        view.name = self.name;
        view.filters = self.filters;
        view.sorts = self.sorts;
        view.search = self.search.filter(|s| !s.trim().is_empty());
        view.visible_columns = self.visible_columns;
        view.is_default = self.is_default;
    }
}

/// GET /panels/{id}/views
pub async fn list_views(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<View>>> {
    load_panel(&state, &user, &id, Permission::Viewer)?;
    Ok(Json(state.store.list_views(&id)?))
}

/// POST /panels/{id}/views
pub async fn create_view(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Result<Json<ViewInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<View>)> {
    let Json(input) = body?;
    let panel = load_panel(&state, &user, &id, Permission::Editor)?;

    let mut view = View::new(new_id(), &panel.id, "");
    input.apply_to(&mut view);
    view.validate(&panel)?;

    state.store.create_view(&view)?;
    tracing::info!(panel_id = %panel.id, view_id = %view.id, "Created view");
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /panels/{id}/views/{view_id}
pub async fn get_view(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, view_id)): Path<(String, String)>,
) -> ApiResult<Json<View>> {
    load_panel(&state, &user, &id, Permission::Viewer)?;
    let view = state
        .store
        .get_view(&id, &view_id)?
        .ok_or_else(|| ApiError::NotFound(format!("View not found: {}", view_id)))?;
    Ok(Json(view))
}

/// PUT /panels/{id}/views/{view_id}
pub async fn update_view(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, view_id)): Path<(String, String)>,
    body: Result<Json<ViewInput>, JsonRejection>,
) -> ApiResult<Json<View>> {
    let Json(input) = body?;
    let panel = load_panel(&state, &user, &id, Permission::Editor)?;
    let mut view = state
        .store
        .get_view(&id, &view_id)?
        .ok_or_else(|| ApiError::NotFound(format!("View not found: {}", view_id)))?;

    input.apply_to(&mut view);
    view.updated_at = Utc::now();
    view.validate(&panel)?;

    state.store.update_view(&view)?;
    Ok(Json(view))
}

/// DELETE /panels/{id}/views/{view_id}
pub async fn delete_view(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, view_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    load_panel(&state, &user, &id, Permission::Editor)?;
    if !state.store.delete_view(&id, &view_id)? {
        return Err(ApiError::NotFound(format!("View not found: {}", view_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
