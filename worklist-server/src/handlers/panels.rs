use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use worklist_core::{Acl, Column, DataSource, Panel, Permission};

use super::{load_panel, new_id};
use crate::{auth::AuthUser, error::ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub data_source: DataSource,
    /// Omitted or empty on create means the resource type's default columns
    #[serde(default)]
    pub columns: Option<Vec<Column>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// List panels the caller can see (GET /panels)
pub async fn list_panels(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Panel>>> {
    let mut panels = state.store.list_panels()?;
    if user.is_acl_bound() {
        let mut visible = Vec::with_capacity(panels.len());
        for panel in panels {
            if state.store.permission_for(&panel.id, &user.user_id)?.is_some() {
                visible.push(panel);
            }
        }
        panels = visible;
    }
    Ok(Json(panels))
}

/// Create a panel; the caller becomes its owner (POST /panels)
pub async fn create_panel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<PanelInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Panel>)> {
    let Json(input) = body?;

    let mut panel = Panel::new(new_id(), input.name, input.data_source);
    panel.description = input.description;
    panel.tags = input.tags;
    panel.created_by = user.user_id.clone();
    if let Some(columns) = input.columns.filter(|c| !c.is_empty()) {
        panel.columns = columns;
    }
    panel.validate()?;

    state.store.create_panel(&panel)?;
    state.store.put_acl(&Acl {
        panel_id: panel.id.clone(),
        user_id: user.user_id.clone(),
        permission: Permission::Owner,
    })?;

    tracing::info!(panel_id = %panel.id, user = %user.user_id, "Created panel");
    Ok((StatusCode::CREATED, Json(panel)))
}

/// Read a panel (GET /panels/{id})
pub async fn get_panel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Panel>> {
    Ok(Json(load_panel(&state, &user, &id, Permission::Viewer)?))
}

/// Replace a panel's definition (PUT /panels/{id})
///
/// Columns are kept when the body omits them. Views lose references to columns
/// that no longer exist.
pub async fn update_panel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Result<Json<PanelInput>, JsonRejection>,
) -> ApiResult<Json<Panel>> {
    let Json(input) = body?;
    let mut panel = load_panel(&state, &user, &id, Permission::Editor)?;

    panel.name = input.name;
    panel.description = input.description;
    panel.data_source = input.data_source;
    panel.tags = input.tags;
    if let Some(columns) = input.columns {
        panel.columns = columns;
    }
    panel.updated_at = Utc::now();
    panel.validate()?;

    state.store.update_panel(&panel)?;
    prune_views(&state, &panel)?;

    Ok(Json(panel))
}

/// Delete a panel with its views and ACL (DELETE /panels/{id})
pub async fn delete_panel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    load_panel(&state, &user, &id, Permission::Owner)?;
    state.store.delete_panel(&id)?;
    tracing::info!(panel_id = %id, user = %user.user_id, "Deleted panel");
    Ok(StatusCode::NO_CONTENT)
}

/// Drop view references to columns the panel no longer has
pub(crate) fn prune_views(state: &AppState, panel: &Panel) -> ApiResult<()> {
    let known: HashSet<&str> = panel.columns.iter().map(|c| c.id.as_str()).collect();

    for mut view in state.store.list_views(&panel.id)? {
        let mut stale: Vec<String> = view
            .filters
            .iter()
            .map(|f| &f.column_id)
            .chain(view.sorts.iter().map(|s| &s.column_id))
            .chain(view.visible_columns.iter())
            .filter(|id| !id.is_empty() && !known.contains(id.as_str()))
            .cloned()
            .collect();
        stale.sort();
        stale.dedup();

        let mut changed = false;
        for column_id in &stale {
            changed |= view.prune_column(column_id);
        }
        if changed {
            view.updated_at = Utc::now();
            state.store.update_view(&view)?;
            tracing::debug!(view_id = %view.id, pruned = ?stale, "Pruned view columns");
        }
    }
    Ok(())
}
