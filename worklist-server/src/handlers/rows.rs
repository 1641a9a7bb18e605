use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::Json,
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use worklist_core::{is_valid_id, Column, Panel, Permission, Row, TableEngine, TableQuery};

use super::load_panel;
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    fhir_source::FhirSource,
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct RowsParams {
    /// View id; the panel's default view applies when omitted
    pub view: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct RowsPage {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

fn fhir_source(state: &AppState) -> ApiResult<&FhirSource> {
    state
        .fhir
        .as_ref()
        .ok_or_else(|| ApiError::Upstream("No FHIR data source is configured".into()))
}

fn engine_for(state: &AppState, columns: &[Column]) -> TableEngine {
    TableEngine::new(columns, state.eval_context()).with_week_start(state.week_start)
}

/// Filtered, sorted and paginated rows of a panel (GET /panels/{id}/rows)
pub async fn list_rows(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    params: Result<Query<RowsParams>, QueryRejection>,
) -> ApiResult<Json<RowsPage>> {
    let Query(params) = params?;
    let panel = load_panel(&state, &user, &id, Permission::Viewer)?;

    let view = match &params.view {
        Some(view_id) => Some(
            state
                .store
                .get_view(&panel.id, view_id)?
                .ok_or_else(|| ApiError::NotFound(format!("View not found: {}", view_id)))?,
        ),
        None => state.store.default_view(&panel.id)?,
    };

    let table = &state.config.table;
    let limit = params
        .limit
        .unwrap_or(table.default_page_size)
        .min(table.max_page_size);

    let (columns, query) = match &view {
        Some(view) => (
            view.columns_for(&panel),
            view.to_query(params.offset, Some(limit), params.search.as_deref()),
        ),
        None => (
            panel.columns.clone(),
            TableQuery {
                search: params.search.clone(),
                offset: params.offset,
                limit: Some(limit),
                ..TableQuery::default()
            },
        ),
    };

    let resources = fhir_source(&state)?
        .search(&panel.data_source, params.refresh)
        .await?;

    let engine = engine_for(&state, &columns);
    let rows = engine.build_rows(&resources).await;
    let result = engine.apply(rows, &query).await?;

    tracing::debug!(
        panel_id = %panel.id,
        view = ?view.as_ref().map(|v| &v.id),
        fetched = resources.len(),
        matched = result.total,
        "Built panel rows"
    );

    Ok(Json(RowsPage {
        total: result.total,
        offset: params.offset,
        limit,
        columns,
        rows: result.rows,
    }))
}

/// A single resource with its resolved cells (GET /panels/{id}/rows/{resource_id})
pub async fn get_row(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, resource_id)): Path<(String, String)>,
) -> ApiResult<Json<Row>> {
    let panel: Panel = load_panel(&state, &user, &id, Permission::Viewer)?;
    let not_found = || ApiError::NotFound(format!("Resource not found: {}", resource_id));
    if !is_valid_id(&resource_id) {
        return Err(not_found());
    }
    let source = fhir_source(&state)?;

    let cached = source
        .search(&panel.data_source, false)
        .await?
        .iter()
        .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(resource_id.as_str()))
        .cloned();

    let resource = match cached {
        Some(resource) => resource,
        None => source
            .read(panel.data_source.resource_type.as_str(), &resource_id)
            .await?
            .ok_or_else(not_found)?,
    };

    let row = engine_for(&state, &panel.columns).build_row(&resource).await;
    Ok(Json(row))
}
