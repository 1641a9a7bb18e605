pub mod acl;
pub mod columns;
pub mod evaluate;
pub mod panels;
pub mod rows;
pub mod views;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    response::{IntoResponse, Json},
};
use serde_json::json;
use worklist_core::{Panel, Permission};

use crate::{
    auth::{self, AuthUser},
    error::{ApiError, ApiResult},
    AppState,
};

/// Health check (GET /health)
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Load a panel and check the caller's access to it
pub fn load_panel(
    state: &AppState,
    user: &AuthUser,
    id: &str,
    required: Permission,
) -> ApiResult<Panel> {
    let panel = state
        .store
        .get_panel(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Panel not found: {}", id)))?;
    auth::authorize(state, user, id, required)?;
    Ok(panel)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
