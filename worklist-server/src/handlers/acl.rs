use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use worklist_core::{Acl, Permission};

use super::load_panel;
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclInput {
    pub user_id: String,
    pub permission: Permission,
}

/// GET /panels/{id}/acl
pub async fn list_acl(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Acl>>> {
    load_panel(&state, &user, &id, Permission::Viewer)?;
    Ok(Json(state.store.list_acl(&id)?))
}

/// Grant or change a user's access (PUT /panels/{id}/acl)
pub async fn put_acl(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Result<Json<AclInput>, JsonRejection>,
) -> ApiResult<Json<Acl>> {
    let Json(input) = body?;
    load_panel(&state, &user, &id, Permission::Owner)?;

    if input.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("userId must not be blank".into()));
    }
    if input.permission != Permission::Owner {
        ensure_other_owner(&state, &id, &input.user_id)?;
    }

    let acl = Acl {
        panel_id: id,
        user_id: input.user_id,
        permission: input.permission,
    };
    state.store.put_acl(&acl)?;
    tracing::info!(
        panel_id = %acl.panel_id,
        user = %acl.user_id,
        permission = acl.permission.as_str(),
        granted_by = %user.user_id,
        "Updated panel ACL"
    );
    Ok(Json(acl))
}

/// DELETE /panels/{id}/acl/{user_id}
pub async fn delete_acl(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    load_panel(&state, &user, &id, Permission::Owner)?;
    ensure_other_owner(&state, &id, &user_id)?;

    if !state.store.delete_acl(&id, &user_id)? {
        return Err(ApiError::NotFound(format!("No ACL entry for {}", user_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Refuse to demote or remove `user_id` when they are the panel's only owner
fn ensure_other_owner(state: &AppState, panel_id: &str, user_id: &str) -> ApiResult<()> {
    let entries = state.store.list_acl(panel_id)?;
    let is_owner = entries
        .iter()
        .any(|e| e.user_id == user_id && e.permission == Permission::Owner);
    let owners = entries
        .iter()
        .filter(|e| e.permission == Permission::Owner)
        .count();

    if is_owner && owners == 1 {
        return Err(ApiError::Conflict(format!(
            "{} is the last owner of panel {}",
            user_id, panel_id
        )));
    }
    Ok(())
}
