use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use worklist_core::FhirPath;

use crate::{error::ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub expression: String,
    #[serde(default)]
    pub resource: Value,
}

/// Evaluate a FHIRPath expression against a resource (POST /$evaluate)
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EvaluateRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = body?;
    let path = FhirPath::compile(&request.expression)?;

    let result = path
        .evaluate(&request.resource, &state.eval_context())
        .await?;
    Ok(Json(json!({
        "expression": path.source(),
        "result": result,
    })))
}
