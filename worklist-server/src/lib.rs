//! worklist-server - clinical panel/worklist API over a FHIR backend

pub mod auth;
pub mod config;
pub mod error;
pub mod fhir_source;
pub mod handlers;

use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use chrono::Weekday;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use worklist_core::{parse_week_start, EvalContext};
use worklist_store::PanelStore;

use crate::{config::ServerConfig, fhir_source::FhirSource};

/// Application state
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn PanelStore>,
    /// `None` when neither a FHIR base URL nor a fixture bundle is configured
    pub fhir: Option<FhirSource>,
    pub jwk_cache: tokio::sync::RwLock<auth::JwkCache>,
    pub week_start: Weekday,
    clock: fn() -> EvalContext,
}

impl AppState {
    /// `clock` supplies the evaluation context (and so `now()`/`today()`) for each request
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn PanelStore>,
        fhir: Option<FhirSource>,
        clock: fn() -> EvalContext,
    ) -> Self {
        let week_start = parse_week_start(&config.table.week_start).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid table.week_start, using monday");
            Weekday::Mon
        });

        Self {
            config,
            store,
            fhir,
            jwk_cache: tokio::sync::RwLock::new(auth::JwkCache::new()),
            week_start,
            clock,
        }
    }

    pub fn eval_context(&self) -> EvalContext {
        (self.clock)()
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .layer(RequestBodyLimitLayer::new(state.config.server.max_body_bytes));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // FHIRPath playground
        .route("/$evaluate", post(handlers::evaluate::evaluate))
        // Panels
        .route(
            "/panels",
            get(handlers::panels::list_panels).post(handlers::panels::create_panel),
        )
        .route(
            "/panels/{id}",
            get(handlers::panels::get_panel)
                .put(handlers::panels::update_panel)
                .delete(handlers::panels::delete_panel),
        )
        // Columns
        .route(
            "/panels/{id}/columns",
            get(handlers::columns::list_columns).post(handlers::columns::add_column),
        )
        .route(
            "/panels/{id}/columns/{column_id}",
            put(handlers::columns::replace_column)
                .delete(handlers::columns::remove_column),
        )
        // Views
        .route(
            "/panels/{id}/views",
            get(handlers::views::list_views).post(handlers::views::create_view),
        )
        .route(
            "/panels/{id}/views/{view_id}",
            get(handlers::views::get_view)
                .put(handlers::views::update_view)
                .delete(handlers::views::delete_view),
        )
        // Access control
        .route(
            "/panels/{id}/acl",
            get(handlers::acl::list_acl).put(handlers::acl::put_acl),
        )
        .route("/panels/{id}/acl/{user_id}", delete(handlers::acl::delete_acl))
        // Rows
        .route("/panels/{id}/rows", get(handlers::rows::list_rows))
        .route("/panels/{id}/rows/{resource_id}", get(handlers::rows::get_row))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware)
        .with_state(state)
}
