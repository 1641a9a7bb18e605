//! worklist-server entry point

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use worklist_core::EvalContext;
use worklist_store::{MemoryStore, PanelStore, SqliteStore};

use worklist_server::{
    build_router,
    config::{LogSettings, ServerConfig, StorageBackend},
    fhir_source::FhirSource,
    AppState,
};

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    // Config path from the first argument, else ./config.yaml when present
    let config_path = std::env::args().nth(1).or_else(|| {
        std::path::Path::new("config.yaml")
            .exists()
            .then(|| "config.yaml".to_string())
    });

    let (config, config_error) = match ServerConfig::load(config_path.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = ServerConfig::default();
            config.apply_env(|name| std::env::var(name).ok());
            (config, Some(e.to_string()))
        }
    };

    init_tracing(&config.log);
    tracing::info!("Starting worklist-server...");
    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    // Initialize store
    let store: Arc<dyn PanelStore> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Storage: in-memory");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Sqlite => {
            if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
                tracing::error!("Failed to create data directory: {}", e);
                std::process::exit(1);
            }
            let path = config.panels_db_path();
            let store = SqliteStore::open(&path).unwrap_or_else(|e| {
                tracing::error!("Failed to open panel store: {}", e);
                std::process::exit(1);
            });
            tracing::info!("Storage: {}", path.display());
            Arc::new(store)
        }
    };

    let fhir = FhirSource::from_settings(&config.fhir).unwrap_or_else(|e| {
        tracing::error!("Failed to set up FHIR source: {}", e);
        std::process::exit(1);
    });
    match &fhir {
        Some(FhirSource::Remote(_)) => tracing::info!(
            "FHIR source: {}",
            config.fhir.base_url.as_deref().unwrap_or_default()
        ),
        Some(FhirSource::Fixture(resources)) => {
            tracing::info!("FHIR source: fixture bundle ({} resources)", resources.len())
        }
        None => tracing::warn!("FHIR source: none configured, row queries will fail"),
    }

    tracing::info!(
        "Auth: {}",
        if config.auth.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, store, fhir, EvalContext::new));

    // Build router
    let app = build_router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Server error: {}", e);
        });

    tracing::info!("Server shut down gracefully");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
