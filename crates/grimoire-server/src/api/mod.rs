//! HTTP server: router assembly and graceful serving

pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::features::{self, FeatureState};
use crate::ingest::SyncService;
use crate::middleware::{cors_layer, tracing_layer};

#[derive(Clone)]
pub struct AppState {
    pub service: SyncService,
    /// Absent when running over the in-memory store
    pub db: Option<PgPool>,
}

pub fn create_router(state: AppState, config: &Config) -> Router {
    let api_v1 = features::router(FeatureState {
        service: state.service.clone(),
    });

    Router::new()
        .route("/", get(root))
        .route("/health", get(health).with_state(state))
        .nest("/api/v1", api_v1)
        .layer(CompressionLayer::new())
        .layer(cors_layer(&config.cors))
        .layer(tracing_layer())
}

/// Serve until `shutdown` is cancelled
pub async fn serve(router: Router, config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Grimoire Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health(State(state): State<AppState>) -> Response {
    let database = match &state.db {
        Some(pool) => match crate::db::health_check(pool).await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::error!(error = %e, "Database health check failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "status": "unavailable", "database": "error" })),
                )
                    .into_response();
            },
        },
        None => "not_configured",
    };

    (StatusCode::OK, Json(json!({ "status": "ok", "database": database }))).into_response()
}
