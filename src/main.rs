use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use nexus_backend::api;
use nexus_backend::auth;
use nexus_backend::config::Config;
use nexus_backend::db::Database;
use nexus_backend::insight::{GeminiProvider, InsightProvider};
use nexus_backend::metrics;

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "nexus-backend" }))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

/// Record request count and latency for every route.
async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = metrics::normalize_path(req.uri().path());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[&path])
        .observe(start.elapsed().as_secs_f64());

    response
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let insight: Option<Arc<dyn InsightProvider>> = match &config.insight_api_key {
        Some(key) => match GeminiProvider::new(key.clone(), config.insight_model.clone()) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                tracing::warn!("Insight provider unavailable: {e}");
                None
            }
        },
        None => {
            tracing::info!("GEMINI_API_KEY not set; serving the fallback greeting");
            None
        }
    };

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Auth routes (no auth required for register/login)
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/profile", put(auth::update_profile))
        .with_state(db.clone())
        .merge(api::router(db, insight))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(track_metrics));

    if let Some(static_dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(static_dir));
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind port");

    tracing::info!("Nexus backend listening on {addr}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
