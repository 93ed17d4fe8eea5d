pub mod cognitive;
pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod state;
pub mod workers;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::cognitive::{CognitiveEngine, EngineConfig, WebhookSink};
use crate::config::Config;
use crate::db::PgProfileStore;
use crate::state::AppState;

/// Wires the engine from process config. Without `DATABASE_URL`, or when the
/// database cannot be reached, profiles live in memory.
pub async fn build_engine(config: &Config) -> (Arc<CognitiveEngine>, &'static str) {
    let mut builder = CognitiveEngine::builder(EngineConfig::from_env());
    let mut backend = "memory";

    if let Some(url) = config.database_url.as_deref() {
        match PgProfileStore::connect(url).await {
            Ok(store) => match store.init_schema().await {
                Ok(()) => {
                    builder = builder.store(Arc::new(store));
                    backend = "postgres";
                }
                Err(e) => warn!(error = %e, "profile schema init failed, using in-memory store"),
            },
            Err(e) => warn!(error = %e, "database unreachable, using in-memory store"),
        }
    }

    if let Some(url) = config.intervention_webhook_url.as_deref() {
        builder = builder.intervention_sink(Arc::new(WebhookSink::new(url, config.delivery_timeout)));
        info!(url, "intervention webhook enabled");
    }
    if let Some(url) = config.alert_webhook_url.as_deref() {
        builder = builder.alert_sink(Arc::new(WebhookSink::new(url, config.delivery_timeout)));
        info!(url, "alert webhook enabled");
    }

    (Arc::new(builder.build()), backend)
}

pub fn create_app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
