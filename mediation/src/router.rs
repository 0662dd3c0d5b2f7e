use std::future::ready;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use health::HealthRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::cache::LookupCache;
use crate::ingestion::{Ingestion, IngestionState};
use crate::ingress;
use crate::prometheus::track_metrics;

#[derive(Clone)]
pub struct State {
    pub ingestion: Arc<Ingestion>,
    /// None when enrichment is disabled
    pub cache: Option<Arc<LookupCache>>,
}

async fn index() -> &'static str {
    "cdr mediation"
}

fn readiness(ingestion: &Ingestion) -> StatusCode {
    match ingestion.state() {
        IngestionState::Running => StatusCode::OK,
        IngestionState::Draining | IngestionState::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn router(
    ingestion: Arc<Ingestion>,
    cache: Option<Arc<LookupCache>>,
    liveness: HealthRegistry,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = State {
        ingestion: ingestion.clone(),
        cache,
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/cdr", post(ingress::cdr))
        .route("/lookups/:key", put(ingress::put_lookup))
        .route(
            "/_liveness",
            get(move || ready(liveness.get_status())),
        )
        .route(
            "/_readiness",
            get(move || ready(readiness(&ingestion))),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // The recorder is process global, so it is installed by the caller and
    // left out of routers built for tests.
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
