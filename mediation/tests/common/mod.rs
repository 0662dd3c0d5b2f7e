#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, Request, Response};
use axum::Router;
use bytes::Bytes;
use chrono_tz::Tz;
use health::HealthRegistry;
use http_body_util::BodyExt;
use tower::ServiceExt;

use mediation::cache::LookupCache;
use mediation::ingestion::Ingestion;
use mediation::pipeline::{Pipeline, RecordProcessor};
use mediation::router::router;
use mediation::sinks::{BatchSink, SinkError};
use mediation::stages::{Enricher, Exporter, Filter, TransformationRule, Transformer};

/// Keeps every exported record in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Bytes>>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(r).unwrap())
            .collect()
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn send_batch(&self, batch: Vec<Bytes>) -> Result<(), SinkError> {
        self.records.lock().unwrap().extend(batch);
        Ok(())
    }
}

pub struct TestService {
    pub app: Router,
    pub ingestion: Arc<Ingestion>,
    pub liveness: HealthRegistry,
}

impl TestService {
    /// Wraps any processor in a started ingestion and a router without
    /// metrics.
    pub fn new(
        processor: Arc<dyn RecordProcessor + Send + Sync>,
        cache: Option<Arc<LookupCache>>,
        buffer_size: usize,
    ) -> Self {
        let liveness = HealthRegistry::new("liveness");
        let ingestion = Arc::new(Ingestion::new(
            processor,
            1,
            buffer_size,
            Duration::from_millis(50),
            liveness.register("ingestion", Duration::from_secs(30)),
        ));
        ingestion.start().expect("ingestion should start");
        let app = router(ingestion.clone(), cache, liveness.clone(), None);
        Self {
            app,
            ingestion,
            liveness,
        }
    }

    pub async fn request(&self, method: http::Method, uri: &str, body: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_owned()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post_cdr(&self, body: &str) -> Response<Body> {
        self.request(http::Method::POST, "/cdr", body).await
    }

    /// Close admission and wait until every queued record went through the
    /// pipeline and export was flushed.
    pub async fn drain(&self) {
        self.ingestion
            .shutdown(Duration::from_secs(5))
            .await
            .expect("ingestion should drain");
    }
}

pub fn lookup_cache() -> Arc<LookupCache> {
    Arc::new(LookupCache::new(
        NonZeroUsize::new(128).unwrap(),
        Duration::from_secs(300),
    ))
}

pub fn pipeline<S: BatchSink + Send + Sync + 'static>(
    cache: Arc<LookupCache>,
    enrichment_fields: &[(&str, &str)],
    rules: Vec<TransformationRule>,
    filter: Filter,
    sink: S,
    export_batch_size: usize,
) -> Arc<Pipeline> {
    let fields = enrichment_fields
        .iter()
        .map(|(target, key)| (target.to_string(), key.to_string()))
        .collect();
    Arc::new(Pipeline::new(
        Enricher::new(true, fields, cache),
        Transformer::new(rules, "%Y-%m-%d %H:%M:%S", Tz::UTC),
        filter,
        Arc::new(Exporter::new(sink, export_batch_size)),
    ))
}

pub async fn body_string(response: Response<Body>) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}
