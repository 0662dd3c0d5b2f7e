use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use health::HealthRegistry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::LookupCache;
use crate::config::{Config, ExportConfig, SinkType};
use crate::ingestion::Ingestion;
use crate::pipeline::Pipeline;
use crate::prometheus::setup_metrics_recorder;
use crate::router;
use crate::sinks::{FileSink, HttpSink, PrintSink, QueueSink};
use crate::stages::{Enricher, Exporter, Filter, Transformer};

/// Build the export stage around the configured sink.
pub fn create_exporter(config: &ExportConfig) -> anyhow::Result<Exporter> {
    let batch_size = config.batch_size.get();
    let exporter = match config.sink {
        SinkType::Http => {
            let sink = HttpSink::new(
                config.destination_url()?,
                config.header_map()?,
                config.request_timeout.0,
            )
            .context("failed to create http sink")?;
            Exporter::new(sink, batch_size)
        }
        SinkType::File => Exporter::new(FileSink::new(config.require_destination()?), batch_size),
        SinkType::Kafka => {
            let topic = config.destination.as_deref().unwrap_or("cdr");
            Exporter::new(QueueSink::new(topic), batch_size)
        }
        SinkType::Print => Exporter::new(PrintSink {}, batch_size),
    };
    Ok(exporter)
}

/// A loop that reports on every `interval` is stalled once it misses two
/// reports plus one slow export request.
fn liveness_deadline(interval: Duration, request_timeout: Duration) -> Duration {
    interval * 2 + request_timeout
}

/// Run the service until `shutdown` resolves, then drain ingestion and flush
/// export within the configured grace period.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate().context("invalid configuration")?;

    let liveness = HealthRegistry::new("liveness");
    let recorder_handle = match config.export_prometheus {
        true => Some(setup_metrics_recorder().context("failed to install metrics recorder")?),
        false => None,
    };

    let request_timeout = config.export.request_timeout.0;
    let exporter = Arc::new(create_exporter(&config.export)?);
    info!(sink = exporter.sink_kind(), "export stage ready");

    let cache = Arc::new(LookupCache::new(
        config.enrichment.cache_size,
        config.enrichment.cache_ttl(),
    ));
    let pipeline = Pipeline::new(
        Enricher::new(
            config.enrichment.enabled,
            config.enrichment.custom_fields.0.clone(),
            cache.clone(),
        ),
        Transformer::new(
            config.transformation.rules.0.clone(),
            &config.transformation.date_format,
            config.transformation.time_zone,
        ),
        Filter::new(
            config.filtering.enabled,
            config.filtering.conditions.0.clone(),
            config.filtering.action,
        ),
        exporter.clone(),
    );

    let flush_interval = config.ingestion.flush_interval.0;
    let ingestion = Arc::new(Ingestion::new(
        Arc::new(pipeline),
        config.ingestion.batch_size.get(),
        config.ingestion.buffer_size.get(),
        flush_interval,
        liveness.register(
            "ingestion",
            liveness_deadline(flush_interval, request_timeout),
        ),
    ));
    ingestion.start()?;

    let timer_shutdown = CancellationToken::new();
    let flush_timer = {
        let exporter = exporter.clone();
        let interval = config.export.flush_interval.0;
        let handle = liveness.register("export", liveness_deadline(interval, request_timeout));
        let token = timer_shutdown.clone();
        tokio::spawn(async move { exporter.run_flush_timer(interval, handle, token).await })
    };

    let cache = config.enrichment.enabled.then_some(cache);
    let app = router::router(ingestion.clone(), cache, liveness, recorder_handle);

    info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;

    info!("http server stopped, draining ingestion");
    let drained = ingestion.shutdown(config.shutdown_grace_period.0).await;

    timer_shutdown.cancel();
    if let Err(err) = flush_timer.await {
        error!("export flush timer failed: {}", err);
    }

    drained.context("ingestion did not shut down cleanly")?;
    info!("shutdown complete");
    Ok(())
}
