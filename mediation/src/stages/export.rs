use std::time::{Duration, Instant};

use bytes::Bytes;
use health::HealthHandle;
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::sinks::{BatchSink, SinkError};

/// Buffers accepted records and hands them to the sink in batches.
///
/// The batch lock is only held to append or to swap in an empty batch. Sink
/// I/O always runs on a detached batch, so appends never wait on delivery.
pub struct Exporter {
    batch: Mutex<Vec<Bytes>>,
    batch_size: usize,
    sink: Box<dyn BatchSink + Send + Sync>,
}

impl Exporter {
    pub fn new<S: BatchSink + Send + Sync + 'static>(sink: S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
            sink: Box::new(sink),
        }
    }

    /// Append one record. The append that fills the batch also delivers it
    /// and returns the delivery result.
    pub async fn export(&self, record: Bytes) -> Result<(), SinkError> {
        let full = {
            let mut batch = self.batch.lock().await;
            batch.push(record);
            if batch.len() < self.batch_size {
                return Ok(());
            }
            std::mem::replace(&mut *batch, Vec::with_capacity(self.batch_size))
        };

        self.deliver(full).await
    }

    /// Deliver whatever is buffered. An empty batch is a no-op.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let pending = {
            let mut batch = self.batch.lock().await;
            if batch.is_empty() {
                return Ok(());
            }
            std::mem::replace(&mut *batch, Vec::with_capacity(self.batch_size))
        };

        self.deliver(pending).await
    }

    pub async fn pending(&self) -> usize {
        self.batch.lock().await.len()
    }

    pub fn sink_kind(&self) -> &'static str {
        self.sink.kind()
    }

    async fn deliver(&self, batch: Vec<Bytes>) -> Result<(), SinkError> {
        let sink = self.sink.kind();
        let records = batch.len();
        let start = Instant::now();

        let result = self.sink.send_batch(batch).await;

        histogram!("mediation_export_flush_duration_seconds", "sink" => sink)
            .record(start.elapsed().as_secs_f64());
        match &result {
            Ok(()) => {
                counter!("mediation_export_batches_total", "sink" => sink).increment(1);
                counter!("mediation_export_records_total", "sink" => sink)
                    .increment(records as u64);
                debug!(sink, records, "exported batch");
            }
            Err(err) => {
                counter!("mediation_export_failures_total", "sink" => sink).increment(1);
                counter!("mediation_export_records_lost_total", "sink" => sink)
                    .increment(records as u64);
                error!(sink, records, "failed to export batch: {}", err);
            }
        }
        result
    }

    /// Flushes on a fixed interval so a quiet stream is not held back until
    /// the batch fills. Returns once `shutdown` is cancelled.
    pub async fn run_flush_timer(
        &self,
        interval: Duration,
        liveness: HealthHandle,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    liveness.report_healthy();
                    // Failures are logged and counted in deliver
                    if let Err(err) = self.flush().await {
                        debug!("periodic flush failed: {}", err);
                    }
                }
            }
        }
        info!("export flush timer stopped");
    }
}
