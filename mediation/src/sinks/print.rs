use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};

use super::{BatchSink, SinkError};

/// Logs every record instead of delivering it, for local debugging.
pub struct PrintSink {}

#[async_trait]
impl BatchSink for PrintSink {
    fn kind(&self) -> &'static str {
        "print"
    }

    async fn send_batch(&self, batch: Vec<Bytes>) -> Result<(), SinkError> {
        let span = tracing::span!(tracing::Level::INFO, "batch of records");
        let _enter = span.enter();

        histogram!("mediation_print_batch_size").record(batch.len() as f64);
        counter!("mediation_print_records_total").increment(batch.len() as u64);
        for record in batch {
            tracing::info!("record: {}", String::from_utf8_lossy(&record));
        }

        Ok(())
    }
}
