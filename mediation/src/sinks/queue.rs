use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use super::{BatchSink, SinkError};

/// Stand-in for a message queue producer: acknowledges every batch after
/// logging where it would have gone.
pub struct QueueSink {
    topic: String,
}

impl QueueSink {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_owned(),
        }
    }
}

#[async_trait]
impl BatchSink for QueueSink {
    fn kind(&self) -> &'static str {
        "kafka"
    }

    async fn send_batch(&self, batch: Vec<Bytes>) -> Result<(), SinkError> {
        info!(
            topic = %self.topic,
            records = batch.len(),
            "queue export not wired to a broker, acknowledging batch"
        );
        Ok(())
    }
}
