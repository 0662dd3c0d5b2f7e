use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::debug;
use url::Url;

use super::{json_array, BatchSink, SinkError};

/// POSTs each batch as one JSON array. Any status of 400 or above fails the
/// batch.
pub struct HttpSink {
    client: reqwest::Client,
    destination: Url,
}

impl HttpSink {
    pub fn new(
        destination: Url,
        headers: HeaderMap,
        request_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        // Configured headers win, including a custom Content-Type
        default_headers.extend(headers);

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .user_agent("CDR Mediation Exporter")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            destination,
        })
    }
}

#[async_trait]
impl BatchSink for HttpSink {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn send_batch(&self, batch: Vec<Bytes>) -> Result<(), SinkError> {
        let records = batch.len();
        let response = self
            .client
            .post(self.destination.clone())
            .body(json_array(&batch))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(SinkError::Status { status });
        }

        debug!(records, %status, "delivered batch to {}", self.destination);
        Ok(())
    }
}
