use std::path::PathBuf;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub mod file;
pub mod http;
pub mod print;
pub mod queue;

pub use file::FileSink;
pub use http::HttpSink;
pub use print::PrintSink;
pub use queue::QueueSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("export request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("export destination answered with status {status}")]
    Status { status: reqwest::StatusCode },
    #[error("failed to write export file {path:?}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

/// Delivers one flushed batch. Each payload is a serialized record.
///
/// Sinks do not retry: a failure is reported once and the batch is gone.
#[async_trait]
pub trait BatchSink {
    fn kind(&self) -> &'static str;

    async fn send_batch(&self, batch: Vec<Bytes>) -> Result<(), SinkError>;
}

/// Joins payloads into a JSON array without reparsing them.
pub fn json_array(batch: &[Bytes]) -> Bytes {
    let len = batch.iter().map(Bytes::len).sum::<usize>() + batch.len() + 1;
    let mut body = BytesMut::with_capacity(len);
    body.put_u8(b'[');
    for (i, payload) in batch.iter().enumerate() {
        if i > 0 {
            body.put_u8(b',');
        }
        body.put_slice(payload);
    }
    body.put_u8(b']');
    body.freeze()
}
