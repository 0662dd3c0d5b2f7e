use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::{BatchSink, SinkError};

/// Appends records to a local file, one JSON document per line.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    fn io_error(&self, error: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            error,
        }
    }
}

#[async_trait]
impl BatchSink for FileSink {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn send_batch(&self, batch: Vec<Bytes>) -> Result<(), SinkError> {
        let mut lines = Vec::with_capacity(batch.iter().map(|b| b.len() + 1).sum());
        for record in &batch {
            lines.extend_from_slice(record);
            lines.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&lines).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        Ok(())
    }
}
