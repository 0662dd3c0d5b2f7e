use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use health::HealthHandle;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::pipeline::{Disposition, RecordProcessor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    Stopped,
    Running,
    Draining,
}

/// Why a record was refused at the door. Both are expected under load or
/// during shutdown and map to 503 responses.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("buffer full")]
    BufferFull,
    #[error("ingestion is not accepting records")]
    NotAccepting,
}

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("cannot {action} ingestion while {state:?}")]
    InvalidState {
        action: &'static str,
        state: IngestionState,
    },
    #[error("drain did not finish within {0:?}")]
    DrainTimeout(Duration),
    #[error("drain loop failed: {0}")]
    DrainTask(#[from] JoinError),
}

struct Inner {
    state: IngestionState,
    sender: Option<mpsc::Sender<Bytes>>,
    drain: Option<JoinHandle<()>>,
}

/// Admission control in front of the pipeline.
///
/// Records go into a bounded queue without waiting; a full queue is rejected
/// right away. A single drain loop owns the receiving end and the current
/// batch. It hands the batch to the processor, one record at a time, when the
/// batch reaches `batch_size` or when the flush interval ticks.
pub struct Ingestion {
    processor: Arc<dyn RecordProcessor + Send + Sync>,
    batch_size: usize,
    buffer_size: usize,
    flush_interval: Duration,
    liveness: HealthHandle,
    inner: RwLock<Inner>,
}

impl Ingestion {
    pub fn new(
        processor: Arc<dyn RecordProcessor + Send + Sync>,
        batch_size: usize,
        buffer_size: usize,
        flush_interval: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            processor,
            batch_size: batch_size.max(1),
            buffer_size: buffer_size.max(1),
            flush_interval,
            liveness,
            inner: RwLock::new(Inner {
                state: IngestionState::Stopped,
                sender: None,
                drain: None,
            }),
        }
    }

    pub fn state(&self) -> IngestionState {
        self.read().state
    }

    /// Open the queue and spawn the drain loop. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) -> Result<(), IngestionError> {
        let mut inner = self.write();
        if inner.state != IngestionState::Stopped {
            return Err(IngestionError::InvalidState {
                action: "start",
                state: inner.state,
            });
        }

        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let drain = tokio::spawn(drain_loop(
            self.processor.clone(),
            receiver,
            self.batch_size,
            self.flush_interval,
            self.liveness.clone(),
        ));

        inner.sender = Some(sender);
        inner.drain = Some(drain);
        inner.state = IngestionState::Running;
        info!(
            batch_size = self.batch_size,
            buffer_size = self.buffer_size,
            "ingestion started"
        );
        Ok(())
    }

    /// Queue one record without waiting.
    pub fn submit(&self, record: Bytes) -> Result<(), AdmissionError> {
        let inner = self.read();
        let sender = match (&inner.state, &inner.sender) {
            (IngestionState::Running, Some(sender)) => sender,
            _ => {
                counter!("mediation_records_rejected_total", "cause" => "not_accepting")
                    .increment(1);
                return Err(AdmissionError::NotAccepting);
            }
        };

        match sender.try_send(record) {
            Ok(()) => {
                counter!("mediation_records_received_total").increment(1);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                counter!("mediation_records_rejected_total", "cause" => "buffer_full")
                    .increment(1);
                Err(AdmissionError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => {
                counter!("mediation_records_rejected_total", "cause" => "not_accepting")
                    .increment(1);
                Err(AdmissionError::NotAccepting)
            }
        }
    }

    /// Stop admitting, then wait up to `grace` for the queue to drain and the
    /// pipeline to flush.
    ///
    /// On timeout the drain loop keeps running in the background and the
    /// state stays `Draining`.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), IngestionError> {
        let drain = {
            let mut inner = self.write();
            if inner.state != IngestionState::Running {
                return Err(IngestionError::InvalidState {
                    action: "shut down",
                    state: inner.state,
                });
            }
            inner.state = IngestionState::Draining;
            // Dropping the only sender closes the queue, the drain loop exits
            // once it has taken everything still buffered.
            drop(inner.sender.take());
            inner.drain.take()
        };
        info!("ingestion draining");

        if let Some(drain) = drain {
            match tokio::time::timeout(grace, drain).await {
                Ok(joined) => joined?,
                Err(_) => {
                    warn!("ingestion did not drain within {:?}", grace);
                    return Err(IngestionError::DrainTimeout(grace));
                }
            }
        }

        self.write().state = IngestionState::Stopped;
        info!("ingestion stopped");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }
}

async fn drain_loop(
    processor: Arc<dyn RecordProcessor + Send + Sync>,
    mut receiver: mpsc::Receiver<Bytes>,
    batch_size: usize,
    flush_interval: Duration,
    liveness: HealthHandle,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        process_batch(processor.as_ref(), &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                liveness.report_healthy();
                if !batch.is_empty() {
                    process_batch(processor.as_ref(), &mut batch).await;
                }
            }
        }
    }

    process_batch(processor.as_ref(), &mut batch).await;
    if let Err(err) = processor.flush().await {
        error!("final pipeline flush failed: {}", err);
    }
    info!("drain loop finished");
}

/// Runs every record of `batch` through the processor, leaving it empty.
///
/// A failing or panicking record is logged and counted, its siblings still
/// run.
async fn process_batch(processor: &(dyn RecordProcessor + Send + Sync), batch: &mut Vec<Bytes>) {
    if batch.is_empty() {
        return;
    }
    histogram!("mediation_ingestion_batch_size").record(batch.len() as f64);

    for record in batch.drain(..) {
        match AssertUnwindSafe(processor.process(record))
            .catch_unwind()
            .await
        {
            Ok(Ok(Disposition::Exported)) => {
                counter!("mediation_records_processed_total").increment(1);
            }
            Ok(Ok(Disposition::Filtered)) => {}
            Ok(Err(err)) => {
                counter!("mediation_records_failed_total", "cause" => "error").increment(1);
                warn!("failed to process record: {}", err);
            }
            Err(_) => {
                counter!("mediation_records_failed_total", "cause" => "panic").increment(1);
                error!("record processing panicked");
            }
        }
    }
}
