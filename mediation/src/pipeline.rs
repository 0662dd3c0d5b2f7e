use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::debug;

use crate::record::RecordError;
use crate::sinks::SinkError;
use crate::stages::{Enricher, Exporter, Filter, Transformer};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("enrichment failed: {0}")]
    Enrichment(#[source] RecordError),
    #[error("transformation failed: {0}")]
    Transformation(#[source] RecordError),
    #[error(transparent)]
    Export(#[from] SinkError),
}

/// What happened to a record that made it through without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the export stage. It may still sit in a partial batch.
    Exported,
    /// Stopped by the filter.
    Filtered,
}

/// The per-record entry point used by the ingestion drain loop.
#[async_trait]
pub trait RecordProcessor {
    async fn process(&self, record: Bytes) -> Result<Disposition, PipelineError>;

    /// Push out anything buffered downstream.
    async fn flush(&self) -> Result<(), PipelineError>;
}

/// Runs enrichment, transformation, filtering and export in that order.
pub struct Pipeline {
    enricher: Enricher,
    transformer: Transformer,
    filter: Filter,
    exporter: Arc<Exporter>,
}

impl Pipeline {
    pub fn new(
        enricher: Enricher,
        transformer: Transformer,
        filter: Filter,
        exporter: Arc<Exporter>,
    ) -> Self {
        Self {
            enricher,
            transformer,
            filter,
            exporter,
        }
    }
}

#[async_trait]
impl RecordProcessor for Pipeline {
    async fn process(&self, record: Bytes) -> Result<Disposition, PipelineError> {
        let enriched = self
            .enricher
            .enrich(record)
            .map_err(PipelineError::Enrichment)?;
        let transformed = self
            .transformer
            .transform(enriched)
            .map_err(PipelineError::Transformation)?;

        if !self.filter.should_process(&transformed) {
            counter!("mediation_records_filtered_total").increment(1);
            debug!("record filtered out");
            return Ok(Disposition::Filtered);
        }

        self.exporter.export(transformed).await?;
        Ok(Disposition::Exported)
    }

    async fn flush(&self) -> Result<(), PipelineError> {
        Ok(self.exporter.flush().await?)
    }
}
