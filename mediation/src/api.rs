use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingestion::AdmissionError;
use crate::record::RecordError;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestResponseCode {
    Accepted,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub status: IngestResponseCode,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("enrichment is disabled")]
    EnrichmentDisabled,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidRecord(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            ApiError::Admission(AdmissionError::BufferFull)
            | ApiError::Admission(AdmissionError::NotAccepting) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }

            ApiError::EnrichmentDisabled => (StatusCode::NOT_FOUND, self.to_string()),
        }
        .into_response()
    }
}
