use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use tracing::{debug, instrument};

use crate::api::{ApiError, IngestResponse, IngestResponseCode};
use crate::record::{Record, Value};
use crate::router;

/// Accept one record for mediation.
///
/// The body is checked to be a JSON object, then queued as received.
#[instrument(skip_all, fields(size = body.len()))]
pub async fn cdr(
    state: State<router::State>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    if let Err(err) = Record::from_slice(&body) {
        debug!("rejected record: {}", err);
        return Err(err.into());
    }

    state.ingestion.submit(body)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: IngestResponseCode::Accepted,
        }),
    ))
}

/// Store an enrichment value under `key`.
#[instrument(skip_all, fields(key = %key))]
pub async fn put_lookup(
    state: State<router::State>,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let cache = state.cache.as_ref().ok_or(ApiError::EnrichmentDisabled)?;
    cache.set(key, value);
    Ok(StatusCode::NO_CONTENT)
}
