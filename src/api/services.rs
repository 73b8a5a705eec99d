use std::collections::HashMap;
use std::io::SeekFrom;
use std::net::SocketAddr;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{TimeDelta, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use super::{
    error::ApiError,
    models::{HealthResponse, StatsResponse, UploadParams, UploadResponse},
    state::AppState,
    utils,
};
use crate::ledger::NewRecord;
use crate::storage::{BlobKey, StorageError};

/// Upload endpoint (PUT /{name}?expiry=<ttl>)
///
/// Streams the body into the blob store while hashing it, then registers a
/// ledger record pointing at the resulting key.
///
/// ## Flow:
/// 1. Resolve the TTL: `expiry` if given (clamped to `max_ttl`), else the default
/// 2. Reject a declared Content-Length above `max_file_size`
/// 3. Stage the body, capped at `max_file_size + 1` bytes
/// 4. Under the key lock: publish the blob, sniff its type if needed,
///    create the record
/// 5. Return the base36 handle and expiry
///
/// If the record cannot be created the blob is removed again, unless another
/// record already references the same content.
pub async fn upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<UploadParams>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let retention = &state.config.retention;
    let requested = utils::parse_expiry(params.expiry.as_deref())?;
    let ttl = retention.effective_ttl(requested);
    if requested.is_some_and(|r| r > ttl) {
        debug!(requested = %params.expiry.as_deref().unwrap_or_default(), granted = %ttl, "Clamped requested expiry");
    }

    let expires_at = TimeDelta::from_std(ttl.as_duration())
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .ok_or_else(|| ApiError::InvalidExpiry(ttl.to_string()))?;

    let max_size = state.config.storage.max_file_size.as_u64();
    if let Some(declared) = utils::header_str(&headers, header::CONTENT_LENGTH)
        .and_then(|value| value.parse::<u64>().ok())
    {
        if declared > max_size {
            return Err(ApiError::PayloadTooLarge(declared));
        }
    }

    let content_type = utils::header_str(&headers, header::CONTENT_TYPE)
        .map(utils::parse_content_type)
        .transpose()?;

    let mut reader = utils::body_reader(body).take(max_size.saturating_add(1));
    let staged = state
        .blobs
        .stage(&mut reader)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to store upload: {e}")))?;
    if staged.size > max_size {
        // Dropping the staged blob discards the partial upload
        return Err(ApiError::PayloadTooLarge(staged.size));
    }
    let size = staged.size;

    let guard = state.locks.lock(&staged.key).await;
    let blob_key = state
        .blobs
        .commit(staged)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to publish upload: {e}")))?;

    let mime_type = match content_type {
        Some(content_type) => content_type,
        None => sniff_stored(&state, &blob_key).await?,
    };

    let record = NewRecord {
        blob_key: blob_key.clone(),
        original_filename: name,
        mime_type,
        expires_at,
        client_ip: utils::client_ip(&headers, peer),
        user_agent: utils::header_str(&headers, header::USER_AGENT)
            .unwrap_or_default()
            .to_string(),
    };

    let id = match state.ledger.create(record) {
        Ok(id) => id,
        Err(e) => {
            discard_unreferenced(&state, &blob_key).await;
            return Err(ApiError::Internal(format!("failed to record upload: {e}")));
        }
    };
    drop(guard);

    state.metrics.upload_accepted();
    info!(%id, %blob_key, size, expires_at = %expires_at.to_rfc3339(), "Upload accepted");

    Ok((
        StatusCode::OK,
        Json(UploadResponse {
            id: id.to_handle(),
            expires_at,
        }),
    ))
}

/// Read back the head of a freshly published blob to guess its type
async fn sniff_stored(state: &AppState, blob_key: &BlobKey) -> Result<String, ApiError> {
    let reader = state
        .blobs
        .get(blob_key)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read back upload: {e}")))?;

    let mut head = Vec::with_capacity(utils::SNIFF_LEN);
    reader
        .take(utils::SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read back upload: {e}")))?;

    Ok(utils::sniff_content_type(&head).to_string())
}

/// Remove a blob whose record could not be created, unless other records
/// still point at it. Caller holds the key lock.
async fn discard_unreferenced(state: &AppState, blob_key: &BlobKey) {
    match state.ledger.references(blob_key) {
        Ok(0) => match state.blobs.delete(blob_key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => error!(%blob_key, error = %e, "Failed to discard orphaned blob"),
        },
        Ok(references) => {
            debug!(%blob_key, references, "Keeping blob referenced by other records");
        }
        Err(e) => {
            warn!(%blob_key, error = %e, "Could not count references, keeping blob");
        }
    }
}

/// Download endpoint (GET /{handle}[.ext])
///
/// Serves the content of a live record. Unknown, expired and reclaimed
/// records are all 404. A single `Range` is honored with a 206 response.
pub async fn download(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = utils::parse_handle(&handle)?;

    let record = match state.ledger.get(id) {
        Ok(record) => record,
        Err(e) if e.is_not_found() => return Err(ApiError::NotFound(handle)),
        Err(e) => return Err(ApiError::Internal(format!("failed to look up {id}: {e}"))),
    };

    if !record.is_live(Utc::now()) {
        debug!(%id, removed = record.removed, "Record no longer served");
        return Err(ApiError::NotFound(handle));
    }

    let mut reader = match state.blobs.get(&record.blob_key).await {
        Ok(reader) => reader,
        Err(StorageError::NotFound(_)) => {
            // Shared content reclaimed through another expired record
            warn!(%id, blob_key = %record.blob_key, "Live record has no content");
            return Err(ApiError::NotFound(handle));
        }
        Err(e) => return Err(ApiError::Internal(format!("failed to open content: {e}"))),
    };

    let io_error = |e: std::io::Error| ApiError::Internal(format!("failed to read content: {e}"));
    let size = reader.seek(SeekFrom::End(0)).await.map_err(io_error)?;

    let range = match utils::header_str(&headers, header::RANGE) {
        Some(value) => utils::parse_range(value, size)?,
        None => None,
    };
    let (status, start, length) = match range {
        Some(range) => (StatusCode::PARTIAL_CONTENT, range.start, range.len()),
        None => (StatusCode::OK, 0, size),
    };
    reader.seek(SeekFrom::Start(start)).await.map_err(io_error)?;

    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, header::CONTENT_TYPE, &record.mime_type);
    insert_header(&mut response_headers, header::CONTENT_LENGTH, &length.to_string());
    insert_header(
        &mut response_headers,
        header::CONTENT_DISPOSITION,
        &utils::content_disposition(&record.original_filename),
    );
    insert_header(
        &mut response_headers,
        "x-hako-expires-at",
        &record.expires_at.to_rfc3339(),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(range) = range {
        insert_header(
            &mut response_headers,
            header::CONTENT_RANGE,
            &range.content_range(size),
        );
    }

    state.metrics.download_served();
    debug!(%id, blob_key = %record.blob_key, start, length, "Serving content");

    let body = Body::from_stream(ReaderStream::new(reader.take(length)));
    Ok((status, response_headers, body).into_response())
}

fn insert_header(headers: &mut HeaderMap, name: impl header::IntoHeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!(value, "Skipping header value that is not representable"),
    }
}

/// Upload page (GET /)
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../web/index.html"))
}

/// Health check endpoint (GET /health, GET /operators/health)
///
/// Probes the ledger and the blob store. Returns 503 Service Unavailable if
/// either fails, 200 OK otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.ledger.last_reclaim_run() {
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            warn!(error = %e, "Ledger health probe failed");
            "unhealthy".to_string()
        }
    };
    components.insert("ledger".to_string(), ledger);

    let probe = BlobKey::from_digest(&[0u8; 32]);
    let storage = match state.blobs.exists(&probe).await {
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            warn!(error = %e, "Storage health probe failed");
            "unhealthy".to_string()
        }
    };
    components.insert("storage".to_string(), storage);

    let all_healthy = components.values().all(|status| status == "healthy");
    let (overall_status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

/// Operator counters (GET /operators/stats)
pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let last_reclaim_at = state
        .ledger
        .last_reclaim_run()
        .map_err(|e| ApiError::Internal(format!("failed to read reclaim marker: {e}")))?;

    Ok(Json(StatsResponse {
        counters: state.metrics.snapshot(),
        reclaim_policy: state.config.retention.policy,
        last_reclaim_at,
    }))
}
