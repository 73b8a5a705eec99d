//! Wire types for the upload, download and operator endpoints.
//!
//! Uploads answer with an [`UploadResponse`]:
//!
//! ```json
//! { "id": "3ntyw2hd5ehc", "expires_at": "2024-05-02T10:00:00Z" }
//! ```
//!
//! `id` is the base36 rendering of the record id and is the path segment
//! used to download the content again, optionally followed by an extension.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::observability::MetricsSnapshot;
use crate::reclaimer::ReclaimPolicy;

/// Query parameters accepted by `PUT /{name}`
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub expiry: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub counters: MetricsSnapshot,
    pub reclaim_policy: ReclaimPolicy,
    pub last_reclaim_at: Option<DateTime<Utc>>,
}
