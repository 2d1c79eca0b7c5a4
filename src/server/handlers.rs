//! HTTP request handlers for the image API.
//!
//! # Endpoints
//!
//! - `GET /images/{*path}` - Transformed image, or the original without a query
//! - `GET /stats` - Manager statistics
//! - `DELETE /cache?token=..` - Clear the result cache
//! - `GET /health` - Health check endpoint

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{OverloadReason, RequestError, TransformError};
use crate::source::ImageSource;
use crate::transform::{
    has_illegal_path_components, Fingerprint, ManagerStats, OutputFormat, RequestConstraints,
    TransformManager, TransformOutput, TransformQuery, TransformRequest,
};

use super::admin::AdminGuard;

/// Where the response body came from: `cache`, `transform` or `original`.
pub const IMAGE_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-image-source");

/// Worker time spent decoding and transforming, in milliseconds.
pub const TRANSFORM_TIME_HEADER: HeaderName = HeaderName::from_static("x-transform-time-ms");

/// Worker time spent encoding, in milliseconds.
pub const ENCODE_TIME_HEADER: HeaderName = HeaderName::from_static("x-encode-time-ms");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the transform manager task
    pub manager: TransformManager,

    /// Source used directly for untransformed requests
    pub source: Arc<dyn ImageSource>,

    /// Limits applied to incoming transform requests
    pub constraints: Arc<RequestConstraints>,

    /// Cache-Control max-age in seconds (defaults to 1 hour)
    pub cache_max_age: u32,

    /// Guard for cache deletion
    pub admin: AdminGuard,
}

impl AppState {
    pub fn new(manager: TransformManager, source: Arc<dyn ImageSource>) -> Self {
        Self {
            manager,
            source,
            constraints: Arc::new(RequestConstraints::default()),
            cache_max_age: 3600,
            admin: AdminGuard::new(None),
        }
    }

    pub fn with_constraints(mut self, constraints: RequestConstraints) -> Self {
        self.constraints = Arc::new(constraints);
        self
    }

    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    pub fn with_admin(mut self, admin: AdminGuard) -> Self {
        self.admin = admin;
        self
    }

    fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age)
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for cache deletion.
#[derive(Debug, Deserialize)]
pub struct CacheQueryParams {
    #[serde(default)]
    pub token: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response from the cache deletion endpoint.
#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    /// Number of removed cache entries
    pub removed: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert TransformError to HTTP response.
///
/// - 5xx errors are logged at ERROR level, except overload (WARN)
/// - 404 is logged at DEBUG level (common and expected)
/// - other 4xx errors are logged at WARN level
impl IntoResponse for TransformError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TransformError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            TransformError::SourceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            TransformError::Overloaded { .. } => (StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            TransformError::TransformFailure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "transform_failed")
            }
            TransformError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!(error_type = error_type, status = status.as_u16(), "Overloaded: {}", message);
        } else if status.is_server_error() {
            error!(error_type = error_type, status = status.as_u16(), "Server error: {}", message);
        } else if status == StatusCode::NOT_FOUND {
            debug!(error_type = error_type, status = status.as_u16(), "Resource not found: {}", message);
        } else {
            warn!(error_type = error_type, status = status.as_u16(), "Client error: {}", message);
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        let mut response = (status, Json(error_response)).into_response();

        if let TransformError::Overloaded { reason } = self {
            let retry_after = match reason {
                OverloadReason::QueueTimeout => "5",
                OverloadReason::QueueFull | OverloadReason::Busy => "1",
            };
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static(retry_after));
        }

        response
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle image requests.
///
/// # Endpoint
///
/// `GET /images/{*path}`
///
/// # Query Parameters
///
/// - `ops`: `;`-separated operations, e.g. `resize:200x;rotate:90;grayscale`
/// - `op=resize` with one of `width`, `height`, `max`: single legacy resize
/// - `format` (or `target-format`): jpg, png, gif or webp (default: path extension)
/// - `quality`: encoder quality 1-100
///
/// Without any of these the original bytes are returned unchanged.
///
/// # Response
///
/// - `200 OK`: image bytes
/// - `304 Not Modified`: `If-None-Match` matches the request fingerprint
/// - `400 Bad Request`: illegal path, unknown format or invalid operation
/// - `404 Not Found`: source image does not exist
/// - `503 Service Unavailable`: too many requests in flight
/// - `500 Internal Server Error`: transform failure
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `ETag`: request fingerprint
/// - `X-Image-Source: cache|transform|original`
/// - `X-Transform-Time-Ms`, `X-Encode-Time-Ms` on freshly transformed images
pub async fn image_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    query: Result<Query<TransformQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, TransformError> {
    let Query(query) = query.map_err(|rejection| {
        TransformError::InvalidRequest(RequestError::InvalidParameter {
            operation: "query",
            message: rejection.body_text(),
        })
    })?;

    if has_illegal_path_components(&path) {
        return Err(RequestError::IllegalPath(path).into());
    }

    if query.is_empty() {
        return serve_original(&state, &path).await;
    }

    let request = TransformRequest::from_query(&path, &query, &state.constraints)?;
    let fingerprint = Fingerprint::of(&request);
    let etag = format!("\"{}\"", fingerprint);

    if if_none_match(&headers, &etag) {
        debug!(fingerprint = %fingerprint, "Not modified");
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag),
                (header::CACHE_CONTROL, state.cache_control()),
            ],
        )
            .into_response());
    }

    debug!(fingerprint = %fingerprint, request = %request, "Transform requested");
    let output = state.manager.submit(request).wait().await?;

    Ok(image_response(&state, output, etag))
}

fn image_response(state: &AppState, output: TransformOutput, etag: String) -> Response {
    let timing_headers = output.timings.map(|t| {
        [
            (TRANSFORM_TIME_HEADER, format_millis(t.transform)),
            (ENCODE_TIME_HEADER, format_millis(t.encode)),
        ]
    });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, output.format.content_type().to_string()),
            (header::CACHE_CONTROL, state.cache_control()),
            (header::ETAG, etag),
            (IMAGE_SOURCE_HEADER, output.origin.as_str().to_string()),
        ],
        timing_headers,
        Body::from(output.data),
    )
        .into_response()
}

/// Stream the source image without transforming it.
async fn serve_original(state: &AppState, path: &str) -> Result<Response, TransformError> {
    let source_id = path.trim_start_matches('/');
    let data = state
        .source
        .fetch(source_id)
        .await
        .map_err(|e| TransformError::from_source(source_id, e))?;

    let content_type = OutputFormat::from_path(source_id)
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, state.cache_control()),
            (IMAGE_SOURCE_HEADER, "original".to_string()),
        ],
        Body::from(data),
    )
        .into_response())
}

fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|candidate| candidate == etag || candidate == "*")
}

fn format_millis(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64() * 1000.0)
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle statistics requests.
///
/// # Endpoint
///
/// `GET /stats`
pub async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<ManagerStats>, TransformError> {
    Ok(Json(state.manager.stats().await?))
}

/// Handle cache deletion.
///
/// # Endpoint
///
/// `DELETE /cache?token={token}`
///
/// # Response
///
/// - `200 OK`: `{"removed": n}`
/// - `403 Forbidden`: missing token (immediately) or wrong token (after a delay)
pub async fn delete_cache_handler(
    State(state): State<AppState>,
    Query(params): Query<CacheQueryParams>,
) -> Response {
    if let Err(e) = state.admin.authorize(params.token.as_deref()).await {
        return e.into_response();
    }

    match state.manager.clear_cache().await {
        Ok(removed) => Json(ClearCacheResponse { removed }).into_response(),
        Err(e) => e.into_response(),
    }
}

// =============================================================================
// Tests
// =============================================================================
