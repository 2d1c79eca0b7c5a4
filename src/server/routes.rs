//! Router configuration for pixelpipe.
//!
//! # Route Structure
//!
//! ```text
//! /health                 - Health check
//! /stats                  - Manager statistics
//! /images/{*path}         - Transformed or original image
//! /cache?token=..         - DELETE clears the result cache
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pixelpipe::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_admin_token("s3cret")
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(manager, source, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get},
    Router,
};
use http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::admin::{AdminGuard, DEFAULT_REJECT_DELAY};
use super::handlers::{
    delete_cache_handler, health_handler, image_handler, stats_handler, AppState,
    ENCODE_TIME_HEADER, IMAGE_SOURCE_HEADER, TRANSFORM_TIME_HEADER,
};
use crate::source::ImageSource;
use crate::transform::{RequestConstraints, TransformManager};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Operator token for `DELETE /cache` (None = deletion always refused)
    pub admin_token: Option<String>,

    /// Delay before answering a wrong admin token
    pub admin_reject_delay: Duration,

    /// Limits applied to transform requests
    pub constraints: RequestConstraints,
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Cache max-age is 1 hour (3600 seconds)
    /// - Tracing is enabled
    /// - Cache deletion is disabled
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
            admin_token: None,
            admin_reject_delay: DEFAULT_REJECT_DELAY,
            constraints: RequestConstraints::default(),
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn with_admin_reject_delay(mut self, delay: Duration) -> Self {
        self.admin_reject_delay = delay;
        self
    }

    pub fn with_constraints(mut self, constraints: RequestConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// # Arguments
///
/// * `manager` - Handle to a running transform manager
/// * `source` - Image source, used directly for untransformed requests
/// * `config` - Router configuration
pub fn create_router(
    manager: TransformManager,
    source: Arc<dyn ImageSource>,
    config: RouterConfig,
) -> Router {
    let admin = AdminGuard::new(config.admin_token.clone())
        .with_reject_delay(config.admin_reject_delay);

    let app_state = AppState::new(manager, source)
        .with_constraints(config.constraints.clone())
        .with_cache_max_age(config.cache_max_age)
        .with_admin(admin);

    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/images/{*path}", get(image_handler))
        .route("/cache", delete(delete_cache_handler))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, IF_NONE_MATCH])
        .expose_headers([
            ETAG,
            IMAGE_SOURCE_HEADER,
            TRANSFORM_TIME_HEADER,
            ENCODE_TIME_HEADER,
        ])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
