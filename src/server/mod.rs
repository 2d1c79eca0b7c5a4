//! HTTP server layer for pixelpipe.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET /images/{*path}?ops=resize:200x;rotate:90            │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    admin    │  │        routes           │  │
//! │  │ (requests)  │  │ (op token)  │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 ▼
//!                         TransformManager
//! ```

pub mod admin;
pub mod handlers;
pub mod routes;

pub use admin::{AdminError, AdminGuard, DEFAULT_REJECT_DELAY};
pub use handlers::{
    delete_cache_handler, health_handler, image_handler, stats_handler, AppState,
    CacheQueryParams, ClearCacheResponse, ErrorResponse, HealthResponse, ENCODE_TIME_HEADER,
    IMAGE_SOURCE_HEADER, TRANSFORM_TIME_HEADER,
};
pub use routes::{create_router, RouterConfig};
