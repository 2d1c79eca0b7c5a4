//! # pixelpipe
//!
//! An HTTP image transformation service: clients ask for a source image to be
//! resized, cropped, rotated, recompressed or otherwise transformed, and get
//! the transformed bytes back.
//!
//! ## Features
//!
//! - **Request coalescing**: identical concurrent requests run one transform
//! - **Bounded worker pool**: a fixed number of workers with a bounded
//!   admission queue and fast rejection when saturated
//! - **Result cache**: byte-bounded LRU keyed by a request fingerprint
//! - **Sources**: local directory or S3-compatible object storage
//!
//! ## Architecture
//!
//! - [`transform`] - Request model, fingerprints, cache, workers and the manager
//! - [`source`] - Image sources (filesystem, S3)
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pixelpipe::{create_router, FsImageSource, ImageCrateLibrary, ManagerConfig, RouterConfig, TransformManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(FsImageSource::new("/srv/images"));
//!     let manager = TransformManager::spawn(
//!         ManagerConfig::default(),
//!         source.clone(),
//!         Arc::new(ImageCrateLibrary::new()),
//!     );
//!     let router = create_router(manager, source, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod source;
pub mod transform;

// Re-export commonly used types
pub use config::{parse_byte_size, Config, SourceConfig};
pub use error::{ImagingError, OverloadReason, RequestError, SourceError, TransformError};
pub use server::{create_router, AdminGuard, AppState, ErrorResponse, RouterConfig};
pub use source::{create_s3_client, FsImageSource, ImageSource, S3ImageSource};
pub use transform::{
    Fingerprint, ImageCrateLibrary, ImageOrigin, ImagingLibrary, ManagerConfig, ManagerStats,
    Operation, OutputFormat, SizedLruCache, TransformManager, TransformOutput, TransformRequest,
    TransformTicket,
};
