//! Request-processing pipeline between the HTTP layer and the pixel routines.
//!
//! This module provides:
//! - [`TransformRequest`] and the operation model, parsed from query parameters
//! - [`Fingerprint`], the canonical key of a request
//! - [`SizedLruCache`], the byte-bounded result cache
//! - [`ImagingLibrary`], the decode/apply/encode boundary
//! - [`TransformManager`], the actor that deduplicates, queues, dispatches
//!   and caches transforms on a fixed worker pool
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pixelpipe::source::FsImageSource;
//! use pixelpipe::transform::{ImageCrateLibrary, ManagerConfig, TransformManager};
//!
//! let manager = TransformManager::spawn(
//!     ManagerConfig::default(),
//!     Arc::new(FsImageSource::new("/srv/images")),
//!     Arc::new(ImageCrateLibrary::new()),
//! );
//! let output = manager.transform(request).await?;
//! ```

mod cache;
mod fingerprint;
mod imaging;
mod manager;
mod request;
mod worker;

pub use cache::{CachePut, SizedLruCache, Weighted, DEFAULT_CACHE_CAPACITY};
pub use fingerprint::Fingerprint;
pub use imaging::{
    run_pipeline, scale_second_component, target_size, ImageCrateLibrary, ImagingLibrary,
    PipelineOutput, DEFAULT_MAX_PIXELS,
};
pub use manager::{
    default_worker_count, ImageOrigin, ManagerConfig, ManagerStats, TransformManager,
    TransformOutput, TransformTicket, TransformTimings, DEFAULT_INBOX_CAPACITY,
    DEFAULT_QUEUE_CAPACITY,
};
pub use request::{
    has_illegal_path_components, parse_operations, FlipAxis, Operation, OutputFormat,
    RequestConstraints, ResizeMode, Rotation, TransformQuery, TransformRequest, DEFAULT_MAX_SIDE,
    DEFAULT_MAX_OPERATIONS, DEFAULT_QUALITY,
};
pub use worker::{Completion, Job, TransformedImage, Worker, WorkerId};
