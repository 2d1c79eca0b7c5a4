//! Where original images come from.
//!
//! Workers fetch the complete bytes of a source image through the
//! [`ImageSource`] trait. Two adapters ship with the crate:
//!
//! ```text
//!              ┌─────────────────────┐
//!              │  ImageSource trait  │
//!              └──────────┬──────────┘
//!            ┌────────────┴────────────┐
//!            ▼                         ▼
//! ┌─────────────────────┐   ┌─────────────────────┐
//! │   FsImageSource     │   │   S3ImageSource     │
//! │ (local directory)   │   │ (bucket, GetObject) │
//! └─────────────────────┘   └─────────────────────┘
//! ```
//!
//! Identifiers are relative paths such as `photos/cat.jpg`; each adapter
//! resolves them against its own root.

mod fs;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SourceError;

pub use fs::FsImageSource;
pub use s3::{create_s3_client, S3ImageSource};

/// Provider of original image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch the complete contents of the image named `id`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::NotFound` when no such image exists and
    /// `SourceError::InvalidPath` when `id` cannot name an image.
    async fn fetch(&self, id: &str) -> Result<Bytes, SourceError>;

    /// Human-readable location for logs, e.g. `s3://bucket`.
    fn describe(&self) -> String;
}
