//! Configuration management for pixelpipe.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `PIXELPIPE_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use pixelpipe::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! - `PIXELPIPE_HOST` - Server bind address (default: 0.0.0.0)
//! - `PIXELPIPE_PORT` - Server port (default: 3000)
//! - `PIXELPIPE_ROOT_DIR` - Serve images from a local directory
//! - `PIXELPIPE_S3_BUCKET` - Serve images from an S3 bucket
//! - `PIXELPIPE_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `PIXELPIPE_S3_REGION` - AWS region (default: us-east-1)
//! - `PIXELPIPE_S3_PREFIX` - Key prefix inside the bucket
//! - `PIXELPIPE_WORKERS` - Transform workers (default: cores - 2, at least 1)
//! - `PIXELPIPE_QUEUE_CAPACITY` - Admission queue length (default: 64)
//! - `PIXELPIPE_CACHE_SIZE` - Result cache size, e.g. `100MB` (default: 100MB)
//! - `PIXELPIPE_CACHE_TTL` - Seconds an unread result stays cached (default: 3600)
//! - `PIXELPIPE_CACHE_SWEEP_INTERVAL` - Seconds between cache sweeps (default: 60)
//! - `PIXELPIPE_MAX_QUEUE_WAIT` - Seconds a request may wait for a worker (default: 20)
//! - `PIXELPIPE_PENDING_CHECK_INTERVAL` - Seconds between queue checks (default: 5)
//! - `PIXELPIPE_MAX_SIDE` - Largest side accepted in operations (default: 5000)
//! - `PIXELPIPE_MAX_PIXELS` - Largest resize result in pixels (default: 25000000)
//! - `PIXELPIPE_JPEG_QUALITY` - Default encoder quality (default: 85)
//! - `PIXELPIPE_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `PIXELPIPE_ADMIN_TOKEN` - Token for `DELETE /cache`
//! - `PIXELPIPE_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::server::RouterConfig;
use crate::transform::{
    default_worker_count, ManagerConfig, RequestConstraints, DEFAULT_INBOX_CAPACITY,
    DEFAULT_MAX_OPERATIONS, DEFAULT_MAX_PIXELS, DEFAULT_MAX_SIDE, DEFAULT_QUALITY,
    DEFAULT_QUEUE_CAPACITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default result cache size.
pub const DEFAULT_CACHE_SIZE: &str = "100MB";

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// pixelpipe - An on-the-fly image transformation server.
///
/// Resizes, crops, rotates and recompresses images from a local directory or
/// an S3 bucket, coalescing identical requests and caching results.
#[derive(Parser, Debug, Clone)]
#[command(name = "pixelpipe")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PIXELPIPE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PIXELPIPE_PORT")]
    pub port: u16,

    // =========================================================================
    // Source Configuration
    // =========================================================================
    /// Directory containing the source images.
    #[arg(long, env = "PIXELPIPE_ROOT_DIR", conflicts_with = "s3_bucket")]
    pub root_dir: Option<PathBuf>,

    /// S3 bucket containing the source images.
    #[arg(long, env = "PIXELPIPE_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "PIXELPIPE_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "PIXELPIPE_S3_REGION")]
    pub s3_region: String,

    /// Key prefix prepended to every image path in the bucket.
    #[arg(long, env = "PIXELPIPE_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    // =========================================================================
    // Worker Configuration
    // =========================================================================
    /// Number of transform workers (default: available cores minus 2).
    #[arg(long, env = "PIXELPIPE_WORKERS")]
    pub workers: Option<usize>,

    /// Requests allowed to wait for a worker before new ones are rejected.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, env = "PIXELPIPE_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Seconds a request may wait in the queue before it is rejected.
    #[arg(long, default_value_t = 20, env = "PIXELPIPE_MAX_QUEUE_WAIT")]
    pub max_queue_wait: u64,

    /// Seconds between checks for timed-out or disconnected requests.
    #[arg(long, default_value_t = 5, env = "PIXELPIPE_PENDING_CHECK_INTERVAL")]
    pub pending_check_interval: u64,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Result cache size (e.g. 512KB, 100MB, 1GB).
    #[arg(long, default_value = DEFAULT_CACHE_SIZE, value_parser = parse_byte_size, env = "PIXELPIPE_CACHE_SIZE")]
    pub cache_size: usize,

    /// Seconds an unread result stays in the cache.
    #[arg(long, default_value_t = 3600, env = "PIXELPIPE_CACHE_TTL")]
    pub cache_ttl: u64,

    /// Seconds between sweeps of stale cache entries.
    #[arg(long, default_value_t = 60, env = "PIXELPIPE_CACHE_SWEEP_INTERVAL")]
    pub cache_sweep_interval: u64,

    // =========================================================================
    // Transform Limits
    // =========================================================================
    /// Largest side length accepted in any operation.
    #[arg(long, default_value_t = DEFAULT_MAX_SIDE, env = "PIXELPIPE_MAX_SIDE")]
    pub max_side: u32,

    /// Largest resize result in pixels.
    #[arg(long, default_value_t = DEFAULT_MAX_PIXELS, env = "PIXELPIPE_MAX_PIXELS")]
    pub max_pixels: u64,

    /// Default encoder quality (1-100).
    #[arg(long, default_value_t = DEFAULT_QUALITY, env = "PIXELPIPE_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "PIXELPIPE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Admin and CORS Configuration
    // =========================================================================
    /// Token required by `DELETE /cache`. Without it cache deletion is disabled.
    #[arg(long, env = "PIXELPIPE_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "PIXELPIPE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

/// Where source images are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Directory(PathBuf),
    S3 {
        bucket: String,
        endpoint: Option<String>,
        region: String,
        prefix: Option<String>,
    },
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.source()?;

        if self.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        if self.cache_size == 0 {
            return Err("cache_size must be greater than 0".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.max_side == 0 {
            return Err("max_side must be greater than 0".to_string());
        }
        if self.max_pixels == 0 {
            return Err("max_pixels must be greater than 0".to_string());
        }
        if self.cache_sweep_interval == 0 || self.pending_check_interval == 0 {
            return Err("cache_sweep_interval and pending_check_interval must be greater than 0"
                .to_string());
        }

        Ok(())
    }

    /// Get the configured image source.
    pub fn source(&self) -> Result<SourceConfig, String> {
        match (&self.root_dir, &self.s3_bucket) {
            (Some(_), Some(_)) => Err("Set either --root-dir or --s3-bucket, not both".to_string()),
            (Some(dir), None) if dir.as_os_str().is_empty() => {
                Err("root_dir must not be empty".to_string())
            }
            (Some(dir), None) => Ok(SourceConfig::Directory(dir.clone())),
            (None, Some(bucket)) if bucket.is_empty() => Err(
                "S3 bucket name is required. Set --s3-bucket or PIXELPIPE_S3_BUCKET".to_string(),
            ),
            (None, Some(bucket)) => Ok(SourceConfig::S3 {
                bucket: bucket.clone(),
                endpoint: self.s3_endpoint.clone(),
                region: self.s3_region.clone(),
                prefix: self.s3_prefix.clone(),
            }),
            (None, None) => Err(
                "No image source. Set --root-dir (PIXELPIPE_ROOT_DIR) or --s3-bucket (PIXELPIPE_S3_BUCKET)"
                    .to_string(),
            ),
        }
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Number of workers, defaulting to the available cores minus 2.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => default_worker_count(),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            workers: self.worker_count(),
            queue_capacity: self.queue_capacity,
            cache_capacity: self.cache_size,
            cache_ttl: Duration::from_secs(self.cache_ttl),
            sweep_interval: Duration::from_secs(self.cache_sweep_interval),
            max_queue_wait: Duration::from_secs(self.max_queue_wait),
            pending_check_interval: Duration::from_secs(self.pending_check_interval),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }

    pub fn request_constraints(&self) -> RequestConstraints {
        RequestConstraints {
            max_side: self.max_side,
            max_operations: DEFAULT_MAX_OPERATIONS,
            default_quality: self.jpeg_quality,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        let mut router = RouterConfig::new()
            .with_cache_max_age(self.cache_max_age)
            .with_tracing(!self.no_tracing)
            .with_constraints(self.request_constraints());

        if let Some(origins) = &self.cors_origins {
            router = router.with_cors_origins(origins.clone());
        }
        if let Some(token) = &self.admin_token {
            router = router.with_admin_token(token.clone());
        }
        router
    }
}

/// Parse a human-readable byte size such as `512`, `64KB`, `100MB` or `1GiB`.
///
/// Units are binary: `KB` and `KiB` both mean 1024 bytes.
pub fn parse_byte_size(input: &str) -> Result<usize, String> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size: {:?}", input))?;

    let multiplier: usize = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        other => return Err(format!("unknown size unit: {:?}", other)),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {:?}", input))
}

// =============================================================================
// Tests
// =============================================================================
