//! Test utilities for integration tests.
//!
//! This module provides a mock image source that counts and optionally gates
//! fetches, plus helpers for building test images and routers.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use tokio::sync::{RwLock, Semaphore};
use tower::ServiceExt;

use pixelpipe::error::SourceError;
use pixelpipe::source::ImageSource;
use pixelpipe::transform::{ImageCrateLibrary, ManagerConfig, TransformManager};
use pixelpipe::{create_router, RouterConfig};

// =============================================================================
// Mock Image Source
// =============================================================================

/// An in-memory image source that records every fetch.
///
/// When gated, each fetch waits for a permit released with [`release`],
/// which keeps workers busy for as long as a test needs.
///
/// [`release`]: MockImageSource::release
#[derive(Clone)]
pub struct MockImageSource {
    images: Arc<HashMap<String, Bytes>>,
    fetch_count: Arc<AtomicUsize>,
    fetches: Arc<RwLock<Vec<String>>>,
    gate: Option<Arc<Semaphore>>,
    panic_on: Option<String>,
}

impl MockImageSource {
    pub fn new() -> Self {
        Self {
            images: Arc::new(HashMap::new()),
            fetch_count: Arc::new(AtomicUsize::new(0)),
            fetches: Arc::new(RwLock::new(Vec::new())),
            gate: None,
            panic_on: None,
        }
    }

    pub fn with_image(mut self, id: impl Into<String>, data: Vec<u8>) -> Self {
        Arc::make_mut(&mut self.images).insert(id.into(), Bytes::from(data));
        self
    }

    /// Block every fetch until a permit is released.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Panic inside `fetch` whenever `id` is requested.
    pub fn panicking_on(mut self, id: impl Into<String>) -> Self {
        self.panic_on = Some(id.into());
        self
    }

    /// Let `n` blocked (or future) fetches proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Identifiers in the order they were fetched.
    pub async fn fetches(&self) -> Vec<String> {
        self.fetches.read().await.clone()
    }
}

impl Default for MockImageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, SourceError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetches.write().await.push(id.to_string());

        if self.panic_on.as_deref() == Some(id) {
            panic!("mock source failure for {}", id);
        }

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| SourceError::Connection(e.to_string()))?;
            permit.forget();
        }

        self.images
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    fn describe(&self) -> String {
        "mock://".to_string()
    }
}

// =============================================================================
// Manager and Router Builders
// =============================================================================

/// Manager configuration with short timers, suitable for tests.
pub fn test_manager_config(workers: usize, queue_capacity: usize) -> ManagerConfig {
    ManagerConfig {
        workers,
        queue_capacity,
        cache_capacity: 16 * 1024 * 1024,
        ..Default::default()
    }
}

pub fn spawn_manager(source: &MockImageSource, config: ManagerConfig) -> TransformManager {
    TransformManager::spawn(
        config,
        Arc::new(source.clone()),
        Arc::new(ImageCrateLibrary::new()),
    )
}

/// Router over `source` with no reject delay on admin requests.
pub fn test_router(source: &MockImageSource, config: ManagerConfig) -> Router {
    test_router_with(source, config, RouterConfig::new())
}

pub fn test_router_with(
    source: &MockImageSource,
    config: ManagerConfig,
    router_config: RouterConfig,
) -> Router {
    let manager = spawn_manager(source, config);
    create_router(
        manager,
        Arc::new(source.clone()),
        router_config
            .with_tracing(false)
            .with_admin_reject_delay(Duration::ZERO),
    )
}

/// Response parts collected for assertions.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

pub async fn delete(router: &Router, uri: &str) -> TestResponse {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Test Image Creation
// =============================================================================

/// Create a test JPEG image with a simple gradient pattern.
pub fn create_test_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = GrayImage::from_fn(width, height, |x, y| {
        let val = ((x + y) % 256) as u8;
        Luma([val])
    });

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(&img).unwrap();
    buf
}

/// Create a test RGB PNG image.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x % 256) as u8;
        let g = (y % 256) as u8;
        let b = ((x + y) % 256) as u8;
        Rgb([r, g, b])
    });

    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

// =============================================================================
// Validation Helpers
// =============================================================================

/// Check if data is a valid JPEG.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    // SOI and EOI markers
    if data[0] != 0xFF || data[1] != 0xD8 {
        return false;
    }
    if data[data.len() - 2] != 0xFF || data[data.len() - 1] != 0xD9 {
        return false;
    }

    image::load_from_memory_with_format(data, ImageFormat::Jpeg).is_ok()
}

/// Decode an image and return its dimensions.
pub fn dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).unwrap();
    (img.width(), img.height())
}
