//! Pixel-level decode, transform and encode.
//!
//! The [`ImagingLibrary`] trait is the boundary between the worker pool and
//! the code that actually touches pixels. [`ImageCrateLibrary`] implements it
//! on top of the `image` crate; tests substitute their own implementations to
//! simulate slow or failing transforms.
//!
//! # Design Decisions
//!
//! - **Always decode/encode**: every transform decodes the source and
//!   re-encodes into the requested format, even with an empty operation list.
//! - **Aspect-preserving resizes** scale the free side with rounding and never
//!   go below one pixel.
//! - **Pixel budget**: results larger than `max_pixels` are refused before any
//!   allocation happens.

use std::borrow::Cow;
use std::io::Cursor;
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat, ImageReader};

use crate::error::ImagingError;

use super::request::{FlipAxis, Operation, OutputFormat, ResizeMode, Rotation, TransformRequest};

/// Default limit on the pixel count of a resize result (25 megapixels).
pub const DEFAULT_MAX_PIXELS: u64 = 25_000_000;

// =============================================================================
// Imaging Library Trait
// =============================================================================

/// The three primitives a transform is built from.
///
/// Implementations are called from blocking threads and may take as long as
/// the codec needs.
pub trait ImagingLibrary: Send + Sync {
    /// Decode source bytes, guessing the format from their content.
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, ImagingError>;

    /// Apply one operation, consuming the input image.
    fn apply(&self, image: DynamicImage, op: &Operation) -> Result<DynamicImage, ImagingError>;

    /// Encode an image into `format`. `quality` only affects lossy encoders.
    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, ImagingError>;
}

/// Bytes and timings produced by [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub data: Bytes,
    /// Decode plus all operations
    pub transform_time: Duration,
    pub encode_time: Duration,
}

/// Decode `source`, apply every operation of `request` in order and encode
/// the result.
pub fn run_pipeline(
    library: &dyn ImagingLibrary,
    source: &[u8],
    request: &TransformRequest,
) -> Result<PipelineOutput, ImagingError> {
    let started = Instant::now();
    let mut image = library.decode(source)?;
    for op in &request.operations {
        image = library.apply(image, op)?;
    }
    let transform_time = started.elapsed();

    let started = Instant::now();
    let data = library.encode(&image, request.format, request.quality)?;
    let encode_time = started.elapsed();

    Ok(PipelineOutput {
        data,
        transform_time,
        encode_time,
    })
}

// =============================================================================
// image-crate Implementation
// =============================================================================

/// [`ImagingLibrary`] backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageCrateLibrary {
    max_pixels: u64,
    filter: FilterType,
}

impl ImageCrateLibrary {
    /// Create a library with the default pixel budget.
    pub fn new() -> Self {
        Self::with_max_pixels(DEFAULT_MAX_PIXELS)
    }

    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self {
            max_pixels,
            filter: FilterType::CatmullRom,
        }
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    fn resize(&self, image: DynamicImage, mode: ResizeMode) -> Result<DynamicImage, ImagingError> {
        let (width, height) = target_size(image.width(), image.height(), mode);

        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_pixels {
            return Err(ImagingError::Operation {
                operation: "resize",
                message: format!(
                    "result of {}x{} ~ {} pixels exceeds limit of {}",
                    width, height, pixels, self.max_pixels
                ),
            });
        }

        Ok(image.resize_exact(width, height, self.filter))
    }
}

impl Default for ImageCrateLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagingLibrary for ImageCrateLibrary {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, ImagingError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ImagingError::Decode {
                message: e.to_string(),
            })?;

        if reader.format().is_none() {
            return Err(ImagingError::Decode {
                message: "unrecognized image format".to_string(),
            });
        }

        reader.decode().map_err(|e| ImagingError::Decode {
            message: e.to_string(),
        })
    }

    fn apply(&self, image: DynamicImage, op: &Operation) -> Result<DynamicImage, ImagingError> {
        match *op {
            Operation::Resize(mode) => self.resize(image, mode),
            Operation::Crop {
                x,
                y,
                width,
                height,
            } => {
                let fits_x = x.checked_add(width).is_some_and(|r| r <= image.width());
                let fits_y = y.checked_add(height).is_some_and(|b| b <= image.height());
                if !fits_x || !fits_y {
                    return Err(ImagingError::Operation {
                        operation: "crop",
                        message: format!(
                            "region {}x{}+{}+{} is outside the {}x{} image",
                            width,
                            height,
                            x,
                            y,
                            image.width(),
                            image.height()
                        ),
                    });
                }
                Ok(image.crop_imm(x, y, width, height))
            }
            Operation::Rotate(Rotation::Deg90) => Ok(image.rotate90()),
            Operation::Rotate(Rotation::Deg180) => Ok(image.rotate180()),
            Operation::Rotate(Rotation::Deg270) => Ok(image.rotate270()),
            Operation::Flip(FlipAxis::Horizontal) => Ok(image.fliph()),
            Operation::Flip(FlipAxis::Vertical) => Ok(image.flipv()),
            Operation::Grayscale => Ok(image.grayscale()),
            Operation::Blur { sigma } => Ok(image.blur(sigma)),
        }
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, ImagingError> {
        let encode_err = |e: image::ImageError| ImagingError::Encode {
            message: e.to_string(),
        };
        let mut output = Vec::new();

        match format {
            OutputFormat::Jpeg => {
                let quality = quality.clamp(1, 100);
                let img = jpeg_compatible(image);
                img.write_with_encoder(JpegEncoder::new_with_quality(&mut output, quality))
                    .map_err(encode_err)?;
            }
            OutputFormat::Png => {
                let img = png_compatible(image);
                img.write_with_encoder(PngEncoder::new(&mut output))
                    .map_err(encode_err)?;
            }
            OutputFormat::Webp => {
                // The image crate only ships a lossless WebP encoder
                let img = eight_bit(image);
                img.write_with_encoder(WebPEncoder::new_lossless(&mut output))
                    .map_err(encode_err)?;
            }
            OutputFormat::Gif => {
                let img = DynamicImage::ImageRgba8(image.to_rgba8());
                let mut cursor = Cursor::new(&mut output);
                img.write_to(&mut cursor, ImageFormat::Gif)
                    .map_err(encode_err)?;
            }
        }

        Ok(Bytes::from(output))
    }
}

/// Scale `second` by `dest / source`, rounding and keeping at least one pixel.
pub fn scale_second_component(source: u32, dest: u32, second: u32) -> u32 {
    if source == 0 {
        return dest.max(1);
    }
    let scale = f64::from(dest) / f64::from(source);
    let scaled = (f64::from(second) * scale).round();
    (scaled as u32).max(1)
}

/// Compute the dimensions of a resize result.
pub fn target_size(width: u32, height: u32, mode: ResizeMode) -> (u32, u32) {
    match mode {
        ResizeMode::Width(w) => (w, scale_second_component(width, w, height)),
        ResizeMode::Height(h) => (scale_second_component(height, h, width), h),
        ResizeMode::Longest(m) if width > height => (m, scale_second_component(width, m, height)),
        ResizeMode::Longest(m) => (scale_second_component(height, m, width), m),
        ResizeMode::Exact { width, height } => (width, height),
    }
}

fn jpeg_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image.color() {
        ColorType::L8 | ColorType::Rgb8 => Cow::Borrowed(image),
        ColorType::L16 | ColorType::La8 | ColorType::La16 => {
            Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8()))
        }
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    }
}

fn png_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image.color() {
        ColorType::Rgb32F | ColorType::Rgba32F => {
            Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
        }
        _ => Cow::Borrowed(image),
    }
}

fn eight_bit(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image.color() {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
            Cow::Borrowed(image)
        }
        _ => Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8())),
    }
}

// =============================================================================
// Tests
// =============================================================================
