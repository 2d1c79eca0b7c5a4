//! Transform requests and the operations they carry.
//!
//! A [`TransformRequest`] names a source image, an ordered list of
//! [`Operation`]s and an [`OutputFormat`]. Requests are immutable once built
//! and are shared between the manager and workers behind an `Arc`.
//!
//! Requests are usually built from query parameters with
//! [`TransformRequest::from_query`]. Two query dialects are accepted:
//!
//! - `ops=resize:200x;crop:0,0,100,100;grayscale` for any operation sequence
//! - `op=resize&width=200` (or `height` / `max`) for a single resize

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::RequestError;

/// Default output quality for lossy encoders.
pub const DEFAULT_QUALITY: u8 = 85;

/// Default upper bound for any requested side length, in pixels.
pub const DEFAULT_MAX_SIDE: u32 = 5000;

/// Default maximum number of operations in one request.
pub const DEFAULT_MAX_OPERATIONS: usize = 16;

/// Largest accepted blur sigma.
const MAX_BLUR_SIGMA: f32 = 100.0;

// =============================================================================
// Output Format
// =============================================================================

/// Encodings the service can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl OutputFormat {
    /// Look up a format by file extension or format name, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "gif" => Some(OutputFormat::Gif),
            "webp" => Some(OutputFormat::Webp),
            _ => None,
        }
    }

    /// Detect the format from the extension of a path.
    pub fn from_path(path: &str) -> Option<Self> {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Value for the `Content-Type` header.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Webp => "image/webp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Operations
// =============================================================================

/// How a resize picks the target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Set the width, scale the height to keep the aspect ratio
    Width(u32),
    /// Set the height, scale the width to keep the aspect ratio
    Height(u32),
    /// Set the longest side, scale the other one
    Longest(u32),
    /// Set both sides, ignoring the aspect ratio
    Exact { width: u32, height: u32 },
}

/// Clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

/// One step of a transform pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    Resize(ResizeMode),
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Rotate(Rotation),
    Flip(FlipAxis),
    Grayscale,
    Blur { sigma: f32 },
}

impl Operation {
    /// Short operation name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Resize(ResizeMode::Longest(_)) => "max",
            Operation::Resize(_) => "resize",
            Operation::Crop { .. } => "crop",
            Operation::Rotate(_) => "rotate",
            Operation::Flip(_) => "flip",
            Operation::Grayscale => "grayscale",
            Operation::Blur { .. } => "blur",
        }
    }

    /// Parse one `name[:args]` token of the `ops` query parameter.
    pub fn parse(token: &str) -> Result<Self, RequestError> {
        let (name, args) = match token.split_once(':') {
            Some((name, args)) => (name.trim(), Some(args.trim())),
            None => (token.trim(), None),
        };

        match name {
            "resize" => parse_resize(require_args("resize", args)?),
            "max" => Ok(Operation::Resize(ResizeMode::Longest(parse_u32(
                "max",
                require_args("max", args)?,
            )?))),
            "crop" => parse_crop(require_args("crop", args)?),
            "rotate" => match require_args("rotate", args)? {
                "90" => Ok(Operation::Rotate(Rotation::Deg90)),
                "180" => Ok(Operation::Rotate(Rotation::Deg180)),
                "270" => Ok(Operation::Rotate(Rotation::Deg270)),
                other => Err(invalid("rotate", format!("unsupported angle '{}'", other))),
            },
            "flip" => match require_args("flip", args)? {
                "h" | "horizontal" => Ok(Operation::Flip(FlipAxis::Horizontal)),
                "v" | "vertical" => Ok(Operation::Flip(FlipAxis::Vertical)),
                other => Err(invalid("flip", format!("unknown axis '{}'", other))),
            },
            "grayscale" => match args {
                None | Some("") => Ok(Operation::Grayscale),
                Some(_) => Err(invalid("grayscale", "takes no arguments")),
            },
            "blur" => {
                let raw = require_args("blur", args)?;
                let sigma: f32 = raw
                    .parse()
                    .map_err(|_| invalid("blur", format!("'{}' is not a number", raw)))?;
                Ok(Operation::Blur { sigma })
            }
            other => Err(RequestError::UnknownOperation(other.to_string())),
        }
    }

    /// Check the operation against size constraints.
    pub fn validate(&self, max_side: u32) -> Result<(), RequestError> {
        let check_side = |op: &'static str, what: &str, value: u32| {
            if value == 0 {
                Err(invalid(op, format!("{} cannot be 0", what)))
            } else if value > max_side {
                Err(invalid(
                    op,
                    format!(
                        "{} ({}) is too big, max possible value is {}",
                        what, value, max_side
                    ),
                ))
            } else {
                Ok(())
            }
        };

        match *self {
            Operation::Resize(ResizeMode::Width(w)) => check_side("resize", "width", w),
            Operation::Resize(ResizeMode::Height(h)) => check_side("resize", "height", h),
            Operation::Resize(ResizeMode::Longest(m)) => check_side("max", "max_side", m),
            Operation::Resize(ResizeMode::Exact { width, height }) => {
                check_side("resize", "width", width)?;
                check_side("resize", "height", height)
            }
            Operation::Crop { width, height, .. } => {
                check_side("crop", "width", width)?;
                check_side("crop", "height", height)
            }
            Operation::Blur { sigma } => {
                if sigma.is_finite() && sigma > 0.0 && sigma <= MAX_BLUR_SIGMA {
                    Ok(())
                } else {
                    Err(invalid(
                        "blur",
                        format!("sigma must be in (0, {}]", MAX_BLUR_SIGMA),
                    ))
                }
            }
            Operation::Rotate(_) | Operation::Flip(_) | Operation::Grayscale => Ok(()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Resize(ResizeMode::Width(w)) => write!(f, "resize:{}x", w),
            Operation::Resize(ResizeMode::Height(h)) => write!(f, "resize:x{}", h),
            Operation::Resize(ResizeMode::Longest(m)) => write!(f, "max:{}", m),
            Operation::Resize(ResizeMode::Exact { width, height }) => {
                write!(f, "resize:{}x{}", width, height)
            }
            Operation::Crop {
                x,
                y,
                width,
                height,
            } => write!(f, "crop:{},{},{},{}", x, y, width, height),
            Operation::Rotate(r) => write!(f, "rotate:{}", r.degrees()),
            Operation::Flip(FlipAxis::Horizontal) => f.write_str("flip:h"),
            Operation::Flip(FlipAxis::Vertical) => f.write_str("flip:v"),
            Operation::Grayscale => f.write_str("grayscale"),
            Operation::Blur { sigma } => write!(f, "blur:{}", sigma),
        }
    }
}

fn invalid(operation: &'static str, message: impl Into<String>) -> RequestError {
    RequestError::InvalidParameter {
        operation,
        message: message.into(),
    }
}

fn require_args<'a>(operation: &'static str, args: Option<&'a str>) -> Result<&'a str, RequestError> {
    match args {
        Some(a) if !a.is_empty() => Ok(a),
        _ => Err(invalid(operation, "missing arguments")),
    }
}

fn parse_u32(operation: &'static str, raw: &str) -> Result<u32, RequestError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(operation, format!("'{}' is not a non-negative integer", raw)))
}

fn parse_resize(args: &str) -> Result<Operation, RequestError> {
    let (w, h) = args
        .split_once('x')
        .ok_or_else(|| invalid("resize", "expected WxH, Wx or xH"))?;

    let mode = match (w.is_empty(), h.is_empty()) {
        (false, false) => ResizeMode::Exact {
            width: parse_u32("resize", w)?,
            height: parse_u32("resize", h)?,
        },
        (false, true) => ResizeMode::Width(parse_u32("resize", w)?),
        (true, false) => ResizeMode::Height(parse_u32("resize", h)?),
        (true, true) => return Err(invalid("resize", "expected WxH, Wx or xH")),
    };
    Ok(Operation::Resize(mode))
}

fn parse_crop(args: &str) -> Result<Operation, RequestError> {
    let parts: Vec<&str> = args.split(',').collect();
    if parts.len() != 4 {
        return Err(invalid("crop", "expected X,Y,W,H"));
    }
    Ok(Operation::Crop {
        x: parse_u32("crop", parts[0])?,
        y: parse_u32("crop", parts[1])?,
        width: parse_u32("crop", parts[2])?,
        height: parse_u32("crop", parts[3])?,
    })
}

/// Parse a `;`-separated operation list. Empty segments are ignored.
pub fn parse_operations(list: &str) -> Result<Vec<Operation>, RequestError> {
    list.split(';')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Operation::parse)
        .collect()
}

// =============================================================================
// Query Parameters
// =============================================================================

/// Query parameters of a transform request.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TransformQuery {
    /// Operation list, e.g. `resize:200x;rotate:90`
    #[serde(default)]
    pub ops: Option<String>,

    /// Single operation name (only `resize` is accepted)
    #[serde(default)]
    pub op: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// Longest side for `op=resize`
    #[serde(default)]
    pub max: Option<u32>,

    /// Output format; defaults to the source file extension
    #[serde(default, alias = "target-format")]
    pub format: Option<String>,

    /// Output quality (1-100)
    #[serde(default)]
    pub quality: Option<u32>,
}

impl TransformQuery {
    /// True when no transform parameter is present and the original image
    /// should be served as-is.
    pub fn is_empty(&self) -> bool {
        self.ops.is_none()
            && self.op.is_none()
            && self.width.is_none()
            && self.height.is_none()
            && self.max.is_none()
            && self.format.is_none()
            && self.quality.is_none()
    }

    fn legacy_resize(&self) -> Result<Option<Operation>, RequestError> {
        let has_dimensions = self.width.is_some() || self.height.is_some() || self.max.is_some();

        match self.op.as_deref() {
            None if has_dimensions => Err(RequestError::Conflict(
                "width, height and max require op=resize".to_string(),
            )),
            None => Ok(None),
            Some("resize") => {
                let mode = match (self.width, self.height, self.max) {
                    (Some(w), None, None) => ResizeMode::Width(w),
                    (None, Some(h), None) => ResizeMode::Height(h),
                    (None, None, Some(m)) => ResizeMode::Longest(m),
                    _ => {
                        return Err(invalid(
                            "resize",
                            "exactly one of width, height or max must be defined",
                        ))
                    }
                };
                Ok(Some(Operation::Resize(mode)))
            }
            Some(other) => Err(RequestError::UnknownOperation(other.to_string())),
        }
    }
}

/// Limits applied while building requests from untrusted input.
#[derive(Debug, Clone)]
pub struct RequestConstraints {
    /// Largest accepted side length in any operation
    pub max_side: u32,

    /// Largest accepted operation count
    pub max_operations: usize,

    /// Quality used when the request names none
    pub default_quality: u8,
}

impl Default for RequestConstraints {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
            max_operations: DEFAULT_MAX_OPERATIONS,
            default_quality: DEFAULT_QUALITY,
        }
    }
}

/// Reject paths that could climb out of the source root.
pub fn has_illegal_path_components(path: &str) -> bool {
    path.contains("..") || path.contains("//")
}

// =============================================================================
// Transform Request
// =============================================================================

/// A fully validated request for one transformed image.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    /// Source image identifier (relative path or object key)
    pub source_id: String,

    /// Operations applied in order
    pub operations: Vec<Operation>,

    /// Encoding of the result
    pub format: OutputFormat,

    /// Encoder quality (1-100), used by lossy formats
    pub quality: u8,
}

impl TransformRequest {
    /// Create a request with the default quality.
    pub fn new(
        source_id: impl Into<String>,
        operations: Vec<Operation>,
        format: OutputFormat,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            operations,
            format,
            quality: DEFAULT_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Build and validate a request from a URL path and its query parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is illegal, the output format cannot be
    /// determined, an operation is malformed or violates `constraints`, or
    /// the quality is out of range.
    pub fn from_query(
        path: &str,
        query: &TransformQuery,
        constraints: &RequestConstraints,
    ) -> Result<Self, RequestError> {
        let source_id = path.trim_start_matches('/');
        if source_id.is_empty() || has_illegal_path_components(source_id) {
            return Err(RequestError::IllegalPath(path.to_string()));
        }

        let format = match query.format.as_deref() {
            Some(name) => OutputFormat::from_extension(name)
                .ok_or_else(|| RequestError::UnknownFormat(name.to_string()))?,
            None => OutputFormat::from_path(source_id)
                .ok_or_else(|| RequestError::UnknownFormat(source_id.to_string()))?,
        };

        let legacy = query.legacy_resize()?;
        let operations = match (query.ops.as_deref(), legacy) {
            (Some(_), Some(_)) => {
                return Err(RequestError::Conflict(
                    "ops and op cannot be combined".to_string(),
                ))
            }
            (Some(list), None) => parse_operations(list)?,
            (None, Some(op)) => vec![op],
            (None, None) => Vec::new(),
        };

        if operations.len() > constraints.max_operations {
            return Err(RequestError::TooManyOperations {
                count: operations.len(),
                max: constraints.max_operations,
            });
        }
        for op in &operations {
            op.validate(constraints.max_side)?;
        }

        let quality = match query.quality {
            Some(q) if (1..=100).contains(&q) => q as u8,
            Some(q) => return Err(RequestError::InvalidQuality(q)),
            None => constraints.default_quality,
        };

        Ok(Self {
            source_id: source_id.to_string(),
            operations,
            format,
            quality,
        })
    }
}

impl fmt::Display for TransformRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.source_id)?;
        for (i, op) in self.operations.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}", op)?;
        }
        write!(f, "] -> {}@{}", self.format, self.quality)
    }
}

// =============================================================================
// Tests
// =============================================================================
