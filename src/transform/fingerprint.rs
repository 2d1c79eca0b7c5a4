//! Canonical keys for transform requests.
//!
//! A [`Fingerprint`] is the SHA-256 digest of a length-prefixed encoding of
//! the request: source identifier, output format, quality, then every
//! operation in order. The operation list is never sorted or normalized, so
//! `resize` then `crop` and `crop` then `resize` produce different keys.
//!
//! The same key is used for the result cache and for coalescing concurrent
//! identical requests.

use std::fmt;

use sha2::{Digest, Sha256};

use super::request::{FlipAxis, Operation, OutputFormat, ResizeMode, TransformRequest};

/// Fixed-size key derived from a [`TransformRequest`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of a request.
    pub fn of(request: &TransformRequest) -> Self {
        let mut hasher = Sha256::new();

        write_bytes(&mut hasher, request.source_id.as_bytes());
        hasher.update([format_tag(request.format), request.quality]);
        hasher.update((request.operations.len() as u64).to_le_bytes());
        for op in &request.operations {
            write_operation(&mut hasher, op);
        }

        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, suitable for logs and `ETag` values.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix keeps log lines readable
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn write_u32s(hasher: &mut Sha256, tag: u8, values: &[u32]) {
    hasher.update([tag]);
    for v in values {
        hasher.update(v.to_le_bytes());
    }
}

fn format_tag(format: OutputFormat) -> u8 {
    match format {
        OutputFormat::Jpeg => 1,
        OutputFormat::Png => 2,
        OutputFormat::Gif => 3,
        OutputFormat::Webp => 4,
    }
}

fn write_operation(hasher: &mut Sha256, op: &Operation) {
    match *op {
        Operation::Resize(ResizeMode::Width(w)) => write_u32s(hasher, 1, &[w]),
        Operation::Resize(ResizeMode::Height(h)) => write_u32s(hasher, 2, &[h]),
        Operation::Resize(ResizeMode::Longest(m)) => write_u32s(hasher, 3, &[m]),
        Operation::Resize(ResizeMode::Exact { width, height }) => {
            write_u32s(hasher, 4, &[width, height])
        }
        Operation::Crop {
            x,
            y,
            width,
            height,
        } => write_u32s(hasher, 5, &[x, y, width, height]),
        Operation::Rotate(rotation) => write_u32s(hasher, 6, &[rotation.degrees()]),
        Operation::Flip(FlipAxis::Horizontal) => write_u32s(hasher, 7, &[0]),
        Operation::Flip(FlipAxis::Vertical) => write_u32s(hasher, 7, &[1]),
        Operation::Grayscale => write_u32s(hasher, 8, &[]),
        Operation::Blur { sigma } => write_u32s(hasher, 9, &[sigma.to_bits()]),
    }
}
