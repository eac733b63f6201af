//! Zstandard decompression for block payloads.
//!
//! The container compresses every payload as a single ZSTD frame carrying
//! its declared content size, so the decoder can size the output buffer from
//! the frame itself. Decode-only: this crate never writes containers.

use crate::error::{ImageError, Result};

/// Decompress one ZSTD frame.
pub fn zstd_decompress(src: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(src).map_err(|e| ImageError::Codec(e.to_string()))
}
