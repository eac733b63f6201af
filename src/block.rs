//! Metadata block envelope and decode pipeline.
//!
//! # On-disk layout (32 bytes, packed, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   block_name    8 ASCII bytes, space-padded ("$JSON   ", …)
//!    8      4   block_length  payload bytes following the envelope (LE u32)
//!   12     16   hash          MD5 of the payload AS STORED on disk
//!   28      1   flags         bit 0 last_block, bit 1 compression, bit 2 encryption
//!   29      3   padding       ignored
//! ```
//!
//! The envelope hash covers the stored bytes — after compression and
//! encryption — so it is verified before any decoding. Data blocks reached
//! through the `$INDEX` arrays hash the *decoded* bytes instead; see
//! `restore`. That asymmetry is part of the format.
//!
//! Every non-split container ends with a 20-byte footer: a LE u64 offset to
//! the first file-level envelope followed by the 12 magic bytes
//! `MACRIUM_FILE`.

use crate::codec::zstd_decompress;
use crate::crypto;
use crate::error::{ImageError, Result};
use crate::layout::Encryption;
use crate::reader::ImageFile;

// ── Footer ───────────────────────────────────────────────────────────────────

/// Magic trailer of every container file (no NUL).
pub const FOOTER_MAGIC: &[u8; 12] = b"MACRIUM_FILE";

/// Footer size: LE u64 header offset + the magic bytes.
pub const FOOTER_SIZE: u64 = 8 + FOOTER_MAGIC.len() as u64;

// ── Block names ──────────────────────────────────────────────────────────────

pub const BLOCK_NAME_SIZE: usize = 8;

/// File header JSON data.
pub const JSON_HEADER: &[u8; 8] = b"$JSON   ";
/// Partition allocation bitmap.
pub const BITMAP_HEADER: &[u8; 8] = b"$BITMAP ";
/// FAT32 file allocation table data.
pub const FAT_HEADER: &[u8; 8] = b"$FAT    ";
/// Changed Block Tracking data.
pub const CBT_HEADER: &[u8; 8] = b"$CBT    ";
/// Master File Table data.
pub const MFT_HEADER: &[u8; 8] = b"$MFT    ";
/// First 1 MiB of the disk.
pub const TRACK0_HEADER: &[u8; 8] = b"$TRACK0 ";
/// Reserved sectors and data block index.
pub const IDX_HEADER: &[u8; 8] = b"$INDEX  ";
/// Extended partition table data.
pub const EPT_HEADER: &[u8; 8] = b"$EPT    ";

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Envelope size on disk.
pub const BLOCK_HEADER_SIZE: usize = 32;

const FLAG_LAST_BLOCK: u8 = 0x01;
const FLAG_COMPRESSION: u8 = 0x02;
const FLAG_ENCRYPTION: u8 = 0x04;

#[derive(Debug, Clone, Copy)]
pub struct MetadataBlockHeader {
    pub block_name: [u8; BLOCK_NAME_SIZE],
    pub block_length: u32,
    pub hash: [u8; 16],
    pub flags: u8,
}

impl MetadataBlockHeader {
    pub fn from_bytes(buf: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        let mut block_name = [0u8; BLOCK_NAME_SIZE];
        block_name.copy_from_slice(&buf[0..8]);
        let block_length = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&buf[12..28]);
        let flags = buf[28];
        Self { block_name, block_length, hash, flags }
    }

    /// Read one envelope at the reader's current position.
    pub fn read(file: &mut ImageFile) -> Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        file.read_exact(&mut buf)?;
        Ok(Self::from_bytes(&buf))
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST_BLOCK != 0
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSION != 0
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTION != 0
    }

    /// Block name for diagnostics, trailing spaces trimmed.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.block_name).trim_end().to_string()
    }
}

// ── Decode pipeline ──────────────────────────────────────────────────────────

/// Read and decode a metadata block payload at the reader's current
/// position.
///
/// Pipeline, in order: read `block_length` stored bytes, verify the envelope
/// MD5 over them, AES-ECB decrypt if flagged, ZSTD decompress if flagged.
/// Returns `None` for zero-length blocks (the `last_block` flag still
/// applies to their envelope).
pub fn read_block(
    file: &mut ImageFile,
    header: &MetadataBlockHeader,
    encryption: &Encryption,
) -> Result<Option<Vec<u8>>> {
    if header.block_length == 0 {
        return Ok(None);
    }

    let mut buf = vec![0u8; header.block_length as usize];
    file.read_exact(&mut buf)?;

    if crypto::md5(&buf) != header.hash {
        return Err(ImageError::HashMismatch);
    }

    if header.is_encrypted() {
        let key = encryption
            .derived_key()
            .ok_or_else(|| ImageError::CryptoInit("no derived key for encrypted block".into()))?;
        crypto::decrypt_ecb(encryption.aes_type, key, &mut buf)?;
    }

    if header.is_compressed() {
        buf = zstd_decompress(&buf)?;
    }

    Ok(Some(buf))
}
