//! # mrximg — Macrium Reflect X image reader and restore engine
//!
//! Reads `.mrimgx` / `.mrbakx` block-level backup containers and
//! reconstructs a byte-accurate raw disk image from a backup set (one full
//! backup plus any chain of delta backups).
//!
//! Format facts the implementation relies on:
//! - All multi-byte on-disk integers are little-endian; never negotiated
//! - Every non-split file ends with a 20-byte footer: LE u64 metadata
//!   offset + the 12 magic bytes `MACRIUM_FILE`
//! - Metadata blocks are framed by a 32-byte envelope (name, length, MD5 of
//!   the stored bytes, last/compressed/encrypted flags); walks terminate on
//!   the `last_block` flag
//! - Data blocks hash their *decoded* bytes; metadata blocks hash their
//!   *stored* bytes — the asymmetry is part of the format
//! - Encryption is AES-128/192/256 (ECB for metadata, CBC for data) under a
//!   PBKDF2-HMAC-SHA256 key; per-block IVs are derived from
//!   (image id, disk, partition, block index), never stored
//! - Compression is single-frame Zstandard per block
//! - Delta containers supersede slots of the most recent full backup's
//!   block index; resolution applies deltas oldest to newest
//!
//! Containers are strictly read-only here: this crate never writes or
//! modifies a backup file.

pub mod backup_set;
pub mod block;
pub mod codec;
pub mod crypto;
pub mod describe;
pub mod disk_id;
pub mod enums;
pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;
pub mod restore;

// Flat re-exports for the most common types.
pub use backup_set::{create_backup_set, BackupSet};
pub use error::{ImageError, Result};
pub use layout::{DataBlockIndexElement, DeltaDataBlock, FileLayout};
pub use parser::read_backup_file;
pub use restore::restore_disk;
