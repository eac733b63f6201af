//! Crate-wide error type.
//!
//! Every fallible operation in the crate surfaces one of these kinds and
//! aborts on first failure. The two deliberate exceptions live in
//! `backup_set`: sibling files that fail to parse or fail the password check
//! are logged and skipped, never fatal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file: not a Macrium Reflect X image")]
    BadMagic,

    #[error("$JSON metadata block not found")]
    MissingJson,

    #[error("$TRACK0 metadata block not found")]
    MissingTrack0,

    #[error("$INDEX metadata block not found")]
    MissingIndex,

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Block hash mismatch")]
    HashMismatch,

    #[error("Cipher buffer length {0} is not a multiple of the AES block size")]
    CryptoSize(usize),

    #[error("Cipher initialisation failed: {0}")]
    CryptoInit(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Decompression error: {0}")]
    Codec(String),

    #[error("No disk with number {0} in this image")]
    UnknownDisk(i32),

    #[error("No backup file with file number {0} in this set")]
    UnknownFileNumber(u16),

    #[error("No full backup found in the backup set")]
    NoFullBackup,

    #[error("File is an intermediate split file; use the last file in the split")]
    SplitFileNotTerminal,

    #[error("{0}")]
    BadArgument(String),
}

pub type Result<T> = std::result::Result<T, ImageError>;
