//! JSON enumeration spellings used by the `$JSON` layout metadata.
//!
//! Every enum deserializes leniently: a string this build does not know maps
//! to the default variant instead of failing the parse, so newer files with
//! extended vocabularies still open.

use serde::Deserialize;

/// Partitioning scheme of an imaged disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DiskFormat {
    #[serde(rename = "mbr")]
    #[default]
    Mbr,
    #[serde(rename = "gpt")]
    Gpt,
    #[serde(rename = "dynamic")]
    Dynamic,
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl DiskFormat {
    pub fn name(self) -> &'static str {
        match self {
            DiskFormat::Mbr => "MBR",
            DiskFormat::Gpt => "GPT",
            DiskFormat::Dynamic => "dynamic",
            DiskFormat::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum BackupType {
    #[serde(rename = "diff")]
    Differential,
    #[serde(rename = "inc")]
    Incremental,
    #[serde(rename = "full", other)]
    #[default]
    Full,
}

impl BackupType {
    pub fn name(self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Differential => "differential",
            BackupType::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CompressionType {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "medium", other)]
    #[default]
    Medium,
}

impl CompressionType {
    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Medium => "medium",
            CompressionType::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CompressionMethod {
    #[serde(rename = "zstd", other)]
    #[default]
    ZStd,
}

/// AES strength; selects the key length the decrypt paths read from the
/// front of the derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AesType {
    #[serde(rename = "aes-128")]
    Aes128,
    #[serde(rename = "aes-192")]
    Aes192,
    #[serde(rename = "aes-256")]
    Aes256,
    #[serde(rename = "none", other)]
    #[default]
    None,
}

impl AesType {
    pub fn name(self) -> &'static str {
        match self {
            AesType::None => "none",
            AesType::Aes128 => "AES-128",
            AesType::Aes192 => "AES-192",
            AesType::Aes256 => "AES-256",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum KeyDerivation {
    #[serde(rename = "pbkdf2", other)]
    #[default]
    Pbkdf2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FileSystemType {
    #[serde(rename = "ReFS")]
    ReFs,
    #[serde(rename = "exFAT")]
    ExFat,
    #[serde(rename = "NTFS")]
    Ntfs,
    #[serde(rename = "FAT32")]
    Fat32,
    #[serde(rename = "FAT16")]
    Fat16,
    #[serde(rename = "FAT12")]
    Fat12,
    #[serde(rename = "ext")]
    LinuxExt,
    #[serde(rename = "unknown", other)]
    #[default]
    Unknown,
}

impl FileSystemType {
    pub fn name(self) -> &'static str {
        match self {
            FileSystemType::Unknown => "unknown",
            FileSystemType::ReFs => "ReFS",
            FileSystemType::ExFat => "exFAT",
            FileSystemType::Ntfs => "NTFS",
            FileSystemType::Fat32 => "FAT32",
            FileSystemType::Fat16 => "FAT16",
            FileSystemType::Fat12 => "FAT12",
            FileSystemType::LinuxExt => "ext",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum BitLockerState {
    #[serde(rename = "locked")]
    Locked,
    #[serde(rename = "unlocked")]
    Unlocked,
    #[serde(rename = "none", other)]
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum PartitionType {
    #[serde(rename = "unallocated")]
    Unallocated,
    #[serde(rename = "logical")]
    Logical,
    #[serde(rename = "primary", other)]
    #[default]
    Primary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum MediaType {
    #[serde(rename = "removable_media")]
    RemovableMedia,
    #[serde(rename = "fixed_media", other)]
    #[default]
    FixedMedia,
}

/// Container flavour: whole-partition image or file-and-folder backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FileType {
    #[serde(rename = "file_and_folder")]
    FileAndFolder,
    #[serde(rename = "partition", other)]
    #[default]
    Partition,
}
