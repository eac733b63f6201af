//! Typed layout model for one container file.
//!
//! Most of the model is populated from the `$JSON` metadata block. Fields
//! marked `serde(skip)` are filled in afterwards from the binary sections:
//! `track0` and the extended-partition records from the per-disk metadata,
//! the block-index vectors from the `$INDEX` payloads, and the binary forms
//! of the hex `imageid`/`hmac` strings.
//!
//! The packed on-disk records ([`DataBlockIndexElement`] 30 B,
//! [`DeltaDataBlock`] 34 B, [`ExtendedPartition`] 522 B) are decoded
//! field-by-field in little-endian order; nothing is memory-cast.

use std::io::{Cursor, Read};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::crypto::KEY_LENGTH;
use crate::enums::*;
use crate::error::Result;

// ── Packed index records ─────────────────────────────────────────────────────

/// On-disk size of a [`DataBlockIndexElement`].
pub const DATA_BLOCK_INDEX_SIZE: usize = 30;

/// On-disk size of a [`DeltaDataBlock`].
pub const DELTA_DATA_BLOCK_SIZE: usize = 34;

/// On-disk size of an [`ExtendedPartition`] record in the `$EPT` payload:
/// 522 meaningful bytes plus 6 bytes of struct padding.
pub const EXTENDED_PARTITION_SIZE: usize = 528;

/// Boot-record sector length replayed for each extended partition.
pub const BOOT_RECORD_SIZE: usize = 512;

/// One slot of a partition's block index: where the stored payload lives
/// (`file_number` names the owning container file in the set) and the MD5 of
/// its decoded bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataBlockIndexElement {
    pub file_position: i64,
    pub md5_hash: [u8; 16],
    pub block_length: u32,
    pub file_number: u16,
}

impl DataBlockIndexElement {
    pub fn from_bytes(buf: &[u8; DATA_BLOCK_INDEX_SIZE]) -> Result<Self> {
        let mut c = Cursor::new(&buf[..]);
        let file_position = c.read_i64::<LittleEndian>()?;
        let mut md5_hash = [0u8; 16];
        c.read_exact(&mut md5_hash)?;
        let block_length = c.read_u32::<LittleEndian>()?;
        let file_number = c.read_u16::<LittleEndian>()?;
        Ok(Self { file_position, md5_hash, block_length, file_number })
    }
}

/// A delta entry: an index element plus the logical slot it supersedes in
/// the base full backup's block vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaDataBlock {
    pub block: DataBlockIndexElement,
    pub block_index: u32,
}

impl DeltaDataBlock {
    pub fn from_bytes(buf: &[u8; DELTA_DATA_BLOCK_SIZE]) -> Result<Self> {
        let mut element = [0u8; DATA_BLOCK_INDEX_SIZE];
        element.copy_from_slice(&buf[..DATA_BLOCK_INDEX_SIZE]);
        let block = DataBlockIndexElement::from_bytes(&element)?;
        let mut c = Cursor::new(&buf[DATA_BLOCK_INDEX_SIZE..]);
        let block_index = c.read_u32::<LittleEndian>()?;
        Ok(Self { block, block_index })
    }
}

/// One `$EPT` record: a logical drive's boot-record sector and the absolute
/// byte offset it is replayed to on the restored disk.
#[derive(Debug, Clone)]
pub struct ExtendedPartition {
    pub partition_sector: [u8; BOOT_RECORD_SIZE],
    pub offset: u64,
    pub number: u16,
}

impl ExtendedPartition {
    pub fn from_bytes(buf: &[u8; EXTENDED_PARTITION_SIZE]) -> Result<Self> {
        let mut partition_sector = [0u8; BOOT_RECORD_SIZE];
        partition_sector.copy_from_slice(&buf[..BOOT_RECORD_SIZE]);
        let mut c = Cursor::new(&buf[BOOT_RECORD_SIZE..]);
        let offset = c.read_u64::<LittleEndian>()?;
        let number = c.read_u16::<LittleEndian>()?;
        // The last 6 bytes of the record are struct padding.
        Ok(Self { partition_sector, offset, number })
    }
}

// ── File-level JSON structures ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Header {
    pub imageid: String,
    pub file_number: u16,
    pub increment_number: u16,
    pub imaged_disks_count: u16,
    pub merged_files: Vec<i32>,
    pub split_file: bool,
    pub netbios_name: String,
    pub backup_time: i64,
    pub backupset_time: i64,
    pub backup_guid: String,
    pub index_file_position: u64,
    pub delta_index: bool,
    pub json_version: i32,
    pub backup_type: BackupType,
    pub backup_format: FileType,
    #[serde(skip)]
    pub imageid_binary: [u8; 8],
}

impl Default for Header {
    fn default() -> Self {
        Self {
            imageid: String::new(),
            file_number: 0,
            increment_number: 0,
            imaged_disks_count: 0,
            merged_files: Vec::new(),
            split_file: false,
            netbios_name: String::new(),
            backup_time: 0,
            backupset_time: 0,
            backup_guid: String::new(),
            index_file_position: 0,
            delta_index: true,
            json_version: 1,
            backup_type: BackupType::default(),
            backup_format: FileType::default(),
            imageid_binary: [0u8; 8],
        }
    }
}

impl Header {
    /// Decode the 16-hex-digit `imageid` into its 8-byte binary form (the
    /// PBKDF2 salt seed and the leading bytes of every data-block IV). A
    /// malformed id leaves the binary form zeroed.
    pub fn set_imageid_binary(&mut self) {
        if self.imageid.len() == 16 {
            if let Ok(bytes) = hex::decode(&self.imageid) {
                self.imageid_binary.copy_from_slice(&bytes);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Encryption {
    pub enable: bool,
    pub key_iterations: u32,
    pub hmac: String,
    pub aes_type: AesType,
    pub key_derivation: KeyDerivation,
    #[serde(skip)]
    pub hmac_binary: [u8; KEY_LENGTH],
    #[serde(skip)]
    derived_key: Zeroizing<[u8; KEY_LENGTH]>,
    #[serde(skip)]
    key_loaded: bool,
}

impl Encryption {
    /// Decode the 64-hex-digit `hmac` into its 32-byte binary form. A
    /// malformed value leaves the binary form zeroed.
    pub fn convert_hmac_to_binary(&mut self) {
        if self.hmac.len() == 2 * KEY_LENGTH {
            if let Ok(bytes) = hex::decode(&self.hmac) {
                self.hmac_binary.copy_from_slice(&bytes);
            }
        }
    }

    /// Install the validated derived key. Key material zeroizes on drop.
    pub fn set_derived_key(&mut self, key: Zeroizing<[u8; KEY_LENGTH]>) {
        self.derived_key = key;
        self.key_loaded = true;
    }

    /// The derived key, if a password has been validated on this layout.
    pub fn derived_key(&self) -> Option<&[u8; KEY_LENGTH]> {
        self.key_loaded.then(|| &*self.derived_key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Compression {
    pub compression_method: CompressionMethod,
    pub compression_level: CompressionType,
}

// ── Disk structures ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiskHeader {
    pub disk_signature: String,
    pub disk_format: DiskFormat,
    pub disk_number: i32,
    pub extended_partition_sector_offset: u32,
    pub extended_partition_count: i32,
    pub imaged_partition_count: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiskGeometry {
    pub bytes_per_sector: u32,
    pub cylinders: u64,
    pub media_type: MediaType,
    pub sectors_per_track: u32,
    pub tracks_per_cylinder: u32,
    pub disk_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiskDescriptor {
    pub disk_description: String,
    pub disk_manufacturer: String,
    pub disk_productid: String,
    pub disk_revisonno: String,
    pub disk_serialno: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiskLayout {
    #[serde(rename = "_header")]
    pub header: DiskHeader,
    #[serde(rename = "_geometry")]
    pub geometry: DiskGeometry,
    #[serde(rename = "_descriptor")]
    pub descriptor: DiskDescriptor,
    pub partitions: Vec<PartitionLayout>,
    /// First 1 MiB of the disk (`$TRACK0`), captured verbatim.
    #[serde(skip)]
    pub track0: Vec<u8>,
    /// Logical-drive boot records from `$EPT` (MBR disks only).
    #[serde(skip)]
    pub extended_partitions: Vec<ExtendedPartition>,
}

// ── Partition structures ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartitionEntry {
    pub status: u8,
    pub start_head: u8,
    pub start_cylinder: u16,
    #[serde(rename = "type")]
    pub entry_type: u8,
    pub end_head: u8,
    pub end_cylinder: u16,
    pub boot_sector: u32,
    pub num_sectors: u32,
    pub active: bool,
    pub partition_type: PartitionType,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileHistory {
    pub file_name: String,
    pub file_number: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartitionHeader {
    pub block_count: u32,
    pub block_size: u32,
    pub partition_file_offset: u64,
    pub file_history_count: u32,
    pub partition_number: i32,
    pub file_history: Vec<FileHistory>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileSystem {
    pub drive_letter: u8,
    pub end: u64,
    pub start: u64,
    pub fat_offset: u64,
    pub free_clusters: u32,
    pub lcn0_offset: u64,
    pub linux_blocks_per_group: u32,
    pub linux_group_count: u32,
    pub mft_offset: u64,
    pub mft_record_size: u32,
    pub reserved_sectors_byte_length: u32,
    pub sectors_per_cluster: u32,
    pub total_clusters: u32,
    pub partition_index: i32,
    pub volume_guid: String,
    pub volume_label: String,
    pub shadow_copy: String,
    pub lcn0_file_number: u16,
    pub bitlocker_state: BitLockerState,
    #[serde(rename = "type")]
    pub fs_type: FileSystemType,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartitionGeometry {
    pub start: u64,
    pub end: u64,
    pub length: u64,
    pub boot_sector_offset: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartitionLayout {
    #[serde(rename = "_header")]
    pub header: PartitionHeader,
    #[serde(rename = "_geometry")]
    pub geometry: PartitionGeometry,
    #[serde(rename = "_partition_table_entry")]
    pub partition_table_entry: PartitionEntry,
    #[serde(rename = "_file_system")]
    pub file_system: FileSystem,
    /// FAT reserved-sector blocks, from the `$INDEX` payload.
    #[serde(skip)]
    pub reserved_sectors_blocks: Vec<DataBlockIndexElement>,
    /// Full block index. In a delta container this starts empty and is
    /// filled by the backup-set resolver.
    #[serde(skip)]
    pub data_blocks: Vec<DataBlockIndexElement>,
    /// Delta entries (only when `header.delta_index` is set).
    #[serde(skip)]
    pub delta_data_blocks: Vec<DeltaDataBlock>,
}

// ── File layout ──────────────────────────────────────────────────────────────

/// Everything known about one container file after parsing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileLayout {
    #[serde(rename = "_header")]
    pub header: Header,
    #[serde(rename = "_encryption")]
    pub encryption: Encryption,
    #[serde(rename = "_compression")]
    pub compression: Compression,
    pub disks: Vec<DiskLayout>,
    #[serde(skip)]
    pub file_name: PathBuf,
    /// The `$JSON` payload verbatim, for the CLI's JSON dump.
    #[serde(skip)]
    pub json_text: String,
}
