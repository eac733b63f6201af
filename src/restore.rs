//! Restore engine: stream a resolved backup set onto a writable target.
//!
//! Order of operations for the chosen disk: rewrite the disk identity
//! (unless asked not to), write track 0 at offset 0, replay extended
//! partition boot records (MBR disks), then per partition write the FAT
//! reserved sectors followed by every data block at
//! `lcn0_start + block_size * index`. Each block is read from whichever
//! container file owns it, via the shared decode pipeline: read stored
//! bytes → AES-CBC decrypt with the per-block IV → ZSTD decompress →
//! verify the MD5 of the *decoded* bytes against the index entry.
//!
//! Partial restores leave the target in an indeterminate state; the on-disk
//! format has no transactional guarantees.

use std::io::SeekFrom;
use std::path::Path;

use log::info;

use crate::backup_set::create_backup_set;
use crate::codec::zstd_decompress;
use crate::crypto;
use crate::disk_id;
use crate::enums::{AesType, CompressionType, DiskFormat};
use crate::error::{ImageError, Result};
use crate::layout::{DataBlockIndexElement, DiskLayout, FileLayout};
use crate::parser::read_backup_file;
use crate::reader::ImageFile;

/// Progress callback: `(total_bytes, bytes_processed)`. Invoked inline;
/// must not block indefinitely.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

/// Per-block IV coordinates; combined with the image id and derived key by
/// `crypto::format_iv`.
struct BlockIv {
    disk_number: u16,
    partition_number: u16,
    index: u32,
}

/// Restore one disk from the backup set containing `source` onto
/// `target_path`.
///
/// `disk_number == -1` selects the first disk in the image. `keep_disk_id`
/// suppresses the MBR-signature / GPT-GUID rewrite.
pub fn restore_disk(
    source: &Path,
    password: &str,
    target_path: &Path,
    disk_number: i32,
    keep_disk_id: bool,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<()> {
    let mut target = ImageFile::open_write(target_path)?;

    let chosen = read_backup_file(source, password, true)?;
    if chosen.header.split_file {
        return Err(ImageError::SplitFileNotTerminal);
    }

    let set = create_backup_set(source, password, &chosen.header.imageid)?;
    let layout = set.layout_for_restoration();

    let total = calculate_total_bytes(layout);
    let mut processed = 0u64;

    let mut disk = select_disk(layout, disk_number)?;
    let disk_num = disk.header.disk_number as u16;
    info!(
        "restoring disk {} ({}) to {}",
        disk.header.disk_number,
        disk.header.disk_format.name(),
        target_path.display()
    );

    if !keep_disk_id {
        disk_id::set_new_disk_id(&mut disk);
    }

    target.seek(SeekFrom::Start(0))?;
    target.write_all(&disk.track0)?;

    // Logical drives inside an extended partition keep their boot records
    // outside track 0; replay them at their recorded offsets.
    if disk.header.disk_format == DiskFormat::Mbr {
        for ep in &disk.extended_partitions {
            target.seek(SeekFrom::Start(ep.offset))?;
            target.write_all(&ep.partition_sector)?;
        }
    }

    for partition in &disk.partitions {
        let partition_number = partition.header.partition_number as u16;
        target.seek(SeekFrom::Start(
            partition.geometry.start + partition.geometry.boot_sector_offset,
        ))?;

        // FAT reserved sectors, written back to back and capped at the
        // recorded byte budget.
        let reserved_budget = partition.file_system.reserved_sectors_byte_length as u64;
        if reserved_budget > 0 {
            let mut written = 0u64;
            for (index, block) in partition.reserved_sectors_blocks.iter().enumerate() {
                if block.block_length == 0 {
                    continue;
                }
                let iv = BlockIv {
                    disk_number: disk_num,
                    partition_number,
                    index: index as u32,
                };
                let handle = set.file_handle(block.file_number)?;
                let mut handle_ref = handle.borrow_mut();
                if let Some(data) = read_data_block(layout, &iv, &mut handle_ref, block)? {
                    let n = (data.len() as u64).min(reserved_budget - written) as usize;
                    target.write_all(&data[..n])?;
                    written += n as u64;
                }
            }
            processed += reserved_budget;
            if let Some(cb) = progress.as_mut() {
                cb(total, processed);
            }
        }

        let fs = &partition.file_system;
        let lcn0_start = partition.geometry.start + (fs.lcn0_offset - fs.start);
        let block_size = partition.header.block_size as u64;

        for (index, block) in partition.data_blocks.iter().enumerate() {
            if block.block_length == 0 {
                continue;
            }
            let iv = BlockIv {
                disk_number: disk_num,
                partition_number,
                index: index as u32,
            };
            let handle = set.file_handle(block.file_number)?;
            let mut handle_ref = handle.borrow_mut();
            if let Some(data) = read_data_block(layout, &iv, &mut handle_ref, block)? {
                processed += block_size;
                target.seek(SeekFrom::Start(lcn0_start + block_size * index as u64))?;
                target.write_all(&data)?;
                if let Some(cb) = progress.as_mut() {
                    cb(total, processed);
                }
            }
        }
    }

    if let Some(cb) = progress.as_mut() {
        cb(total, processed);
    }
    Ok(())
}

/// Pick the disk to restore: the first disk for `-1`, otherwise the one
/// whose header carries the requested number.
fn select_disk(layout: &FileLayout, disk_number: i32) -> Result<DiskLayout> {
    if disk_number == -1 {
        return layout
            .disks
            .first()
            .cloned()
            .ok_or(ImageError::UnknownDisk(disk_number));
    }
    layout
        .disks
        .iter()
        .find(|d| d.header.disk_number == disk_number)
        .cloned()
        .ok_or(ImageError::UnknownDisk(disk_number))
}

/// Decode one data block (shared by reserved-sector and partition-data
/// writes).
///
/// Unlike metadata blocks, the MD5 here is of the *decoded* bytes, and it
/// is always checked — even for blocks stored raw.
fn read_data_block(
    layout: &FileLayout,
    iv: &BlockIv,
    file: &mut ImageFile,
    block: &DataBlockIndexElement,
) -> Result<Option<Vec<u8>>> {
    if block.block_length == 0 {
        return Ok(None);
    }

    let mut buf = vec![0u8; block.block_length as usize];
    file.seek(SeekFrom::Start(block.file_position as u64))?;
    file.read_exact(&mut buf)?;

    if layout.encryption.aes_type != AesType::None {
        let key = layout
            .encryption
            .derived_key()
            .ok_or_else(|| ImageError::CryptoInit("no derived key for encrypted block".into()))?;
        let iv_bytes = crypto::format_iv(
            &layout.header.imageid_binary,
            iv.disk_number,
            iv.partition_number,
            iv.index,
            key,
        )?;
        crypto::decrypt_cbc(layout.encryption.aes_type, key, &iv_bytes, &mut buf)?;
    }

    if layout.compression.compression_level != CompressionType::None {
        buf = zstd_decompress(&buf)?;
    }

    if crypto::md5(&buf) != block.md5_hash {
        return Err(ImageError::HashMismatch);
    }

    Ok(Some(buf))
}

/// Total payload bytes the restore will process, for progress reporting.
fn calculate_total_bytes(layout: &FileLayout) -> u64 {
    let mut total = 0u64;
    for disk in &layout.disks {
        for partition in &disk.partitions {
            total += partition.file_system.reserved_sectors_byte_length as u64;
            let occupied = partition
                .data_blocks
                .iter()
                .filter(|b| b.block_length > 0)
                .count() as u64;
            total += occupied * partition.header.block_size as u64;
        }
    }
    total
}
