//! Container parsing: footer detection, metadata walks, index ingestion.
//!
//! A container is read back-to-front: the 20-byte footer names the offset of
//! the file-level metadata blocks, one of which (`$JSON`) carries the layout
//! for the whole file. The layout's `index_file_position` then names the
//! per-disk metadata region — `$TRACK0` (required) and `$EPT` (optional) per
//! disk, then per partition a walk ending at `$INDEX`, whose payload holds
//! the reserved-sector and data-block index arrays.
//!
//! Each metadata walk is a single forward pass terminated by the envelope
//! `last_block` flag; unknown block names are skipped by length.

use std::io::SeekFrom;
use std::path::Path;

use log::debug;

use crate::block::{self, read_block, MetadataBlockHeader};
use crate::crypto;
use crate::error::{ImageError, Result};
use crate::layout::{
    DataBlockIndexElement, DeltaDataBlock, DiskLayout, Encryption, ExtendedPartition, FileLayout,
    PartitionLayout, DATA_BLOCK_INDEX_SIZE, DELTA_DATA_BLOCK_SIZE, EXTENDED_PARTITION_SIZE,
};
use crate::reader::ImageFile;

/// Open and parse one container file.
///
/// With `load_index` set, the password is validated (when the file is
/// encrypted) and the block-index arrays are loaded; without it the walk
/// still validates structure but skips the array bytes — the cheap pre-read
/// the backup-set resolver uses for sibling filtering.
pub fn read_backup_file<P: AsRef<Path>>(
    path: P,
    password: &str,
    load_index: bool,
) -> Result<FileLayout> {
    let path = path.as_ref();
    let mut file = ImageFile::open_read(path)?;

    // Footer: LE u64 header offset + 12 magic bytes at the very end.
    if file.len()? < block::FOOTER_SIZE {
        return Err(ImageError::BadMagic);
    }
    file.seek(SeekFrom::End(-(block::FOOTER_SIZE as i64)))?;
    let mut footer = [0u8; block::FOOTER_SIZE as usize];
    file.read_exact(&mut footer)?;
    if footer[8..] != *block::FOOTER_MAGIC {
        return Err(ImageError::BadMagic);
    }
    let header_offset = u64::from_le_bytes(footer[..8].try_into().unwrap());

    file.seek(SeekFrom::Start(header_offset))?;
    let json_bytes = read_file_metadata(&mut file)?;

    let mut layout: FileLayout = serde_json::from_slice(&json_bytes)?;
    layout.json_text = String::from_utf8_lossy(&json_bytes).into_owned();
    layout.file_name = path.to_path_buf();
    layout.header.set_imageid_binary();
    layout.encryption.convert_hmac_to_binary();

    if layout.encryption.enable {
        if load_index {
            let key = crypto::validate_password(
                &layout.header.imageid_binary,
                layout.encryption.key_iterations,
                &layout.encryption.hmac_binary,
                password,
            )?;
            layout.encryption.set_derived_key(key);
        } else {
            // Headless reads still decode encryption-flagged metadata
            // blocks, so a key is derived without being validated; the
            // full read validates before anything is restored.
            let key = crypto::derive_key(
                &layout.header.imageid_binary,
                password,
                layout.encryption.key_iterations,
            );
            layout.encryption.set_derived_key(key);
        }
    }

    file.seek(SeekFrom::Start(layout.header.index_file_position))?;

    // Split files carry payload bytes only; no metadata region, no indices.
    if !layout.header.split_file {
        let delta_index = layout.header.delta_index;
        for disk in &mut layout.disks {
            read_disk_metadata(&mut file, disk, &layout.encryption)?;
            for partition in &mut disk.partitions {
                read_partition_metadata(&mut file, &layout.encryption)?;
                read_partition_index(&mut file, partition, delta_index, load_index)?;
            }
        }
    }

    Ok(layout)
}

/// Walk the file-level metadata blocks and return the `$JSON` payload.
///
/// No key has been derived at this point, so an encryption-flagged block
/// here cannot be decoded; the format keeps `$JSON` in the clear.
fn read_file_metadata(file: &mut ImageFile) -> Result<Vec<u8>> {
    let no_key = Encryption::default();
    let mut json: Option<Vec<u8>> = None;

    loop {
        let header = MetadataBlockHeader::read(file)?;
        debug!("file metadata block {} ({} bytes)", header.name(), header.block_length);
        if header.block_name == *block::JSON_HEADER {
            if let Some(payload) = read_block(file, &header, &no_key)? {
                json = Some(payload);
            }
        } else {
            file.seek(SeekFrom::Current(header.block_length as i64))?;
        }
        if header.is_last() {
            break;
        }
    }

    json.ok_or(ImageError::MissingJson)
}

/// Walk one disk's metadata region: `$TRACK0` (required) and `$EPT`
/// (optional); everything else is skipped by length.
fn read_disk_metadata(
    file: &mut ImageFile,
    disk: &mut DiskLayout,
    encryption: &Encryption,
) -> Result<()> {
    let mut track0_found = false;

    loop {
        let header = MetadataBlockHeader::read(file)?;
        debug!("disk {} metadata block {}", disk.header.disk_number, header.name());
        if header.block_name == *block::TRACK0_HEADER {
            if let Some(payload) = read_block(file, &header, encryption)? {
                disk.track0 = payload;
                track0_found = true;
            }
        } else if header.block_name == *block::EPT_HEADER {
            if let Some(payload) = read_block(file, &header, encryption)? {
                disk.extended_partitions = parse_extended_partitions(&payload)?;
            }
        } else {
            file.seek(SeekFrom::Current(header.block_length as i64))?;
        }
        if header.is_last() {
            break;
        }
    }

    if !track0_found {
        return Err(ImageError::MissingTrack0);
    }
    Ok(())
}

/// `$EPT` payload: LE u32 record count, then 528-byte records (522
/// meaningful bytes, 6 bytes of struct padding). The count is authoritative
/// but capped by what the payload actually holds.
fn parse_extended_partitions(payload: &[u8]) -> Result<Vec<ExtendedPartition>> {
    if payload.len() < 4 {
        return Ok(Vec::new());
    }
    let declared = u32::from_le_bytes(payload[..4].try_into().unwrap()) as usize;
    let available = (payload.len() - 4) / EXTENDED_PARTITION_SIZE;
    let count = declared.min(available);

    let mut records = Vec::with_capacity(count);
    for chunk in payload[4..].chunks_exact(EXTENDED_PARTITION_SIZE).take(count) {
        let raw: &[u8; EXTENDED_PARTITION_SIZE] = chunk.try_into().unwrap();
        records.push(ExtendedPartition::from_bytes(raw)?);
    }
    Ok(records)
}

/// Walk one partition's metadata blocks. `$BITMAP` is decoded only to
/// verify its hash; `$INDEX` is decoded to verify, then the reader is put
/// back at the start of its stored payload — the index arrays are parsed
/// raw from there. `$INDEX` is always the last block of the walk.
fn read_partition_metadata(file: &mut ImageFile, encryption: &Encryption) -> Result<()> {
    loop {
        let header = MetadataBlockHeader::read(file)?;
        debug!("partition metadata block {}", header.name());
        if header.block_name == *block::IDX_HEADER {
            let payload_start = file.stream_position()?;
            read_block(file, &header, encryption)?;
            file.seek(SeekFrom::Start(payload_start))?;
            return Ok(());
        } else if header.block_name == *block::BITMAP_HEADER {
            read_block(file, &header, encryption)?;
        } else {
            file.seek(SeekFrom::Current(header.block_length as i64))?;
        }
        if header.is_last() {
            break;
        }
    }
    Err(ImageError::MissingIndex)
}

/// Parse the index arrays at the `$INDEX` payload position: reserved-sector
/// blocks, then data blocks or delta blocks depending on the file-level
/// `delta_index` flag. In headless mode the bytes are skipped, not loaded.
fn read_partition_index(
    file: &mut ImageFile,
    partition: &mut PartitionLayout,
    delta_index: bool,
    load_index: bool,
) -> Result<()> {
    let reserved_count = read_u32(file)?;
    if reserved_count > 0 {
        if load_index {
            partition.reserved_sectors_blocks = read_index_elements(file, reserved_count)?;
        } else {
            skip_records(file, reserved_count, DATA_BLOCK_INDEX_SIZE)?;
        }
    }

    let data_count = read_u32(file)?;
    if data_count > 0 {
        if delta_index {
            if load_index {
                partition.delta_data_blocks = read_delta_blocks(file, data_count)?;
            } else {
                skip_records(file, data_count, DELTA_DATA_BLOCK_SIZE)?;
            }
        } else if load_index {
            partition.data_blocks = read_index_elements(file, data_count)?;
        } else {
            skip_records(file, data_count, DATA_BLOCK_INDEX_SIZE)?;
        }
    }
    Ok(())
}

fn read_u32(file: &mut ImageFile) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn skip_records(file: &mut ImageFile, count: u32, record_size: usize) -> Result<()> {
    file.seek(SeekFrom::Current(count as i64 * record_size as i64))?;
    Ok(())
}

fn read_index_elements(file: &mut ImageFile, count: u32) -> Result<Vec<DataBlockIndexElement>> {
    let mut slab = vec![0u8; count as usize * DATA_BLOCK_INDEX_SIZE];
    file.read_exact(&mut slab)?;

    let mut out = Vec::with_capacity(count as usize);
    for chunk in slab.chunks_exact(DATA_BLOCK_INDEX_SIZE) {
        let raw: &[u8; DATA_BLOCK_INDEX_SIZE] = chunk.try_into().unwrap();
        out.push(DataBlockIndexElement::from_bytes(raw)?);
    }
    Ok(out)
}

fn read_delta_blocks(file: &mut ImageFile, count: u32) -> Result<Vec<DeltaDataBlock>> {
    let mut slab = vec![0u8; count as usize * DELTA_DATA_BLOCK_SIZE];
    file.read_exact(&mut slab)?;

    let mut out = Vec::with_capacity(count as usize);
    for chunk in slab.chunks_exact(DELTA_DATA_BLOCK_SIZE) {
        let raw: &[u8; DELTA_DATA_BLOCK_SIZE] = chunk.try_into().unwrap();
        out.push(DeltaDataBlock::from_bytes(raw)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_partition_records_stride_includes_padding() {
        let mut payload = vec![0u8; 4 + 2 * EXTENDED_PARTITION_SIZE];
        payload[..4].copy_from_slice(&2u32.to_le_bytes());

        let base0 = 4;
        payload[base0] = 0xE1;
        payload[base0 + 512..base0 + 520].copy_from_slice(&0x7E00u64.to_le_bytes());
        payload[base0 + 520..base0 + 522].copy_from_slice(&1u16.to_le_bytes());

        let base1 = 4 + EXTENDED_PARTITION_SIZE;
        payload[base1] = 0xE2;
        payload[base1 + 512..base1 + 520].copy_from_slice(&0xF_C000u64.to_le_bytes());
        payload[base1 + 520..base1 + 522].copy_from_slice(&2u16.to_le_bytes());

        let records = parse_extended_partitions(&payload).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].partition_sector[0], 0xE1);
        assert_eq!(records[0].offset, 0x7E00);
        assert_eq!(records[0].number, 1);
        assert_eq!(records[1].partition_sector[0], 0xE2);
        assert_eq!(records[1].offset, 0xF_C000);
        assert_eq!(records[1].number, 2);
    }

    #[test]
    fn truncated_ept_payload_caps_the_record_count() {
        let mut payload = vec![0u8; 4 + EXTENDED_PARTITION_SIZE];
        payload[..4].copy_from_slice(&5u32.to_le_bytes());
        assert_eq!(parse_extended_partitions(&payload).unwrap().len(), 1);
    }
}
