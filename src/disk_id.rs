//! Disk identity rewrite on the track-0 buffer.
//!
//! A restored disk attached next to its original must not present the same
//! identity, so restore stamps a fresh MBR signature or GPT disk GUID
//! before track 0 is written. GPT headers carry a CRC-32 over
//! `header_size` bytes (computed with the CRC field zeroed); firmware
//! refuses the disk if it is wrong, so it is recomputed here.

use log::debug;
use uuid::Uuid;

use crate::enums::DiskFormat;
use crate::layout::DiskLayout;

/// MBR: byte offset of the 32-bit disk signature inside the boot record.
const MBR_SIGNATURE_OFFSET: usize = 440;

/// GPT header field offsets (primary header at LBA 1).
const GPT_HEADER_SIZE_OFFSET: usize = 12;
const GPT_HEADER_CRC32_OFFSET: usize = 16;
const GPT_DISK_GUID_OFFSET: usize = 56;

/// The on-disk header never exceeds one 512-byte sector.
const GPT_HEADER_MAX_SIZE: usize = 512;

/// Stamp a fresh identity into the disk's track-0 buffer.
pub fn set_new_disk_id(disk: &mut DiskLayout) {
    match disk.header.disk_format {
        DiskFormat::Gpt => set_new_gpt_guid(disk),
        _ => set_new_mbr_signature(disk),
    }
}

fn set_new_mbr_signature(disk: &mut DiskLayout) {
    if disk.track0.len() < MBR_SIGNATURE_OFFSET + 4 {
        debug!("track0 too short for an MBR signature rewrite");
        return;
    }
    let signature: u32 = rand::random();
    disk.track0[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 4]
        .copy_from_slice(&signature.to_le_bytes());
}

fn set_new_gpt_guid(disk: &mut DiskLayout) {
    let sector = disk.geometry.bytes_per_sector as usize;
    if sector == 0 || disk.track0.len() < sector + GPT_HEADER_MAX_SIZE {
        debug!("track0 too short for a GPT header rewrite");
        return;
    }
    let header = &mut disk.track0[sector..sector + GPT_HEADER_MAX_SIZE];

    let header_size = u32::from_le_bytes(
        header[GPT_HEADER_SIZE_OFFSET..GPT_HEADER_SIZE_OFFSET + 4].try_into().unwrap(),
    ) as usize;
    if header_size < GPT_DISK_GUID_OFFSET + 16 || header_size > GPT_HEADER_MAX_SIZE {
        debug!("implausible GPT header_size {header_size}, leaving disk GUID alone");
        return;
    }

    header[GPT_DISK_GUID_OFFSET..GPT_DISK_GUID_OFFSET + 16]
        .copy_from_slice(Uuid::new_v4().as_bytes());

    // CRC is computed over header_size bytes with the CRC field zeroed.
    header[GPT_HEADER_CRC32_OFFSET..GPT_HEADER_CRC32_OFFSET + 4].fill(0);
    let crc = crc32fast::hash(&header[..header_size]);
    header[GPT_HEADER_CRC32_OFFSET..GPT_HEADER_CRC32_OFFSET + 4]
        .copy_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DiskGeometry, DiskHeader};

    fn mbr_disk() -> DiskLayout {
        DiskLayout {
            header: DiskHeader { disk_format: DiskFormat::Mbr, ..DiskHeader::default() },
            geometry: DiskGeometry { bytes_per_sector: 512, ..DiskGeometry::default() },
            track0: vec![0u8; 1024],
            ..DiskLayout::default()
        }
    }

    fn gpt_disk() -> DiskLayout {
        let mut disk = mbr_disk();
        disk.header.disk_format = DiskFormat::Gpt;
        // Primary header at sector 1 with the standard 92-byte size.
        disk.track0[512 + GPT_HEADER_SIZE_OFFSET..512 + GPT_HEADER_SIZE_OFFSET + 4]
            .copy_from_slice(&92u32.to_le_bytes());
        disk
    }

    #[test]
    fn crc32_check_value() {
        // Reflected poly 0x04C11DB7, init 0xFFFFFFFF, xorout 0xFFFFFFFF.
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn mbr_rewrite_touches_only_the_signature() {
        let mut disk = mbr_disk();
        disk.track0.iter_mut().for_each(|b| *b = 0x77);
        let before = disk.track0.clone();

        set_new_disk_id(&mut disk);

        assert_ne!(&disk.track0[440..444], &before[440..444]);
        assert_eq!(&disk.track0[..440], &before[..440]);
        assert_eq!(&disk.track0[444..], &before[444..]);
    }

    #[test]
    fn gpt_rewrite_changes_guid_and_restores_a_valid_crc() {
        let mut disk = gpt_disk();
        let old_guid = disk.track0[512 + 56..512 + 72].to_vec();

        set_new_disk_id(&mut disk);

        let header = &disk.track0[512..1024];
        assert_ne!(&header[56..72], old_guid.as_slice());

        let stored = u32::from_le_bytes(header[16..20].try_into().unwrap());
        let mut check = header[..92].to_vec();
        check[16..20].fill(0);
        assert_eq!(stored, crc32fast::hash(&check));
    }

    #[test]
    fn short_track0_is_left_untouched() {
        let mut disk = mbr_disk();
        disk.track0 = vec![0u8; 64];
        set_new_disk_id(&mut disk);
        assert_eq!(disk.track0, vec![0u8; 64]);
    }
}
