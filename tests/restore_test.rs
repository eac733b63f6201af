//! End-to-end tests against synthetic container files.
//!
//! The builder below writes real container bytes — payload region, per-disk
//! and per-partition metadata blocks, `$JSON` layout, footer — so every test
//! drives the full parse → resolve → restore path through the public API.

use std::path::Path;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockEncryptMut, KeyInit, KeyIvInit};
use tempfile::TempDir;

use mrximg::block::{BITMAP_HEADER, IDX_HEADER, JSON_HEADER, TRACK0_HEADER};
use mrximg::{crypto, restore_disk, read_backup_file, ImageError};

const ITERATIONS: u32 = 1000;
const IMAGE_ID: &str = "0123456789abcdef";

const FLAG_LAST: u8 = 0x01;
const FLAG_ENCRYPTED: u8 = 0x04;

// ── Container builder ────────────────────────────────────────────────────────

struct TestPartition {
    number: i32,
    block_size: u32,
    start: u64,
    boot_sector_offset: u64,
    fs_start: u64,
    lcn0_offset: u64,
    reserved_budget: u32,
    reserved: Vec<Vec<u8>>,
    /// Full-index payloads; `None` is an empty slot.
    blocks: Vec<Option<Vec<u8>>>,
    /// Delta entries: (superseded slot, payload).
    deltas: Vec<(u32, Vec<u8>)>,
}

impl Default for TestPartition {
    fn default() -> Self {
        Self {
            number: 1,
            block_size: 4096,
            start: 65536,
            boot_sector_offset: 0,
            fs_start: 65536,
            lcn0_offset: 65536,
            reserved_budget: 0,
            reserved: Vec::new(),
            blocks: Vec::new(),
            deltas: Vec::new(),
        }
    }
}

struct TestContainer {
    image_id: String,
    file_number: u16,
    increment_number: u16,
    delta_index: bool,
    split_file: bool,
    compress: bool,
    password: Option<String>,
    /// Also AES-ECB encrypt the `$TRACK0`/`$BITMAP` metadata payloads.
    encrypt_metadata: bool,
    disk_number: i32,
    track0: Vec<u8>,
    partition: TestPartition,
}

impl Default for TestContainer {
    fn default() -> Self {
        Self {
            image_id: IMAGE_ID.to_string(),
            file_number: 1,
            increment_number: 1,
            delta_index: false,
            split_file: false,
            compress: false,
            password: None,
            encrypt_metadata: false,
            disk_number: 0,
            track0: vec![0xA5; 512],
            partition: TestPartition::default(),
        }
    }
}

fn image_id_binary(image_id: &str) -> [u8; 8] {
    let bytes = hex::decode(image_id).unwrap();
    bytes.try_into().unwrap()
}

fn envelope(name: &[u8; 8], payload: &[u8], flags: u8) -> Vec<u8> {
    let mut v = Vec::with_capacity(32 + payload.len());
    v.extend_from_slice(name);
    v.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    v.extend_from_slice(&crypto::md5(payload));
    v.push(flags);
    v.extend_from_slice(&[0u8; 3]);
    v.extend_from_slice(payload);
    v
}

fn index_record(pos: i64, md5: [u8; 16], len: u32, file_number: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(30);
    v.extend_from_slice(&pos.to_le_bytes());
    v.extend_from_slice(&md5);
    v.extend_from_slice(&len.to_le_bytes());
    v.extend_from_slice(&file_number.to_le_bytes());
    v
}

fn cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], buf: &mut [u8]) {
    let enc = cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv).unwrap();
    let len = buf.len();
    enc.encrypt_padded_mut::<NoPadding>(buf, len).unwrap();
}

fn ecb_encrypt(key: &[u8; 32], buf: &mut [u8]) {
    let enc = ecb::Encryptor::<aes::Aes256>::new_from_slice(key).unwrap();
    let len = buf.len();
    enc.encrypt_padded_mut::<NoPadding>(buf, len).unwrap();
}

/// Compress/encrypt one payload, append it to the container body, and
/// return its index record fields.
fn append_payload(
    buf: &mut Vec<u8>,
    c: &TestContainer,
    key: Option<&[u8; 32]>,
    block_index: u32,
    plain: &[u8],
) -> (i64, [u8; 16], u32) {
    let md5 = crypto::md5(plain);
    let mut stored = plain.to_vec();
    if c.compress {
        stored = zstd::encode_all(stored.as_slice(), 3).unwrap();
    }
    if let Some(key) = key {
        let iv = crypto::format_iv(
            &image_id_binary(&c.image_id),
            c.disk_number as u16,
            c.partition.number as u16,
            block_index,
            key,
        )
        .unwrap();
        cbc_encrypt(key, &iv, &mut stored);
    }
    let pos = buf.len() as i64;
    let len = stored.len() as u32;
    buf.extend_from_slice(&stored);
    (pos, md5, len)
}

fn write_container(path: &Path, c: &TestContainer) {
    let key = c
        .password
        .as_deref()
        .map(|p| crypto::derive_key(&image_id_binary(&c.image_id), p, ITERATIONS));
    let key_bytes: Option<&[u8; 32]> = key.as_deref();

    let mut buf: Vec<u8> = Vec::new();

    // Payload region.
    let reserved_records: Vec<Vec<u8>> = c
        .partition
        .reserved
        .iter()
        .enumerate()
        .map(|(i, plain)| {
            let (pos, md5, len) = append_payload(&mut buf, c, key_bytes, i as u32, plain);
            index_record(pos, md5, len, c.file_number)
        })
        .collect();

    let data_records: Vec<Vec<u8>> = if c.delta_index {
        c.partition
            .deltas
            .iter()
            .map(|(slot, plain)| {
                let (pos, md5, len) = append_payload(&mut buf, c, key_bytes, *slot, plain);
                let mut rec = index_record(pos, md5, len, c.file_number);
                rec.extend_from_slice(&slot.to_le_bytes());
                rec
            })
            .collect()
    } else {
        c.partition
            .blocks
            .iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Some(plain) => {
                    let (pos, md5, len) = append_payload(&mut buf, c, key_bytes, i as u32, plain);
                    index_record(pos, md5, len, c.file_number)
                }
                None => index_record(0, [0; 16], 0, 0),
            })
            .collect()
    };

    // Per-disk and per-partition metadata region.
    let index_file_position = if c.split_file { 0 } else { buf.len() as u64 };
    if !c.split_file {
        let mut track0 = c.track0.clone();
        let mut track0_flags = FLAG_LAST;
        if c.encrypt_metadata {
            ecb_encrypt(key_bytes.unwrap(), &mut track0);
            track0_flags |= FLAG_ENCRYPTED;
        }
        buf.extend_from_slice(&envelope(TRACK0_HEADER, &track0, track0_flags));

        if c.encrypt_metadata {
            let mut bitmap = vec![0xEE; 64];
            ecb_encrypt(key_bytes.unwrap(), &mut bitmap);
            buf.extend_from_slice(&envelope(BITMAP_HEADER, &bitmap, FLAG_ENCRYPTED));
        }

        let mut idx_payload = Vec::new();
        idx_payload.extend_from_slice(&(reserved_records.len() as u32).to_le_bytes());
        for rec in &reserved_records {
            idx_payload.extend_from_slice(rec);
        }
        idx_payload.extend_from_slice(&(data_records.len() as u32).to_le_bytes());
        for rec in &data_records {
            idx_payload.extend_from_slice(rec);
        }
        buf.extend_from_slice(&envelope(IDX_HEADER, &idx_payload, FLAG_LAST));
    }

    // File-level metadata: the $JSON block.
    let hmac_hex = key
        .as_deref()
        .map(|k| hex::encode(crypto::key_hmac(k)))
        .unwrap_or_default();
    let p = &c.partition;
    let json = serde_json::json!({
        "_header": {
            "imageid": c.image_id,
            "file_number": c.file_number,
            "increment_number": c.increment_number,
            "merged_files": [],
            "split_file": c.split_file,
            "backup_time": 1_700_000_000i64,
            "index_file_position": index_file_position,
            "delta_index": c.delta_index,
            "backup_type": if c.delta_index { "inc" } else { "full" },
        },
        "_encryption": {
            "enable": c.password.is_some(),
            "key_iterations": ITERATIONS,
            "hmac": hmac_hex,
            "aes_type": if c.password.is_some() { "aes-256" } else { "none" },
            "key_derivation": "pbkdf2",
        },
        "_compression": {
            "compression_method": "zstd",
            "compression_level": if c.compress { "medium" } else { "none" },
        },
        "disks": [{
            "_header": { "disk_format": "mbr", "disk_number": c.disk_number },
            "_geometry": { "bytes_per_sector": 512, "disk_size": 1_048_576u64 },
            "partitions": [{
                "_header": {
                    "partition_number": p.number,
                    "block_size": p.block_size,
                    "block_count": p.blocks.len(),
                },
                "_geometry": {
                    "start": p.start,
                    "end": p.start + 1_048_576,
                    "length": 1_048_576u64,
                    "boot_sector_offset": p.boot_sector_offset,
                },
                "_file_system": {
                    "type": "NTFS",
                    "start": p.fs_start,
                    "lcn0_offset": p.lcn0_offset,
                    "reserved_sectors_byte_length": p.reserved_budget,
                },
            }],
        }],
    })
    .to_string();

    let header_offset = buf.len() as u64;
    buf.extend_from_slice(&envelope(JSON_HEADER, json.as_bytes(), FLAG_LAST));

    buf.extend_from_slice(&header_offset.to_le_bytes());
    buf.extend_from_slice(b"MACRIUM_FILE");

    std::fs::write(path, buf).unwrap();
}

fn filled(len: usize, byte: u8) -> Vec<u8> {
    vec![byte; len]
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn bad_magic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("junk.mrimgx");

    let mut bytes = vec![0u8; 64];
    bytes.extend_from_slice(&16u64.to_le_bytes());
    bytes.extend_from_slice(b"MACRIUM_XXXX");
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        read_backup_file(&path, "", true),
        Err(ImageError::BadMagic)
    ));

    let short = dir.path().join("short.mrimgx");
    std::fs::write(&short, b"tiny").unwrap();
    assert!(matches!(
        read_backup_file(&short, "", true),
        Err(ImageError::BadMagic)
    ));
}

#[test]
fn unencrypted_full_restores_byte_accurate_image() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("full-01.mrimgx");

    let block_size = 65536usize;
    let blocks: Vec<Option<Vec<u8>>> =
        (0..16).map(|i| Some(filled(block_size, i as u8 + 1))).collect();

    let container = TestContainer {
        partition: TestPartition {
            block_size: block_size as u32,
            blocks: blocks.clone(),
            ..TestPartition::default()
        },
        ..TestContainer::default()
    };
    write_container(&source, &container);

    // Re-parsing is deterministic.
    let first = read_backup_file(&source, "", true).unwrap();
    let second = read_backup_file(&source, "", true).unwrap();
    assert_eq!(first.json_text, second.json_text);
    assert_eq!(
        first.disks[0].partitions[0].data_blocks,
        second.disks[0].partitions[0].data_blocks
    );
    assert_eq!(first.disks[0].partitions[0].data_blocks.len(), 16);
    assert_eq!(first.disks[0].track0, container.track0);

    let target = dir.path().join("restored.img");
    restore_disk(&source, "", &target, -1, true, None).unwrap();

    let mut expected = vec![0u8; 65536 + 16 * block_size];
    expected[..512].copy_from_slice(&container.track0);
    for (i, block) in blocks.iter().enumerate() {
        let at = 65536 + i * block_size;
        expected[at..at + block_size].copy_from_slice(block.as_ref().unwrap());
    }
    assert_eq!(std::fs::read(&target).unwrap(), expected);
}

#[test]
fn compressed_blocks_restore() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("comp-01.mrimgx");

    let blocks: Vec<Option<Vec<u8>>> =
        (0..4).map(|i| Some(filled(4096, 0x10 + i as u8))).collect();

    let container = TestContainer {
        compress: true,
        partition: TestPartition { blocks: blocks.clone(), ..TestPartition::default() },
        ..TestContainer::default()
    };
    write_container(&source, &container);

    let target = dir.path().join("restored.img");
    restore_disk(&source, "", &target, -1, true, None).unwrap();

    let out = std::fs::read(&target).unwrap();
    for (i, block) in blocks.iter().enumerate() {
        let at = 65536 + i * 4096;
        assert_eq!(&out[at..at + 4096], block.as_ref().unwrap().as_slice());
    }
}

#[test]
fn encrypted_full_requires_the_right_password() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("enc-01.mrimgx");

    let blocks: Vec<Option<Vec<u8>>> =
        (0..4).map(|i| Some(filled(4096, 0x20 + i as u8))).collect();

    let container = TestContainer {
        password: Some("hunter2".into()),
        partition: TestPartition { blocks: blocks.clone(), ..TestPartition::default() },
        ..TestContainer::default()
    };
    write_container(&source, &container);

    assert!(matches!(
        read_backup_file(&source, "wrong", true),
        Err(ImageError::InvalidPassword)
    ));

    let target = dir.path().join("restored.img");
    restore_disk(&source, "hunter2", &target, -1, true, None).unwrap();

    let out = std::fs::read(&target).unwrap();
    for (i, block) in blocks.iter().enumerate() {
        let at = 65536 + i * 4096;
        assert_eq!(&out[at..at + 4096], block.as_ref().unwrap().as_slice());
    }
}

#[test]
fn encrypted_metadata_blocks_resolve_and_restore() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("encmeta-01.mrimgx");

    let blocks: Vec<Option<Vec<u8>>> =
        (0..2).map(|i| Some(filled(4096, 0x71 + i as u8))).collect();

    let container = TestContainer {
        password: Some("hunter2".into()),
        encrypt_metadata: true,
        partition: TestPartition { blocks: blocks.clone(), ..TestPartition::default() },
        ..TestContainer::default()
    };
    write_container(&source, &container);

    let layout = read_backup_file(&source, "hunter2", true).unwrap();
    assert_eq!(layout.disks[0].track0, container.track0);

    // The resolver's headless sibling pass must also get through the
    // encrypted $TRACK0/$BITMAP blocks.
    let target = dir.path().join("restored.img");
    restore_disk(&source, "hunter2", &target, -1, true, None).unwrap();

    let out = std::fs::read(&target).unwrap();
    assert_eq!(&out[..512], container.track0.as_slice());
    for (i, block) in blocks.iter().enumerate() {
        let at = 65536 + i * 4096;
        assert_eq!(&out[at..at + 4096], block.as_ref().unwrap().as_slice());
    }
}

#[test]
fn delta_overlay_reads_blocks_from_their_owning_files() {
    let dir = TempDir::new().unwrap();
    let full_path = dir.path().join("set-01.mrimgx");
    let delta_path = dir.path().join("set-02.mrimgx");

    let a = filled(4096, 0xA1);
    let b = filled(4096, 0xB1);
    let c = filled(4096, 0xC1);
    let d = filled(4096, 0xD1);
    let b_new = filled(4096, 0xB2);
    let d_new = filled(4096, 0xD2);

    let full = TestContainer {
        file_number: 1,
        increment_number: 1,
        partition: TestPartition {
            blocks: vec![
                Some(a.clone()),
                Some(b.clone()),
                Some(c.clone()),
                Some(d.clone()),
            ],
            ..TestPartition::default()
        },
        ..TestContainer::default()
    };
    write_container(&full_path, &full);

    let delta = TestContainer {
        file_number: 2,
        increment_number: 2,
        delta_index: true,
        partition: TestPartition {
            deltas: vec![(1, b_new.clone()), (3, d_new.clone())],
            ..TestPartition::default()
        },
        ..TestContainer::default()
    };
    write_container(&delta_path, &delta);

    let target = dir.path().join("restored.img");
    restore_disk(&delta_path, "", &target, -1, true, None).unwrap();

    let out = std::fs::read(&target).unwrap();
    let expect = [&a, &b_new, &c, &d_new];
    for (i, block) in expect.iter().enumerate() {
        let at = 65536 + i * 4096;
        assert_eq!(&out[at..at + 4096], block.as_slice(), "slot {i}");
    }
}

#[test]
fn delta_one_past_the_end_grows_the_index() {
    let dir = TempDir::new().unwrap();
    let full_path = dir.path().join("grow-01.mrimgx");
    let delta_path = dir.path().join("grow-02.mrimgx");

    let a = filled(4096, 0x31);
    let tail = filled(4096, 0x32);

    let full = TestContainer {
        file_number: 1,
        increment_number: 1,
        partition: TestPartition { blocks: vec![Some(a.clone())], ..TestPartition::default() },
        ..TestContainer::default()
    };
    write_container(&full_path, &full);

    let delta = TestContainer {
        file_number: 2,
        increment_number: 2,
        delta_index: true,
        partition: TestPartition { deltas: vec![(1, tail.clone())], ..TestPartition::default() },
        ..TestContainer::default()
    };
    write_container(&delta_path, &delta);

    let target = dir.path().join("restored.img");
    restore_disk(&delta_path, "", &target, -1, true, None).unwrap();

    let out = std::fs::read(&target).unwrap();
    assert_eq!(&out[65536..65536 + 4096], a.as_slice());
    assert_eq!(&out[65536 + 4096..65536 + 8192], tail.as_slice());
}

#[test]
fn split_file_parses_but_cannot_be_restored() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("split-01.mrimgx");

    let container = TestContainer { split_file: true, ..TestContainer::default() };
    write_container(&source, &container);

    let layout = read_backup_file(&source, "", true).unwrap();
    assert!(layout.header.split_file);
    assert!(layout.disks[0].partitions[0].data_blocks.is_empty());

    let target = dir.path().join("restored.img");
    assert!(matches!(
        restore_disk(&source, "", &target, -1, true, None),
        Err(ImageError::SplitFileNotTerminal)
    ));
}

#[test]
fn reserved_sector_writes_cap_at_the_byte_budget() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("fat-01.mrimgx");

    let r0 = filled(512, 0x41);
    let r1 = filled(512, 0x42);
    let data = filled(4096, 0x43);

    let container = TestContainer {
        partition: TestPartition {
            reserved_budget: 700,
            reserved: vec![r0.clone(), r1.clone()],
            lcn0_offset: 65536 + 4096,
            blocks: vec![Some(data.clone())],
            ..TestPartition::default()
        },
        ..TestContainer::default()
    };
    write_container(&source, &container);

    let target = dir.path().join("restored.img");
    restore_disk(&source, "", &target, -1, true, None).unwrap();

    let out = std::fs::read(&target).unwrap();
    assert_eq!(&out[65536..65536 + 512], r0.as_slice());
    assert_eq!(&out[65536 + 512..65536 + 700], &r1[..188]);
    // Nothing past the budget until the data region.
    assert!(out[65536 + 700..65536 + 4096].iter().all(|&b| b == 0));
    assert_eq!(&out[65536 + 4096..65536 + 8192], data.as_slice());
}

#[test]
fn unrelated_siblings_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("main-01.mrimgx");

    let payload = filled(4096, 0x51);
    let container = TestContainer {
        partition: TestPartition { blocks: vec![Some(payload.clone())], ..TestPartition::default() },
        ..TestContainer::default()
    };
    write_container(&source, &container);

    // Garbage file with the right extension.
    std::fs::write(dir.path().join("noise.mrimgx"), b"not a container").unwrap();

    // A valid container from a different set.
    let other = TestContainer {
        image_id: "fedcba9876543210".into(),
        partition: TestPartition {
            blocks: vec![Some(filled(4096, 0x99))],
            ..TestPartition::default()
        },
        ..TestContainer::default()
    };
    write_container(&dir.path().join("other-01.mrimgx"), &other);

    let target = dir.path().join("restored.img");
    restore_disk(&source, "", &target, -1, true, None).unwrap();

    let out = std::fs::read(&target).unwrap();
    assert_eq!(&out[65536..65536 + 4096], payload.as_slice());
}

#[test]
fn unknown_disk_number_is_an_error() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("one-01.mrimgx");

    let container = TestContainer {
        partition: TestPartition {
            blocks: vec![Some(filled(4096, 0x61))],
            ..TestPartition::default()
        },
        ..TestContainer::default()
    };
    write_container(&source, &container);

    let target = dir.path().join("restored.img");
    assert!(matches!(
        restore_disk(&source, "", &target, 5, true, None),
        Err(ImageError::UnknownDisk(5))
    ));
}
