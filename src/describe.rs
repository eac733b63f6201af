//! Human-readable description of an image file (`--describe`).

use chrono::DateTime;

use crate::enums::AesType;
use crate::layout::FileLayout;

/// Print the structure and content of a parsed image to stdout.
pub fn print_description(layout: &FileLayout) {
    let h = &layout.header;
    println!("── Image file ───────────────────────────────────────────");
    println!("  File name        {}", layout.file_name.display());
    println!("  Image ID         {}", h.imageid);
    println!("  Backup GUID      {}", h.backup_guid);
    println!("  File number      {}", h.file_number);
    println!("  Increment        {}", h.increment_number);
    println!("  Backup type      {}", h.backup_type.name());
    println!("  Backup time      {}", format_time(h.backup_time));
    println!("  Machine          {}", h.netbios_name);
    println!(
        "  Compression      {} (zstd)",
        layout.compression.compression_level.name()
    );
    println!("  Encryption       {}", describe_encryption(layout));
    println!("  Split file       {}", yes_no(h.split_file));
    println!("  Delta index      {}", yes_no(h.delta_index));

    for disk in &layout.disks {
        println!();
        println!(
            "── Disk {} ({}) — {} ─────────────────────────────",
            disk.header.disk_number,
            disk.header.disk_format.name(),
            format_size(disk.geometry.disk_size)
        );
        if !disk.descriptor.disk_description.is_empty() {
            println!("  Description      {}", disk.descriptor.disk_description);
        }
        println!("  Signature        {}", disk.header.disk_signature);
        println!("  Bytes/sector     {}", disk.geometry.bytes_per_sector);
        println!("  Partitions       {}", disk.partitions.len());

        for partition in &disk.partitions {
            let fs = &partition.file_system;
            println!();
            println!(
                "  Partition {:<2}     {}  {}  {}",
                partition.header.partition_number,
                fs.fs_type.name(),
                drive_letter(fs.drive_letter),
                fs.volume_label
            );
            println!("    Start          {}", partition.geometry.start);
            println!("    Length         {}", format_size(partition.geometry.length));
            println!("    Block size     {}", partition.header.block_size);
            println!("    Block count    {}", partition.header.block_count);
            println!(
                "    Reserved bytes {}",
                fs.reserved_sectors_byte_length
            );
        }
    }
}

fn describe_encryption(layout: &FileLayout) -> String {
    let e = &layout.encryption;
    if !e.enable || e.aes_type == AesType::None {
        return "none".into();
    }
    format!("{} (pbkdf2, {} iterations)", e.aes_type.name(), e.key_iterations)
}

fn drive_letter(letter: u8) -> String {
    if letter.is_ascii_alphabetic() {
        format!("{}:", letter as char)
    } else {
        "-".into()
    }
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

fn format_time(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".into(),
    }
}

/// Size in the largest fitting unit, two decimal places.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_the_largest_fitting_unit() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2 * 1024 * 1024), "2.00 MB");
        assert_eq!(format_size(1536 * 1024 * 1024), "1.50 GB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024 * 1024), "2.00 TB");
    }

    #[test]
    fn drive_letters_render_only_when_sensible() {
        assert_eq!(drive_letter(b'C'), "C:");
        assert_eq!(drive_letter(0), "-");
    }
}
