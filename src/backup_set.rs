//! Backup-set resolution: sibling discovery and delta overlay.
//!
//! Given any one file of a set, the resolver finds the sibling containers
//! sharing its image id, opens one shared handle per file, and builds the
//! effective block index by copying the most recent full backup's
//! `data_blocks` and overlaying every delta up to the chosen file,
//! oldest first, so newer deltas win each slot.
//!
//! Sibling files that fail to parse or fail the password check are logged
//! and skipped — a directory may hold unrelated sets with the same
//! extension. Errors on confirmed set members are fatal.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::warn;

use crate::error::{ImageError, Result};
use crate::layout::{DataBlockIndexElement, FileLayout, PartitionLayout};
use crate::parser::read_backup_file;
use crate::reader::ImageFile;

/// A container handle shared by every index entry citing its file number.
pub type SharedFile = Rc<RefCell<ImageFile>>;

pub struct BackupSet {
    layout: FileLayout,
    handles: HashMap<u16, SharedFile>,
}

impl BackupSet {
    /// The chosen file's layout with the effective block index built from
    /// the whole set.
    pub fn layout_for_restoration(&self) -> &FileLayout {
        &self.layout
    }

    /// The shared handle for a file number (or one of its `merged_files`
    /// aliases).
    pub fn file_handle(&self, file_number: u16) -> Result<SharedFile> {
        self.handles
            .get(&file_number)
            .cloned()
            .ok_or(ImageError::UnknownFileNumber(file_number))
    }
}

/// Resolve the backup set containing `path`.
///
/// `image_id` is the chosen file's id; only siblings carrying the same id
/// with an increment number at or below the chosen file's join the set.
pub fn create_backup_set(path: &Path, password: &str, image_id: &str) -> Result<BackupSet> {
    let chosen = read_backup_file(path, password, false)?;
    let chosen_increment = chosen.header.increment_number;

    // Headless pass over the directory: keep set members, skip the rest.
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let extension = lowercase_extension(path);

    let mut member_paths = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let candidate = entry?.path();
        if !candidate.is_file() || lowercase_extension(&candidate) != extension {
            continue;
        }
        match read_backup_file(&candidate, password, false) {
            Ok(sibling)
                if sibling.header.imageid == image_id
                    && sibling.header.increment_number <= chosen_increment =>
            {
                member_paths.push(candidate);
            }
            Ok(_) => {}
            Err(e) => warn!("skipping sibling {}: {e}", candidate.display()),
        }
    }

    // Full pass: load indices and open one shared handle per member. Every
    // file number consolidated into a member (`merged_files`) aliases the
    // same handle.
    let mut layouts: Vec<FileLayout> = Vec::with_capacity(member_paths.len());
    let mut handles: HashMap<u16, SharedFile> = HashMap::new();
    for member in &member_paths {
        let layout = read_backup_file(member, password, true)?;
        let handle: SharedFile = Rc::new(RefCell::new(ImageFile::open_read(member)?));
        handles.insert(layout.header.file_number, Rc::clone(&handle));
        for merged in &layout.header.merged_files {
            handles.entry(*merged as u16).or_insert_with(|| Rc::clone(&handle));
        }
        layouts.push(layout);
    }

    // Newest first; element 0 is the layout restoration runs from.
    layouts.sort_by(|a, b| b.header.file_number.cmp(&a.header.file_number));
    let full_pos = base_full_position(&layouts)?;

    let base_blocks: Vec<Vec<Vec<DataBlockIndexElement>>> = layouts[full_pos]
        .disks
        .iter()
        .map(|d| d.partitions.iter().map(|p| p.data_blocks.clone()).collect())
        .collect();

    let mut restoration = layouts[0].clone();
    for (d, disk) in restoration.disks.iter_mut().enumerate() {
        for (p, partition) in disk.partitions.iter_mut().enumerate() {
            if let Some(blocks) = base_blocks.get(d).and_then(|disk| disk.get(p)) {
                partition.data_blocks = blocks.clone();
            }
            // From the base full down to the chosen file: oldest delta
            // first, so each newer delta overwrites the slots it names.
            for i in (0..=full_pos).rev() {
                let source = &layouts[i];
                if source.header.split_file {
                    continue;
                }
                if let Some(part) = source.disks.get(d).and_then(|dd| dd.partitions.get(p)) {
                    overlay_delta(partition, part);
                }
            }
        }
    }

    Ok(BackupSet { layout: restoration, handles })
}

/// Index of the most recent non-delta, non-split layout — the base full.
fn base_full_position(layouts: &[FileLayout]) -> Result<usize> {
    layouts
        .iter()
        .position(|l| !l.header.delta_index && !l.header.split_file)
        .ok_or(ImageError::NoFullBackup)
}

/// Map one container's delta entries onto the effective index. A slot past
/// the end grows the vector, padding the gap with empty entries.
fn overlay_delta(target: &mut PartitionLayout, source: &PartitionLayout) {
    for delta in &source.delta_data_blocks {
        let idx = delta.block_index as usize;
        if idx >= target.data_blocks.len() {
            target.data_blocks.resize(idx + 1, DataBlockIndexElement::default());
        }
        target.data_blocks[idx] = delta.block;
    }
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
