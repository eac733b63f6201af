//! Positioned file access for container and target handles.
//!
//! Thin wrapper over [`std::fs::File`] with explicit failure: a short read is
//! an error (callers never probe), and a handle opened read-only rejects
//! writes. The handle is closed on drop on every exit path.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug)]
pub struct ImageFile {
    file: File,
    path: PathBuf,
    read_only: bool,
}

impl ImageFile {
    /// Open an existing file for reading only.
    pub fn open_read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        Ok(Self { file, path, read_only: true })
    }

    /// Open an existing file or block device for writing.
    ///
    /// The target is never truncated: restore writes at computed offsets
    /// into whatever the platform backend attached.
    pub fn open_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        Ok(Self { file, path, read_only: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    pub fn stream_position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Fill `buf` completely or fail; EOF inside `buf` is an error.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "handle is read-only",
            )
            .into());
        }
        self.file.write_all(buf)?;
        Ok(())
    }
}
