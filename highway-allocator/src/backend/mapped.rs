//! The mapped backend: one file per lane, created under a temp directory,
//! sized to the lane's capacity, and memory-mapped read/write.
//!
//! The file IS the lane's bytes: no header, no framing. The file name is
//! deterministic from `(process_id, highway_id, lane_id)` so two lanes
//! never collide and a crashed process's leftovers are identifiable.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use fs4::FileExt;
use memmap2::MmapMut;

use super::StorageOps;
use crate::Error;

/// A lane's storage when the highway was built with [`crate::BackendKind::Mapped`].
pub(crate) struct MappedStorage {
  mmap: MmapMut,
  file: File,
  path: PathBuf,
  cap: u32,
  disposed: AtomicBool,
}

// Safety: `mmap` owns its mapped region exclusively; access only happens
// through the bounds-checked `Backend::read`/`Backend::write` accessors.
unsafe impl Send for MappedStorage {}
unsafe impl Sync for MappedStorage {}

impl MappedStorage {
  /// Creates the lane's backing file under `dir`, named deterministically
  /// from the given ids, sizes it to `capacity` and maps it.
  pub(crate) fn new(dir: &Path, highway_id: u64, lane_id: usize, capacity: u32) -> Result<Self, Error> {
    if capacity == 0 {
      return Err(Error::InvalidArgument("lane capacity must be non-zero"));
    }

    std::fs::create_dir_all(dir).map_err(|e| Error::BackendFault(e.to_string()))?;

    let pid = std::process::id();
    let path = dir.join(format!("memory-highway-{pid}-{highway_id}-{lane_id}.lane"));

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(true)
      .open(&path)
      .map_err(|e| Error::BackendFault(e.to_string()))?;

    file
      .set_len(capacity as u64)
      .map_err(|e| Error::BackendFault(e.to_string()))?;

    file
      .lock_exclusive()
      .map_err(|e| Error::BackendFault(e.to_string()))?;

    // Safety: the file was just created and sized by us; no other process
    // has it open, so there is no third party who could race the mapping.
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::BackendFault(e.to_string()))?;

    Ok(Self {
      mmap,
      file,
      path,
      cap: capacity,
      disposed: AtomicBool::new(false),
    })
  }

  /// The backing file's path, exposed for tests that assert no lane files
  /// survive a highway's disposal.
  #[cfg(test)]
  pub(crate) fn path(&self) -> &Path {
    &self.path
  }
}

impl StorageOps for MappedStorage {
  fn capacity(&self) -> u32 {
    self.cap
  }

  fn as_ptr(&self) -> *const u8 {
    self.mmap.as_ptr()
  }

  fn as_mut_ptr(&self) -> *mut u8 {
    self.mmap.as_ptr() as *mut u8
  }

  fn dispose(&self) -> Result<(), Error> {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let _ = self.file.unlock();
    let _ = self.file.sync_all();
    std::fs::remove_file(&self.path).map_err(|e| Error::BackendFault(e.to_string()))
  }
}

impl Drop for MappedStorage {
  fn drop(&mut self) {
    let _ = self.dispose();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_zero_capacity() {
    let dir = tempfile::tempdir().unwrap();
    assert!(MappedStorage::new(dir.path(), 0, 0, 0).is_err());
  }

  #[test]
  fn creates_a_sized_file_and_removes_it_on_dispose() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MappedStorage::new(dir.path(), 1, 0, 512).unwrap();
    let path = storage.path().to_path_buf();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 512);

    storage.dispose().unwrap();
    assert!(!path.exists());
    // Idempotent: a second dispose is a no-op, not an error.
    storage.dispose().unwrap();
  }

  #[test]
  fn write_then_read_back_through_the_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let storage = MappedStorage::new(dir.path(), 2, 0, 16).unwrap();
    unsafe {
      std::ptr::copy_nonoverlapping(b"0123456789abcdef".as_ptr(), storage.as_mut_ptr(), 16);
    }
    let region = unsafe { std::slice::from_raw_parts(storage.as_ptr(), 16) };
    assert_eq!(region, b"0123456789abcdef");
  }
}
