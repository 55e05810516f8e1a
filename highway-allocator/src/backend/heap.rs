//! The managed-heap backend: one contiguous, zero-initialized allocation
//! per lane, owned and freed through the global Rust allocator.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use super::StorageOps;
use crate::Error;

/// A lane's storage when the highway was built with [`crate::BackendKind::Heap`].
pub(crate) struct HeapStorage {
  ptr: NonNull<u8>,
  cap: u32,
  layout: Layout,
  disposed: std::sync::atomic::AtomicBool,
}

// Safety: `ptr` points at a heap allocation exclusively owned by this
// struct; callers only reach it through the bounds-checked `Backend::read`/
// `Backend::write` accessors, same as every other storage variant.
unsafe impl Send for HeapStorage {}
unsafe impl Sync for HeapStorage {}

impl HeapStorage {
  pub(crate) fn new(capacity: u32) -> Result<Self, Error> {
    if capacity == 0 {
      return Err(Error::InvalidArgument("lane capacity must be non-zero"));
    }

    let layout = Layout::from_size_align(capacity as usize, std::mem::align_of::<u64>())
      .map_err(|e| Error::BackendFault(e.to_string()))?;

    // Safety: `layout` has non-zero size, checked above.
    let raw = unsafe { alloc::alloc_zeroed(layout) };
    let ptr = NonNull::new(raw)
      .ok_or_else(|| Error::BackendFault(format!("heap allocation of {capacity} bytes failed")))?;

    Ok(Self {
      ptr,
      cap: capacity,
      layout,
      disposed: std::sync::atomic::AtomicBool::new(false),
    })
  }
}

impl StorageOps for HeapStorage {
  fn capacity(&self) -> u32 {
    self.cap
  }

  fn as_ptr(&self) -> *const u8 {
    self.ptr.as_ptr()
  }

  fn as_mut_ptr(&self) -> *mut u8 {
    self.ptr.as_ptr()
  }

  fn dispose(&self) -> Result<(), Error> {
    use std::sync::atomic::Ordering;
    if self.disposed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    // Safety: this runs at most once (guarded above) and no other code
    // holds a reference into the region past dispose, by the crate's
    // ownership contract (a Highway must not be used after `dispose`).
    unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    Ok(())
  }
}

impl Drop for HeapStorage {
  fn drop(&mut self) {
    let _ = self.dispose();
  }
}
