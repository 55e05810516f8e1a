//! The native backend: one aligned, unmanaged allocation obtained straight
//! from the OS allocator, off the side of anything the language runtime
//! tracks.
//!
//! Unlike [`super::heap::HeapStorage`] this region is **not**
//! zero-initialized (see the open-question resolution in `DESIGN.md`): a
//! caller that needs deterministic initial bytes must write before it
//! reads.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use super::StorageOps;
use crate::Error;

/// A lane's storage when the highway was built with [`crate::BackendKind::Native`].
pub(crate) struct NativeStorage {
  ptr: NonNull<u8>,
  cap: u32,
  layout: Layout,
  disposed: AtomicBool,
}

// Safety: same reasoning as `HeapStorage`: the allocation is exclusively
// owned, and access only happens through bounds-checked accessors.
unsafe impl Send for NativeStorage {}
unsafe impl Sync for NativeStorage {}

impl NativeStorage {
  pub(crate) fn new(capacity: u32) -> Result<Self, Error> {
    if capacity == 0 {
      return Err(Error::InvalidArgument("lane capacity must be non-zero"));
    }

    let layout = Layout::from_size_align(capacity as usize, std::mem::align_of::<u64>())
      .map_err(|e| Error::BackendFault(e.to_string()))?;

    // Safety: `layout` has non-zero size, checked above. Intentionally not
    // zeroed: zero-initialization is the caller's responsibility for this
    // backend.
    let raw = unsafe { alloc::alloc(layout) };
    let ptr = NonNull::new(raw)
      .ok_or_else(|| Error::BackendFault(format!("native allocation of {capacity} bytes failed")))?;

    Ok(Self {
      ptr,
      cap: capacity,
      layout,
      disposed: AtomicBool::new(false),
    })
  }
}

impl StorageOps for NativeStorage {
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
    if self.disposed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    // Safety: guarded to run at most once; see `HeapStorage::dispose`.
    unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    Ok(())
  }
}

impl Drop for NativeStorage {
  fn drop(&mut self) {
    let _ = self.dispose();
  }
}
