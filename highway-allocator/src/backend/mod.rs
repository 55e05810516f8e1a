//! Storage backends: the contiguous byte region a [`crate::Lane`] bumps its
//! offset across.
//!
//! Three concrete backends share one capability surface (`StorageOps`);
//! [`Backend`] dispatches to whichever one a highway was built with. The
//! choice is made once, at highway-construction time, and never changes
//! for the lifetime of a lane.

mod heap;
mod native;

#[cfg(feature = "memmap")]
mod mapped;

pub(crate) use heap::HeapStorage;
pub(crate) use native::NativeStorage;

#[cfg(feature = "memmap")]
pub(crate) use mapped::MappedStorage;

use crate::Error;

/// Common contract every storage backend implements.
///
/// # Safety
/// Implementors must guarantee that the region returned by `as_ptr`/
/// `as_mut_ptr` stays valid (same address, same length) for the backend's
/// entire lifetime, i.e. until `dispose` is called.
pub(crate) trait StorageOps: Send + Sync {
  /// Total byte length of the backing region.
  fn capacity(&self) -> u32;

  /// A read-only pointer to the start of the region.
  fn as_ptr(&self) -> *const u8;

  /// A writable pointer to the start of the region.
  fn as_mut_ptr(&self) -> *mut u8;

  /// Releases the region. Must be idempotent: a second call is a no-op
  /// that returns `Ok(())`.
  fn dispose(&self) -> Result<(), Error>;
}

/// The storage class of a single lane, dispatched at runtime because the
/// highway's backend kind is chosen dynamically at construction (heap vs.
/// native vs. mapped).
pub(crate) enum Backend {
  Heap(HeapStorage),
  Native(NativeStorage),
  #[cfg(feature = "memmap")]
  Mapped(MappedStorage),
}

impl Backend {
  pub(crate) fn capacity(&self) -> u32 {
    match self {
      Backend::Heap(b) => b.capacity(),
      Backend::Native(b) => b.capacity(),
      #[cfg(feature = "memmap")]
      Backend::Mapped(b) => b.capacity(),
    }
  }

  /// Bounds-checked read of `len` bytes starting at `off`.
  pub(crate) fn read(&self, off: u32, len: u32) -> Result<&[u8], Error> {
    self.check_bounds(off, len)?;
    let ptr = self.as_ptr_dyn();
    // Safety: `check_bounds` established `off + len <= capacity`, and the
    // backend guarantees the region stays valid for its own lifetime, which
    // outlives this borrow (tied to `&self`).
    Ok(unsafe { std::slice::from_raw_parts(ptr.add(off as usize), len as usize) })
  }

  /// Bounds-checked write of `src` starting at `off`.
  pub(crate) fn write(&self, off: u32, src: &[u8]) -> Result<(), Error> {
    let len = src.len() as u32;
    self.check_bounds(off, len)?;
    let ptr = self.as_mut_ptr_dyn();
    // Safety: see `read`; the destination range was bounds-checked above
    // and this backend's pointer is valid and writable by contract.
    unsafe {
      std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.add(off as usize), src.len());
    }
    Ok(())
  }

  pub(crate) fn dispose(&self) -> Result<(), Error> {
    match self {
      Backend::Heap(b) => b.dispose(),
      Backend::Native(b) => b.dispose(),
      #[cfg(feature = "memmap")]
      Backend::Mapped(b) => b.dispose(),
    }
  }

  fn check_bounds(&self, off: u32, len: u32) -> Result<(), Error> {
    let end = off
      .checked_add(len)
      .ok_or(Error::InvalidArgument("offset + length overflows u32"))?;
    if end > self.capacity() {
      return Err(Error::InvalidArgument(
        "offset + length exceeds backend capacity",
      ));
    }
    Ok(())
  }

  fn as_ptr_dyn(&self) -> *const u8 {
    match self {
      Backend::Heap(b) => b.as_ptr(),
      Backend::Native(b) => b.as_ptr(),
      #[cfg(feature = "memmap")]
      Backend::Mapped(b) => b.as_ptr(),
    }
  }

  fn as_mut_ptr_dyn(&self) -> *mut u8 {
    match self {
      Backend::Heap(b) => b.as_mut_ptr(),
      Backend::Native(b) => b.as_mut_ptr(),
      #[cfg(feature = "memmap")]
      Backend::Mapped(b) => b.as_mut_ptr(),
    }
  }
}
