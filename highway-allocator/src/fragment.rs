//! A typed lease over a contiguous sub-window of one lane.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::lane::Lane;
use crate::Error;

/// The state shared by every clone of a [`Fragment`]. Kept separate from
/// `Fragment` itself so [`Fragment::into_ghost`] can drop it without
/// running `Fragment`'s own `Drop` glue (see that method's docs).
pub(crate) struct FragmentState {
  lane: Arc<Lane>,
  cycle_at_birth: u64,
  offset: u32,
  length: u32,
  // An `Arc` rather than a plain `AtomicBool`: the ghost tracker keeps its
  // own clone of this flag so it can tell "properly disposed" apart from
  // "abandoned" even after this `FragmentState` itself has been
  // deallocated (see `crate::ghost`).
  disposed: Arc<AtomicBool>,
}

impl FragmentState {
  pub(crate) fn new(lane: Arc<Lane>, cycle_at_birth: u64, offset: u32, length: u32) -> Arc<Self> {
    Arc::new(Self {
      lane,
      cycle_at_birth,
      offset,
      length,
      disposed: Arc::new(AtomicBool::new(false)),
    })
  }

  /// Disposes exactly once, regardless of how many times it's called or
  /// from how many clones/threads.
  fn dispose_once(&self) {
    if !self.disposed.swap(true, Ordering::AcqRel) {
      self.lane.on_fragment_disposed();
    }
  }

  fn check_valid(&self) -> Result<(), Error> {
    if self.disposed.load(Ordering::Acquire) {
      return Err(Error::DisposedAccess("fragment has already been disposed"));
    }
    if self.lane.cycle() != self.cycle_at_birth {
      return Err(Error::DisposedAccess(
        "fragment's lane has advanced past its birth cycle",
      ));
    }
    Ok(())
  }
}

/// A lease over `[offset, offset + length)` of a specific lane at a
/// specific cycle.
///
/// `Fragment` is cheap to clone (an `Arc` bump) so ownership can be shared
/// across threads; every clone shares one lease, not one each, so
/// whichever clone is dropped first runs the dispose path and every later
/// sibling drop is a no-op. See [`Fragment::into_ghost`] for the one way
/// to skip that path deliberately.
pub struct Fragment {
  state: Arc<FragmentState>,
}

impl Fragment {
  pub(crate) fn new(state: Arc<FragmentState>) -> Self {
    Self { state }
  }

  /// The fragment's length in bytes.
  pub fn len(&self) -> u32 {
    self.state.length
  }

  /// `true` if the fragment's length is zero. A `Fragment` can never
  /// actually be empty (allocation rejects `length == 0`), but the method
  /// is provided for API symmetry with `[T]::is_empty`.
  pub fn is_empty(&self) -> bool {
    self.state.length == 0
  }

  /// The lane index this fragment was carved from.
  pub fn lane_id(&self) -> usize {
    self.state.lane.id()
  }

  /// Reads `len` bytes starting at `dst_off` within the fragment's window.
  pub fn read(&self, dst_off: u32, len: u32) -> Result<&[u8], Error> {
    self.state.check_valid()?;
    let end = dst_off
      .checked_add(len)
      .ok_or(Error::InvalidArgument("offset + length overflows u32"))?;
    if end > self.state.length {
      return Err(Error::InvalidArgument("read out of fragment bounds"));
    }
    self
      .state
      .lane
      .backend()
      .read(self.state.offset + dst_off, len)
  }

  /// Writes `src` starting at `src_off` within the fragment's window.
  pub fn write(&self, src_off: u32, src: &[u8]) -> Result<(), Error> {
    self.state.check_valid()?;
    let end = src_off
      .checked_add(src.len() as u32)
      .ok_or(Error::InvalidArgument("offset + length overflows u32"))?;
    if end > self.state.length {
      return Err(Error::InvalidArgument("write out of fragment bounds"));
    }
    self
      .state
      .lane
      .backend()
      .write(self.state.offset + src_off, src)
  }

  /// A direct view of the fragment's entire window.
  pub fn span(&self) -> Result<&[u8], Error> {
    self.read(0, self.state.length)
  }

  /// Explicitly disposes the fragment. Equivalent to dropping it, spelled
  /// out for callers that want the release to read as an explicit step
  /// (mirrors the external `dispose(fragment)` entry point).
  pub fn dispose(self) {
    // The `Drop` impl below does the work.
  }

  /// Abandons the fragment **without** running the dispose path, modeling
  /// a lease that was lost by its owner (e.g. a host-language caller that
  /// dropped its last reference without calling dispose). The lane's
  /// `active` counter is left stale until a ghost scan reclaims it via
  /// [`crate::Highway::scan_ghosts`].
  ///
  /// Rust has no tracing GC, so there is no runtime event to hook for
  /// "this value was reclaimed": the loss has to be an explicit,
  /// caller-initiated action instead. See `DESIGN.md` for background.
  pub fn into_ghost(self) {
    // Safety: `ManuallyDrop` suppresses `Fragment::drop` entirely, so we
    // can move `state` out without the compiler also running the dtor on
    // the now-moved-from `self`. Nothing is left to drop afterward; we
    // read the only field out of an otherwise-inert wrapper.
    let mut this = ManuallyDrop::new(self);
    let state = unsafe { std::ptr::read(&mut this.state) };
    // Plain `Arc` drop: if this was the last strong reference, `state` is
    // deallocated here *without* `dispose_once` ever running, which is
    // exactly the "lost without disposal" condition `scan_ghosts` looks
    // for via its `Weak`.
    drop(state);
  }

  /// A weak handle into this fragment's shared state, used by
  /// [`crate::ghost::GhostTracker`] to detect abandonment without keeping
  /// the fragment alive.
  pub(crate) fn weak(&self) -> Weak<FragmentState> {
    Arc::downgrade(&self.state)
  }

  pub(crate) fn cycle_at_birth(&self) -> u64 {
    self.state.cycle_at_birth
  }

  /// The shared "has this lease been disposed through the ordinary path"
  /// flag, cloned by the ghost tracker so it can skip records that were
  /// already disposed properly (see `crate::ghost`).
  pub(crate) fn disposed_flag(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.state.disposed)
  }
}

impl Clone for Fragment {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
    }
  }
}

impl Drop for Fragment {
  fn drop(&mut self) {
    self.state.dispose_once();
  }
}

impl std::fmt::Debug for Fragment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Fragment")
      .field("lane_id", &self.state.lane.id())
      .field("cycle_at_birth", &self.state.cycle_at_birth)
      .field("offset", &self.state.offset)
      .field("length", &self.state.length)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::backend::{Backend, HeapStorage};
  use crate::lane::Lane;
  use crate::settings::LockAwait;

  fn lane(capacity: u32) -> Arc<Lane> {
    Arc::new(Lane::new(0, Backend::Heap(HeapStorage::new(capacity).unwrap())))
  }

  fn alloc(lane: &Arc<Lane>, len: u32) -> Fragment {
    match Lane::try_alloc(lane, len, LockAwait::Indefinite).unwrap() {
      crate::error::LaneOutcome::Allocated(f) => f,
      other => panic!("expected an allocation, got {other}"),
    }
  }

  #[test]
  fn write_then_read_round_trips() {
    let lane = lane(64);
    let fragment = alloc(&lane, 16);
    fragment.write(0, b"hello world").unwrap();
    assert_eq!(fragment.read(0, 11).unwrap(), b"hello world");
    assert_eq!(fragment.read(6, 5).unwrap(), b"world");
  }

  #[test]
  fn write_out_of_bounds_is_rejected() {
    let lane = lane(64);
    let fragment = alloc(&lane, 8);
    let err = fragment.write(4, b"too long").unwrap_err();
    assert_eq!(err.code(), 1);
  }

  #[test]
  fn read_out_of_bounds_is_rejected() {
    let lane = lane(64);
    let fragment = alloc(&lane, 8);
    let err = fragment.read(4, 8).unwrap_err();
    assert_eq!(err.code(), 1);
  }

  #[test]
  fn dispose_is_idempotent_across_clones() {
    // A clone shares one lease, not two: whichever clone drops first ends
    // it, and every later drop of a sibling clone is a no-op rather than a
    // second decrement.
    let lane = lane(64);
    let fragment = alloc(&lane, 8);
    let clone = fragment.clone();
    assert_eq!(lane.active(), 1);

    drop(fragment);
    assert_eq!(lane.active(), 0);

    drop(clone);
    assert_eq!(lane.active(), 0, "a sibling clone's drop must not double-decrement");
  }

  #[test]
  fn access_after_dispose_is_an_error() {
    let lane = lane(64);
    let fragment = alloc(&lane, 8);
    let clone = fragment.clone();
    drop(fragment);
    // `clone` still holds the shared state, which is now disposed.
    let err = clone.read(0, 1).unwrap_err();
    assert_eq!(err.code(), 6);
  }

  #[test]
  fn into_ghost_leaves_active_count_stale() {
    let lane = lane(64);
    let fragment = alloc(&lane, 8);
    assert_eq!(lane.active(), 1);
    fragment.into_ghost();
    assert_eq!(lane.active(), 1, "into_ghost must not run the dispose path");
  }
}
