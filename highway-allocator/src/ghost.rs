//! Weak-reference tracking for fragments that were abandoned without
//! disposal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::fragment::{Fragment, FragmentState};
use crate::lane::Lane;

struct GhostRecord {
  lane: Arc<Lane>,
  cycle_stamp: u64,
  disposed: Arc<AtomicBool>,
  weak: Weak<FragmentState>,
}

/// Tracks every fragment a highway has handed out, so that fragments
/// abandoned via [`crate::Fragment::into_ghost`] (rather than disposed
/// through the ordinary path) can have their lane slot reclaimed.
///
/// Only instantiated when a highway is built with
/// [`crate::DisposalPolicy::TrackGhosts`].
#[derive(Default)]
pub(crate) struct GhostTracker {
  records: Mutex<Vec<GhostRecord>>,
}

impl GhostTracker {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Registers a freshly allocated fragment.
  pub(crate) fn track(&self, lane: Arc<Lane>, fragment: &Fragment) {
    let record = GhostRecord {
      lane,
      cycle_stamp: fragment.cycle_at_birth(),
      disposed: fragment.disposed_flag(),
      weak: fragment.weak(),
    };
    self.records.lock().push(record);
  }

  /// Scans tracked records, reclaiming the lane slot of any fragment whose
  /// shared state has been dropped without going through the dispose path.
  /// Returns the number of slots reclaimed.
  ///
  /// Records for fragments that were disposed normally (or are still
  /// alive) are dropped from the tracker's bookkeeping as a side effect,
  /// keeping it from growing without bound.
  pub(crate) fn scan(&self) -> usize {
    let mut reclaimed = 0usize;
    let mut records = self.records.lock();
    records.retain(|record| {
      if record.disposed.load(Ordering::Acquire) {
        // Disposed through the ordinary path already; nothing left to do.
        return false;
      }
      match record.weak.upgrade() {
        // Still live: some handle (or a clone of it) still exists.
        Some(_) => true,
        // Dropped without disposing: a genuine ghost.
        None => {
          record.lane.reset_one(record.cycle_stamp);
          reclaimed += 1;
          false
        }
      }
    });
    reclaimed
  }

  #[cfg(test)]
  pub(crate) fn pending(&self) -> usize {
    self.records.lock().len()
  }
}
