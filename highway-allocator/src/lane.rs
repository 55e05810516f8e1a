//! A single contiguous region with a bump pointer and an active-fragment
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::error::LaneOutcome;
use crate::fragment::{Fragment, FragmentState};
use crate::settings::LockAwait;
use crate::Error;

/// Point-in-time snapshot of a lane's bookkeeping fields, returned by
/// [`crate::Highway::lane_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneStats {
  /// Byte length of the backing region.
  pub capacity: u32,
  /// Next free byte within the current cycle.
  pub offset: u32,
  /// Outstanding fragments for the current cycle.
  pub active: u64,
  /// Monotonic generation counter.
  pub cycle: u64,
}

/// The mutex-protected bump state. `cycle` lives outside this struct as its
/// own atomic so a fragment's validity check never needs the lane lock.
pub(crate) struct LaneState {
  offset: u32,
  active: u64,
}

/// One lane of a [`crate::Highway`]: a bump-pointer region plus the
/// counters that track how much of it is currently leased out.
pub(crate) struct Lane {
  id: usize,
  capacity: u32,
  storage: Backend,
  state: Mutex<LaneState>,
  cycle: AtomicU64,
}

impl Lane {
  pub(crate) fn new(id: usize, storage: Backend) -> Self {
    let capacity = storage.capacity();
    Self {
      id,
      capacity,
      storage,
      state: Mutex::new(LaneState {
        offset: 0,
        active: 0,
      }),
      cycle: AtomicU64::new(0),
    }
  }

  pub(crate) fn id(&self) -> usize {
    self.id
  }

  pub(crate) fn capacity(&self) -> u32 {
    self.capacity
  }

  pub(crate) fn cycle(&self) -> u64 {
    self.cycle.load(Ordering::Acquire)
  }

  pub(crate) fn stats(&self) -> LaneStats {
    let state = self.state.lock();
    LaneStats {
      capacity: self.capacity,
      offset: state.offset,
      active: state.active,
      cycle: self.cycle.load(Ordering::Acquire),
    }
  }

  pub(crate) fn active(&self) -> u64 {
    self.state.lock().active
  }

  pub(crate) fn backend(&self) -> &Backend {
    &self.storage
  }

  /// Holds the lane's mutex open so tests can force a `LockTimeout` on a
  /// concurrent `try_alloc` call instead of a `Full`/`Allocated` outcome.
  #[cfg(test)]
  pub(crate) fn lock_state_for_test(&self) -> parking_lot::MutexGuard<'_, LaneState> {
    self.state.lock()
  }

  /// Attempts to bump-allocate `length` bytes, honoring `lock_await`.
  ///
  /// Takes the owning `Arc` explicitly (rather than `self: &Arc<Self>`,
  /// which stable Rust doesn't accept as a receiver) since a successful
  /// allocation needs to stash a clone of it inside the returned
  /// fragment's shared state.
  ///
  /// Returns `Ok(LaneOutcome::Allocated(fragment))` on success,
  /// `Ok(LaneOutcome::Full { .. })` if the lane lacks room,
  /// `Ok(LaneOutcome::LockTimeout { .. })` if the mutex wasn't acquired in
  /// time, and `Err` only for a genuine precondition violation
  /// (`length == 0`).
  pub(crate) fn try_alloc(
    lane: &Arc<Lane>,
    length: u32,
    lock_await: LockAwait,
  ) -> Result<LaneOutcome<Fragment>, Error> {
    if length == 0 {
      return Err(Error::InvalidArgument("fragment length must be non-zero"));
    }

    let mut guard = match lock_await {
      LockAwait::Indefinite => lane.state.lock(),
      LockAwait::TryNow => match lane.state.try_lock() {
        Some(g) => g,
        None => return Ok(LaneOutcome::LockTimeout { waited_ms: 0 }),
      },
      LockAwait::Millis(ms) => match lane.state.try_lock_for(Duration::from_millis(ms)) {
        Some(g) => g,
        None => return Ok(LaneOutcome::LockTimeout { waited_ms: ms }),
      },
    };

    let want = match guard.offset.checked_add(length) {
      Some(w) => w,
      None => {
        return Ok(LaneOutcome::Full {
          requested: length,
          available: lane.capacity.saturating_sub(guard.offset),
        })
      }
    };

    if want > lane.capacity {
      return Ok(LaneOutcome::Full {
        requested: length,
        available: lane.capacity.saturating_sub(guard.offset),
      });
    }

    let off = guard.offset;
    guard.offset = want;
    guard.active += 1;
    let cycle = lane.cycle.load(Ordering::Acquire);

    log::trace!(
      "lane {} allocated {} bytes at offset {} (cycle {})",
      lane.id,
      length,
      off,
      cycle
    );

    drop(guard);

    let state = FragmentState::new(Arc::clone(lane), cycle, off, length);
    Ok(LaneOutcome::Allocated(Fragment::new(state)))
  }

  /// Called exactly once per fragment, when it is disposed through the
  /// ordinary (non-ghost) path.
  pub(crate) fn on_fragment_disposed(&self) {
    let mut guard = self.state.lock();
    debug_assert!(guard.active > 0, "active underflow on lane {}", self.id);
    guard.active = guard.active.saturating_sub(1);
    if guard.active == 0 {
      guard.offset = 0;
      let new_cycle = self.cycle.fetch_add(1, Ordering::AcqRel) + 1;
      log::debug!("lane {} drained, advancing to cycle {}", self.id, new_cycle);
    }
  }

  /// Forced reclaim performed by the ghost tracker for a fragment whose
  /// handle was abandoned without disposal. A no-op if the lane has
  /// already moved past `cycle_stamp` (the slot was already reclaimed by
  /// the ordinary drain-and-reuse path).
  pub(crate) fn reset_one(&self, cycle_stamp: u64) {
    let mut guard = self.state.lock();
    if self.cycle.load(Ordering::Acquire) != cycle_stamp {
      return;
    }
    guard.active = guard.active.saturating_sub(1);
    if guard.active == 0 {
      guard.offset = 0;
      let new_cycle = self.cycle.fetch_add(1, Ordering::AcqRel) + 1;
      log::warn!(
        "lane {} reclaimed a ghost fragment, advancing to cycle {}",
        self.id,
        new_cycle
      );
    } else {
      log::warn!("lane {} reclaimed a ghost fragment", self.id);
    }
  }

  pub(crate) fn dispose(&self) -> Result<(), Error> {
    self.storage.dispose()
  }
}

#[cfg(test)]
mod tests {
  use std::thread;
  use std::time::Duration;

  use super::*;
  use crate::backend::HeapStorage;

  fn lane(capacity: u32) -> Arc<Lane> {
    Arc::new(Lane::new(0, Backend::Heap(HeapStorage::new(capacity).unwrap())))
  }

  #[test]
  fn bumps_offset_and_rejects_past_capacity() {
    let lane = lane(1024);
    for _ in 0..10 {
      let outcome = Lane::try_alloc(&lane, 100, LockAwait::Indefinite).unwrap();
      assert!(matches!(outcome, LaneOutcome::Allocated(_)));
    }
    assert_eq!(lane.stats().offset, 1000);
    assert_eq!(lane.active(), 10);

    let outcome = Lane::try_alloc(&lane, 100, LockAwait::Indefinite).unwrap();
    assert!(matches!(outcome, LaneOutcome::Full { .. }));
  }

  #[test]
  fn drain_resets_offset_and_advances_cycle() {
    let lane = lane(1024);
    let mut fragments = Vec::new();
    for _ in 0..10 {
      match Lane::try_alloc(&lane, 100, LockAwait::Indefinite).unwrap() {
        LaneOutcome::Allocated(f) => fragments.push(f),
        other => panic!("unexpected outcome: {other}"),
      }
    }
    assert_eq!(lane.cycle(), 0);

    drop(fragments);

    assert_eq!(lane.active(), 0);
    assert_eq!(lane.stats().offset, 0);
    assert_eq!(lane.cycle(), 1);

    // The slot is reusable once drained.
    let outcome = Lane::try_alloc(&lane, 100, LockAwait::Indefinite).unwrap();
    assert!(matches!(outcome, LaneOutcome::Allocated(_)));
  }

  #[test]
  fn zero_length_is_rejected() {
    let lane = lane(64);
    let err = Lane::try_alloc(&lane, 0, LockAwait::Indefinite).unwrap_err();
    assert_eq!(err.code(), 1);
  }

  #[test]
  fn lock_timeout_reports_waited_ms() {
    let lane = lane(64);
    let guard = lane.state.lock();

    let start = std::time::Instant::now();
    let outcome = Lane::try_alloc(&lane, 8, LockAwait::Millis(30)).unwrap();
    let elapsed = start.elapsed();

    assert!(matches!(outcome, LaneOutcome::LockTimeout { waited_ms: 30 }));
    assert!(elapsed >= Duration::from_millis(25));
    drop(guard);
  }

  #[test]
  fn try_now_fails_fast_on_contention() {
    let lane = lane(64);
    let guard = lane.state.lock();
    let outcome = Lane::try_alloc(&lane, 8, LockAwait::TryNow).unwrap();
    assert!(matches!(outcome, LaneOutcome::LockTimeout { waited_ms: 0 }));
    drop(guard);
  }

  #[test]
  fn concurrent_allocations_never_overlap() {
    let lane = lane(8192);
    thread::scope(|s| {
      for _ in 0..8 {
        s.spawn(|| {
          for _ in 0..50 {
            let outcome = Lane::try_alloc(&lane, 16, LockAwait::Indefinite).unwrap();
            assert!(matches!(outcome, LaneOutcome::Allocated(_)));
          }
        });
      }
    });
    assert_eq!(lane.stats().offset, 8 * 50 * 16);
    assert_eq!(lane.active(), 8 * 50);
  }
}
