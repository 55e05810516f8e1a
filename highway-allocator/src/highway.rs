//! The highway: an ordered collection of same-backend lanes, picked by
//! first-fit, grown on demand up to a cap.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::backend::{Backend, HeapStorage, NativeStorage};
use crate::error::LaneOutcome;
use crate::fragment::Fragment;
use crate::ghost::GhostTracker;
use crate::lane::{Lane, LaneStats};
use crate::settings::{BackendKind, DisposalPolicy, HighwaySettings, LockAwait};
use crate::Error;

#[cfg(feature = "memmap")]
use crate::backend::MappedStorage;

static NEXT_HIGHWAY_ID: AtomicU64 = AtomicU64::new(0);

/// A managed collection of lanes exposing a single allocation API.
///
/// All lanes of a `Highway` share one [`BackendKind`], chosen once at
/// construction. Allocation probes existing lanes in order (ordered
/// first-fit) and grows the lane list, under a dedicated growth lock, only
/// when every existing lane is full.
pub struct Highway {
  id: u64,
  settings: HighwaySettings,
  backend_kind: BackendKind,
  lanes: RwLock<Vec<Arc<Lane>>>,
  growth_lock: Mutex<()>,
  ghost: Option<GhostTracker>,
  mapped_dir: PathBuf,
  disposed: AtomicBool,
}

impl Highway {
  fn new(settings: HighwaySettings, backend_kind: BackendKind, mapped_dir: PathBuf) -> Result<Self, Error> {
    settings.validate()?;
    let ghost = match settings.disposal_policy {
      DisposalPolicy::Lazy => None,
      DisposalPolicy::TrackGhosts => Some(GhostTracker::new()),
    };
    Ok(Self {
      id: NEXT_HIGHWAY_ID.fetch_add(1, Ordering::Relaxed),
      settings,
      backend_kind,
      lanes: RwLock::new(Vec::new()),
      growth_lock: Mutex::new(()),
      ghost,
      mapped_dir,
      disposed: AtomicBool::new(false),
    })
  }

  /// Builds a highway whose lanes are managed-heap allocations.
  pub fn new_heap(settings: HighwaySettings) -> Result<Self, Error> {
    Self::new(settings, BackendKind::Heap, PathBuf::new())
  }

  /// Builds a highway whose lanes are unmanaged, off-heap allocations.
  pub fn new_native(settings: HighwaySettings) -> Result<Self, Error> {
    Self::new(settings, BackendKind::Native, PathBuf::new())
  }

  /// Builds a highway whose lanes are each backed by a memory-mapped temp
  /// file. `dir` overrides `std::env::temp_dir()`, primarily so tests can
  /// point at a scratch directory they control.
  #[cfg(feature = "memmap")]
  pub fn new_mapped(settings: HighwaySettings, dir: Option<PathBuf>) -> Result<Self, Error> {
    let dir = dir.unwrap_or_else(std::env::temp_dir);
    Self::new(settings, BackendKind::Mapped, dir)
  }

  /// The backend class every lane of this highway uses.
  pub fn backend_kind(&self) -> BackendKind {
    self.backend_kind
  }

  /// Number of lanes currently held.
  pub fn get_lane_count(&self) -> usize {
    self.lanes.read().len()
  }

  /// Sum of `active` across every lane.
  pub fn get_total_active_fragments(&self) -> usize {
    self
      .lanes
      .read()
      .iter()
      .map(|l| l.active() as usize)
      .sum()
  }

  /// Point-in-time stats for the lane at `index`, or `None` if out of
  /// range.
  pub fn lane_stats(&self, index: usize) -> Option<LaneStats> {
    self.lanes.read().get(index).map(|l| l.stats())
  }

  /// Allocates `length` bytes, waiting up to `lock_await` for a lane's
  /// mutex (see [`LockAwait`]'s `From<i64>` for the millisecond
  /// convention). Returns `Ok(None)` for the two expected exhaustion cases
  /// (no lane has room anywhere and the highway is at `max_lanes`, or the
  /// lock-wait budget was exhausted on every candidate lane); returns
  /// `Err` only for a genuine precondition violation or backend fault.
  ///
  /// A new lane is only grown when every existing lane reported `Full`; a
  /// lock timeout on any candidate short-circuits straight to `Ok(None)`
  /// without growing, since a timeout says nothing about whether the lane
  /// actually has room.
  pub fn alloc(&self, length: u32, lock_await: impl Into<LockAwait>) -> Result<Option<Fragment>, Error> {
    if self.disposed.load(Ordering::Acquire) {
      return Err(Error::DisposedAccess("highway has been disposed"));
    }
    if length == 0 {
      return Err(Error::InvalidArgument("fragment length must be non-zero"));
    }
    let lock_await = lock_await.into();

    // Pass 1: ordered first-fit over existing lanes.
    let snapshot: Vec<Arc<Lane>> = self.lanes.read().clone();
    let mut any_timeout = false;
    for lane in &snapshot {
      match self.try_lane(lane, length, lock_await)? {
        LaneOutcome::Allocated(fragment) => return Ok(Some(fragment)),
        LaneOutcome::Full { .. } => {}
        LaneOutcome::LockTimeout { .. } => any_timeout = true,
      }
    }

    // A lock timeout is inconclusive about whether any lane had room, so
    // it must not trigger growth; only "every lane reported Full" does.
    if any_timeout {
      return Ok(None);
    }

    // Every existing lane was full; grow, under the growth lock, unless
    // we're already at the cap.
    let _growth = self.growth_lock.lock();

    // Re-check under the growth lock: another thread may have already
    // grown (or the snapshot may be stale).
    let lane_count = self.lanes.read().len();
    if lane_count >= self.settings.max_lanes {
      return Ok(None);
    }

    let new_capacity = length.max(self.settings.default_lane_capacity);
    let lane = self.create_lane(lane_count, new_capacity)?;
    self.lanes.write().push(Arc::clone(&lane));
    log::debug!(
      "highway {} grew to {} lane(s) (new lane capacity {})",
      self.id,
      lane_count + 1,
      new_capacity
    );

    Ok(match self.try_lane(&lane, length, lock_await)? {
      LaneOutcome::Allocated(fragment) => Some(fragment),
      LaneOutcome::Full { .. } | LaneOutcome::LockTimeout { .. } => None,
    })
  }

  /// Allocates `length` bytes using [`HighwaySettings::lane_await_ms`] as
  /// the lock-wait budget, for callers that don't need a per-call
  /// override.
  pub fn alloc_default(&self, length: u32) -> Result<Option<Fragment>, Error> {
    self.alloc(length, self.settings.lane_await_ms)
  }

  fn try_lane(&self, lane: &Arc<Lane>, length: u32, lock_await: LockAwait) -> Result<LaneOutcome<Fragment>, Error> {
    let outcome = Lane::try_alloc(lane, length, lock_await)?;
    match &outcome {
      LaneOutcome::Allocated(fragment) => {
        if let Some(ghost) = &self.ghost {
          ghost.track(Arc::clone(lane), fragment);
        }
      }
      LaneOutcome::Full { .. } => {}
      LaneOutcome::LockTimeout { waited_ms } => {
        log::warn!("lane {} lock timeout after {}ms", lane.id(), waited_ms);
      }
    }
    Ok(outcome)
  }

  fn create_lane(&self, id: usize, capacity: u32) -> Result<Arc<Lane>, Error> {
    let backend = match self.backend_kind {
      BackendKind::Heap => Backend::Heap(HeapStorage::new(capacity)?),
      BackendKind::Native => Backend::Native(NativeStorage::new(capacity)?),
      #[cfg(feature = "memmap")]
      BackendKind::Mapped => Backend::Mapped(MappedStorage::new(&self.mapped_dir, self.id, id, capacity)?),
    };
    Ok(Arc::new(Lane::new(id, backend)))
  }

  /// Runs a ghost scan, reclaiming lane slots for fragments abandoned via
  /// [`crate::Fragment::into_ghost`]. A no-op returning `0` when the
  /// highway was built with [`DisposalPolicy::Lazy`].
  pub fn scan_ghosts(&self) -> usize {
    match &self.ghost {
      Some(tracker) => tracker.scan(),
      None => 0,
    }
  }

  /// Disposes every lane. Individual lane faults are collected rather than
  /// aborting the loop; after this call, [`Highway::alloc`] always returns
  /// `Err(Error::DisposedAccess)`.
  pub fn dispose(&self) -> Result<(), Vec<Error>> {
    self.disposed.store(true, Ordering::Release);
    let mut faults = Vec::new();
    for lane in self.lanes.read().iter() {
      if let Err(e) = lane.dispose() {
        log::error!("lane {} failed to dispose: {e}", lane.id());
        faults.push(e);
      }
    }
    if faults.is_empty() {
      Ok(())
    } else {
      Err(faults)
    }
  }
}

impl Drop for Highway {
  fn drop(&mut self) {
    if !self.disposed.load(Ordering::Acquire) {
      let _ = self.dispose();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use super::*;

  #[test]
  fn single_threaded_linear_fill() {
    let settings = HighwaySettings::builder()
      .max_lanes(1)
      .default_lane_capacity(1024)
      .build();
    let highway = Highway::new_heap(settings).unwrap();

    let mut fragments = Vec::new();
    for _ in 0..10 {
      let fragment = highway.alloc(100, -1i64).unwrap();
      assert!(fragment.is_some());
      fragments.push(fragment.unwrap());
    }
    assert_eq!(highway.get_lane_count(), 1);
    assert_eq!(highway.get_total_active_fragments(), 10);

    // The 11th allocation doesn't fit and the highway is already at max_lanes.
    assert!(highway.alloc(100, -1i64).unwrap().is_none());

    let stats_before = highway.lane_stats(0).unwrap();
    fragments.clear();
    assert_eq!(highway.get_total_active_fragments(), 0);
    let stats_after = highway.lane_stats(0).unwrap();
    assert_eq!(stats_after.cycle, stats_before.cycle + 1);
    assert_eq!(stats_after.offset, 0);

    // The drained lane can be reused.
    assert!(highway.alloc(100, -1i64).unwrap().is_some());
  }

  #[test]
  fn growth_stops_at_max_lanes() {
    let settings = HighwaySettings::builder()
      .max_lanes(2)
      .default_lane_capacity(64)
      .build();
    let highway = Highway::new_heap(settings).unwrap();

    let mut fragments = Vec::new();
    // Each lane holds exactly one 64-byte fragment; the third request must
    // find both lanes full and be refused rather than grow a third.
    for _ in 0..2 {
      fragments.push(highway.alloc(64, -1i64).unwrap().unwrap());
    }
    assert_eq!(highway.get_lane_count(), 2);
    assert!(highway.alloc(64, -1i64).unwrap().is_none());
    assert_eq!(highway.get_lane_count(), 2);
  }

  #[test]
  fn lock_timeout_does_not_trigger_growth() {
    // Only an all-lanes-Full pass should grow a new lane. A lane that's
    // merely locked by someone else is inconclusive about whether it has
    // room, so it must short-circuit straight to `None` instead.
    let settings = HighwaySettings::builder()
      .max_lanes(2)
      .default_lane_capacity(64)
      .build();
    let highway = Highway::new_heap(settings).unwrap();

    // Force lane 0 into existence without filling it.
    let first = highway.alloc(8, -1i64).unwrap().unwrap();

    let lane0 = Arc::clone(&highway.lanes.read()[0]);
    let guard = lane0.lock_state_for_test();

    assert!(highway.alloc(8, 30i64).unwrap().is_none());
    assert_eq!(
      highway.get_lane_count(),
      1,
      "a lock timeout must not grow a new lane"
    );

    drop(guard);
    assert!(highway.alloc(8, -1i64).unwrap().is_some());
    drop(first);
  }

  #[test]
  fn alloc_default_uses_the_configured_lock_wait() {
    let settings = HighwaySettings::builder()
      .max_lanes(1)
      .default_lane_capacity(64)
      .lane_await_ms(-1)
      .build();
    let highway = Highway::new_heap(settings).unwrap();
    assert!(highway.alloc_default(32).unwrap().is_some());
  }

  #[test]
  fn concurrent_stress_leaves_no_active_fragments() {
    let settings = HighwaySettings::builder()
      .max_lanes(8)
      .default_lane_capacity(4096)
      .build();
    let highway = Highway::new_heap(settings).unwrap();

    thread::scope(|s| {
      for t in 0..8 {
        s.spawn(|| {
          let mut seed = 0x9e3779b9u32 ^ (t as u32);
          for _ in 0..200 {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            let len = 1 + (seed % 64);
            if let Some(fragment) = highway.alloc(len, 200i64).unwrap() {
              fragment.write(0, &vec![0xAB; len as usize]).unwrap();
              thread::yield_now();
              fragment.dispose();
            }
          }
        });
      }
    });

    assert_eq!(highway.get_total_active_fragments(), 0);
  }

  #[test]
  fn ghost_scan_reclaims_abandoned_fragments() {
    let settings = HighwaySettings::builder()
      .max_lanes(1)
      .default_lane_capacity(4096)
      .disposal_policy(DisposalPolicy::TrackGhosts)
      .build();
    let highway = Highway::new_heap(settings).unwrap();

    for i in 0..100 {
      let fragment = highway.alloc(4, -1i64).unwrap().unwrap();
      if i % 2 == 0 {
        fragment.into_ghost();
      } else {
        fragment.dispose();
      }
    }

    assert_eq!(highway.get_total_active_fragments(), 50);
    assert_eq!(highway.scan_ghosts(), 50);
    assert_eq!(highway.get_total_active_fragments(), 0);
  }

  #[test]
  fn ghost_scan_is_always_zero_under_lazy_policy() {
    let highway = Highway::new_heap(HighwaySettings::default()).unwrap();
    let fragment = highway.alloc(4, -1i64).unwrap().unwrap();
    fragment.into_ghost();
    assert_eq!(highway.scan_ghosts(), 0);
  }

  #[test]
  fn frame_copy_via_backend_in_arbitrary_chunks() {
    let highway = Highway::new_heap(HighwaySettings::default()).unwrap();
    let body_len: u32 = 32 * 1024;
    let fragment = highway.alloc(4 + body_len, -1i64).unwrap().unwrap();

    fragment.write(0, &body_len.to_le_bytes()).unwrap();

    let body: Vec<u8> = (0..body_len).map(|i| (i % 256) as u8).collect();
    let mut written = 0u32;
    let mut chunk = 777u32;
    while written < body_len {
      chunk = chunk.wrapping_mul(2654435761).wrapping_add(1) % 4001 + 1;
      let n = chunk.min(body_len - written);
      fragment
        .write(4 + written, &body[written as usize..(written + n) as usize])
        .unwrap();
      written += n;
    }

    let header = u32::from_le_bytes(fragment.read(0, 4).unwrap().try_into().unwrap());
    assert_eq!(header, body_len);
    assert_eq!(fragment.read(4, body_len).unwrap(), &body[..]);
  }

  #[cfg(feature = "memmap")]
  #[test]
  fn mapped_backend_parity_and_no_leftover_files() {
    let dir = tempfile::tempdir().unwrap();
    let settings = HighwaySettings::builder()
      .max_lanes(1)
      .default_lane_capacity(1024)
      .build();
    let highway = Highway::new_mapped(settings, Some(dir.path().to_path_buf())).unwrap();

    let mut fragments = Vec::new();
    for _ in 0..10 {
      let fragment = highway.alloc(100, -1i64).unwrap().unwrap();
      fragment.write(0, &[7u8; 100]).unwrap();
      assert_eq!(fragment.read(0, 100).unwrap(), &[7u8; 100][..]);
      fragments.push(fragment);
    }
    assert!(highway.alloc(100, -1i64).unwrap().is_none());

    let lane_file = {
      let lanes = highway.lanes.read();
      match lanes[0].backend() {
        Backend::Mapped(m) => m.path().to_path_buf(),
        _ => unreachable!(),
      }
    };
    assert!(lane_file.exists());

    fragments.clear();
    highway.dispose().unwrap();

    assert!(!lane_file.exists());
    let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(remaining.is_empty(), "no lane files should survive disposal");
  }
}
