//! Highway-wide configuration.

use crate::Error;

/// The default lane capacity: 64 KiB.
pub const DEFAULT_LANE_CAPACITY: u32 = 64 * 1024;

/// The default hard cap on the number of lanes a highway may grow to.
pub const DEFAULT_MAX_LANES: usize = 8;

/// Sentinel for "wait indefinitely" passed to [`crate::Highway::alloc`].
pub const INDEFINITE_AWAIT: i64 = -1;

/// How a highway handles fragments that were never explicitly disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposalPolicy {
  /// No bookkeeping beyond the lane's own `active` counter. A leaked
  /// fragment permanently pins its lane slot.
  #[default]
  Lazy,
  /// Every returned fragment registers a weak reference in a
  /// [`crate::ghost::GhostTracker`](crate::ghost::GhostTracker); calling
  /// [`crate::Highway::scan_ghosts`] reclaims slots for fragments that were
  /// abandoned via [`crate::Fragment::into_ghost`].
  TrackGhosts,
}

/// The storage class backing every lane of a highway. Fixed for the
/// lifetime of the highway; a highway never mixes backend kinds across its
/// own lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
  /// A contiguous, zero-initialized managed-heap allocation per lane.
  Heap,
  /// A contiguous, unmanaged, OS-allocator-backed allocation per lane. Not
  /// zero-initialized: a caller that needs deterministic initial bytes
  /// must write before it reads.
  Native,
  /// A contiguous memory-mapped temp file per lane.
  #[cfg(feature = "memmap")]
  Mapped,
}

/// Highway-wide knobs. Construct with [`HighwaySettings::default`] and
/// struct-update syntax, or via [`HighwaySettings::builder`].
#[derive(Debug, Clone)]
pub struct HighwaySettings {
  /// Capacity given to a lane created on demand, unless the triggering
  /// allocation itself needs more.
  pub default_lane_capacity: u32,
  /// Hard upper bound on the total number of lanes a highway may hold.
  pub max_lanes: usize,
  /// Default lock-wait budget, in milliseconds, for [`crate::Highway::alloc`]
  /// calls that don't specify their own. Negative means indefinite, zero
  /// means try-now.
  pub lane_await_ms: i64,
  /// How leaked (undisposed) fragments are handled.
  pub disposal_policy: DisposalPolicy,
}

impl Default for HighwaySettings {
  fn default() -> Self {
    Self {
      default_lane_capacity: DEFAULT_LANE_CAPACITY,
      max_lanes: DEFAULT_MAX_LANES,
      lane_await_ms: INDEFINITE_AWAIT,
      disposal_policy: DisposalPolicy::Lazy,
    }
  }
}

impl HighwaySettings {
  /// Starts a [`HighwaySettingsBuilder`] seeded with the defaults.
  pub fn builder() -> HighwaySettingsBuilder {
    HighwaySettingsBuilder(Self::default())
  }

  /// Validates the settings, rejecting values that would leave a highway in
  /// a state where it could never allocate anything.
  pub(crate) fn validate(&self) -> Result<(), Error> {
    if self.default_lane_capacity == 0 {
      return Err(Error::InvalidArgument(
        "default_lane_capacity must be non-zero",
      ));
    }
    if self.max_lanes == 0 {
      return Err(Error::InvalidArgument("max_lanes must be non-zero"));
    }
    Ok(())
  }
}

/// A small fluent builder over [`HighwaySettings`].
#[derive(Debug, Clone)]
pub struct HighwaySettingsBuilder(HighwaySettings);

impl HighwaySettingsBuilder {
  /// Sets [`HighwaySettings::default_lane_capacity`].
  pub fn default_lane_capacity(mut self, bytes: u32) -> Self {
    self.0.default_lane_capacity = bytes;
    self
  }

  /// Sets [`HighwaySettings::max_lanes`].
  pub fn max_lanes(mut self, max_lanes: usize) -> Self {
    self.0.max_lanes = max_lanes;
    self
  }

  /// Sets [`HighwaySettings::lane_await_ms`].
  pub fn lane_await_ms(mut self, ms: i64) -> Self {
    self.0.lane_await_ms = ms;
    self
  }

  /// Sets [`HighwaySettings::disposal_policy`].
  pub fn disposal_policy(mut self, policy: DisposalPolicy) -> Self {
    self.0.disposal_policy = policy;
    self
  }

  /// Finishes the builder.
  pub fn build(self) -> HighwaySettings {
    self.0
  }
}

/// How long a lane allocation attempt should wait to acquire the lane
/// mutex, translated from a `lock_await` milliseconds convention:
/// negative means indefinite, zero means try-now, positive is a bounded
/// wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAwait {
  /// Block until the lock is acquired.
  Indefinite,
  /// Acquire the lock only if it is immediately free.
  TryNow,
  /// Wait up to the given number of milliseconds.
  Millis(u64),
}

impl From<i64> for LockAwait {
  fn from(ms: i64) -> Self {
    match ms {
      ms if ms < 0 => LockAwait::Indefinite,
      0 => LockAwait::TryNow,
      ms => LockAwait::Millis(ms as u64),
    }
  }
}
