//! The tagged error taxonomy shared by every component of the highway.

use std::fmt;

/// Errors produced by the lane/highway allocator.
///
/// Every variant carries a stable numeric sub-code through [`Error::code`],
/// so callers that cross an FFI or wire boundary can propagate the error
/// kind without depending on `Display` text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A non-positive length, a zero capacity, or another caller-supplied
  /// value that violates a precondition.
  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),

  /// The highway has no lane with room for the request and `max_lanes` has
  /// already been reached.
  #[error("highway is full: {lanes} lane(s) at capacity, max_lanes = {max_lanes}")]
  HighwayFull {
    /// Number of lanes the highway currently holds.
    lanes: usize,
    /// The highway's configured lane cap.
    max_lanes: usize,
  },

  /// The underlying storage backend failed (allocator refusal, mmap/IO
  /// error).
  #[error("backend fault: {0}")]
  BackendFault(String),

  /// A fragment or highway was used after disposal, or a fragment's lane
  /// has moved past the cycle the fragment was born in.
  #[error("disposed access: {0}")]
  DisposedAccess(&'static str),

  /// An internal counter underflowed or a lock was found poisoned. This
  /// should be unreachable; seeing it means the crate has a bug.
  #[error("concurrency fault: {0}")]
  ConcurrencyFault(&'static str),
}

impl Error {
  /// A stable numeric sub-code for this error kind, suitable for crossing
  /// an FFI or wire boundary.
  pub const fn code(&self) -> u16 {
    match self {
      Error::InvalidArgument(_) => 1,
      Error::HighwayFull { .. } => 4,
      Error::BackendFault(_) => 5,
      Error::DisposedAccess(_) => 6,
      Error::ConcurrencyFault(_) => 7,
    }
  }
}

/// The outcome of a single lane's allocation attempt. Kept internal: the
/// highway coalesces [`LaneOutcome::Full`] and [`LaneOutcome::LockTimeout`]
/// into `Ok(None)` at its own public boundary (see [`Error`]'s propagation
/// policy).
#[derive(Debug)]
pub(crate) enum LaneOutcome<T> {
  /// The lane satisfied the request.
  Allocated(T),
  /// The lane does not have `length` remaining bytes.
  Full {
    /// Bytes requested.
    requested: u32,
    /// Bytes actually remaining in the lane.
    available: u32,
  },
  /// The lane's mutex could not be acquired within the requested budget.
  LockTimeout {
    /// Milliseconds actually waited.
    waited_ms: u64,
  },
}

impl<T> fmt::Display for LaneOutcome<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LaneOutcome::Allocated(_) => write!(f, "allocated"),
      LaneOutcome::Full {
        requested,
        available,
      } => write!(f, "lane full (requested {requested}, available {available})"),
      LaneOutcome::LockTimeout { waited_ms } => {
        write!(f, "lane lock timeout after {waited_ms}ms")
      }
    }
  }
}
