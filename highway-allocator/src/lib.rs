//! A pluggable, thread-safe, multi-lane arena allocator.
//!
//! A [`Highway`] hands out fixed-lifetime byte [`Fragment`]s carved from
//! large pre-reserved lanes. Fragments are cheap to allocate and dispose
//! (bump-pointer style), safe to share across threads, and backed by one
//! of three storage classes: a managed heap allocation, unmanaged process
//! memory, or a memory-mapped file (see [`BackendKind`]).
//!
//! ```
//! use highway_allocator::{Highway, HighwaySettings};
//!
//! let highway = Highway::new_heap(HighwaySettings::default()).unwrap();
//! let fragment = highway.alloc(128, -1i64).unwrap().unwrap();
//! fragment.write(0, b"hello").unwrap();
//! assert_eq!(fragment.read(0, 5).unwrap(), &b"hello"[..]);
//! fragment.dispose();
//! assert_eq!(highway.get_total_active_fragments(), 0);
//! ```
//!
//! # Layout
//!
//! - A lane (see [`LaneStats`]) wraps one storage backend and serializes
//!   its bump offset behind a mutex.
//! - [`Fragment`] is a lease over a lane's `[offset, offset + length)`
//!   window; disposing it is idempotent and safe from any thread.
//! - [`Highway`] picks a lane per allocation (ordered first-fit) and grows
//!   the lane list on demand, up to [`HighwaySettings::max_lanes`].
//! - The ghost tracker (enabled via
//!   [`DisposalPolicy::TrackGhosts`]) lets a caller reclaim a lane slot for
//!   a fragment that was abandoned via [`Fragment::into_ghost`] instead of
//!   disposed normally.

#![deny(missing_docs)]

mod backend;
mod error;
mod fragment;
mod ghost;
mod highway;
mod lane;
mod settings;

pub use error::Error;
pub use fragment::Fragment;
pub use highway::Highway;
pub use lane::LaneStats;
pub use settings::{
  BackendKind, DisposalPolicy, HighwaySettings, HighwaySettingsBuilder, LockAwait,
  DEFAULT_LANE_CAPACITY, DEFAULT_MAX_LANES, INDEFINITE_AWAIT,
};
