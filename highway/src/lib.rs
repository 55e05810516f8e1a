//! Thread-safe, multi-lane ARENA based allocator.
//!
//! A [`Highway`](highway_allocator::Highway) hands out fixed-lifetime byte
//! [`Fragment`](highway_allocator::Fragment)s carved from large pre-reserved
//! lanes. Allocation is bump-pointer, disposal is idempotent, and lanes are
//! backed by one of three storage classes (managed heap, unmanaged process
//! memory, or a memory-mapped file).
//!
//! This crate is a thin facade over `highway-allocator`; it exists so
//! downstream crates depend on a short, stable name while the allocator
//! internals evolve underneath it.

#![deny(missing_docs)]

pub use highway_allocator::*;
