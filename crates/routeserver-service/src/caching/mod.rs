//! # In-memory caching of routing data
//!
//! Transport networks, egress tables and opportunity grids are huge and slow to build, so only a
//! handful of each are kept in memory. All of them go through a [`KeyedLoadingCache`], which
//!
//! - deduplicates concurrent loads of the same key, so that every key is loaded by at most one
//!   loader at a time and all callers share its result,
//! - never makes a caller wait for the load of a different key,
//! - evicts the least recently used entry once the configured capacity is exceeded.
//!
//! Failed loads are handed to every waiting caller, but are not remembered.
//!
//! ### Metrics
//!
//! All metrics are tagged with a `cache` field naming the cache:
//!
//! - `caches.access`: All accesses.
//! - `caches.memory.hit`: Accesses served from memory.
//! - `caches.channel.hit`: Accesses that joined a load already in progress.
//! - `caches.load`: Loads actually run, tagged with their `status`.
//! - `caches.evicted`: Entries evicted to stay within capacity.

mod cache_error;
mod keyed;

pub use cache_error::{CacheEntry, CacheError, CapacityError};
pub use keyed::KeyedLoadingCache;
