//! Caching primitives shared by the render and compiled caches

mod lru;
mod single_flight;

pub use lru::{CacheEntry, CacheKey, CacheLimits, CacheStats, LruCache};
pub use single_flight::SingleFlight;
