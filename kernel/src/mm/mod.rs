//! Memory Manager (mm)
//!
//! Only the pool allocator is used by the object manager: tagged paged and
//! non-paged allocations with per-tag accounting.

pub mod pool;

pub use pool::{make_tag, pool_tags, PoolAllocator, PoolError, PoolStats, PoolTag, PoolType};
