//! Executive (ex)
//!
//! Executive support services used by the object manager:
//!
//! - **Probing**: validation of caller-supplied pointers (ProbeForRead)
//! - **Pool Tags**: per-tag allocation accounting for leak attribution
//! - **Worker Queues**: deferred work execution (the object reaper)

pub mod pooltag;
pub mod probe;
pub mod worker;

pub use pooltag::{str_to_pool_tag, PoolTagSnapshot, PoolTagStats, PoolTagTable};
pub use probe::{probe_and_copy, probe_and_read, probe_for_read, ProbeException};
pub use worker::{WorkQueueItem, WorkQueueType, WorkQueues};
