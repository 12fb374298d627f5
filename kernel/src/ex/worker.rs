//! Executive Work Queues
//!
//! Deferred work is packaged as a `WorkQueueItem` and queued onto one of the
//! three system work queues. Whoever drives the queue (a worker thread in the
//! embedding kernel, or a test) calls [`WorkQueues::process_work_items`].
//!
//! # NT Semantics
//!
//! - **CriticalWorkQueue**: time-critical work
//! - **DelayedWorkQueue**: general work (the object reaper runs here)
//! - **HyperCriticalWorkQueue**: emergency work during low resources
//!
//! An item is on at most one queue at a time. Queueing an item that is
//! already queued is refused; the item may be requeued once its routine has
//! started running.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

/// Work queue types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum WorkQueueType {
    /// Time-critical work, higher priority
    CriticalWorkQueue = 0,
    /// Normal work items
    #[default]
    DelayedWorkQueue = 1,
    /// Emergency work during resource exhaustion
    HyperCriticalWorkQueue = 2,
}

const QUEUE_COUNT: usize = 3;

/// Work routine
pub type WorkerRoutine = Box<dyn Fn() + Send + Sync>;

/// Work queue item (WORK_QUEUE_ITEM)
pub struct WorkQueueItem {
    routine: WorkerRoutine,
    queued: AtomicBool,
}

impl WorkQueueItem {
    pub fn new(routine: WorkerRoutine) -> Arc<Self> {
        Arc::new(Self {
            routine,
            queued: AtomicBool::new(false),
        })
    }

    /// Is the item currently waiting on a queue
    #[inline]
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    fn execute(&self) {
        (self.routine)();
    }
}

struct WorkQueue {
    items: Mutex<VecDeque<Arc<WorkQueueItem>>>,
    processed: AtomicUsize,
}

impl WorkQueue {
    const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            processed: AtomicUsize::new(0),
        }
    }

    fn insert(&self, item: &Arc<WorkQueueItem>) -> bool {
        let mut items = self.items.lock();
        if item.queued.swap(true, Ordering::AcqRel) {
            return false;
        }
        items.push_back(Arc::clone(item));
        true
    }

    fn remove(&self) -> Option<Arc<WorkQueueItem>> {
        let item = self.items.lock().pop_front()?;
        // Cleared before the routine runs so the routine may requeue itself
        item.queued.store(false, Ordering::Release);
        Some(item)
    }
}

/// The system work queues
pub struct WorkQueues {
    queues: [WorkQueue; QUEUE_COUNT],
}

impl WorkQueues {
    pub const fn new() -> Self {
        Self {
            queues: [WorkQueue::new(), WorkQueue::new(), WorkQueue::new()],
        }
    }

    /// ExQueueWorkItem(): returns false if the item is already queued
    pub fn queue_work_item(&self, item: &Arc<WorkQueueItem>, queue_type: WorkQueueType) -> bool {
        let queued = self.queues[queue_type as usize].insert(item);
        if !queued {
            log::trace!("[EX] Work item already queued on {:?}", queue_type);
        }
        queued
    }

    /// Run up to `max_items` pending items from a queue, returning how many ran
    pub fn process_work_items(&self, queue_type: WorkQueueType, max_items: usize) -> usize {
        let queue = &self.queues[queue_type as usize];
        let mut processed = 0;

        while processed < max_items {
            match queue.remove() {
                Some(item) => {
                    item.execute();
                    processed += 1;
                }
                None => break,
            }
        }

        queue.processed.fetch_add(processed, Ordering::Relaxed);
        processed
    }

    /// Number of pending items on a queue
    pub fn depth(&self, queue_type: WorkQueueType) -> usize {
        self.queues[queue_type as usize].items.lock().len()
    }

    /// Total items ever run from a queue
    pub fn processed_count(&self, queue_type: WorkQueueType) -> usize {
        self.queues[queue_type as usize].processed.load(Ordering::Relaxed)
    }
}

impl Default for WorkQueues {
    fn default() -> Self {
        Self::new()
    }
}
