//! Kernel Event Implementation (KEVENT)
//!
//! The object manager only needs events as passive wait targets: a type
//! declared with `use_default_object` has no synchronization primitive of its
//! own and is waited on through a single shared event, and file objects
//! expose an event embedded in their body. Waiting itself belongs to the
//! dispatcher and is not modelled here; the signal state is.

use core::sync::atomic::{AtomicI32, Ordering};

/// Dispatcher object type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherType {
    Event = 0,
    Mutant = 1,
    Semaphore = 2,
    Timer = 3,
}

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    /// Manual reset
    Notification = 0,
    /// Auto reset
    Synchronization = 1,
}

/// Kernel Event
///
/// Equivalent to NT's KEVENT
#[repr(C)]
pub struct KEvent {
    /// Dispatcher object type (always Event)
    pub object_type: DispatcherType,
    event_type: EventType,
    /// 0 = not signaled, 1 = signaled
    signal_state: AtomicI32,
}

impl KEvent {
    /// Create a non-signaled notification event
    pub const fn new() -> Self {
        Self {
            object_type: DispatcherType::Event,
            event_type: EventType::Notification,
            signal_state: AtomicI32::new(0),
        }
    }

    /// Create an event with an explicit type and initial state
    pub const fn with_state(event_type: EventType, signaled: bool) -> Self {
        Self {
            object_type: DispatcherType::Event,
            event_type,
            signal_state: AtomicI32::new(signaled as i32),
        }
    }

    #[inline]
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signal_state.load(Ordering::Acquire) > 0
    }

    /// Signal the event, returning the previous state
    pub fn set(&self) -> bool {
        self.signal_state.swap(1, Ordering::AcqRel) > 0
    }

    /// Reset the event, returning the previous state
    pub fn reset(&self) -> bool {
        self.signal_state.swap(0, Ordering::AcqRel) > 0
    }
}

impl Default for KEvent {
    fn default() -> Self {
        Self::new()
    }
}
