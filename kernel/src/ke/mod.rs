//! Kernel Executive (ke)
//!
//! The slice of the kernel executive the object manager depends on:
//!
//! - **Processor mode**: the trust level a request originated from
//! - **Dispatcher events**: the default wait object shared by waitable types
//! - **Intrusive lists**: LIST_ENTRY-style linkage for per-type object lists

pub mod event;
pub mod list;

pub use event::{DispatcherType, EventType, KEvent};
pub use list::ListEntry;

/// Processor mode a request originated from (KPROCESSOR_MODE)
///
/// User-mode requests are untrusted: every pointer they supply is probed
/// before it is dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProcessorMode {
    #[default]
    KernelMode = 0,
    UserMode = 1,
}

impl ProcessorMode {
    #[inline]
    pub fn is_kernel(self) -> bool {
        self == ProcessorMode::KernelMode
    }
}
