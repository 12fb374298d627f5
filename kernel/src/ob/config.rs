//! Object Manager Configuration
//!
//! Boot-time knobs. `GlobalFlags` mirrors the NtGlobalFlag bits the object
//! manager honours.

use bitflags::bitflags;

use crate::ex::worker::WorkQueueType;

bitflags! {
    /// NtGlobalFlag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GlobalFlags: u32 {
        /// FLG_MAINTAIN_OBJECT_TYPELIST: every type keeps a list of its instances
        const MAINTAIN_OBJECT_TYPELIST = 0x0000_4000;
    }
}

/// Default quota charge for a captured security descriptor
pub const DEFAULT_SECURITY_DESCRIPTOR_CHARGE: u32 = 2048;

/// Object manager configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObConfig {
    pub global_flags: GlobalFlags,
    /// Charge recorded for each captured security descriptor
    pub security_descriptor_charge: u32,
    /// Work queue the reaper runs on
    pub reaper_queue: WorkQueueType,
    /// Create `\` and `\ObjectTypes` during initialization
    pub create_type_directory: bool,
}

impl ObConfig {
    pub const fn new() -> Self {
        Self {
            global_flags: GlobalFlags::empty(),
            security_descriptor_charge: DEFAULT_SECURITY_DESCRIPTOR_CHARGE,
            reaper_queue: WorkQueueType::DelayedWorkQueue,
            create_type_directory: true,
        }
    }

    pub const fn with_global_flags(mut self, flags: GlobalFlags) -> Self {
        self.global_flags = flags;
        self
    }

    pub const fn without_type_directory(mut self) -> Self {
        self.create_type_directory = false;
        self
    }

    #[inline]
    pub fn maintain_type_lists(&self) -> bool {
        self.global_flags.contains(GlobalFlags::MAINTAIN_OBJECT_TYPELIST)
    }
}

impl Default for ObConfig {
    fn default() -> Self {
        Self::new()
    }
}
