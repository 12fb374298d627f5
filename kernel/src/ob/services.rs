//! External Collaborators
//!
//! The object manager does not own the handle table, the process structures
//! or the token. It reaches them through `KernelServices`, which the
//! embedding kernel implements.

use crate::ke::ProcessorMode;
use crate::se::Luid;
use crate::status::NtResult;

use super::header::ObjectBody;

/// Handle value (index into the owning process's handle table)
pub type Handle = usize;

/// Access mask
pub type AccessMask = u32;

/// Attributes and access recorded in a handle-table entry
/// (OBJECT_HANDLE_INFORMATION)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleInformation {
    /// OBJ_* bits stored with the handle
    pub handle_attributes: u32,
    pub granted_access: AccessMask,
}

/// OBJECT_HANDLE_ATTRIBUTE_INFORMATION
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleAttributeInformation {
    pub inherit: bool,
    pub protect_from_close: bool,
}

impl HandleAttributeInformation {
    /// Size of the wire form (two BOOLEANs)
    pub const SIZE: usize = 2;

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [inherit, protect] => Some(Self {
                inherit: *inherit != 0,
                protect_from_close: *protect != 0,
            }),
            _ => None,
        }
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        [self.inherit as u8, self.protect_from_close as u8]
    }
}

/// Services the object manager consumes from the rest of the kernel
pub trait KernelServices: Send + Sync {
    /// Resolve a handle in the current process to the object it refers to,
    /// checking `desired_access` against the handle's granted access
    ///
    /// The handle keeps the object alive; the caller takes its own
    /// reference if it needs one beyond the handle's lifetime.
    fn resolve_handle(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        mode: ProcessorMode,
    ) -> NtResult<(ObjectBody, HandleInformation)>;

    /// Read the inherit / protect-from-close bits of a handle
    fn query_handle_attributes(&self, handle: Handle) -> NtResult<HandleAttributeInformation>;

    /// Update the inherit / protect-from-close bits of a handle
    fn set_handle_attributes(
        &self,
        handle: Handle,
        info: HandleAttributeInformation,
        mode: ProcessorMode,
    ) -> NtResult<()>;

    /// Unique id of the current process (0 for the system process)
    fn current_process_id(&self) -> usize;

    /// SeSinglePrivilegeCheck() for the current subject
    fn single_privilege_check(&self, privilege: Luid, mode: ProcessorMode) -> bool;

    /// System time in 100ns units since 1601
    fn query_system_time(&self) -> i64;
}
