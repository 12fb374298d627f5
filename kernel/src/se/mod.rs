//! Security Reference Monitor (se)
//!
//! The parts of the security subsystem the object manager depends on:
//!
//! - **Security Descriptors**: capture from caller memory, release
//! - **Default Object Method**: the security procedure installed on types
//!   that do not supply their own
//! - **Privileges**: LUIDs and the single-privilege check
//! - **Quality of Service**: impersonation parameters carried with object
//!   attributes

pub mod descriptor;
pub mod method;
pub mod privilege;

pub use descriptor::{
    se_capture_security_descriptor, se_release_security_descriptor, CapturedSecurityDescriptor,
    SecurityDescriptor, SECURITY_DESCRIPTOR_REVISION,
};
pub use method::{se_default_object_method, SecurityOperation};
pub use privilege::{se_single_privilege_check, Luid, LuidAndAttributes, SE_CREATE_PERMANENT_PRIVILEGE};

/// Impersonation levels
pub mod impersonation_level {
    pub const SECURITY_ANONYMOUS: u32 = 0;
    pub const SECURITY_IDENTIFICATION: u32 = 1;
    pub const SECURITY_IMPERSONATION: u32 = 2;
    pub const SECURITY_DELEGATION: u32 = 3;
}

/// SECURITY_QUALITY_OF_SERVICE
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityQualityOfService {
    pub length: u32,
    pub impersonation_level: u32,
    /// Dynamic (1) or static (0) context tracking
    pub context_tracking_mode: u8,
    pub effective_only: u8,
}
