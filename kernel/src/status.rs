//! NT Status Codes
//!
//! Status values surfaced by the object manager. The numeric values are the
//! NT ones so they can be passed through the system-call boundary unchanged.

use core::fmt;

/// NT status code
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NtStatus {
    Success = 0,
    Unsuccessful = -1073741823,          // 0xC0000001
    NotImplemented = -1073741822,        // 0xC0000002
    InvalidInfoClass = -1073741821,      // 0xC0000003
    InfoLengthMismatch = -1073741820,    // 0xC0000004
    AccessViolation = -1073741819,       // 0xC0000005
    InvalidHandle = -1073741816,         // 0xC0000008
    InvalidParameter = -1073741811,      // 0xC000000D
    AccessDenied = -1073741790,          // 0xC0000022
    ObjectNameInvalid = -1073741773,     // 0xC0000033
    ObjectNameCollision = -1073741771,   // 0xC0000035
    PrivilegeNotHeld = -1073741727,      // 0xC0000061
    InvalidSecurityDescr = -1073741703,  // 0xC0000079
    InsufficientResources = -1073741670, // 0xC000009A
    NameTooLong = -1073741562,           // 0xC0000106
    DatatypeMisalignment = -2147483646,  // 0x80000002
}

/// Result type used throughout the object manager
pub type NtResult<T> = Result<T, NtStatus>;

impl NtStatus {
    /// Raw NTSTATUS value
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// NT_SUCCESS(): success and informational codes
    #[inline]
    pub const fn is_success(self) -> bool {
        (self as i32) >= 0
    }

    /// Convert an NtResult into the raw status the syscall layer returns
    pub fn from_result<T>(result: &NtResult<T>) -> NtStatus {
        match result {
            Ok(_) => NtStatus::Success,
            Err(status) => *status,
        }
    }
}

/// NT_SUCCESS() on a raw status value
#[inline]
pub const fn nt_success(status: i32) -> bool {
    status >= 0
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#010x})", self, self.as_i32() as u32)
    }
}
