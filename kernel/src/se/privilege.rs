//! Privileges
//!
//! Privileges are identified by LUID. The object manager only asks one
//! question of the security subsystem here: does the caller hold a given
//! privilege (SeCreatePermanentPrivilege for permanent objects).

/// Locally Unique Identifier
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Luid {
    pub low_part: u32,
    pub high_part: i32,
}

impl Luid {
    pub const fn new(low: u32, high: i32) -> Self {
        Self {
            low_part: low,
            high_part: high,
        }
    }

    pub const fn from_u32(value: u32) -> Self {
        Self {
            low_part: value,
            high_part: 0,
        }
    }
}

/// Privilege attribute flags
pub mod privilege_attributes {
    /// Privilege is enabled by default
    pub const SE_PRIVILEGE_ENABLED_BY_DEFAULT: u32 = 0x00000001;
    /// Privilege is enabled
    pub const SE_PRIVILEGE_ENABLED: u32 = 0x00000002;
}

/// Privilege with its current state
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LuidAndAttributes {
    pub luid: Luid,
    pub attributes: u32,
}

impl LuidAndAttributes {
    pub const fn enabled(luid: Luid) -> Self {
        Self {
            luid,
            attributes: privilege_attributes::SE_PRIVILEGE_ENABLED,
        }
    }

    pub fn is_enabled(&self) -> bool {
        (self.attributes & privilege_attributes::SE_PRIVILEGE_ENABLED) != 0
    }
}

/// Privilege indices (used as LUID low_part)
pub mod privilege_values {
    pub const SE_TCB_PRIVILEGE: u32 = 7;
    pub const SE_SECURITY_PRIVILEGE: u32 = 8;
    pub const SE_CREATE_PERMANENT_PRIVILEGE: u32 = 16;
    pub const SE_DEBUG_PRIVILEGE: u32 = 20;
}

pub const SE_CREATE_PERMANENT_PRIVILEGE: Luid =
    Luid::from_u32(privilege_values::SE_CREATE_PERMANENT_PRIVILEGE);
pub const SE_TCB_PRIVILEGE: Luid = Luid::from_u32(privilege_values::SE_TCB_PRIVILEGE);

/// SeSinglePrivilegeCheck() against an explicit privilege set
pub fn se_single_privilege_check(luid: Luid, privileges: &[LuidAndAttributes]) -> bool {
    privileges.iter().any(|p| p.luid == luid && p.is_enabled())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_privilege_check() {
        let held = [
            LuidAndAttributes::enabled(SE_TCB_PRIVILEGE),
            LuidAndAttributes {
                luid: SE_CREATE_PERMANENT_PRIVILEGE,
                attributes: privilege_attributes::SE_PRIVILEGE_ENABLED_BY_DEFAULT,
            },
        ];
        assert!(se_single_privilege_check(SE_TCB_PRIVILEGE, &held));
        // Present but not enabled
        assert!(!se_single_privilege_check(SE_CREATE_PERMANENT_PRIVILEGE, &held));
        assert!(!se_single_privilege_check(Luid::from_u32(99), &[]));
    }
}
