//! Security Descriptor Capture
//!
//! A security descriptor supplied with object attributes lives in caller
//! memory, and so do the SIDs and ACLs it points at. Capture probes every
//! part (for user-mode callers), validates the revision and the part headers,
//! and copies the descriptor and its parts into kernel-owned storage. The
//! copy is what the object header eventually owns; the caller's buffers are
//! never referenced again.
//!
//! SIDs and ACLs are kept as opaque byte images; interpreting them is the
//! access-check layer's business.

use alloc::boxed::Box;
use core::ffi::c_void;
use core::ptr;

use crate::ex::probe::{probe_and_copy, probe_and_read, probe_for_read};
use crate::ke::ProcessorMode;
use crate::status::{NtResult, NtStatus};

/// Security descriptor revision
pub const SECURITY_DESCRIPTOR_REVISION: u8 = 1;

/// Size of a self-relative descriptor header, the length of an empty one
pub const SECURITY_DESCRIPTOR_MIN_LENGTH: u32 = 20;

/// Most sub-authorities a SID may carry
pub const SID_MAX_SUB_AUTHORITIES: u8 = 15;

/// SID and ACL headers are both eight bytes
const PART_HEADER_SIZE: usize = 8;

/// Security descriptor control flags
pub mod sd_control {
    /// DACL present
    pub const SE_DACL_PRESENT: u16 = 0x0004;
    /// SACL present
    pub const SE_SACL_PRESENT: u16 = 0x0010;
    /// Self-relative format
    pub const SE_SELF_RELATIVE: u16 = 0x8000;
}

/// Security Descriptor as callers hand it in
///
/// Absolute by default. With `SE_SELF_RELATIVE` set, the four part fields
/// hold byte offsets from the start of the descriptor instead of pointers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityDescriptor {
    /// Revision (always 1)
    pub revision: u8,
    pub sbz1: u8,
    /// Control flags
    pub control: u16,
    pub owner: *mut c_void,
    pub group: *mut c_void,
    pub sacl: *mut c_void,
    pub dacl: *mut c_void,
}

// SAFETY: the descriptor is plain data; the parts belong to the caller
unsafe impl Send for SecurityDescriptor {}
unsafe impl Sync for SecurityDescriptor {}

impl SecurityDescriptor {
    /// An empty descriptor (no owner, no ACLs)
    pub const fn new() -> Self {
        Self {
            revision: SECURITY_DESCRIPTOR_REVISION,
            sbz1: 0,
            control: 0,
            owner: ptr::null_mut(),
            group: ptr::null_mut(),
            sacl: ptr::null_mut(),
            dacl: ptr::null_mut(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.revision == SECURITY_DESCRIPTOR_REVISION
    }

    pub fn has_dacl(&self) -> bool {
        (self.control & sd_control::SE_DACL_PRESENT) != 0
    }
}

impl Default for SecurityDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// A security descriptor held in kernel memory, parts included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedSecurityDescriptor {
    pub revision: u8,
    /// Control flags, never `SE_SELF_RELATIVE`
    pub control: u16,
    owner: Option<Box<[u8]>>,
    group: Option<Box<[u8]>>,
    sacl: Option<Box<[u8]>>,
    dacl: Option<Box<[u8]>>,
}

impl CapturedSecurityDescriptor {
    /// An empty descriptor with the given control flags
    pub fn new(control: u16) -> Self {
        Self {
            revision: SECURITY_DESCRIPTOR_REVISION,
            control: control & !sd_control::SE_SELF_RELATIVE,
            owner: None,
            group: None,
            sacl: None,
            dacl: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.revision == SECURITY_DESCRIPTOR_REVISION
    }

    pub fn has_dacl(&self) -> bool {
        (self.control & sd_control::SE_DACL_PRESENT) != 0
    }

    pub fn owner(&self) -> Option<&[u8]> {
        self.owner.as_deref()
    }

    pub fn group(&self) -> Option<&[u8]> {
        self.group.as_deref()
    }

    pub fn sacl(&self) -> Option<&[u8]> {
        self.sacl.as_deref()
    }

    /// None for a descriptor without a DACL and for a NULL DACL
    pub fn dacl(&self) -> Option<&[u8]> {
        self.dacl.as_deref()
    }

    /// Self-relative length, as reported by ObjectBasicInformation
    pub fn length(&self) -> u32 {
        let parts: usize = [&self.owner, &self.group, &self.sacl, &self.dacl]
            .iter()
            .filter_map(|part| part.as_deref())
            .map(<[u8]>::len)
            .sum();
        SECURITY_DESCRIPTOR_MIN_LENGTH + parts as u32
    }
}

/// Byte length of a SID from its header (8 + 4 per sub-authority)
fn sid_length(head: &[u8; PART_HEADER_SIZE]) -> NtResult<usize> {
    let sub_authorities = head[1];
    if sub_authorities > SID_MAX_SUB_AUTHORITIES {
        log::warn!("[SE] SID with {} sub-authorities rejected", sub_authorities);
        return Err(NtStatus::InvalidSecurityDescr);
    }
    Ok(PART_HEADER_SIZE + 4 * sub_authorities as usize)
}

/// Byte length of an ACL from its header (AclSize)
fn acl_length(head: &[u8; PART_HEADER_SIZE]) -> NtResult<usize> {
    let size = u16::from_le_bytes([head[2], head[3]]) as usize;
    if size < PART_HEADER_SIZE {
        log::warn!("[SE] ACL size {} rejected", size);
        return Err(NtStatus::InvalidSecurityDescr);
    }
    Ok(size)
}

/// Copy one SID or ACL out of caller memory
///
/// The header is read first to learn the length, then the whole part is
/// probed and copied.
unsafe fn capture_part(
    address: *const u8,
    mode: ProcessorMode,
    length_of: fn(&[u8; PART_HEADER_SIZE]) -> NtResult<usize>,
) -> NtResult<Option<Box<[u8]>>> {
    if address.is_null() {
        return Ok(None);
    }
    if mode == ProcessorMode::UserMode {
        probe_for_read(address as usize, PART_HEADER_SIZE, 4)?;
    }
    let head = ptr::read_unaligned(address as *const [u8; PART_HEADER_SIZE]);
    let length = length_of(&head)?;

    if mode == ProcessorMode::UserMode {
        probe_for_read(address as usize, length, 4)?;
    }
    let mut copy = alloc::vec![0u8; length].into_boxed_slice();
    probe_and_copy(address, length, mode, copy.as_mut_ptr())?;
    Ok(Some(copy))
}

/// SeCaptureSecurityDescriptor(): copy a caller's descriptor and every SID
/// and ACL it references into kernel memory
///
/// # Safety
/// For kernel-mode callers `source` and the parts it references must be
/// readable.
pub unsafe fn se_capture_security_descriptor(
    source: *const SecurityDescriptor,
    mode: ProcessorMode,
) -> NtResult<Box<CapturedSecurityDescriptor>> {
    let local = probe_and_read(source, mode)?;

    if !local.is_valid() {
        log::warn!("[SE] Rejecting security descriptor with revision {}", local.revision);
        return Err(NtStatus::InvalidSecurityDescr);
    }

    let self_relative = local.control & sd_control::SE_SELF_RELATIVE != 0;
    let locate = |field: *mut c_void| -> *const u8 {
        if field.is_null() {
            ptr::null()
        } else if self_relative {
            (source as *const u8).wrapping_add(field as usize)
        } else {
            field as *const u8
        }
    };

    let mut captured = CapturedSecurityDescriptor::new(local.control);
    captured.owner = capture_part(locate(local.owner), mode, sid_length)?;
    captured.group = capture_part(locate(local.group), mode, sid_length)?;
    if local.control & sd_control::SE_SACL_PRESENT != 0 {
        captured.sacl = capture_part(locate(local.sacl), mode, acl_length)?;
    }
    if local.has_dacl() {
        captured.dacl = capture_part(locate(local.dacl), mode, acl_length)?;
    }

    log::trace!(
        "[SE] Captured descriptor (control {:#06x}, {} bytes)",
        captured.control,
        captured.length()
    );
    Ok(Box::new(captured))
}

/// SeReleaseSecurityDescriptor()
pub fn se_release_security_descriptor(descriptor: Box<CapturedSecurityDescriptor>) {
    log::trace!("[SE] Released captured descriptor (control {:#06x})", descriptor.control);
    drop(descriptor);
}
