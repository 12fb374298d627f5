//! Object Attribute Capture
//!
//! OBJECT_ATTRIBUTES arrive from the caller's address space. Before the
//! object manager acts on them, everything they reference is copied into
//! kernel-owned storage:
//!
//! - the structure itself (probed, then read once)
//! - the security descriptor (deep copy, charged)
//! - the security quality of service (by value)
//! - the object name (pool buffer, tag `ObNm`, null-terminated)
//!
//! The copies live in an `ObjectCreateInformation` until the object consumes
//! them. Every failure path releases whatever was already captured.

use alloc::boxed::Box;
use bitflags::bitflags;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use super::manager::ObjectManager;
use super::services::Handle;
use crate::ex::probe::{probe_and_read, probe_for_read};
use crate::ke::ProcessorMode;
use crate::mm::pool::{pool_tags, PoolType};
use crate::rtl::string::WCHAR_SIZE;
use crate::rtl::UnicodeString;
use crate::se::{se_capture_security_descriptor, se_release_security_descriptor};
use crate::se::{CapturedSecurityDescriptor, SecurityDescriptor, SecurityQualityOfService};
use crate::status::{NtResult, NtStatus};

bitflags! {
    /// OBJ_* attribute bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectAttributeFlags: u32 {
        const INHERIT = 0x0000_0002;
        const PERMANENT = 0x0000_0010;
        const EXCLUSIVE = 0x0000_0020;
        const CASE_INSENSITIVE = 0x0000_0040;
        const OPENIF = 0x0000_0080;
        const OPENLINK = 0x0000_0100;
        const KERNEL_HANDLE = 0x0000_0200;
        const FORCE_ACCESS_CHECK = 0x0000_0400;
    }
}

/// Every attribute bit a caller may pass
pub const OBJ_VALID_ATTRIBUTES: u32 = ObjectAttributeFlags::all().bits();

/// OBJECT_ATTRIBUTES
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ObjectAttributes {
    /// Must be `size_of::<ObjectAttributes>()`
    pub length: u32,
    pub root_directory: Handle,
    pub object_name: *const UnicodeString,
    pub attributes: u32,
    pub security_descriptor: *const SecurityDescriptor,
    pub security_quality_of_service: *const SecurityQualityOfService,
}

impl ObjectAttributes {
    /// InitializeObjectAttributes()
    pub fn new(
        name: Option<&UnicodeString>,
        attributes: ObjectAttributeFlags,
        root_directory: Handle,
        security_descriptor: Option<&SecurityDescriptor>,
    ) -> Self {
        Self {
            length: size_of::<Self>() as u32,
            root_directory,
            object_name: name.map_or(ptr::null(), |n| n as *const _),
            attributes: attributes.bits(),
            security_descriptor: security_descriptor.map_or(ptr::null(), |sd| sd as *const _),
            security_quality_of_service: ptr::null(),
        }
    }

    pub fn with_quality_of_service(mut self, qos: &SecurityQualityOfService) -> Self {
        self.security_quality_of_service = qos;
        self
    }
}

/// Captured creation attributes (OBJECT_CREATE_INFORMATION)
#[derive(Debug, Default)]
pub struct ObjectCreateInformation {
    pub attributes: ObjectAttributeFlags,
    pub root_directory: Handle,
    /// Mode the security descriptor was captured from
    pub probe_mode: ProcessorMode,
    pub paged_pool_charge: u32,
    pub non_paged_pool_charge: u32,
    pub security_descriptor_charge: u32,
    pub security_descriptor: Option<Box<CapturedSecurityDescriptor>>,
    pub security_qos: Option<SecurityQualityOfService>,
}

impl ObjectManager {
    /// Capture a counted name into a pool buffer
    ///
    /// A zero-length name captures as an empty string with no buffer.
    ///
    /// # Safety
    /// For kernel-mode callers `source` and its buffer must be readable.
    pub unsafe fn capture_object_name(
        &self,
        source: *const UnicodeString,
        mode: ProcessorMode,
    ) -> NtResult<UnicodeString> {
        let local = probe_and_read(source, mode)?;
        let length = local.length as usize;

        if length == 0 {
            return Ok(UnicodeString::empty());
        }

        if mode == ProcessorMode::UserMode {
            probe_for_read(local.buffer as usize, length, WCHAR_SIZE)?;
        } else if local.buffer.is_null() {
            return Err(NtStatus::AccessViolation);
        }

        // Odd lengths and lengths that cannot take a terminator
        if (length & (WCHAR_SIZE - 1)) != 0 || length == (u16::MAX as usize - WCHAR_SIZE + 1) {
            log::warn!("[OB] Rejecting object name with byte length {:#x}", length);
            return Err(NtStatus::ObjectNameInvalid);
        }

        let block = self
            .pool
            .allocate(PoolType::NonPagedPool, length + WCHAR_SIZE, pool_tags::TAG_OBJECT_NAME)
            .map_err(NtStatus::from)?;

        let buffer = block.as_ptr() as *mut u16;
        ptr::copy_nonoverlapping(local.buffer as *const u8, block.as_ptr(), length);
        *buffer.add(length / WCHAR_SIZE) = 0;

        Ok(UnicodeString::from_raw_parts(
            buffer,
            length as u16,
            (length + WCHAR_SIZE) as u16,
        ))
    }

    /// Capture a kernel-supplied name (type and directory names)
    pub(crate) fn capture_kernel_name(&self, name: &str) -> NtResult<UnicodeString> {
        let chars: alloc::vec::Vec<u16> = name.encode_utf16().collect();
        let source = UnicodeString::from_slice(&chars);
        // SAFETY: kernel-mode source backed by `chars`
        unsafe { self.capture_object_name(&source, ProcessorMode::KernelMode) }
    }

    /// Free a name captured by `capture_object_name`; the string is left empty
    pub fn release_captured_name(&self, name: &mut UnicodeString) {
        if let Some(buffer) = NonNull::new(name.buffer as *mut u8) {
            // SAFETY: captured names are pool blocks tagged ObNm
            if let Err(e) = unsafe { self.pool.free_with_tag(buffer, pool_tags::TAG_OBJECT_NAME) } {
                log::error!("[OB] Failed to free captured name: {:?}", e);
            }
        }
        *name = UnicodeString::empty();
    }

    /// ObpCaptureObjectAttributes()
    ///
    /// Fills `create_info` and returns the captured name. A null
    /// `attributes` captures nothing. On failure nothing stays captured.
    ///
    /// # Safety
    /// For kernel-mode callers every pointer reachable from `attributes`
    /// must be readable.
    pub unsafe fn capture_object_attributes(
        &self,
        attributes: *const ObjectAttributes,
        mode: ProcessorMode,
        create_info: &mut ObjectCreateInformation,
    ) -> NtResult<UnicodeString> {
        *create_info = ObjectCreateInformation::default();

        if attributes.is_null() {
            return Ok(UnicodeString::empty());
        }

        let result = self.capture_attributes_inner(attributes, mode, create_info);
        if result.is_err() {
            self.release_captured_attributes(create_info);
        }
        result
    }

    unsafe fn capture_attributes_inner(
        &self,
        attributes: *const ObjectAttributes,
        mode: ProcessorMode,
        create_info: &mut ObjectCreateInformation,
    ) -> NtResult<UnicodeString> {
        let local = probe_and_read(attributes, mode)?;

        if local.length as usize != size_of::<ObjectAttributes>() {
            log::warn!("[OB] OBJECT_ATTRIBUTES length {} rejected", local.length);
            return Err(NtStatus::InvalidParameter);
        }
        let flags = ObjectAttributeFlags::from_bits(local.attributes).ok_or_else(|| {
            log::warn!("[OB] Invalid object attributes {:#x}", local.attributes);
            NtStatus::InvalidParameter
        })?;

        create_info.root_directory = local.root_directory;
        create_info.attributes = flags;

        if !local.security_descriptor.is_null() {
            let descriptor = se_capture_security_descriptor(local.security_descriptor, mode)?;
            create_info.security_descriptor = Some(descriptor);
            create_info.security_descriptor_charge = self.config.security_descriptor_charge;
            create_info.probe_mode = mode;
        }

        if !local.security_quality_of_service.is_null() {
            create_info.security_qos = Some(probe_and_read(local.security_quality_of_service, mode)?);
        }

        if !local.object_name.is_null() {
            self.capture_object_name(local.object_name, mode)
        } else if local.root_directory != 0 {
            Err(NtStatus::ObjectNameInvalid)
        } else {
            Ok(UnicodeString::empty())
        }
    }

    /// ObpReleaseCapturedAttributes(); safe to call repeatedly
    pub fn release_captured_attributes(&self, create_info: &mut ObjectCreateInformation) {
        if let Some(descriptor) = create_info.security_descriptor.take() {
            se_release_security_descriptor(descriptor);
        }
    }

    /// Allocate an empty create-information record (tag `ObCI`)
    pub(crate) fn allocate_create_information(&self) -> NtResult<NonNull<ObjectCreateInformation>> {
        self.pool
            .allocate_typed(
                PoolType::NonPagedPool,
                pool_tags::TAG_CREATE_INFO,
                ObjectCreateInformation::default(),
            )
            .map_err(NtStatus::from)
    }

    /// Release captured attributes and free the record
    ///
    /// # Safety
    /// `create_info` must come from `allocate_create_information` and not be
    /// used afterwards.
    pub(crate) unsafe fn free_create_information(&self, create_info: NonNull<ObjectCreateInformation>) {
        self.release_captured_attributes(&mut *create_info.as_ptr());
        if let Err(e) = self.pool.free_typed(create_info, pool_tags::TAG_CREATE_INFO) {
            log::error!("[OB] Failed to free create information: {:?}", e);
        }
    }
}
