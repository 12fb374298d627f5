//! Object Lifecycle
//!
//! Creation and destruction of object storage:
//!
//! - `create_object` captures the caller's attributes, validates them
//!   against the type and allocates header + body
//! - `allocate_object` composes the prefix blocks and header in one pool
//!   block tagged with the type's key
//! - `delete_object` runs the type's teardown (reached only from the reaper)
//! - `deallocate_object` frees everything the header owns, then the block
//!
//! A new object starts with pointer count 1 and handle count 0. Its create
//! information stays attached (CREATE_INFO) until consumed or freed.

use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;

use super::attributes::{ObjectAttributeFlags, ObjectAttributes, ObjectCreateInformation};
use super::header::{locate_allocation_base, ObjectBody, ObjectHeader, ObjectHeaderFlags, ObjectHeaderLayout};
use super::manager::ObjectManager;
use super::object_type::{ObjectType, TypeRef};
use crate::ke::ProcessorMode;
use crate::mm::pool::{pool_tags, PoolType};
use crate::rtl::UnicodeString;
use crate::se::{SecurityOperation, SE_CREATE_PERMANENT_PRIVILEGE};
use crate::status::{NtResult, NtStatus};

impl ObjectManager {
    /// ObpAllocateObject()
    ///
    /// On success the header owns `name` and `create_info`. On failure the
    /// caller still owns both.
    ///
    /// # Safety
    /// `create_info`, if present, must come from `allocate_create_information`.
    pub(crate) unsafe fn allocate_object(
        &self,
        create_info: Option<NonNull<ObjectCreateInformation>>,
        name: UnicodeString,
        object_type: Option<&ObjectType>,
        body_size: usize,
        owner_mode: ProcessorMode,
    ) -> NtResult<NonNull<ObjectHeader>> {
        let (pool_type, tag, maintain_handle_count, maintain_type_list) = match object_type {
            Some(t) => (
                t.pool_type(),
                t.key(),
                t.type_info().maintain_handle_count,
                t.type_info().maintain_type_list,
            ),
            None => (PoolType::NonPagedPool, pool_tags::TAG_OBJECT_TYPE, false, false),
        };

        let layout = ObjectHeaderLayout::new(maintain_handle_count, name.has_buffer(), maintain_type_list, body_size);
        let size = layout.total_size().ok_or(NtStatus::InsufficientResources)?;

        let base = self.pool.allocate(pool_type, size, tag).map_err(|e| {
            log::warn!("[OB] Object allocation of {} bytes failed: {:?}", size, e);
            NtStatus::from(e)
        })?;

        let mut flags = ObjectHeaderFlags::empty();
        let mut paged_charge = 0;
        let mut non_paged_charge = 0;
        if let Some(info) = create_info {
            let info = info.as_ref();
            flags |= ObjectHeaderFlags::CREATE_INFO;
            if info.attributes.contains(ObjectAttributeFlags::PERMANENT) {
                flags |= ObjectHeaderFlags::PERMANENT;
            }
            if info.attributes.contains(ObjectAttributeFlags::EXCLUSIVE) {
                flags |= ObjectHeaderFlags::EXCLUSIVE;
            }
            paged_charge = info.paged_pool_charge;
            non_paged_charge = info.non_paged_pool_charge;
        }
        if owner_mode.is_kernel() {
            flags |= ObjectHeaderFlags::KERNEL_MODE;
        }

        let creator_process = if maintain_type_list {
            self.services.current_process_id()
        } else {
            0
        };

        let type_ptr = object_type.map_or(ptr::null(), |t| t as *const ObjectType);
        let header = layout.initialize(base, type_ptr, name, creator_process, flags);
        let header_mut = &mut *header.as_ptr();

        if let Some(info) = create_info {
            header_mut.object_create_info.store(info.as_ptr(), Ordering::Release);
        }

        if let Some(t) = object_type {
            if paged_charge == 0 {
                paged_charge = t.type_info().default_paged_pool_charge;
            }
            if non_paged_charge == 0 {
                non_paged_charge = t.type_info().default_non_paged_pool_charge;
            }
            t.insert_instance(header_mut);
        }
        header_mut.paged_pool_charge = paged_charge;
        header_mut.non_paged_pool_charge = non_paged_charge;

        log::trace!("[OB] Allocated object {:p} ({} bytes)", header_mut.body().as_ptr(), size);
        Ok(header)
    }

    /// ObpFreeObject()
    ///
    /// # Safety
    /// `header` must be an allocated object nobody references any more.
    pub(crate) unsafe fn deallocate_object(&self, header: NonNull<ObjectHeader>) {
        let header_ref = header.as_ref();
        let base = locate_allocation_base(header_ref.body());

        if header_ref.has_flag(ObjectHeaderFlags::CREATE_INFO) {
            if let Some(info) = NonNull::new(header_ref.object_create_info.swap(ptr::null_mut(), Ordering::AcqRel)) {
                self.free_create_information(info);
            }
        }

        if let Some(handle_info) = header_ref.handle_info() {
            if let Some(database) = (*handle_info.as_ptr()).state.lock().database.take() {
                if let Err(e) = self.pool.free_typed(database, pool_tags::TAG_HANDLE_DB) {
                    log::error!("[OB] Failed to free handle count database: {:?}", e);
                }
            }
        }

        if let Some(name_info) = header_ref.name_info() {
            self.release_captured_name(&mut (*name_info.as_ptr()).name);
        }

        let tag = match header_ref.object_type() {
            Some(object_type) => {
                object_type.remove_instance(header_ref);
                object_type.key()
            }
            None => pool_tags::TAG_OBJECT_TYPE,
        };

        ptr::drop_in_place(header.as_ptr());
        if let Err(e) = self.pool.free_with_tag(base, tag) {
            log::error!("[OB] Failed to free object block {:p}: {:?}", base.as_ptr(), e);
        }
    }

    /// ObCreateObject()
    ///
    /// Returns the new body with pointer count 1. `body_size` bytes are
    /// zeroed; initializing them is the caller's job.
    ///
    /// # Safety
    /// For kernel-mode `attributes_mode` every pointer reachable from
    /// `attributes` must be readable.
    pub unsafe fn create_object(
        &self,
        attributes_mode: ProcessorMode,
        object_type: TypeRef,
        attributes: *const ObjectAttributes,
        owner_mode: ProcessorMode,
        body_size: usize,
        paged_pool_charge: u32,
        non_paged_pool_charge: u32,
    ) -> NtResult<ObjectBody> {
        let create_info = self.allocate_create_information()?;

        let mut name = match self.capture_object_attributes(attributes, attributes_mode, &mut *create_info.as_ptr()) {
            Ok(name) => name,
            Err(status) => {
                self.free_create_information(create_info);
                return Err(status);
            }
        };

        let info = &mut *create_info.as_ptr();
        if info.attributes.intersects(object_type.type_info().invalid_attributes) {
            log::warn!(
                "[OB] Attributes {:?} not allowed for type {}",
                info.attributes,
                object_type.name()
            );
            self.release_captured_name(&mut name);
            self.free_create_information(create_info);
            return Err(NtStatus::InvalidParameter);
        }

        info.paged_pool_charge = paged_pool_charge;
        info.non_paged_pool_charge = non_paged_pool_charge;
        let permanent = info.attributes.contains(ObjectAttributeFlags::PERMANENT);

        let header = match self.allocate_object(Some(create_info), name, Some(&object_type), body_size, owner_mode) {
            Ok(header) => header,
            Err(status) => {
                self.release_captured_name(&mut name);
                self.free_create_information(create_info);
                return Err(status);
            }
        };

        if permanent && !self.services.single_privilege_check(SE_CREATE_PERMANENT_PRIVILEGE, attributes_mode) {
            log::warn!("[OB] Permanent {} object refused: privilege not held", object_type.name());
            self.deallocate_object(header);
            return Err(NtStatus::PrivilegeNotHeld);
        }

        self.objects_created.fetch_add(1, Ordering::Relaxed);
        Ok(header.as_ref().body())
    }

    /// ObpDeleteObject(): final teardown of an object claimed by the reaper
    ///
    /// # Safety
    /// `header` must have been claimed for deletion (DEFER_DELETE) and have
    /// no remaining references.
    pub(crate) unsafe fn delete_object(&self, header: NonNull<ObjectHeader>) {
        let header_ref = header.as_ref();
        let body = header_ref.body();
        let object_type = header_ref.object_type();

        if let Some(t) = object_type {
            t.unlink_instance(header_ref);
        }

        self.delete_directory_entry(body);
        if let Some(name_info) = header_ref.name_info() {
            self.release_captured_name(&mut (*name_info.as_ptr()).name);
        }

        if let Some(t) = object_type {
            let mut descriptor = header_ref.security_descriptor.lock();
            if descriptor.is_some() {
                if let Some(security) = &t.type_info().security_procedure {
                    if let Err(status) = security(body, SecurityOperation::DeleteSecurityDescriptor, &mut *descriptor) {
                        log::error!("[OB] Security delete failed for {:p}: {}", body.as_ptr(), status);
                    }
                }
            }
            drop(descriptor);

            if let Some(delete) = &t.type_info().delete_procedure {
                delete(body);
            }
        }

        self.deallocate_object(header);
        self.objects_deleted.fetch_add(1, Ordering::Relaxed);
    }
}
