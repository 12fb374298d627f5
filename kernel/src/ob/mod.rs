//! Object Manager (ob)
//!
//! The object manager provides a unified object model for kernel resources:
//!
//! - **Object Types**: type objects describing pool, access and callbacks
//! - **Namespace**: `\` and `\ObjectTypes`, hashed directories
//! - **Capture**: object attributes, names and security from caller memory
//! - **Reference Counting**: pointer and handle counts, deferred deletion
//! - **Query / Set**: NtQueryObject and NtSetInformationObject
//!
//! # Object Structure
//!
//! Every kernel object has:
//! - Optional Handle / Name / Creator Info blocks
//! - OBJECT_HEADER: type, counts, flags, security
//! - Object Body: type-specific data
//!
//! Handle tables, processes and tokens live outside this module and are
//! reached through `KernelServices`.

pub mod attributes;
pub mod config;
pub mod directory;
pub mod header;
pub mod info;
pub mod lifecycle;
pub mod manager;
pub mod object_type;
pub mod reference;
pub mod services;
pub mod symlink;

#[cfg(test)]
pub(crate) mod testing;

use alloc::sync::Arc;

pub use attributes::{ObjectAttributeFlags, ObjectAttributes, ObjectCreateInformation, OBJ_VALID_ATTRIBUTES};
pub use config::{GlobalFlags, ObConfig};
pub use directory::{ObjectDirectory, DIRECTORY_ALL_ACCESS, NUMBER_HASH_BUCKETS};
pub use header::{ObjectBody, ObjectHeader, ObjectHeaderFlags, ObjectHeaderLayout};
pub use info::{ObjectBasicInformation, ObjectInformationClass, ObjectTypeInformation};
pub use manager::{ObStats, ObjectManager, OBJECT_TYPE_ALL_ACCESS};
pub use object_type::{
    DefaultObject, ObjectType, ObjectTypeInitializer, ObjectTypeSnapshot, ObjectTypeStats, OpenReason,
    TypeRef,
};
pub use services::{AccessMask, Handle, HandleAttributeInformation, HandleInformation, KernelServices};
pub use symlink::{symlink_access, ObjectSymbolicLink};

use crate::ke::ProcessorMode;
use crate::status::{NtResult, NtStatus};

static OBJECT_MANAGER: spin::Once<Arc<ObjectManager>> = spin::Once::new();

/// Initialize the system object manager with the default configuration
pub fn init(services: Arc<dyn KernelServices>) -> NtResult<()> {
    init_with_config(ObConfig::new(), services)
}

/// Initialize the system object manager
///
/// Only the first call builds a manager; later calls succeed without
/// effect.
pub fn init_with_config(config: ObConfig, services: Arc<dyn KernelServices>) -> NtResult<()> {
    if OBJECT_MANAGER.is_completed() {
        log::warn!("[OB] Object manager already initialized");
        return Ok(());
    }

    log::info!("[OB] Initializing Object Manager...");
    let manager = ObjectManager::new(config, services)?;
    OBJECT_MANAGER.call_once(|| manager);
    log::info!("[OB] Object Manager initialized");
    Ok(())
}

/// The system object manager, once initialized
pub fn object_manager() -> Option<&'static Arc<ObjectManager>> {
    OBJECT_MANAGER.get()
}

fn system() -> NtResult<&'static Arc<ObjectManager>> {
    object_manager().ok_or(NtStatus::Unsuccessful)
}

/// ObCreateObjectType()
pub fn ob_create_object_type(name: &str, initializer: ObjectTypeInitializer) -> NtResult<TypeRef> {
    system()?.create_object_type(name, initializer)
}

/// ObCreateObject()
///
/// # Safety
/// As for `ObjectManager::create_object`.
pub unsafe fn ob_create_object(
    probe_mode: ProcessorMode,
    object_type: TypeRef,
    attributes: *const ObjectAttributes,
    owner_mode: ProcessorMode,
    body_size: usize,
    paged_pool_charge: u32,
    non_paged_pool_charge: u32,
) -> NtResult<ObjectBody> {
    system()?.create_object(
        probe_mode,
        object_type,
        attributes,
        owner_mode,
        body_size,
        paged_pool_charge,
        non_paged_pool_charge,
    )
}

/// ObReferenceObject()
pub fn ob_reference_object(body: ObjectBody) {
    if let Some(ob) = object_manager() {
        ob.reference_object(body);
    }
}

/// ObReferenceObjectByHandle()
pub fn ob_reference_object_by_handle(
    handle: Handle,
    desired_access: AccessMask,
    mode: ProcessorMode,
) -> NtResult<(ObjectBody, HandleInformation)> {
    system()?.reference_object_by_handle(handle, desired_access, mode)
}

/// ObDereferenceObject()
pub fn ob_dereference_object(body: ObjectBody) {
    if let Some(ob) = object_manager() {
        ob.dereference_object(body);
    }
}

/// NtQueryObject()
pub fn ob_query_object(
    handle: Handle,
    class: u32,
    buffer: &mut [u8],
    return_length: Option<&mut u32>,
    mode: ProcessorMode,
) -> NtResult<()> {
    system()?.query_object(handle, class, buffer, return_length, mode)
}

/// NtSetInformationObject()
pub fn ob_set_information_object(handle: Handle, class: u32, buffer: &[u8], mode: ProcessorMode) -> NtResult<()> {
    system()?.set_information_object(handle, class, buffer, mode)
}
