//! Object Type Implementation
//!
//! Each object type (Type, Directory, SymbolicLink, Event, File, ...) is
//! described by an OBJECT_TYPE that defines:
//! - Type name and pool tag key
//! - Pool type and default quota charges
//! - Valid access mask and attributes callers may not use
//! - Type-specific callbacks (open, close, delete, security)
//! - Instance and handle counters, and optionally a list of live instances
//!
//! Types are objects themselves, created from the type of types ("Type").
//! The first type created is the type of types and is its own type.
//! Types are permanent and are never freed.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::size_of;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use spin::RwLock;

use super::attributes::ObjectAttributeFlags;
use super::header::{ObjectBody, ObjectHeader, ObjectHeaderCreatorInfo, ObjectHeaderFlags};
use super::manager::ObjectManager;
use super::services::AccessMask;
use crate::containing_record;
use crate::ex::pooltag::str_to_pool_tag;
use crate::ke::{KEvent, ListEntry, ProcessorMode};
use crate::mm::pool::{pool_tags, PoolTag, PoolType};
use crate::rtl::str_equals_ignore_case;
use crate::se::{se_default_object_method, CapturedSecurityDescriptor, SecurityOperation};
use crate::status::{NtResult, NtStatus};

/// SYNCHRONIZE access right
pub const SYNCHRONIZE: AccessMask = 0x0010_0000;

/// Name of the type of types
pub const TYPE_TYPE_NAME: &str = "Type";

/// Why a handle is being created (OB_OPEN_REASON)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    CreateHandle,
    OpenHandle,
    DuplicateHandle,
    InheritHandle,
}

/// Open procedure - called before a handle to the object is counted
///
/// # Arguments
/// * reason, process id, object, granted access, the process's handle count
///   on the object before this one
///
/// An error refuses the handle.
pub type OpenProcedure =
    Arc<dyn Fn(OpenReason, usize, ObjectBody, AccessMask, u32) -> NtResult<()> + Send + Sync>;

/// Close procedure - called after a handle is removed
///
/// # Arguments
/// * process id, object, granted access, the process's remaining handle
///   count, the system-wide remaining handle count
pub type CloseProcedure = Arc<dyn Fn(usize, ObjectBody, AccessMask, u32, isize) + Send + Sync>;

/// Delete procedure - called once when the object is being deleted
pub type DeleteProcedure = Arc<dyn Fn(ObjectBody) + Send + Sync>;

/// Security procedure - operates on the header's descriptor slot
pub type SecurityProcedure = Arc<
    dyn Fn(ObjectBody, SecurityOperation<'_>, &mut Option<alloc::boxed::Box<CapturedSecurityDescriptor>>) -> NtResult<()>
        + Send
        + Sync,
>;

/// The procedure installed on types that do not supply one
pub fn default_security_procedure() -> SecurityProcedure {
    Arc::new(|_object, operation, slot| se_default_object_method(slot, operation))
}

/// Caller-supplied type parameters (OBJECT_TYPE_INITIALIZER)
#[derive(Clone, Default)]
pub struct ObjectTypeInitializer {
    pub valid_access_mask: AccessMask,
    /// Attributes callers may not pass when creating objects of this type
    pub invalid_attributes: ObjectAttributeFlags,
    pub pool_type: PoolType,
    pub default_paged_pool_charge: u32,
    pub default_non_paged_pool_charge: u32,
    /// Keep per-process handle counts (Handle Info prefix)
    pub maintain_handle_count: bool,
    /// Keep a list of live instances (Creator Info prefix)
    pub maintain_type_list: bool,
    /// Waits go to the shared default event
    pub use_default_object: bool,
    pub security_required: bool,
    pub open_procedure: Option<OpenProcedure>,
    pub close_procedure: Option<CloseProcedure>,
    pub delete_procedure: Option<DeleteProcedure>,
    pub security_procedure: Option<SecurityProcedure>,
}

impl core::fmt::Debug for ObjectTypeInitializer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectTypeInitializer")
            .field("valid_access_mask", &format_args!("{:#x}", self.valid_access_mask))
            .field("invalid_attributes", &self.invalid_attributes)
            .field("pool_type", &self.pool_type)
            .field("maintain_handle_count", &self.maintain_handle_count)
            .field("maintain_type_list", &self.maintain_type_list)
            .field("use_default_object", &self.use_default_object)
            .finish_non_exhaustive()
    }
}

/// What a wait on an object of this type blocks on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultObject {
    /// The object is its own dispatcher object
    None,
    /// The object manager's shared event
    Shared,
    /// An event embedded in the body at this offset
    EmbeddedOffset(usize),
}

/// Instance list and counters, guarded by the type lock
pub(crate) struct TypeList {
    pub head: ListEntry,
    pub total_objects: u32,
    pub total_handles: u32,
    pub high_water_objects: u32,
    pub high_water_handles: u32,
}

// SAFETY: the list is only touched under the type lock
unsafe impl Send for TypeList {}
unsafe impl Sync for TypeList {}

/// Object type descriptor (OBJECT_TYPE), the body of a type object
pub struct ObjectType {
    name: String,
    key: PoolTag,
    index: u32,
    type_info: ObjectTypeInitializer,
    default_object: DefaultObject,
    pub(crate) type_list: RwLock<TypeList>,
}

impl ObjectType {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool tag for instances of this type
    #[inline]
    pub fn key(&self) -> PoolTag {
        self.key
    }

    /// Registration order, starting at 1 for the type of types
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn type_info(&self) -> &ObjectTypeInitializer {
        &self.type_info
    }

    #[inline]
    pub fn default_object(&self) -> DefaultObject {
        self.default_object
    }

    #[inline]
    pub fn pool_type(&self) -> PoolType {
        self.type_info.pool_type
    }

    #[inline]
    pub fn valid_access_mask(&self) -> AccessMask {
        self.type_info.valid_access_mask
    }

    pub fn total_objects(&self) -> u32 {
        self.type_list.read().total_objects
    }

    pub fn total_handles(&self) -> u32 {
        self.type_list.read().total_handles
    }

    /// Account for a new instance and link it into the instance list
    pub(crate) fn insert_instance(&self, header: &ObjectHeader) {
        let mut list = self.type_list.write();
        list.total_objects += 1;
        list.high_water_objects = list.high_water_objects.max(list.total_objects);

        if let Some(creator) = header.creator_info() {
            // SAFETY: the entry is fresh and the head is initialized
            unsafe { list.head.insert_tail(ptr::addr_of_mut!((*creator.as_ptr()).type_list)) };
        }
    }

    /// Unlink an instance from the instance list, if linked
    pub(crate) fn unlink_instance(&self, header: &ObjectHeader) {
        if let Some(creator) = header.creator_info() {
            let _list = self.type_list.write();
            // SAFETY: entries are only touched under the type lock
            unsafe {
                let entry = &mut (*creator.as_ptr()).type_list;
                if !entry.is_empty() {
                    entry.remove_entry();
                }
            }
        }
    }

    /// Unlink and drop the instance count
    pub(crate) fn remove_instance(&self, header: &ObjectHeader) {
        self.unlink_instance(header);
        let mut list = self.type_list.write();
        match list.total_objects.checked_sub(1) {
            Some(count) => list.total_objects = count,
            None => log::error!("[OB] {} instance count underflow", self.name),
        }
    }

    pub(crate) fn handle_opened(&self) {
        let mut list = self.type_list.write();
        list.total_handles += 1;
        list.high_water_handles = list.high_water_handles.max(list.total_handles);
    }

    pub(crate) fn handle_closed(&self) {
        let mut list = self.type_list.write();
        list.total_handles = list.total_handles.saturating_sub(1);
    }

    /// Bodies of the live instances (empty unless the type keeps a list)
    pub fn instances(&self) -> Vec<ObjectBody> {
        let list = self.type_list.read();
        // SAFETY: the head was initialized at creation; the lock pins the list
        unsafe {
            list.head
                .iter()
                .map(|entry| {
                    let creator = containing_record!(entry, ObjectHeaderCreatorInfo, type_list);
                    let header = (creator as *mut u8).add(size_of::<ObjectHeaderCreatorInfo>()) as *const ObjectHeader;
                    (*header).body()
                })
                .collect()
        }
    }

    pub fn snapshot(&self) -> ObjectTypeSnapshot {
        let list = self.type_list.read();
        ObjectTypeSnapshot {
            index: self.index,
            name: self.name.clone(),
            key: self.key,
            pool_type: self.type_info.pool_type,
            total_objects: list.total_objects,
            total_handles: list.total_handles,
            high_water_objects: list.high_water_objects,
            high_water_handles: list.high_water_handles,
            maintain_handle_count: self.type_info.maintain_handle_count,
            maintain_type_list: self.type_info.maintain_type_list,
        }
    }
}

/// Reference to a registered type
///
/// Types are never freed, so a `TypeRef` stays valid for the life of the
/// object manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRef(NonNull<ObjectType>);

// SAFETY: ObjectType is immutable apart from its locked list
unsafe impl Send for TypeRef {}
unsafe impl Sync for TypeRef {}

impl TypeRef {
    /// `object_type` must be a registered, initialized type
    pub(crate) fn from_ptr(object_type: NonNull<ObjectType>) -> Self {
        Self(object_type)
    }

    #[inline]
    pub fn as_ptr(self) -> *const ObjectType {
        self.0.as_ptr()
    }

    /// The type object's body
    #[inline]
    pub fn body(self) -> ObjectBody {
        // SAFETY: a type is the body of a type object
        unsafe { ObjectBody::from_raw(self.0.cast()) }
    }
}

impl Deref for TypeRef {
    type Target = ObjectType;

    fn deref(&self) -> &ObjectType {
        // SAFETY: types are permanent
        unsafe { self.0.as_ref() }
    }
}

/// Point-in-time view of a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeSnapshot {
    pub index: u32,
    pub name: String,
    pub key: PoolTag,
    pub pool_type: PoolType,
    pub total_objects: u32,
    pub total_handles: u32,
    pub high_water_objects: u32,
    pub high_water_handles: u32,
    pub maintain_handle_count: bool,
    pub maintain_type_list: bool,
}

/// Totals across every registered type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectTypeStats {
    pub type_count: usize,
    pub total_objects: u64,
    pub total_handles: u64,
}

impl ObjectManager {
    /// ObCreateObjectType()
    ///
    /// The first call creates the type of types, which becomes its own type.
    /// The registry stays write-locked from the duplicate check until the
    /// type is filed, so a failed create leaves nothing registered.
    pub fn create_object_type(&self, name: &str, initializer: ObjectTypeInitializer) -> NtResult<TypeRef> {
        if name.is_empty() || name.contains('\\') {
            return Err(NtStatus::ObjectNameInvalid);
        }
        if !ObjectAttributeFlags::all().contains(initializer.invalid_attributes) {
            return Err(NtStatus::InvalidParameter);
        }

        let mut types = self.types.write();
        if types.iter().any(|t| str_equals_ignore_case(&t.name, name)) {
            log::warn!("[OB] Object type '{}' already exists", name);
            return Err(NtStatus::ObjectNameCollision);
        }

        let type_type = self.type_object_type();
        let mut captured_name = self.capture_kernel_name(name)?;

        // SAFETY: a kernel-mode allocation of an ObjectType-sized body
        let header = match unsafe {
            self.allocate_object(
                None,
                captured_name,
                type_type.as_deref(),
                size_of::<ObjectType>(),
                ProcessorMode::KernelMode,
            )
        } {
            Ok(header) => header,
            Err(status) => {
                self.release_captured_name(&mut captured_name);
                return Err(status);
            }
        };

        // SAFETY: the header was just allocated and is not yet published
        let header_ref = unsafe { &mut *header.as_ptr() };
        let body = header_ref.body();
        let object_type = body.cast::<ObjectType>();

        let bootstrap = type_type.is_none();
        if bootstrap {
            // The type of types is its own type
            header_ref.object_type = object_type;
        }

        let key = if bootstrap {
            pool_tags::TAG_OBJECT_TYPE
        } else {
            str_to_pool_tag(name)
        };

        let mut info = initializer;
        if self.config.maintain_type_lists() {
            info.maintain_type_list = true;
        }
        if info.security_procedure.is_none() {
            info.security_procedure = Some(default_security_procedure());
        }

        let default_object = if info.use_default_object {
            info.valid_access_mask |= SYNCHRONIZE;
            DefaultObject::Shared
        } else if name == "File" {
            DefaultObject::EmbeddedOffset(crate::io::FILE_OBJECT_EVENT_OFFSET)
        } else {
            DefaultObject::None
        };

        // Charge the header overhead to the pool the objects live in
        let header_size = (size_of::<ObjectHeader>() + size_of::<super::header::ObjectHeaderNameInfo>()
            + if info.maintain_handle_count {
                size_of::<super::header::ObjectHeaderHandleInfo>()
            } else {
                0
            }) as u32;
        if info.pool_type.is_paged() {
            info.default_paged_pool_charge += header_size;
        } else {
            info.default_non_paged_pool_charge += header_size;
        }

        let index = types.len() as u32 + 1;

        // SAFETY: body is a zeroed block sized for ObjectType
        unsafe {
            ptr::write(
                object_type,
                ObjectType {
                    name: String::from(name),
                    key,
                    index,
                    type_info: info,
                    default_object,
                    type_list: RwLock::new(TypeList {
                        head: ListEntry::new(),
                        total_objects: if bootstrap { 1 } else { 0 },
                        total_handles: 0,
                        high_water_objects: if bootstrap { 1 } else { 0 },
                        high_water_handles: 0,
                    }),
                },
            );
            (*object_type).type_list.write().head.init_head();
        }

        if let Some(directory) = self.type_directory() {
            // SAFETY: the type directory is permanent
            if let Err(status) = unsafe { directory.as_ref() }.insert(body) {
                log::warn!("[OB] Could not file type '{}' in \\ObjectTypes: {}", name, status);
                // SAFETY: never published; the bootstrap type is created before the directory
                unsafe {
                    ptr::drop_in_place(object_type);
                    self.deallocate_object(header);
                }
                return Err(status);
            }
        }

        header_ref.set_flags(ObjectHeaderFlags::KERNEL_MODE | ObjectHeaderFlags::PERMANENT);

        // SAFETY: object_type is non-null and now initialized
        let type_ref = TypeRef::from_ptr(unsafe { NonNull::new_unchecked(object_type) });
        types.push(type_ref);
        drop(types);
        if bootstrap {
            self.set_type_object_type(type_ref);
        }

        log::info!(
            "[OB] Created object type '{}' (index {}, key {:?})",
            name,
            index,
            core::str::from_utf8(&crate::ex::pooltag::pool_tag_chars(key)).unwrap_or("????")
        );

        Ok(type_ref)
    }

    /// Registered type by name (case-insensitive)
    pub fn lookup_type(&self, name: &str) -> Option<TypeRef> {
        self.types
            .read()
            .iter()
            .copied()
            .find(|t| str_equals_ignore_case(&t.name, name))
    }

    /// The type of an object
    pub fn object_type_of(&self, body: ObjectBody) -> Option<TypeRef> {
        // SAFETY: body designates a live object
        let header = unsafe { body.header().as_ref() };
        NonNull::new(header.object_type as *mut ObjectType).map(TypeRef::from_ptr)
    }

    pub fn type_snapshots(&self) -> Vec<ObjectTypeSnapshot> {
        self.types.read().iter().map(|t| t.snapshot()).collect()
    }

    pub fn type_stats(&self) -> ObjectTypeStats {
        let types = self.types.read();
        let mut stats = ObjectTypeStats {
            type_count: types.len(),
            ..Default::default()
        };
        for object_type in types.iter() {
            let list = object_type.type_list.read();
            stats.total_objects += list.total_objects as u64;
            stats.total_handles += list.total_handles as u64;
        }
        stats
    }

    /// The dispatcher object a wait on `body` blocks on
    ///
    /// None when the object is its own dispatcher object.
    pub fn wait_object(&self, body: ObjectBody) -> Option<NonNull<KEvent>> {
        match self.object_type_of(body)?.default_object() {
            DefaultObject::None => None,
            DefaultObject::Shared => Some(NonNull::from(&self.default_event)),
            // SAFETY: the offset lies inside the body of every File object
            DefaultObject::EmbeddedOffset(offset) => unsafe {
                Some(NonNull::new_unchecked(body.as_ptr().add(offset) as *mut KEvent))
            },
        }
    }

    /// Name of a type as a counted string (for queries)
    pub(crate) fn type_name_string(object_type: &ObjectType) -> Vec<u16> {
        object_type.name.encode_utf16().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ob::config::{GlobalFlags, ObConfig};
    use crate::ob::testing::{test_manager, test_manager_with_config};
    use crate::rtl::UnicodeString;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn header_name(body: ObjectBody) -> UnicodeString {
        unsafe { body.header().as_ref() }.name()
    }

    #[test]
    fn test_type_of_types_bootstrap() {
        let (ob, _services) = test_manager();
        let type_type = ob.lookup_type(TYPE_TYPE_NAME).unwrap();

        // The type of types is its own type
        assert_eq!(ob.object_type_of(type_type.body()), Some(type_type));
        assert_eq!(type_type.key(), pool_tags::TAG_OBJECT_TYPE);
        assert_eq!(type_type.index(), 1);

        let header = unsafe { type_type.body().header().as_ref() };
        assert!(header.is_permanent());
        assert!(header.has_flag(ObjectHeaderFlags::KERNEL_MODE));
    }

    #[test]
    fn test_bootstrap_counts_itself() {
        let (ob, _services) = test_manager_with_config(ObConfig::new().without_type_directory());
        let type_type = ob.lookup_type(TYPE_TYPE_NAME).unwrap();
        // Itself, Directory and SymbolicLink
        assert_eq!(type_type.total_objects(), 3);

        ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        assert_eq!(type_type.total_objects(), 4);
    }

    #[test]
    fn test_type_key_from_name() {
        let (ob, _services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        assert_eq!(event.key(), str_to_pool_tag("Even"));

        let job = ob.create_object_type("Job", ObjectTypeInitializer::default()).unwrap();
        assert_eq!(job.key(), str_to_pool_tag("Job "));
        assert_eq!(ob.object_type_of(job.body()), ob.lookup_type("type"));
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let (ob, _services) = test_manager();
        ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        assert_eq!(
            ob.create_object_type("EVENT", ObjectTypeInitializer::default()).unwrap_err(),
            NtStatus::ObjectNameCollision
        );
        assert_eq!(
            ob.create_object_type("", ObjectTypeInitializer::default()).unwrap_err(),
            NtStatus::ObjectNameInvalid
        );
        assert_eq!(
            ob.create_object_type("A\\B", ObjectTypeInitializer::default()).unwrap_err(),
            NtStatus::ObjectNameInvalid
        );

        let unknown_bits = ObjectTypeInitializer {
            invalid_attributes: ObjectAttributeFlags::from_bits_retain(0x1),
            ..Default::default()
        };
        assert_eq!(
            ob.create_object_type("Mutant", unknown_bits).unwrap_err(),
            NtStatus::InvalidParameter
        );
    }

    #[test]
    fn test_duplicate_folds_latin1() {
        let (ob, _services) = test_manager();
        let type_type = ob.lookup_type(TYPE_TYPE_NAME).unwrap();
        let first = ob.create_object_type("Événement", ObjectTypeInitializer::default()).unwrap();
        let types_before = ob.type_snapshots().len();
        let objects_before = type_type.total_objects();

        assert_eq!(
            ob.create_object_type("ÉVÉNEMENT", ObjectTypeInitializer::default()).unwrap_err(),
            NtStatus::ObjectNameCollision
        );
        assert_eq!(ob.type_snapshots().len(), types_before);
        assert_eq!(type_type.total_objects(), objects_before);
        assert_eq!(ob.lookup_type("événement"), Some(first));
        assert_eq!(ob.lookup_type("ÉVÉNEMENT"), Some(first));
    }

    #[test]
    fn test_failed_filing_unregisters_type() {
        let (ob, _services) = test_manager();
        let type_type = ob.lookup_type(TYPE_TYPE_NAME).unwrap();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();

        // Something that is not a type already holds the name in \ObjectTypes
        let squatter = ob.create_test_object(event, Some("Mutant")).unwrap();
        let directory = unsafe { ob.type_directory().unwrap().as_ref() };
        directory.insert(squatter).unwrap();

        let types_before = ob.type_snapshots().len();
        let objects_before = type_type.total_objects();
        let entries_before = directory.count();
        let names_before = ob.pool().tags().outstanding(pool_tags::TAG_OBJECT_NAME);

        assert_eq!(
            ob.create_object_type("Mutant", ObjectTypeInitializer::default()).unwrap_err(),
            NtStatus::ObjectNameCollision
        );
        assert_eq!(ob.type_snapshots().len(), types_before);
        assert_eq!(type_type.total_objects(), objects_before);
        assert_eq!(directory.count(), entries_before);
        assert_eq!(ob.pool().tags().outstanding(pool_tags::TAG_OBJECT_NAME), names_before);
        assert!(ob.lookup_type("Mutant").is_none());

        // The registry index is not consumed by the failed attempt
        assert!(ob.delete_directory_entry(squatter));
        let mutant = ob.create_object_type("Mutant", ObjectTypeInitializer::default()).unwrap();
        assert_eq!(mutant.index() as usize, types_before + 1);

        ob.dereference_object(squatter);
        ob.process_deferred_deletes();
        assert!(directory.lookup(&header_name(mutant.body()), true).is_some());
    }

    #[test]
    fn test_default_object_and_charges() {
        let (ob, _services) = test_manager();
        let event = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    valid_access_mask: 0x1F0003,
                    use_default_object: true,
                    pool_type: PoolType::NonPagedPool,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(event.default_object(), DefaultObject::Shared);
        assert_eq!(event.valid_access_mask() & SYNCHRONIZE, SYNCHRONIZE);
        assert!(event.type_info().default_non_paged_pool_charge >= size_of::<ObjectHeader>() as u32);
        assert_eq!(event.type_info().default_paged_pool_charge, 0);
        assert!(event.type_info().security_procedure.is_some());

        let file = ob
            .create_object_type(
                "File",
                ObjectTypeInitializer {
                    pool_type: PoolType::PagedPool,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            file.default_object(),
            DefaultObject::EmbeddedOffset(crate::io::FILE_OBJECT_EVENT_OFFSET)
        );
        assert!(file.type_info().default_paged_pool_charge > 0);
    }

    #[test]
    fn test_global_flag_forces_type_list() {
        let config = ObConfig::new().with_global_flags(GlobalFlags::MAINTAIN_OBJECT_TYPELIST);
        let (ob, _services) = test_manager_with_config(config);
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        assert!(event.type_info().maintain_type_list);

        let a = ob.create_test_object(event, None).unwrap();
        let b = ob.create_test_object(event, None).unwrap();
        let instances = event.instances();
        assert_eq!(instances, vec![a, b]);

        ob.dereference_object(a);
        ob.process_deferred_deletes();
        assert_eq!(event.instances(), vec![b]);
        ob.dereference_object(b);
        ob.process_deferred_deletes();
        assert!(event.instances().is_empty());
    }

    #[test]
    fn test_types_listed_in_type_directory() {
        let (ob, _services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        let directory = ob.type_directory().unwrap();
        let name = header_name(event.body());
        assert_eq!(unsafe { directory.as_ref() }.lookup(&name, true), Some(event.body()));
        let type_type = ob.lookup_type(TYPE_TYPE_NAME).unwrap();
        let type_name = header_name(type_type.body());
        assert_eq!(unsafe { directory.as_ref() }.lookup(&type_name, true), Some(type_type.body()));
    }

    #[test]
    fn test_snapshots_and_stats() {
        let (ob, _services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        let body = ob.create_test_object(event, None).unwrap();

        let snapshot = ob
            .type_snapshots()
            .into_iter()
            .find(|s| s.name == "Event")
            .unwrap();
        assert_eq!(snapshot.total_objects, 1);
        assert_eq!(snapshot.high_water_objects, 1);
        assert_eq!(ob.type_stats().type_count, ob.type_snapshots().len());

        ob.dereference_object(body);
        ob.process_deferred_deletes();
        assert_eq!(event.total_objects(), 0);
        assert_eq!(event.snapshot().high_water_objects, 1);
    }

    #[test]
    fn test_wait_object() {
        let (ob, _services) = test_manager();
        let plain = ob.create_object_type("Mutant", ObjectTypeInitializer::default()).unwrap();
        let shared = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    use_default_object: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let a = ob.create_test_object(plain, None).unwrap();
        let b = ob.create_test_object(shared, None).unwrap();
        assert!(ob.wait_object(a).is_none());
        let event = ob.wait_object(b).unwrap();
        assert!(!unsafe { event.as_ref() }.is_signaled());

        ob.dereference_object(a);
        ob.dereference_object(b);
        ob.process_deferred_deletes();
    }

    #[test]
    fn test_delete_procedure_runs_once() {
        let (ob, _services) = test_manager();
        let deletes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deletes);
        let event = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    delete_procedure: Some(Arc::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                    ..Default::default()
                },
            )
            .unwrap();
        let body = ob.create_test_object(event, None).unwrap();
        ob.reference_object(body);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
        assert_eq!(deletes.load(Ordering::SeqCst), 0);

        ob.dereference_object(body);
        ob.process_deferred_deletes();
        ob.process_deferred_deletes();
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }
}
