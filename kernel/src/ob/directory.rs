//! Object Directory Implementation
//!
//! Object directories hold named objects. The object manager creates two at
//! initialization:
//! - \ - the root directory
//! - \ObjectTypes - every registered type object
//!
//! Names are compared case-insensitively. Path parsing across directories is
//! not done here; callers insert into and look up in one directory at a time.
//!
//! # Directory Operations
//! - Lookup: Find object by name
//! - Insert: Add named object (collision checked under the same lock)
//! - Remove: Take an object back out

use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;
use spin::RwLock;

use super::attributes::{ObjectAttributeFlags, ObjectAttributes};
use super::header::{ObjectBody, ObjectHeader, ObjectHeaderFlags};
use super::manager::ObjectManager;
use super::object_type::{DeleteProcedure, ObjectTypeInitializer};
use crate::ke::ProcessorMode;
use crate::mm::pool::PoolType;
use crate::rtl::UnicodeString;
use crate::status::{NtResult, NtStatus};

/// Hash buckets per directory
pub const NUMBER_HASH_BUCKETS: usize = 37;

/// Full access to a directory
pub const DIRECTORY_ALL_ACCESS: u32 = 0x000F_000F;

/// Directory entry
#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    object: ObjectBody,
    name_hash: u32,
}

/// Object directory, the body of a Directory object
pub struct ObjectDirectory {
    buckets: RwLock<[Vec<DirectoryEntry>; NUMBER_HASH_BUCKETS]>,
}

impl ObjectDirectory {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(core::array::from_fn(|_| Vec::new())),
        }
    }

    fn name_of(object: ObjectBody) -> UnicodeString {
        // SAFETY: entries designate live objects
        unsafe { object.header().as_ref() }.name()
    }

    fn matches(entry: &DirectoryEntry, name: &UnicodeString, hash: u32, case_insensitive: bool) -> bool {
        if entry.name_hash != hash {
            return false;
        }
        let entry_name = Self::name_of(entry.object);
        if case_insensitive {
            entry_name.equals_ignore_case(name)
        } else {
            entry_name.equals(name)
        }
    }

    /// Look up an object by name
    pub fn lookup(&self, name: &UnicodeString, case_insensitive: bool) -> Option<ObjectBody> {
        let hash = name.hash_ignore_case();
        let buckets = self.buckets.read();
        buckets[hash as usize % NUMBER_HASH_BUCKETS]
            .iter()
            .find(|entry| Self::matches(entry, name, hash, case_insensitive))
            .map(|entry| entry.object)
    }

    /// Insert a named object
    ///
    /// The collision check and the insertion happen under one write lock.
    /// Each entry holds a pointer reference on the directory, dropped by
    /// [`ObjectManager::delete_directory_entry`].
    pub fn insert(&self, object: ObjectBody) -> NtResult<()> {
        // SAFETY: object is a live body
        let header = unsafe { object.header().as_ref() };
        let name_info = header.name_info().ok_or(NtStatus::ObjectNameInvalid)?;
        let name = header.name();
        if name.is_empty() {
            return Err(NtStatus::ObjectNameInvalid);
        }

        let hash = name.hash_ignore_case();
        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[hash as usize % NUMBER_HASH_BUCKETS];

        if bucket.iter().any(|entry| Self::matches(entry, &name, hash, true)) {
            return Err(NtStatus::ObjectNameCollision);
        }

        bucket.push(DirectoryEntry {
            object,
            name_hash: hash,
        });
        // SAFETY: Name Info lives as long as the header
        unsafe {
            (*name_info.as_ptr())
                .directory
                .store(self as *const Self as *mut Self, Ordering::Release);
        }
        // SAFETY: directories only exist as object bodies
        unsafe { ObjectManager::directory_header(NonNull::from(self)).as_ref() }.increment_pointer_count();
        Ok(())
    }

    /// Unlink an object, returning false if it was not here
    ///
    /// The entry's reference on the directory is left for the caller to drop.
    pub(crate) fn remove(&self, object: ObjectBody) -> bool {
        let name = Self::name_of(object);
        let hash = name.hash_ignore_case();
        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[hash as usize % NUMBER_HASH_BUCKETS];

        let Some(position) = bucket.iter().position(|entry| entry.object == object) else {
            return false;
        };
        bucket.swap_remove(position);

        // SAFETY: object is a live body
        if let Some(name_info) = unsafe { object.header().as_ref() }.name_info() {
            unsafe { (*name_info.as_ptr()).directory.store(ptr::null_mut(), Ordering::Release) };
        }
        true
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.buckets.read().iter().map(Vec::len).sum()
    }

    /// Every object in the directory
    pub fn entries(&self) -> Vec<ObjectBody> {
        self.buckets
            .read()
            .iter()
            .flat_map(|bucket| bucket.iter().map(|entry| entry.object))
            .collect()
    }
}

impl Default for ObjectDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Type parameters for "Directory"
pub(crate) fn directory_type_initializer() -> ObjectTypeInitializer {
    let delete: DeleteProcedure = alloc::sync::Arc::new(|body: ObjectBody| {
        // SAFETY: directory bodies are initialized by create_directory_object
        unsafe { ptr::drop_in_place(body.cast::<ObjectDirectory>()) };
    });
    ObjectTypeInitializer {
        valid_access_mask: DIRECTORY_ALL_ACCESS,
        invalid_attributes: ObjectAttributeFlags::empty(),
        pool_type: PoolType::PagedPool,
        delete_procedure: Some(delete),
        ..Default::default()
    }
}

impl ObjectManager {
    /// Create a Directory object, optionally named
    pub fn create_directory_object(&self, name: Option<&str>) -> NtResult<ObjectBody> {
        let directory_type = self.directory_type().ok_or(NtStatus::Unsuccessful)?;
        let chars: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
        let name_string = UnicodeString::from_slice(&chars);
        let attributes = ObjectAttributes::new(
            name.map(|_| &name_string),
            ObjectAttributeFlags::CASE_INSENSITIVE,
            0,
            None,
        );

        // SAFETY: kernel-mode attributes backed by locals
        let body = unsafe {
            self.create_object(
                ProcessorMode::KernelMode,
                directory_type,
                &attributes,
                ProcessorMode::KernelMode,
                core::mem::size_of::<ObjectDirectory>(),
                0,
                0,
            )?
        };
        // SAFETY: the body was allocated for an ObjectDirectory
        unsafe { ptr::write(body.cast::<ObjectDirectory>(), ObjectDirectory::new()) };

        if let Err(status) = self.consume_create_information(body) {
            self.dereference_object(body);
            return Err(status);
        }
        Ok(body)
    }

    /// Root directory (`\`), if the namespace was created
    pub fn root_directory(&self) -> Option<NonNull<ObjectDirectory>> {
        NonNull::new(self.root_directory.load(Ordering::Acquire))
    }

    /// `\ObjectTypes`, if the namespace was created
    pub fn type_directory(&self) -> Option<NonNull<ObjectDirectory>> {
        NonNull::new(self.type_directory.load(Ordering::Acquire))
    }

    /// Create `\` and `\ObjectTypes` and file every existing type
    pub(crate) fn create_namespace(&self) -> NtResult<()> {
        let root = self.create_directory_object(None)?;
        let types = self.create_directory_object(Some("ObjectTypes"))?;

        for body in [root, types] {
            // SAFETY: just created
            unsafe { body.header().as_ref() }.set_flags(ObjectHeaderFlags::PERMANENT);
        }

        // SAFETY: both bodies are initialized directories
        let root_directory = unsafe { &*root.cast::<ObjectDirectory>() };
        let type_directory = unsafe { &*types.cast::<ObjectDirectory>() };
        root_directory.insert(types)?;

        for object_type in self.types.read().iter() {
            type_directory.insert(object_type.body())?;
        }

        self.root_directory.store(root.cast(), Ordering::Release);
        self.type_directory.store(types.cast(), Ordering::Release);
        log::info!("[OB] Namespace created ({} types filed)", type_directory.count());
        Ok(())
    }

    /// ObpDeleteNameCheck(): take a named object out of its directory
    ///
    /// Drops the reference the entry held on the directory. Returns false if
    /// the object was not in a directory.
    pub fn delete_directory_entry(&self, object: ObjectBody) -> bool {
        // SAFETY: object is a live body
        let Some(directory) = (unsafe { object.header().as_ref() }).directory() else {
            return false;
        };
        // SAFETY: the entry's reference keeps the directory alive
        if !unsafe { directory.as_ref() }.remove(object) {
            return false;
        }
        // SAFETY: directories are object bodies
        self.dereference_object(unsafe { ObjectBody::from_raw(directory.cast()) });
        true
    }

    /// Header of a directory body
    pub(crate) fn directory_header(directory: NonNull<ObjectDirectory>) -> NonNull<ObjectHeader> {
        // SAFETY: directories are object bodies
        unsafe { ObjectBody::from_raw(directory.cast()) }.header()
    }
}
