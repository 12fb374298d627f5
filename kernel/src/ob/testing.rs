//! In-memory kernel services for unit tests
//!
//! A flat handle table keyed by handle value, one current process, an
//! explicit privilege set and a settable clock.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use spin::Mutex;

use super::config::ObConfig;
use super::header::ObjectBody;
use super::manager::ObjectManager;
use super::object_type::TypeRef;
use super::services::{AccessMask, Handle, HandleAttributeInformation, HandleInformation, KernelServices};
use crate::ke::ProcessorMode;
use crate::se::{se_single_privilege_check, Luid, LuidAndAttributes};
use crate::status::{NtResult, NtStatus};

struct HandleEntry {
    object: ObjectBody,
    info: HandleInformation,
    attributes: HandleAttributeInformation,
}

pub struct TestServices {
    handles: Mutex<BTreeMap<Handle, HandleEntry>>,
    next_handle: AtomicUsize,
    process_id: AtomicUsize,
    privileges: Mutex<Vec<LuidAndAttributes>>,
    time: AtomicI64,
}

impl TestServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handles: Mutex::new(BTreeMap::new()),
            next_handle: AtomicUsize::new(4),
            process_id: AtomicUsize::new(0),
            privileges: Mutex::new(Vec::new()),
            time: AtomicI64::new(0),
        })
    }

    /// Add a handle entry; the caller accounts for any references
    pub fn insert_handle(&self, object: ObjectBody, granted_access: AccessMask, attributes: u32) -> Handle {
        let handle = self.next_handle.fetch_add(4, Ordering::Relaxed);
        let entry = HandleEntry {
            object,
            info: HandleInformation {
                handle_attributes: attributes,
                granted_access,
            },
            attributes: HandleAttributeInformation {
                inherit: attributes & super::attributes::ObjectAttributeFlags::INHERIT.bits() != 0,
                protect_from_close: false,
            },
        };
        self.handles.lock().insert(handle, entry);
        handle
    }

    pub fn remove_handle(&self, handle: Handle) -> Option<ObjectBody> {
        self.handles.lock().remove(&handle).map(|e| e.object)
    }

    pub fn grant_privilege(&self, privilege: Luid) {
        self.privileges.lock().push(LuidAndAttributes::enabled(privilege));
    }

    pub fn set_time(&self, time: i64) {
        self.time.store(time, Ordering::Relaxed);
    }
}

impl KernelServices for TestServices {
    fn resolve_handle(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        _mode: ProcessorMode,
    ) -> NtResult<(ObjectBody, HandleInformation)> {
        let handles = self.handles.lock();
        let entry = handles.get(&handle).ok_or(NtStatus::InvalidHandle)?;
        if entry.info.granted_access & desired_access != desired_access {
            return Err(NtStatus::AccessDenied);
        }
        Ok((entry.object, entry.info))
    }

    fn query_handle_attributes(&self, handle: Handle) -> NtResult<HandleAttributeInformation> {
        self.handles
            .lock()
            .get(&handle)
            .map(|e| e.attributes)
            .ok_or(NtStatus::InvalidHandle)
    }

    fn set_handle_attributes(
        &self,
        handle: Handle,
        info: HandleAttributeInformation,
        _mode: ProcessorMode,
    ) -> NtResult<()> {
        let mut handles = self.handles.lock();
        let entry = handles.get_mut(&handle).ok_or(NtStatus::InvalidHandle)?;
        entry.attributes = info;
        Ok(())
    }

    fn current_process_id(&self) -> usize {
        self.process_id.load(Ordering::Relaxed)
    }

    fn single_privilege_check(&self, privilege: Luid, mode: ProcessorMode) -> bool {
        mode.is_kernel() || se_single_privilege_check(privilege, &self.privileges.lock())
    }

    fn query_system_time(&self) -> i64 {
        self.time.load(Ordering::Relaxed)
    }
}

pub fn test_manager() -> (Arc<ObjectManager>, Arc<TestServices>) {
    test_manager_with_config(ObConfig::new())
}

pub fn test_manager_with_config(config: ObConfig) -> (Arc<ObjectManager>, Arc<TestServices>) {
    let services = TestServices::new();
    let manager = ObjectManager::new(config, services.clone()).expect("object manager initialization");
    (manager, services)
}

impl ObjectManager {
    /// Kernel-mode object of `object_type` with a 32-byte body
    ///
    /// The create information is left in place.
    pub fn create_test_object(&self, object_type: TypeRef, name: Option<&str>) -> NtResult<ObjectBody> {
        let chars: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
        let name_string = crate::rtl::UnicodeString::from_slice(&chars);
        let attributes = super::attributes::ObjectAttributes::new(
            name.map(|_| &name_string),
            super::attributes::ObjectAttributeFlags::empty(),
            0,
            None,
        );
        // SAFETY: kernel-mode attributes backed by locals
        unsafe {
            self.create_object(
                ProcessorMode::KernelMode,
                object_type,
                &attributes,
                ProcessorMode::KernelMode,
                32,
                0,
                0,
            )
        }
    }
}
