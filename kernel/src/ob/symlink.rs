//! Object Manager Symbolic Links
//!
//! Symbolic link objects carry a target path and their creation time; the
//! creation time is what ObjectBasicInformation reports for them. Resolving
//! links during name lookup is not done here.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr;

use super::attributes::ObjectAttributes;
use super::header::ObjectBody;
use super::manager::ObjectManager;
use super::object_type::{DeleteProcedure, ObjectTypeInitializer};
use crate::ke::ProcessorMode;
use crate::mm::pool::PoolType;
use crate::status::{NtResult, NtStatus};

/// Access rights for symbolic link objects
pub mod symlink_access {
    pub const SYMBOLIC_LINK_QUERY: u32 = 0x0001;
    pub const SYMBOLIC_LINK_ALL_ACCESS: u32 = 0x000F0001;
}

/// Symbolic link object, the body of a SymbolicLink object
#[derive(Debug)]
pub struct ObjectSymbolicLink {
    /// Creation time (100ns intervals since 1601)
    pub creation_time: i64,
    /// Link target
    pub link_target: Vec<u16>,
    /// DOS device drive index (1-26 for A-Z, 0 if not a drive)
    pub dos_device_drive_index: u8,
}

impl ObjectSymbolicLink {
    pub fn new(target: &str, creation_time: i64) -> Self {
        Self {
            creation_time,
            link_target: target.encode_utf16().collect(),
            dos_device_drive_index: 0,
        }
    }

    pub fn target(&self) -> String {
        String::from_utf16_lossy(&self.link_target)
    }
}

/// Type parameters for "SymbolicLink"
pub(crate) fn symbolic_link_type_initializer() -> ObjectTypeInitializer {
    let delete: DeleteProcedure = Arc::new(|body: ObjectBody| {
        // SAFETY: symbolic link bodies are initialized by create_symbolic_link
        unsafe { ptr::drop_in_place(body.cast::<ObjectSymbolicLink>()) };
    });
    ObjectTypeInitializer {
        valid_access_mask: symlink_access::SYMBOLIC_LINK_ALL_ACCESS,
        pool_type: PoolType::PagedPool,
        delete_procedure: Some(delete),
        ..Default::default()
    }
}

impl ObjectManager {
    /// NtCreateSymbolicLinkObject() without the handle: create the link
    /// object and stamp its creation time
    ///
    /// # Safety
    /// As for `create_object`.
    pub unsafe fn create_symbolic_link(
        &self,
        attributes: *const ObjectAttributes,
        mode: ProcessorMode,
        target: &str,
    ) -> NtResult<ObjectBody> {
        let link_type = self.symbolic_link_type().ok_or(NtStatus::Unsuccessful)?;
        let body = self.create_object(mode, link_type, attributes, mode, size_of::<ObjectSymbolicLink>(), 0, 0)?;

        ptr::write(
            body.cast::<ObjectSymbolicLink>(),
            ObjectSymbolicLink::new(target, self.services.query_system_time()),
        );

        if let Err(status) = self.consume_create_information(body) {
            self.dereference_object(body);
            return Err(status);
        }

        log::debug!("[OB] Created symbolic link -> {}", target);
        Ok(body)
    }

    /// Link target of a SymbolicLink object (None for other types)
    pub fn query_symbolic_link(&self, body: ObjectBody) -> Option<String> {
        if self.object_type_of(body)? != self.symbolic_link_type()? {
            return None;
        }
        // SAFETY: the type check guarantees an initialized link body
        Some(unsafe { &*body.cast::<ObjectSymbolicLink>() }.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ob::attributes::ObjectAttributeFlags;
    use crate::ob::testing::test_manager;
    use crate::rtl::UnicodeString;

    #[test]
    fn test_create_symbolic_link() {
        let (ob, services) = test_manager();
        services.set_time(132_000_000_000_000_000);

        let chars: Vec<u16> = "C:".encode_utf16().collect();
        let name = UnicodeString::from_slice(&chars);
        let attributes = ObjectAttributes::new(Some(&name), ObjectAttributeFlags::CASE_INSENSITIVE, 0, None);
        let body = unsafe {
            ob.create_symbolic_link(&attributes, ProcessorMode::KernelMode, "\\Device\\HarddiskVolume1")
        }
        .unwrap();

        assert_eq!(ob.query_symbolic_link(body).as_deref(), Some("\\Device\\HarddiskVolume1"));
        let link = unsafe { &*body.cast::<ObjectSymbolicLink>() };
        assert_eq!(link.creation_time, 132_000_000_000_000_000);

        let link_type = ob.symbolic_link_type().unwrap();
        assert_eq!(link_type.total_objects(), 1);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
        assert_eq!(link_type.total_objects(), 0);
    }

    #[test]
    fn test_query_rejects_other_types() {
        let (ob, _services) = test_manager();
        let directory = ob.create_directory_object(None).unwrap();
        assert!(ob.query_symbolic_link(directory).is_none());
        ob.dereference_object(directory);
        ob.process_deferred_deletes();
    }
}
