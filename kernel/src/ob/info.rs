//! Object Information Query / Set
//!
//! NtQueryObject / NtSetInformationObject. The caller names an object by
//! handle; the handle is resolved and referenced for the duration of the
//! call and dereferenced afterwards whatever the outcome.
//!
//! # Information Classes
//! - Basic (0): fixed-size counts and attributes
//! - Name (1): full path, as an OBJECT_NAME_INFORMATION
//! - Type (2): type name and counters
//! - AllTypes (3): not implemented
//! - Handle (4): inherit / protect-from-close, also settable
//!
//! The required length is always written back so callers can size buffers.

use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr;

use super::attributes::ObjectAttributeFlags;
use super::header::{ObjectBody, ObjectHeader, ObjectHeaderFlags};
use super::manager::ObjectManager;
use super::object_type::ObjectType;
use super::services::{Handle, HandleAttributeInformation, HandleInformation};
use super::symlink::ObjectSymbolicLink;
use crate::ke::ProcessorMode;
use crate::rtl::string::{MAX_USTRING, WCHAR_SIZE};
use crate::rtl::UnicodeString;
use crate::status::{NtResult, NtStatus};

const OBJ_NAME_PATH_SEPARATOR: u16 = b'\\' as u16;

/// OBJECT_INFORMATION_CLASS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectInformationClass {
    Basic = 0,
    Name = 1,
    Type = 2,
    AllTypes = 3,
    Handle = 4,
}

impl TryFrom<u32> for ObjectInformationClass {
    type Error = NtStatus;

    fn try_from(value: u32) -> Result<Self, NtStatus> {
        match value {
            0 => Ok(Self::Basic),
            1 => Ok(Self::Name),
            2 => Ok(Self::Type),
            3 => Ok(Self::AllTypes),
            4 => Ok(Self::Handle),
            _ => Err(NtStatus::InvalidInfoClass),
        }
    }
}

/// OBJECT_BASIC_INFORMATION
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectBasicInformation {
    pub attributes: u32,
    pub granted_access: u32,
    pub handle_count: u32,
    pub pointer_count: u32,
    pub paged_pool_charge: u32,
    pub non_paged_pool_charge: u32,
    pub reserved: [u32; 3],
    pub name_info_size: u32,
    pub type_info_size: u32,
    pub security_descriptor_size: u32,
    pub creation_time: i64,
}

impl ObjectBasicInformation {
    pub const SIZE: usize = size_of::<Self>();

    /// Read back a structure written by `query_object`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        // SAFETY: length checked; the struct is plain data
        Some(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const Self) })
    }
}

/// OBJECT_TYPE_INFORMATION, followed in the buffer by the type name
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ObjectTypeInformation {
    pub type_name: UnicodeString,
    pub total_number_of_objects: u32,
    pub total_number_of_handles: u32,
    pub high_water_number_of_objects: u32,
    pub high_water_number_of_handles: u32,
    pub invalid_attributes: u32,
    pub valid_access_mask: u32,
    pub security_required: u8,
    pub maintain_handle_count: u8,
    pub pool_type: u32,
    pub default_paged_pool_charge: u32,
    pub default_non_paged_pool_charge: u32,
}

/// Write a header structure and a null-terminated string after it; the
/// string's UNICODE_STRING points into the buffer
fn write_counted<T: Copy>(
    buffer: &mut [u8],
    mut value: T,
    name_field: impl FnOnce(&mut T) -> &mut UnicodeString,
    chars: &[u16],
) -> NtResult<u32> {
    let byte_length = chars.len() * WCHAR_SIZE;
    if byte_length + WCHAR_SIZE > MAX_USTRING as usize {
        log::warn!("[OB] Name of {} characters does not fit a counted string", chars.len());
        return Err(NtStatus::NameTooLong);
    }
    let required = required_counted_length::<T>(chars);
    if buffer.len() < required {
        return Err(NtStatus::InfoLengthMismatch);
    }

    let string_offset = size_of::<T>();
    {
        let field = name_field(&mut value);
        field.length = byte_length as u16;
        field.maximum_length = (byte_length + WCHAR_SIZE) as u16;
        // SAFETY: string_offset is inside the buffer (checked above)
        field.buffer = unsafe { buffer.as_mut_ptr().add(string_offset) } as *mut u16;
    }

    for (i, c) in chars.iter().enumerate() {
        let at = string_offset + i * WCHAR_SIZE;
        buffer[at..at + WCHAR_SIZE].copy_from_slice(&c.to_ne_bytes());
    }
    let end = string_offset + byte_length;
    buffer[end..end + WCHAR_SIZE].fill(0);

    // SAFETY: the buffer holds at least size_of::<T>() bytes
    unsafe { ptr::write_unaligned(buffer.as_mut_ptr() as *mut T, value) };
    Ok(required as u32)
}

fn required_counted_length<T>(chars: &[u16]) -> usize {
    size_of::<T>() + (chars.len() + 1) * WCHAR_SIZE
}

impl ObjectManager {
    /// ObQueryNameString(): the object's full path
    ///
    /// `\` for the root directory, `\Dir\Name` for an object reachable from
    /// the root, the bare name for an object in no directory, and empty for
    /// an unnamed object.
    pub fn query_name_string(&self, body: ObjectBody) -> Vec<u16> {
        let root = self.root_directory().map(|r| r.as_ptr() as *mut u8);
        if root == Some(body.as_ptr()) {
            return alloc::vec![OBJ_NAME_PATH_SEPARATOR];
        }

        // SAFETY: body is referenced by the caller
        let mut header: &ObjectHeader = unsafe { &*body.header().as_ptr() };
        let name = header.name();
        if name.is_empty() {
            return Vec::new();
        }

        let mut components: Vec<Vec<u16>> = alloc::vec![name.as_slice().to_vec()];
        let mut rooted = false;
        while let Some(directory) = header.directory() {
            if Some(directory.as_ptr() as *mut u8) == root {
                rooted = true;
                break;
            }
            // SAFETY: a directory holding an entry is alive
            header = unsafe { &*Self::directory_header(directory).as_ptr() };
            components.push(header.name().as_slice().to_vec());
        }

        let mut path = Vec::new();
        for (i, component) in components.iter().rev().enumerate() {
            if rooted || i > 0 {
                path.push(OBJ_NAME_PATH_SEPARATOR);
            }
            path.extend_from_slice(component);
        }
        path
    }

    fn query_basic(
        &self,
        body: ObjectBody,
        handle_info: &HandleInformation,
        buffer: &mut [u8],
    ) -> NtResult<u32> {
        let length = ObjectBasicInformation::SIZE as u32;
        if buffer.len() != ObjectBasicInformation::SIZE {
            return Err(NtStatus::InfoLengthMismatch);
        }

        // SAFETY: body is referenced for the duration of the query
        let header = unsafe { body.header().as_ref() };
        let object_type = header.object_type();

        let mut attributes = handle_info.handle_attributes;
        if header.has_flag(ObjectHeaderFlags::PERMANENT) {
            attributes |= ObjectAttributeFlags::PERMANENT.bits();
        }
        if header.has_flag(ObjectHeaderFlags::EXCLUSIVE) {
            attributes |= ObjectAttributeFlags::EXCLUSIVE.bits();
        }

        let name = self.query_name_string(body);
        let name_info_size = if name.is_empty() {
            0
        } else {
            required_counted_length::<UnicodeString>(&name) as u32
        };
        let type_info_size = object_type.map_or(0, |t| {
            required_counted_length::<ObjectTypeInformation>(&Self::type_name_string(t)) as u32
        });

        let creation_time = match (self.object_type_of(body), self.symbolic_link_type()) {
            // SAFETY: symbolic link bodies are initialized at creation
            (Some(t), Some(link)) if t == link => unsafe { (*body.cast::<ObjectSymbolicLink>()).creation_time },
            _ => 0,
        };

        let info = ObjectBasicInformation {
            attributes,
            granted_access: handle_info.granted_access,
            handle_count: header.handle_count().max(0) as u32,
            // Not counting the reference held by this query
            pointer_count: (header.pointer_count() - 1).max(0) as u32,
            paged_pool_charge: header.paged_pool_charge(),
            non_paged_pool_charge: header.non_paged_pool_charge(),
            reserved: [0; 3],
            name_info_size,
            type_info_size,
            security_descriptor_size: header.security_descriptor_length(),
            creation_time,
        };

        // SAFETY: exact size checked above
        unsafe { ptr::write_unaligned(buffer.as_mut_ptr() as *mut ObjectBasicInformation, info) };
        Ok(length)
    }

    fn query_type(object_type: &ObjectType, buffer: &mut [u8]) -> NtResult<u32> {
        let snapshot = object_type.snapshot();
        let info = ObjectTypeInformation {
            type_name: UnicodeString::empty(),
            total_number_of_objects: snapshot.total_objects,
            total_number_of_handles: snapshot.total_handles,
            high_water_number_of_objects: snapshot.high_water_objects,
            high_water_number_of_handles: snapshot.high_water_handles,
            invalid_attributes: object_type.type_info().invalid_attributes.bits(),
            valid_access_mask: object_type.valid_access_mask(),
            security_required: object_type.type_info().security_required as u8,
            maintain_handle_count: object_type.type_info().maintain_handle_count as u8,
            pool_type: object_type.pool_type() as u32,
            default_paged_pool_charge: object_type.type_info().default_paged_pool_charge,
            default_non_paged_pool_charge: object_type.type_info().default_non_paged_pool_charge,
        };
        write_counted(buffer, info, |i| &mut i.type_name, &Self::type_name_string(object_type))
    }

    fn query_by_class(
        &self,
        class: ObjectInformationClass,
        handle: Handle,
        body: ObjectBody,
        handle_info: &HandleInformation,
        buffer: &mut [u8],
        length: &mut u32,
    ) -> NtResult<()> {
        match class {
            ObjectInformationClass::Basic => {
                *length = ObjectBasicInformation::SIZE as u32;
                self.query_basic(body, handle_info, buffer).map(|_| ())
            }
            ObjectInformationClass::Name => {
                let name = self.query_name_string(body);
                *length = required_counted_length::<UnicodeString>(&name) as u32;
                write_counted(buffer, UnicodeString::empty(), |s| s, &name).map(|_| ())
            }
            ObjectInformationClass::Type => {
                let object_type = self.object_type_of(body).ok_or(NtStatus::InvalidParameter)?;
                *length =
                    required_counted_length::<ObjectTypeInformation>(&Self::type_name_string(&object_type)) as u32;
                Self::query_type(&object_type, buffer).map(|_| ())
            }
            ObjectInformationClass::AllTypes => Err(NtStatus::NotImplemented),
            ObjectInformationClass::Handle => {
                *length = HandleAttributeInformation::SIZE as u32;
                if buffer.len() != HandleAttributeInformation::SIZE {
                    return Err(NtStatus::InfoLengthMismatch);
                }
                let attributes = self.services.query_handle_attributes(handle)?;
                buffer.copy_from_slice(&attributes.to_bytes());
                Ok(())
            }
        }
    }

    /// NtQueryObject()
    ///
    /// `class` is the raw information class; unknown values fail with
    /// `InvalidInfoClass`.
    pub fn query_object(
        &self,
        handle: Handle,
        class: u32,
        buffer: &mut [u8],
        return_length: Option<&mut u32>,
        mode: ProcessorMode,
    ) -> NtResult<()> {
        let (body, handle_info) = self.reference_object_by_handle(handle, 0, mode)?;

        let mut length = 0;
        let result = ObjectInformationClass::try_from(class)
            .and_then(|class| self.query_by_class(class, handle, body, &handle_info, buffer, &mut length));

        self.dereference_object(body);

        if let Some(return_length) = return_length {
            *return_length = length;
        }
        result
    }

    /// NtSetInformationObject(): only the Handle class is settable
    pub fn set_information_object(
        &self,
        handle: Handle,
        class: u32,
        buffer: &[u8],
        mode: ProcessorMode,
    ) -> NtResult<()> {
        if ObjectInformationClass::try_from(class) != Ok(ObjectInformationClass::Handle) {
            return Err(NtStatus::InvalidInfoClass);
        }
        let info = HandleAttributeInformation::from_bytes(buffer).ok_or(NtStatus::InfoLengthMismatch)?;

        let (body, _) = self.reference_object_by_handle(handle, 0, mode)?;
        let result = self.services.set_handle_attributes(handle, info, mode);
        self.dereference_object(body);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ob::attributes::ObjectAttributes;
    use crate::ob::directory::ObjectDirectory;
    use crate::ob::object_type::{ObjectTypeInitializer, OpenReason};
    use crate::ob::testing::test_manager;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    /// Characters of an OBJECT_NAME_INFORMATION-style buffer
    fn counted_chars<T>(buffer: &[u8], string: UnicodeString) -> Vec<u16> {
        let start = size_of::<T>();
        let end = start + string.length as usize;
        buffer[start..end]
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_name_round_trip() {
        let (ob, services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        let body = ob.create_test_object(event, Some("Round\u{00e9}Trip")).unwrap();
        let handle = services.insert_handle(body, 0, 0);

        let mut length = 0;
        let mut small = [0u8; 4];
        let result = ob.query_object(handle, 1, &mut small, Some(&mut length), ProcessorMode::UserMode);
        assert_eq!(result, Err(NtStatus::InfoLengthMismatch));
        let expected = wide("Round\u{00e9}Trip");
        assert_eq!(length as usize, size_of::<UnicodeString>() + (expected.len() + 1) * 2);

        let mut buffer = alloc::vec![0u8; length as usize];
        ob.query_object(handle, 1, &mut buffer, None, ProcessorMode::UserMode).unwrap();
        let string = unsafe { ptr::read_unaligned(buffer.as_ptr() as *const UnicodeString) };
        assert_eq!(string.length as usize, expected.len() * 2);
        assert_eq!(counted_chars::<UnicodeString>(&buffer, string), expected);
        assert_eq!(&buffer[buffer.len() - 2..], &[0, 0]);

        services.remove_handle(handle);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
    }

    #[test]
    fn test_counted_string_limit() {
        let longest = vec![0x41u16; MAX_USTRING as usize / WCHAR_SIZE - 1];
        let mut buffer = vec![0u8; required_counted_length::<UnicodeString>(&longest)];
        let written = write_counted(&mut buffer, UnicodeString::empty(), |s| s, &longest).unwrap();
        assert_eq!(written as usize, buffer.len());
        let header = unsafe { ptr::read_unaligned(buffer.as_ptr() as *const UnicodeString) };
        assert_eq!(header.length as usize, longest.len() * WCHAR_SIZE);
        assert_eq!(header.maximum_length as usize, (longest.len() + 1) * WCHAR_SIZE);

        for count in [longest.len() + 1, 40000] {
            let chars = vec![0x41u16; count];
            let mut buffer = vec![0u8; required_counted_length::<UnicodeString>(&chars)];
            assert_eq!(
                write_counted(&mut buffer, UnicodeString::empty(), |s| s, &chars),
                Err(NtStatus::NameTooLong)
            );
        }
    }

    #[test]
    fn test_name_paths() {
        let (ob, _services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();

        let root = ob.root_directory().unwrap();
        assert_eq!(ob.query_name_string(unsafe { ObjectBody::from_raw(root.cast()) }), wide("\\"));
        assert_eq!(ob.query_name_string(event.body()), wide("\\ObjectTypes\\Event"));

        let loose = ob.create_test_object(event, Some("Loose")).unwrap();
        assert_eq!(ob.query_name_string(loose), wide("Loose"));
        let unnamed = ob.create_test_object(event, None).unwrap();
        assert!(ob.query_name_string(unnamed).is_empty());

        // A directory outside the root gives a relative path
        let outer = ob.create_directory_object(Some("Outer")).unwrap();
        unsafe { &*outer.cast::<ObjectDirectory>() }.insert(loose).unwrap();
        assert_eq!(ob.query_name_string(loose), wide("Outer\\Loose"));
        assert!(ob.delete_directory_entry(loose));

        for body in [loose, unnamed, outer] {
            ob.dereference_object(body);
        }
        ob.process_deferred_deletes();
    }

    #[test]
    fn test_basic_information() {
        let (ob, services) = test_manager();
        let event = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    maintain_handle_count: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let body = ob.create_test_object(event, Some("Basic")).unwrap();
        ob.increment_handle_count(body, OpenReason::CreateHandle, 1, 0x1F0003)
            .unwrap();
        let handle = services.insert_handle(body, 0x1F0003, ObjectAttributeFlags::INHERIT.bits());

        let mut buffer = [0u8; ObjectBasicInformation::SIZE];
        let mut length = 0;
        ob.query_object(handle, 0, &mut buffer, Some(&mut length), ProcessorMode::UserMode)
            .unwrap();
        assert_eq!(length as usize, ObjectBasicInformation::SIZE);

        let info = ObjectBasicInformation::from_bytes(&buffer).unwrap();
        assert_eq!(info.attributes, ObjectAttributeFlags::INHERIT.bits());
        assert_eq!(info.granted_access, 0x1F0003);
        assert_eq!(info.handle_count, 1);
        assert_eq!(info.pointer_count, 2);
        assert!(info.name_info_size > 0);
        assert!(info.type_info_size > 0);
        assert_eq!(info.creation_time, 0);

        // The query's own reference is gone
        assert_eq!(unsafe { body.header().as_ref() }.pointer_count(), 2);

        let mut wrong = [0u8; ObjectBasicInformation::SIZE + 1];
        let result = ob.query_object(handle, 0, &mut wrong, Some(&mut length), ProcessorMode::UserMode);
        assert_eq!(result, Err(NtStatus::InfoLengthMismatch));
        assert_eq!(length as usize, ObjectBasicInformation::SIZE);

        services.remove_handle(handle);
        ob.decrement_handle_count(body, 1, 0x1F0003);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
    }

    #[test]
    fn test_symbolic_link_creation_time() {
        let (ob, services) = test_manager();
        services.set_time(1234);
        let chars = wide("Link");
        let name = UnicodeString::from_slice(&chars);
        let attributes = ObjectAttributes::new(Some(&name), ObjectAttributeFlags::empty(), 0, None);
        let link = unsafe { ob.create_symbolic_link(&attributes, ProcessorMode::KernelMode, "\\Target") }.unwrap();
        let handle = services.insert_handle(link, 1, 0);

        let mut buffer = [0u8; ObjectBasicInformation::SIZE];
        ob.query_object(handle, 0, &mut buffer, None, ProcessorMode::UserMode).unwrap();
        assert_eq!(ObjectBasicInformation::from_bytes(&buffer).unwrap().creation_time, 1234);

        services.remove_handle(handle);
        ob.dereference_object(link);
        ob.process_deferred_deletes();
    }

    #[test]
    fn test_type_information() {
        let (ob, services) = test_manager();
        let event = ob
            .create_object_type(
                "Event",
                ObjectTypeInitializer {
                    valid_access_mask: 0x1F0003,
                    ..Default::default()
                },
            )
            .unwrap();
        let body = ob.create_test_object(event, None).unwrap();
        let handle = services.insert_handle(body, 0, 0);

        let mut length = 0;
        let mut buffer = [0u8; 256];
        ob.query_object(handle, 2, &mut buffer, Some(&mut length), ProcessorMode::UserMode)
            .unwrap();
        let info = unsafe { ptr::read_unaligned(buffer.as_ptr() as *const ObjectTypeInformation) };
        assert_eq!(info.total_number_of_objects, 1);
        assert_eq!(info.valid_access_mask, 0x1F0003);
        assert_eq!(counted_chars::<ObjectTypeInformation>(&buffer, info.type_name), wide("Event"));
        assert_eq!(length as usize, size_of::<ObjectTypeInformation>() + 12);

        services.remove_handle(handle);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
    }

    #[test]
    fn test_handle_information_and_classes() {
        let (ob, services) = test_manager();
        let event = ob.create_object_type("Event", ObjectTypeInitializer::default()).unwrap();
        let body = ob.create_test_object(event, None).unwrap();
        let handle = services.insert_handle(body, 0, 0);

        let set = HandleAttributeInformation {
            inherit: true,
            protect_from_close: true,
        };
        ob.set_information_object(handle, 4, &set.to_bytes(), ProcessorMode::UserMode)
            .unwrap();

        let mut buffer = [0u8; 2];
        ob.query_object(handle, 4, &mut buffer, None, ProcessorMode::UserMode).unwrap();
        assert_eq!(HandleAttributeInformation::from_bytes(&buffer), Some(set));

        assert_eq!(
            ob.set_information_object(handle, 0, &[0, 0], ProcessorMode::UserMode),
            Err(NtStatus::InvalidInfoClass)
        );
        assert_eq!(
            ob.set_information_object(handle, 4, &[0, 0, 0], ProcessorMode::UserMode),
            Err(NtStatus::InfoLengthMismatch)
        );
        let mut wide_buffer = [0u8; 3];
        assert_eq!(
            ob.query_object(handle, 4, &mut wide_buffer, None, ProcessorMode::UserMode),
            Err(NtStatus::InfoLengthMismatch)
        );
        assert_eq!(
            ob.query_object(handle, 3, &mut buffer, None, ProcessorMode::UserMode),
            Err(NtStatus::NotImplemented)
        );
        assert_eq!(
            ob.query_object(handle, 99, &mut buffer, None, ProcessorMode::UserMode),
            Err(NtStatus::InvalidInfoClass)
        );
        assert_eq!(
            ob.query_object(0xDEAD, 0, &mut buffer, None, ProcessorMode::UserMode),
            Err(NtStatus::InvalidHandle)
        );

        // Every query dropped its bracket reference
        assert_eq!(unsafe { body.header().as_ref() }.pointer_count(), 1);

        services.remove_handle(handle);
        ob.dereference_object(body);
        ob.process_deferred_deletes();
    }
}
