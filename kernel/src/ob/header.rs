//! Object Header Implementation
//!
//! Every kernel object is preceded by an OBJECT_HEADER that contains
//! metadata about the object including type, reference counts, and
//! optional information like name and security descriptor.
//!
//! # Memory Layout
//! ```text
//! +-------------------+  <- allocation base (lowest present block)
//! | Handle Info       |  (type maintains handle counts)
//! +-------------------+
//! | Name Info         |  (object was created with a name)
//! +-------------------+
//! | Creator Info      |  (type maintains a type list)
//! +-------------------+
//! | OBJECT_HEADER     |
//! +-------------------+
//! | Object Body       |  <- what callers hold
//! +-------------------+
//! ```
//!
//! Every block is 16-byte aligned, so the body is too. The header records
//! byte offsets back to Name Info and Handle Info (0 = absent) and a flag
//! for Creator Info, which is always directly before the header. Walking
//! back from a body to the allocation base uses only those fields.

use alloc::boxed::Box;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::mem::size_of;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicIsize, AtomicPtr, AtomicU8, Ordering};
use spin::Mutex;

use super::directory::ObjectDirectory;
use super::object_type::ObjectType;
use crate::ke::ListEntry;
use crate::rtl::UnicodeString;
use crate::se::CapturedSecurityDescriptor;

bitflags! {
    /// Object header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectHeaderFlags: u8 {
        /// Header owns create information not yet consumed
        const CREATE_INFO = 0x01;
        /// Created by a kernel-mode caller
        const KERNEL_MODE = 0x02;
        /// Creator Info block present
        const CREATOR_INFO = 0x04;
        /// Exclusive object
        const EXCLUSIVE = 0x08;
        /// Not deleted when the pointer count reaches 0
        const PERMANENT = 0x10;
        /// Security descriptor assigned
        const SECURITY = 0x20;
        /// Handle Info block present
        const SINGLE_PROCESS = 0x40;
        /// Claimed for deletion
        const DEFER_DELETE = 0x80;
    }
}

/// Pointer to an object body
///
/// This is what every object manager caller holds. It does not own a
/// reference by itself; references are taken and released explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectBody(NonNull<u8>);

// SAFETY: objects are shared across processors; their counts are atomic
unsafe impl Send for ObjectBody {}
unsafe impl Sync for ObjectBody {}

impl ObjectBody {
    /// # Safety
    /// `ptr` must be the body of a live object created by the object manager.
    pub const unsafe fn from_raw(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[inline]
    pub fn cast<T>(self) -> *mut T {
        self.0.as_ptr() as *mut T
    }

    /// The header of this object
    #[inline]
    pub fn header(self) -> NonNull<ObjectHeader> {
        // SAFETY: every body is immediately preceded by its header
        unsafe { NonNull::new_unchecked(ObjectHeader::from_body(self.0.as_ptr())) }
    }
}

/// One process's handle count on an object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectHandleCountEntry {
    /// Unique process id
    pub process: usize,
    pub handle_count: u32,
}

/// Per-process handle counts, allocated once a second process opens a handle
#[derive(Debug, Default)]
pub struct ObjectHandleCountDatabase {
    pub entries: Vec<ObjectHandleCountEntry>,
}

#[derive(Debug, Default)]
pub struct HandleCountState {
    pub single_entry: ObjectHandleCountEntry,
    pub database: Option<NonNull<ObjectHandleCountDatabase>>,
}

// SAFETY: the database is only reached through the owning mutex
unsafe impl Send for HandleCountState {}

/// Handle Info prefix (OBJECT_HEADER_HANDLE_INFO)
#[repr(C, align(16))]
pub struct ObjectHeaderHandleInfo {
    pub state: Mutex<HandleCountState>,
}

/// Name Info prefix (OBJECT_HEADER_NAME_INFO)
#[repr(C, align(16))]
pub struct ObjectHeaderNameInfo {
    /// Directory the object is inserted in (null if none)
    pub directory: AtomicPtr<ObjectDirectory>,
    /// Pool-allocated, null-terminated name
    pub name: UnicodeString,
}

/// Creator Info prefix (OBJECT_HEADER_CREATOR_INFO)
#[repr(C, align(16))]
pub struct ObjectHeaderCreatorInfo {
    /// Link in the type's instance list
    pub type_list: ListEntry,
    pub creator_unique_process: usize,
}

/// Object header - precedes every kernel object body
#[repr(C, align(16))]
pub struct ObjectHeader {
    pointer_count: AtomicIsize,
    handle_count: AtomicIsize,
    /// Reap list link
    pub(crate) next_to_free: AtomicPtr<ObjectHeader>,
    /// Null only for the type of types while it is being built
    pub(crate) object_type: *const ObjectType,
    /// Bytes from the header back to Name Info (0 = absent)
    pub(crate) name_info_offset: u8,
    /// Bytes from the header back to Handle Info (0 = absent)
    pub(crate) handle_info_offset: u8,
    flags: AtomicU8,
    pub(crate) paged_pool_charge: u32,
    pub(crate) non_paged_pool_charge: u32,
    /// Create information, owned until consumed (CREATE_INFO flag)
    pub(crate) object_create_info: AtomicPtr<super::attributes::ObjectCreateInformation>,
    pub(crate) security_descriptor: Mutex<Option<Box<CapturedSecurityDescriptor>>>,
}

// SAFETY: counts and flags are atomic, the rest is set before publication
unsafe impl Sync for ObjectHeader {}
unsafe impl Send for ObjectHeader {}

const _: () = {
    assert!(size_of::<ObjectHeader>() % 16 == 0);
    assert!(size_of::<ObjectHeaderHandleInfo>() % 16 == 0);
    assert!(size_of::<ObjectHeaderNameInfo>() % 16 == 0);
    assert!(size_of::<ObjectHeaderCreatorInfo>() % 16 == 0);
    // Every offset must fit the u8 fields
    assert!(
        size_of::<ObjectHeaderHandleInfo>()
            + size_of::<ObjectHeaderNameInfo>()
            + size_of::<ObjectHeaderCreatorInfo>()
            <= u8::MAX as usize
    );
};

impl ObjectHeader {
    /// Header of an object body
    ///
    /// # Safety
    /// `body` must be an object body.
    #[inline]
    pub unsafe fn from_body<T>(body: *const T) -> *mut ObjectHeader {
        (body as *mut u8).sub(size_of::<ObjectHeader>()) as *mut ObjectHeader
    }

    /// The object body (immediately follows the header)
    #[inline]
    pub fn body(&self) -> ObjectBody {
        // SAFETY: the body directly follows the header in the same block
        unsafe {
            ObjectBody(NonNull::new_unchecked(
                (self as *const Self as *mut u8).add(size_of::<Self>()),
            ))
        }
    }

    #[inline]
    pub fn pointer_count(&self) -> isize {
        self.pointer_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn handle_count(&self) -> isize {
        self.handle_count.load(Ordering::Acquire)
    }

    /// Returns the new count
    #[inline]
    pub(crate) fn increment_pointer_count(&self) -> isize {
        self.pointer_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new count; AcqRel so the zero crossing sees all prior writes
    #[inline]
    pub(crate) fn decrement_pointer_count(&self) -> isize {
        self.pointer_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    #[inline]
    pub(crate) fn increment_handle_count(&self) -> isize {
        self.handle_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub(crate) fn decrement_handle_count(&self) -> isize {
        self.handle_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    #[inline]
    pub fn flags(&self) -> ObjectHeaderFlags {
        ObjectHeaderFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn has_flag(&self, flag: ObjectHeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    /// Set flags, returning the previous value
    #[inline]
    pub(crate) fn set_flags(&self, flags: ObjectHeaderFlags) -> ObjectHeaderFlags {
        ObjectHeaderFlags::from_bits_retain(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Clear flags, returning the previous value
    #[inline]
    pub(crate) fn clear_flags(&self, flags: ObjectHeaderFlags) -> ObjectHeaderFlags {
        ObjectHeaderFlags::from_bits_retain(self.flags.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    #[inline]
    pub fn is_permanent(&self) -> bool {
        self.has_flag(ObjectHeaderFlags::PERMANENT)
    }

    /// The object's type (None only mid-bootstrap)
    #[inline]
    pub fn object_type(&self) -> Option<&ObjectType> {
        // SAFETY: types are permanent and outlive their instances
        unsafe { self.object_type.as_ref() }
    }

    #[inline]
    pub fn paged_pool_charge(&self) -> u32 {
        self.paged_pool_charge
    }

    #[inline]
    pub fn non_paged_pool_charge(&self) -> u32 {
        self.non_paged_pool_charge
    }

    /// OBJECT_HEADER_TO_NAME_INFO
    #[inline]
    pub fn name_info(&self) -> Option<NonNull<ObjectHeaderNameInfo>> {
        if self.name_info_offset == 0 {
            return None;
        }
        let header = self as *const Self as *mut u8;
        // SAFETY: the offset was recorded at allocation and stays in the block
        unsafe { Some(NonNull::new_unchecked(header.sub(self.name_info_offset as usize).cast())) }
    }

    /// OBJECT_HEADER_TO_HANDLE_INFO
    #[inline]
    pub fn handle_info(&self) -> Option<NonNull<ObjectHeaderHandleInfo>> {
        if self.handle_info_offset == 0 {
            return None;
        }
        let header = self as *const Self as *mut u8;
        // SAFETY: as for name_info
        unsafe { Some(NonNull::new_unchecked(header.sub(self.handle_info_offset as usize).cast())) }
    }

    /// OBJECT_HEADER_TO_CREATOR_INFO
    #[inline]
    pub fn creator_info(&self) -> Option<NonNull<ObjectHeaderCreatorInfo>> {
        if !self.has_flag(ObjectHeaderFlags::CREATOR_INFO) {
            return None;
        }
        let header = self as *const Self as *mut u8;
        // SAFETY: Creator Info sits directly before the header when flagged
        unsafe {
            Some(NonNull::new_unchecked(
                header.sub(size_of::<ObjectHeaderCreatorInfo>()).cast(),
            ))
        }
    }

    /// The object's name (empty if unnamed or already cleared)
    pub fn name(&self) -> UnicodeString {
        match self.name_info() {
            // SAFETY: Name Info lives as long as the header
            Some(info) => unsafe { (*info.as_ptr()).name },
            None => UnicodeString::empty(),
        }
    }

    /// Directory the object is inserted in, if any
    pub fn directory(&self) -> Option<NonNull<ObjectDirectory>> {
        let info = self.name_info()?;
        // SAFETY: as for name()
        NonNull::new(unsafe { (*info.as_ptr()).directory.load(Ordering::Acquire) })
    }

    /// Length of the assigned security descriptor (0 if none)
    pub fn security_descriptor_length(&self) -> u32 {
        self.security_descriptor.lock().as_ref().map_or(0, |sd| sd.length())
    }
}

/// Header Layout Composer
///
/// Sizes and offsets for one object, derived from the type's capabilities
/// and whether the object is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeaderLayout {
    pub handle_info: bool,
    pub name_info: bool,
    pub creator_info: bool,
    pub body_size: usize,
}

impl ObjectHeaderLayout {
    pub const fn new(maintain_handle_count: bool, named: bool, maintain_type_list: bool, body_size: usize) -> Self {
        Self {
            handle_info: maintain_handle_count,
            name_info: named,
            creator_info: maintain_type_list,
            body_size,
        }
    }

    const fn handle_size(&self) -> usize {
        if self.handle_info {
            size_of::<ObjectHeaderHandleInfo>()
        } else {
            0
        }
    }

    const fn name_size(&self) -> usize {
        if self.name_info {
            size_of::<ObjectHeaderNameInfo>()
        } else {
            0
        }
    }

    const fn creator_size(&self) -> usize {
        if self.creator_info {
            size_of::<ObjectHeaderCreatorInfo>()
        } else {
            0
        }
    }

    /// Bytes before the header
    pub const fn prefix_size(&self) -> usize {
        self.handle_size() + self.name_size() + self.creator_size()
    }

    /// Bytes from the allocation base to the body
    pub const fn header_size(&self) -> usize {
        self.prefix_size() + size_of::<ObjectHeader>()
    }

    /// Whole allocation (None on overflow)
    pub const fn total_size(&self) -> Option<usize> {
        self.header_size().checked_add(self.body_size)
    }

    pub const fn name_info_offset(&self) -> u8 {
        if self.name_info {
            (self.name_size() + self.creator_size()) as u8
        } else {
            0
        }
    }

    pub const fn handle_info_offset(&self) -> u8 {
        if self.handle_info {
            (self.handle_size() + self.name_size() + self.creator_size()) as u8
        } else {
            0
        }
    }

    /// Presence flags recorded in the header
    pub fn flags(&self) -> ObjectHeaderFlags {
        let mut flags = ObjectHeaderFlags::empty();
        if self.handle_info {
            flags |= ObjectHeaderFlags::SINGLE_PROCESS;
        }
        if self.creator_info {
            flags |= ObjectHeaderFlags::CREATOR_INFO;
        }
        flags
    }

    /// Lay out a fresh zeroed block: initialize every present prefix and the
    /// header, and return the header
    ///
    /// # Safety
    /// `base` must be a zeroed, 16-byte aligned block of `total_size()` bytes.
    pub(crate) unsafe fn initialize(
        &self,
        base: NonNull<u8>,
        object_type: *const ObjectType,
        name: UnicodeString,
        creator_process: usize,
        flags: ObjectHeaderFlags,
    ) -> NonNull<ObjectHeader> {
        let mut cursor = base.as_ptr();

        if self.handle_info {
            ptr::write(
                cursor as *mut ObjectHeaderHandleInfo,
                ObjectHeaderHandleInfo {
                    state: Mutex::new(HandleCountState::default()),
                },
            );
            cursor = cursor.add(size_of::<ObjectHeaderHandleInfo>());
        }

        if self.name_info {
            ptr::write(
                cursor as *mut ObjectHeaderNameInfo,
                ObjectHeaderNameInfo {
                    directory: AtomicPtr::new(ptr::null_mut()),
                    name,
                },
            );
            cursor = cursor.add(size_of::<ObjectHeaderNameInfo>());
        }

        if self.creator_info {
            let creator = cursor as *mut ObjectHeaderCreatorInfo;
            ptr::write(
                creator,
                ObjectHeaderCreatorInfo {
                    type_list: ListEntry::new(),
                    creator_unique_process: creator_process,
                },
            );
            (*creator).type_list.init_head();
            cursor = cursor.add(size_of::<ObjectHeaderCreatorInfo>());
        }

        let header = cursor as *mut ObjectHeader;
        ptr::write(
            header,
            ObjectHeader {
                pointer_count: AtomicIsize::new(1),
                handle_count: AtomicIsize::new(0),
                next_to_free: AtomicPtr::new(ptr::null_mut()),
                object_type,
                name_info_offset: self.name_info_offset(),
                handle_info_offset: self.handle_info_offset(),
                flags: AtomicU8::new((flags | self.flags()).bits()),
                paged_pool_charge: 0,
                non_paged_pool_charge: 0,
                object_create_info: AtomicPtr::new(ptr::null_mut()),
                security_descriptor: Mutex::new(None),
            },
        );

        NonNull::new_unchecked(header)
    }
}

/// Walk back from a body to the start of its allocation
///
/// Creator Info, then Name Info, then Handle Info: the last present block
/// checked is the lowest in memory. With none present the header itself is
/// the base.
pub fn locate_allocation_base(body: ObjectBody) -> NonNull<u8> {
    // SAFETY: ObjectBody always designates a live object
    let header = unsafe { body.header().as_ref() };
    let mut base = header as *const ObjectHeader as *mut u8;

    if let Some(creator) = header.creator_info() {
        base = creator.as_ptr().cast();
    }
    if let Some(name) = header.name_info() {
        base = name.as_ptr().cast();
    }
    if let Some(handle) = header.handle_info() {
        base = handle.as_ptr().cast();
    }

    // SAFETY: derived from a non-null header pointer
    unsafe { NonNull::new_unchecked(base) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::alloc::Layout;

    /// Lay out a block by hand, outside any allocator
    unsafe fn build(layout: ObjectHeaderLayout) -> (NonNull<u8>, ObjectBody, Layout) {
        let total = layout.total_size().unwrap();
        let alloc_layout = Layout::from_size_align(total, 16).unwrap();
        let base = NonNull::new(alloc::alloc::alloc_zeroed(alloc_layout)).unwrap();
        let header = layout.initialize(
            base,
            ptr::null(),
            UnicodeString::empty(),
            0,
            ObjectHeaderFlags::empty(),
        );
        (base, header.as_ref().body(), alloc_layout)
    }

    #[test]
    fn test_backward_walk_all_subsets() {
        for bits in 0..8u8 {
            let layout = ObjectHeaderLayout::new(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, 24);
            unsafe {
                let (base, body, alloc_layout) = build(layout);
                assert_eq!(locate_allocation_base(body), base, "subset {:03b}", bits);
                assert_eq!(body.as_ptr() as usize - base.as_ptr() as usize, layout.header_size());
                assert_eq!(body.as_ptr() as usize % 16, 0);

                let header = body.header().as_ref();
                assert_eq!(header.handle_info().is_some(), layout.handle_info);
                assert_eq!(header.name_info().is_some(), layout.name_info);
                assert_eq!(header.creator_info().is_some(), layout.creator_info);
                assert_eq!(header.has_flag(ObjectHeaderFlags::SINGLE_PROCESS), layout.handle_info);
                assert_eq!(header.pointer_count(), 1);
                assert_eq!(header.handle_count(), 0);

                ptr::drop_in_place(body.header().as_ptr());
                alloc::alloc::dealloc(base.as_ptr(), alloc_layout);
            }
        }
    }

    #[test]
    fn test_offsets() {
        let full = ObjectHeaderLayout::new(true, true, true, 0);
        let creator = size_of::<ObjectHeaderCreatorInfo>();
        let name = size_of::<ObjectHeaderNameInfo>();
        let handle = size_of::<ObjectHeaderHandleInfo>();
        assert_eq!(full.name_info_offset() as usize, name + creator);
        assert_eq!(full.handle_info_offset() as usize, handle + name + creator);

        let handle_only = ObjectHeaderLayout::new(true, false, false, 0);
        assert_eq!(handle_only.name_info_offset(), 0);
        assert_eq!(handle_only.handle_info_offset() as usize, handle);
        assert_eq!(handle_only.flags(), ObjectHeaderFlags::SINGLE_PROCESS);

        assert_eq!(ObjectHeaderLayout::new(false, false, false, usize::MAX).total_size(), None);
    }

    #[test]
    fn test_prefix_blocks_initialized() {
        let layout = ObjectHeaderLayout::new(true, true, true, 8);
        unsafe {
            let (base, body, alloc_layout) = build(layout);
            let header = body.header().as_ref();

            let creator = header.creator_info().unwrap().as_ptr();
            assert!((*creator).type_list.is_empty());
            assert!(header.directory().is_none());
            assert!(header.name().is_empty());
            assert_eq!((*header.handle_info().unwrap().as_ptr()).state.lock().single_entry.handle_count, 0);

            ptr::drop_in_place(body.header().as_ptr());
            alloc::alloc::dealloc(base.as_ptr(), alloc_layout);
        }
    }
}
