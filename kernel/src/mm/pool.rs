//! Kernel Pool Allocator
//!
//! NT uses pool allocators for dynamic kernel memory:
//!
//! - **NonPagedPool**: Cannot be paged out, usable from any context
//! - **PagedPool**: Can be paged to disk
//!
//! # Pool Tags
//! Each allocation has a 4-character tag for debugging and leak detection.
//! A block must be freed with the tag it was allocated with; a free with a
//! different tag is refused and counted as a tag mismatch.
//!
//! # Implementation
//! Each block is prefixed by a 16-byte `PoolHeader` recording size, tag and
//! pool type, so the caller's memory is always 16-byte aligned. Memory comes
//! from the global allocator; blocks are returned zeroed.

use core::alloc::Layout;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::ex::pooltag::PoolTagTable;
use crate::status::NtStatus;

/// Pool types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PoolType {
    /// Non-paged pool (always resident)
    #[default]
    NonPagedPool = 0,
    /// Paged pool (can be paged out)
    PagedPool = 1,
    /// Non-paged pool, non-executable
    NonPagedPoolNx = 2,
    /// Paged pool, non-executable
    PagedPoolNx = 3,
}

impl PoolType {
    #[inline]
    pub const fn is_paged(self) -> bool {
        matches!(self, PoolType::PagedPool | PoolType::PagedPoolNx)
    }
}

/// Pool tag (4 characters)
pub type PoolTag = u32;

/// Create a pool tag from 4 ASCII characters
pub const fn make_tag(a: u8, b: u8, c: u8, d: u8) -> PoolTag {
    ((d as u32) << 24) | ((c as u32) << 16) | ((b as u32) << 8) | (a as u32)
}

/// Object manager pool tags
pub mod pool_tags {
    use super::{make_tag, PoolTag};

    /// Objects allocated before their type exists (the type of types)
    pub const TAG_OBJECT_TYPE: PoolTag = make_tag(b'O', b'b', b'j', b'T');
    /// Captured object names
    pub const TAG_OBJECT_NAME: PoolTag = make_tag(b'O', b'b', b'N', b'm');
    /// Object create information
    pub const TAG_CREATE_INFO: PoolTag = make_tag(b'O', b'b', b'C', b'I');
    /// Per-process handle count databases
    pub const TAG_HANDLE_DB: PoolTag = make_tag(b'O', b'b', b'H', b'c');
}

/// Pool allocation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Zero-byte request
    ZeroSize,
    /// Request too large to describe
    SizeTooLarge,
    /// Backing allocator is exhausted
    OutOfMemory,
    /// Failed by the fault injector
    FaultInjected,
    /// Freed with a tag other than the allocation tag
    TagMismatch { expected: PoolTag, found: PoolTag },
}

impl From<PoolError> for NtStatus {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::TagMismatch { .. } => NtStatus::InvalidParameter,
            _ => NtStatus::InsufficientResources,
        }
    }
}

/// Pool block header
#[repr(C, align(16))]
struct PoolHeader {
    /// Caller-visible size of this block
    size: usize,
    /// Pool tag
    tag: PoolTag,
    /// Pool type
    pool_type: PoolType,
    /// Flags
    flags: u8,
    _reserved: u16,
}

impl PoolHeader {
    const SIZE: usize = 16;
    const ALLOCATED: u8 = 0x01;
}

const _: () = assert!(core::mem::size_of::<PoolHeader>() == PoolHeader::SIZE);

/// Fail the next `remaining` allocations, optionally only for one tag
#[derive(Debug, Clone, Copy)]
struct FaultInjection {
    tag: Option<PoolTag>,
    remaining: usize,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub paged_bytes: usize,
    pub non_paged_bytes: usize,
    pub allocation_count: usize,
    pub free_count: usize,
    pub fault_injections: usize,
    pub tag_mismatches: usize,
}

/// Tagged pool allocator
pub struct PoolAllocator {
    tags: PoolTagTable,
    paged_bytes: AtomicUsize,
    non_paged_bytes: AtomicUsize,
    allocations: AtomicUsize,
    frees: AtomicUsize,
    fault_injections: AtomicUsize,
    tag_mismatches: AtomicUsize,
    fault: Mutex<Option<FaultInjection>>,
}

impl PoolAllocator {
    pub const fn new() -> Self {
        Self {
            tags: PoolTagTable::new(),
            paged_bytes: AtomicUsize::new(0),
            non_paged_bytes: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            fault_injections: AtomicUsize::new(0),
            tag_mismatches: AtomicUsize::new(0),
            fault: Mutex::new(None),
        }
    }

    fn layout_for(size: usize) -> Result<Layout, PoolError> {
        let total = size
            .checked_add(PoolHeader::SIZE)
            .ok_or(PoolError::SizeTooLarge)?;
        Layout::from_size_align(total, PoolHeader::SIZE).map_err(|_| PoolError::SizeTooLarge)
    }

    fn should_inject_fault(&self, tag: PoolTag) -> bool {
        let mut fault = self.fault.lock();
        let Some(injection) = fault.as_mut() else {
            return false;
        };
        if injection.tag.is_some_and(|t| t != tag) {
            return false;
        }
        injection.remaining -= 1;
        if injection.remaining == 0 {
            *fault = None;
        }
        true
    }

    fn bytes_counter(&self, pool_type: PoolType) -> &AtomicUsize {
        if pool_type.is_paged() {
            &self.paged_bytes
        } else {
            &self.non_paged_bytes
        }
    }

    /// ExAllocatePoolWithTag(): zeroed, 16-byte aligned memory
    pub fn allocate(&self, pool_type: PoolType, size: usize, tag: PoolTag) -> Result<NonNull<u8>, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }
        let layout = Self::layout_for(size)?;

        if self.should_inject_fault(tag) {
            self.fault_injections.fetch_add(1, Ordering::Relaxed);
            log::debug!("[MM] Injected pool failure for tag {:#010x} ({} bytes)", tag, size);
            return Err(PoolError::FaultInjected);
        }

        // SAFETY: layout has non-zero size
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            log::warn!("[MM] Pool exhausted allocating {} bytes, tag {:#010x}", size, tag);
            return Err(PoolError::OutOfMemory);
        }

        // SAFETY: base is valid for the header and suitably aligned
        unsafe {
            ptr::write(
                base as *mut PoolHeader,
                PoolHeader {
                    size,
                    tag,
                    pool_type,
                    flags: PoolHeader::ALLOCATED,
                    _reserved: 0,
                },
            );
        }

        self.bytes_counter(pool_type).fetch_add(size, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.tags.record_alloc(tag, size, pool_type.is_paged());

        // SAFETY: the block is PoolHeader::SIZE + size bytes long
        Ok(unsafe { NonNull::new_unchecked(base.add(PoolHeader::SIZE)) })
    }

    /// ExFreePoolWithTag()
    ///
    /// # Safety
    /// `block` must have been returned by `allocate` on this allocator and
    /// not yet freed.
    pub unsafe fn free_with_tag(&self, block: NonNull<u8>, tag: PoolTag) -> Result<(), PoolError> {
        let base = block.as_ptr().sub(PoolHeader::SIZE);
        let header = &mut *(base as *mut PoolHeader);

        if header.tag != tag {
            self.tag_mismatches.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "[MM] Pool free with wrong tag: block {:p} has {:#010x}, freed as {:#010x}",
                block.as_ptr(),
                header.tag,
                tag
            );
            return Err(PoolError::TagMismatch {
                expected: header.tag,
                found: tag,
            });
        }

        let size = header.size;
        let pool_type = header.pool_type;
        header.flags &= !PoolHeader::ALLOCATED;

        self.bytes_counter(pool_type).fetch_sub(size, Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.tags.record_free(tag, size);

        let layout = Self::layout_for(size)?;
        alloc::alloc::dealloc(base, layout);
        Ok(())
    }

    /// Allocate and initialize a `T` (at most 16-byte aligned)
    pub fn allocate_typed<T>(&self, pool_type: PoolType, tag: PoolTag, value: T) -> Result<NonNull<T>, PoolError> {
        debug_assert!(core::mem::align_of::<T>() <= PoolHeader::SIZE);
        let block = self.allocate(pool_type, core::mem::size_of::<T>().max(1), tag)?;
        let typed = block.cast::<T>();
        // SAFETY: fresh block, large enough and aligned for T
        unsafe { ptr::write(typed.as_ptr(), value) };
        Ok(typed)
    }

    /// Drop and free a `T` from `allocate_typed`
    ///
    /// # Safety
    /// As for `free_with_tag`; the value must not be used afterwards.
    pub unsafe fn free_typed<T>(&self, value: NonNull<T>, tag: PoolTag) -> Result<(), PoolError> {
        let header = &*(value.as_ptr() as *const u8).sub(PoolHeader::SIZE).cast::<PoolHeader>();
        if header.tag != tag {
            return self.free_with_tag(value.cast(), tag);
        }
        ptr::drop_in_place(value.as_ptr());
        self.free_with_tag(value.cast(), tag)
    }

    /// Tag recorded for a live block
    ///
    /// # Safety
    /// `block` must be a live block from this allocator.
    pub unsafe fn block_tag(&self, block: NonNull<u8>) -> PoolTag {
        (*(block.as_ptr().sub(PoolHeader::SIZE) as *const PoolHeader)).tag
    }

    /// Pool type recorded for a live block
    ///
    /// # Safety
    /// As for `block_tag`.
    pub unsafe fn block_pool_type(&self, block: NonNull<u8>) -> PoolType {
        (*(block.as_ptr().sub(PoolHeader::SIZE) as *const PoolHeader)).pool_type
    }

    /// Fail the next `count` allocations (of `tag` only, if given)
    pub fn inject_failures(&self, tag: Option<PoolTag>, count: usize) {
        *self.fault.lock() = if count == 0 {
            None
        } else {
            Some(FaultInjection { tag, remaining: count })
        };
    }

    /// Per-tag accounting
    pub fn tags(&self) -> &PoolTagTable {
        &self.tags
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            paged_bytes: self.paged_bytes.load(Ordering::Relaxed),
            non_paged_bytes: self.non_paged_bytes.load(Ordering::Relaxed),
            allocation_count: self.allocations.load(Ordering::Relaxed),
            free_count: self.frees.load(Ordering::Relaxed),
            fault_injections: self.fault_injections.load(Ordering::Relaxed),
            tag_mismatches: self.tag_mismatches.load(Ordering::Relaxed),
        }
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}
