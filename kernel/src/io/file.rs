//! File Object Layout
//!
//! File objects represent open instances of files or devices. They are the
//! highest-volume waitable object, so rather than sharing the system default
//! event they carry their own: the "File" object type points waiters at the
//! `event` field embedded in the body.

use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::ke::{EventType, KEvent};

/// File object flags
pub mod file_flags {
    /// Synchronous I/O
    pub const FO_SYNCHRONOUS_IO: u32 = 0x00000002;
    /// Cleanup complete
    pub const FO_CLEANUP_COMPLETE: u32 = 0x00004000;
    /// Delete on close
    pub const FO_DELETE_ON_CLOSE: u32 = 0x00010000;
    /// Handle created
    pub const FO_HANDLE_CREATED: u32 = 0x00040000;
}

/// File object body (FILE_OBJECT)
#[repr(C)]
pub struct FileObject {
    /// Type identifier
    pub type_id: u16,
    /// Size of structure
    pub size: u16,
    /// Device object this file is on (opaque to the object manager)
    pub device_object: *mut u8,
    /// FS context (opaque)
    pub fs_context: *mut u8,
    /// Final status from create
    pub final_status: i32,
    pub delete_pending: bool,
    /// File object flags
    pub flags: AtomicU32,
    /// Current byte offset for synchronous I/O
    pub current_byte_offset: AtomicU64,
    /// Signaled when I/O on the file completes
    pub event: KEvent,
}

impl FileObject {
    /// IO_TYPE_FILE
    pub const TYPE_ID: u16 = 5;

    pub const fn new() -> Self {
        Self {
            type_id: Self::TYPE_ID,
            size: core::mem::size_of::<Self>() as u16,
            device_object: ptr::null_mut(),
            fs_context: ptr::null_mut(),
            final_status: 0,
            delete_pending: false,
            flags: AtomicU32::new(0),
            current_byte_offset: AtomicU64::new(0),
            event: KEvent::with_state(EventType::Notification, false),
        }
    }

    pub fn set_flags(&self, flags: u32) {
        self.flags.fetch_or(flags, Ordering::Relaxed);
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        (self.flags.load(Ordering::Relaxed) & flag) != 0
    }
}

impl Default for FileObject {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the embedded wait event within a file object body
pub const FILE_OBJECT_EVENT_OFFSET: usize = core::mem::offset_of!(FileObject, event);
