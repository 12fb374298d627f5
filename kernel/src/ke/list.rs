//! Intrusive doubly-linked list (LIST_ENTRY)
//!
//! Used for the per-type instance list: every object whose type maintains a
//! type list carries a `ListEntry` in its Creator-Info prefix, chained off the
//! `type_list` head in the `ObjectType`.
//!
//! # Safety
//!
//! Entries are linked by raw pointer. The caller keeps each entry in at most
//! one list, keeps it alive while linked, and serializes access (the type's
//! lock for type lists).

use core::ptr;

/// Doubly-linked list entry, embedded in its containing structure
#[derive(Debug)]
#[repr(C)]
pub struct ListEntry {
    /// Forward link
    pub flink: *mut ListEntry,
    /// Backward link
    pub blink: *mut ListEntry,
}

impl ListEntry {
    /// An unlinked entry (both links null)
    pub const fn new() -> Self {
        Self {
            flink: ptr::null_mut(),
            blink: ptr::null_mut(),
        }
    }

    /// InitializeListHead(): an empty list points at itself
    #[inline]
    pub fn init_head(&mut self) {
        let this = self as *mut ListEntry;
        self.flink = this;
        self.blink = this;
    }

    /// IsListEmpty()
    ///
    /// An entry that was never initialized (null links) also counts as
    /// empty so callers can test for membership before unlinking.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flink.is_null() || ptr::eq(self.flink, self)
    }

    /// InsertTailList()
    ///
    /// # Safety
    /// `self` must be an initialized head and `entry` must not be linked.
    #[inline]
    pub unsafe fn insert_tail(&mut self, entry: *mut ListEntry) {
        let head = self as *mut ListEntry;
        let old_blink = self.blink;
        (*entry).flink = head;
        (*entry).blink = old_blink;
        (*old_blink).flink = entry;
        self.blink = entry;
    }

    /// RemoveEntryList(), leaving the entry as an empty self-linked head
    /// so a second removal is harmless
    ///
    /// # Safety
    /// The entry must currently be linked into a list.
    #[inline]
    pub unsafe fn remove_entry(&mut self) {
        let flink = self.flink;
        let blink = self.blink;
        (*blink).flink = flink;
        (*flink).blink = blink;
        self.init_head();
    }

    /// Number of entries linked after this head
    ///
    /// # Safety
    /// `self` must be an initialized head.
    pub unsafe fn len(&self) -> usize {
        self.iter().count()
    }

    /// Walk the entries after this head
    ///
    /// # Safety
    /// `self` must be an initialized head, and the list must not change while
    /// the iterator is alive.
    pub unsafe fn iter(&self) -> ListIter<'_> {
        ListIter {
            head: self,
            current: self.flink,
        }
    }
}

impl Default for ListEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the raw entries of a list
pub struct ListIter<'a> {
    head: &'a ListEntry,
    current: *mut ListEntry,
}

impl Iterator for ListIter<'_> {
    type Item = *mut ListEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_null() || ptr::eq(self.current, self.head) {
            return None;
        }
        let entry = self.current;
        // SAFETY: the list is initialized and not mutated while iterating
        self.current = unsafe { (*entry).flink };
        Some(entry)
    }
}

/// Pointer to the containing structure of an embedded list entry
/// (CONTAINING_RECORD)
#[macro_export]
macro_rules! containing_record {
    ($ptr:expr, $type:ty, $field:ident) => {{
        let offset = core::mem::offset_of!($type, $field);
        ($ptr as *mut u8).sub(offset) as *mut $type
    }};
}
