//! NT Counted Strings (UNICODE_STRING)
//!
//! Object and type names are UTF-16 counted strings: `length` is the byte
//! count of the content, `maximum_length` the byte capacity of the buffer.
//! Strings captured by the object manager are additionally null-terminated,
//! so their `maximum_length` is `length + 2`.

use core::ptr;
use core::slice;

/// Size of one UTF-16 code unit in bytes
pub const WCHAR_SIZE: usize = core::mem::size_of::<u16>();

/// Largest byte length a UNICODE_STRING can describe
pub const MAX_USTRING: u16 = u16::MAX;

/// Unicode (wide) string - UTF-16LE
///
/// Equivalent to NT's UNICODE_STRING
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UnicodeString {
    /// Current length in bytes (not characters)
    pub length: u16,
    /// Maximum length in bytes (buffer capacity)
    pub maximum_length: u16,
    /// Pointer to UTF-16 buffer
    pub buffer: *mut u16,
}

// Safety: a UnicodeString is a plain descriptor; ownership of the buffer is
// tracked by whoever allocated it
unsafe impl Send for UnicodeString {}
unsafe impl Sync for UnicodeString {}

impl UnicodeString {
    /// Create an empty unicode string (null buffer)
    pub const fn empty() -> Self {
        Self {
            length: 0,
            maximum_length: 0,
            buffer: ptr::null_mut(),
        }
    }

    /// Describe an existing UTF-16 slice
    ///
    /// The string borrows `chars`; the caller keeps it alive while the
    /// descriptor is in use.
    pub fn from_slice(chars: &[u16]) -> Self {
        let bytes = (chars.len() * WCHAR_SIZE).min(MAX_USTRING as usize) as u16;
        Self {
            length: bytes,
            maximum_length: bytes,
            buffer: chars.as_ptr() as *mut u16,
        }
    }

    /// Create a descriptor from raw parts
    ///
    /// # Safety
    /// `buffer` must hold at least `max_length` bytes when non-null
    pub const unsafe fn from_raw_parts(buffer: *mut u16, length: u16, max_length: u16) -> Self {
        Self {
            length,
            maximum_length: max_length,
            buffer,
        }
    }

    /// True when there is no content
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True when the descriptor has a buffer at all
    #[inline]
    pub fn has_buffer(&self) -> bool {
        !self.buffer.is_null()
    }

    /// Length in characters
    #[inline]
    pub fn char_len(&self) -> usize {
        (self.length as usize) / WCHAR_SIZE
    }

    /// Content as a slice (without any terminator)
    pub fn as_slice(&self) -> &[u16] {
        if self.buffer.is_null() || self.length == 0 {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.buffer, self.char_len()) }
        }
    }

    /// Compare two strings, case-sensitive
    pub fn equals(&self, other: &UnicodeString) -> bool {
        self.length == other.length && self.as_slice() == other.as_slice()
    }

    /// Compare two strings, case-insensitive (OBJ_CASE_INSENSITIVE)
    pub fn equals_ignore_case(&self, other: &UnicodeString) -> bool {
        self.length == other.length
            && self
                .as_slice()
                .iter()
                .zip(other.as_slice())
                .all(|(&a, &b)| rtl_upcase_unicode_char(a) == rtl_upcase_unicode_char(b))
    }

    /// Compare against a Rust string literal, case-sensitive
    pub fn eq_str(&self, s: &str) -> bool {
        let mut chars = self.as_slice().iter().copied();
        s.encode_utf16().all(|c| chars.next() == Some(c)) && chars.next().is_none()
    }

    /// Case-insensitive hash used for directory buckets
    pub fn hash_ignore_case(&self) -> u32 {
        self.as_slice().iter().fold(0u32, |hash, &c| {
            hash.wrapping_mul(31)
                .wrapping_add(rtl_upcase_unicode_char(c) as u32)
        })
    }
}

impl Default for UnicodeString {
    fn default() -> Self {
        Self::empty()
    }
}

/// Upcase a UTF-16 code unit (ASCII and Latin-1 letters)
pub fn rtl_upcase_unicode_char(c: u16) -> u16 {
    match c {
        0x61..=0x7A => c - 0x20,
        0xE0..=0xFE if c != 0xF7 => c - 0x20,
        _ => c,
    }
}

/// Case-insensitive compare of two Rust strings, folding the same way as
/// [`UnicodeString::equals_ignore_case`]
pub fn str_equals_ignore_case(a: &str, b: &str) -> bool {
    let mut rest = b.encode_utf16();
    a.encode_utf16()
        .all(|c| rest.next().map(rtl_upcase_unicode_char) == Some(rtl_upcase_unicode_char(c)))
        && rest.next().is_none()
}

/// RtlInitUnicodeString() over a null-terminated buffer, or an empty
/// string for a null source
///
/// # Safety
/// `source`, when non-null, must point to a null-terminated UTF-16 string.
pub unsafe fn rtl_init_unicode_string(dest: &mut UnicodeString, source: *const u16) {
    if source.is_null() {
        *dest = UnicodeString::empty();
        return;
    }
    let mut len = 0usize;
    while *source.add(len) != 0 && len < (MAX_USTRING as usize / WCHAR_SIZE) - 1 {
        len += 1;
    }
    let bytes = (len * WCHAR_SIZE) as u16;
    *dest = UnicodeString::from_raw_parts(source as *mut u16, bytes, bytes + WCHAR_SIZE as u16);
}
