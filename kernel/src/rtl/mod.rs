//! Runtime Library (rtl)
//!
//! Counted UTF-16 strings as used for object and type names.

pub mod string;

pub use string::{rtl_init_unicode_string, rtl_upcase_unicode_char, str_equals_ignore_case, UnicodeString};
