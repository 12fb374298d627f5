//! I/O Manager (io)
//!
//! Only the file object layout is needed here: the "File" object type
//! exposes the event embedded in each file object as its wait object.

pub mod file;

pub use file::{FileObject, FILE_OBJECT_EVENT_OFFSET};
