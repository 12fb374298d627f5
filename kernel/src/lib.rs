//! Nostalgia OS Object Manager Core
//!
//! The NT-style Object Manager: allocation, naming, reference counting and
//! deferred deletion of every kernel-resident object behind a uniform
//! header/body façade.
//!
//! # Subsystems
//!
//! - **ob** - Object Manager: headers, types, capture, lifetime, query/set
//! - **ex** - Executive support: buffer probing, pool tag tracking, work queues
//! - **mm** - Pool allocator (paged / non-paged, tagged)
//! - **se** - Security descriptor capture, default object method, privileges
//! - **ke** - Processor mode, dispatcher events, intrusive lists
//! - **rtl** - Counted UTF-16 strings
//! - **io** - File object layout (embedded wait event)
//!
//! The crate is `no_std` + `alloc`; the embedding kernel provides the global
//! allocator and installs a `log` backend.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::new_without_default)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

extern crate alloc;

pub mod ex;
pub mod io;
pub mod ke;
pub mod mm;
pub mod ob;
pub mod rtl;
pub mod se;
pub mod status;

pub use status::{NtResult, NtStatus};
