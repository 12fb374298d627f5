//! Default Object Security Method
//!
//! Every object type has a security procedure. Types that keep their
//! security descriptor in the object header (all of them, unless they
//! supply their own procedure) use `se_default_object_method`, which works
//! on the header's descriptor slot.

use alloc::boxed::Box;

use super::descriptor::CapturedSecurityDescriptor;
use crate::status::{NtResult, NtStatus};

/// Operation requested of a security procedure
#[derive(Debug)]
pub enum SecurityOperation<'a> {
    /// Replace the object's descriptor with a copy of the given one
    SetSecurityDescriptor(&'a CapturedSecurityDescriptor),
    /// Copy the object's descriptor out (None if it has none)
    QuerySecurityDescriptor(&'a mut Option<CapturedSecurityDescriptor>),
    /// Release the object's descriptor (object deletion)
    DeleteSecurityDescriptor,
    /// Install the descriptor captured at creation time
    AssignSecurityDescriptor(Box<CapturedSecurityDescriptor>),
}

impl SecurityOperation<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            SecurityOperation::SetSecurityDescriptor(_) => "Set",
            SecurityOperation::QuerySecurityDescriptor(_) => "Query",
            SecurityOperation::DeleteSecurityDescriptor => "Delete",
            SecurityOperation::AssignSecurityDescriptor(_) => "Assign",
        }
    }
}

/// SeDefaultObjectMethod()
pub fn se_default_object_method(
    slot: &mut Option<Box<CapturedSecurityDescriptor>>,
    operation: SecurityOperation<'_>,
) -> NtResult<()> {
    match operation {
        SecurityOperation::SetSecurityDescriptor(descriptor) => {
            if !descriptor.is_valid() {
                return Err(NtStatus::InvalidSecurityDescr);
            }
            *slot = Some(Box::new(descriptor.clone()));
        }
        SecurityOperation::QuerySecurityDescriptor(out) => {
            *out = slot.as_deref().cloned();
        }
        SecurityOperation::DeleteSecurityDescriptor => {
            if let Some(descriptor) = slot.take() {
                super::descriptor::se_release_security_descriptor(descriptor);
            }
        }
        SecurityOperation::AssignSecurityDescriptor(descriptor) => {
            if slot.is_some() {
                log::warn!("[SE] Assigning a descriptor over an existing one");
            }
            *slot = Some(descriptor);
        }
    }
    Ok(())
}
