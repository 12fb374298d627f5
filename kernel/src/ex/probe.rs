//! Executive Buffer Probing
//!
//! Validation of caller-supplied pointers before the kernel reads through
//! them. A user-mode pointer must be aligned for the data it designates, must
//! not wrap, and must lie entirely below `MM_USER_PROBE_ADDRESS`. A failed
//! probe is reported as a typed exception that converts into the status the
//! caller sees, never as a fault taken inside the kernel.
//!
//! Kernel-mode callers are trusted and are not probed, but a null pointer is
//! still rejected so a bad kernel caller gets `AccessViolation` rather than a
//! crash.

use core::mem::{align_of, size_of};
use core::ptr;

use crate::ke::ProcessorMode;
use crate::status::NtStatus;

/// Highest user-mode address + 1; anything at or above is kernel space
#[cfg(target_arch = "x86_64")]
pub const MM_USER_PROBE_ADDRESS: usize = 0x7FFF_FFFF_0000;

/// Highest user-mode address + 1 (48-bit user half on other 64-bit targets)
#[cfg(not(target_arch = "x86_64"))]
pub const MM_USER_PROBE_ADDRESS: usize = 0xFFFF_FFFF_0000;

/// Exception raised by a failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeException {
    /// Address out of the user range, wrapped, or null
    AccessViolation,
    /// Address not aligned to the required boundary
    DatatypeMisalignment,
}

impl From<ProbeException> for NtStatus {
    fn from(exception: ProbeException) -> Self {
        match exception {
            ProbeException::AccessViolation => NtStatus::AccessViolation,
            ProbeException::DatatypeMisalignment => NtStatus::DatatypeMisalignment,
        }
    }
}

/// Result of a probe operation
pub type ProbeResult = Result<(), ProbeException>;

/// ProbeForRead(): check that `[address, address + length)` is a readable
/// user-mode range aligned to `alignment`
///
/// A zero-length range always succeeds.
pub fn probe_for_read(address: usize, length: usize, alignment: usize) -> ProbeResult {
    debug_assert!(
        matches!(alignment, 1 | 2 | 4 | 8 | 16),
        "Invalid alignment: {}",
        alignment
    );

    if length == 0 {
        return Ok(());
    }

    if (address & (alignment - 1)) != 0 {
        return Err(ProbeException::DatatypeMisalignment);
    }

    let end_address = address
        .checked_add(length)
        .ok_or(ProbeException::AccessViolation)?;

    if address == 0 || end_address > MM_USER_PROBE_ADDRESS {
        return Err(ProbeException::AccessViolation);
    }

    Ok(())
}

/// Probe a single `T` for read access
pub fn probe_for_read_typed<T>(address: *const T) -> ProbeResult {
    probe_for_read(address as usize, size_of::<T>(), align_of::<T>())
}

/// Capture a `T` by value from caller memory
///
/// User-mode sources are probed first; a null source fails in either mode.
///
/// # Safety
/// For kernel-mode callers `source` must point to a readable `T`. For
/// user-mode callers the probe bounds the range, and the caller's address
/// space must back it.
pub unsafe fn probe_and_read<T: Copy>(source: *const T, mode: ProcessorMode) -> Result<T, NtStatus> {
    if source.is_null() {
        return Err(NtStatus::AccessViolation);
    }
    if mode == ProcessorMode::UserMode {
        probe_for_read_typed(source)?;
    }
    Ok(ptr::read(source))
}

/// Copy `count` elements from caller memory into a kernel buffer
///
/// # Safety
/// `dest` must be valid for `count` writes; `source` as for
/// [`probe_and_read`].
pub unsafe fn probe_and_copy<T: Copy>(
    source: *const T,
    count: usize,
    mode: ProcessorMode,
    dest: *mut T,
) -> Result<(), NtStatus> {
    if count == 0 {
        return Ok(());
    }
    if source.is_null() {
        return Err(NtStatus::AccessViolation);
    }
    if mode == ProcessorMode::UserMode {
        let length = count
            .checked_mul(size_of::<T>())
            .ok_or(ProbeException::AccessViolation)?;
        probe_for_read(source as usize, length, align_of::<T>())?;
    }
    ptr::copy_nonoverlapping(source, dest, count);
    Ok(())
}
