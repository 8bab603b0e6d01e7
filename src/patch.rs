//! # Patch
//!
//! Reads and overwrites live code bytes, lifting write protection for the
//! duration of the write

use std::ptr;

use region::Protection;

use crate::error::Result;

/// Copies `bytes` over `location`, making the pages writable for the
/// duration of the copy.
///
/// # Safety
///
/// `location` must be valid for `bytes.len()` bytes, and no other thread may
/// execute or access that range during the write.
pub unsafe fn write_code(location: *mut u8, bytes: &[u8]) -> Result<()> {
    // Safety: caller guarantees the range is valid
    let _guard = unsafe {
        region::protect_with_handle(location, bytes.len(), Protection::READ_WRITE_EXECUTE)?
    };
    // Safety: the guard made the range writable; caller guarantees validity
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), location, bytes.len());
    }
    Ok(())
}

/// Reads `len` bytes from `location`.
///
/// # Safety
///
/// `location` must be valid for reads of `len` bytes.
pub unsafe fn read_code(location: *const u8, len: usize) -> Vec<u8> {
    // Safety: caller guarantees the range is readable
    unsafe { std::slice::from_raw_parts(location, len) }.to_vec()
}
