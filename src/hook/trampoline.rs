//! # Trampoline
//!
//! Builds the standalone callable copy of a displaced prologue: the
//! displaced bytes verbatim, followed by a jump to the first instruction the
//! patch left untouched

use crate::alloc::{allocate_executable, ExecutableMemory};
use crate::code::{Asm, JMP_REL_SIZE};
use crate::error::Result;
use crate::patch;

/// Copies the first `displaced_len` bytes of `original` into fresh
/// executable memory and appends a jump to `original + displaced_len`.
///
/// # Safety
///
/// `original` must be readable for `displaced_len` bytes, and those bytes
/// must hold whole instructions free of PC-relative operands; they are
/// copied without relocation.
pub(crate) unsafe fn build(original: usize, displaced_len: usize) -> Result<ExecutableMemory> {
    let mut memory = allocate_executable(displaced_len + JMP_REL_SIZE)?;

    // Safety: caller guarantees the prologue is readable
    let prologue = unsafe { patch::read_code(original as *const u8, displaced_len) };

    let mut asm = Asm::new(memory.address());
    asm.raw(&prologue);
    asm.jmp(original + displaced_len);

    memory.copy_from_slice(&asm.finish());
    Ok(memory)
}
