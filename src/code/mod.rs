//! # Code
//!
//! Machine-code facilities behind the hook engine: a small x86-32 encoder
//! for the handful of instruction forms the generated stubs need, and a
//! prologue scanner that measures how many whole instructions a jump patch
//! displaces

pub mod asm;
pub mod scan;

pub use asm::{Asm, Gpr};
pub use scan::displaced_len;

/// Byte length of a near relative jump (`E9 rel32`), the smallest patch a
/// hook can install
pub const JMP_REL_SIZE: usize = 5;
