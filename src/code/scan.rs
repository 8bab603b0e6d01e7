//! # Scan
//!
//! Measures how many bytes of a prologue a jump patch displaces, by decoding
//! whole instructions until the patch size is covered

use iced_x86::{Decoder, DecoderOptions, FlowControl, Instruction};

use crate::error::{Error, Result};

/// Number of bytes a caller should make readable when asking for a
/// measurement: the patch size plus one maximal x86 instruction
pub const SCAN_WINDOW: usize = crate::code::JMP_REL_SIZE + 15;

/// Returns the smallest instruction-aligned byte count of `code` covering at
/// least `min` bytes.
///
/// The displaced bytes are later copied verbatim into a trampoline, so any
/// instruction that is not straight-line (a branch, call or return would
/// carry a meaning tied to its address) is refused.
///
/// # Errors
///
/// [`Error::InvalidArgument`] when `code` is exhausted or undecodable before
/// `min` bytes are covered; [`Error::Unsupported`] when a non-straight-line
/// instruction lies within the first `min` bytes.
pub fn displaced_len(code: &[u8], min: usize) -> Result<usize> {
    let mut decoder = Decoder::with_ip(32, code, 0, DecoderOptions::NONE);
    let mut instruction = Instruction::default();
    let mut len = 0;

    while len < min {
        if !decoder.can_decode() {
            return Err(Error::InvalidArgument(
                "prologue ended before the patch size was covered",
            ));
        }
        decoder.decode_out(&mut instruction);
        if instruction.is_invalid() {
            return Err(Error::InvalidArgument(
                "prologue contains undecodable bytes",
            ));
        }
        if instruction.flow_control() != FlowControl::Next {
            return Err(Error::Unsupported(
                "prologue branches within the displaced bytes",
            ));
        }
        len += instruction.len();
    }

    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_the_patch_with_whole_instructions() {
        // mov eax, [esp+4]; sub eax, [esp+8]; ret
        let code = [0x8B, 0x44, 0x24, 0x04, 0x2B, 0x44, 0x24, 0x08, 0xC3];
        assert_eq!(displaced_len(&code, 5).unwrap(), 8);
    }

    #[test]
    fn exact_boundary_is_not_extended() {
        // sub eax, ebx; nop; nop; nop; ret
        let code = [0x2B, 0xC3, 0x90, 0x90, 0x90, 0xC3];
        assert_eq!(displaced_len(&code, 5).unwrap(), 5);
    }

    #[test]
    fn refuses_branches_in_the_displaced_bytes() {
        // call rel32; ret
        let code = [0xE8, 0x00, 0x00, 0x00, 0x00, 0xC3];
        assert!(matches!(
            displaced_len(&code, 5),
            Err(Error::Unsupported(_))
        ));

        // push ebp; jz rel8; ...
        let code = [0x55, 0x74, 0x10, 0x90, 0x90, 0x90];
        assert!(matches!(
            displaced_len(&code, 5),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn refuses_a_returning_prologue() {
        // sub eax, ebx; ret — too short to displace a jump patch
        let code = [0x2B, 0xC3, 0xC3, 0x90, 0x90, 0x90];
        assert!(matches!(
            displaced_len(&code, 5),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn refuses_exhausted_code() {
        let code = [0x90, 0x90];
        assert!(matches!(
            displaced_len(&code, 5),
            Err(Error::InvalidArgument(_))
        ));
    }
}
