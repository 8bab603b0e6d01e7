//! # Wrapper
//!
//! Emits the stub that receives control from the installed jump, converts
//! the unconventional incoming activation into a cdecl call to the user's
//! handler, and hands the handler's result back at the site the original
//! caller expects.
//!
//! The incoming return address and stack arguments are parked in the hook's
//! scratch words through absolute-memory operands, so the stub needs no
//! stack frame of its own.

use crate::code::{Asm, Gpr};
use crate::error::{Error, Result};
use crate::location::Location;
use crate::signature::Signature;

/// Fixed byte capacity of a wrapper allocation
pub(crate) const CAPACITY: usize = 512;

/// Number of 32-bit scratch words addressable from a wrapper
pub const SCRATCH_WORDS: usize = 32;

/// Emits wrapper code destined for `base`, converting the activation
/// described by `signature` into a cdecl call of the handler at `handler`.
///
/// `scratch` is the stable address of the hook's scratch words and
/// `float_result` whether the handler returns its result on the x87 stack.
pub(crate) fn emit(
    base: usize,
    signature: &Signature,
    handler: usize,
    scratch: usize,
    float_result: bool,
) -> Result<Vec<u8>> {
    emit_bounded(base, signature, handler, scratch, float_result, CAPACITY)
}

/// [`emit`] against an explicit capacity
fn emit_bounded(
    base: usize,
    signature: &Signature,
    handler: usize,
    scratch: usize,
    float_result: bool,
    capacity: usize,
) -> Result<Vec<u8>> {
    if !signature.convention().caller_cleanup() {
        return Err(Error::Unsupported(
            "only caller-cleanup conventions can be wrapped",
        ));
    }

    let argument_count = signature.arity();
    let stack_count = signature.stack_argument_count();
    let scratch_word = |index: usize| scratch + 4 * index;

    let mut asm = Asm::new(base);

    // park the return address in word 0
    asm.pop_mem(scratch_word(0));

    // park the caller's stack arguments in words 1..=k, first argument first
    for index in 1..=stack_count {
        asm.pop_mem(scratch_word(index));
    }

    // incoming register values survive below the handler frame
    asm.pushad();

    // rebuild the argument list right-to-left for the cdecl handler; the
    // reversed walk meets the last-declared stack argument first, so the
    // scratch cursor counts down from word k
    let mut stack_cursor = stack_count;
    for &location in signature.argument_locations().iter().rev() {
        if location == Location::Stack {
            asm.push_mem(scratch_word(stack_cursor));
            stack_cursor -= 1;
        } else {
            match Gpr::from_location(location) {
                Some(register) => asm.push_reg(register),
                None => {
                    return Err(Error::Unsupported(
                        "floating-point and byte-register argument locations cannot be wrapped",
                    ))
                }
            }
        }
    }

    asm.call(handler);

    // cdecl: the wrapper owns cleanup of the handler's argument block
    asm.add_esp(4 * argument_count as u8);

    if float_result {
        // the handler left its result on the x87 top, which is exactly the
        // one floating-point return site the wrapper can satisfy
        if signature.return_location(true) != Location::St0 {
            return Err(Error::Unsupported(
                "floating-point results can only be returned on the x87 top",
            ));
        }
        asm.popad();
    } else {
        let register = Gpr::from_location(signature.return_location(false)).ok_or(
            Error::Unsupported(
                "byte-register and x87 integer return locations cannot be wrapped",
            ),
        )?;
        // stage the cdecl result through word 1 so it survives the popad
        asm.mov_mem_eax(scratch_word(1));
        asm.popad();
        asm.mov_reg_mem(register, scratch_word(1));
    }

    // rebuild the frame the original caller expects to clean up
    asm.sub_esp(4 * stack_count as u8);
    asm.push_mem(scratch_word(0));
    asm.ret();

    let bytes = asm.finish();
    if bytes.len() > capacity {
        return Err(Error::WrapperOverflow {
            emitted: bytes.len(),
            capacity,
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Expected absolute-operand bytes for a scratch word
    fn word(scratch: usize, index: usize) -> [u8; 4] {
        ((scratch + 4 * index) as u32).to_le_bytes()
    }

    #[test]
    fn stack_only_activation_bytes() {
        let sig =
            Signature::cdecl_returning(Location::Eax, vec![Location::Stack, Location::Stack])
                .unwrap();
        let base = 0x1000;
        let scratch = 0x3000;
        let handler = 0x2000;
        let bytes = emit(base, &sig, handler, scratch, false).unwrap();

        let mut expected = Vec::new();
        // pop return address and both stack arguments
        for index in 0..=2 {
            expected.extend_from_slice(&[0x8F, 0x05]);
            expected.extend_from_slice(&word(scratch, index));
        }
        expected.push(0x60);
        // right-to-left: second argument first
        for index in [2, 1] {
            expected.extend_from_slice(&[0xFF, 0x35]);
            expected.extend_from_slice(&word(scratch, index));
        }
        // call handler: displacement from the end of the E8 instruction
        let call_site = base + expected.len();
        expected.push(0xE8);
        expected
            .extend_from_slice(&((handler as u32).wrapping_sub(call_site as u32 + 5)).to_le_bytes());
        expected.extend_from_slice(&[0x83, 0xC4, 0x08]);
        // result staged through word 1 around the register restore
        expected.push(0xA3);
        expected.extend_from_slice(&word(scratch, 1));
        expected.push(0x61);
        expected.push(0xA1);
        expected.extend_from_slice(&word(scratch, 1));
        // rebuild the caller's frame and return through word 0
        expected.extend_from_slice(&[0x83, 0xEC, 0x08]);
        expected.extend_from_slice(&[0xFF, 0x35]);
        expected.extend_from_slice(&word(scratch, 0));
        expected.push(0xC3);

        assert_eq!(bytes, expected);
    }

    #[test]
    fn mixed_activation_pushes_registers_directly() {
        let sig =
            Signature::cdecl_returning(Location::Eax, vec![Location::Eax, Location::Stack])
                .unwrap();
        let bytes = emit(0x1000, &sig, 0x2000, 0x3000, false).unwrap();

        // pop ret, pop the one stack argument, pushad
        let mut head = vec![0x8F, 0x05];
        head.extend_from_slice(&word(0x3000, 0));
        head.extend_from_slice(&[0x8F, 0x05]);
        head.extend_from_slice(&word(0x3000, 1));
        head.push(0x60);
        assert_eq!(&bytes[..13], head.as_slice());
        // reversed walk: the stack argument re-pushed from word 1, then eax
        assert_eq!(&bytes[13..15], &[0xFF, 0x35]);
        assert_eq!(&bytes[15..19], &word(0x3000, 1));
        assert_eq!(bytes[19], 0x50);
        // one stack argument rebuilt before the return
        let tail_start = bytes.len() - 10;
        assert_eq!(&bytes[tail_start..tail_start + 3], &[0x83, 0xEC, 0x04]);
    }

    #[test]
    fn result_can_land_in_any_gpr() {
        let sig = Signature::cdecl_returning(Location::Esi, vec![Location::Stack]).unwrap();
        let bytes = emit(0x1000, &sig, 0x2000, 0x3000, false).unwrap();
        // mov esi, [word 1] right after the popad
        let position = bytes
            .windows(2)
            .position(|pair| pair == [0x8B, 0x35])
            .unwrap();
        assert_eq!(bytes[position - 1], 0x61);
        assert_eq!(&bytes[position + 2..position + 6], &word(0x3000, 1));
    }

    #[test]
    fn float_results_stay_on_the_fpu_top() {
        let sig =
            Signature::cdecl_returning(Location::St0, vec![Location::Stack, Location::Stack])
                .unwrap();
        let bytes = emit(0x1000, &sig, 0x2000, 0x3000, true).unwrap();
        // no result staging: popad follows the cleanup directly
        let position = bytes
            .windows(3)
            .position(|triple| triple == [0x83, 0xC4, 0x08])
            .unwrap();
        assert_eq!(bytes[position + 3], 0x61);
    }

    #[test]
    fn refuses_unwrappable_layouts() {
        let fpu_argument = Signature::cdecl(vec![Location::St0]).unwrap();
        assert!(matches!(
            emit(0x1000, &fpu_argument, 0x2000, 0x3000, false),
            Err(Error::Unsupported(_))
        ));

        let byte_argument = Signature::cdecl(vec![Location::Al]).unwrap();
        assert!(matches!(
            emit(0x1000, &byte_argument, 0x2000, 0x3000, false),
            Err(Error::Unsupported(_))
        ));

        let byte_result = Signature::cdecl_returning(Location::Ah, vec![Location::Stack]).unwrap();
        assert!(matches!(
            emit(0x1000, &byte_result, 0x2000, 0x3000, false),
            Err(Error::Unsupported(_))
        ));

        let deep_float_result =
            Signature::cdecl_returning(Location::St1, vec![Location::Stack]).unwrap();
        assert!(matches!(
            emit(0x1000, &deep_float_result, 0x2000, 0x3000, true),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn overflow_is_reported_against_the_capacity() {
        let sig = Signature::cdecl(vec![Location::Stack]).unwrap();
        let result = emit_bounded(0x1000, &sig, 0x2000, 0x3000, false, 8);
        assert!(matches!(
            result,
            Err(Error::WrapperOverflow { capacity: 8, .. })
        ));
    }
}
