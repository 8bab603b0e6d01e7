//! # Call
//!
//! The caller engine: binds a code address to a [`Signature`], marshals
//! typed argument values into the declared register and stack state, runs
//! the target and pulls the result out of the declared return site.

use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::location::{ByteHalf, Location};
use crate::signature::Signature;

#[cfg(target_arch = "x86")]
pub(crate) mod raw;

/// A value that can be passed to an unconventional target.
///
/// Arguments travel as 32-bit words: floats by bit pattern, narrower
/// integers zero-extended. The float marker routes stack-located values onto
/// the x87 stack instead of the memory stack.
pub trait Argument: Copy {
    /// Whether the value is floating-point
    const IS_FLOAT: bool = false;

    /// The value's 32-bit bit pattern
    fn into_bits(self) -> u32;
}

/// A value that can be read back from an unconventional target's return
/// site.
pub trait Output: Copy {
    /// Whether the value is floating-point; drives the default return site
    const IS_FLOAT: bool = false;

    /// Rebuilds the value from a captured 32-bit word
    fn from_bits(bits: u32) -> Self;

    /// Rebuilds the value from a captured x87 slot
    fn from_float(value: f32) -> Self;
}

impl Argument for u32 {
    fn into_bits(self) -> u32 {
        self
    }
}

impl Argument for i32 {
    fn into_bits(self) -> u32 {
        self as u32
    }
}

impl Argument for u16 {
    fn into_bits(self) -> u32 {
        u32::from(self)
    }
}

impl Argument for i16 {
    fn into_bits(self) -> u32 {
        u32::from(self as u16)
    }
}

impl Argument for u8 {
    fn into_bits(self) -> u32 {
        u32::from(self)
    }
}

impl Argument for i8 {
    fn into_bits(self) -> u32 {
        u32::from(self as u8)
    }
}

impl Argument for usize {
    fn into_bits(self) -> u32 {
        self as u32
    }
}

impl Argument for f32 {
    const IS_FLOAT: bool = true;

    fn into_bits(self) -> u32 {
        self.to_bits()
    }
}

impl<T> Argument for *const T {
    fn into_bits(self) -> u32 {
        self as usize as u32
    }
}

impl<T> Argument for *mut T {
    fn into_bits(self) -> u32 {
        self as usize as u32
    }
}

impl Output for () {
    fn from_bits(_: u32) -> Self {}

    fn from_float(_: f32) -> Self {}
}

impl Output for u32 {
    fn from_bits(bits: u32) -> Self {
        bits
    }

    fn from_float(value: f32) -> Self {
        value as u32
    }
}

impl Output for i32 {
    fn from_bits(bits: u32) -> Self {
        bits as i32
    }

    fn from_float(value: f32) -> Self {
        value as i32
    }
}

impl Output for u16 {
    fn from_bits(bits: u32) -> Self {
        bits as u16
    }

    fn from_float(value: f32) -> Self {
        value as u16
    }
}

impl Output for i16 {
    fn from_bits(bits: u32) -> Self {
        bits as u16 as i16
    }

    fn from_float(value: f32) -> Self {
        value as i16
    }
}

impl Output for u8 {
    fn from_bits(bits: u32) -> Self {
        bits as u8
    }

    fn from_float(value: f32) -> Self {
        value as u8
    }
}

impl Output for i8 {
    fn from_bits(bits: u32) -> Self {
        bits as u8 as i8
    }

    fn from_float(value: f32) -> Self {
        value as i8
    }
}

impl Output for usize {
    fn from_bits(bits: u32) -> Self {
        bits as usize
    }

    fn from_float(value: f32) -> Self {
        value as usize
    }
}

impl Output for f32 {
    const IS_FLOAT: bool = true;

    fn from_bits(bits: u32) -> Self {
        f32::from_bits(bits)
    }

    fn from_float(value: f32) -> Self {
        value
    }
}

impl<T> Output for *mut T {
    fn from_bits(bits: u32) -> Self {
        bits as usize as *mut T
    }

    fn from_float(_: f32) -> Self {
        std::ptr::null_mut()
    }
}

/// Bit-pattern capture of one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawArg {
    /// The argument's 32-bit word
    pub bits: u32,
    /// Whether the argument is floating-point
    pub float: bool,
}

/// A tuple of [`Argument`] values
pub trait Arguments {
    /// Number of values in the tuple
    const COUNT: usize;

    /// Bit-pattern capture of each value, in declaration order
    fn capture(&self) -> Vec<RawArg>;
}

/// Implements [`Arguments`] for one tuple arity
macro_rules! impl_arguments {
    ($count:expr $(, $ty:ident: $idx:tt)*) => {
        impl<$($ty: Argument),*> Arguments for ($($ty,)*) {
            const COUNT: usize = $count;

            fn capture(&self) -> Vec<RawArg> {
                vec![$(RawArg { bits: self.$idx.into_bits(), float: $ty::IS_FLOAT }),*]
            }
        }
    };
}

impl_arguments!(0);
impl_arguments!(1, A0: 0);
impl_arguments!(2, A0: 0, A1: 1);
impl_arguments!(3, A0: 0, A1: 1, A2: 2);
impl_arguments!(4, A0: 0, A1: 1, A2: 2, A3: 3);
impl_arguments!(5, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_arguments!(6, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_arguments!(7, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_arguments!(8, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);

/// Fully staged activation for one call
#[derive(Debug, PartialEq)]
pub(crate) struct StagedFrame {
    /// `eax`, `ebx`, `ecx`, `edx`, `esi`, `edi` words, sub-registers merged
    pub gpr: [u32; 6],
    /// x87 slots, slot 0 first
    pub fpu: [f32; 8],
    /// Memory-stack words in declaration order, leftmost first
    pub stack: Vec<u32>,
    /// Bytes the caller removes after the call returns
    pub cleanup: u32,
}

/// Applies the staging policy: classifies stack arguments, hoists
/// stack-located floats onto the x87 queue, merges sub-register values into
/// their owning register words and fills the eight x87 slots.
pub(crate) fn stage(signature: &Signature, args: &[RawArg]) -> StagedFrame {
    let locations = signature.argument_locations();

    // floats declared on the stack ride the x87 stack instead; queued in
    // reverse declaration order so the leftmost ends up deepest
    let mut hoisted = Vec::new();
    let mut stack = Vec::new();
    for index in signature.stack_argument_indices() {
        if args[index].float {
            hoisted.insert(0, args[index].bits);
        } else {
            stack.push(args[index].bits);
        }
    }

    let value = |location: Location| {
        locations
            .iter()
            .position(|&bound| bound == location)
            .map(|index| args[index].bits)
            .unwrap_or(0)
    };

    let gpr = [
        value(Location::Eax) | value(Location::Al) | value(Location::Ah) << 8,
        value(Location::Ebx) | value(Location::Bl) | value(Location::Bh) << 8,
        value(Location::Ecx) | value(Location::Cl) | value(Location::Ch) << 8,
        value(Location::Edx) | value(Location::Dl) | value(Location::Dh) << 8,
        value(Location::Esi) | value(Location::Sil),
        value(Location::Edi) | value(Location::Dil),
    ];

    let slots = [
        Location::St0,
        Location::St1,
        Location::St2,
        Location::St3,
        Location::St4,
        Location::St5,
        Location::St6,
        Location::St7,
    ];
    let mut queue = hoisted.into_iter();
    let mut fpu = [0.0f32; 8];
    for (slot, location) in slots.into_iter().enumerate() {
        let bound = locations
            .iter()
            .position(|&declared| declared == location)
            .map(|index| args[index].bits);
        fpu[slot] = match bound.or_else(|| queue.next()) {
            Some(bits) => f32::from_bits(bits),
            None => 0.0,
        };
    }

    let cleanup = if signature.convention().caller_cleanup() {
        4 * stack.len() as u32
    } else {
        0
    };

    StagedFrame {
        gpr,
        fpu,
        stack,
        cleanup,
    }
}

/// Reads the result out of the captured register state
pub(crate) fn extract<R: Output>(signature: &Signature, gpr: &[u32; 6], fpu: &[f32; 8]) -> Result<R> {
    let location = signature.return_location(R::IS_FLOAT);

    if let Some(index) = location.gpr_index() {
        return Ok(R::from_bits(gpr[index]));
    }
    if let Some((owner, half)) = location.byte_register() {
        let word = owner.gpr_index().map(|index| gpr[index]).unwrap_or(0);
        let byte = match half {
            ByteHalf::Low => word & 0xFF,
            ByteHalf::High => (word >> 8) & 0xFF,
        };
        return Ok(R::from_bits(byte));
    }
    if let Some(slot) = location.fpu_index() {
        return Ok(R::from_float(fpu[slot]));
    }

    // Location::Stack, which validation rejects as a return site
    Err(Error::InvalidState(location))
}

/// A callable code address paired with its signature.
///
/// `R` is the result type and `A` the argument tuple; the signature must
/// declare exactly one location per tuple element.
#[derive(Debug, Clone)]
pub struct Function<R, A> {
    /// Address of the target's first instruction
    address: usize,
    /// Declared layout of the target's activation
    signature: Signature,
    /// Binds the value types the signature's locations correspond to
    _values: PhantomData<fn(A) -> R>,
}

impl<R, A> Function<R, A> {
    /// The bound code address
    pub fn address(&self) -> usize {
        self.address
    }

    /// The bound signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl<R: Output, A: Arguments> Function<R, A> {
    /// Binds `address` to `signature`.
    ///
    /// The address must refer to executable code for the lifetime of the
    /// `Function`; it is not dereferenced until [`call`](Self::call).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the signature does not
    /// declare exactly one location per element of `A`.
    pub fn new(address: usize, signature: Signature) -> Result<Self> {
        if signature.arity() != A::COUNT {
            return Err(Error::InvalidArgument(
                "signature location count does not match the argument tuple",
            ));
        }
        Ok(Self {
            address,
            signature,
            _values: PhantomData,
        })
    }

    /// Stages the declared register and stack state from `args`, branches to
    /// the target and reads the result from the declared return site.
    ///
    /// # Safety
    ///
    /// The bound address must be executable code that actually consumes the
    /// declared activation, preserves `ebp`, and follows the signature's
    /// convention. A fault inside the target is not caught.
    #[cfg(target_arch = "x86")]
    pub unsafe fn call(&self, args: A) -> Result<R> {
        let captured = args.capture();
        let staged = stage(&self.signature, &captured);

        let mut frame = raw::RawFrame {
            gpr: staged.gpr,
            fpu: staged.fpu,
            stack: staged.stack.as_ptr(),
            stack_len: staged.stack.len() as u32,
            cleanup: staged.cleanup,
            target: self.address as u32,
        };
        // Safety: the frame is fully staged; the caller vouches for the target
        unsafe {
            raw::transfer(&mut frame);
        }

        extract(&self.signature, &frame.gpr, &frame.fpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Captures an argument tuple the way `call` would
    fn captured<A: Arguments>(args: A) -> Vec<RawArg> {
        args.capture()
    }

    #[test]
    fn arguments_capture_bit_patterns() {
        let raw = captured((-1i8, 0x1234u16, 2.5f32));
        assert_eq!(
            raw,
            [
                RawArg { bits: 0xFF, float: false },
                RawArg { bits: 0x1234, float: false },
                RawArg { bits: 2.5f32.to_bits(), float: true },
            ]
        );
    }

    #[test]
    fn stack_words_keep_declaration_order() {
        let sig = Signature::cdecl(vec![
            Location::Stack,
            Location::Ecx,
            Location::Stack,
        ])
        .unwrap();
        let staged = stage(&sig, &captured((7i32, 8i32, 9i32)));
        assert_eq!(staged.stack, [7, 9]);
        assert_eq!(staged.gpr[2], 8);
        assert_eq!(staged.cleanup, 8);
    }

    #[test]
    fn sub_registers_merge_into_their_owner_word() {
        let sig = Signature::cdecl(vec![Location::Al, Location::Bh, Location::Bl]).unwrap();
        let staged = stage(&sig, &captured((0x11u8, 0x22u8, 0x33u8)));
        assert_eq!(staged.gpr[0], 0x0000_0011);
        assert_eq!(staged.gpr[1], 0x0000_2233);
        assert!(staged.stack.is_empty());
    }

    #[test]
    fn esi_edi_take_low_bytes_only() {
        let sig = Signature::cdecl(vec![Location::Sil, Location::Dil]).unwrap();
        let staged = stage(&sig, &captured((0xAAu8, 0xBBu8)));
        assert_eq!(staged.gpr[4], 0xAA);
        assert_eq!(staged.gpr[5], 0xBB);
    }

    #[test]
    fn stack_floats_are_hoisted_in_reverse_declaration_order() {
        let sig = Signature::cdecl(vec![Location::Stack, Location::Stack]).unwrap();
        let staged = stage(&sig, &captured((5.0f32, 3.0f32)));

        // nothing reaches the memory stack, so there is nothing to clean up
        assert!(staged.stack.is_empty());
        assert_eq!(staged.cleanup, 0);

        // rightmost on top, leftmost one deeper
        assert_eq!(staged.fpu[0], 3.0);
        assert_eq!(staged.fpu[1], 5.0);
    }

    #[test]
    fn mixed_stack_classification_splits_ints_from_floats() {
        let sig = Signature::cdecl(vec![
            Location::Stack,
            Location::Stack,
            Location::Stack,
        ])
        .unwrap();
        let staged = stage(&sig, &captured((1i32, 2.0f32, 3i32)));
        assert_eq!(staged.stack, [1, 3]);
        assert_eq!(staged.cleanup, 8);
        assert_eq!(staged.fpu[0], 2.0);
    }

    #[test]
    fn register_bound_fpu_slots_win_over_the_hoist_queue() {
        let sig = Signature::cdecl(vec![Location::St1, Location::Stack]).unwrap();
        let staged = stage(&sig, &captured((5.0f32, 3.0f32)));
        // slot 0 is unbound and takes the hoisted value; slot 1 is bound
        assert_eq!(staged.fpu[0], 3.0);
        assert_eq!(staged.fpu[1], 5.0);
        assert_eq!(staged.fpu[2], 0.0);
    }

    #[test]
    fn unbound_registers_stage_zero() {
        let sig = Signature::cdecl(vec![Location::Edx]).unwrap();
        let staged = stage(&sig, &captured((0x55i32,)));
        assert_eq!(staged.gpr, [0, 0, 0, 0x55, 0, 0]);
        assert_eq!(staged.fpu, [0.0; 8]);
    }

    #[test]
    fn extraction_reads_the_declared_site() {
        let sig = Signature::cdecl_returning(Location::Ah, vec![]).unwrap();
        let gpr = [0x0000_5A00, 0, 0, 0, 0, 0];
        let fpu = [0.0; 8];
        let byte: i8 = extract(&sig, &gpr, &fpu).unwrap();
        assert_eq!(byte, 0x5A);

        let sig = Signature::cdecl_returning(Location::Esi, vec![]).unwrap();
        let gpr = [0, 0, 0, 0, 0xDEAD_BEEF, 0];
        let word: u32 = extract(&sig, &gpr, &fpu).unwrap();
        assert_eq!(word, 0xDEAD_BEEF);

        let sig = Signature::cdecl(vec![]).unwrap();
        let fpu = [2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let float: f32 = extract(&sig, &[0; 6], &fpu).unwrap();
        assert_eq!(float, 2.0);
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let sig = Signature::cdecl(vec![Location::Stack]).unwrap();
        assert!(matches!(
            Function::<i32, (i32, i32)>::new(0x1000, sig),
            Err(Error::InvalidArgument(_))
        ));
    }
}
