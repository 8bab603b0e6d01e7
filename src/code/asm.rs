//! # Asm
//!
//! A buffer-building encoder for the x86-32 instruction forms the generated
//! trampolines and wrappers are made of. Displacements are computed from the
//! position the instruction will occupy once the buffer is copied to its
//! final address.

use crate::location::Location;

/// 32-bit general-purpose registers, with their hardware encoding numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gpr {
    /// `eax`
    Eax = 0,
    /// `ecx`
    Ecx = 1,
    /// `edx`
    Edx = 2,
    /// `ebx`
    Ebx = 3,
    /// `esi`
    Esi = 6,
    /// `edi`
    Edi = 7,
}

impl Gpr {
    /// The register behind a 32-bit [`Location`], if it names one
    pub fn from_location(location: Location) -> Option<Gpr> {
        match location {
            Location::Eax => Some(Gpr::Eax),
            Location::Ebx => Some(Gpr::Ebx),
            Location::Ecx => Some(Gpr::Ecx),
            Location::Edx => Some(Gpr::Edx),
            Location::Esi => Some(Gpr::Esi),
            Location::Edi => Some(Gpr::Edi),
            _ => None,
        }
    }

    /// Hardware encoding number, as used in opcodes and ModR/M bytes
    fn number(self) -> u8 {
        self as u8
    }
}

/// Encoder writing instructions into a byte buffer destined for `base`
pub struct Asm {
    /// Address the first emitted byte will occupy
    base: usize,
    /// Encoded instruction bytes
    buffer: Vec<u8>,
}

impl Asm {
    /// Creates an encoder for code that will execute at `base`
    pub fn new(base: usize) -> Self {
        Self {
            base,
            buffer: Vec::new(),
        }
    }

    /// Address of the next instruction to be emitted
    pub fn position(&self) -> usize {
        self.base + self.buffer.len()
    }

    /// Number of bytes emitted so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes the encoder, returning the instruction bytes
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }

    /// Appends raw bytes, for displaced instructions copied verbatim
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Displacement from the end of a 5-byte relative instruction at the
    /// current position to `target`
    fn rel32(&self, target: usize) -> u32 {
        (target as u32).wrapping_sub((self.position() as u32).wrapping_add(5))
    }

    /// `jmp rel32` (`E9`)
    pub fn jmp(&mut self, target: usize) {
        let disp = self.rel32(target);
        self.buffer.push(0xE9);
        self.buffer.extend_from_slice(&disp.to_le_bytes());
    }

    /// `call rel32` (`E8`)
    pub fn call(&mut self, target: usize) {
        let disp = self.rel32(target);
        self.buffer.push(0xE8);
        self.buffer.extend_from_slice(&disp.to_le_bytes());
    }

    /// `pushad` (`60`)
    pub fn pushad(&mut self) {
        self.buffer.push(0x60);
    }

    /// `popad` (`61`)
    pub fn popad(&mut self) {
        self.buffer.push(0x61);
    }

    /// `push r32` (`50+r`)
    pub fn push_reg(&mut self, reg: Gpr) {
        self.buffer.push(0x50 + reg.number());
    }

    /// `pop dword ptr [address]` (`8F /0` with a 32-bit absolute operand)
    pub fn pop_mem(&mut self, address: usize) {
        self.buffer.extend_from_slice(&[0x8F, 0x05]);
        self.buffer.extend_from_slice(&(address as u32).to_le_bytes());
    }

    /// `push dword ptr [address]` (`FF /6` with a 32-bit absolute operand)
    pub fn push_mem(&mut self, address: usize) {
        self.buffer.extend_from_slice(&[0xFF, 0x35]);
        self.buffer.extend_from_slice(&(address as u32).to_le_bytes());
    }

    /// `mov r32, dword ptr [address]` (`A1` for `eax`, else `8B /r`)
    pub fn mov_reg_mem(&mut self, reg: Gpr, address: usize) {
        match reg {
            Gpr::Eax => self.buffer.push(0xA1),
            reg => {
                // ModR/M mod=00 rm=101: 32-bit absolute
                self.buffer.extend_from_slice(&[0x8B, 0x05 | (reg.number() << 3)]);
            }
        }
        self.buffer.extend_from_slice(&(address as u32).to_le_bytes());
    }

    /// `mov dword ptr [address], eax` (`A3`)
    pub fn mov_mem_eax(&mut self, address: usize) {
        self.buffer.push(0xA3);
        self.buffer.extend_from_slice(&(address as u32).to_le_bytes());
    }

    /// `add esp, imm8` (`83 C4 ib`)
    pub fn add_esp(&mut self, bytes: u8) {
        self.buffer.extend_from_slice(&[0x83, 0xC4, bytes]);
    }

    /// `sub esp, imm8` (`83 EC ib`)
    pub fn sub_esp(&mut self, bytes: u8) {
        self.buffer.extend_from_slice(&[0x83, 0xEC, bytes]);
    }

    /// `ret` (`C3`)
    pub fn ret(&mut self) {
        self.buffer.push(0xC3);
    }
}
