//! # Location
//!
//! Names the places an argument or return value can live: a caller-stack
//! slot, a 32-bit general-purpose register, one of its 8-bit halves, or an
//! x87 stack slot

/// Calling conventions a target can follow for everything its explicit
/// locations do not override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    /// Right-to-left stack order, caller cleanup, integer result in `eax`,
    /// floating-point result on the x87 top
    #[default]
    Cdecl,
}

impl CallingConvention {
    /// Whether the caller removes stack arguments after the call returns
    pub fn caller_cleanup(self) -> bool {
        match self {
            Self::Cdecl => true,
        }
    }
}

/// Home of a single argument or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// A 32-bit slot on the caller's stack
    Stack,
    /// `eax`
    Eax,
    /// `ebx`
    Ebx,
    /// `ecx`
    Ecx,
    /// `edx`
    Edx,
    /// `esi`
    Esi,
    /// `edi`
    Edi,
    /// Bits 8..16 of `eax`
    Ah,
    /// Bits 0..8 of `eax`
    Al,
    /// Bits 8..16 of `ebx`
    Bh,
    /// Bits 0..8 of `ebx`
    Bl,
    /// Bits 8..16 of `ecx`
    Ch,
    /// Bits 0..8 of `ecx`
    Cl,
    /// Bits 8..16 of `edx`
    Dh,
    /// Bits 0..8 of `edx`
    Dl,
    /// Bits 0..8 of `esi`
    Sil,
    /// Bits 0..8 of `edi`
    Dil,
    /// x87 stack slot 0 (top)
    St0,
    /// x87 stack slot 1
    St1,
    /// x87 stack slot 2
    St2,
    /// x87 stack slot 3
    St3,
    /// x87 stack slot 4
    St4,
    /// x87 stack slot 5
    St5,
    /// x87 stack slot 6
    St6,
    /// x87 stack slot 7
    St7,
}

/// Which half of a general-purpose register an 8-bit location occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteHalf {
    /// Bits 0..8
    Low,
    /// Bits 8..16
    High,
}

impl Location {
    /// The six 32-bit general-purpose locations, in their staging order
    pub(crate) const GPRS: [Location; 6] = [
        Location::Eax,
        Location::Ebx,
        Location::Ecx,
        Location::Edx,
        Location::Esi,
        Location::Edi,
    ];

    /// Whether this is one of the 32-bit general-purpose registers
    pub fn is_gpr(self) -> bool {
        self.gpr_index().is_some()
    }

    /// Position of a 32-bit register in staging order, if this names one
    pub(crate) fn gpr_index(self) -> Option<usize> {
        Self::GPRS.iter().position(|&gpr| gpr == self)
    }

    /// Whether this is an x87 stack slot
    pub fn is_fpu(self) -> bool {
        self.fpu_index().is_some()
    }

    /// Index of an x87 slot (`St0` is 0), if this is one
    pub fn fpu_index(self) -> Option<usize> {
        match self {
            Self::St0 => Some(0),
            Self::St1 => Some(1),
            Self::St2 => Some(2),
            Self::St3 => Some(3),
            Self::St4 => Some(4),
            Self::St5 => Some(5),
            Self::St6 => Some(6),
            Self::St7 => Some(7),
            _ => None,
        }
    }

    /// The 32-bit register owning this 8-bit location, and the half it
    /// occupies, if this is an 8-bit location
    pub fn byte_register(self) -> Option<(Location, ByteHalf)> {
        match self {
            Self::Al => Some((Self::Eax, ByteHalf::Low)),
            Self::Ah => Some((Self::Eax, ByteHalf::High)),
            Self::Bl => Some((Self::Ebx, ByteHalf::Low)),
            Self::Bh => Some((Self::Ebx, ByteHalf::High)),
            Self::Cl => Some((Self::Ecx, ByteHalf::Low)),
            Self::Ch => Some((Self::Ecx, ByteHalf::High)),
            Self::Dl => Some((Self::Edx, ByteHalf::Low)),
            Self::Dh => Some((Self::Edx, ByteHalf::High)),
            Self::Sil => Some((Self::Esi, ByteHalf::Low)),
            Self::Dil => Some((Self::Edi, ByteHalf::Low)),
            _ => None,
        }
    }

    /// Whether `self` and `other` cannot be bound in the same signature
    /// because one is a sub-register of the other
    pub fn clashes_with(self, other: Location) -> bool {
        match other.byte_register() {
            Some((owner, _)) => owner == self,
            None => false,
        }
    }
}
