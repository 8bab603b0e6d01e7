//! # Signature
//!
//! Binds a target's calling convention, per-argument locations and return
//! location, and answers the layout queries the caller and hook engines need

use crate::error::{Error, Result};
use crate::location::{CallingConvention, Location};

/// Where a target leaves its return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Return {
    /// The convention's usual spot: `eax` for integers, `st(0)` for floats
    #[default]
    Default,
    /// An explicit register or x87 slot
    Explicit(Location),
}

/// Calling convention plus the location of every argument and of the return
/// value.
///
/// Validated on construction: a location may be bound at most once, a 32-bit
/// register may not be bound together with one of its own 8-bit halves, and
/// the return value cannot live on the stack.
#[derive(Debug, Clone)]
pub struct Signature {
    /// Convention governing stack order, cleanup and default return sites
    convention: CallingConvention,
    /// Declared return site
    ret: Return,
    /// Location of each argument, in declaration order
    arguments: Vec<Location>,
}

impl Signature {
    /// Creates a validated signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLocation`] when the return location is
    /// [`Location::Stack`], when an argument location repeats, or when a
    /// 32-bit register is combined with one of its own sub-registers.
    pub fn new(
        convention: CallingConvention,
        ret: Return,
        arguments: Vec<Location>,
    ) -> Result<Self> {
        if ret == Return::Explicit(Location::Stack) {
            return Err(Error::InvalidLocation("return value cannot be on the stack"));
        }

        for (i, &a) in arguments.iter().enumerate() {
            for (j, &b) in arguments.iter().enumerate() {
                if i != j && a == b && a != Location::Stack {
                    return Err(Error::InvalidLocation(
                        "an argument location was bound more than once",
                    ));
                }
                if a.clashes_with(b) {
                    return Err(Error::InvalidLocation(
                        "a register was combined with one of its sub-registers",
                    ));
                }
            }
        }

        Ok(Self {
            convention,
            ret,
            arguments,
        })
    }

    /// Shorthand for a cdecl signature with the default return site
    pub fn cdecl(arguments: Vec<Location>) -> Result<Self> {
        Self::new(CallingConvention::Cdecl, Return::Default, arguments)
    }

    /// Shorthand for a cdecl signature with an explicit return site
    pub fn cdecl_returning(ret: Location, arguments: Vec<Location>) -> Result<Self> {
        Self::new(CallingConvention::Cdecl, Return::Explicit(ret), arguments)
    }

    /// The signature's calling convention
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Number of arguments the signature declares
    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// Location of each argument, in declaration order
    pub fn argument_locations(&self) -> &[Location] {
        &self.arguments
    }

    /// Positions of the stack-located arguments, in declaration order
    pub fn stack_argument_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.arguments
            .iter()
            .enumerate()
            .filter(|(_, &loc)| loc == Location::Stack)
            .map(|(i, _)| i)
    }

    /// Number of stack-located arguments
    pub fn stack_argument_count(&self) -> usize {
        self.stack_argument_indices().count()
    }

    /// Position of the argument bound to `location`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for [`Location::Stack`]: stack
    /// slots are not unique, so the query only makes sense for registers.
    pub fn argument_index_for_register(&self, location: Location) -> Result<Option<usize>> {
        if location == Location::Stack {
            return Err(Error::InvalidArgument(
                "register query was given Location::Stack",
            ));
        }
        Ok(self.arguments.iter().position(|&loc| loc == location))
    }

    /// Whether some argument is bound to `location`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for [`Location::Stack`].
    pub fn has_argument_in_register(&self, location: Location) -> Result<bool> {
        Ok(self.argument_index_for_register(location)?.is_some())
    }

    /// Resolves the return site, defaulting from the convention when no
    /// explicit location was declared. `float` is whether the result type is
    /// floating-point.
    pub fn return_location(&self, float: bool) -> Location {
        match self.ret {
            Return::Explicit(location) => location,
            Return::Default => match self.convention {
                CallingConvention::Cdecl => {
                    if float {
                        Location::St0
                    } else {
                        Location::Eax
                    }
                }
            },
        }
    }
}
