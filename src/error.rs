//! # Error
//!
//! Unified error type surfaced at the crate's API boundary

use thiserror::Error;

use crate::alloc::AllocError;
use crate::location::Location;

/// Errors that can occur while building signatures, calling targets or
/// installing hooks
#[derive(Debug, Error)]
pub enum Error {
    /// A signature bound the same register twice, bound a register together
    /// with one of its sub-registers, or placed the return value on the stack
    #[error("invalid location in signature: {0}")]
    InvalidLocation(&'static str),

    /// A register-only query was given `Location::Stack`, a hook was given a
    /// displaced prologue shorter than a near jump, or a typed argument tuple
    /// did not match the signature's location count
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `install`, `uninstall` or `call_original` was invoked on a
    /// default-constructed hook
    #[error("hook is not initialized")]
    NotInitialized,

    /// The requested layout is valid for direct calls but has no wrapper
    /// encoding yet
    #[error("unsupported by the hook wrapper: {0}")]
    Unsupported(&'static str),

    /// The emitted wrapper did not fit its executable allocation
    #[error("wrapper of {emitted} bytes exceeds capacity of {capacity} bytes")]
    WrapperOverflow {
        /// Number of bytes the emitter produced
        emitted: usize,
        /// Fixed byte capacity of the wrapper allocation
        capacity: usize,
    },

    /// A code path that validation should have made unreachable was taken
    #[error("invalid state: result cannot be read from {0:?}")]
    InvalidState(Location),

    /// The executable-memory pool could not satisfy an allocation
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// Re-protecting a patch site failed
    #[error(transparent)]
    Protection(#[from] region::Error),
}

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
