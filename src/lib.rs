#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod call;
pub mod code;
pub mod error;
pub mod hook;
pub mod location;
pub mod patch;
pub mod signature;

pub use call::{Argument, Arguments, Function, Output};
pub use error::{Error, Result};
pub use hook::Hook;
pub use location::{CallingConvention, Location};
pub use signature::{Return, Signature};
