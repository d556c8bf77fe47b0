//! Shared types for the dsbridge boundary: the structured error model and
//! the opaque handle vocabulary.

#![warn(clippy::pedantic)]

pub mod error;
pub mod handle;

pub use error::{BridgeError, ErrorKind};
pub use handle::{Handle, HandleKind};
