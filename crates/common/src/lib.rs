//! Shared error scaffolding used across all fluidmcp crates.

pub mod error;

pub use error::{Error, ErrorKind, FromMessage, Result};
