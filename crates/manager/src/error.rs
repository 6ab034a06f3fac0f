//! The Server Manager surfaces the shared [`fluidmcp_common::ErrorKind`]
//! taxonomy directly (`Validation`, `Conflict`, `NotFound`, `LaunchFailed`,
//! `ChildError`, `Timeout`) since its errors are what the HTTP layer maps to
//! status codes — there is no manager-local error variant set to translate
//! from.

pub use fluidmcp_common::{Error, ErrorKind, Result};

fluidmcp_common::impl_context!();
