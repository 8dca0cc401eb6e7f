//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod encode;
pub(crate) mod init;
pub(crate) mod listen;
pub(crate) mod run;
