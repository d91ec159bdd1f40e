//! CLI argument model and validation for the `pulse` binary.
//!
//! Exposes the clap-backed [`Cli`] flags and resolves them into exactly one
//! [`CliMode`] per invocation.

pub mod cli_args;
pub mod validation;

pub use cli_args::Cli;
pub use validation::*;
