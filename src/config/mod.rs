//! Configuration: CLI parsing and validation

pub mod cli;

pub use cli::{Cli, ExecutionMode, MethodArg};
