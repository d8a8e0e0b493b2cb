//! CLI command implementations.

pub mod flow;
pub mod init;
pub mod registry;
