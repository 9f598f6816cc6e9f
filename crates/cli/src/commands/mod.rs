//! Subcommand implementations

pub mod batch;
pub mod predict;
pub mod train;
