//! Subcommand implementations

pub mod graph;
pub mod status;
