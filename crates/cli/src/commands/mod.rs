//! Subcommand implementations

pub mod spy;
pub mod usage;
