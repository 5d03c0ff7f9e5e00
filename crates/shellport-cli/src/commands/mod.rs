//! CLI subcommand implementations.

pub mod probe;
pub mod watch;
