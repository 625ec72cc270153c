//! CLI subcommands.

pub mod broadcast;
pub mod daemon;
