//! `warden` subcommand implementations.

pub mod device;
pub mod filter;
